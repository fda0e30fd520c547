//! Atomic binary installation with rollback.
//!
//! The swap sequence keeps a usable server binary on disk at every step:
//!
//! 1. Move the fetched binary next to the live one (`.staged` sibling, so
//!    the final rename never crosses filesystems).
//! 2. Mark it executable and validate it with a `--version` run. A binary
//!    that cannot execute is rejected here, before the live path is touched.
//! 3. Rename live → `.prev`, staged → live. Same-directory renames, atomic
//!    on every platform we ship to.
//! 4. Validate again at the live path. On failure the `.prev` binary is
//!    renamed back, if rollback is allowed.

use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::{Result, UpdateError};
use crate::fetch::TempArtifact;
use crate::paths::InstallLayout;

/// Install a fetched artifact as the live server binary.
///
/// The displaced binary is always retained at the `.prev` path so the
/// caller can still undo the swap (see [`rollback_swap`]) until the cycle
/// has fully committed; call [`discard_previous`] once it has.
/// `allow_rollback` controls whether a post-swap validation failure
/// restores the `.prev` binary. Callers pass `false` when the version
/// store has no record of what the displaced binary was.
///
/// Consumes the artifact; its staging directory is deleted when this
/// function returns, on every path.
///
/// # Errors
///
/// `InstallValidationFailed` when the new binary fails its `--version`
/// check (the live binary is left untouched or rolled back), `Io` when a
/// filesystem step fails.
pub fn install(artifact: TempArtifact, layout: &InstallLayout, allow_rollback: bool) -> Result<()> {
    let version = artifact.version().clone();

    if let Some(dir) = layout.server_binary.parent() {
        fs::create_dir_all(dir)?;
    }

    // Stage next to the live binary.
    move_into(artifact.binary_path(), &layout.staged_binary)?;
    set_executable(&layout.staged_binary)?;
    clear_quarantine(&layout.staged_binary);

    // Reject a broken download before the live path is involved.
    if let Err(e) = validate_binary(&layout.staged_binary) {
        let _ = fs::remove_file(&layout.staged_binary);
        return Err(e);
    }

    let had_previous = layout.server_binary.exists();
    if had_previous {
        fs::rename(&layout.server_binary, &layout.previous_binary)?;
    }

    if let Err(e) = fs::rename(&layout.staged_binary, &layout.server_binary) {
        if had_previous {
            let _ = fs::rename(&layout.previous_binary, &layout.server_binary);
        }
        let _ = fs::remove_file(&layout.staged_binary);
        return Err(e.into());
    }

    // Validate once more at the final path. Catches binaries that embed
    // their install location or depend on siblings that did not move.
    if let Err(e) = validate_binary(&layout.server_binary) {
        if allow_rollback && had_previous {
            match fs::rename(&layout.previous_binary, &layout.server_binary) {
                Ok(()) => warn!(
                    version = %version,
                    "new binary failed validation after swap; previous binary restored"
                ),
                Err(restore) => warn!(
                    version = %version,
                    error = %restore,
                    "new binary failed validation and the previous binary could not be restored"
                ),
            }
        } else {
            let _ = fs::remove_file(&layout.server_binary);
        }
        return Err(e);
    }

    info!(
        version = %version,
        path = %layout.server_binary.display(),
        "server binary installed"
    );
    Ok(())
}

/// Undo a completed swap: restore the `.prev` binary over the live path,
/// or remove the live binary when there was nothing before the install.
///
/// # Errors
///
/// `Io` when the restore rename fails.
pub fn rollback_swap(layout: &InstallLayout) -> Result<()> {
    if layout.previous_binary.exists() {
        fs::rename(&layout.previous_binary, &layout.server_binary)?;
        warn!(
            path = %layout.server_binary.display(),
            "install rolled back to the previous binary"
        );
    } else if let Err(e) = fs::remove_file(&layout.server_binary)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        return Err(e.into());
    }
    Ok(())
}

/// Drop the retained `.prev` binary once the cycle has fully committed.
///
/// Best-effort: on Windows the displaced binary may still be mapped by a
/// running server, in which case the delete fails here and succeeds on the
/// next install.
pub fn discard_previous(layout: &InstallLayout) {
    let _ = fs::remove_file(&layout.previous_binary);
}

/// Move a file, falling back to copy + delete when the rename crosses
/// filesystems (staging lives under the cache dir, which may be a
/// different mount than the install dir).
fn move_into(src: &Path, dest: &Path) -> Result<()> {
    if fs::rename(src, dest).is_ok() {
        return Ok(());
    }
    debug!(
        src = %src.display(),
        dest = %dest.display(),
        "rename failed, copying across filesystems"
    );
    fs::copy(src, dest)?;
    let _ = fs::remove_file(src);
    Ok(())
}

/// Run the binary with `--version` and require a clean exit.
fn validate_binary(path: &Path) -> Result<()> {
    let output = std::process::Command::new(path)
        .arg("--version")
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .output()
        .map_err(|e| {
            UpdateError::InstallValidationFailed(format!("cannot run {}: {e}", path.display()))
        })?;

    if !output.status.success() {
        return Err(UpdateError::InstallValidationFailed(format!(
            "{} failed --version check (exit code {:?})",
            path.display(),
            output.status.code()
        )));
    }
    Ok(())
}

/// Set executable permission on Unix platforms.
fn set_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    }
    let _ = path; // Suppress unused warning on Windows.
    Ok(())
}

/// Clear the macOS quarantine attribute so Gatekeeper does not block the
/// freshly downloaded binary.
fn clear_quarantine(path: &Path) {
    #[cfg(target_os = "macos")]
    {
        let _ = std::process::Command::new("xattr")
            .args(["-c", &path.to_string_lossy()])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status();
    }
    let _ = path;
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::version::VersionId;

    fn artifact_with(content: &str) -> TempArtifact {
        let staging = tempfile::tempdir().unwrap();
        let binary = staging.path().join("quill-analyzer");
        fs::write(&binary, content).unwrap();
        TempArtifact::for_tests(staging, binary, "1.2.3".parse::<VersionId>().unwrap())
    }

    fn fresh_layout() -> (tempfile::TempDir, InstallLayout) {
        let root = tempfile::tempdir().unwrap();
        let layout = InstallLayout::under_root(root.path());
        (root, layout)
    }

    const GOOD_BINARY: &str = "#!/bin/sh\nexit 0\n";
    const BAD_BINARY: &str = "#!/bin/sh\nexit 1\n";
    // Passes validation at the staged path, fails at the live path. Lets
    // the tests drive the post-swap rollback branch with a real subprocess.
    const STAGED_ONLY_BINARY: &str = "#!/bin/sh\ncase \"$0\" in *.staged) exit 0 ;; *) exit 1 ;; esac\n";

    #[cfg(unix)]
    #[test]
    fn fresh_install_places_and_validates_binary() {
        let (_root, layout) = fresh_layout();

        install(artifact_with(GOOD_BINARY), &layout, false).unwrap();

        assert_eq!(fs::read_to_string(&layout.server_binary).unwrap(), GOOD_BINARY);
        assert!(!layout.staged_binary.exists());
        assert!(!layout.previous_binary.exists());

        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(&layout.server_binary).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    #[cfg(unix)]
    #[test]
    fn replacing_keeps_previous_for_rollback() {
        let (_root, layout) = fresh_layout();
        fs::create_dir_all(layout.server_binary.parent().unwrap()).unwrap();
        fs::write(&layout.server_binary, "old-content").unwrap();

        install(artifact_with(GOOD_BINARY), &layout, true).unwrap();

        assert_eq!(fs::read_to_string(&layout.server_binary).unwrap(), GOOD_BINARY);
        assert_eq!(
            fs::read_to_string(&layout.previous_binary).unwrap(),
            "old-content"
        );
    }

    #[cfg(unix)]
    #[test]
    fn discard_previous_drops_the_retained_binary() {
        let (_root, layout) = fresh_layout();
        fs::create_dir_all(layout.server_binary.parent().unwrap()).unwrap();
        fs::write(&layout.server_binary, "old-content").unwrap();

        install(artifact_with(GOOD_BINARY), &layout, true).unwrap();
        assert!(layout.previous_binary.exists());

        discard_previous(&layout);
        assert!(!layout.previous_binary.exists());
    }

    #[test]
    fn rollback_swap_restores_the_previous_binary() {
        let (_root, layout) = fresh_layout();
        fs::create_dir_all(layout.server_binary.parent().unwrap()).unwrap();
        fs::write(&layout.server_binary, "new-content").unwrap();
        fs::write(&layout.previous_binary, "old-content").unwrap();

        rollback_swap(&layout).unwrap();

        assert_eq!(
            fs::read_to_string(&layout.server_binary).unwrap(),
            "old-content"
        );
        assert!(!layout.previous_binary.exists());
    }

    #[test]
    fn rollback_swap_removes_a_first_install() {
        let (_root, layout) = fresh_layout();
        fs::create_dir_all(layout.server_binary.parent().unwrap()).unwrap();
        fs::write(&layout.server_binary, "new-content").unwrap();

        rollback_swap(&layout).unwrap();

        assert!(!layout.server_binary.exists());
    }

    #[test]
    fn rollback_swap_with_nothing_installed_is_a_no_op() {
        let (_root, layout) = fresh_layout();
        rollback_swap(&layout).unwrap();
        assert!(!layout.server_binary.exists());
    }

    #[cfg(unix)]
    #[test]
    fn failed_prevalidation_leaves_live_binary_untouched() {
        let (_root, layout) = fresh_layout();
        fs::create_dir_all(layout.server_binary.parent().unwrap()).unwrap();
        fs::write(&layout.server_binary, "old-content").unwrap();

        let err = install(artifact_with(BAD_BINARY), &layout, true).unwrap_err();

        assert!(matches!(err, UpdateError::InstallValidationFailed(_)));
        assert_eq!(
            fs::read_to_string(&layout.server_binary).unwrap(),
            "old-content"
        );
        assert!(!layout.staged_binary.exists());
        assert!(!layout.previous_binary.exists());
    }

    #[cfg(unix)]
    #[test]
    fn text_file_fails_validation() {
        let (_root, layout) = fresh_layout();

        let err = install(artifact_with("this is not an executable"), &layout, false).unwrap_err();

        assert!(matches!(err, UpdateError::InstallValidationFailed(_)));
        assert!(!layout.server_binary.exists());
        assert!(!layout.staged_binary.exists());
    }

    #[cfg(unix)]
    #[test]
    fn postvalidation_failure_rolls_back_previous() {
        let (_root, layout) = fresh_layout();
        fs::create_dir_all(layout.server_binary.parent().unwrap()).unwrap();
        fs::write(&layout.server_binary, "old-content").unwrap();

        let err = install(artifact_with(STAGED_ONLY_BINARY), &layout, true).unwrap_err();

        assert!(matches!(err, UpdateError::InstallValidationFailed(_)));
        assert_eq!(
            fs::read_to_string(&layout.server_binary).unwrap(),
            "old-content"
        );
        assert!(!layout.staged_binary.exists());
        assert!(!layout.previous_binary.exists());
    }

    #[cfg(unix)]
    #[test]
    fn postvalidation_failure_without_rollback_removes_binary() {
        let (_root, layout) = fresh_layout();

        let err = install(artifact_with(STAGED_ONLY_BINARY), &layout, false).unwrap_err();

        assert!(matches!(err, UpdateError::InstallValidationFailed(_)));
        assert!(!layout.server_binary.exists());
        assert!(!layout.staged_binary.exists());
    }

    #[cfg(unix)]
    #[test]
    fn install_consumes_staging_dir() {
        let (_root, layout) = fresh_layout();
        let artifact = artifact_with(GOOD_BINARY);
        let staging = artifact.binary_path().parent().unwrap().to_path_buf();

        install(artifact, &layout, false).unwrap();

        assert!(!staging.exists());
    }

    #[test]
    fn move_into_works_within_a_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src-file");
        let dest = dir.path().join("dest-file");
        fs::write(&src, "payload").unwrap();

        move_into(&src, &dest).unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read_to_string(&dest).unwrap(), "payload");
    }
}
