//! Centralized filesystem paths for the updater.
//!
//! Single source of truth for every path the crate touches. Uses the
//! [`dirs`] crate for platform-appropriate resolution, which is
//! sandbox-transparent on macOS.
//!
//! # Directory Layout
//!
//! | Purpose | macOS | Linux |
//! |---------|-------|-------|
//! | Config + version state | `~/Library/Application Support/quill-updater/` | `~/.config/quill-updater/` |
//! | Managed server binary | `~/Library/Application Support/quill-updater/server/` | `~/.local/share/quill-updater/server/` |
//! | Download staging | `~/Library/Caches/quill-updater/` | `~/.cache/quill-updater/` |
//!
//! # Environment Overrides
//!
//! All roots can be overridden for testing or custom deployments:
//! - `QUILL_UPDATER_CONFIG_DIR` — overrides [`config_dir`]
//! - `QUILL_UPDATER_DATA_DIR` — overrides [`data_dir`]
//! - `QUILL_UPDATER_CACHE_DIR` — overrides [`cache_dir`]
//! - `QUILL_UPDATER_INSTALL_DIR` — overrides [`install_dir`]

use std::path::{Path, PathBuf};

/// Config root directory (`config.toml`, `state.json`).
///
/// Resolves to `dirs::config_dir()/quill-updater/` by default. Override with
/// the `QUILL_UPDATER_CONFIG_DIR` environment variable.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("QUILL_UPDATER_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("quill-updater"))
        .unwrap_or_else(|| PathBuf::from("/tmp/quill-updater-config"))
}

/// Data root directory (managed server install lives under here).
///
/// Resolves to `dirs::data_dir()/quill-updater/` by default. Override with
/// the `QUILL_UPDATER_DATA_DIR` environment variable.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("QUILL_UPDATER_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("quill-updater"))
        .unwrap_or_else(|| PathBuf::from("/tmp/quill-updater-data"))
}

/// Cache root directory (download staging, expendable).
///
/// Resolves to `dirs::cache_dir()/quill-updater/` by default. Override with
/// the `QUILL_UPDATER_CACHE_DIR` environment variable.
#[must_use]
pub fn cache_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("QUILL_UPDATER_CACHE_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::cache_dir()
        .map(|d| d.join("quill-updater"))
        .unwrap_or_else(|| PathBuf::from("/tmp/quill-updater-cache"))
}

/// Directory holding the managed server binary (`data_dir()/server/`).
///
/// Override with the `QUILL_UPDATER_INSTALL_DIR` environment variable.
#[must_use]
pub fn install_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("QUILL_UPDATER_INSTALL_DIR") {
        return PathBuf::from(override_dir);
    }
    data_dir().join("server")
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Version store file path (`config_dir()/state.json`).
#[must_use]
pub fn state_file() -> PathBuf {
    config_dir().join("state.json")
}

/// Download staging root (`cache_dir()/staging/`).
///
/// Each fetch creates a fresh temp directory under this root and removes it
/// when the artifact is dropped.
#[must_use]
pub fn staging_dir() -> PathBuf {
    cache_dir().join("staging")
}

/// Platform-specific filename of the managed server binary.
#[must_use]
pub fn server_binary_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "quill-analyzer.exe"
    } else {
        "quill-analyzer"
    }
}

/// Every path the install/swap machinery touches, resolved once at startup
/// and immutable for the process lifetime.
#[derive(Debug, Clone)]
pub struct InstallLayout {
    /// Live server binary path. The one path readers contend on.
    pub server_binary: PathBuf,
    /// Retained previous binary, used for rollback after a failed install.
    pub previous_binary: PathBuf,
    /// Sibling the installer stages into before the atomic swap. Lives in
    /// the same directory as the live binary so the final rename never
    /// crosses devices.
    pub staged_binary: PathBuf,
    /// Version store file.
    pub state_file: PathBuf,
    /// Parent directory for per-fetch staging temp dirs.
    pub staging_dir: PathBuf,
}

impl InstallLayout {
    fn in_install_dir(install: &Path, state_file: PathBuf, staging_dir: PathBuf) -> Self {
        let name = server_binary_name();
        Self {
            server_binary: install.join(name),
            previous_binary: install.join(format!("{name}.prev")),
            staged_binary: install.join(format!("{name}.staged")),
            state_file,
            staging_dir,
        }
    }

    /// Resolve the layout from the platform directories (honoring env
    /// overrides).
    #[must_use]
    pub fn resolve() -> Self {
        Self::in_install_dir(&install_dir(), state_file(), staging_dir())
    }

    /// Lay out everything under a single root. Used by tests to confine the
    /// whole install to a temp directory.
    #[must_use]
    pub fn under_root(root: &Path) -> Self {
        Self::in_install_dir(
            &root.join("server"),
            root.join("state.json"),
            root.join("staging"),
        )
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use std::sync::Mutex;

    use super::*;

    /// Serializes every test that reads or writes the override variables,
    /// since the test harness runs this module's tests in parallel.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn config_dir_is_nonempty() {
        assert!(!config_dir().as_os_str().is_empty());
    }

    #[test]
    fn data_dir_contains_crate_name() {
        let _guard = ENV_LOCK.lock().unwrap();
        let s = data_dir().to_string_lossy().to_string();
        assert!(s.contains("quill-updater"), "data_dir: {s}");
    }

    #[test]
    fn config_file_ends_with_config_toml() {
        let s = config_file().to_string_lossy().to_string();
        assert!(s.ends_with("config.toml"), "config_file: {s}");
    }

    #[test]
    fn state_file_ends_with_state_json() {
        let s = state_file().to_string_lossy().to_string();
        assert!(s.ends_with("state.json"), "state_file: {s}");
    }

    #[test]
    fn staging_dir_is_subpath_of_cache_dir() {
        let staging = staging_dir();
        let cache = cache_dir();
        assert!(
            staging.starts_with(&cache),
            "staging_dir ({}) should start with cache_dir ({})",
            staging.display(),
            cache.display()
        );
    }

    #[test]
    fn server_binary_name_matches_platform() {
        let name = server_binary_name();
        if cfg!(target_os = "windows") {
            assert_eq!(name, "quill-analyzer.exe");
        } else {
            assert_eq!(name, "quill-analyzer");
        }
    }

    #[test]
    fn install_dir_override_via_env() {
        let _guard = ENV_LOCK.lock().unwrap();
        let key = "QUILL_UPDATER_INSTALL_DIR";
        let original = std::env::var_os(key);

        // SAFETY: ENV_LOCK keeps other tests from touching the environment.
        unsafe { std::env::set_var(key, "/custom/install") };
        let result = install_dir();
        assert_eq!(result, PathBuf::from("/custom/install"));

        // Restore.
        match original {
            Some(val) => unsafe { std::env::set_var(key, val) },
            None => unsafe { std::env::remove_var(key) },
        }
    }

    #[test]
    fn data_dir_override_via_env() {
        let _guard = ENV_LOCK.lock().unwrap();
        let key = "QUILL_UPDATER_DATA_DIR";
        let original = std::env::var_os(key);

        // SAFETY: ENV_LOCK keeps other tests from touching the environment.
        unsafe { std::env::set_var(key, "/custom/data") };
        let result = data_dir();
        assert_eq!(result, PathBuf::from("/custom/data"));

        match original {
            Some(val) => unsafe { std::env::set_var(key, val) },
            None => unsafe { std::env::remove_var(key) },
        }
    }

    #[test]
    fn resolved_layout_binaries_share_a_directory() {
        let layout = InstallLayout::resolve();
        assert_eq!(
            layout.server_binary.parent(),
            layout.previous_binary.parent()
        );
        assert_eq!(layout.server_binary.parent(), layout.staged_binary.parent());
    }

    #[test]
    fn layout_under_root_confines_every_path() {
        let root = PathBuf::from("/layout-test-root");
        let layout = InstallLayout::under_root(&root);
        assert!(layout.server_binary.starts_with(&root));
        assert!(layout.previous_binary.starts_with(&root));
        assert!(layout.staged_binary.starts_with(&root));
        assert!(layout.state_file.starts_with(&root));
        assert!(layout.staging_dir.starts_with(&root));
    }

    #[test]
    fn swap_siblings_carry_their_suffixes() {
        let layout = InstallLayout::under_root(Path::new("/r"));
        let prev = layout.previous_binary.to_string_lossy().to_string();
        let staged = layout.staged_binary.to_string_lossy().to_string();
        assert!(prev.ends_with(".prev"), "previous_binary: {prev}");
        assert!(staged.ends_with(".staged"), "staged_binary: {staged}");
    }
}
