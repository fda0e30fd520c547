//! Standard-library source component provisioning.
//!
//! `quill-analyzer` resolves standard-library sources through the `quillup`
//! toolchain manager, not through this crate's release artifacts. Adding the
//! `stdlib-src` component is idempotent on quillup's side, so the scheduler
//! runs it once at startup. Failure leaves the server analyzing user code
//! without stdlib sources, which is degraded but workable, so callers log
//! the returned error instead of aborting.

use std::path::PathBuf;

use tracing::{debug, info};

use crate::config::ComponentConfig;
use crate::error::{Result, UpdateError};

/// Ensure the `stdlib-src` component is installed.
///
/// Respects `ensure_stdlib = false` by doing nothing. Resolves `quillup`
/// from the configured path or the system `PATH`.
///
/// # Errors
///
/// `Component` when quillup cannot be found, cannot be run, or exits
/// nonzero.
pub fn ensure_stdlib_component(config: &ComponentConfig) -> Result<()> {
    if !config.ensure_stdlib {
        debug!("stdlib component provisioning disabled");
        return Ok(());
    }

    let quillup = resolve_quillup(config)?;
    let output = std::process::Command::new(&quillup)
        .args(["component", "add", "stdlib-src"])
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .output()
        .map_err(|e| {
            UpdateError::Component(format!("cannot run {}: {e}", quillup.display()))
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(UpdateError::Component(format!(
            "quillup component add stdlib-src failed (exit code {:?}): {}",
            output.status.code(),
            stderr.trim()
        )));
    }

    info!("stdlib source component present");
    Ok(())
}

/// Platform-specific quillup binary filename.
fn quillup_binary_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "quillup.exe"
    } else {
        "quillup"
    }
}

/// Resolve the quillup binary: configured path first, then the system PATH
/// via `which` (Unix) or `where` (Windows).
fn resolve_quillup(config: &ComponentConfig) -> Result<PathBuf> {
    if let Some(path) = &config.quillup_path {
        if path.is_file() {
            return Ok(path.clone());
        }
        return Err(UpdateError::Component(format!(
            "configured quillup path {} does not exist",
            path.display()
        )));
    }

    find_quillup_in_path().ok_or_else(|| {
        UpdateError::Component("quillup not found in PATH; cannot provision stdlib-src".to_owned())
    })
}

fn find_quillup_in_path() -> Option<PathBuf> {
    let cmd = if cfg!(target_os = "windows") {
        "where"
    } else {
        "which"
    };

    let output = std::process::Command::new(cmd)
        .arg(quillup_binary_name())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::null())
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let path_str = stdout.lines().next()?.trim();
    if path_str.is_empty() {
        return None;
    }

    Some(PathBuf::from(path_str))
}
