//! Artifact fetcher.
//!
//! Downloads a release artifact into a staging directory outside the live
//! install path, verifies it against the published checksum, and unpacks the
//! gzip into a ready-to-install binary. The staging directory is a
//! [`tempfile::TempDir`], so every failure path (integrity mismatch, transfer
//! error, cancellation, caller drop) removes partial files without
//! bookkeeping.

use crate::error::{Result, UpdateError};
use crate::paths;
use crate::progress::{FetchProgress, ProgressCallback};
use crate::source::ReleaseDescriptor;
use crate::version::VersionId;
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const USER_AGENT: &str = concat!("quill-updater/", env!("CARGO_PKG_VERSION"));
const CHUNK_SIZE: usize = 65_536;

/// A downloaded, verified, unpacked binary awaiting installation.
///
/// Holds its staging directory alive; dropping the artifact removes the
/// directory and everything in it.
#[derive(Debug)]
pub struct TempArtifact {
    // Held only for its Drop.
    _staging: tempfile::TempDir,
    binary: PathBuf,
    version: VersionId,
}

impl TempArtifact {
    /// Path to the unpacked binary inside the staging directory.
    pub fn binary_path(&self) -> &Path {
        &self.binary
    }

    /// Version the artifact contains.
    pub fn version(&self) -> &VersionId {
        &self.version
    }

    #[cfg(test)]
    pub(crate) fn for_tests(staging: tempfile::TempDir, binary: PathBuf, version: VersionId) -> Self {
        Self {
            _staging: staging,
            binary,
            version,
        }
    }
}

/// Download, verify, and unpack the artifact a descriptor points at.
///
/// Blocking; run under `spawn_blocking`. Cancellation is checked between
/// 64 KiB chunks and discards the partial download.
///
/// # Errors
///
/// `TransferFailure` on network or decompression errors, `IntegrityFailure`
/// when the download does not match the descriptor's checksum, `Cancelled`
/// when `cancel` fires mid-transfer.
pub fn fetch_artifact(
    descriptor: &ReleaseDescriptor,
    staging_root: &Path,
    cancel: &CancellationToken,
    progress: Option<&ProgressCallback>,
) -> Result<TempArtifact> {
    if cancel.is_cancelled() {
        return Err(UpdateError::Cancelled);
    }

    std::fs::create_dir_all(staging_root)?;
    let staging = tempfile::Builder::new()
        .prefix("fetch-")
        .tempdir_in(staging_root)?;

    let packed = staging.path().join("artifact.gz");
    emit(
        progress,
        FetchProgress::Started {
            version: descriptor.version.to_string(),
            total_bytes: descriptor.size,
        },
    );

    info!(
        version = %descriptor.version,
        url = %descriptor.download_url,
        "downloading artifact"
    );
    download_to(descriptor, &packed, cancel, progress)?;
    verify_checksum(&packed, &descriptor.checksum)?;

    let binary = staging.path().join(paths::server_binary_name());
    unpack_gz(&packed, &binary)?;
    debug!(path = %binary.display(), "artifact unpacked");

    emit(
        progress,
        FetchProgress::Finished {
            version: descriptor.version.to_string(),
        },
    );

    Ok(TempArtifact {
        _staging: staging,
        binary,
        version: descriptor.version.clone(),
    })
}

fn emit(progress: Option<&ProgressCallback>, event: FetchProgress) {
    if let Some(callback) = progress {
        callback(event);
    }
}

/// Stream the artifact to `dest`, checking for cancellation between chunks.
fn download_to(
    descriptor: &ReleaseDescriptor,
    dest: &Path,
    cancel: &CancellationToken,
    progress: Option<&ProgressCallback>,
) -> Result<()> {
    let agent = ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(15))
        .timeout_read(Duration::from_secs(300))
        .build();

    let response = agent
        .get(&descriptor.download_url)
        .set("User-Agent", USER_AGENT)
        .call()
        .map_err(|e| UpdateError::TransferFailure(e.to_string()))?;

    let mut reader = response.into_reader();
    let mut file = std::fs::File::create(dest)?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut downloaded: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }
        let n = reader
            .read(&mut buf)
            .map_err(|e| UpdateError::TransferFailure(format!("read failed: {e}")))?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])
            .map_err(|e| UpdateError::TransferFailure(format!("write failed: {e}")))?;
        downloaded += n as u64;
        emit(
            progress,
            FetchProgress::Transferred {
                bytes_downloaded: downloaded,
                total_bytes: descriptor.size,
            },
        );
    }

    file.flush()
        .map_err(|e| UpdateError::TransferFailure(format!("flush failed: {e}")))?;
    Ok(())
}

/// Compare a file's sha256 against the expected lowercase hex digest.
fn verify_checksum(path: &Path, expected: &str) -> Result<()> {
    let actual = sha256_hex(path)?;
    if actual.eq_ignore_ascii_case(expected) {
        debug!(path = %path.display(), "artifact checksum ok");
        Ok(())
    } else {
        Err(UpdateError::IntegrityFailure {
            expected: expected.to_owned(),
            actual,
        })
    }
}

/// Compute the SHA-256 hex digest of a file's contents.
///
/// Reads in 64 KiB chunks to keep memory flat for large artifacts.
fn sha256_hex(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let digest = hasher.finalize();
    Ok(format!("{digest:x}"))
}

/// Decompress a gzip artifact to `dest`.
fn unpack_gz(packed: &Path, dest: &Path) -> Result<()> {
    let file = std::fs::File::open(packed)?;
    let mut decoder = flate2::read::GzDecoder::new(file);
    let mut out = std::fs::File::create(dest)?;
    std::io::copy(&mut decoder, &mut out)
        .map_err(|e| UpdateError::TransferFailure(format!("cannot decompress artifact: {e}")))?;
    Ok(())
}
