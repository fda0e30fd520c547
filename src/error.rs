//! Error types for the updater.

/// Top-level error type for the update manager.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// Release index could not be queried (network failure, HTTP error,
    /// or a malformed index document).
    #[error("release source unreachable: {0}")]
    SourceUnreachable(String),

    /// The channel has releases, but none carries an artifact for this
    /// platform.
    #[error("no release for platform {0}")]
    NoReleaseForPlatform(String),

    /// Artifact download started but did not complete.
    #[error("transfer failed: {0}")]
    TransferFailure(String),

    /// Downloaded artifact does not match its published checksum.
    #[error("integrity failure: expected sha256:{expected}, got sha256:{actual}")]
    IntegrityFailure {
        /// Checksum published by the release index.
        expected: String,
        /// Checksum computed over the downloaded bytes.
        actual: String,
    },

    /// Persisted version record is unreadable or malformed.
    #[error("version store corrupt: {0}")]
    StoreCorrupt(String),

    /// Installed binary failed its post-install health check.
    #[error("install validation failed: {0}")]
    InstallValidationFailed(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// External component installation error.
    #[error("component error: {0}")]
    Component(String),

    /// Scheduler coordination error (channel closed, task panicked).
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Operation cancelled by shutdown.
    #[error("operation cancelled")]
    Cancelled,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, UpdateError>;
