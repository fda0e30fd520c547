//! Progress events for artifact downloads.
//!
//! Callback-based reporting that decouples the fetcher from presentation:
//! hosts render these however they like (editor notification, CLI output)
//! without the fetcher knowing about either.

/// Progress events emitted while an artifact downloads.
#[derive(Debug, Clone)]
pub enum FetchProgress {
    /// The download has started.
    Started {
        /// Version being fetched, in display form.
        version: String,
        /// Total size in bytes, if the index published one.
        total_bytes: Option<u64>,
    },

    /// A chunk has been written to the staging file.
    Transferred {
        /// Bytes downloaded so far.
        bytes_downloaded: u64,
        /// Total size in bytes, if known.
        total_bytes: Option<u64>,
    },

    /// The download completed and passed its integrity check.
    Finished {
        /// Version that was fetched, in display form.
        version: String,
    },
}

/// Callback type for receiving fetch progress events.
pub type ProgressCallback = Box<dyn Fn(FetchProgress) + Send + Sync>;
