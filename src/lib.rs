//! Quill updater: keeps the `quill-analyzer` language server current.
//!
//! The crate manages one locally installed server binary across the
//! `stable` and `nightly` release channels:
//! Release index → candidate comparison → consent → fetch → atomic swap
//!
//! # Architecture
//!
//! A single background task (the [`UpdateScheduler`]) owns all mutable
//! updater state and talks to the rest of the world over channels:
//! - **Release index**: queries the remote release endpoint per channel
//! - **Version store**: persists which version is installed, JSON on disk
//! - **Fetcher**: streams the artifact to a temp dir and verifies sha256
//! - **Installer**: validates and atomically swaps the live binary,
//!   keeping a `.prev` copy for rollback
//! - **Consent**: asks the user before downloading when configured to,
//!   over an async prompt channel
//! - **Status**: publishes a snapshot after every phase transition via a
//!   watch channel
//!
//! The host editor integration supplies an [`UpdaterConfig`], consumes
//! [`UpdatePrompt`]s, and renders [`StatusSnapshot`]s; nothing in here
//! depends on a specific editor.

pub mod channel;
pub mod component;
pub mod config;
pub mod consent;
pub mod error;
pub mod fetch;
pub mod install;
pub mod paths;
pub mod progress;
pub mod scheduler;
pub mod source;
pub mod status;
pub mod store;
pub mod version;

pub use channel::Channel;
pub use config::UpdaterConfig;
pub use consent::{PromptResponse, UpdatePrompt};
pub use error::{Result, UpdateError};
pub use progress::{FetchProgress, ProgressCallback};
pub use scheduler::{SchedulerHandle, UpdateScheduler};
pub use status::{StatusReporter, StatusSnapshot};
