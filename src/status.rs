//! Read side of the scheduler's state.
//!
//! The scheduler publishes a fresh [`StatusSnapshot`] on every phase
//! transition. Any number of frontends can hold a [`StatusReporter`] and
//! either poll [`StatusReporter::snapshot`] or await
//! [`StatusReporter::changed`]; neither touches the scheduler itself.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::channel::Channel;
use crate::version::{VersionId, VersionRecord};

/// Where the scheduler currently is in its cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CyclePhase {
    /// Between cycles; nothing in flight.
    #[default]
    Idle,
    /// Querying the release index.
    Checking,
    /// An update prompt is in front of the user.
    AwaitingConsent,
    /// Fetching, verifying, or swapping a binary.
    Installing,
}

impl CyclePhase {
    /// Stable string form, used in logs and CLI output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Checking => "checking",
            Self::AwaitingConsent => "awaiting-consent",
            Self::Installing => "installing",
        }
    }
}

impl std::fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a frontend needs to render updater state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSnapshot {
    /// Installed version record, if any.
    pub current: Option<VersionRecord>,
    /// Channel the scheduler is tracking.
    pub channel: Channel,
    /// Scheduler phase.
    pub phase: CyclePhase,
    /// When the release index was last queried, surviving restarts.
    pub last_checked_at: Option<DateTime<Utc>>,
    /// Error that ended the most recent cycle, when it failed.
    pub last_error: Option<String>,
    /// Version offered in the outstanding prompt, while one is open.
    pub pending_prompt: Option<VersionId>,
    /// Externally managed server binary, when configured. The scheduler
    /// skips update cycles while this is set.
    pub server_path_override: Option<PathBuf>,
}

/// Handle for observing scheduler status.
///
/// Cloneable; each clone tracks what it has seen independently.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    rx: watch::Receiver<StatusSnapshot>,
}

impl StatusReporter {
    pub(crate) fn new(rx: watch::Receiver<StatusSnapshot>) -> Self {
        Self { rx }
    }

    /// Latest published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        self.rx.borrow().clone()
    }

    /// Wait for the next snapshot this reporter has not yet seen.
    ///
    /// Returns `None` once the scheduler has shut down.
    pub async fn changed(&mut self) -> Option<StatusSnapshot> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

/// Build the publishing pair the scheduler uses.
pub(crate) fn channel(initial: StatusSnapshot) -> (watch::Sender<StatusSnapshot>, StatusReporter) {
    let (tx, rx) = watch::channel(initial);
    (tx, StatusReporter::new(rx))
}
