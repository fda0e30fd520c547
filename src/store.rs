//! Durable version store.
//!
//! Persists which version is installed, when the last check ran, which
//! channel was active, and any release the user dismissed. The state file is
//! JSON, written via write-temp-then-rename so a concurrent reader never
//! observes a torn record. Every mutator persists before returning: once
//! `commit` returns, the record survives a process restart.

use crate::channel::Channel;
use crate::error::{Result, UpdateError};
use crate::version::{VersionId, VersionRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct StoreState {
    /// Currently installed version, if any install has completed.
    current: Option<VersionRecord>,
    /// Channel the store last acted for.
    channel: Channel,
    /// When the release index was last successfully consulted.
    last_checked_at: Option<DateTime<Utc>>,
    /// Release version the user declined; suppresses re-prompting until a
    /// strictly newer release appears.
    dismissed: Option<VersionId>,
}

/// On-disk record of the installed version.
#[derive(Debug)]
pub struct VersionStore {
    path: PathBuf,
    state: StoreState,
}

impl VersionStore {
    /// Load the store from `path`.
    ///
    /// A missing file is a fresh install and yields an empty store. An
    /// unreadable or unparseable file is *not* silently discarded.
    ///
    /// # Errors
    ///
    /// `StoreCorrupt` when the file exists but cannot be parsed; callers
    /// recover via [`VersionStore::recover`] and force a re-check.
    pub fn load(path: &Path) -> Result<Self> {
        let state = match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                UpdateError::StoreCorrupt(format!("{}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => {
                return Err(UpdateError::StoreCorrupt(format!("{}: {e}", path.display())));
            }
        };
        Ok(Self {
            path: path.to_owned(),
            state,
        })
    }

    /// Start over with an empty store at `path` after a corrupt load.
    ///
    /// The installed version is then unknown until the next successful
    /// install commits a fresh record.
    #[must_use]
    pub fn recover(path: &Path) -> Self {
        Self {
            path: path.to_owned(),
            state: StoreState::default(),
        }
    }

    /// Currently installed version record, if one has been committed.
    pub fn current(&self) -> Option<&VersionRecord> {
        self.state.current.as_ref()
    }

    /// Channel the store last acted for.
    pub fn channel(&self) -> Channel {
        self.state.channel
    }

    /// When the release index was last successfully consulted.
    pub fn last_checked_at(&self) -> Option<DateTime<Utc>> {
        self.state.last_checked_at
    }

    /// Release the user dismissed, if any.
    pub fn dismissed(&self) -> Option<&VersionId> {
        self.state.dismissed.as_ref()
    }

    /// Replace the current record durably. Returns only after the state file
    /// is fully written and renamed into place.
    ///
    /// # Errors
    ///
    /// Returns an error if the state file cannot be written.
    pub fn commit(&mut self, record: VersionRecord) -> Result<()> {
        self.state.channel = record.channel;
        self.state.current = Some(record);
        self.persist()
    }

    /// Record that a check ran just now on `channel`.
    ///
    /// # Errors
    ///
    /// Returns an error if the state file cannot be written.
    pub fn mark_checked(&mut self, channel: Channel) -> Result<()> {
        self.state.channel = channel;
        self.state.last_checked_at = Some(Utc::now());
        self.persist()
    }

    /// Remember that the user declined `version`.
    ///
    /// # Errors
    ///
    /// Returns an error if the state file cannot be written.
    pub fn dismiss(&mut self, version: VersionId) -> Result<()> {
        self.state.dismissed = Some(version);
        self.persist()
    }

    /// Forget any dismissed release.
    ///
    /// # Errors
    ///
    /// Returns an error if the state file cannot be written.
    pub fn clear_dismissed(&mut self) -> Result<()> {
        if self.state.dismissed.is_none() {
            return Ok(());
        }
        self.state.dismissed = None;
        self.persist()
    }

    /// Write the state file atomically: serialize to a sibling temp file,
    /// then rename over the real path.
    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json =
            serde_json::to_string_pretty(&self.state).map_err(std::io::Error::other)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
