//! Update channels.
//!
//! A channel is an ordered stream of releases. The two channels are fully
//! independent: versions are never compared across channels, and switching
//! channels changes which stream the next check consults.

use crate::error::UpdateError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Release stream the updater follows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Tagged releases, ordered by semantic version (default).
    #[default]
    Stable,
    /// Rolling pre-release builds, ordered by publication date.
    Nightly,
}

impl Channel {
    /// Default interval between automatic checks on this channel.
    ///
    /// Nightly builds appear daily, so the nightly channel checks every
    /// 24 hours. Stable releases are far less frequent and check weekly.
    pub fn default_check_interval(self) -> Duration {
        match self {
            Self::Stable => Duration::from_secs(7 * 24 * 3600),
            Self::Nightly => Duration::from_secs(24 * 3600),
        }
    }

    /// Stable string form, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Nightly => "nightly",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Channel {
    type Err = UpdateError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stable" => Ok(Self::Stable),
            "nightly" => Ok(Self::Nightly),
            other => Err(UpdateError::Config(format!("unknown channel: {other}"))),
        }
    }
}
