//! Version identifiers and the installed-version record.
//!
//! Stable releases carry semver tags (`v1.2.0`) and order by semantic
//! version; nightly builds carry their publication date (`2026-08-25`) and
//! order chronologically. The two forms never compare against each other:
//! ordering across channels is undefined and the scheduler treats a channel
//! mismatch as "always a candidate" before any version comparison happens.

use crate::channel::Channel;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Channel-specific version token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionId {
    /// Stable release version (`1.2.0`).
    Semver(semver::Version),
    /// Nightly build date (`2026-08-25`).
    Nightly(NaiveDate),
}

impl VersionId {
    /// Parse a stable release tag (`"v1.2.0"` or `"1.2.0"`).
    pub fn parse_stable_tag(tag: &str) -> Option<Self> {
        let bare = tag.trim().strip_prefix('v').unwrap_or(tag.trim());
        semver::Version::parse(bare).ok().map(Self::Semver)
    }

    /// Derive a nightly version from an RFC 3339 publication timestamp
    /// (`"2026-08-25T02:14:00Z"`).
    pub fn nightly_from_published_at(timestamp: &str) -> Option<Self> {
        DateTime::parse_from_rfc3339(timestamp.trim())
            .ok()
            .map(|dt| Self::Nightly(dt.date_naive()))
    }

    /// The channel this version shape belongs to.
    pub fn channel(&self) -> Channel {
        match self {
            Self::Semver(_) => Channel::Stable,
            Self::Nightly(_) => Channel::Nightly,
        }
    }

    /// Returns `true` if `self` is strictly newer than `other` on the same
    /// channel. Versions of different shapes never order; that case returns
    /// `false` (callers gate on channel before comparing).
    pub fn is_newer_than(&self, other: &Self) -> bool {
        matches!(self.partial_cmp(other), Some(Ordering::Greater))
    }
}

impl PartialOrd for VersionId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Semver(a), Self::Semver(b)) => Some(a.cmp(b)),
            (Self::Nightly(a), Self::Nightly(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl std::fmt::Display for VersionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Semver(v) => write!(f, "{v}"),
            Self::Nightly(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

impl std::str::FromStr for VersionId {
    type Err = String;

    /// Parse the persisted string form. The two shapes are syntactically
    /// disjoint, so the input self-describes its channel.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
            return Ok(Self::Nightly(date));
        }
        Self::parse_stable_tag(trimmed).ok_or_else(|| format!("unparseable version: {trimmed}"))
    }
}

impl Serialize for VersionId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// The currently-installed version, as persisted by the version store.
///
/// Replaced wholesale on every successful install; never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    /// Installed version token.
    pub version: VersionId,
    /// Channel the version was installed from.
    pub channel: Channel,
    /// When the install completed.
    pub installed_at: DateTime<Utc>,
}

impl VersionRecord {
    /// Build a record for a version installed right now.
    pub fn installed_now(version: VersionId, channel: Channel) -> Self {
        Self {
            version,
            channel,
            installed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn stable(s: &str) -> VersionId {
        VersionId::parse_stable_tag(s).unwrap()
    }

    fn nightly(s: &str) -> VersionId {
        VersionId::Nightly(NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap())
    }

    #[test]
    fn stable_tag_strips_v_prefix() {
        assert_eq!(stable("v1.2.0").to_string(), "1.2.0");
        assert_eq!(stable("1.2.0").to_string(), "1.2.0");
    }

    #[test]
    fn stable_tag_rejects_garbage() {
        assert!(VersionId::parse_stable_tag("nightly").is_none());
        assert!(VersionId::parse_stable_tag("").is_none());
        assert!(VersionId::parse_stable_tag("v1.2").is_none());
    }

    #[test]
    fn nightly_from_published_at_takes_date_part() {
        let id = VersionId::nightly_from_published_at("2026-08-25T02:14:00Z").unwrap();
        assert_eq!(id.to_string(), "2026-08-25");
        assert_eq!(id.channel(), Channel::Nightly);
    }

    #[test]
    fn nightly_from_published_at_rejects_bare_date() {
        // The index publishes full RFC 3339 timestamps; a bare date is malformed.
        assert!(VersionId::nightly_from_published_at("2026-08-25").is_none());
    }

    #[test]
    fn semver_ordering_is_numeric_not_lexical() {
        assert!(stable("1.10.0").is_newer_than(&stable("1.9.0")));
        assert!(stable("2.0.0").is_newer_than(&stable("1.99.99")));
        assert!(!stable("1.2.0").is_newer_than(&stable("1.2.0")));
    }

    #[test]
    fn nightly_ordering_is_chronological() {
        assert!(nightly("2026-08-25").is_newer_than(&nightly("2026-08-24")));
        assert!(!nightly("2026-08-24").is_newer_than(&nightly("2026-08-25")));
        assert!(!nightly("2026-08-25").is_newer_than(&nightly("2026-08-25")));
    }

    #[test]
    fn cross_channel_versions_never_order() {
        let s = stable("1.2.0");
        let n = nightly("2026-08-25");
        assert!(s.partial_cmp(&n).is_none());
        assert!(!s.is_newer_than(&n));
        assert!(!n.is_newer_than(&s));
    }

    #[test]
    fn string_form_round_trips() {
        for raw in ["1.2.0", "2026-08-25", "0.1.0-beta.2"] {
            let id: VersionId = raw.parse().unwrap();
            assert_eq!(id.to_string(), raw);
        }
    }

    #[test]
    fn from_str_rejects_garbage() {
        assert!("not-a-version".parse::<VersionId>().is_err());
        assert!("".parse::<VersionId>().is_err());
    }

    #[test]
    fn record_serde_round_trip() {
        let record = VersionRecord::installed_now(stable("1.2.0"), Channel::Stable);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"1.2.0\""));
        assert!(json.contains("\"stable\""));

        let restored: VersionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, record);
    }

    #[test]
    fn record_rejects_malformed_version() {
        let json = r#"{"version":"???","channel":"stable","installed_at":"2026-08-25T00:00:00Z"}"#;
        assert!(serde_json::from_str::<VersionRecord>(json).is_err());
    }
}
