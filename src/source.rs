//! Remote release index client.
//!
//! Queries a GitHub-releases-shaped API for the latest release on a channel
//! and selects the artifact for the caller's platform. Read-only: a check
//! never mutates anything locally. Responses are cached per channel against
//! their ETag so repeated checks cost a conditional request.

use crate::channel::Channel;
use crate::config::IndexConfig;
use crate::error::{Result, UpdateError};
use crate::version::{VersionId, VersionRecord};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

const USER_AGENT: &str = concat!("quill-updater/", env!("CARGO_PKG_VERSION"));

/// Everything needed to fetch and verify one release artifact.
///
/// Produced by a check, consumed within the same cycle, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseDescriptor {
    /// Version offered by the index.
    pub version: VersionId,
    /// Channel the descriptor was resolved against.
    pub channel: Channel,
    /// Target triple the artifact was built for.
    pub platform_key: String,
    /// Direct artifact download URL.
    pub download_url: String,
    /// Expected sha256 of the artifact bytes, lowercase hex.
    pub checksum: String,
    /// Artifact size in bytes, if published.
    pub size: Option<u64>,
}

impl ReleaseDescriptor {
    /// Whether this release should replace what is currently installed.
    ///
    /// True when nothing is installed, when the installed record belongs to
    /// another channel (channel switches reinstall), or when the release is
    /// strictly newer.
    #[must_use]
    pub fn supersedes(&self, current: Option<&VersionRecord>) -> bool {
        match current {
            None => true,
            Some(record) => {
                record.channel != self.channel || self.version.is_newer_than(&record.version)
            }
        }
    }
}

/// Read-only view of the remote release index.
pub trait ReleaseIndex: Send + Sync {
    /// Latest release on `channel` carrying an artifact for `platform_key`.
    ///
    /// # Errors
    ///
    /// `SourceUnreachable` on network failure or a malformed index document;
    /// `NoReleaseForPlatform` when the release has no artifact for the
    /// platform.
    fn latest(&self, channel: Channel, platform_key: &str) -> Result<ReleaseDescriptor>;
}

/// Target triple for the running host, or `None` on unsupported platforms.
pub fn platform_key() -> Option<&'static str> {
    match (std::env::consts::OS, std::env::consts::ARCH) {
        ("macos", "aarch64") => Some("aarch64-apple-darwin"),
        ("macos", "x86_64") => Some("x86_64-apple-darwin"),
        ("linux", "x86_64") => Some("x86_64-unknown-linux-gnu"),
        ("linux", "aarch64") => Some("aarch64-unknown-linux-gnu"),
        ("windows", "x86_64") => Some("x86_64-pc-windows-msvc"),
        _ => None,
    }
}

/// Artifact filename for a platform (`quill-analyzer-<triple>.gz`).
pub fn asset_name(platform_key: &str) -> String {
    format!("quill-analyzer-{platform_key}.gz")
}

#[derive(Debug, Deserialize)]
struct ReleaseWire {
    tag_name: String,
    published_at: Option<String>,
    #[serde(default)]
    assets: Vec<AssetWire>,
}

#[derive(Debug, Deserialize)]
struct AssetWire {
    name: String,
    browser_download_url: String,
    size: Option<u64>,
    /// GitHub publishes asset digests as `"sha256:<hex>"`.
    digest: Option<String>,
}

/// GitHub releases client with a per-channel conditional-request cache.
pub struct HttpReleaseIndex {
    agent: ureq::Agent,
    base_url: String,
    owner: String,
    repo: String,
    /// Cached `(etag, descriptor)` per channel; a 304 replays the descriptor.
    etags: Mutex<HashMap<Channel, (String, ReleaseDescriptor)>>,
}

impl HttpReleaseIndex {
    /// Build a client from index settings.
    pub fn new(config: &IndexConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .timeout_read(Duration::from_secs(config.timeout_secs))
            .timeout_write(Duration::from_secs(config.timeout_secs))
            .build();
        Self {
            agent,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            owner: config.owner.clone(),
            repo: config.repo.clone(),
            etags: Mutex::new(HashMap::new()),
        }
    }

    fn release_url(&self, channel: Channel) -> String {
        let Self {
            base_url,
            owner,
            repo,
            ..
        } = self;
        match channel {
            Channel::Stable => format!("{base_url}/repos/{owner}/{repo}/releases/latest"),
            Channel::Nightly => format!("{base_url}/repos/{owner}/{repo}/releases/tags/nightly"),
        }
    }

    fn cached(&self, channel: Channel) -> Option<(String, ReleaseDescriptor)> {
        self.etags
            .lock()
            .ok()
            .and_then(|guard| guard.get(&channel).cloned())
    }

    fn remember(&self, channel: Channel, etag: String, descriptor: ReleaseDescriptor) {
        if let Ok(mut guard) = self.etags.lock() {
            guard.insert(channel, (etag, descriptor));
        }
    }
}

impl ReleaseIndex for HttpReleaseIndex {
    fn latest(&self, channel: Channel, platform_key: &str) -> Result<ReleaseDescriptor> {
        let url = self.release_url(channel);
        let cached = self.cached(channel);

        let mut request = self
            .agent
            .get(&url)
            .set("User-Agent", USER_AGENT)
            .set("Accept", "application/vnd.github+json");
        if let Some((etag, _)) = &cached {
            request = request.set("If-None-Match", etag);
        }

        let response = match request.call() {
            Ok(resp) => resp,
            Err(ureq::Error::Status(code, _)) => {
                return Err(UpdateError::SourceUnreachable(format!(
                    "index returned HTTP {code} for {url}"
                )));
            }
            Err(e) => {
                return Err(UpdateError::SourceUnreachable(e.to_string()));
            }
        };

        // ureq surfaces only 4xx/5xx as Err; a 304 lands here.
        if response.status() == 304 {
            return cached.map(|(_, descriptor)| descriptor).ok_or_else(|| {
                UpdateError::SourceUnreachable("304 response without a cached descriptor".to_owned())
            });
        }

        let etag = response.header("ETag").map(str::to_owned);
        let body = response
            .into_string()
            .map_err(|e| UpdateError::SourceUnreachable(e.to_string()))?;
        let wire: ReleaseWire = serde_json::from_str(&body)
            .map_err(|e| UpdateError::SourceUnreachable(format!("malformed index body: {e}")))?;

        let descriptor = descriptor_from_wire(&wire, channel, platform_key)?;
        if let Some(etag) = etag {
            self.remember(channel, etag, descriptor.clone());
        }
        Ok(descriptor)
    }
}

/// Resolve a wire release into a descriptor for one platform.
///
/// A release the index serves but we cannot interpret (bad tag, bad digest)
/// is treated as the index being temporarily broken, never a crash.
fn descriptor_from_wire(
    wire: &ReleaseWire,
    channel: Channel,
    platform_key: &str,
) -> Result<ReleaseDescriptor> {
    let version = match channel {
        Channel::Stable => VersionId::parse_stable_tag(&wire.tag_name).ok_or_else(|| {
            UpdateError::SourceUnreachable(format!("unparseable release tag: {}", wire.tag_name))
        })?,
        Channel::Nightly => {
            let published = wire.published_at.as_deref().ok_or_else(|| {
                UpdateError::SourceUnreachable("nightly release missing published_at".to_owned())
            })?;
            VersionId::nightly_from_published_at(published).ok_or_else(|| {
                UpdateError::SourceUnreachable(format!(
                    "unparseable nightly publication time: {published}"
                ))
            })?
        }
    };

    let wanted = asset_name(platform_key);
    let asset = wire
        .assets
        .iter()
        .find(|a| a.name == wanted)
        .ok_or_else(|| UpdateError::NoReleaseForPlatform(platform_key.to_owned()))?;

    let digest = asset.digest.as_deref().ok_or_else(|| {
        UpdateError::SourceUnreachable(format!("asset {wanted} has no published digest"))
    })?;
    let checksum = digest
        .strip_prefix("sha256:")
        .filter(|hex| hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()))
        .ok_or_else(|| {
            UpdateError::SourceUnreachable(format!("asset {wanted} has malformed digest: {digest}"))
        })?
        .to_ascii_lowercase();

    Ok(ReleaseDescriptor {
        version,
        channel,
        platform_key: platform_key.to_owned(),
        download_url: asset.browser_download_url.clone(),
        checksum,
        size: asset.size,
    })
}
