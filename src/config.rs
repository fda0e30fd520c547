//! Configuration types for the update manager.

use crate::channel::Channel;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level updater configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Release channel to follow.
    pub channel: Channel,
    /// Ask the user before downloading an update (default) vs. installing
    /// silently.
    pub ask_before_download: bool,
    /// Override for the automatic check interval, in seconds.
    ///
    /// `None` uses the channel default (24 h nightly, 7 d stable). `Some(0)`
    /// disables the timer entirely; checks then happen only on demand.
    pub check_interval_override_secs: Option<u64>,
    /// How long a consent prompt waits for an answer before the offer is
    /// withdrawn and deferred to the next cycle.
    #[serde(default = "default_consent_timeout_secs")]
    pub consent_timeout_secs: u64,
    /// Keep the replaced binary next to the live one for rollback.
    #[serde(default = "default_keep_previous")]
    pub keep_previous: bool,
    /// Path to a user-managed server binary.
    ///
    /// When set, the updater never touches the install: checks are skipped
    /// and the status surface reports the override.
    pub server_path: Option<PathBuf>,
    /// Release index endpoint settings.
    pub index: IndexConfig,
    /// External toolchain component settings.
    pub component: ComponentConfig,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            channel: Channel::default(),
            ask_before_download: true,
            check_interval_override_secs: None,
            consent_timeout_secs: default_consent_timeout_secs(),
            keep_previous: default_keep_previous(),
            server_path: None,
            index: IndexConfig::default(),
            component: ComponentConfig::default(),
        }
    }
}

/// Remote release index settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// API base URL. Overridden in tests to point at a local mock server.
    pub base_url: String,
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub repo: String,
    /// HTTP connect/read timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.github.com".to_owned(),
            owner: "quill-lang".to_owned(),
            repo: "quill-analyzer".to_owned(),
            timeout_secs: 30,
        }
    }
}

/// Settings for the external `quillup` component ensure call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentConfig {
    /// Run `quillup component add stdlib-src` once at startup.
    pub ensure_stdlib: bool,
    /// Explicit path to the `quillup` binary (`None` resolves via `PATH`).
    pub quillup_path: Option<PathBuf>,
}

impl Default for ComponentConfig {
    fn default() -> Self {
        Self {
            ensure_stdlib: true,
            quillup_path: None,
        }
    }
}

fn default_consent_timeout_secs() -> u64 {
    300
}

fn default_keep_previous() -> bool {
    true
}

impl UpdaterConfig {
    /// Interval between automatic checks, or `None` when the timer is
    /// disabled (`check_interval_override_secs = 0`).
    pub fn check_interval(&self) -> Option<Duration> {
        match self.check_interval_override_secs {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => Some(self.channel.default_check_interval()),
        }
    }

    /// Bounded wait applied to consent prompts.
    pub fn consent_timeout(&self) -> Duration {
        Duration::from_secs(self.consent_timeout_secs)
    }

    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::UpdateError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::UpdateError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path (`config_dir()/config.toml`).
    pub fn default_config_path() -> PathBuf {
        paths::config_file()
    }
}
