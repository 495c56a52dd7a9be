//! Engine configuration (layered: code > env > config file).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{EngineError, Result};

/// Default tool-call rounds per turn.
pub const DEFAULT_MAX_ROUNDS: usize = 10;
/// Pending approvals and tool proposals auto-deny after this window.
pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(600);
/// Compaction fires when the transcript crosses this share of the context window.
pub const DEFAULT_COMPACTION_THRESHOLD: f64 = 0.8;
/// Messages kept verbatim when the rest of the transcript is summarized.
pub const DEFAULT_KEEP_RECENT_MESSAGES: usize = 10;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum tool-call rounds per turn.
    pub max_rounds: usize,
    /// Auto-deny window for pending approvals and tool proposals.
    pub approval_timeout: Duration,
    /// Fraction of the model context window that triggers compaction.
    pub compaction_threshold: f64,
    /// Number of trailing messages left untouched by compaction.
    pub keep_recent_messages: usize,
    /// Provider API keys, keyed by provider name.
    api_keys: HashMap<String, String>,
    /// Provider base URL overrides, keyed by provider name.
    base_urls: HashMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            approval_timeout: DEFAULT_APPROVAL_TIMEOUT,
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
            keep_recent_messages: DEFAULT_KEEP_RECENT_MESSAGES,
            api_keys: HashMap::new(),
            base_urls: HashMap::new(),
        }
    }
}

/// On-disk config file shape (`tycho.toml`).
#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    max_rounds: Option<usize>,
    approval_timeout_secs: Option<u64>,
    compaction_threshold: Option<f64>,
    keep_recent_messages: Option<usize>,
    #[serde(default)]
    api_keys: HashMap<String, String>,
    #[serde(default)]
    base_urls: HashMap<String, String>,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from the environment, layered over the default config file if one
    /// exists in the platform config directory.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error

        let mut config = default_config_path()
            .filter(|path| path.exists())
            .and_then(|path| Self::from_file(&path).ok())
            .unwrap_or_default();

        if let Some(rounds) = env_parse::<usize>("TYCHO_MAX_ROUNDS") {
            config.max_rounds = rounds;
        }
        if let Some(secs) = env_parse::<u64>("TYCHO_APPROVAL_TIMEOUT_SECS") {
            config.approval_timeout = Duration::from_secs(secs);
        }
        if let Some(threshold) = env_parse::<f64>("TYCHO_COMPACTION_THRESHOLD") {
            config.compaction_threshold = threshold;
        }
        if let Some(keep) = env_parse::<usize>("TYCHO_KEEP_RECENT_MESSAGES") {
            config.keep_recent_messages = keep;
        }

        config
    }

    /// Load from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let file: ConfigFile = toml::from_str(&raw)
            .map_err(|err| EngineError::Configuration(format!("{}: {err}", path.display())))?;

        let mut config = Self::default();
        if let Some(rounds) = file.max_rounds {
            config.max_rounds = rounds;
        }
        if let Some(secs) = file.approval_timeout_secs {
            config.approval_timeout = Duration::from_secs(secs);
        }
        if let Some(threshold) = file.compaction_threshold {
            config.compaction_threshold = threshold;
        }
        if let Some(keep) = file.keep_recent_messages {
            config.keep_recent_messages = keep;
        }
        config.api_keys = file.api_keys;
        config.base_urls = file.base_urls;
        Ok(config)
    }

    pub fn set_api_key(&mut self, provider: impl Into<String>, key: impl Into<String>) {
        self.api_keys.insert(provider.into(), key.into());
    }

    /// Resolve an API key: explicit config first, then `<PROVIDER>_API_KEY`.
    pub fn get_api_key(&self, provider: &str) -> Option<String> {
        if let Some(key) = self.api_keys.get(provider) {
            return Some(key.clone());
        }
        let env_var = format!("{}_API_KEY", provider.to_uppercase().replace('-', "_"));
        std::env::var(env_var).ok()
    }

    pub fn set_base_url(&mut self, provider: impl Into<String>, url: impl Into<String>) {
        self.base_urls.insert(provider.into(), url.into());
    }

    pub fn get_base_url(&self, provider: &str) -> Option<String> {
        self.base_urls.get(provider).cloned()
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|v| v.parse().ok())
}

fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "tycho")
        .map(|dirs| dirs.config_dir().join("tycho.toml"))
}
