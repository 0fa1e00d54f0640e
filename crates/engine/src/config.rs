//! Engine configuration.
//!
//! Loaded from TOML; every field has a default, so an empty file is a valid
//! configuration.
//!
//! # Example
//!
//! ```toml
//! endpoint = "http://127.0.0.1:9890"
//!
//! [lock]
//! poll_interval_ms = 100
//! max_backoff_ms = 2000
//! timeout_secs = 600
//!
//! [reconcile]
//! interval_secs = 300
//! initial_delay_secs = 30
//!
//! [grant]
//! authority = "http"
//! endpoint = "http://nfvo.example/grant/v1"
//! auth_token = "..."
//!
//! [notification]
//! verbosity = "SHORT"
//! callback_uris = ["http://subscriber.example/notify"]
//!
//! [default_vim]
//! vimType = "ETSINFV.OPENSTACK_KEYSTONE.V_3"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vnflcm_model::VimConnectionInfo;

use crate::notify::Verbosity;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse '{path}': {message}")]
    Parse { path: PathBuf, message: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Types ─────────────────────────────────────────────────────────────────────

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base URL used in notification links.
    pub endpoint: String,
    pub lock: LockConfig,
    pub reconcile: ReconcileConfig,
    pub grant: GrantConfig,
    pub notification: NotificationConfig,
    pub scripts: ScriptsConfig,
    pub auto_heal: AutoHealConfig,
    /// VIM used when neither the instantiate request nor the grant supplies one.
    pub default_vim: Option<VimConnectionInfo>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            endpoint: "http://127.0.0.1:9890".to_string(),
            lock: LockConfig::default(),
            reconcile: ReconcileConfig::default(),
            grant: GrantConfig::default(),
            notification: NotificationConfig::default(),
            scripts: ScriptsConfig::default(),
            auto_heal: AutoHealConfig::default(),
            default_vim: None,
        }
    }
}

/// `[lock]`: blocking acquisition backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub poll_interval_ms: u64,
    pub max_backoff_ms: u64,
    pub timeout_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        LockConfig {
            poll_interval_ms: 100,
            max_backoff_ms: 2000,
            timeout_secs: 600,
        }
    }
}

/// `[reconcile]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub initial_delay_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        ReconcileConfig {
            enabled: true,
            interval_secs: 300,
            initial_delay_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantAuthorityKind {
    /// Approve every request in-process.
    Local,
    /// POST requests to an external authority.
    Http,
}

/// `[grant]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrantConfig {
    pub authority: GrantAuthorityKind,
    pub endpoint: Option<String>,
    pub auth_token: Option<String>,
    pub placement_fallback_best_effort: bool,
    /// Zone the local authority binds every added resource to.
    pub default_zone: Option<String>,
}

impl Default for GrantConfig {
    fn default() -> Self {
        GrantConfig {
            authority: GrantAuthorityKind::Local,
            endpoint: None,
            auth_token: None,
            placement_fallback_best_effort: false,
            default_zone: Some("nova".to_string()),
        }
    }
}

/// `[notification]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub verbosity: Verbosity,
    /// Webhook subscribers. Empty means notifications are only logged.
    pub callback_uris: Vec<String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        NotificationConfig {
            verbosity: Verbosity::Full,
            callback_uris: Vec::new(),
        }
    }
}

/// `[scripts]`: lifecycle management scripts shipped in VNF packages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptsConfig {
    pub enabled: bool,
    pub interpreter: String,
    /// Scripts resolve to `<package_root>/<vnfdId>/Definitions/<script>`.
    pub package_root: PathBuf,
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        ScriptsConfig {
            enabled: false,
            interpreter: "python3".to_string(),
            package_root: PathBuf::from("/var/lib/vnflcm/packages"),
        }
    }
}

/// `[auto_heal]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoHealConfig {
    pub enabled: bool,
    /// Batching window per instance before a heal is submitted.
    pub timer_secs: u64,
}

impl Default for AutoHealConfig {
    fn default() -> Self {
        AutoHealConfig {
            enabled: false,
            timer_secs: 20,
        }
    }
}

// ── Functions ─────────────────────────────────────────────────────────────────

impl EngineConfig {
    /// Parse a configuration document.
    pub fn from_toml_str(content: &str) -> Result<EngineConfig, toml::de::Error> {
        toml::from_str(content)
    }

    /// Check cross-field requirements that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grant.authority == GrantAuthorityKind::Http && self.grant.endpoint.is_none() {
            return Err(ConfigError::Invalid(
                "[grant] authority = \"http\" requires an endpoint".to_string(),
            ));
        }
        if self.lock.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "[lock] poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.reconcile.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "[reconcile] interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Read, parse and validate an engine config TOML file from `path`.
pub fn read_engine_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = EngineConfig::from_toml_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    config.validate()?;
    Ok(config)
}
