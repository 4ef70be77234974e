mod channels;
mod defaults;
mod providers;


pub use channels::*;
pub use providers::*;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::CoachlineError;
use defaults::*;

/// Top-level Coachline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub coachline: CoachlineConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub intent: IntentConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub registration: RegistrationConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Whether channel allow-lists are enforced (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Message sent to unauthorized users.
    #[serde(default = "default_deny_message")]
    pub deny_message: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            deny_message: default_deny_message(),
        }
    }
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoachlineConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for CoachlineConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

/// Store config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// How long a writer waits on a locked database before failing.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            busy_timeout_secs: default_busy_timeout(),
        }
    }
}

/// Free-text intent fallback settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Upper bound on one classifier call.
    #[serde(default = "default_intent_timeout")]
    pub timeout_secs: u64,
    /// Task intents below this confidence are answered conversationally.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// Completed tasks included in the classifier context.
    #[serde(default = "default_recent_tasks")]
    pub recent_tasks: usize,
    /// Message turns included in the classifier context.
    #[serde(default = "default_recent_messages")]
    pub recent_messages: usize,
    /// Model override for classification. Empty = provider default.
    #[serde(default)]
    pub model: Option<String>,
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: default_intent_timeout(),
            min_confidence: default_min_confidence(),
            recent_tasks: default_recent_tasks(),
            recent_messages: default_recent_messages(),
            model: None,
        }
    }
}

impl IntentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Progress reporting settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Offset from UTC, in minutes, that defines a calendar day.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl ProgressConfig {
    pub fn offset(&self) -> Result<FixedOffset, CoachlineError> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            CoachlineError::Config(format!(
                "utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            ))
        })
    }
}

/// Registration session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationConfig {
    /// Minutes an unfinished registration stays alive.
    #[serde(default = "default_registration_ttl")]
    pub ttl_minutes: u64,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: default_registration_ttl(),
        }
    }
}

/// Export settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_export_dir")]
    pub dir: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            dir: default_export_dir(),
        }
    }
}

/// Expand `~` to home directory.
pub fn shellexpand(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return format!("{}/{rest}", home.to_string_lossy());
        }
    }
    path.to_string()
}

/// Load configuration from a TOML file.
///
/// Falls back to defaults if the file does not exist. Values that would make
/// the router misbehave (zero timeout, confidence outside 0..=1, bad offset)
/// are rejected here rather than at first use.
pub fn load(path: &str) -> Result<Config, CoachlineError> {
    let path = Path::new(path);
    if !path.exists() {
        tracing::info!(
            "Config file not found at {}, using defaults",
            path.display()
        );
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| CoachlineError::Config(format!("failed to read {}: {}", path.display(), e)))?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| CoachlineError::Config(format!("failed to parse config: {}", e)))?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<(), CoachlineError> {
    if config.intent.timeout_secs == 0 {
        return Err(CoachlineError::Config(
            "intent.timeout_secs must be at least 1".into(),
        ));
    }
    if !(0.0..=1.0).contains(&config.intent.min_confidence) {
        return Err(CoachlineError::Config(format!(
            "intent.min_confidence must be within 0..=1, got {}",
            config.intent.min_confidence
        )));
    }
    config.progress.offset()?;
    Ok(())
}
