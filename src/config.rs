//! Configuration loader and validator for the fiscalization bridge.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::transform::FiscalSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub source: Source,
    pub fiscal: Fiscal,
    pub pipeline: Pipeline,
    pub telegram: Telegram,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub bind: String,
    pub request_timeout_secs: u64,
}

/// Source system (salon SaaS) API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Source {
    pub base_url: String,
    pub partner_token: String,
    pub user_token: String,
}

/// Fiscal endpoint (cash register API) settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Fiscal {
    pub base_url: String,
    pub api_key: String,
    pub cashbox_unique_number: String,
    pub login: String,
    pub password: String,
    pub round_type: i32,
}

/// Pipeline behavior knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pipeline {
    /// Substring of the record comment that marks an event for fiscalization.
    pub trigger: String,
    /// Exact comment of acquiring-commission debit entries to exclude from
    /// fiscal payment totals.
    pub commission_marker: String,
}

/// Operator notification channel settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Telegram {
    pub enabled: bool,
    pub bot_token: String,
    pub chat_id: i64,
}

impl Config {
    /// Settings slice consumed by the data transformer.
    pub fn fiscal_settings(&self) -> FiscalSettings {
        FiscalSettings {
            cashbox_unique_number: self.fiscal.cashbox_unique_number.clone(),
            round_type: self.fiscal.round_type,
            commission_marker: self.pipeline.commission_marker.clone(),
        }
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.bind.trim().is_empty() {
        return Err(ConfigError::Invalid("app.bind must be non-empty"));
    }
    if cfg.app.request_timeout_secs == 0 {
        return Err(ConfigError::Invalid("app.request_timeout_secs must be > 0"));
    }

    if cfg.source.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("source.base_url must be non-empty"));
    }
    if cfg.source.partner_token.trim().is_empty() {
        return Err(ConfigError::Invalid("source.partner_token must be non-empty"));
    }

    if cfg.fiscal.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("fiscal.base_url must be non-empty"));
    }
    if cfg.fiscal.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("fiscal.api_key must be non-empty"));
    }
    if cfg.fiscal.cashbox_unique_number.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "fiscal.cashbox_unique_number must be non-empty",
        ));
    }
    if cfg.fiscal.login.trim().is_empty() {
        return Err(ConfigError::Invalid("fiscal.login must be non-empty"));
    }
    if cfg.fiscal.password.trim().is_empty() {
        return Err(ConfigError::Invalid("fiscal.password must be non-empty"));
    }

    if cfg.pipeline.trigger.trim().is_empty() {
        return Err(ConfigError::Invalid("pipeline.trigger must be non-empty"));
    }
    if cfg.pipeline.commission_marker.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "pipeline.commission_marker must be non-empty",
        ));
    }

    if cfg.telegram.enabled && cfg.telegram.bot_token.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "telegram.bot_token must be non-empty when telegram.enabled",
        ));
    }

    Ok(())
}

/// Example configuration document, also used by tests.
pub fn example() -> &'static str {
    r#"app:
  bind: "0.0.0.0:8080"
  request_timeout_secs: 30

source:
  base_url: "https://api.alteg.io/api/v1"
  partner_token: "YOUR_PARTNER_TOKEN"
  user_token: "YOUR_USER_TOKEN"

fiscal:
  base_url: "https://api.webkassa.kz"
  api_key: "YOUR_API_KEY"
  cashbox_unique_number: "SWK00000000"
  login: "operator@example.com"
  password: "CHANGE_ME"
  round_type: 2

pipeline:
  trigger: "фч"
  commission_marker: "Списание комиссии за эквайринг"

telegram:
  enabled: false
  bot_token: ""
  chat_id: 0
"#
}
