//! Configuration loader and validator for the Canvas batch CLI.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::canvas::model::UserIdentifier;

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
    pub canvas: Canvas,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    /// Page size requested from listing endpoints.
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    /// Roles the operator holds on the Canvas instance.
    #[serde(default)]
    pub current_roles: Vec<String>,
    /// Roles allowed to run mutating commands. At least one of
    /// `current_roles` must match before a batch is started.
    #[serde(default = "default_approved_roles")]
    pub approved_roles: Vec<String>,
    /// Which profile field the annotate-users command surfaces.
    #[serde(default)]
    pub user_identifier: UserIdentifier,
}

/// Canvas instance settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Canvas {
    pub base_url: String,
    /// Session cookie string copied from a signed-in browser session. The
    /// `_csrf_token` cookie inside it authorizes mutations.
    pub cookie: String,
}

fn default_per_page() -> u32 {
    100
}

fn default_approved_roles() -> Vec<String> {
    vec!["AccountAdmin".to_string()]
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
    if cfg.app.per_page == 0 {
        return Err(ConfigError::Invalid("app.per_page must be > 0"));
    }
    if cfg.app.approved_roles.is_empty() {
        return Err(ConfigError::Invalid("app.approved_roles must not be empty"));
    }

    if cfg.canvas.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("canvas.base_url must be non-empty"));
    }
    match reqwest::Url::parse(&cfg.canvas.base_url) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
        _ => {
            return Err(ConfigError::Invalid(
                "canvas.base_url must be a valid http(s) URL",
            ))
        }
    }

    if cfg.canvas.cookie.trim().is_empty() {
        return Err(ConfigError::Invalid("canvas.cookie must be non-empty"));
    }

    Ok(())
}

/// Example YAML configuration, kept in sync with the schema above.
pub fn example() -> &'static str {
    r#"app:
  per_page: 100
  current_roles:
    - "AccountAdmin"
  approved_roles:
    - "AccountAdmin"
  user_identifier: "sis_user_id"

canvas:
  base_url: "https://school.instructure.com/"
  cookie: "canvas_session=YOUR_SESSION; _csrf_token=YOUR_TOKEN"
"#
}
