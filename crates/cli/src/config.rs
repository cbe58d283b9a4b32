//! Configuration loading and management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub engagement: EngagementSection,

    #[serde(default)]
    pub dispatcher: DispatcherSection,

    #[serde(default)]
    pub x: XSection,

    #[serde(default)]
    pub shortener: ShortenerSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_campaigns_file")]
    pub campaigns_file: PathBuf,

    #[serde(default = "default_state_db_path")]
    pub state_db_path: PathBuf,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementSection {
    #[serde(default = "default_limit_wrong_inputs")]
    pub limit_wrong_inputs: i64,

    #[serde(default = "default_limit_wrong_requests")]
    pub limit_wrong_requests: i64,

    #[serde(default = "default_datetime_format")]
    pub datetime_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherSection {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XSection {
    #[serde(default = "default_x_bearer_token_env")]
    pub bearer_token_env: String,

    #[serde(default = "default_x_user_token_env")]
    pub user_token_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortenerSection {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub endpoint: String,

    #[serde(default)]
    pub api_key_env: String,
}

// Default value functions
fn default_campaigns_file() -> PathBuf {
    PathBuf::from("./campaigns.toml")
}

fn default_state_db_path() -> PathBuf {
    PathBuf::from("./state.sqlite")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_limit_wrong_inputs() -> i64 {
    5
}

fn default_limit_wrong_requests() -> i64 {
    5
}

fn default_datetime_format() -> String {
    "[day]/[month]/[year] [hour]:[minute]".to_string()
}

fn default_poll_interval() -> u64 {
    10
}

fn default_x_bearer_token_env() -> String {
    "X_BEARER_TOKEN".to_string()
}

fn default_x_user_token_env() -> String {
    "X_USER_TOKEN".to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            campaigns_file: default_campaigns_file(),
            state_db_path: default_state_db_path(),
            log_level: default_log_level(),
        }
    }
}

impl Default for EngagementSection {
    fn default() -> Self {
        Self {
            limit_wrong_inputs: default_limit_wrong_inputs(),
            limit_wrong_requests: default_limit_wrong_requests(),
            datetime_format: default_datetime_format(),
        }
    }
}

impl Default for DispatcherSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl Default for XSection {
    fn default() -> Self {
        Self {
            bearer_token_env: default_x_bearer_token_env(),
            user_token_env: default_x_user_token_env(),
        }
    }
}

impl Default for ShortenerSection {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            api_key_env: String::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Try default config path if none specified
        let default_path = PathBuf::from("./config.toml");
        let path = config_path.unwrap_or(&default_path);

        if path.exists() {
            builder = builder.add_source(config::File::from(path));
        } else if config_path.is_some() {
            // User specified a path that doesn't exist
            anyhow::bail!("Config file not found: {}", path.display());
        }

        // Add environment variable overrides
        builder = builder.add_source(
            config::Environment::with_prefix("CONVOCA")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Generate example configuration as TOML string
    pub fn example_toml() -> String {
        r#"# convoca configuration

[general]
campaigns_file = "./campaigns.toml"
state_db_path = "./state.sqlite"
log_level = "info"

[engagement]
# Invalid contributions tolerated before the author is banned
limit_wrong_inputs = 5
# Malformed extra-info replies tolerated before the pending
# contribution is dropped
limit_wrong_requests = 5
# Format of the {date} reply placeholder
datetime_format = "[day]/[month]/[year] [hour]:[minute]"

[dispatcher]
poll_interval_secs = 10

[x]
bearer_token_env = "X_BEARER_TOKEN"
user_token_env = "X_USER_TOKEN"

[shortener]
enabled = false
# endpoint = "https://short.example.org/api/links"
# api_key_env = "SHORTENER_API_KEY"
"#
        .to_string()
    }
}
