use skillsync_core::models::Language;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;
use url::Url;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub api_url: Url,
    pub tunnel_token: Option<String>,
    pub language: Language,
    pub sound_on: bool,
    pub narrate: bool,
    pub reveal_interval: Duration,
    pub image_dir: Option<PathBuf>,
    pub log_level: Level,
}

fn parse_bool(var: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(var) {
        Err(_) => Ok(default),
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue(
                var.to_string(),
                format!("'{}' is not a boolean", raw),
            )),
        },
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let api_url_str = std::env::var("SKILLSYNC_API_URL")
            .map_err(|_| ConfigError::MissingVar("SKILLSYNC_API_URL".to_string()))?;
        let api_url = Url::parse(&api_url_str).map_err(|e| {
            ConfigError::InvalidValue("SKILLSYNC_API_URL".to_string(), e.to_string())
        })?;

        let tunnel_token = std::env::var("SKILLSYNC_TUNNEL_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());

        let language = match std::env::var("SKILLSYNC_LANGUAGE") {
            Ok(raw) => raw.parse::<Language>().map_err(|e| {
                ConfigError::InvalidValue("SKILLSYNC_LANGUAGE".to_string(), e.to_string())
            })?,
            Err(_) => Language::English,
        };

        let sound_on = parse_bool("SKILLSYNC_SOUND", true)?;
        let narrate = parse_bool("SKILLSYNC_NARRATE", false)?;

        let interval_str =
            std::env::var("SKILLSYNC_REVEAL_INTERVAL_MS").unwrap_or_else(|_| "10".to_string());
        let interval_ms = interval_str
            .parse::<u64>()
            .ok()
            .filter(|ms| *ms > 0)
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "SKILLSYNC_REVEAL_INTERVAL_MS".to_string(),
                    format!("'{}' is not a positive number of milliseconds", interval_str),
                )
            })?;

        let image_dir = std::env::var("SKILLSYNC_IMAGE_DIR").ok().map(PathBuf::from);

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            api_url,
            tunnel_token,
            language,
            sound_on,
            narrate,
            reveal_interval: Duration::from_millis(interval_ms),
            image_dir,
            log_level,
        })
    }
}
