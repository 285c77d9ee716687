//! Configuration module for Hearth.

use serde::Deserialize;
use std::path::Path;

use crate::{HearthError, Result};

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Seconds an unauthenticated connection may wait before the first
    /// auth envelope arrives.
    #[serde(default = "default_auth_timeout")]
    pub auth_timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_auth_timeout() -> u64 {
    15
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            auth_timeout_secs: default_auth_timeout(),
        }
    }
}

/// Admin identity configuration.
///
/// Admin elevation compares the supplied credentials against these values
/// exactly. An empty password disables elevation entirely.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    /// Admin username.
    #[serde(default = "default_admin_username")]
    pub username: String,
    /// Admin password. Empty means elevation is disabled.
    #[serde(default)]
    pub password: String,
}

fn default_admin_username() -> String {
    "admin".to_string()
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            username: default_admin_username(),
            password: String::new(),
        }
    }
}

/// Moderation state configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ModerationConfig {
    /// Path to the persisted ban/mute document.
    #[serde(default = "default_state_path")]
    pub state_path: String,
    /// Mute duration in minutes applied when an admin omits one.
    #[serde(default = "default_mute_minutes")]
    pub default_mute_minutes: u64,
}

fn default_state_path() -> String {
    "data/moderation.json".to_string()
}

fn default_mute_minutes() -> u64 {
    10
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            default_mute_minutes: default_mute_minutes(),
        }
    }
}

/// AI bridge configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    /// OpenAI-compatible chat completions endpoint.
    #[serde(default = "default_ai_endpoint")]
    pub endpoint: String,
    /// Model name sent with each request.
    #[serde(default = "default_ai_model")]
    pub model: String,
    /// Bearer token. Empty means the bridge runs in simulated mode.
    #[serde(default)]
    pub api_key: String,
}

fn default_ai_endpoint() -> String {
    "https://api.groq.com/openai/v1/chat/completions".to_string()
}

fn default_ai_model() -> String {
    "llama3-8b-8192".to_string()
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            endpoint: default_ai_endpoint(),
            model: default_ai_model(),
            api_key: String::new(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log file path. Empty means console-only logging.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/hearth.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Admin identity.
    #[serde(default)]
    pub admin: AdminConfig,
    /// Moderation state configuration.
    #[serde(default)]
    pub moderation: ModerationConfig,
    /// AI bridge configuration.
    #[serde(default)]
    pub ai: AiConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(HearthError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| HearthError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `HEARTH_ADMIN_USERNAME`: Override the admin username
    /// - `HEARTH_ADMIN_PASSWORD`: Override the admin password
    /// - `HEARTH_AI_API_KEY`: Override the AI bridge API key
    pub fn apply_env_overrides(&mut self) {
        if let Ok(username) = std::env::var("HEARTH_ADMIN_USERNAME") {
            if !username.is_empty() {
                self.admin.username = username;
            }
        }
        if let Ok(password) = std::env::var("HEARTH_ADMIN_PASSWORD") {
            if !password.is_empty() {
                self.admin.password = password;
            }
        }
        if let Ok(api_key) = std::env::var("HEARTH_AI_API_KEY") {
            if !api_key.is_empty() {
                self.ai.api_key = api_key;
            }
        }
    }

    /// Validate the configuration.
    ///
    /// Returns an error if the admin username is empty or the auth timeout
    /// is zero.
    pub fn validate(&self) -> Result<()> {
        if self.admin.username.trim().is_empty() {
            return Err(HearthError::Config(
                "admin.username must not be empty".to_string(),
            ));
        }
        if self.server.auth_timeout_secs == 0 {
            return Err(HearthError::Config(
                "server.auth_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.auth_timeout_secs, 15);

        assert_eq!(config.admin.username, "admin");
        assert!(config.admin.password.is_empty());

        assert_eq!(config.moderation.state_path, "data/moderation.json");
        assert_eq!(config.moderation.default_mute_minutes, 10);

        assert!(config.ai.endpoint.contains("chat/completions"));
        assert!(config.ai.api_key.is_empty());

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.file, "logs/hearth.log");
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
            [server]
            port = 9000

            [admin]
            username = "root"
            password = "secret"
        "#;
        let config = Config::parse(toml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.admin.username, "root");
        assert_eq!(config.admin.password, "secret");
        assert_eq!(config.moderation.default_mute_minutes, 10);
    }

    #[test]
    fn test_parse_invalid_config() {
        assert!(Config::parse("this is not toml [").is_err());
    }

    #[test]
    fn test_parse_empty_config() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn test_validate_ok() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_admin_username() {
        let mut config = Config::default();
        config.admin.username = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_auth_timeout() {
        let mut config = Config::default();
        config.server.auth_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(Config::load("/nonexistent/path/config.toml").is_err());
    }
}
