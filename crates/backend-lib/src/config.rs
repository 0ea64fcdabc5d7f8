// ============================
// crates/backend-lib/src/config.rs
// ============================
//! Configuration management.
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Default log level, overridden by `RUST_LOG`
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
    /// Outbound queue length per connection
    pub channel_capacity: usize,
    /// Messages kept per room; unbounded when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_history: Option<usize>,
    /// Close a connection after this long without an inbound frame
    pub idle_timeout_secs: u64,
    /// Interval between server pings
    pub ping_interval_secs: u64,
    /// Send permissive CORS headers
    pub allow_any_origin: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3001)),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            channel_capacity: 64,
            max_history: None,
            idle_timeout_secs: 60,
            ping_interval_secs: 20,
            allow_any_origin: true,
        }
    }
}

impl Settings {
    /// Config file read by [`Settings::load`]
    pub const DEFAULT_FILE: &'static str = "roomchat.toml";
    /// Prefix for environment overrides, e.g. `ROOMCHAT_BIND_ADDR`
    pub const ENV_PREFIX: &'static str = "ROOMCHAT_";

    /// Load defaults, then `roomchat.toml` if present, then the environment
    pub fn load() -> Result<Self, AppError> {
        Self::load_from(Self::DEFAULT_FILE)
    }

    /// Load defaults, then the TOML file at `path` if present, then the environment
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(Self::ENV_PREFIX))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<(), AppError> {
        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(AppError::Config(format!(
                "log_level must be one of {LOG_LEVELS:?}, got {}",
                self.log_level
            )));
        }
        if self.channel_capacity == 0 {
            return Err(AppError::Config(
                "channel_capacity must be greater than zero".to_string(),
            ));
        }
        if self.max_history == Some(0) {
            return Err(AppError::Config(
                "max_history must be greater than zero when set".to_string(),
            ));
        }
        if self.ping_interval_secs == 0 || self.ping_interval_secs >= self.idle_timeout_secs {
            return Err(AppError::Config(
                "ping_interval_secs must be non-zero and shorter than idle_timeout_secs"
                    .to_string(),
            ));
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.bind_addr.port(), 3001);
        assert_eq!(settings.max_history, None);
    }

    #[test]
    fn test_settings_validation() {
        let settings = Settings::default();

        let mut invalid = settings.clone();
        invalid.log_level = "loud".to_string();
        assert!(invalid.validate().is_err());

        let mut invalid = settings.clone();
        invalid.channel_capacity = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = settings.clone();
        invalid.max_history = Some(0);
        assert!(invalid.validate().is_err());

        let mut invalid = settings.clone();
        invalid.ping_interval_secs = invalid.idle_timeout_secs;
        assert!(invalid.validate().is_err());

        let mut valid = settings;
        valid.max_history = Some(500);
        valid.log_level = "DEBUG".to_string();
        assert!(valid.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("roomchat.toml");
        std::fs::write(
            &config_path,
            r#"
            bind_addr = "127.0.0.1:4000"
            log_format = "json"
            max_history = 100
            "#,
        )
        .unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.bind_addr.to_string(), "127.0.0.1:4000");
        assert_eq!(settings.log_format, LogFormat::Json);
        assert_eq!(settings.max_history, Some(100));
        // untouched keys keep their defaults
        assert_eq!(settings.channel_capacity, 64);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let temp_dir = tempdir().unwrap();
        let settings = Settings::load_from(temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.channel_capacity, Settings::default().channel_capacity);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("roomchat.toml");
        std::fs::write(&config_path, "channel_capacity = 0\n").unwrap();

        assert!(matches!(
            Settings::load_from(&config_path),
            Err(AppError::Config(_))
        ));
    }
}
