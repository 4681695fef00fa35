//! Application configuration module
//!
//! This module provides type-safe configuration loading from environment variables
//! using the `config` and `dotenvy` crates. Configuration is loaded with the
//! `ESTIMATION_HUB` prefix and nested values use double underscores as separators.
//!
//! # Example
//!
//! ```no_run
//! use estimation_hub::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//! ```

mod auth;
mod database;
mod error;
mod hub;
mod server;

pub use auth::AuthConfig;
pub use database::DatabaseConfig;
pub use error::{ConfigError, ValidationError};
pub use hub::{HubConfig, KindConfig};
pub use server::{Environment, ServerConfig};

use serde::Deserialize;

/// Root application configuration
///
/// Load using [`AppConfig::load()`] which reads from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server configuration (host, port, environment)
    #[serde(default)]
    pub server: ServerConfig,

    /// PostgreSQL connection; absent means the in-memory store
    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    /// Identity cookie configuration
    pub auth: AuthConfig,

    /// Session hub tuning
    #[serde(default)]
    pub hub: HubConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// This function:
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with `ESTIMATION_HUB` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    /// 4. Deserializes into typed configuration structs
    ///
    /// # Environment Variable Format
    ///
    /// - `ESTIMATION_HUB__SERVER__PORT=8080` -> `server.port = 8080`
    /// - `ESTIMATION_HUB__HUB__BATTLE__AUTO_FINISH_COUNTS_DISCONNECTED=true`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Required environment variables are missing
    /// - Values cannot be parsed into expected types
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (development)
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("ESTIMATION_HUB")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        if let Some(database) = &self.database {
            database.validate()?;
        }
        self.auth.validate(&self.server.environment)?;
        self.hub.validate()?;
        Ok(())
    }

    /// Check if running in production environment
    pub fn is_production(&self) -> bool {
        self.server.is_production()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to ensure tests don't run in parallel (env vars are global)
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: &[&str] = &[
        "ESTIMATION_HUB__AUTH__SIGNING_SECRET",
        "ESTIMATION_HUB__DATABASE__URL",
        "ESTIMATION_HUB__SERVER__PORT",
        "ESTIMATION_HUB__SERVER__ENVIRONMENT",
        "ESTIMATION_HUB__HUB__ROSTER_GRACE_SECS",
        "ESTIMATION_HUB__HUB__STORYBOARD__AUTO_FINISH_COUNTS_DISCONNECTED",
    ];

    fn set_minimal_env() {
        env::set_var("ESTIMATION_HUB__AUTH__SIGNING_SECRET", "dev-secret");
    }

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    fn load_with(extra: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        set_minimal_env();
        for (key, value) in extra {
            env::set_var(key, value);
        }
        let result = AppConfig::load();
        clear_env();
        result
    }

    #[test]
    fn test_load_minimal_environment() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|p| p.into_inner());
        let config = load_with(&[]).unwrap();

        assert!(config.database.is_none());
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.hub.roster_grace_secs, 120);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_nested_sections() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|p| p.into_inner());
        let config = load_with(&[
            ("ESTIMATION_HUB__DATABASE__URL", "postgresql://test@localhost/test"),
            ("ESTIMATION_HUB__SERVER__PORT", "3000"),
            ("ESTIMATION_HUB__HUB__ROSTER_GRACE_SECS", "30"),
            (
                "ESTIMATION_HUB__HUB__STORYBOARD__AUTO_FINISH_COUNTS_DISCONNECTED",
                "true",
            ),
        ])
        .unwrap();

        assert_eq!(
            config.database.as_ref().map(|d| d.url.as_str()),
            Some("postgresql://test@localhost/test")
        );
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.hub.roster_grace_secs, 30);
        assert!(config.hub.storyboard.auto_finish_counts_disconnected);
        assert!(!config.hub.battle.auto_finish_counts_disconnected);
    }

    #[test]
    fn test_production_rejects_short_secret() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|p| p.into_inner());
        let config = load_with(&[("ESTIMATION_HUB__SERVER__ENVIRONMENT", "production")]).unwrap();

        assert!(config.is_production());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_secret_fails_to_load() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|p| p.into_inner());
        clear_env();
        assert!(AppConfig::load().is_err());
    }
}
