use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::{BackendKind, Config};

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid port: 0")]
    InvalidPort,

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Database URL is required for the {0} backend")]
    MissingDatabaseUrl(BackendKind),

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid chunk_size: 0. Must be at least 1")]
    InvalidChunkSize,

    #[error("Invalid row limits: default {0} must be between 1 and the maximum {1}")]
    InvalidRowLimits(u32, u32),

    #[error("Invalid sample rows: default {0} must be between 1 and the maximum {1}")]
    InvalidSampleRows(u32, u32),

    #[error("Invalid max_retries: {0}. Cannot be 0")]
    InvalidMaxRetries(u32),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid poll interval for {0}: must be at least 1 second")]
    InvalidPollInterval(String),

    #[error("Agent {0} is seeded more than once")]
    DuplicateAgent(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Project configuration written by `triai init`.
pub const PROJECT_CONFIG_FILE: &str = ".triai/config.yaml";
/// Uncommitted local overrides.
pub const LOCAL_CONFIG_FILE: &str = ".triai/local.yaml";

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .triai/config.yaml (project config, created by init)
    /// 3. .triai/local.yaml (project local overrides, optional)
    /// 4. `explicit`, when given (`--config`)
    /// 5. Environment variables (TRIAI_* prefix, `__` between sections)
    pub fn load(explicit: Option<&Path>) -> Result<Config> {
        let config: Config = Self::figment(explicit)
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, without project files or environment.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn figment(explicit: Option<&Path>) -> Figment {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(PROJECT_CONFIG_FILE))
            .merge(Yaml::file(LOCAL_CONFIG_FILE));
        if let Some(path) = explicit {
            figment = figment.merge(Yaml::file(path));
        }
        figment.merge(Env::prefixed("TRIAI_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.server.port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        let database = &config.database;
        if database.backend != BackendKind::Mock && database.url.trim().is_empty() {
            return Err(ConfigError::MissingDatabaseUrl(database.backend));
        }
        if database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(database.max_connections));
        }
        if database.chunk_size == 0 {
            return Err(ConfigError::InvalidChunkSize);
        }

        let tools = &config.tools;
        if tools.default_row_limit == 0 || tools.default_row_limit > tools.max_row_limit {
            return Err(ConfigError::InvalidRowLimits(
                tools.default_row_limit,
                tools.max_row_limit,
            ));
        }
        if tools.default_sample_rows == 0 || tools.default_sample_rows > tools.max_sample_rows {
            return Err(ConfigError::InvalidSampleRows(
                tools.default_sample_rows,
                tools.max_sample_rows,
            ));
        }

        if config.retry.max_retries == 0 {
            return Err(ConfigError::InvalidMaxRetries(config.retry.max_retries));
        }
        if config.retry.initial_backoff_ms >= config.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.initial_backoff_ms,
                config.retry.max_backoff_ms,
            ));
        }

        if config.agents.default_poll_interval_secs == 0 {
            return Err(ConfigError::InvalidPollInterval("agents.default_poll_interval_secs".into()));
        }
        let mut seen = HashSet::new();
        for seed in &config.agents.seed {
            if seed.name.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "Seeded agent name cannot be empty".to_string(),
                ));
            }
            if !seen.insert(seed.name.as_str()) {
                return Err(ConfigError::DuplicateAgent(seed.name.clone()));
            }
            if seed.poll_interval_secs == Some(0) {
                return Err(ConfigError::InvalidPollInterval(seed.name.clone()));
            }
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::config::{AgentSeed, LogFormat};
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.database.backend, BackendKind::Mock);
        assert_eq!(config.logging.level, "info");
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "server:\n  port: 9000\ndatabase:\n  backend: sqlite\n  url: sqlite:triai.db\nlogging:\n  format: json"
        )
        .unwrap();

        let config = ConfigLoader::load_from_file(file.path()).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.database.backend, BackendKind::Sqlite);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.tools.max_row_limit, 10_000);
    }

    #[test]
    fn test_unknown_log_format_fails_to_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "logging:\n  format: xml").unwrap();
        assert!(ConfigLoader::load_from_file(file.path()).is_err());
    }

    #[test]
    fn test_env_overrides_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "server:\n  port: 9000\n  current_user: alice").unwrap();

        temp_env::with_vars(
            [
                ("TRIAI_SERVER__PORT", Some("9191")),
                ("TRIAI_DATABASE__NAME", Some("warehouse")),
            ],
            || {
                let config = ConfigLoader::load(Some(file.path())).unwrap();
                assert_eq!(config.server.port, 9191);
                assert_eq!(config.server.current_user, "alice");
                assert_eq!(config.database.name, "warehouse");
            },
        );
    }

    #[test]
    fn test_env_selecting_sqlite_without_url_is_rejected() {
        temp_env::with_var("TRIAI_DATABASE__BACKEND", Some("sqlite"), || {
            let err = ConfigLoader::load(None).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<ConfigError>(),
                Some(ConfigError::MissingDatabaseUrl(BackendKind::Sqlite))
            ));
        });
    }

    #[test]
    fn test_validate_zero_port() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidPort)));
    }

    #[test]
    fn test_validate_zero_chunk_size() {
        let mut config = Config::default();
        config.database.chunk_size = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidChunkSize)
        ));
    }

    #[test]
    fn test_validate_inverted_row_limits() {
        let mut config = Config::default();
        config.tools.default_row_limit = 500;
        config.tools.max_row_limit = 100;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidRowLimits(500, 100))
        ));
    }

    #[test]
    fn test_validate_zero_max_retries() {
        let mut config = Config::default();
        config.retry.max_retries = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxRetries(0))
        ));
    }

    #[test]
    fn test_validate_invalid_backoff() {
        let mut config = Config::default();
        config.retry.initial_backoff_ms = 30000;
        config.retry.max_backoff_ms = 10000;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidBackoff(30000, 10000))
        ));
    }

    #[test]
    fn test_validate_zero_poll_interval() {
        let mut config = Config::default();
        config.agents.default_poll_interval_secs = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidPollInterval(_))
        ));

        let mut config = Config::default();
        config.agents.seed[0].poll_interval_secs = Some(0);
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidPollInterval(name)) if name == "DataAnalyst"
        ));
    }

    #[test]
    fn test_validate_duplicate_seed() {
        let mut config = Config::default();
        let copy: AgentSeed = config.agents.seed[1].clone();
        config.agents.seed.push(copy);
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::DuplicateAgent(name)) if name == "QueryBot"
        ));
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        match ConfigLoader::validate(&config) {
            Err(ConfigError::InvalidLogLevel(level)) => assert_eq!(level, "verbose"),
            other => panic!("Expected InvalidLogLevel error, got {other:?}"),
        }
    }
}
