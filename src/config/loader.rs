//! Configuration Loader
//!
//! Environment-aware configuration loading built on the `config` crate.
//! Sources are merged in order, later sources winning:
//!
//! 1. Defaults compiled into [`SessionConfig`]
//! 2. `{dir}/session-keeper.toml` (optional)
//! 3. `{dir}/session-keeper.{environment}.toml` (optional)
//! 4. `SESSION_KEEPER__SECTION__FIELD` environment variables

use super::error::{ConfigResult, ConfigurationError};
use super::SessionConfig;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const BASE_FILE_STEM: &str = "session-keeper";
const ENV_PREFIX: &str = "SESSION_KEEPER";
const ENV_SEPARATOR: &str = "__";

/// Loaded, validated configuration plus the environment it was loaded for
#[derive(Debug)]
pub struct ConfigManager {
    config: SessionConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        Self::build(config_dir, environment, None)
    }

    /// Load with an explicit set of `SESSION_KEEPER__*` variables instead of
    /// the process environment. Useful for testing without mutating global state.
    pub fn load_with_overrides(
        config_dir: Option<PathBuf>,
        environment: &str,
        overrides: config::Map<String, String>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        Self::build(config_dir, environment, Some(overrides))
    }

    fn build(
        config_dir: Option<PathBuf>,
        environment: &str,
        env_source: Option<config::Map<String, String>>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let merged = config::Config::builder()
            .add_source(Self::file_source(&config_directory.join(format!("{BASE_FILE_STEM}.toml"))))
            .add_source(Self::file_source(
                &config_directory.join(format!("{BASE_FILE_STEM}.{environment}.toml")),
            ))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true)
                    .source(env_source),
            )
            .build()
            .map_err(|e| ConfigurationError::load_error(environment, e))?;

        let mut config: SessionConfig = merged
            .try_deserialize()
            .map_err(|e| ConfigurationError::DeserializeError { error: e.to_string() })?;

        if environment == "production" && !config.lock.strict {
            info!("Production environment: forcing strict distributed lock mode");
            config.lock.strict = true;
        }

        config.validate()?;

        info!(
            environment = %environment,
            pool_max_size = config.pool.max_size,
            queue_max_size = config.pool.max_queue_size,
            lock_strict = config.lock.strict,
            shared_lock_store = config.lock.redis_url.is_some(),
            "⚙️ Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    fn file_source(path: &Path) -> config::File<config::FileSourceFile, config::FileFormat> {
        config::File::from(path)
            .format(config::FileFormat::Toml)
            .required(false)
    }

    /// Wrap an already-built configuration (tests, embedding applications)
    pub fn from_config(config: SessionConfig, environment: &str) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: PathBuf::from("config"),
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Detect the runtime environment
    pub fn detect_environment() -> String {
        env::var("SESSION_KEEPER_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }
}
