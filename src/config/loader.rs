//! Configuration Loader
//!
//! Environment-aware loading on top of the `config` crate. Sources are
//! layered base file → environment file → `RUNFLOW__*` variables, later
//! sources overriding earlier ones key by key.

use super::error::{ConfigResult, ConfigurationError};
use super::RunflowConfig;
use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Base configuration file name inside the configuration directory
pub const BASE_CONFIG_FILE: &str = "runflow.yaml";

/// Variable selecting the environment overlay
pub const ENVIRONMENT_VARIABLE: &str = "RUNFLOW_ENV";

/// Prefix for per-key environment overrides, e.g. `RUNFLOW__EXECUTOR__DISPATCH_TIMEOUT_MS`
pub const ENV_OVERRIDE_PREFIX: &str = "RUNFLOW";

/// Loaded configuration together with where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: RunflowConfig,
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

    /// Load configuration from a specific directory with explicit environment.
    /// Lets tests pick an environment without touching process variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            environment = %environment,
            directory = %config_directory.display(),
            "Loading configuration"
        );

        let config = Self::build(&config_directory, environment)?;
        config.validate()?;

        info!(
            environment = %environment,
            dispatch_timeout_ms = config.executor.dispatch_timeout_ms,
            max_transition_retries = config.orchestration.max_transition_retries,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    fn build(config_directory: &Path, environment: &str) -> ConfigResult<RunflowConfig> {
        let base = config_directory.join(BASE_CONFIG_FILE);
        let overlay = config_directory.join(format!("runflow.{environment}.yaml"));

        Config::builder()
            .add_source(File::from(base).required(false))
            .add_source(File::from(overlay).required(false))
            .add_source(
                Environment::with_prefix(ENV_OVERRIDE_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|settings| settings.try_deserialize::<RunflowConfig>())
            .map_err(|e| ConfigurationError::load_error(environment, e))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &RunflowConfig {
        &self.config
    }

    /// Configuration as JSON with credentials in the database URL masked
    pub fn debug_config(&self) -> serde_json::Value {
        let mut value = serde_json::json!(self.config);
        if let Some(url) = value
            .get_mut("database")
            .and_then(|database| database.get_mut("url"))
        {
            let masked = url.as_str().map(mask_url_credentials).unwrap_or_default();
            *url = serde_json::Value::String(masked);
        }
        value
    }

    /// Get the current environment
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Get the configuration directory
    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    fn detect_environment() -> String {
        env::var(ENVIRONMENT_VARIABLE)
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }
}

/// Replace the `user:password@` part of a connection URL
fn mask_url_credentials(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://[MASKED]{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
