//! Configuration loading and environment variable handling

use crate::domains::FanfoldConfig;
use crate::error::{ConfigError, ConfigResult};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "FANFOLD".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<FanfoldConfig> {
        let content = std::fs::read_to_string(path)?;
        let mut config: FanfoldConfig = serde_yaml::from_str(&content)?;

        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<FanfoldConfig> {
        let mut config = FanfoldConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<FanfoldConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut FanfoldConfig) -> ConfigResult<()> {
        self.apply_transport_overrides(&mut config.transport)?;
        self.apply_engine_overrides(config)?;
        self.apply_logging_overrides(&mut config.logging)?;
        Ok(())
    }

    fn apply_transport_overrides(
        &self,
        config: &mut crate::domains::transport::TransportConfig,
    ) -> ConfigResult<()> {
        if let Some(chunk_size) = self.parse_env_var::<usize>("CHUNK_SIZE")? {
            config.chunk_size = chunk_size;
        }
        Ok(())
    }

    /// Overrides shared by the worker pool and the map-reduce coordinator
    fn apply_engine_overrides(&self, config: &mut FanfoldConfig) -> ConfigResult<()> {
        if let Some(workers) = self.parse_env_var::<usize>("WORKERS")? {
            config.pool.worker_count = workers;
            config.map_reduce.worker_count = workers;
        }

        if let Some(millis) = self.parse_env_var::<u64>("POLL_INTERVAL_MS")? {
            config.pool.poll_interval = Duration::from_millis(millis);
            config.map_reduce.poll_interval = Duration::from_millis(millis);
        }

        if let Some(batch_size) = self.parse_env_var::<usize>("BATCH_SIZE")? {
            config.pool.batch_size = batch_size;
        }

        if let Ok(dispatch) = self.get_env_var("DISPATCH") {
            config.pool.dispatch = crate::domains::pool::DispatchPolicy::from_str(&dispatch)
                .map_err(|_| ConfigError::EnvError(format!("Invalid DISPATCH: {}", dispatch)))?;
        }

        if let Some(capacity) = self.parse_env_var::<usize>("MAPPER_QUEUE_CAPACITY")? {
            config.map_reduce.mapper_queue_capacity = capacity;
        }

        if let Some(capacity) = self.parse_env_var::<usize>("REDUCER_QUEUE_CAPACITY")? {
            config.map_reduce.reducer_queue_capacity = capacity;
        }

        Ok(())
    }

    /// Apply logging config overrides
    fn apply_logging_overrides(
        &self,
        config: &mut crate::domains::logging::LoggingConfig,
    ) -> ConfigResult<()> {
        if let Ok(log_level) = self.get_env_var("LOG_LEVEL") {
            config.level = crate::domains::logging::LogLevel::from_str(&log_level)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_LEVEL: {}", log_level)))?;
        }

        if let Ok(format) = self.get_env_var("LOG_FORMAT") {
            config.format = crate::domains::logging::LogFormat::from_str(&format)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_FORMAT: {}", format)))?;
        }

        Ok(())
    }

    fn parse_env_var<T>(&self, name: &str) -> ConfigResult<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get_env_var(name) {
            Ok(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|e| ConfigError::EnvError(format!("Invalid {}: {}", name, e))),
            Err(_) => Ok(None),
        }
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
