//! Domain-specific configuration modules

pub mod logging;
pub mod map_reduce;
pub mod pool;
pub mod transport;
pub mod utils;

use crate::error::ConfigResult;
use serde::{Deserialize, Serialize};

/// Main fanfold configuration combining all domains
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FanfoldConfig {
    /// Transport queue configuration
    #[serde(default)]
    pub transport: transport::TransportConfig,

    /// Worker pool configuration
    #[serde(default)]
    pub pool: pool::WorkerPoolConfig,

    /// Map-reduce coordinator configuration
    #[serde(default)]
    pub map_reduce: map_reduce::MapReduceConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: logging::LoggingConfig,
}

impl FanfoldConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        crate::validation::validate_config(self)
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = FanfoldConfig::default();
        serde_yaml::to_string(&config)
            .unwrap_or_else(|_| "# Failed to generate sample config".to_string())
    }
}
