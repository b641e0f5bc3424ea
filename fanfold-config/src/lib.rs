//! Domain-driven configuration for fanfold
//!
//! Configuration is split by functional domain (transport, worker pool,
//! map-reduce, logging), with defaults, validation, and `FANFOLD_*`
//! environment variable overrides.

pub mod error;
pub mod loader;
pub mod validation;

// Domain-specific configuration modules
pub mod domains;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use validation::Validatable;

// Re-export domain configurations
pub use domains::{
    logging::{LogFormat, LogLevel, LoggingConfig},
    map_reduce::MapReduceConfig,
    pool::{DispatchPolicy, WorkerPoolConfig},
    transport::TransportConfig,
    FanfoldConfig,
};

// Re-export utilities
pub use domains::utils::serde_duration_ms;
