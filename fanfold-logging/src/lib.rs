//! Logging setup for fanfold
//!
//! Engines log through `tracing`; the transport layer logs through `log`,
//! which the subscriber installed here bridges into the same output.

pub mod init;

pub use fanfold_config::{LogFormat, LogLevel, LoggingConfig};
pub use init::{build_env_filter, init_logging_from_config, init_simple_tracing};
