//! Transport queue configuration

use crate::error::ConfigResult;
use crate::validation::{validate_range, Validatable};
use serde::{Deserialize, Serialize};

pub use fanfold_ipc::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};

/// Transport queue configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Serialized payloads larger than this are split into chunks
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
        }
    }
}

impl Validatable for TransportConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_range(
            self.chunk_size,
            1,
            MAX_CHUNK_SIZE,
            "chunk_size",
            self.domain_name(),
        )
    }

    fn domain_name(&self) -> &'static str {
        "transport"
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
