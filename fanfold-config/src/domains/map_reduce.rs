//! Map-reduce coordinator configuration

use crate::domains::utils::{default_poll_interval, default_worker_count};
use crate::error::ConfigResult;
use crate::validation::{validate_positive, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Map-reduce coordinator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapReduceConfig {
    /// Size of both the mapper and the reducer pool
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Pending tasks (0 = unbounded)
    #[serde(default)]
    pub mapper_queue_capacity: usize,

    /// Intermediate-result frames (0 = unbounded)
    #[serde(default)]
    pub reducer_queue_capacity: usize,

    /// Short timeout for data pulls between control checks
    #[serde(
        with = "crate::domains::utils::serde_duration_ms",
        default = "default_poll_interval"
    )]
    pub poll_interval: Duration,
}

impl Default for MapReduceConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            mapper_queue_capacity: 0,
            reducer_queue_capacity: 0,
            poll_interval: default_poll_interval(),
        }
    }
}

impl MapReduceConfig {
    pub fn with_workers(worker_count: usize) -> Self {
        Self {
            worker_count,
            ..Default::default()
        }
    }
}

impl Validatable for MapReduceConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.worker_count, "worker_count", self.domain_name())?;
        validate_positive(
            self.poll_interval.as_millis(),
            "poll_interval",
            self.domain_name(),
        )?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "map_reduce"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_reduce_defaults() {
        let config = MapReduceConfig::default();
        assert!(config.worker_count >= 1);
        assert_eq!(config.mapper_queue_capacity, 0);
        assert_eq!(config.reducer_queue_capacity, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = MapReduceConfig::with_workers(0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("map_reduce"));
    }

    #[test]
    fn test_poll_interval_in_millis() {
        let config: MapReduceConfig = serde_yaml::from_str("poll_interval: 25").unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(25));
    }
}
