//! Worker pool configuration

use crate::domains::utils::{default_poll_interval, default_worker_count};
use crate::error::ConfigResult;
use crate::validation::{validate_positive, Validatable};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How tasks reach pool workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchPolicy {
    /// One queue all workers block on; senders block when it is full
    SharedQueue,
    /// One queue per worker; senders probe round-robin until one accepts
    PerWorker,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        DispatchPolicy::PerWorker
    }
}

impl FromStr for DispatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "shared" | "shared_queue" => Ok(DispatchPolicy::SharedQueue),
            "per_worker" => Ok(DispatchPolicy::PerWorker),
            _ => Err(format!("Invalid dispatch policy: {}", s)),
        }
    }
}

impl fmt::Display for DispatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchPolicy::SharedQueue => write!(f, "shared_queue"),
            DispatchPolicy::PerWorker => write!(f, "per_worker"),
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Number of worker threads
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Tasks buffered client-side before one enqueue
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Batches per worker queue (0 = unbounded). A shared queue holds
    /// `queue_capacity * worker_count` batches.
    #[serde(default)]
    pub queue_capacity: usize,

    /// Result batches per collector queue (0 = unbounded)
    #[serde(default)]
    pub collector_queue_capacity: usize,

    #[serde(default)]
    pub dispatch: DispatchPolicy,

    /// How long workers block on data before re-checking control state
    #[serde(
        with = "crate::domains::utils::serde_duration_ms",
        default = "default_poll_interval"
    )]
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            batch_size: default_batch_size(),
            queue_capacity: 0,
            collector_queue_capacity: 0,
            dispatch: DispatchPolicy::default(),
            poll_interval: default_poll_interval(),
        }
    }
}

impl WorkerPoolConfig {
    /// Capacity of the single shared queue, 0 when unbounded
    pub fn shared_queue_capacity(&self) -> usize {
        self.queue_capacity * self.worker_count
    }
}

impl Validatable for WorkerPoolConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.worker_count, "worker_count", self.domain_name())?;
        validate_positive(self.batch_size, "batch_size", self.domain_name())?;
        validate_positive(
            self.poll_interval.as_millis(),
            "poll_interval",
            self.domain_name(),
        )?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "pool"
    }
}

fn default_batch_size() -> usize {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_defaults() {
        let config = WorkerPoolConfig::default();
        assert!(config.worker_count >= 1);
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.queue_capacity, 0);
        assert_eq!(config.dispatch, DispatchPolicy::PerWorker);
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_shared_queue_capacity_scales_with_workers() {
        let config = WorkerPoolConfig {
            worker_count: 4,
            queue_capacity: 3,
            ..Default::default()
        };
        assert_eq!(config.shared_queue_capacity(), 12);
    }

    #[test]
    fn test_pool_validation() {
        let mut config = WorkerPoolConfig::default();
        config.batch_size = 0;
        assert!(config.validate().is_err());

        config.batch_size = 10;
        config.worker_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_dispatch_policy_from_str() {
        assert_eq!(
            DispatchPolicy::from_str("shared").unwrap(),
            DispatchPolicy::SharedQueue
        );
        assert_eq!(
            DispatchPolicy::from_str("Per-Worker").unwrap(),
            DispatchPolicy::PerWorker
        );
        assert!(DispatchPolicy::from_str("random").is_err());
    }
}
