//! Timing configuration shared by every node of a cluster.

use std::time::Duration;

use crate::error::{ReplicaError, Result};

/// Interval between retransmissions of unconfirmed snapshots and persistence
/// requests.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// How long a write may wait for replica confirmations before it is failed.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaConfig {
    pub retry_interval: Duration,
    pub operation_timeout: Duration,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            retry_interval: DEFAULT_RETRY_INTERVAL,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

impl ReplicaConfig {
    /// Builds a validated configuration.
    pub fn new(retry_interval: Duration, operation_timeout: Duration) -> Result<Self> {
        let config = Self {
            retry_interval,
            operation_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks that several retries fit inside one operation deadline.
    ///
    /// The deadline must be strictly longer than the retry interval, otherwise a
    /// single lost acknowledgment would already fail the client request.
    pub fn validate(&self) -> Result<()> {
        if self.retry_interval.is_zero() {
            return Err(ReplicaError::InvalidConfig(
                "retry interval must be non-zero".to_string(),
            ));
        }
        if self.operation_timeout <= self.retry_interval {
            return Err(ReplicaError::InvalidConfig(format!(
                "operation timeout {:?} must be longer than retry interval {:?}",
                self.operation_timeout, self.retry_interval
            )));
        }
        Ok(())
    }
}
