use std::time::Duration;

use clap::Parser;

use crate::config::ReplicaConfig;
use crate::error::Result;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Run a primary-backup replicated key-value store in one process",
    long_about = None
)]
pub struct Cli {
    /// Number of secondaries started next to the primary.
    #[arg(long, default_value_t = 2)]
    pub secondaries: usize,

    /// Interval between retransmissions of unconfirmed snapshots and persistence requests.
    #[arg(long, default_value_t = 100)]
    pub retry_interval_ms: u64,

    /// How long a write may wait for every secondary before it is failed.
    #[arg(long, default_value_t = 1000)]
    pub operation_timeout_ms: u64,

    /// Probability that a secondary's persistence confirmation is lost.
    #[arg(long, default_value_t = 0.2)]
    pub drop_probability: f64,

    /// Seed for the simulated persistence failures.
    #[arg(long, default_value_t = 7)]
    pub seed: u64,
}

impl Cli {
    pub fn replica_config(&self) -> Result<ReplicaConfig> {
        ReplicaConfig::new(
            Duration::from_millis(self.retry_interval_ms),
            Duration::from_millis(self.operation_timeout_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReplicaError;

    #[test]
    fn defaults_match_recommended_timings() {
        let cli = Cli::try_parse_from(["primary-backup"]).expect("defaults parse");
        assert_eq!(cli.secondaries, 2);
        assert_eq!(cli.replica_config(), Ok(ReplicaConfig::default()));
    }

    #[test]
    fn flags_override_timings() {
        let cli = Cli::try_parse_from([
            "primary-backup",
            "--secondaries",
            "4",
            "--retry-interval-ms",
            "20",
            "--operation-timeout-ms",
            "500",
        ])
        .expect("flags parse");
        let config = cli.replica_config().expect("valid config");
        assert_eq!(cli.secondaries, 4);
        assert_eq!(config.retry_interval, Duration::from_millis(20));
        assert_eq!(config.operation_timeout, Duration::from_millis(500));
    }

    #[test]
    fn inverted_timings_are_rejected() {
        let cli = Cli::try_parse_from([
            "primary-backup",
            "--retry-interval-ms",
            "500",
            "--operation-timeout-ms",
            "100",
        ])
        .expect("flags parse");
        assert!(matches!(
            cli.replica_config(),
            Err(ReplicaError::InvalidConfig(_))
        ));
    }
}
