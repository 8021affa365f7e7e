//! Load driver configuration

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use bulkload_executor::ErrorThreshold;

/// What to load and how to recover
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    /// Resource identifier positions are tracked under
    pub resource: String,

    /// Number of records in the resource (positions `1..=records`)
    pub records: u64,

    /// Fail every record whose position is a multiple of this (0 = never)
    pub fail_every: u64,

    /// Simulated session latency per statement
    pub latency: Duration,

    /// Checkpoint file read before and written after the run
    pub checkpoint_path: PathBuf,

    /// Abort the run once this many failures are exceeded
    pub max_errors: ErrorThreshold,

    /// How long to wait for outstanding statements at the end of the run
    pub drain_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            resource: "file:///records.csv".to_string(),
            records: 10_000,
            fail_every: 0,
            latency: Duration::from_millis(1),
            checkpoint_path: PathBuf::from("bulkload-checkpoint.json"),
            max_errors: ErrorThreshold::Absolute(100),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

impl RunnerConfig {
    /// Create configuration from `BULKLOAD_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(resource) = lookup("BULKLOAD_RESOURCE") {
            config.resource = resource;
        }
        if let Some(records) = lookup("BULKLOAD_RECORDS") {
            config.records = records
                .trim()
                .parse()
                .with_context(|| format!("BULKLOAD_RECORDS must be a count, got {records:?}"))?;
        }
        if let Some(fail_every) = lookup("BULKLOAD_FAIL_EVERY") {
            config.fail_every = fail_every.trim().parse().with_context(|| {
                format!("BULKLOAD_FAIL_EVERY must be a count, got {fail_every:?}")
            })?;
        }
        if let Some(latency) = lookup("BULKLOAD_LATENCY_MS") {
            let millis: u64 = latency.trim().parse().with_context(|| {
                format!("BULKLOAD_LATENCY_MS must be milliseconds, got {latency:?}")
            })?;
            config.latency = Duration::from_millis(millis);
        }
        if let Some(path) = lookup("BULKLOAD_CHECKPOINT") {
            config.checkpoint_path = PathBuf::from(path);
        }
        if let Some(max_errors) = lookup("BULKLOAD_MAX_ERRORS") {
            config.max_errors = max_errors
                .parse()
                .context("BULKLOAD_MAX_ERRORS is invalid")?;
        }
        if let Some(timeout) = lookup("BULKLOAD_DRAIN_TIMEOUT_SECS") {
            let secs: u64 = timeout.trim().parse().with_context(|| {
                format!("BULKLOAD_DRAIN_TIMEOUT_SECS must be seconds, got {timeout:?}")
            })?;
            config.drain_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RunnerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, RunnerConfig::default());
    }

    #[test]
    fn test_from_lookup() {
        let config = RunnerConfig::from_lookup(lookup_from(&[
            ("BULKLOAD_RESOURCE", "file:///users.csv"),
            ("BULKLOAD_RECORDS", "500"),
            ("BULKLOAD_FAIL_EVERY", "50"),
            ("BULKLOAD_LATENCY_MS", "0"),
            ("BULKLOAD_CHECKPOINT", "/tmp/users.json"),
            ("BULKLOAD_MAX_ERRORS", "5%"),
        ]))
        .unwrap();

        assert_eq!(config.resource, "file:///users.csv");
        assert_eq!(config.records, 500);
        assert_eq!(config.fail_every, 50);
        assert_eq!(config.latency, Duration::ZERO);
        assert_eq!(config.checkpoint_path, PathBuf::from("/tmp/users.json"));
        assert_eq!(config.max_errors, ErrorThreshold::Ratio(0.05));
    }

    #[test]
    fn test_invalid_values() {
        assert!(RunnerConfig::from_lookup(lookup_from(&[("BULKLOAD_RECORDS", "many")])).is_err());
        assert!(
            RunnerConfig::from_lookup(lookup_from(&[("BULKLOAD_MAX_ERRORS", "lots")])).is_err()
        );
    }
}
