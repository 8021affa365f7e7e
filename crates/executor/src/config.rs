//! Executor configuration
//!
//! Settings are resolved once (from code, the environment or a JSON document)
//! and shared read-only by every operation of one executor instance.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

/// Default maximum number of outstanding operations
pub const DEFAULT_MAX_IN_FLIGHT: usize = 1024;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A value is out of range
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    /// A value could not be parsed
    #[error("cannot parse {key} from {value:?}")]
    Parse { key: &'static str, value: String },

    /// JSON document could not be decoded
    #[error("invalid configuration document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Unit used to size continuous paging pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PageUnit {
    /// Page size counts rows
    #[default]
    Rows,
    /// Page size counts bytes
    Bytes,
}

impl FromStr for PageUnit {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rows" => Ok(Self::Rows),
            "bytes" => Ok(Self::Bytes),
            _ => Err(ConfigError::Parse {
                key: "page_unit",
                value: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for PageUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rows => write!(f, "rows"),
            Self::Bytes => write!(f, "bytes"),
        }
    }
}

/// Continuous paging options
///
/// Only honored by sessions implementing
/// [`ContinuousPagingSession`](crate::session::ContinuousPagingSession).
///
/// # Example
///
/// ```
/// use bulkload_executor::config::{ContinuousPagingOptions, PageUnit};
///
/// let options = ContinuousPagingOptions::default()
///     .with_page_size(100, PageUnit::Rows)
///     .with_max_pages_per_second(10);
/// assert_eq!(options.page_size, 100);
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContinuousPagingOptions {
    /// Size of one page, in `page_unit`
    pub page_size: u32,

    /// Unit of `page_size`
    pub page_unit: PageUnit,

    /// Maximum number of pages per query (0 = unlimited)
    pub max_pages: u32,

    /// Maximum number of pages delivered per second and per query (0 = unlimited)
    pub max_pages_per_second: u32,
}

impl Default for ContinuousPagingOptions {
    fn default() -> Self {
        Self {
            page_size: 5000,
            page_unit: PageUnit::Rows,
            max_pages: 0,
            max_pages_per_second: 0,
        }
    }
}

impl ContinuousPagingOptions {
    /// Set the page size and its unit
    pub fn with_page_size(mut self, size: u32, unit: PageUnit) -> Self {
        self.page_size = size;
        self.page_unit = unit;
        self
    }

    /// Set the maximum number of pages (0 = unlimited)
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// Set the maximum number of pages per second (0 = unlimited)
    pub fn with_max_pages_per_second(mut self, max: u32) -> Self {
        self.max_pages_per_second = max;
        self
    }

    /// Validate the options
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "page_size",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

/// Bulk executor configuration
///
/// # Example
///
/// ```
/// use bulkload_executor::ExecutorConfig;
///
/// let config = ExecutorConfig::default()
///     .with_max_in_flight(64)
///     .with_max_per_second(500.0)
///     .with_fail_safe(true);
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Maximum number of outstanding session calls
    pub max_in_flight: usize,

    /// Maximum operations admitted per second (None = unbounded)
    pub max_per_second: Option<f64>,

    /// Report failures per statement instead of terminating the sequence
    pub fail_safe: bool,

    /// Continuous paging options for reads (None = single-shot reads)
    pub continuous_paging: Option<ContinuousPagingOptions>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            max_per_second: None,
            fail_safe: false,
            continuous_paging: None,
        }
    }
}

impl ExecutorConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of in-flight operations
    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max.max(1);
        self
    }

    /// Set the maximum rate in operations per second
    pub fn with_max_per_second(mut self, rate: f64) -> Self {
        self.max_per_second = Some(rate);
        self
    }

    /// Remove the rate limit
    pub fn unbounded_rate(mut self) -> Self {
        self.max_per_second = None;
        self
    }

    /// Select fail-safe (true) or fail-fast (false) error handling
    pub fn with_fail_safe(mut self, fail_safe: bool) -> Self {
        self.fail_safe = fail_safe;
        self
    }

    /// Set continuous paging options
    pub fn with_continuous_paging(mut self, options: ContinuousPagingOptions) -> Self {
        self.continuous_paging = Some(options);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_in_flight == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_in_flight",
                reason: "must be greater than zero".into(),
            });
        }
        if self.max_in_flight > Semaphore::MAX_PERMITS {
            return Err(ConfigError::InvalidValue {
                key: "max_in_flight",
                reason: format!(
                    "must not exceed {}, got {}",
                    Semaphore::MAX_PERMITS,
                    self.max_in_flight
                ),
            });
        }
        if let Some(rate) = self.max_per_second {
            if !rate.is_finite() || rate <= 0.0 {
                return Err(ConfigError::InvalidValue {
                    key: "max_per_second",
                    reason: format!("must be a positive number, got {rate}"),
                });
            }
            if Duration::try_from_secs_f64(1.0 / rate).is_err() {
                return Err(ConfigError::InvalidValue {
                    key: "max_per_second",
                    reason: format!("rate {rate} is too small to schedule"),
                });
            }
        }
        if let Some(paging) = &self.continuous_paging {
            paging.validate()?;
        }
        Ok(())
    }

    /// Decode and validate a JSON configuration document
    ///
    /// Missing fields take their default values.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Create configuration from `BULKLOAD_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup
    ///
    /// Used by [`from_env`](Self::from_env); tests pass a map instead of
    /// mutating the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("BULKLOAD_MAX_IN_FLIGHT") {
            config.max_in_flight = parse_value("max_in_flight", &value)?;
        }
        if let Some(value) = lookup("BULKLOAD_MAX_PER_SECOND") {
            config.max_per_second = parse_rate(&value)?;
        }
        if let Some(value) = lookup("BULKLOAD_FAIL_SAFE") {
            config.fail_safe = parse_value("fail_safe", &value)?;
        }

        let paging_keys = [
            "BULKLOAD_PAGE_SIZE",
            "BULKLOAD_PAGE_UNIT",
            "BULKLOAD_MAX_PAGES",
            "BULKLOAD_MAX_PAGES_PER_SECOND",
        ];
        if paging_keys.iter().any(|key| lookup(key).is_some()) {
            let mut paging = ContinuousPagingOptions::default();
            if let Some(value) = lookup("BULKLOAD_PAGE_SIZE") {
                paging.page_size = parse_value("page_size", &value)?;
            }
            if let Some(value) = lookup("BULKLOAD_PAGE_UNIT") {
                paging.page_unit = value.parse()?;
            }
            if let Some(value) = lookup("BULKLOAD_MAX_PAGES") {
                paging.max_pages = parse_value("max_pages", &value)?;
            }
            if let Some(value) = lookup("BULKLOAD_MAX_PAGES_PER_SECOND") {
                paging.max_pages_per_second = parse_value("max_pages_per_second", &value)?;
            }
            config.continuous_paging = Some(paging);
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_value<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Parse {
        key,
        value: value.to_string(),
    })
}

/// `unbounded`, `-1` and `0` all disable rate limiting
fn parse_rate(value: &str) -> Result<Option<f64>, ConfigError> {
    if value.trim().eq_ignore_ascii_case("unbounded") {
        return Ok(None);
    }
    let rate: f64 = parse_value("max_per_second", value)?;
    if rate <= 0.0 {
        Ok(None)
    } else {
        Ok(Some(rate))
    }
}
