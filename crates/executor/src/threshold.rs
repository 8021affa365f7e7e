//! Error thresholds for fail-safe runs
//!
//! A fail-safe sequence never terminates on statement failures, so callers
//! that want to give up after too many failures count them and consult an
//! [`ErrorThreshold`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Threshold parse errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ThresholdError {
    #[error("invalid error threshold '{0}': expected a count, a percentage or -1")]
    Invalid(String),

    #[error("error ratio must be in (0, 100]%, got {0}%")]
    RatioOutOfRange(f64),
}

/// Maximum number of tolerated failures
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorThreshold {
    /// Never exceeded
    #[default]
    Unlimited,

    /// Exceeded once more than `n` failures were observed
    Absolute(u64),

    /// Exceeded once the failed fraction of completed operations is above
    /// the ratio (in `(0, 1]`)
    Ratio(f64),
}

impl ErrorThreshold {
    /// Whether `failed` failures out of `total` completed operations exceed
    /// the threshold
    pub fn exceeded(&self, total: u64, failed: u64) -> bool {
        match *self {
            Self::Unlimited => false,
            Self::Absolute(max) => failed > max,
            Self::Ratio(ratio) => total > 0 && (failed as f64 / total as f64) > ratio,
        }
    }

    /// Whether any failure can exceed this threshold
    pub fn is_unlimited(&self) -> bool {
        matches!(self, Self::Unlimited)
    }
}

impl FromStr for ErrorThreshold {
    type Err = ThresholdError;

    /// Parse `"-1"` (unlimited), `"100"` (absolute) or `"20%"` (ratio)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(percent) = s.strip_suffix('%') {
            let percent: f64 = percent
                .trim()
                .parse()
                .map_err(|_| ThresholdError::Invalid(s.to_string()))?;
            if !(percent > 0.0 && percent <= 100.0) {
                return Err(ThresholdError::RatioOutOfRange(percent));
            }
            return Ok(Self::Ratio(percent / 100.0));
        }

        match s.parse::<i64>() {
            Ok(n) if n < 0 => Ok(Self::Unlimited),
            Ok(n) => Ok(Self::Absolute(n as u64)),
            Err(_) => Err(ThresholdError::Invalid(s.to_string())),
        }
    }
}

impl fmt::Display for ErrorThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlimited => write!(f, "-1"),
            Self::Absolute(n) => write!(f, "{n}"),
            Self::Ratio(ratio) => write!(f, "{}%", ratio * 100.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!("-1".parse(), Ok(ErrorThreshold::Unlimited));
        assert_eq!("100".parse(), Ok(ErrorThreshold::Absolute(100)));
        assert_eq!("0".parse(), Ok(ErrorThreshold::Absolute(0)));
        assert_eq!(" 20% ".parse(), Ok(ErrorThreshold::Ratio(0.2)));
        assert_eq!(
            "abc".parse::<ErrorThreshold>(),
            Err(ThresholdError::Invalid("abc".into()))
        );
        assert_eq!(
            "150%".parse::<ErrorThreshold>(),
            Err(ThresholdError::RatioOutOfRange(150.0))
        );
        assert!("0%".parse::<ErrorThreshold>().is_err());
    }

    #[test]
    fn test_absolute() {
        let threshold = ErrorThreshold::Absolute(2);
        assert!(!threshold.exceeded(10, 2));
        assert!(threshold.exceeded(10, 3));

        let zero = ErrorThreshold::Absolute(0);
        assert!(!zero.exceeded(10, 0));
        assert!(zero.exceeded(1, 1));
    }

    #[test]
    fn test_ratio() {
        let threshold = ErrorThreshold::Ratio(0.2);
        assert!(!threshold.exceeded(0, 0));
        assert!(!threshold.exceeded(10, 2));
        assert!(threshold.exceeded(10, 3));
    }

    #[test]
    fn test_unlimited() {
        assert!(!ErrorThreshold::Unlimited.exceeded(10, 10));
        assert!(ErrorThreshold::default().is_unlimited());
    }

    #[test]
    fn test_display_roundtrip() {
        for threshold in [
            ErrorThreshold::Unlimited,
            ErrorThreshold::Absolute(7),
            ErrorThreshold::Ratio(0.5),
        ] {
            assert_eq!(threshold.to_string().parse(), Ok(threshold));
        }
    }
}
