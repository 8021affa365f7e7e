//! Checkpoint persistence for position trackers

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::{Interval, PositionsTracker, TrackerError};

/// Serializable record of processed positions
///
/// Written at the end of (or periodically during) a run and loaded before a
/// resumed run so that already processed positions are skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Run that produced this checkpoint
    pub run_id: Uuid,

    /// When the checkpoint was taken
    pub created_at: DateTime<Utc>,

    /// Processed intervals per resource
    pub resources: BTreeMap<String, Vec<Interval>>,
}

impl Checkpoint {
    /// Create a checkpoint for `run_id` from a tracker snapshot
    pub fn new(run_id: Uuid, resources: BTreeMap<String, Vec<Interval>>) -> Self {
        Self {
            run_id,
            created_at: Utc::now(),
            resources,
        }
    }

    /// Serialize to pretty-printed JSON
    pub fn to_json(&self) -> Result<String, TrackerError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserialize from JSON
    pub fn from_json(json: &str) -> Result<Self, TrackerError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write to `path`, replacing any previous checkpoint atomically
    pub async fn write_to(&self, path: impl AsRef<Path>) -> Result<(), TrackerError> {
        let path = path.as_ref();
        let json = self.to_json()?;

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;

        info!(
            path = %path.display(),
            run_id = %self.run_id,
            resources = self.resources.len(),
            "Checkpoint written"
        );
        Ok(())
    }

    /// Read a checkpoint from `path`
    pub async fn read_from(path: impl AsRef<Path>) -> Result<Self, TrackerError> {
        let json = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json(&json)
    }

    /// Read a checkpoint if `path` exists
    pub async fn load_if_exists(path: impl AsRef<Path>) -> Result<Option<Self>, TrackerError> {
        let path = path.as_ref();
        match tokio::fs::try_exists(path).await? {
            true => {
                let checkpoint = Self::read_from(path).await?;
                info!(
                    path = %path.display(),
                    run_id = %checkpoint.run_id,
                    "Checkpoint loaded"
                );
                Ok(Some(checkpoint))
            }
            false => {
                debug!(path = %path.display(), "No checkpoint found");
                Ok(None)
            }
        }
    }
}

impl PositionsTracker {
    /// Take a checkpoint of the current state
    pub fn checkpoint(&self, run_id: Uuid) -> Checkpoint {
        Checkpoint::new(run_id, self.snapshot())
    }

    /// Rebuild a tracker from a checkpoint
    ///
    /// Intervals are re-merged, so hand-edited checkpoints with overlapping or
    /// adjacent intervals load into canonical form. Malformed intervals are
    /// rejected.
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Result<Self, TrackerError> {
        let tracker = Self::new();
        for (resource, intervals) in &checkpoint.resources {
            for interval in intervals {
                tracker.merge_range(resource, interval.lo, interval.hi)?;
            }
        }
        Ok(tracker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_checkpoint_roundtrip() {
        let tracker = PositionsTracker::new();
        for position in [1, 2, 3, 7, 9, 8] {
            tracker.update("file:///a.csv", position).unwrap();
        }
        tracker.update("file:///b.csv", 4).unwrap();

        let run_id = Uuid::now_v7();
        let checkpoint = tracker.checkpoint(run_id);
        assert_eq!(checkpoint.run_id, run_id);

        let decoded = Checkpoint::from_json(&checkpoint.to_json().unwrap()).unwrap();
        let restored = PositionsTracker::from_checkpoint(&decoded).unwrap();
        assert_eq!(restored.snapshot(), tracker.snapshot());
        assert!(restored.covered("file:///a.csv", 8));
        assert!(!restored.covered("file:///a.csv", 5));
    }

    #[test]
    fn test_from_checkpoint_normalizes_intervals() {
        let checkpoint = Checkpoint::new(
            Uuid::now_v7(),
            BTreeMap::from([(
                "r".to_string(),
                vec![Interval::new(5, 9), Interval::new(1, 3), Interval::new(4, 4)],
            )]),
        );
        let tracker = PositionsTracker::from_checkpoint(&checkpoint).unwrap();
        assert_eq!(tracker.positions("r"), vec![Interval::new(1, 9)]);
    }

    #[test]
    fn test_from_checkpoint_rejects_malformed() {
        let json = r#"{
            "run_id": "0190a0b0-0000-7000-8000-000000000000",
            "created_at": "2024-06-01T00:00:00Z",
            "resources": {"r": [{"lo": 0, "hi": 4}]}
        }"#;
        let checkpoint = Checkpoint::from_json(json).unwrap();
        assert!(matches!(
            PositionsTracker::from_checkpoint(&checkpoint),
            Err(TrackerError::InvalidInterval { lo: 0, hi: 4, .. })
        ));
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            Checkpoint::from_json("[]"),
            Err(TrackerError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_write_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.json");

        assert!(Checkpoint::load_if_exists(&path).await.unwrap().is_none());

        let tracker = PositionsTracker::new();
        tracker.merge_range("file:///data.csv", 1, 100).unwrap();
        let checkpoint = tracker.checkpoint(Uuid::now_v7());
        checkpoint.write_to(&path).await.unwrap();

        let loaded = Checkpoint::load_if_exists(&path).await.unwrap().unwrap();
        assert_eq!(loaded, checkpoint);
        assert!(!dir.path().join("positions.json.tmp").exists());
    }
}
