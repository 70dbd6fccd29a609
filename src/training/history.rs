//! Per-epoch training metrics, kept for the whole run and saved as JSON
//! next to the artifacts.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::error::Result;

/// Metrics of one completed epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    /// Zero-based epoch index
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    /// Batches pulled from the training feed
    pub train_batches: usize,
    /// Batches pulled from the validation feed
    pub val_batches: usize,
    pub elapsed_ms: u64,
}

impl EpochRecord {
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }
}

/// Append-only record of a training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub backend: String,
    pub epochs: Vec<EpochRecord>,
}

impl TrainingHistory {
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            backend: backend.into(),
            epochs: Vec::new(),
        }
    }

    pub fn push(&mut self, record: EpochRecord) {
        self.epochs.push(record);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn last(&self) -> Option<&EpochRecord> {
        self.epochs.last()
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    /// Highest validation accuracy and the epoch it was reached in
    pub fn best_val_accuracy(&self) -> Option<(usize, f64)> {
        self.epochs
            .iter()
            .map(|r| (r.epoch, r.val_accuracy))
            .fold(None, |best, cur| match best {
                Some((_, acc)) if acc >= cur.1 => best,
                _ => Some(cur),
            })
    }

    /// Sum of the per-epoch wall-clock times
    pub fn total_elapsed(&self) -> Duration {
        self.epochs.iter().map(EpochRecord::elapsed).sum()
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load_json(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}
