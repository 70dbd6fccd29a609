//! Training callbacks: per-epoch timing and log output.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::history::{EpochRecord, TrainingHistory};
use super::trainer::TrainingRun;

/// Observer of a training run. Every hook defaults to a no-op.
pub trait TrainingCallback {
    fn on_train_begin(&mut self, _run: &TrainingRun) {}

    fn on_epoch_begin(&mut self, _epoch: usize) {}

    fn on_epoch_end(&mut self, _epoch: usize, _record: &EpochRecord) {}

    fn on_train_end(&mut self, _history: &TrainingHistory) {}
}

/// Wall-clock duration of every completed epoch
#[derive(Debug, Default)]
pub struct TimeHistory {
    times: Vec<Duration>,
    epoch_start: Option<Instant>,
}

impl TimeHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn times(&self) -> &[Duration] {
        &self.times
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn total(&self) -> Duration {
        self.times.iter().sum()
    }
}

impl TrainingCallback for TimeHistory {
    fn on_train_begin(&mut self, _run: &TrainingRun) {
        self.times.clear();
    }

    fn on_epoch_begin(&mut self, _epoch: usize) {
        self.epoch_start = Some(Instant::now());
    }

    fn on_epoch_end(&mut self, _epoch: usize, _record: &EpochRecord) {
        if let Some(start) = self.epoch_start.take() {
            self.times.push(start.elapsed());
        }
    }
}

/// Logs epoch summaries with an ETA for the remaining epochs
#[derive(Debug)]
pub struct MetricsLogger {
    total_epochs: usize,
    training_start: Instant,
}

impl Default for MetricsLogger {
    fn default() -> Self {
        Self {
            total_epochs: 0,
            training_start: Instant::now(),
        }
    }
}

impl MetricsLogger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TrainingCallback for MetricsLogger {
    fn on_train_begin(&mut self, run: &TrainingRun) {
        self.total_epochs = run.epochs;
        self.training_start = Instant::now();
        info!(
            "Training for {} epochs: {} steps/epoch, {} validation steps",
            run.epochs, run.steps_per_epoch, run.validation_steps
        );
    }

    fn on_epoch_begin(&mut self, epoch: usize) {
        debug!("Epoch {}/{} started", epoch + 1, self.total_epochs);
    }

    fn on_epoch_end(&mut self, epoch: usize, record: &EpochRecord) {
        let done = epoch + 1;
        let avg_epoch = self.training_start.elapsed().as_secs_f64() / done as f64;
        let eta_secs = self.total_epochs.saturating_sub(done) as f64 * avg_epoch;

        info!(
            "Epoch {}/{} in {:.1}s | loss: {:.4} | acc: {:.2}% | val_loss: {:.4} | val_acc: {:.2}% | ETA: {:.0}s",
            done,
            self.total_epochs,
            record.elapsed().as_secs_f64(),
            record.train_loss,
            record.train_accuracy * 100.0,
            record.val_loss,
            record.val_accuracy * 100.0,
            eta_secs
        );
    }

    fn on_train_end(&mut self, history: &TrainingHistory) {
        let best = history
            .best_val_accuracy()
            .map(|(epoch, acc)| format!("{:.2}% (epoch {})", acc * 100.0, epoch + 1))
            .unwrap_or_else(|| "n/a".to_string());
        info!(
            "Training complete: {} epochs in {:.1}s | best val_acc: {}",
            history.len(),
            self.training_start.elapsed().as_secs_f64(),
            best
        );
    }
}
