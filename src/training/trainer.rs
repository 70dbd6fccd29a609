//! Training Loop
//!
//! A manual Burn loop: every epoch pulls a fixed number of batches from the
//! training feed (one optimizer step each), then a fixed number of batches
//! from the validation feed with the inference model. Both feeds are
//! consumed as continuing iterators, so step counts that do not line up with
//! the dataset length wrap across passes.

use std::time::Instant;

use burn::{
    data::dataloader::batcher::Batcher,
    module::AutodiffModule,
    nn::loss::BinaryCrossEntropyLossConfig,
    optim::{GradientsParams, Optimizer, RmsPropConfig},
    prelude::*,
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

use super::callbacks::TrainingCallback;
use super::history::{EpochRecord, TrainingHistory};
use crate::backend::backend_name;
use crate::config::TrainingConfig;
use crate::dataset::{DataFeed, DiceBatch, DiceItem, FeedIter};
use crate::model::DiceClassifier;
use crate::utils::error::{DiceError, Result};

/// Fixed schedule of one training run
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRun {
    pub epochs: usize,
    pub steps_per_epoch: usize,
    pub validation_steps: usize,
    pub learning_rate: f64,
    pub show_progress: bool,
}

/// What `fit` hands back
pub struct FitOutcome<B: AutodiffBackend, O> {
    pub model: DiceClassifier<B>,
    pub optimizer: O,
    pub history: TrainingHistory,
}

impl TrainingRun {
    /// Derive the schedule; zero steps of either kind is an error
    pub fn from_config(config: &TrainingConfig) -> Result<Self> {
        let run = Self {
            epochs: config.epochs,
            steps_per_epoch: config.steps_per_epoch(),
            validation_steps: config.validation_steps(),
            learning_rate: config.learning_rate,
            show_progress: config.show_progress,
        };

        if run.epochs == 0 {
            return Err(DiceError::Config("epochs must be greater than 0".into()));
        }
        if run.steps_per_epoch == 0 {
            return Err(DiceError::Config(format!(
                "{} training samples with batch size {} gives no steps per epoch",
                config.train_samples, config.batch_size
            )));
        }
        if run.validation_steps == 0 {
            return Err(DiceError::Config(format!(
                "{} validation samples with batch size {} gives no validation steps",
                config.validation_samples, config.batch_size
            )));
        }
        Ok(run)
    }

    /// RMSprop with the configured smoothing constant and epsilon
    pub fn optimizer_config(config: &TrainingConfig) -> RmsPropConfig {
        RmsPropConfig::new()
            .with_alpha(config.rms_alpha)
            .with_epsilon(config.rms_epsilon)
    }

    /// Train `model` for `self.epochs` epochs.
    ///
    /// Any feed or decode error aborts the run.
    pub fn fit<B, O>(
        &self,
        mut model: DiceClassifier<B>,
        mut optimizer: O,
        train_feed: &DataFeed,
        valid_feed: &DataFeed,
        callbacks: &mut [&mut dyn TrainingCallback],
        device: &B::Device,
    ) -> Result<FitOutcome<B, O>>
    where
        B: AutodiffBackend,
        O: Optimizer<DiceClassifier<B>, B>,
    {
        let batcher = train_feed.batcher();
        let valid_batcher = valid_feed.batcher();
        let loss_fn = BinaryCrossEntropyLossConfig::new()
            .with_logits(true)
            .init::<B>(device);
        let valid_loss_fn = BinaryCrossEntropyLossConfig::new()
            .with_logits(true)
            .init::<B::InnerBackend>(device);

        let mut train_iter = train_feed.iter();
        let mut valid_iter = valid_feed.iter();
        let mut history = TrainingHistory::new(backend_name());

        for cb in callbacks.iter_mut() {
            cb.on_train_begin(self);
        }

        for epoch in 0..self.epochs {
            for cb in callbacks.iter_mut() {
                cb.on_epoch_begin(epoch);
            }
            let epoch_start = Instant::now();

            let progress = self.progress_bar(epoch);
            let mut train = RunningMetrics::default();

            for _ in 0..self.steps_per_epoch {
                let items = next_batch(&mut train_iter)?;
                let batch: DiceBatch<B> = batcher.batch(items, device);
                let n = batch.targets.dims()[0];

                let logits = model.forward(batch.images);
                let loss = loss_fn.forward(logits.clone(), batch.targets.clone());

                train.add(
                    loss.clone().into_scalar().elem::<f64>(),
                    count_correct(logits, batch.targets),
                    n,
                );

                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optimizer.step(self.learning_rate, model, grads);

                progress.set_message(format!("loss {:.4}", train.mean_loss()));
                progress.inc(1);
            }
            progress.finish_and_clear();

            let valid_model = model.valid();
            let mut valid = RunningMetrics::default();
            for _ in 0..self.validation_steps {
                let items = next_batch(&mut valid_iter)?;
                let batch: DiceBatch<B::InnerBackend> = valid_batcher.batch(items, device);

                let logits = valid_model.forward(batch.images);
                let loss = valid_loss_fn.forward(logits.clone(), batch.targets.clone());
                let n = batch.targets.dims()[0];

                valid.add(
                    loss.into_scalar().elem::<f64>(),
                    count_correct(logits, batch.targets),
                    n,
                );
            }

            let record = EpochRecord {
                epoch,
                train_loss: train.mean_loss(),
                train_accuracy: train.accuracy(),
                val_loss: valid.mean_loss(),
                val_accuracy: valid.accuracy(),
                train_batches: train.batches,
                val_batches: valid.batches,
                elapsed_ms: epoch_start.elapsed().as_millis() as u64,
            };
            debug!("Epoch {} record: {:?}", epoch + 1, record);

            for cb in callbacks.iter_mut() {
                cb.on_epoch_end(epoch, &record);
            }
            history.push(record);
        }

        history.finish();
        for cb in callbacks.iter_mut() {
            cb.on_train_end(&history);
        }

        Ok(FitOutcome {
            model,
            optimizer,
            history,
        })
    }

    fn progress_bar(&self, epoch: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new(self.steps_per_epoch as u64);
        let style = ProgressStyle::with_template(
            "  {prefix} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )
        .map(|s| s.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        pb.set_prefix(format!("Epoch {}/{}", epoch + 1, self.epochs));
        pb
    }
}

fn next_batch(iter: &mut FeedIter<'_>) -> Result<Vec<DiceItem>> {
    iter.next()
        .ok_or_else(|| DiceError::Training("data feed produced no batches".into()))?
}

/// Correct predictions with a 0.5 probability threshold, i.e. logit > 0
pub fn count_correct<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 2, Int>) -> usize {
    let correct: i64 = logits
        .greater_elem(0.0)
        .int()
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem();
    correct as usize
}

#[derive(Debug, Default)]
struct RunningMetrics {
    loss_sum: f64,
    correct: usize,
    samples: usize,
    batches: usize,
}

impl RunningMetrics {
    /// `loss` is the batch mean; it is weighted by the batch size
    fn add(&mut self, loss: f64, correct: usize, samples: usize) {
        self.loss_sum += loss * samples as f64;
        self.correct += correct;
        self.samples += samples;
        self.batches += 1;
    }

    fn mean_loss(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.loss_sum / self.samples as f64
        }
    }

    fn accuracy(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.correct as f64 / self.samples as f64
        }
    }
}
