//! # Dice Trainer
//!
//! Trains a binary image classifier for dice photos with the Burn framework
//! and publishes the trained model to object storage.
//!
//! ## Modules
//!
//! - `dataset`: dataset provisioning, class-directory scanning, augmentation and batch feeds
//! - `model`: the three-block CNN and its configuration
//! - `training`: the epoch loop, callbacks and per-epoch history
//! - `artifacts`: local weights/model files and their upload
//! - `inference`: scoring images with a saved model
//! - `pipeline`: the whole run, from download to upload
//! - `utils`: errors, logging and formatting helpers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dice_trainer::backend::{default_device, TrainingBackend};
//! use dice_trainer::config::RunConfig;
//! use dice_trainer::dataset::HttpFetcher;
//! use dice_trainer::pipeline::run_pipeline;
//!
//! let config = RunConfig::default();
//! let report = run_pipeline::<TrainingBackend>(&config, &HttpFetcher::new()?, None, &default_device())?;
//! println!("{:?}", report.saved);
//! ```

pub mod artifacts;
pub mod backend;
pub mod config;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod pipeline;
pub mod training;
pub mod utils;

pub use artifacts::{ArtifactPublisher, LocalDirStore, ObjectStore, SavedArtifacts};
pub use config::RunConfig;
pub use dataset::{DataFeed, FeedOptions};
pub use inference::Predictor;
pub use model::{DiceClassifier, DiceClassifierConfig};
pub use pipeline::{run_pipeline, PipelineReport};
pub use training::{TimeHistory, TrainingHistory, TrainingRun};
pub use utils::error::{DiceError, Result};

/// Version of the library, also the default artifact version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
