//! Run Configuration
//!
//! Every tunable of a training run lives in one [`RunConfig`] built at
//! start-up and passed down by reference. Defaults reproduce the reference
//! setup: 480x480 inputs, batch 16, 50 epochs, 14290 training and 210
//! validation samples per epoch.
//!
//! A TOML file may override any subset of fields; the CLI applies its own
//! overrides on top through [`ConfigOverrides`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dataset::augmentation::AugmentationPolicy;
use crate::dataset::feed::ImageDims;
use crate::model::config::flattened_features;
use crate::model::{ChannelOrder, DiceClassifierConfig};
use crate::utils::error::{DiceError, Result};

/// Location of the published dataset archive
pub const DEFAULT_ARCHIVE_URL: &str =
    "https://storage.googleapis.com/raspberry-pi-vision/dice/data.tar.gz";

/// Bucket the artifacts are published to
pub const DEFAULT_BUCKET: &str = "raspberry-pi-vision";

/// Key prefix inside the bucket
pub const DEFAULT_KEY_PREFIX: &str = "dice/models";

/// Complete configuration of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub dataset: DatasetConfig,
    pub image: ImageConfig,
    pub training: TrainingConfig,
    pub augmentation: AugmentationPolicy,
    pub artifacts: ArtifactConfig,
}

/// Where the dataset lives and where it comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Directory holding the data directory and the archive
    pub workspace_dir: PathBuf,
    pub data_dir_name: String,
    pub archive_name: String,
    pub archive_url: String,
    pub train_subdir: String,
    pub valid_subdir: String,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            workspace_dir: PathBuf::from("."),
            data_dir_name: "data".to_string(),
            archive_name: "data.tar.gz".to_string(),
            archive_url: DEFAULT_ARCHIVE_URL.to_string(),
            train_subdir: "train".to_string(),
            valid_subdir: "valid".to_string(),
        }
    }
}

impl DatasetConfig {
    pub fn data_dir(&self) -> PathBuf {
        self.workspace_dir.join(&self.data_dir_name)
    }

    pub fn archive_path(&self) -> PathBuf {
        self.workspace_dir.join(&self.archive_name)
    }

    pub fn train_dir(&self) -> PathBuf {
        self.data_dir().join(&self.train_subdir)
    }

    pub fn valid_dir(&self) -> PathBuf {
        self.data_dir().join(&self.valid_subdir)
    }
}

/// Input size and layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub height: usize,
    pub width: usize,
    pub channel_order: ChannelOrder,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            height: 480,
            width: 480,
            channel_order: ChannelOrder::ChannelsFirst,
        }
    }
}

impl ImageConfig {
    pub fn dims(&self) -> ImageDims {
        ImageDims {
            height: self.height,
            width: self.width,
        }
    }
}

/// Optimization schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    /// Samples consumed per epoch, divided by `batch_size` to get the steps
    pub train_samples: usize,
    pub validation_samples: usize,
    pub learning_rate: f64,
    /// RMSprop smoothing constant
    pub rms_alpha: f32,
    pub rms_epsilon: f32,
    pub seed: u64,
    pub show_progress: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 50,
            batch_size: 16,
            train_samples: 14290,
            validation_samples: 210,
            learning_rate: 1e-3,
            rms_alpha: 0.9,
            rms_epsilon: 1e-7,
            seed: 42,
            show_progress: true,
        }
    }
}

impl TrainingConfig {
    /// Optimizer steps per epoch
    pub fn steps_per_epoch(&self) -> usize {
        self.train_samples.checked_div(self.batch_size).unwrap_or(0)
    }

    /// Validation batches per epoch
    pub fn validation_steps(&self) -> usize {
        self.validation_samples
            .checked_div(self.batch_size)
            .unwrap_or(0)
    }
}

/// Object store backing the publisher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Google Cloud Storage JSON API
    Gcs {
        /// Environment variable holding a bearer token; the metadata server
        /// is asked when it is unset
        token_env: String,
    },
    /// A local directory standing in for the bucket
    Local { root: PathBuf },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Gcs {
            token_env: "GOOGLE_OAUTH_ACCESS_TOKEN".to_string(),
        }
    }
}

/// Naming and destination of the trained artifacts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    pub version: String,
    pub bucket: String,
    pub key_prefix: String,
    /// Skip publishing and keep the artifacts local only
    pub upload: bool,
    pub store: StoreConfig,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            version: crate::VERSION.to_string(),
            bucket: DEFAULT_BUCKET.to_string(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            upload: true,
            store: StoreConfig::default(),
        }
    }
}

/// Command-line values that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub workspace_dir: Option<PathBuf>,
    pub epochs: Option<usize>,
    pub batch_size: Option<usize>,
    pub learning_rate: Option<f64>,
    pub seed: Option<u64>,
    pub version: Option<String>,
    pub no_upload: bool,
    pub no_progress: bool,
}

impl RunConfig {
    /// Read a TOML file; missing fields keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DiceError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Write the configuration as TOML
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(dir) = &overrides.workspace_dir {
            self.dataset.workspace_dir = dir.clone();
        }
        if let Some(epochs) = overrides.epochs {
            self.training.epochs = epochs;
        }
        if let Some(batch_size) = overrides.batch_size {
            self.training.batch_size = batch_size;
        }
        if let Some(lr) = overrides.learning_rate {
            self.training.learning_rate = lr;
        }
        if let Some(seed) = overrides.seed {
            self.training.seed = seed;
        }
        if let Some(version) = &overrides.version {
            self.artifacts.version = version.clone();
        }
        if overrides.no_upload {
            self.artifacts.upload = false;
        }
        if overrides.no_progress {
            self.training.show_progress = false;
        }
    }

    /// Reject configurations that cannot produce a run
    pub fn validate(&self) -> Result<()> {
        let t = &self.training;
        if t.epochs == 0 {
            return Err(DiceError::Config("epochs must be greater than 0".into()));
        }
        if t.batch_size == 0 {
            return Err(DiceError::Config("batch_size must be greater than 0".into()));
        }
        if t.steps_per_epoch() == 0 {
            return Err(DiceError::Config(format!(
                "train_samples ({}) is smaller than batch_size ({}), no training steps per epoch",
                t.train_samples, t.batch_size
            )));
        }
        if t.validation_steps() == 0 {
            return Err(DiceError::Config(format!(
                "validation_samples ({}) is smaller than batch_size ({}), no validation steps per epoch",
                t.validation_samples, t.batch_size
            )));
        }
        if t.learning_rate.is_nan() || t.learning_rate <= 0.0 {
            return Err(DiceError::Config("learning_rate must be positive".into()));
        }

        flattened_features(self.image.height, self.image.width)?;
        self.augmentation.validate().map_err(DiceError::Config)?;

        if self.artifacts.version.trim().is_empty() {
            return Err(DiceError::Config("artifact version must not be empty".into()));
        }
        if self.artifacts.version.contains(['/', '\\']) {
            return Err(DiceError::Config(format!(
                "artifact version '{}' must not contain path separators",
                self.artifacts.version
            )));
        }
        Ok(())
    }

    /// Classifier configuration for this run
    pub fn model_config(&self) -> DiceClassifierConfig {
        DiceClassifierConfig::new()
            .with_input_height(self.image.height)
            .with_input_width(self.image.width)
            .with_channel_order(self.image.channel_order)
    }
}
