//! End-to-end training pipeline
//!
//! provision → build model → build feeds → fit → save → publish
//!
//! Strictly sequential. The first error aborts the run; nothing is saved when
//! training fails and nothing is retried when an upload fails.

use std::path::PathBuf;
use std::time::Duration;

use burn::tensor::backend::AutodiffBackend;
use tracing::{info, warn};

use crate::artifacts::{
    save_artifacts, store_from_config, ArtifactPublisher, ObjectStore, PublishedArtifacts,
    SavedArtifacts,
};
use crate::backend::backend_name;
use crate::config::RunConfig;
use crate::dataset::{provision, ArchiveFetcher, DataFeed, FeedOptions, ProvisionOutcome};
use crate::model::DiceClassifier;
use crate::training::{MetricsLogger, TimeHistory, TrainingCallback, TrainingHistory, TrainingRun};
use crate::utils::error::{DiceError, Result};

/// Everything a finished run produced
#[derive(Debug)]
pub struct PipelineReport {
    pub provision: ProvisionOutcome,
    pub class_names: Vec<String>,
    pub history: TrainingHistory,
    /// One entry per completed epoch
    pub epoch_times: Vec<Duration>,
    pub saved: SavedArtifacts,
    pub history_path: PathBuf,
    pub config_path: PathBuf,
    /// `None` when uploading is disabled
    pub published: Option<PublishedArtifacts>,
}

pub fn history_file_name(version: &str) -> String {
    format!("history_{}.json", version)
}

pub fn config_file_name(version: &str) -> String {
    format!("config_{}.toml", version)
}

/// Build the training and validation feeds for `config`
pub fn build_feeds(config: &RunConfig) -> Result<(DataFeed, DataFeed)> {
    let dims = config.image.dims();
    let order = config.image.channel_order;
    let batch_size = config.training.batch_size;

    let train = DataFeed::new(
        config.dataset.train_dir(),
        FeedOptions::training(
            dims,
            batch_size,
            config.augmentation.clone(),
            order,
            config.training.seed,
        ),
    )?;
    let valid = DataFeed::new(
        config.dataset.valid_dir(),
        FeedOptions::validation(dims, batch_size, order),
    )?;

    if train.class_names() != valid.class_names() {
        return Err(DiceError::Dataset(format!(
            "train classes {:?} differ from validation classes {:?}",
            train.class_names(),
            valid.class_names()
        )));
    }

    info!(
        "Found {} training images and {} validation images in classes {:?}",
        train.len(),
        valid.len(),
        train.class_names()
    );
    if train.len() != config.training.train_samples {
        warn!(
            "train_samples is {} but {} training images were found",
            config.training.train_samples,
            train.len()
        );
    }
    if valid.len() != config.training.validation_samples {
        warn!(
            "validation_samples is {} but {} validation images were found",
            config.training.validation_samples,
            valid.len()
        );
    }

    Ok((train, valid))
}

/// Run the whole pipeline.
///
/// `store` overrides the store named in the configuration; it is only used
/// when uploading is enabled.
pub fn run_pipeline<B: AutodiffBackend>(
    config: &RunConfig,
    fetcher: &dyn ArchiveFetcher,
    store: Option<&dyn ObjectStore>,
    device: &B::Device,
) -> Result<PipelineReport> {
    config.validate()?;
    info!("Backend: {}", backend_name());

    let provision = provision(&config.dataset, fetcher)?;

    let model_config = config.model_config();
    let model: DiceClassifier<B> = model_config.init(device)?;
    info!(
        "Model input {:?}, {} layers",
        model_config.input_shape(),
        model_config.layers()?.len()
    );

    let (train_feed, valid_feed) = build_feeds(config)?;
    let class_names = train_feed.class_names().to_vec();

    let run = TrainingRun::from_config(&config.training)?;
    let optimizer = TrainingRun::optimizer_config(&config.training).init::<B, DiceClassifier<B>>();

    let mut time_history = TimeHistory::new();
    let mut logger = MetricsLogger::new();
    let outcome = {
        let mut callbacks: [&mut dyn TrainingCallback; 2] = [&mut time_history, &mut logger];
        run.fit(
            model,
            optimizer,
            &train_feed,
            &valid_feed,
            &mut callbacks,
            device,
        )?
    };

    let data_dir = config.dataset.data_dir();
    let version = &config.artifacts.version;
    let saved = save_artifacts(
        &outcome.model,
        &outcome.optimizer,
        &model_config,
        &class_names,
        &data_dir,
        version,
    )?;

    let history_path = data_dir.join(history_file_name(version));
    outcome.history.save_json(&history_path)?;
    let config_path = data_dir.join(config_file_name(version));
    config.save(&config_path)?;
    info!("Saved history to {:?} and config to {:?}", history_path, config_path);

    let published = if config.artifacts.upload {
        let owned;
        let store = match store {
            Some(store) => store,
            None => {
                owned = store_from_config(&config.artifacts.store, &config.artifacts.bucket)?;
                &*owned
            }
        };
        let publisher = ArtifactPublisher::new(store, config.artifacts.key_prefix.clone());
        Some(publisher.publish(&saved)?)
    } else {
        info!("Upload disabled, artifacts kept in {:?}", data_dir);
        None
    };

    Ok(PipelineReport {
        provision,
        class_names,
        history: outcome.history,
        epoch_times: time_history.times().to_vec(),
        saved,
        history_path,
        config_path,
        published,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_split(root: &Path, split: &str, classes: &[&str], per_class: usize) {
        for class in classes {
            let dir = root.join("data").join(split).join(class);
            fs::create_dir_all(&dir).unwrap();
            for i in 0..per_class {
                RgbImage::from_pixel(8, 8, Rgb([i as u8, 0, 0]))
                    .save(dir.join(format!("{}.png", i)))
                    .unwrap();
            }
        }
    }

    fn config_for(root: &Path) -> RunConfig {
        let mut config = RunConfig::default();
        config.dataset.workspace_dir = root.to_path_buf();
        config.image.height = 24;
        config.image.width = 24;
        config.training.batch_size = 2;
        config.training.train_samples = 4;
        config.training.validation_samples = 2;
        config
    }

    #[test]
    fn test_file_names() {
        assert_eq!(history_file_name("1.0"), "history_1.0.json");
        assert_eq!(config_file_name("1.0"), "config_1.0.toml");
    }

    #[test]
    fn test_build_feeds() {
        let root = TempDir::new().unwrap();
        write_split(root.path(), "train", &["a", "b"], 2);
        write_split(root.path(), "valid", &["a", "b"], 1);

        let (train, valid) = build_feeds(&config_for(root.path())).unwrap();

        assert_eq!(train.len(), 4);
        assert_eq!(valid.len(), 2);
        assert!(train.options().augmentation.is_some());
        assert!(valid.options().augmentation.is_none());
        assert!(!valid.options().shuffle);
    }

    #[test]
    fn test_build_feeds_rejects_mismatched_classes() {
        let root = TempDir::new().unwrap();
        write_split(root.path(), "train", &["a", "b"], 2);
        write_split(root.path(), "valid", &["a", "c"], 1);

        let err = build_feeds(&config_for(root.path())).unwrap_err();
        assert!(matches!(err, DiceError::Dataset(_)));
    }
}
