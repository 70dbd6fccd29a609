//! Local Model Artifacts
//!
//! Two files are written per run, both into the data directory:
//!
//! - `weights_<version>.mpk`: model parameters only
//! - `model_<version>.tar`: the full model, a tarball holding
//!   `model.json` (configuration, topology, class names),
//!   `weights.mpk` and `optimizer.mpk`
//!
//! The bundle is self-describing: [`load_model_bundle`] rebuilds the
//! classifier from `model.json` before loading the parameters.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use burn::{
    module::Module,
    optim::Optimizer,
    record::{DefaultRecorder, Recorder},
    tensor::backend::{AutodiffBackend, Backend},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::model::{ChannelOrder, DiceClassifier, DiceClassifierConfig, LayerSpec};
use crate::utils::error::{DiceError, Result};

/// Layout version of the `.tar` bundle
pub const BUNDLE_FORMAT_VERSION: u32 = 1;

const MANIFEST_ENTRY: &str = "model.json";
const WEIGHTS_ENTRY: &str = "weights.mpk";
const OPTIMIZER_ENTRY: &str = "optimizer.mpk";

/// Header of a model bundle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelManifest {
    pub format_version: u32,
    pub version: String,
    pub model: DiceClassifierConfig,
    pub channel_order: ChannelOrder,
    pub input_shape: [usize; 3],
    pub layers: Vec<LayerSpec>,
    /// Class names, index is the label
    pub class_names: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Paths of the files written by [`save_artifacts`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedArtifacts {
    pub version: String,
    pub weights_path: PathBuf,
    pub model_path: PathBuf,
}

pub fn weights_file_name(version: &str) -> String {
    format!("weights_{}.mpk", version)
}

pub fn model_file_name(version: &str) -> String {
    format!("model_{}.tar", version)
}

/// Write the weights file and the full model bundle into `dir`
pub fn save_artifacts<B, O>(
    model: &DiceClassifier<B>,
    optimizer: &O,
    config: &DiceClassifierConfig,
    class_names: &[String],
    dir: &Path,
    version: &str,
) -> Result<SavedArtifacts>
where
    B: AutodiffBackend,
    O: Optimizer<DiceClassifier<B>, B>,
{
    fs::create_dir_all(dir)?;
    let recorder = DefaultRecorder::new();

    let weights_path = dir.join(weights_file_name(version));
    model.clone().save_file(weights_path.clone(), &recorder)?;
    info!("Saved weights to {:?}", weights_path);

    let manifest = ModelManifest {
        format_version: BUNDLE_FORMAT_VERSION,
        version: version.to_string(),
        model: config.clone(),
        channel_order: config.channel_order,
        input_shape: config.input_shape(),
        layers: config.layers()?,
        class_names: class_names.to_vec(),
        created_at: Utc::now(),
    };

    let staging = StagingDir::create(staging_dir(dir, version))?;

    fs::write(
        staging.path().join(MANIFEST_ENTRY),
        serde_json::to_string_pretty(&manifest)?,
    )?;
    model
        .clone()
        .save_file(staging.path().join(WEIGHTS_ENTRY), &recorder)?;
    Recorder::<B>::record(
        &recorder,
        optimizer.to_record(),
        staging.path().join(OPTIMIZER_ENTRY),
    )?;

    let model_path = dir.join(model_file_name(version));
    pack_bundle(staging.path(), &model_path)?;
    info!("Saved full model to {:?}", model_path);

    Ok(SavedArtifacts {
        version: version.to_string(),
        weights_path,
        model_path,
    })
}

fn staging_dir(dir: &Path, version: &str) -> PathBuf {
    dir.join(format!(".model_{}.staging", version))
}

/// Scratch directory for unpacking a bundle next to it
fn unpack_dir(parent: &Path) -> PathBuf {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    parent.join(format!(
        ".bundle_unpack_{}_{}",
        std::process::id(),
        NEXT.fetch_add(1, Ordering::Relaxed)
    ))
}

/// Directory deleted on drop
struct StagingDir(PathBuf);

impl StagingDir {
    fn create(path: PathBuf) -> Result<Self> {
        if path.exists() {
            fs::remove_dir_all(&path)?;
        }
        fs::create_dir_all(&path)?;
        Ok(Self(path))
    }

    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.0) {
            warn!("Failed to remove {:?}: {}", self.0, e);
        }
    }
}

fn pack_bundle(staging: &Path, bundle_path: &Path) -> Result<()> {
    let file = File::create(bundle_path)?;
    let mut builder = tar::Builder::new(file);
    for entry in [MANIFEST_ENTRY, WEIGHTS_ENTRY, OPTIMIZER_ENTRY] {
        builder
            .append_path_with_name(staging.join(entry), entry)
            .map_err(|e| DiceError::Archive(bundle_path.to_path_buf(), e.to_string()))?;
    }
    builder
        .into_inner()
        .map_err(|e| DiceError::Archive(bundle_path.to_path_buf(), e.to_string()))?;
    Ok(())
}

/// Read only the `model.json` header of a bundle
pub fn read_manifest(bundle_path: &Path) -> Result<ModelManifest> {
    let archive_err = |e: std::io::Error| DiceError::Archive(bundle_path.to_path_buf(), e.to_string());

    let mut archive = tar::Archive::new(File::open(bundle_path)?);
    for entry in archive.entries().map_err(archive_err)? {
        let mut entry = entry.map_err(archive_err)?;
        let is_manifest = entry
            .path()
            .map(|p| p == Path::new(MANIFEST_ENTRY))
            .map_err(archive_err)?;
        if is_manifest {
            let mut json = String::new();
            entry.read_to_string(&mut json)?;
            let manifest: ModelManifest = serde_json::from_str(&json)?;
            if manifest.format_version != BUNDLE_FORMAT_VERSION {
                return Err(DiceError::Model(format!(
                    "unsupported bundle format {} in {}",
                    manifest.format_version,
                    bundle_path.display()
                )));
            }
            return Ok(manifest);
        }
    }

    Err(DiceError::Model(format!(
        "{} has no {} entry",
        bundle_path.display(),
        MANIFEST_ENTRY
    )))
}

/// Rebuild the classifier stored in a bundle
pub fn load_model_bundle<B: Backend>(
    bundle_path: &Path,
    device: &B::Device,
) -> Result<(DiceClassifier<B>, ModelManifest)> {
    let manifest = read_manifest(bundle_path)?;
    debug!(
        "Bundle {:?}: version {}, {} layers",
        bundle_path,
        manifest.version,
        manifest.layers.len()
    );

    let parent = bundle_path.parent().unwrap_or_else(|| Path::new("."));
    let staging = StagingDir::create(unpack_dir(parent))?;
    let model = unpack_and_load(bundle_path, staging.path(), &manifest, device)?;

    Ok((model, manifest))
}

fn unpack_and_load<B: Backend>(
    bundle_path: &Path,
    staging: &Path,
    manifest: &ModelManifest,
    device: &B::Device,
) -> Result<DiceClassifier<B>> {
    tar::Archive::new(File::open(bundle_path)?)
        .unpack(staging)
        .map_err(|e| DiceError::Archive(bundle_path.to_path_buf(), e.to_string()))?;

    let model = manifest.model.init::<B>(device)?;
    Ok(model.load_file(staging.join(WEIGHTS_ENTRY), &DefaultRecorder::new(), device)?)
}

/// Load a bare weights file into a classifier built from `config`
pub fn load_weights<B: Backend>(
    weights_path: &Path,
    config: &DiceClassifierConfig,
    device: &B::Device,
) -> Result<DiceClassifier<B>> {
    let model = config.init::<B>(device)?;
    Ok(model.load_file(weights_path.to_path_buf(), &DefaultRecorder::new(), device)?)
}
