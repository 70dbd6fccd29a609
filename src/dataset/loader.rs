//! Labeled Directory Loader
//!
//! Scans a split directory laid out as one subdirectory per class:
//!
//! ```text
//! data/train/
//! ├── <class a>/
//! │   ├── 0001.jpg
//! │   ├── extra/0002.png
//! │   └── ...
//! └── <class b>/
//!     └── ...
//! ```
//!
//! Labels follow the lexicographic order of the class directory names.
//! Images are collected from the whole tree below each class directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::utils::error::{DiceError, Result};

/// File extensions accepted as images, compared case-insensitively
pub const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "bmp", "ppm", "tif", "tiff"];

/// Number of classes a split directory must contain
pub const NUM_CLASSES: usize = 2;

/// A single image sample with its label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSample {
    /// Path to the image file
    pub path: PathBuf,
    /// Class label index (0 or 1)
    pub label: usize,
}

/// The samples of one split directory
#[derive(Debug, Clone)]
pub struct ClassDirectory {
    /// Root of the split
    pub root_dir: PathBuf,
    /// Class names, index is the label
    pub class_names: Vec<String>,
    /// Samples ordered by label, then by path
    pub samples: Vec<ImageSample>,
}

impl ClassDirectory {
    /// Scan a split directory.
    ///
    /// Fails when the directory is missing, does not hold exactly two class
    /// subdirectories, or holds no images at all.
    pub fn scan<P: AsRef<Path>>(root_dir: P) -> Result<Self> {
        let root_dir = root_dir.as_ref().to_path_buf();
        debug!("Scanning class directories in {:?}", root_dir);

        if !root_dir.is_dir() {
            return Err(DiceError::Dataset(format!(
                "directory does not exist: {}",
                root_dir.display()
            )));
        }

        let mut class_names: Vec<String> = Vec::new();
        for entry in std::fs::read_dir(&root_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    class_names.push(name.to_string());
                }
            }
        }
        class_names.sort();

        if class_names.len() != NUM_CLASSES {
            return Err(DiceError::Dataset(format!(
                "expected {} class directories in {}, found {}: {:?}",
                NUM_CLASSES,
                root_dir.display(),
                class_names.len(),
                class_names
            )));
        }

        let mut samples = Vec::new();
        for (label, class_name) in class_names.iter().enumerate() {
            let mut paths: Vec<PathBuf> = WalkDir::new(root_dir.join(class_name))
                .min_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .filter(|p| is_image_file(p))
                .collect();
            paths.sort();

            debug!(
                "Class '{}' (label {}): {} images",
                class_name,
                label,
                paths.len()
            );
            samples.extend(paths.into_iter().map(|path| ImageSample { path, label }));
        }

        if samples.is_empty() {
            return Err(DiceError::Dataset(format!(
                "no images found under {}",
                root_dir.display()
            )));
        }

        info!(
            "Found {} images in {} classes under {:?}",
            samples.len(),
            class_names.len(),
            root_dir
        );

        Ok(Self {
            root_dir,
            class_names,
            samples,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of samples per label
    pub fn class_counts(&self) -> [usize; NUM_CLASSES] {
        let mut counts = [0; NUM_CLASSES];
        for sample in &self.samples {
            counts[sample.label] += 1;
        }
        counts
    }
}

/// Whether a path carries one of the accepted image extensions
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}
