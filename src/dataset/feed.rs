//! Data Feeds
//!
//! A [`DataFeed`] reads one split directory and hands out batches forever.
//! Each pass over the samples yields `ceil(N / B)` batches, the last one
//! possibly short. With `shuffle` on, the sample order is redrawn at the
//! start of every pass.
//!
//! Per sample: decode, convert to RGB8, resize (nearest), optionally
//! augment, rescale, then lay out channels. Decoding runs on the rayon pool;
//! every sample gets its own seed drawn sequentially from the feed RNG, so
//! the output only depends on the feed seed.

use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageReader, RgbImage};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::augmentation::{AugmentationPolicy, FloatImage};
use super::burn_dataset::{DiceBatcher, DiceItem};
use super::loader::{ClassDirectory, ImageSample};
use crate::model::ChannelOrder;
use crate::utils::error::{DiceError, Result};

/// Default rescale factor mapping `u8` pixels into `[0, 1]`
pub const RESCALE: f32 = 1.0 / 255.0;

/// Target image size fed to the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDims {
    pub height: usize,
    pub width: usize,
}

impl Default for ImageDims {
    fn default() -> Self {
        Self {
            height: 480,
            width: 480,
        }
    }
}

/// How a feed turns files into batches
#[derive(Debug, Clone)]
pub struct FeedOptions {
    pub target: ImageDims,
    pub batch_size: usize,
    /// Random affine policy, `None` for evaluation feeds
    pub augmentation: Option<AugmentationPolicy>,
    pub rescale: f32,
    pub shuffle: bool,
    pub channel_order: ChannelOrder,
    pub seed: u64,
}

impl FeedOptions {
    /// Augmenting, shuffling feed
    pub fn training(
        target: ImageDims,
        batch_size: usize,
        policy: AugmentationPolicy,
        channel_order: ChannelOrder,
        seed: u64,
    ) -> Self {
        Self {
            target,
            batch_size,
            augmentation: Some(policy),
            rescale: RESCALE,
            shuffle: true,
            channel_order,
            seed,
        }
    }

    /// Rescale-only feed in file order
    pub fn validation(target: ImageDims, batch_size: usize, channel_order: ChannelOrder) -> Self {
        Self {
            target,
            batch_size,
            augmentation: None,
            rescale: RESCALE,
            shuffle: false,
            channel_order,
            seed: 0,
        }
    }

    /// Shape of one preprocessed sample
    pub fn sample_shape(&self) -> [usize; 3] {
        self.channel_order
            .sample_shape(self.target.height, self.target.width, 3)
    }
}

/// Batches drawn from one split directory
#[derive(Debug, Clone)]
pub struct DataFeed {
    directory: ClassDirectory,
    options: FeedOptions,
}

impl DataFeed {
    /// Scan `dir` and prepare a feed over it
    pub fn new<P: AsRef<Path>>(dir: P, options: FeedOptions) -> Result<Self> {
        if options.batch_size == 0 {
            return Err(DiceError::Config("batch_size must be greater than 0".into()));
        }
        if options.target.height == 0 || options.target.width == 0 {
            return Err(DiceError::Config("target image size must be non-zero".into()));
        }

        let directory = ClassDirectory::scan(dir)?;
        Ok(Self { directory, options })
    }

    pub fn len(&self) -> usize {
        self.directory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directory.is_empty()
    }

    pub fn class_names(&self) -> &[String] {
        &self.directory.class_names
    }

    pub fn options(&self) -> &FeedOptions {
        &self.options
    }

    pub fn root_dir(&self) -> &Path {
        &self.directory.root_dir
    }

    /// Batches in one full pass over the samples
    pub fn batches_per_pass(&self) -> usize {
        self.len().div_ceil(self.options.batch_size)
    }

    /// Batcher matching this feed's sample shape
    pub fn batcher(&self) -> DiceBatcher {
        DiceBatcher::new(self.options.sample_shape())
    }

    /// Start a new, never-ending batch sequence from the feed seed
    pub fn iter(&self) -> FeedIter<'_> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.options.seed);
        let mut order: Vec<usize> = (0..self.len()).collect();
        if self.options.shuffle {
            order.shuffle(&mut rng);
        }

        FeedIter {
            feed: self,
            rng,
            order,
            cursor: 0,
            passes: 0,
            batches: 0,
        }
    }

    fn load_item(&self, sample: &ImageSample, seed: u64) -> Result<DiceItem> {
        let img = load_image(&sample.path)?;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let augmentation = self
            .options
            .augmentation
            .as_ref()
            .map(|policy| (policy, &mut rng));

        let image = preprocess_image(
            &img,
            self.options.target,
            augmentation,
            self.options.rescale,
            self.options.channel_order,
        );

        Ok(DiceItem {
            image,
            label: sample.label,
            path: sample.path.to_string_lossy().to_string(),
        })
    }
}

/// Infinite batch iterator over a [`DataFeed`]
pub struct FeedIter<'a> {
    feed: &'a DataFeed,
    rng: ChaCha8Rng,
    order: Vec<usize>,
    cursor: usize,
    passes: usize,
    batches: usize,
}

impl FeedIter<'_> {
    /// Completed passes over the samples
    pub fn passes(&self) -> usize {
        self.passes
    }

    /// Batches handed out so far
    pub fn batches_yielded(&self) -> usize {
        self.batches
    }
}

impl Iterator for FeedIter<'_> {
    type Item = Result<Vec<DiceItem>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.order.is_empty() {
            return None;
        }

        if self.cursor >= self.order.len() {
            self.cursor = 0;
            self.passes += 1;
            if self.feed.options.shuffle {
                self.order.shuffle(&mut self.rng);
            }
            debug!(
                "Feed {:?} starting pass {}",
                self.feed.root_dir(),
                self.passes + 1
            );
        }

        let end = (self.cursor + self.feed.options.batch_size).min(self.order.len());
        let jobs: Vec<(usize, u64)> = self.order[self.cursor..end]
            .iter()
            .map(|&idx| (idx, self.rng.gen::<u64>()))
            .collect();
        self.cursor = end;
        self.batches += 1;

        let feed = self.feed;
        let batch = jobs
            .par_iter()
            .map(|&(idx, seed)| feed.load_item(&feed.directory.samples[idx], seed))
            .collect::<Result<Vec<_>>>();

        Some(batch)
    }
}

/// Open and decode an image file
pub fn load_image(path: &Path) -> Result<DynamicImage> {
    let to_err = |e: &dyn std::fmt::Display| DiceError::ImageLoad(PathBuf::from(path), e.to_string());

    ImageReader::open(path)
        .map_err(|e| to_err(&e))?
        .with_guessed_format()
        .map_err(|e| to_err(&e))?
        .decode()
        .map_err(|e| to_err(&e))
}

/// Resize, optionally augment, rescale and lay out one image.
///
/// Shared by the feeds and by inference so both see identical inputs.
pub fn preprocess_image(
    img: &DynamicImage,
    target: ImageDims,
    augmentation: Option<(&AugmentationPolicy, &mut ChaCha8Rng)>,
    rescale: f32,
    channel_order: ChannelOrder,
) -> Vec<f32> {
    let rgb = resize_nearest(img.to_rgb8(), target);

    let pixels = match augmentation {
        Some((policy, rng)) => policy.augment(&rgb, rng),
        None => FloatImage::from_rgb(&rgb),
    };

    layout(&pixels, rescale, channel_order)
}

fn resize_nearest(rgb: RgbImage, target: ImageDims) -> RgbImage {
    let (w, h) = (target.width as u32, target.height as u32);
    if rgb.dimensions() == (w, h) {
        rgb
    } else {
        imageops::resize(&rgb, w, h, FilterType::Nearest)
    }
}

fn layout(pixels: &FloatImage, rescale: f32, channel_order: ChannelOrder) -> Vec<f32> {
    match channel_order {
        ChannelOrder::ChannelsLast => pixels.data.iter().map(|v| v * rescale).collect(),
        ChannelOrder::ChannelsFirst => {
            let plane = pixels.height * pixels.width;
            let mut out = vec![0.0f32; 3 * plane];
            for (i, px) in pixels.data.chunks_exact(3).enumerate() {
                for (c, v) in px.iter().enumerate() {
                    out[c * plane + i] = v * rescale;
                }
            }
            out
        }
    }
}
