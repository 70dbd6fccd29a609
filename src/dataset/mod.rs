//! Dataset module
//!
//! - `provision`: download and unpack the dataset archive when it is missing
//! - `loader`: scan a split directory into labeled samples
//! - `augmentation`: random affine transforms for the training feed
//! - `feed`: infinite batch sequences over a split directory
//! - `burn_dataset`: Burn batcher turning samples into tensors

pub mod augmentation;
pub mod burn_dataset;
pub mod feed;
pub mod loader;
pub mod provision;

pub use augmentation::{AffineParams, AugmentationPolicy, FillMode};
pub use burn_dataset::{DiceBatch, DiceBatcher, DiceItem};
pub use feed::{DataFeed, FeedIter, FeedOptions, ImageDims};
pub use loader::{ClassDirectory, ImageSample};
pub use provision::{provision, ArchiveFetcher, HttpFetcher, ProvisionOutcome};
