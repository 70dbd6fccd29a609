//! Model module
//!
//! The binary dice classifier and the configuration it is built from.

pub mod cnn;
pub mod config;

pub use cnn::{DiceClassifier, DiceClassifierConfig};
pub use config::{ChannelOrder, LayerSpec};

/// Probability above which a prediction counts as class `1`
pub const DECISION_THRESHOLD: f64 = 0.5;
