//! Model Configuration Module
//!
//! Channel layout, declared topology and the shape arithmetic shared by the
//! classifier and the artifact bundle.

use serde::{Deserialize, Serialize};

use crate::utils::error::{DiceError, Result};

/// Kernel size of every convolution in the classifier
pub const KERNEL_SIZE: usize = 3;

/// Output channels of the three convolution blocks
pub const CONV_FILTERS: [usize; 3] = [32, 32, 64];

/// Width of the hidden dense layer
pub const HIDDEN_UNITS: usize = 64;

/// Position of the channel axis in a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelOrder {
    /// `[C, H, W]` per sample, `[N, C, H, W]` per batch
    #[default]
    ChannelsFirst,
    /// `[H, W, C]` per sample, `[N, H, W, C]` per batch
    ChannelsLast,
}

impl ChannelOrder {
    /// Shape of a single sample in this layout
    pub fn sample_shape(&self, height: usize, width: usize, channels: usize) -> [usize; 3] {
        match self {
            ChannelOrder::ChannelsFirst => [channels, height, width],
            ChannelOrder::ChannelsLast => [height, width, channels],
        }
    }

    pub fn is_channels_last(&self) -> bool {
        matches!(self, ChannelOrder::ChannelsLast)
    }
}

impl std::fmt::Display for ChannelOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelOrder::ChannelsFirst => write!(f, "channels_first"),
            ChannelOrder::ChannelsLast => write!(f, "channels_last"),
        }
    }
}

/// One entry of the declared layer stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerSpec {
    Conv2d {
        in_channels: usize,
        out_channels: usize,
        kernel: [usize; 2],
    },
    Relu,
    MaxPool2d {
        kernel: [usize; 2],
        stride: [usize; 2],
    },
    Flatten,
    Linear {
        in_features: usize,
        out_features: usize,
    },
    Dropout {
        prob: f64,
    },
    Sigmoid,
}

impl std::fmt::Display for LayerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayerSpec::Conv2d {
                in_channels,
                out_channels,
                kernel,
            } => write!(
                f,
                "Conv2d({} -> {}, {}x{})",
                in_channels, out_channels, kernel[0], kernel[1]
            ),
            LayerSpec::Relu => write!(f, "ReLU"),
            LayerSpec::MaxPool2d { kernel, stride } => write!(
                f,
                "MaxPool2d({}x{}, stride {}x{})",
                kernel[0], kernel[1], stride[0], stride[1]
            ),
            LayerSpec::Flatten => write!(f, "Flatten"),
            LayerSpec::Linear {
                in_features,
                out_features,
            } => write!(f, "Linear({} -> {})", in_features, out_features),
            LayerSpec::Dropout { prob } => write!(f, "Dropout({})", prob),
            LayerSpec::Sigmoid => write!(f, "Sigmoid"),
        }
    }
}

/// Spatial size after one valid 3x3 convolution followed by a 2x2/2 pool.
///
/// `None` when the input is too small for the block.
pub fn block_output_size(size: usize) -> Option<usize> {
    let conv = size.checked_sub(KERNEL_SIZE - 1)?;
    let pooled = conv / 2;
    (pooled > 0).then_some(pooled)
}

/// Height and width of the feature map after all three blocks
pub fn feature_map_dims(height: usize, width: usize) -> Result<(usize, usize)> {
    let mut h = height;
    let mut w = width;
    for _ in CONV_FILTERS {
        h = block_output_size(h).ok_or_else(|| too_small(height, width))?;
        w = block_output_size(w).ok_or_else(|| too_small(height, width))?;
    }
    Ok((h, w))
}

/// Input width of the first dense layer
pub fn flattened_features(height: usize, width: usize) -> Result<usize> {
    let (h, w) = feature_map_dims(height, width)?;
    Ok(CONV_FILTERS[CONV_FILTERS.len() - 1] * h * w)
}

fn too_small(height: usize, width: usize) -> DiceError {
    DiceError::Config(format!(
        "image size {}x{} is too small for three conv/pool blocks",
        height, width
    ))
}
