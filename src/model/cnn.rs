//! CNN Model Architecture for Dice Classification
//!
//! Three valid-padded conv/pool blocks followed by a small dense head with a
//! single output unit. The network returns logits; the probability that an
//! image belongs to class `1` is the sigmoid of that logit.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, Relu,
    },
    tensor::{activation::sigmoid, backend::Backend, Tensor},
};

use super::config::{
    flattened_features, ChannelOrder, LayerSpec, CONV_FILTERS, HIDDEN_UNITS, KERNEL_SIZE,
};
use crate::utils::error::Result as ModelResult;

/// Configuration for the DiceClassifier CNN model
#[derive(Config, Debug)]
pub struct DiceClassifierConfig {
    /// Input image height in pixels
    #[config(default = "480")]
    pub input_height: usize,

    /// Input image width in pixels
    #[config(default = "480")]
    pub input_width: usize,

    /// Number of input channels (3 for RGB)
    #[config(default = "3")]
    pub in_channels: usize,

    /// Dropout rate before the output layer
    #[config(default = "0.5")]
    pub dropout_rate: f64,

    /// Layout of the batches fed to `forward`
    #[config(default = "ChannelOrder::ChannelsFirst")]
    pub channel_order: ChannelOrder,
}

impl DiceClassifierConfig {
    /// Shape of one input sample in the configured layout
    pub fn input_shape(&self) -> [usize; 3] {
        self.channel_order
            .sample_shape(self.input_height, self.input_width, self.in_channels)
    }

    /// Declared layer stack, in execution order
    pub fn layers(&self) -> ModelResult<Vec<LayerSpec>> {
        let flat = flattened_features(self.input_height, self.input_width)?;
        let mut layers = Vec::with_capacity(15);
        let mut in_channels = self.in_channels;

        for out_channels in CONV_FILTERS {
            layers.push(LayerSpec::Conv2d {
                in_channels,
                out_channels,
                kernel: [KERNEL_SIZE, KERNEL_SIZE],
            });
            layers.push(LayerSpec::Relu);
            layers.push(LayerSpec::MaxPool2d {
                kernel: [2, 2],
                stride: [2, 2],
            });
            in_channels = out_channels;
        }

        layers.extend([
            LayerSpec::Flatten,
            LayerSpec::Linear {
                in_features: flat,
                out_features: HIDDEN_UNITS,
            },
            LayerSpec::Relu,
            LayerSpec::Dropout {
                prob: self.dropout_rate,
            },
            LayerSpec::Linear {
                in_features: HIDDEN_UNITS,
                out_features: 1,
            },
            LayerSpec::Sigmoid,
        ]);

        Ok(layers)
    }

    /// Build the classifier, failing when the image size cannot pass the
    /// three conv/pool blocks.
    pub fn init<B: Backend>(&self, device: &B::Device) -> ModelResult<DiceClassifier<B>> {
        let flat = flattened_features(self.input_height, self.input_width)?;
        Ok(DiceClassifier::new(self, flat, device))
    }
}

/// Conv2d (valid) -> ReLU -> MaxPool2d(2x2, stride 2)
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    pub conv: Conv2d<B>,
    pub relu: Relu,
    pub pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [KERNEL_SIZE, KERNEL_SIZE])
                .init(device),
            relu: Relu::new(),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.relu.forward(x);
        self.pool.forward(x)
    }
}

/// Binary dice classifier
#[derive(Module, Debug)]
pub struct DiceClassifier<B: Backend> {
    pub block1: ConvBlock<B>,
    pub block2: ConvBlock<B>,
    pub block3: ConvBlock<B>,

    pub fc1: Linear<B>,
    pub relu: Relu,
    pub dropout: Dropout,
    pub fc2: Linear<B>,

    /// Inputs arrive as `[N, H, W, C]` and are permuted before the first block
    channels_last: bool,
}

impl<B: Backend> DiceClassifier<B> {
    fn new(config: &DiceClassifierConfig, flat: usize, device: &B::Device) -> Self {
        let [c1, c2, c3] = CONV_FILTERS;

        Self {
            block1: ConvBlock::new(config.in_channels, c1, device),
            block2: ConvBlock::new(c1, c2, device),
            block3: ConvBlock::new(c2, c3, device),
            fc1: LinearConfig::new(flat, HIDDEN_UNITS).init(device),
            relu: Relu::new(),
            dropout: DropoutConfig::new(config.dropout_rate).init(),
            fc2: LinearConfig::new(HIDDEN_UNITS, 1).init(device),
            channels_last: config.channel_order.is_channels_last(),
        }
    }

    /// Forward pass returning logits of shape `[batch, 1]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = if self.channels_last {
            x.permute([0, 3, 1, 2])
        } else {
            x
        };

        let x = self.block1.forward(x);
        let x = self.block2.forward(x);
        let x = self.block3.forward(x);

        let x: Tensor<B, 2> = x.flatten(1, 3);
        let x = self.fc1.forward(x);
        let x = self.relu.forward(x);
        let x = self.dropout.forward(x);
        self.fc2.forward(x)
    }

    /// Forward pass with the output sigmoid applied
    pub fn forward_probability(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        sigmoid(self.forward(x))
    }

    pub fn channel_order(&self) -> ChannelOrder {
        if self.channels_last {
            ChannelOrder::ChannelsLast
        } else {
            ChannelOrder::ChannelsFirst
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn small_config() -> DiceClassifierConfig {
        DiceClassifierConfig::new()
            .with_input_height(32)
            .with_input_width(40)
    }

    #[test]
    fn test_default_config_is_480_rgb() {
        let config = DiceClassifierConfig::new();
        assert_eq!(config.input_shape(), [3, 480, 480]);
        assert_eq!(config.dropout_rate, 0.5);
    }

    #[test]
    fn test_config_json_round_trip() {
        let config = small_config()
            .with_dropout_rate(0.25)
            .with_channel_order(ChannelOrder::ChannelsLast);

        let json = serde_json::to_string(&config).unwrap();
        let restored: DiceClassifierConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.input_shape(), [32, 40, 3]);
        assert_eq!(restored.dropout_rate, 0.25);
        assert_eq!(restored.channel_order, ChannelOrder::ChannelsLast);
    }

    #[test]
    fn test_channels_last_input_shape() {
        let config = DiceClassifierConfig::new()
            .with_input_width(320)
            .with_channel_order(ChannelOrder::ChannelsLast);
        assert_eq!(config.input_shape(), [480, 320, 3]);
    }

    #[test]
    fn test_output_shape_channels_first() {
        let device = Default::default();
        let model = small_config().init::<TestBackend>(&device).unwrap();

        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 32, 40], &device);
        let output = model.forward(input);

        assert_eq!(output.dims(), [2, 1]);
    }

    #[test]
    fn test_output_shape_channels_last() {
        let device = Default::default();
        let model = small_config()
            .with_channel_order(ChannelOrder::ChannelsLast)
            .init::<TestBackend>(&device)
            .unwrap();

        let input = Tensor::<TestBackend, 4>::zeros([3, 32, 40, 3], &device);
        let output = model.forward(input);

        assert_eq!(output.dims(), [3, 1]);
        assert_eq!(model.channel_order(), ChannelOrder::ChannelsLast);
    }

    #[test]
    fn test_probability_in_unit_interval() {
        let device = Default::default();
        let model = small_config().init::<TestBackend>(&device).unwrap();

        let input = Tensor::<TestBackend, 4>::ones([2, 3, 32, 40], &device);
        let probs = model.forward_probability(input).into_data();

        for p in probs.iter::<f32>() {
            assert!((0.0..=1.0).contains(&p));
        }
    }

    #[test]
    fn test_layers_topology() {
        let layers = small_config().layers().unwrap();

        assert_eq!(layers.len(), 15);
        assert_eq!(
            layers[0],
            LayerSpec::Conv2d {
                in_channels: 3,
                out_channels: 32,
                kernel: [3, 3]
            }
        );
        // 32x40 -> 2x3 after three blocks
        assert_eq!(
            layers[10],
            LayerSpec::Linear {
                in_features: 64 * 2 * 3,
                out_features: 64
            }
        );
        assert_eq!(layers.last(), Some(&LayerSpec::Sigmoid));
    }

    #[test]
    fn test_tiny_image_rejected() {
        let device = Default::default();
        let result = DiceClassifierConfig::new()
            .with_input_height(8)
            .with_input_width(8)
            .init::<TestBackend>(&device);
        assert!(result.is_err());
    }
}
