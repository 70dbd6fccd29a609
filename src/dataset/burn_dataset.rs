//! Burn Batcher Integration
//!
//! Turns preprocessed [`DiceItem`]s into the tensors the classifier consumes.

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use serde::{Deserialize, Serialize};

/// A single preprocessed sample ready for Burn
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiceItem {
    /// Rescaled pixels, flattened in the feed's channel order
    pub image: Vec<f32>,
    /// Class label (0 or 1)
    pub label: usize,
    /// Image path (for debugging/logging)
    pub path: String,
}

/// A batch of images and binary targets
#[derive(Clone, Debug)]
pub struct DiceBatch<B: Backend> {
    /// `[N, C, H, W]` or `[N, H, W, C]`
    pub images: Tensor<B, 4>,
    /// `[N, 1]`
    pub targets: Tensor<B, 2, Int>,
}

/// Batcher stacking items of one fixed sample shape
#[derive(Clone, Debug)]
pub struct DiceBatcher {
    sample_shape: [usize; 3],
}

impl DiceBatcher {
    /// `sample_shape` is the per-item shape in the feed's channel order
    pub fn new(sample_shape: [usize; 3]) -> Self {
        Self { sample_shape }
    }

    pub fn sample_shape(&self) -> [usize; 3] {
        self.sample_shape
    }
}

impl<B: Backend> Batcher<B, DiceItem, DiceBatch<B>> for DiceBatcher {
    fn batch(&self, items: Vec<DiceItem>, device: &B::Device) -> DiceBatch<B> {
        let batch_size = items.len();
        let [d1, d2, d3] = self.sample_shape;

        let mut images_data = Vec::with_capacity(batch_size * d1 * d2 * d3);
        let mut targets_data = Vec::with_capacity(batch_size);
        for item in items {
            images_data.extend(item.image);
            targets_data.push(item.label as i64);
        }

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, d1, d2, d3]),
            device,
        );
        let targets =
            Tensor::<B, 2, Int>::from_data(TensorData::new(targets_data, [batch_size, 1]), device);

        DiceBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn item(value: f32, label: usize) -> DiceItem {
        DiceItem {
            image: vec![value; 3 * 4 * 5],
            label,
            path: format!("img_{}.jpg", label),
        }
    }

    #[test]
    fn test_batch_shapes() {
        let device = Default::default();
        let batcher = DiceBatcher::new([3, 4, 5]);

        let batch: DiceBatch<TestBackend> =
            batcher.batch(vec![item(0.1, 0), item(0.9, 1), item(0.5, 1)], &device);

        assert_eq!(batch.images.dims(), [3, 3, 4, 5]);
        assert_eq!(batch.targets.dims(), [3, 1]);
    }

    #[test]
    fn test_batch_preserves_labels_and_pixels() {
        let device = Default::default();
        let batcher = DiceBatcher::new([4, 5, 3]);

        let batch: DiceBatch<TestBackend> = batcher.batch(vec![item(0.25, 1), item(0.75, 0)], &device);

        let targets: Vec<i64> = batch.targets.into_data().iter::<i64>().collect();
        assert_eq!(targets, vec![1, 0]);

        let first = batch.images.clone().slice([0..1]).mean().into_scalar();
        let second = batch.images.slice([1..2]).mean().into_scalar();
        assert!((first - 0.25).abs() < 1e-6);
        assert!((second - 0.75).abs() < 1e-6);
    }
}
