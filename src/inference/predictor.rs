//! Inference Predictor Module
//!
//! Scores images with a classifier restored from a model bundle. Images go
//! through the same resize, rescale and channel layout as the validation
//! feed, without augmentation.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use burn::prelude::*;
use burn::tensor::ElementConversion;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::artifacts::{load_model_bundle, ModelManifest};
use crate::dataset::feed::{load_image, preprocess_image, RESCALE};
use crate::dataset::ImageDims;
use crate::model::{DiceClassifier, DECISION_THRESHOLD};
use crate::utils::error::Result;

/// Result of a single prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    /// Path to the input image (if applicable)
    pub image_path: Option<PathBuf>,

    /// Sigmoid output, probability of class `1`
    pub probability: f32,

    /// `1` when `probability > 0.5`
    pub label: usize,

    pub class_name: String,

    pub inference_time_ms: f64,
}

impl Prediction {
    pub fn new(
        probability: f32,
        class_names: &[String],
        inference_time: Duration,
        image_path: Option<PathBuf>,
    ) -> Self {
        let label = usize::from(f64::from(probability) > DECISION_THRESHOLD);
        let class_name = class_names
            .get(label)
            .cloned()
            .unwrap_or_else(|| label.to_string());

        Self {
            image_path,
            probability,
            label,
            class_name,
            inference_time_ms: inference_time.as_secs_f64() * 1000.0,
        }
    }

    /// Probability of the predicted class
    pub fn confidence(&self) -> f32 {
        if self.label == 1 {
            self.probability
        } else {
            1.0 - self.probability
        }
    }

    pub fn display(&self) -> String {
        let mut output = String::new();
        if let Some(path) = &self.image_path {
            output.push_str(&format!("Image: {:?}\n", path));
        }
        output.push_str(&format!(
            "Prediction: {} (class {}), p = {:.4}\n",
            self.class_name, self.label, self.probability
        ));
        output.push_str(&format!("Confidence: {:.2}%\n", self.confidence() * 100.0));
        output.push_str(&format!("Inference time: {:.2} ms\n", self.inference_time_ms));
        output
    }
}

/// Images decoded and scored together by `predict_batch`
pub const DEFAULT_PREDICT_BATCH: usize = 16;

/// A restored classifier plus what it needs to preprocess inputs
pub struct Predictor<B: Backend> {
    model: DiceClassifier<B>,
    manifest: ModelManifest,
    device: B::Device,
    batch_size: usize,
}

impl<B: Backend> Predictor<B> {
    /// Load a `model_<version>.tar` bundle
    pub fn from_bundle(bundle_path: &Path, device: &B::Device) -> Result<Self> {
        let (model, manifest) = load_model_bundle::<B>(bundle_path, device)?;
        Ok(Self::new(model, manifest, device.clone()))
    }

    pub fn new(model: DiceClassifier<B>, manifest: ModelManifest, device: B::Device) -> Self {
        Self {
            model,
            manifest,
            device,
            batch_size: DEFAULT_PREDICT_BATCH,
        }
    }

    /// Cap on the images held in memory by `predict_batch`; `0` is treated as `1`
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn manifest(&self) -> &ModelManifest {
        &self.manifest
    }

    fn dims(&self) -> ImageDims {
        ImageDims {
            height: self.manifest.model.input_height,
            width: self.manifest.model.input_width,
        }
    }

    fn preprocess(&self, image: &DynamicImage) -> Vec<f32> {
        preprocess_image(
            image,
            self.dims(),
            None,
            RESCALE,
            self.manifest.channel_order,
        )
    }

    /// Probabilities for a set of decoded images, in input order
    pub fn probabilities(&self, images: &[DynamicImage]) -> Vec<f32> {
        if images.is_empty() {
            return Vec::new();
        }

        let [d0, d1, d2] = self.manifest.input_shape;
        let data: Vec<f32> = images.iter().flat_map(|img| self.preprocess(img)).collect();
        let input = Tensor::<B, 1>::from_floats(data.as_slice(), &self.device)
            .reshape([images.len(), d0, d1, d2]);

        self.model
            .forward_probability(input)
            .into_data()
            .iter::<B::FloatElem>()
            .map(|p| p.elem::<f32>())
            .collect()
    }

    pub fn predict_image(&self, image: &DynamicImage) -> Prediction {
        let start = Instant::now();
        let probability = self.probabilities(std::slice::from_ref(image))[0];
        Prediction::new(
            probability,
            &self.manifest.class_names,
            start.elapsed(),
            None,
        )
    }

    pub fn predict_file(&self, path: &Path) -> Result<Prediction> {
        let image = load_image(path)?;
        let mut prediction = self.predict_image(&image);
        prediction.image_path = Some(path.to_path_buf());
        Ok(prediction)
    }

    /// Score files in input order, one forward pass per `batch_size` chunk
    pub fn predict_batch(&self, paths: &[PathBuf]) -> Result<Vec<Prediction>> {
        let mut predictions = Vec::with_capacity(paths.len());

        for chunk in paths.chunks(self.batch_size) {
            let images = chunk
                .iter()
                .map(|p| load_image(p))
                .collect::<Result<Vec<_>>>()?;

            let start = Instant::now();
            let probabilities = self.probabilities(&images);
            let per_image = start.elapsed() / chunk.len() as u32;

            predictions.extend(chunk.iter().zip(probabilities).map(|(path, p)| {
                Prediction::new(p, &self.manifest.class_names, per_image, Some(path.clone()))
            }));
        }

        Ok(predictions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::save_artifacts;
    use crate::config::TrainingConfig;
    use crate::model::DiceClassifierConfig;
    use crate::training::TrainingRun;
    use burn::backend::Autodiff;
    use burn::module::AutodiffModule;
    use burn_ndarray::NdArray;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn names() -> Vec<String> {
        vec!["five".to_string(), "six".to_string()]
    }

    #[test]
    fn test_prediction_threshold() {
        let low = Prediction::new(0.5, &names(), Duration::ZERO, None);
        assert_eq!(low.label, 0);
        assert_eq!(low.class_name, "five");

        let high = Prediction::new(0.9, &names(), Duration::ZERO, None);
        assert_eq!(high.label, 1);
        assert_eq!(high.class_name, "six");
        assert!((high.confidence() - 0.9).abs() < 1e-6);
        assert!((Prediction::new(0.2, &names(), Duration::ZERO, None).confidence() - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_predictor_matches_model_output() {
        type TrainB = Autodiff<NdArray>;
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let config = DiceClassifierConfig::new()
            .with_input_height(24)
            .with_input_width(24);
        let model = config.init::<TrainB>(&device).unwrap();
        let optimizer = TrainingRun::optimizer_config(&TrainingConfig::default())
            .init::<TrainB, DiceClassifier<TrainB>>();
        let saved = save_artifacts(&model, &optimizer, &config, &names(), dir.path(), "t").unwrap();

        let predictor = Predictor::<NdArray>::from_bundle(&saved.model_path, &device).unwrap();
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(48, 40, Rgb([10, 200, 90])));
        let prediction = predictor.predict_image(&image);

        let expected_input = preprocess_image(
            &image,
            ImageDims { height: 24, width: 24 },
            None,
            RESCALE,
            config.channel_order,
        );
        let tensor = Tensor::<NdArray, 1>::from_floats(expected_input.as_slice(), &device)
            .reshape([1, 3, 24, 24]);
        let expected: f32 = model.valid().forward_probability(tensor).into_scalar().elem();

        assert!((prediction.probability - expected).abs() < 1e-5);
        assert!((0.0..=1.0).contains(&prediction.probability));
    }

    fn small_predictor() -> Predictor<NdArray> {
        let device = Default::default();
        let config = DiceClassifierConfig::new()
            .with_input_height(24)
            .with_input_width(24);
        let model = config.init::<NdArray>(&device).unwrap();
        let manifest = ModelManifest {
            format_version: crate::artifacts::bundle::BUNDLE_FORMAT_VERSION,
            version: "t".into(),
            model: config.clone(),
            channel_order: config.channel_order,
            input_shape: config.input_shape(),
            layers: config.layers().unwrap(),
            class_names: names(),
            created_at: chrono::Utc::now(),
        };
        Predictor::new(model, manifest, device)
    }

    #[test]
    fn test_empty_batch() {
        let predictor = small_predictor();

        assert!(predictor.probabilities(&[]).is_empty());
        assert!(predictor.predict_batch(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_batch_is_scored_in_chunks_in_order() {
        let dir = TempDir::new().unwrap();
        let paths: Vec<PathBuf> = (0..5u8)
            .map(|i| {
                let path = dir.path().join(format!("img_{}.png", i));
                RgbImage::from_fn(30, 26, |x, y| {
                    Rgb([(x * 7 + u32::from(i) * 40) as u8, (y * 5) as u8, i * 30])
                })
                .save(&path)
                .unwrap();
                path
            })
            .collect();

        let predictor = small_predictor().with_batch_size(2);
        assert_eq!(predictor.batch_size(), 2);

        let batched = predictor.predict_batch(&paths).unwrap();

        assert_eq!(batched.len(), 5);
        for (path, prediction) in paths.iter().zip(&batched) {
            assert_eq!(prediction.image_path.as_ref(), Some(path));
            let single = predictor.predict_file(path).unwrap();
            assert!((prediction.probability - single.probability).abs() < 1e-5);
        }
    }

    #[test]
    fn test_zero_batch_size_falls_back_to_one() {
        let predictor = small_predictor().with_batch_size(0);
        assert_eq!(predictor.batch_size(), 1);
        assert_eq!(small_predictor().batch_size(), DEFAULT_PREDICT_BATCH);
    }
}
