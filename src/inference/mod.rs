//! Inference module
//!
//! Restores a trained classifier from its bundle and scores images with it.

pub mod predictor;

pub use predictor::{Prediction, Predictor, DEFAULT_PREDICT_BATCH};
