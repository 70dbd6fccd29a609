//! Error Handling Module
//!
//! Defines the error type shared by every stage of the training pipeline.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for dice trainer operations
#[derive(Error, Debug)]
pub enum DiceError {
    /// Fetching the dataset archive failed
    #[error("Download of '{url}' failed: {reason}")]
    Download { url: String, reason: String },

    /// The dataset archive could not be unpacked
    #[error("Failed to extract archive '{0}': {1}")]
    Archive(PathBuf, String),

    /// Error loading or decoding an image
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// Dataset layout problems (missing splits, wrong class count, no images)
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Error with model construction or shape checks
    #[error("Model error: {0}")]
    Model(String),

    /// Burn recorder failure while saving or loading parameters
    #[error("Record error: {0}")]
    Record(String),

    /// Error during the optimization loop
    #[error("Training error: {0}")]
    Training(String),

    /// Pushing an artifact to the object store failed
    #[error("Upload of '{key}' failed: {reason}")]
    Upload { key: String, reason: String },

    /// No usable credentials for the object store
    #[error("Credentials error: {0}")]
    Credentials(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parse error
    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML write error
    #[error("Config write error: {0}")]
    TomlWrite(#[from] toml::ser::Error),
}

impl From<burn::record::RecorderError> for DiceError {
    fn from(err: burn::record::RecorderError) -> Self {
        DiceError::Record(format!("{:?}", err))
    }
}

/// Convenience Result type for dice trainer operations
pub type Result<T> = std::result::Result<T, DiceError>;

impl DiceError {
    pub fn download(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Download {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn upload(key: impl Into<String>, reason: impl ToString) -> Self {
        Self::Upload {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DiceError::Dataset("test error".to_string());
        assert_eq!(format!("{}", err), "Dataset error: test error");
    }

    #[test]
    fn test_image_load_error() {
        let path = PathBuf::from("/path/to/die.jpg");
        let err = DiceError::ImageLoad(path, "file not found".to_string());
        assert!(format!("{}", err).contains("die.jpg"));
    }

    #[test]
    fn test_upload_error_names_key() {
        let err = DiceError::upload("dice/models/model_0.1.0_x", "403 Forbidden");
        let msg = err.to_string();
        assert!(msg.contains("dice/models/model_0.1.0_x"));
        assert!(msg.contains("403"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: DiceError = io_err.into();
        assert!(matches!(err, DiceError::Io(_)));
    }
}
