//! Error Handling Module
//!
//! Defines the error type shared by every pipeline stage.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for plant disease pipeline operations
#[derive(Error, Debug)]
pub enum PlantDiseaseError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error decoding an image file
    #[error("Failed to load image at '{0}': {1}")]
    Image(PathBuf, String),

    /// Malformed dataset directory or sample
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// A directory tree without a single usable image
    #[error("No images found under '{0}'")]
    EmptyDataset(PathBuf),

    /// Number of classes differs from what the model or config expects
    #[error("Class count mismatch: expected {expected} classes, found {found}")]
    ClassCountMismatch { expected: usize, found: usize },

    /// Class names of two directory trees disagree
    #[error("Class vocabulary mismatch between '{reference}' and '{other}': {detail}")]
    VocabularyMismatch {
        reference: PathBuf,
        other: PathBuf,
        detail: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    /// Error during optimisation
    #[error("Training error: {0}")]
    Training(String),

    /// Error while scoring a model
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Burn record (weights file) error
    #[error("Model record error: {0}")]
    Record(String),
}

/// Convenience Result type for the crate
pub type Result<T> = std::result::Result<T, PlantDiseaseError>;

impl From<serde_json::Error> for PlantDiseaseError {
    fn from(err: serde_json::Error) -> Self {
        PlantDiseaseError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for PlantDiseaseError {
    fn from(err: toml::de::Error) -> Self {
        PlantDiseaseError::InvalidConfig(err.to_string())
    }
}

impl From<burn::record::RecorderError> for PlantDiseaseError {
    fn from(err: burn::record::RecorderError) -> Self {
        PlantDiseaseError::Record(format!("{:?}", err))
    }
}

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Wrap the error as a dataset error prefixed with the message `f` builds
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| PlantDiseaseError::Dataset(format!("{}: {}", f(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PlantDiseaseError::Dataset("test error".to_string());
        assert_eq!(format!("{}", err), "Dataset error: test error");
    }

    #[test]
    fn test_class_count_mismatch_display() {
        let err = PlantDiseaseError::ClassCountMismatch {
            expected: 3,
            found: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("expected 3"));
        assert!(msg.contains("found 2"));
    }

    #[test]
    fn test_image_error_names_path() {
        let err = PlantDiseaseError::Image(PathBuf::from("/data/leaf.jpg"), "truncated".into());
        assert!(format!("{}", err).contains("leaf.jpg"));
    }

    #[test]
    fn test_result_context() {
        let result: std::result::Result<i32, std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file not found",
        ));

        let err = result
            .with_context(|| "Failed to read directory".to_string())
            .unwrap_err();
        assert!(matches!(err, PlantDiseaseError::Dataset(_)));
        assert!(err.to_string().contains("Failed to read directory"));
    }

    #[test]
    fn test_toml_error_converts() {
        let parsed: std::result::Result<toml::Table, _> = toml::from_str("[training\n");
        let err: PlantDiseaseError = parsed.unwrap_err().into();
        assert!(matches!(err, PlantDiseaseError::InvalidConfig(_)));
    }

    #[test]
    fn test_json_error_converts() {
        let parsed: std::result::Result<Vec<f64>, _> = serde_json::from_str("{not json");
        let err: PlantDiseaseError = parsed.unwrap_err().into();
        assert!(matches!(err, PlantDiseaseError::Serialization(_)));
    }
}
