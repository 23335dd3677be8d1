//! Error types for the datamodeler training harness

use thiserror::Error;

/// Result type alias for datamodeler operations
pub type Result<T> = std::result::Result<T, DatamodelerError>;

/// Main error type for the training harness
#[derive(Error, Debug)]
pub enum DatamodelerError {
    #[error("No data found at {0}")]
    MissingData(String),

    #[error("Please build the model first")]
    ModelNotBuilt,

    #[error("Model not fitted")]
    ModelNotFitted,

    #[error("Unknown {family} model: {name}")]
    UnknownModel { name: String, family: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Data error: {0}")]
    DataError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Feature not found: {0}")]
    FeatureNotFound(String),

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Computation error: {0}")]
    ComputationError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl From<polars::error::PolarsError> for DatamodelerError {
    fn from(err: polars::error::PolarsError) -> Self {
        DatamodelerError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for DatamodelerError {
    fn from(err: serde_json::Error) -> Self {
        DatamodelerError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for DatamodelerError {
    fn from(err: serde_yaml::Error) -> Self {
        DatamodelerError::ConfigError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for DatamodelerError {
    fn from(err: ndarray::ShapeError) -> Self {
        DatamodelerError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}

impl From<ndarray_npy::ReadNpyError> for DatamodelerError {
    fn from(err: ndarray_npy::ReadNpyError) -> Self {
        DatamodelerError::DataError(err.to_string())
    }
}

impl From<ndarray_npy::WriteNpyError> for DatamodelerError {
    fn from(err: ndarray_npy::WriteNpyError) -> Self {
        DatamodelerError::SerializationError(err.to_string())
    }
}
