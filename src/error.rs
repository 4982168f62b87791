//! Crate-wide error type.

use crate::schema::ConfigError;

/// Errors produced by grid, evolver, loss and simulation operations.
#[derive(Debug, thiserror::Error)]
pub enum NcaError {
    #[error("Buffer length {actual} does not match grid shape (expected {expected})")]
    ShapeMismatch { expected: usize, actual: usize },
    #[error("Unknown preset: {0}")]
    UnknownPreset(String),
    #[error("Unknown loss type: {0}")]
    UnknownLossType(String),
    #[error("Unknown activation: {0}")]
    UnknownActivation(String),
    #[error("{0} is not implemented")]
    NotImplemented(&'static str),
    #[error("Incompatible parameters: {0}")]
    ParameterMismatch(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, NcaError>;
