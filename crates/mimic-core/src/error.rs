//! Error types for the mimic pipeline.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Model loading error: {0}")]
    ModelLoad(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Shape mismatch for {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: String,
        actual: String,
    },

    #[error("Smooth camera strategy requires a first-frame camera anchor")]
    MissingAnchor,

    #[error("No transfer parameters computed; call transfer_params first")]
    NoTransfer,
}

pub type Result<T> = std::result::Result<T, Error>;
