//! Error types for the accelerator simulator

use thiserror::Error;

/// Result type for simulation operations
pub type SimResult<T> = Result<T, SimError>;

/// Simulation errors
///
/// Every variant is fatal for the layer being simulated. The simulator never
/// retries; the only recovery is fixing the configuration or the input data.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Capacity error: {message}")]
    Capacity { message: String },

    #[error("Window indices may not be empty")]
    EmptyWindows,

    #[error("Precision error: {message}")]
    Precision { message: String },

    #[error("Shape mismatch: {message}")]
    Shape { message: String },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SimError {
    pub fn config(msg: impl Into<String>) -> Self {
        SimError::Config { message: msg.into() }
    }

    pub fn capacity(msg: impl Into<String>) -> Self {
        SimError::Capacity { message: msg.into() }
    }

    pub fn precision(msg: impl Into<String>) -> Self {
        SimError::Precision { message: msg.into() }
    }

    pub fn shape(msg: impl Into<String>) -> Self {
        SimError::Shape { message: msg.into() }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        SimError::Unsupported { message: msg.into() }
    }
}
