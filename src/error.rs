use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CalibError {
    /// Estimator used out of order (update before initialize, double initialize, ...).
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("io error on {path}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },
    #[error("json error in {path}: {source}")]
    Json { path: PathBuf, #[source] source: serde_json::Error },
}

pub type Result<T> = std::result::Result<T, CalibError>;

impl CalibError {
    pub fn shape(msg: impl Into<String>) -> Self { CalibError::ShapeMismatch(msg.into()) }
    pub fn config(msg: impl Into<String>) -> Self { CalibError::Config(msg.into()) }
    pub fn state(msg: impl Into<String>) -> Self { CalibError::InvalidState(msg.into()) }
}
