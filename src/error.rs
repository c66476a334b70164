//! Error types for the VMC engine.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, VmcError>;

#[derive(Debug, Error)]
pub enum VmcError {
    /// Invalid configuration or input shape, detected before any sampling.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The linear solver failed to produce an update for the current step.
    #[error("linear solver failed: {0}")]
    SolverFailure(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
