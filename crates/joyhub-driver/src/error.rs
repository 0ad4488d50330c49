//! Driver errors.

use joyhub_types::ControllerIndex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("controller {0} not found")]
    ControllerNotFound(ControllerIndex),

    #[error("failed to create controller: {0}")]
    Create(String),

    #[error("failed to apply input: {0}")]
    Input(String),

    #[error("macro error: {0}")]
    Macro(String),

    #[error("failed to read controller state: {0}")]
    State(String),

    #[error("driver not available")]
    Unavailable,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
