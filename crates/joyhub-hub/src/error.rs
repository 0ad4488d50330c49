//! Hub errors.

use std::time::Duration;

use joyhub_types::{ControllerIndex, ErrorCode, MacroHandle, SessionId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("session {0} is not connected")]
    SessionNotFound(SessionId),

    #[error("controller {0} not found")]
    ControllerNotFound(ControllerIndex),

    #[error("session is not attached to a controller")]
    NotAttached,

    #[error("no macro is running for this session")]
    NoRunningMacro,

    #[error("macro {0} is already running for this session")]
    MacroAlreadyRunning(MacroHandle),

    #[error("administrative actions are disabled")]
    Forbidden,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("driver error: {0}")]
    Driver(#[from] joyhub_driver::DriverError),

    #[error("driver call timed out after {0:?}")]
    DriverTimeout(Duration),

    #[error("storage error: {0}")]
    Store(#[from] joyhub_store::StoreError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HubError {
    /// Wire category reported to clients.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::SessionNotFound(_)
            | Self::ControllerNotFound(_)
            | Self::NotAttached
            | Self::NoRunningMacro => ErrorCode::NotFound,
            Self::MacroAlreadyRunning(_) => ErrorCode::Conflict,
            Self::Forbidden => ErrorCode::Forbidden,
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::Driver(_) | Self::DriverTimeout(_) => ErrorCode::DriverFailure,
            Self::Store(_) => ErrorCode::Storage,
            Self::Config(_) | Self::Other(_) => ErrorCode::Internal,
        }
    }
}
