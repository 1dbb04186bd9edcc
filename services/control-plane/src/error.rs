//! Service error types and their response codes.

use thiserror::Error;

use crate::auth::AuthError;
use crate::configuration::TaskDescriptionError;
use crate::model::{Response, ResponseCode};
use crate::scheduler::{LaunchError, ScheduleError};
use crate::store::StoreError;

/// Failure of a control-plane operation.
#[derive(Debug, Error)]
pub enum ControlError {
    /// Malformed input or a rejected configuration.
    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    AuthFailed(String),

    /// The scheduler refused the request in its current state.
    #[error("{0}")]
    ScheduleConflict(String),

    /// A compare-and-swap precondition did not hold.
    #[error("{0}")]
    CasConflict(String),

    #[error("{0}")]
    NotFound(String),

    /// A collaborator (quota, maintenance, backup, recovery) failed.
    #[error("{0}")]
    Subsystem(String),

    #[error("{0}")]
    Interrupted(String),

    #[error("{0}")]
    Timeout(String),

    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),

    /// A rewrite carried an invalid configuration; the whole batch aborted.
    #[error("invalid rewritten configuration: {0}")]
    FatalRewrite(#[source] TaskDescriptionError),
}

impl ControlError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn subsystem(message: impl Into<String>) -> Self {
        Self::Subsystem(message.into())
    }

    pub fn code(&self) -> ResponseCode {
        match self {
            Self::InvalidRequest(_) | Self::ScheduleConflict(_) => ResponseCode::InvalidRequest,
            Self::AuthFailed(_) => ResponseCode::AuthFailed,
            Self::CasConflict(_) | Self::NotFound(_) => ResponseCode::Warning,
            Self::Subsystem(_)
            | Self::Interrupted(_)
            | Self::Timeout(_)
            | Self::Storage(_)
            | Self::FatalRewrite(_) => ResponseCode::Error,
        }
    }
}

impl From<AuthError> for ControlError {
    fn from(err: AuthError) -> Self {
        Self::AuthFailed(err.to_string())
    }
}

impl From<ScheduleError> for ControlError {
    fn from(err: ScheduleError) -> Self {
        Self::ScheduleConflict(err.to_string())
    }
}

impl From<LaunchError> for ControlError {
    fn from(err: LaunchError) -> Self {
        match err {
            LaunchError::Schedule(err) => err.into(),
            LaunchError::InvalidConfig(err) => {
                Self::Subsystem(format!("Invalid task description: {err}"))
            }
        }
    }
}

impl<T> From<ControlError> for Response<T> {
    fn from(err: ControlError) -> Self {
        Response::new(err.code(), err.to_string())
    }
}

/// Result type for control-plane operations.
pub type ControlResult<T> = Result<T, ControlError>;
