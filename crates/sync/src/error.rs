use familyflow_auth::{PasswordError, SessionError};
use familyflow_core::DomainError;
use thiserror::Error;

/// Failures surfaced to callers of the sync layer.
///
/// `NetworkUnavailable` only reaches a caller for operations without an
/// offline path (households, availability checks with no local data). Task
/// mutations absorb it into a pending row.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("rejected: {0}")]
    ValidationRejected(String),

    #[error("session is not authorized")]
    Unauthorized,

    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("local storage failure: {0}")]
    StorageFailure(String),

    #[error("already taken: {0}")]
    ConflictDuringAuth(String),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("not found")]
    NotFound,

    #[error("remote error {status}: {message}")]
    Remote { status: u16, message: String },
}

pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    pub fn storage(err: impl core::fmt::Display) -> Self {
        Self::StorageFailure(err.to_string())
    }

    /// Map an explicit remote rejection. `auth` selects the 409 reading used
    /// by register and login.
    pub fn from_status(status: u16, message: String, auth: bool) -> Self {
        match status {
            400 | 422 => Self::ValidationRejected(message),
            401 | 403 => Self::Unauthorized,
            404 => Self::NotFound,
            409 if auth => Self::ConflictDuringAuth(message),
            _ => Self::Remote { status, message },
        }
    }
}

impl From<DomainError> for SyncError {
    fn from(err: DomainError) -> Self {
        Self::ValidationRejected(err.to_string())
    }
}

impl From<anyhow::Error> for SyncError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("local store failure: {err:#}");
        Self::StorageFailure(format!("{err:#}"))
    }
}

impl From<SessionError> for SyncError {
    fn from(err: SessionError) -> Self {
        tracing::error!("session persistence failure: {err}");
        Self::StorageFailure(err.to_string())
    }
}

impl From<PasswordError> for SyncError {
    fn from(err: PasswordError) -> Self {
        tracing::error!("password hashing failure: {err}");
        Self::StorageFailure(err.to_string())
    }
}
