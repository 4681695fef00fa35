//! Session-specific error types.

use crate::domain::foundation::{DomainError, ErrorCode, ValidationError};

/// Errors from command processing and session lifecycle.
///
/// Every variant is reported privately to the submitting connection; none
/// of them changes session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Malformed command or value.
    Invalid(String),
    /// The identity lacks the role the command requires.
    Unauthorized(String),
    /// The command is not legal in the current phase.
    InvalidState(String),
    /// Unknown work item, participant or session.
    NotFound(String),
    /// The persistence collaborator failed.
    Storage(String),
    /// The session stopped accepting messages.
    Ended,
    /// Fault inside the hub.
    Internal(String),
}

impl SessionError {
    pub fn invalid(message: impl Into<String>) -> Self {
        SessionError::Invalid(message.into())
    }
    pub fn unauthorized(message: impl Into<String>) -> Self {
        SessionError::Unauthorized(message.into())
    }
    pub fn invalid_state(message: impl Into<String>) -> Self {
        SessionError::InvalidState(message.into())
    }
    pub fn not_found(message: impl Into<String>) -> Self {
        SessionError::NotFound(message.into())
    }
    pub fn storage(message: impl Into<String>) -> Self {
        SessionError::Storage(message.into())
    }
    pub fn internal(message: impl Into<String>) -> Self {
        SessionError::Internal(message.into())
    }
    pub fn code(&self) -> ErrorCode {
        match self {
            SessionError::Invalid(_) => ErrorCode::Invalid,
            SessionError::Unauthorized(_) => ErrorCode::Unauthorized,
            SessionError::InvalidState(_) => ErrorCode::InvalidState,
            SessionError::NotFound(_) => ErrorCode::NotFound,
            SessionError::Storage(_) => ErrorCode::Storage,
            SessionError::Ended => ErrorCode::InvalidState,
            SessionError::Internal(_) => ErrorCode::Internal,
        }
    }
    pub fn message(&self) -> String {
        match self {
            SessionError::Invalid(msg) => format!("Invalid command: {}", msg),
            SessionError::Unauthorized(msg) => format!("Not permitted: {}", msg),
            SessionError::InvalidState(msg) => format!("Invalid state: {}", msg),
            SessionError::NotFound(msg) => format!("Not found: {}", msg),
            SessionError::Storage(msg) => format!("Storage error: {}", msg),
            SessionError::Ended => "Session has ended".to_string(),
            SessionError::Internal(msg) => format!("Internal error: {}", msg),
        }
    }
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message())
    }
}

impl std::error::Error for SessionError {}

impl From<ValidationError> for SessionError {
    fn from(err: ValidationError) -> Self {
        SessionError::Invalid(err.to_string())
    }
}

impl From<DomainError> for SessionError {
    fn from(err: DomainError) -> Self {
        match err.code {
            ErrorCode::Invalid => SessionError::Invalid(err.message),
            ErrorCode::Unauthorized => SessionError::Unauthorized(err.message),
            ErrorCode::InvalidState => SessionError::InvalidState(err.message),
            ErrorCode::NotFound => SessionError::NotFound(err.message),
            ErrorCode::Storage => SessionError::Storage(err.message),
            ErrorCode::Internal => SessionError::Internal(err.message),
        }
    }
}
