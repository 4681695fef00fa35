//! Authentication types for the domain layer.
//!
//! These types represent the identity handed to the hub by the identity
//! collaborator after it has validated a session or guest cookie. They have
//! no provider dependencies; any validator can populate them via the
//! `SessionValidator` port.

use super::ParticipantId;
use thiserror::Error;

/// Identity extracted from a validated session or guest cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    /// Registered user id or guest id.
    pub id: ParticipantId,

    /// Name shown to the other participants.
    pub display_name: String,

    /// Whether this identity is a guest (unregistered) account.
    pub is_guest: bool,
}

impl AuthenticatedUser {
    /// Creates an identity for a registered user.
    pub fn registered(id: ParticipantId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            is_guest: false,
        }
    }

    /// Creates an identity for a guest.
    pub fn guest(id: ParticipantId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            is_guest: true,
        }
    }
}

/// Authentication errors that can occur during cookie/token validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No session or guest credential was presented.
    #[error("Missing credentials")]
    MissingCredentials,

    /// The token is malformed or has an invalid signature.
    #[error("Invalid or expired token")]
    InvalidToken,

    /// The token signature is valid but it has expired.
    #[error("Token expired")]
    TokenExpired,

    /// Guest access is disabled by configuration.
    #[error("Guest access is disabled")]
    GuestsDisabled,

    /// The identity service is unavailable.
    #[error("Auth service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl AuthError {
    /// Creates a service unavailable error with a message.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable(message.into())
    }

    /// Returns true if this is a transient error that may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::ServiceUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guest_constructor_marks_guest() {
        let user = AuthenticatedUser::guest(ParticipantId::new("g-1").unwrap(), "Guest");
        assert!(user.is_guest);
        assert_eq!(user.display_name, "Guest");
    }

    #[test]
    fn only_service_unavailable_is_transient() {
        assert!(AuthError::service_unavailable("down").is_transient());
        assert!(!AuthError::InvalidToken.is_transient());
        assert!(!AuthError::GuestsDisabled.is_transient());
    }
}
