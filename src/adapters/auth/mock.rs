//! Mock identity adapter for testing.
//!
//! Maps raw cookie values straight to identities, so tests can connect as
//! anyone without signing tokens.
//!
//! # Example
//!
//! ```ignore
//! let validator = MockSessionValidator::new()
//!     .with_test_user("token-f", "facilitator")
//!     .with_guest("guest-token", "guest-1");
//! ```

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::domain::foundation::{AuthError, AuthenticatedUser, ParticipantId};
use crate::ports::{Credentials, SessionValidator};

/// Mock session validator for testing.
///
/// Session and guest tokens share one map. Unknown tokens return `InvalidToken`.
#[derive(Debug, Default)]
pub struct MockSessionValidator {
    /// Map of valid tokens to their associated users
    tokens: RwLock<HashMap<String, AuthenticatedUser>>,
    /// Optional error to return for all validations (for error testing)
    force_error: RwLock<Option<AuthError>>,
}

impl MockSessionValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a valid token that maps to a user.
    pub fn with_user(self, token: impl Into<String>, user: AuthenticatedUser) -> Self {
        self.add_token(token, user);
        self
    }

    /// Adds a registered user whose display name is derived from the id.
    pub fn with_test_user(self, token: impl Into<String>, user_id: &str) -> Self {
        match ParticipantId::new(user_id) {
            Ok(id) => {
                let user = AuthenticatedUser::registered(id, format!("User {}", user_id));
                self.with_user(token, user)
            }
            Err(_) => self,
        }
    }

    /// Adds a guest identity.
    pub fn with_guest(self, token: impl Into<String>, guest_id: &str) -> Self {
        match ParticipantId::new(guest_id) {
            Ok(id) => self.with_user(token, AuthenticatedUser::guest(id, "Guest")),
            Err(_) => self,
        }
    }

    /// Forces all validations to return the specified error.
    pub fn with_error(self, error: AuthError) -> Self {
        *self
            .force_error
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(error);
        self
    }

    /// Registers a new valid token at runtime.
    pub fn add_token(&self, token: impl Into<String>, user: AuthenticatedUser) {
        self.tokens
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(token.into(), user);
    }

    fn lookup(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        self.tokens
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }
}

#[async_trait]
impl SessionValidator for MockSessionValidator {
    async fn validate(&self, credentials: &Credentials) -> Result<AuthenticatedUser, AuthError> {
        if let Some(error) = self
            .force_error
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
        {
            return Err(error);
        }

        match (&credentials.session_token, &credentials.guest_token) {
            (Some(token), _) | (None, Some(token)) => self.lookup(token),
            (None, None) => Err(AuthError::MissingCredentials),
        }
    }
}
