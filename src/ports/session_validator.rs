//! Identity port for live-session connections.
//!
//! The hub never inspects credentials itself. A connection hands whatever
//! cookies it presented to a `SessionValidator` and receives either an
//! identity or an `AuthError`.

use async_trait::async_trait;

use crate::domain::foundation::{AuthError, AuthenticatedUser};

/// Credentials presented on a connection attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Signed session cookie of a registered user.
    pub session_token: Option<String>,
    /// Signed guest cookie.
    pub guest_token: Option<String>,
}

impl Credentials {
    pub fn is_empty(&self) -> bool {
        self.session_token.is_none() && self.guest_token.is_none()
    }
}

/// Validates connection credentials and extracts the caller's identity.
///
/// # Contract
///
/// Implementations must:
/// - Prefer the session credential over the guest credential when both are present
/// - Return `AuthError::MissingCredentials` when neither is present
/// - Return `AuthError::InvalidToken` for malformed or badly signed tokens
/// - Return `AuthError::TokenExpired` for expired tokens
/// - Return `AuthError::ServiceUnavailable` for transient errors
#[async_trait]
pub trait SessionValidator: Send + Sync {
    async fn validate(&self, credentials: &Credentials) -> Result<AuthenticatedUser, AuthError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::ParticipantId;

    struct FixedValidator;

    #[async_trait]
    impl SessionValidator for FixedValidator {
        async fn validate(
            &self,
            credentials: &Credentials,
        ) -> Result<AuthenticatedUser, AuthError> {
            match &credentials.session_token {
                Some(token) if token == "good" => Ok(AuthenticatedUser::registered(
                    ParticipantId::new("user-1").unwrap(),
                    "Ada",
                )),
                Some(_) => Err(AuthError::InvalidToken),
                None => Err(AuthError::MissingCredentials),
            }
        }
    }

    #[tokio::test]
    async fn validator_returns_identity_for_good_token() {
        let credentials = Credentials {
            session_token: Some("good".into()),
            guest_token: None,
        };
        let user = FixedValidator.validate(&credentials).await.unwrap();
        assert_eq!(user.id.as_str(), "user-1");
    }

    #[tokio::test]
    async fn validator_reports_missing_credentials() {
        let credentials = Credentials::default();
        assert!(credentials.is_empty());
        assert!(matches!(
            FixedValidator.validate(&credentials).await,
            Err(AuthError::MissingCredentials)
        ));
    }

    #[test]
    fn session_validator_is_object_safe() {
        fn _accepts_dyn(_v: &dyn SessionValidator) {}
    }
}
