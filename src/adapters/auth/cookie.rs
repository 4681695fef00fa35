//! Signed cookie adapter for connection identity.
//!
//! Registered users carry a session cookie and guests a guest cookie. Both
//! are HS256 JWTs signed with the shared secret and validated here:
//!
//! 1. Prefer the session cookie; fall back to the guest cookie
//! 2. Verify signature and expiry
//! 3. Map `sub` / `name` claims to `AuthenticatedUser`
//!
//! # Example
//!
//! ```ignore
//! let validator = CookieSessionValidator::new(CookieValidatorConfig {
//!     signing_secret: SecretString::new("dev-secret".into()),
//!     allow_guests: true,
//! });
//! let user = validator.validate(&credentials).await?;
//! ```

use async_trait::async_trait;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::domain::foundation::{AuthError, AuthenticatedUser, ParticipantId};
use crate::ports::{Credentials, SessionValidator};

/// Display name used when a guest token carries none.
const DEFAULT_GUEST_NAME: &str = "Guest";

/// Configuration for the cookie validator.
#[derive(Clone)]
pub struct CookieValidatorConfig {
    pub signing_secret: SecretString,
    pub allow_guests: bool,
}

/// Claims carried by session and guest cookies.
#[derive(Debug, Serialize, Deserialize)]
struct IdentityClaims {
    /// User id or guest id.
    sub: String,

    /// Expiry timestamp (Unix epoch seconds)
    exp: i64,

    #[serde(default)]
    name: Option<String>,
}

/// Validates signed session and guest cookies.
pub struct CookieSessionValidator {
    decoding_key: DecodingKey,
    encoding_key: EncodingKey,
    allow_guests: bool,
}

impl CookieSessionValidator {
    pub fn new(config: CookieValidatorConfig) -> Self {
        let secret = config.signing_secret.expose_secret().as_bytes();
        Self {
            decoding_key: DecodingKey::from_secret(secret),
            encoding_key: EncodingKey::from_secret(secret),
            allow_guests: config.allow_guests,
        }
    }

    /// Sign a token for `id`, valid until `expires_at` (Unix seconds).
    ///
    /// Cookie issuance belongs to the login flow; this exists so tools and
    /// tests can mint tokens with the same key.
    pub fn issue(
        &self,
        id: &ParticipantId,
        name: Option<&str>,
        expires_at: i64,
    ) -> Result<String, AuthError> {
        let claims = IdentityClaims {
            sub: id.as_str().to_string(),
            exp: expires_at,
            name: name.map(str::to_string),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key).map_err(|e| {
            tracing::error!("Failed to sign identity token: {}", e);
            AuthError::service_unavailable(format!("Failed to sign token: {}", e))
        })
    }

    fn decode_claims(&self, token: &str) -> Result<IdentityClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "sub"]);

        decode::<IdentityClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                use jsonwebtoken::errors::ErrorKind;
                match e.kind() {
                    ErrorKind::ExpiredSignature => {
                        tracing::debug!("Identity token expired");
                        AuthError::TokenExpired
                    }
                    _ => {
                        tracing::debug!("Identity token rejected: {}", e);
                        AuthError::InvalidToken
                    }
                }
            })
    }
}

#[async_trait]
impl SessionValidator for CookieSessionValidator {
    async fn validate(&self, credentials: &Credentials) -> Result<AuthenticatedUser, AuthError> {
        if let Some(token) = &credentials.session_token {
            let claims = self.decode_claims(token)?;
            let id = ParticipantId::new(claims.sub).map_err(|_| AuthError::InvalidToken)?;
            let name = claims.name.unwrap_or_else(|| id.as_str().to_string());
            return Ok(AuthenticatedUser::registered(id, name));
        }

        if let Some(token) = &credentials.guest_token {
            if !self.allow_guests {
                return Err(AuthError::GuestsDisabled);
            }
            let claims = self.decode_claims(token)?;
            let id = ParticipantId::new(claims.sub).map_err(|_| AuthError::InvalidToken)?;
            let name = claims
                .name
                .unwrap_or_else(|| DEFAULT_GUEST_NAME.to_string());
            return Ok(AuthenticatedUser::guest(id, name));
        }

        Err(AuthError::MissingCredentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(allow_guests: bool) -> CookieSessionValidator {
        CookieSessionValidator::new(CookieValidatorConfig {
            signing_secret: SecretString::new("test-secret".to_string()),
            allow_guests,
        })
    }

    fn in_one_hour() -> i64 {
        chrono::Utc::now().timestamp() + 3600
    }

    fn pid(s: &str) -> ParticipantId {
        ParticipantId::new(s).unwrap()
    }

    #[tokio::test]
    async fn session_cookie_yields_registered_user() {
        let v = validator(true);
        let token = v.issue(&pid("user-1"), Some("Ada"), in_one_hour()).unwrap();

        let user = v
            .validate(&Credentials {
                session_token: Some(token),
                guest_token: None,
            })
            .await
            .unwrap();

        assert_eq!(user.id, pid("user-1"));
        assert_eq!(user.display_name, "Ada");
        assert!(!user.is_guest);
    }

    #[tokio::test]
    async fn guest_cookie_yields_guest() {
        let v = validator(true);
        let token = v.issue(&pid("guest-9"), None, in_one_hour()).unwrap();

        let user = v
            .validate(&Credentials {
                session_token: None,
                guest_token: Some(token),
            })
            .await
            .unwrap();

        assert!(user.is_guest);
        assert_eq!(user.display_name, DEFAULT_GUEST_NAME);
    }

    #[tokio::test]
    async fn guests_can_be_disabled() {
        let v = validator(false);
        let token = v.issue(&pid("guest-9"), None, in_one_hour()).unwrap();

        let result = v
            .validate(&Credentials {
                session_token: None,
                guest_token: Some(token),
            })
            .await;

        assert_eq!(result, Err(AuthError::GuestsDisabled));
    }

    #[tokio::test]
    async fn expired_token_is_reported() {
        let v = validator(true);
        let token = v.issue(&pid("user-1"), None, 1_000).unwrap();

        let result = v
            .validate(&Credentials {
                session_token: Some(token),
                guest_token: None,
            })
            .await;

        assert_eq!(result, Err(AuthError::TokenExpired));
    }

    #[tokio::test]
    async fn token_signed_with_other_secret_is_invalid() {
        let other = CookieSessionValidator::new(CookieValidatorConfig {
            signing_secret: SecretString::new("other-secret".to_string()),
            allow_guests: true,
        });
        let token = other.issue(&pid("user-1"), None, in_one_hour()).unwrap();

        let result = validator(true)
            .validate(&Credentials {
                session_token: Some(token),
                guest_token: None,
            })
            .await;

        assert_eq!(result, Err(AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn no_cookies_is_missing_credentials() {
        let result = validator(true).validate(&Credentials::default()).await;
        assert_eq!(result, Err(AuthError::MissingCredentials));
    }
}
