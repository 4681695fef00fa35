//! Authentication configuration

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::error::ValidationError;
use super::server::Environment;

/// Minimum signing secret length accepted in production.
const MIN_PRODUCTION_SECRET_BYTES: usize = 32;

/// Identity cookie configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Name of the registered-user session cookie
    #[serde(default = "default_session_cookie")]
    pub session_cookie: String,

    /// Name of the guest cookie
    #[serde(default = "default_guest_cookie")]
    pub guest_cookie: String,

    /// HS256 key shared with the login service
    pub signing_secret: SecretString,

    /// Whether guests may join live sessions
    #[serde(default = "default_allow_guests")]
    pub allow_guests: bool,
}

impl AuthConfig {
    /// Validate authentication configuration
    ///
    /// In production, requires a signing secret of at least 32 bytes.
    pub fn validate(&self, environment: &Environment) -> Result<(), ValidationError> {
        let secret = self.signing_secret.expose_secret();
        if secret.is_empty() {
            return Err(ValidationError::MissingRequired("AUTH__SIGNING_SECRET"));
        }
        if *environment == Environment::Production && secret.len() < MIN_PRODUCTION_SECRET_BYTES {
            return Err(ValidationError::SigningSecretTooShort(
                MIN_PRODUCTION_SECRET_BYTES,
            ));
        }
        if self.session_cookie.is_empty() {
            return Err(ValidationError::MissingRequired("AUTH__SESSION_COOKIE"));
        }
        if self.guest_cookie.is_empty() {
            return Err(ValidationError::MissingRequired("AUTH__GUEST_COOKIE"));
        }
        if self.session_cookie == self.guest_cookie {
            return Err(ValidationError::CookieNameClash);
        }
        Ok(())
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_cookie: default_session_cookie(),
            guest_cookie: default_guest_cookie(),
            signing_secret: SecretString::new(String::new()),
            allow_guests: default_allow_guests(),
        }
    }
}

fn default_session_cookie() -> String {
    "session".to_string()
}

fn default_guest_cookie() -> String {
    "guest".to_string()
}

fn default_allow_guests() -> bool {
    true
}
