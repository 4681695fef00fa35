//! Authentication adapters.
//!
//! Implementations of the `SessionValidator` port:
//!
//! - `cookie` - signed session/guest cookies (HS256 JWT)
//! - `mock` - test implementation that doesn't require signed tokens

mod cookie;
mod mock;

pub use cookie::{CookieSessionValidator, CookieValidatorConfig};
pub use mock::MockSessionValidator;
