//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the hub and the outside world. Adapters implement these ports.
//!
//! - `SessionStore` - loads session state and persists facts
//! - `SessionValidator` - turns connection credentials into an identity

mod session_store;
mod session_validator;

pub use session_store::{apply_write, SessionStore};
pub use session_validator::{Credentials, SessionValidator};
