//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the hub to external systems:
//! - `auth` - identity validation (signed cookies, mock)
//! - `storage` - session persistence (PostgreSQL, in-memory)
//! - `websocket` - live connections over axum WebSockets

pub mod auth;
pub mod storage;
pub mod websocket;

pub use auth::{CookieSessionValidator, CookieValidatorConfig, MockSessionValidator};
pub use storage::{InMemorySessionStore, PostgresSessionStore};
