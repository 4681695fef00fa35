//! Storage Adapters
//!
//! Implementations of the `SessionStore` port.
//!
//! ## Available Adapters
//!
//! - **PostgresSessionStore** - PostgreSQL via sqlx (production)
//! - **InMemorySessionStore** - process memory (testing/development)

mod in_memory;
mod postgres;

pub use in_memory::InMemorySessionStore;
pub use postgres::PostgresSessionStore;
