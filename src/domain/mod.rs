//! Domain layer containing business logic and domain types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (IDs, errors, timestamps, auth)
//! - `session` - Estimation session aggregate, commands and events

pub mod foundation;
pub mod session;
