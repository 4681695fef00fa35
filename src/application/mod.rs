//! Application layer.
//!
//! Hosts the session hub: the registry of live sessions, their single-writer
//! workers and the background durable writer that feeds the `SessionStore`.

pub mod hub;

pub use hub::{Attachment, Hub, HubSettings, SessionHandle};
