//! WebSocket adapters for live estimation sessions.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  handler: cookie validation, upgrade, route kind check       │
//! └──────────────────────────────────────────────────────────────┘
//!                              │ Hub::connect
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │  connection: read task ──► session queue                     │
//! │              write task ◄── bounded outbound queue           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`messages`] - inbound message protocol
//! - [`connection`] - transport-neutral connection loop
//! - [`handler`] - Axum WebSocket upgrade handlers

pub mod connection;
pub mod handler;
pub mod messages;

pub use connection::{run_connection, Frame};
pub use handler::{
    battle_ws_handler, credentials_from_headers, storyboard_ws_handler, websocket_router,
    CookieNames, LiveApiError, WebSocketState,
};
pub use messages::{ClientMessage, ClientRequest};
