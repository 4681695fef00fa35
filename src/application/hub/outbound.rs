//! Items a session pushes onto a connection's outbound queue.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::foundation::{ErrorCode, Timestamp};
use crate::domain::session::{SessionError, SessionEvent, SessionSnapshot};

/// Unique identifier for one live connection.
///
/// Generated server-side when a client connects. One identity may hold
/// several connections (for example two browser tabs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message sent to exactly one connection. Never broadcast.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum PrivateMessage {
    /// Full state for (re)synchronization.
    SessionSnapshot(SessionSnapshot),
    /// A rejected command or undecodable message.
    Error(ErrorPayload),
    Pong(PongPayload),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    pub timestamp: String,
}

impl ErrorPayload {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.as_str().to_string(),
            message: message.into(),
            timestamp: Timestamp::now().to_rfc3339(),
        }
    }
}

impl From<&SessionError> for ErrorPayload {
    fn from(err: &SessionError) -> Self {
        Self::new(err.code(), err.message())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PongPayload {
    pub timestamp: String,
}

impl PongPayload {
    pub fn now() -> Self {
        Self {
            timestamp: Timestamp::now().to_rfc3339(),
        }
    }
}

/// One frame on a connection's outbound path.
///
/// Both variants serialize to the same `{"type", "payload"}` envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    Event(SessionEvent),
    Private(PrivateMessage),
}

impl Outbound {
    pub fn error(err: &SessionError) -> Self {
        Outbound::Private(PrivateMessage::Error(err.into()))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Outbound::Event(event) => event.name(),
            Outbound::Private(PrivateMessage::SessionSnapshot(_)) => "session_snapshot",
            Outbound::Private(PrivateMessage::Error(_)) => "error",
            Outbound::Private(PrivateMessage::Pong(_)) => "pong",
        }
    }

    /// Whether this is the last frame a connection will receive.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Outbound::Event(event) if event.is_terminal())
    }
}

/// Shared so one broadcast allocates once regardless of audience size.
pub type OutboundFrame = Arc<Outbound>;
pub type OutboundSender = mpsc::Sender<OutboundFrame>;
pub type OutboundReceiver = mpsc::Receiver<OutboundFrame>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::{EndReason, SessionEndedPayload};

    #[test]
    fn private_error_uses_envelope() {
        let frame = Outbound::error(&SessionError::invalid_state("votes already revealed"));
        let json = serde_json::to_value(&frame).unwrap();

        assert_eq!(json["type"], "error");
        assert_eq!(json["payload"]["code"], "EINVALID_STATE");
        assert_eq!(frame.type_name(), "error");
    }

    #[test]
    fn event_frame_serializes_like_the_event() {
        let event = SessionEvent::SessionEnded(SessionEndedPayload {
            reason: EndReason::Shutdown,
        });
        let frame = Outbound::Event(event.clone());

        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            serde_json::to_value(&event).unwrap()
        );
        assert!(frame.is_terminal());
    }

    #[test]
    fn pong_is_not_terminal() {
        let frame = Outbound::Private(PrivateMessage::Pong(PongPayload::now()));
        assert!(!frame.is_terminal());
        assert_eq!(serde_json::to_value(&frame).unwrap()["type"], "pong");
    }
}
