//! Inbound WebSocket protocol.
//!
//! Every client frame is a JSON envelope `{"type": ..., "payload": ...}`.
//! Outbound frames use the same envelope; see `application::hub::Outbound`.

use serde::Deserialize;

use crate::domain::foundation::{ParticipantId, WorkItemId};
use crate::domain::session::{Command, Estimate};

// ============================================
// Client → Server Messages
// ============================================

/// All message types that can be received from a client.
///
/// Joining is implicit in connecting, so there is no `join` message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Heartbeat request.
    Ping,

    /// Request a fresh private snapshot (after reconnection).
    RequestState,

    Leave,
    Vote(VotePayload),
    RetractVote,
    Reveal,
    ActivateWorkItem(WorkItemPayload),
    SkipWorkItem,
    FinalizePoints(PointsPayload),
    ChangeLeader(LeaderPayload),
    AddWorkItem(NewWorkItemPayload),
    SetSpectator(SpectatorPayload),
    EndSession,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VotePayload {
    pub value: Estimate,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItemPayload {
    pub work_item_id: WorkItemId,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PointsPayload {
    pub points: Estimate,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderPayload {
    pub new_leader: ParticipantId,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewWorkItemPayload {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SpectatorPayload {
    pub spectator: bool,
}

/// What a decoded client message asks the session to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    Command(Command),
    RequestState,
    Ping,
}

impl ClientMessage {
    /// Decode a text or binary frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn into_request(self) -> ClientRequest {
        let command = match self {
            ClientMessage::Ping => return ClientRequest::Ping,
            ClientMessage::RequestState => return ClientRequest::RequestState,
            ClientMessage::Leave => Command::Leave,
            ClientMessage::Vote(p) => Command::Vote { value: p.value },
            ClientMessage::RetractVote => Command::RetractVote,
            ClientMessage::Reveal => Command::Reveal,
            ClientMessage::ActivateWorkItem(p) => Command::ActivateWorkItem {
                work_item_id: p.work_item_id,
            },
            ClientMessage::SkipWorkItem => Command::SkipWorkItem,
            ClientMessage::FinalizePoints(p) => Command::FinalizePoints { points: p.points },
            ClientMessage::ChangeLeader(p) => Command::ChangeLeader {
                new_leader: p.new_leader,
            },
            ClientMessage::AddWorkItem(p) => Command::AddWorkItem {
                title: p.title,
                description: p.description,
            },
            ClientMessage::SetSpectator(p) => Command::SetSpectator {
                spectator: p.spectator,
            },
            ClientMessage::EndSession => Command::EndSession,
        };
        ClientRequest::Command(command)
    }
}
