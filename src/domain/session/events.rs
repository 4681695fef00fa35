//! Session events and read views.
//!
//! Events describe one accepted state transition and are broadcast to every
//! connection registered with the session. They serialize to the outbound
//! envelope `{"type": ..., "payload": {...}}`.
//!
//! Views are the shapes participants and work items take on the wire. Vote
//! values never appear in a view of an unrevealed round; only the fact that
//! someone voted does.

use serde::Serialize;

use crate::domain::foundation::{ParticipantId, SessionId, WorkItemId};

use super::participant::Role;
use super::values::{Estimate, SessionKind};
use super::work_item::{Vote, VoteRound, WorkItemStatus};

/// An immutable notification describing a state delta.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A participant connected (first join, or rejoin after disconnect).
    ParticipantJoined(ParticipantView),
    /// A participant's last connection went away.
    ParticipantLeft(ParticipantRef),
    /// A disconnected participant's grace window expired.
    ParticipantRemoved(ParticipantRef),
    /// Someone voted. The value is withheld until reveal.
    VoteCast(VoteCastPayload),
    /// Someone withdrew their vote.
    VoteRetracted(VoteCastPayload),
    VotesRevealed(VotesRevealedPayload),
    WorkItemActivated(WorkItemRef),
    WorkItemSkipped(WorkItemRef),
    WorkItemAdded(WorkItemView),
    PlanFinalized(PlanFinalizedPayload),
    LeaderChanged(LeaderChangedPayload),
    RoleChanged(RoleChangedPayload),
    /// Terminal: the session is closing and every connection will be dropped.
    SessionEnded(SessionEndedPayload),
}

impl SessionEvent {
    /// The wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::ParticipantJoined(_) => "participant_joined",
            SessionEvent::ParticipantLeft(_) => "participant_left",
            SessionEvent::ParticipantRemoved(_) => "participant_removed",
            SessionEvent::VoteCast(_) => "vote_cast",
            SessionEvent::VoteRetracted(_) => "vote_retracted",
            SessionEvent::VotesRevealed(_) => "votes_revealed",
            SessionEvent::WorkItemActivated(_) => "work_item_activated",
            SessionEvent::WorkItemSkipped(_) => "work_item_skipped",
            SessionEvent::WorkItemAdded(_) => "work_item_added",
            SessionEvent::PlanFinalized(_) => "plan_finalized",
            SessionEvent::LeaderChanged(_) => "leader_changed",
            SessionEvent::RoleChanged(_) => "role_changed",
            SessionEvent::SessionEnded(_) => "session_ended",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionEvent::SessionEnded(_))
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Payloads
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRef {
    pub participant_id: ParticipantId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteCastPayload {
    pub work_item_id: WorkItemId,
    pub participant_id: ParticipantId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VotesRevealedPayload {
    pub work_item_id: WorkItemId,
    /// All recorded votes, in submission order.
    pub votes: Vec<Vote>,
    /// True when the reveal was triggered by the last required vote.
    pub automatic: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItemRef {
    pub work_item_id: WorkItemId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanFinalizedPayload {
    pub work_item_id: WorkItemId,
    pub points: Estimate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderChangedPayload {
    pub previous_leader: Option<ParticipantId>,
    pub new_leader: ParticipantId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleChangedPayload {
    pub participant_id: ParticipantId,
    pub role: Role,
}

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The facilitator ended the session.
    EndedByFacilitator,
    /// The hub shut the session down (process shutdown or explicit teardown).
    Shutdown,
    /// The session worker hit an unrecoverable fault.
    InternalError,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEndedPayload {
    pub reason: EndReason,
}

// ════════════════════════════════════════════════════════════════════════════
// Views
// ════════════════════════════════════════════════════════════════════════════

/// Public view of a participant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub participant_id: ParticipantId,
    pub display_name: String,
    pub role: Role,
    pub connected: bool,
    /// Whether the participant has voted on the active work item.
    pub has_voted: bool,
}

/// Public view of a work item.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItemView {
    pub work_item_id: WorkItemId,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub position: u32,
    pub status: WorkItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points: Option<Estimate>,
    /// Who has voted in the current round.
    pub voters: Vec<ParticipantId>,
    /// Values of the current round; empty until revealed.
    pub votes: Vec<Vote>,
    pub history: Vec<VoteRound>,
}

/// Full session state, sent privately to one connection for resync.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub kind: SessionKind,
    pub name: String,
    pub leader: Option<ParticipantId>,
    pub auto_finish_voting: bool,
    pub allowed_values: Vec<Estimate>,
    pub active_work_item_id: Option<WorkItemId>,
    pub revealed: bool,
    pub participants: Vec<ParticipantView>,
    pub work_items: Vec<WorkItemView>,
    /// The viewer's own vote on the active item, even before reveal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub your_vote: Option<Estimate>,
}
