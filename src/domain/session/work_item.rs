//! Work item entity: a story or plan being estimated.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{ParticipantId, StateMachine, ValidationError, WorkItemId};

use super::values::{validate_description, validate_title, Estimate};

/// Lifecycle of a work item.
///
/// ```text
/// Pending ──activate──▶ Active ──reveal──▶ Voted ──finalize──▶ Finalized
///    ▲                    │                  │                    │
///    └──────skip──────────┴──────skip────────┘                    │
///                         ▲                                        │
///                         └────────────── re-activate ─────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkItemStatus {
    Pending,
    Active,
    Voted,
    Finalized,
}

impl StateMachine for WorkItemStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use WorkItemStatus::*;
        matches!(
            (self, target),
            (Pending, Active)
                | (Active, Voted)
                | (Active, Pending)
                | (Voted, Finalized)
                | (Voted, Active)
                | (Voted, Pending)
                | (Finalized, Active)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use WorkItemStatus::*;
        match self {
            Pending => vec![Active],
            Active => vec![Voted, Pending],
            Voted => vec![Finalized, Active, Pending],
            Finalized => vec![Active],
        }
    }
}

/// One participant's vote on a work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub participant_id: ParticipantId,
    pub value: Estimate,
}

/// A revealed round of votes, kept as read-only history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRound {
    pub votes: Vec<Vote>,
}

/// A unit of work being estimated.
///
/// # Invariants
///
/// - `votes` holds at most one vote per participant, in submission order
/// - `votes` is only mutated while the item is `Active`
/// - `points` is set whenever the status is `Finalized`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    id: WorkItemId,
    title: String,
    description: Option<String>,
    position: u32,
    status: WorkItemStatus,
    points: Option<Estimate>,
    votes: Vec<Vote>,
    history: Vec<VoteRound>,
}

impl WorkItem {
    /// Create a new pending work item.
    ///
    /// # Errors
    ///
    /// - `ValidationError` if the title is empty or either field is too long
    pub fn new(
        id: WorkItemId,
        title: &str,
        description: Option<String>,
        position: u32,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            id,
            title: validate_title(title)?,
            description: validate_description(description)?,
            position,
            status: WorkItemStatus::Pending,
            points: None,
            votes: Vec::new(),
            history: Vec::new(),
        })
    }

    /// Reconstitute a work item from persistence (no validation).
    #[allow(clippy::too_many_arguments)]
    pub fn reconstitute(
        id: WorkItemId,
        title: String,
        description: Option<String>,
        position: u32,
        status: WorkItemStatus,
        points: Option<Estimate>,
        votes: Vec<Vote>,
        history: Vec<VoteRound>,
    ) -> Self {
        Self {
            id,
            title,
            description,
            position,
            status,
            points,
            votes,
            history,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn id(&self) -> &WorkItemId {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn position(&self) -> u32 {
        self.position
    }

    pub fn status(&self) -> WorkItemStatus {
        self.status
    }

    pub fn points(&self) -> Option<&Estimate> {
        self.points.as_ref()
    }

    /// Votes of the current round, in submission order.
    pub fn votes(&self) -> &[Vote] {
        &self.votes
    }

    pub fn history(&self) -> &[VoteRound] {
        &self.history
    }

    pub fn has_voted(&self, participant_id: &ParticipantId) -> bool {
        self.votes.iter().any(|v| &v.participant_id == participant_id)
    }

    pub fn vote_of(&self, participant_id: &ParticipantId) -> Option<&Estimate> {
        self.votes
            .iter()
            .find(|v| &v.participant_id == participant_id)
            .map(|v| &v.value)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutations (driven by the session aggregate)
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a vote. A repeat vote replaces the earlier one and moves to
    /// the end of the submission order.
    pub(crate) fn cast_vote(&mut self, participant_id: ParticipantId, value: Estimate) {
        self.votes.retain(|v| v.participant_id != participant_id);
        self.votes.push(Vote {
            participant_id,
            value,
        });
    }

    /// Remove a vote. Returns whether one was present.
    pub(crate) fn retract_vote(&mut self, participant_id: &ParticipantId) -> bool {
        let before = self.votes.len();
        self.votes.retain(|v| &v.participant_id != participant_id);
        before != self.votes.len()
    }

    /// Start (or restart) a voting round on this item.
    pub(crate) fn activate(&mut self) -> Result<(), ValidationError> {
        let next = match self.status {
            WorkItemStatus::Active => WorkItemStatus::Active,
            other => other.transition_to(WorkItemStatus::Active)?,
        };
        self.close_round();
        self.status = next;
        Ok(())
    }

    /// Freeze the current round.
    pub(crate) fn reveal(&mut self) -> Result<(), ValidationError> {
        self.status = self.status.transition_to(WorkItemStatus::Voted)?;
        Ok(())
    }

    /// Return the item to the backlog without finalizing it.
    pub(crate) fn deactivate(&mut self) -> Result<(), ValidationError> {
        let next = self.status.transition_to(WorkItemStatus::Pending)?;
        self.close_round();
        self.status = next;
        Ok(())
    }

    /// Record the agreed point value.
    pub(crate) fn finalize(&mut self, points: Estimate) -> Result<(), ValidationError> {
        let next = self.status.transition_to(WorkItemStatus::Finalized)?;
        self.close_round();
        self.status = next;
        self.points = Some(points);
        Ok(())
    }

    /// Clear the current votes, archiving them if they had been revealed.
    /// Must run before the status changes.
    fn close_round(&mut self) {
        let votes = std::mem::take(&mut self.votes);
        if self.status == WorkItemStatus::Voted && !votes.is_empty() {
            self.history.push(VoteRound { votes });
        }
    }
}
