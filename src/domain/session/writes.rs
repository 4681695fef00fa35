//! Durable facts the session hands to the persistence collaborator.
//!
//! The aggregate only describes what must be written; the application layer
//! decides when and how (asynchronously, with retries for finalize-class
//! writes).

use crate::domain::foundation::{ParticipantId, WorkItemId};

use super::participant::Role;
use super::values::Estimate;

/// A roster fact to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterChange {
    Joined { display_name: String, role: Role },
    Left,
    /// Removed from the live roster after the reconnect grace window.
    Expired,
    RoleChanged { role: Role },
}

impl RosterChange {
    pub fn as_str(&self) -> &'static str {
        match self {
            RosterChange::Joined { .. } => "joined",
            RosterChange::Left => "left",
            RosterChange::Expired => "expired",
            RosterChange::RoleChanged { .. } => "role_changed",
        }
    }
}

/// One write against the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageWrite {
    RecordVote {
        work_item_id: WorkItemId,
        participant_id: ParticipantId,
        value: Estimate,
    },
    RetractVote {
        work_item_id: WorkItemId,
        participant_id: ParticipantId,
    },
    RevealVotes {
        work_item_id: WorkItemId,
    },
    FinalizeWorkItem {
        work_item_id: WorkItemId,
        points: Estimate,
    },
    SetActiveWorkItem {
        work_item_id: Option<WorkItemId>,
    },
    SaveWorkItem {
        work_item_id: WorkItemId,
        title: String,
        description: Option<String>,
        position: u32,
    },
    SaveRosterChange {
        participant_id: ParticipantId,
        change: RosterChange,
    },
}

impl StorageWrite {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            StorageWrite::RecordVote { .. } => "record_vote",
            StorageWrite::RetractVote { .. } => "retract_vote",
            StorageWrite::RevealVotes { .. } => "reveal_votes",
            StorageWrite::FinalizeWorkItem { .. } => "finalize_work_item",
            StorageWrite::SetActiveWorkItem { .. } => "set_active_work_item",
            StorageWrite::SaveWorkItem { .. } => "save_work_item",
            StorageWrite::SaveRosterChange { .. } => "save_roster_change",
        }
    }

    /// Finalize-class writes are retried with backoff; losing them loses
    /// the outcome of an estimation round.
    pub fn is_finalize_class(&self) -> bool {
        matches!(
            self,
            StorageWrite::FinalizeWorkItem { .. } | StorageWrite::SaveWorkItem { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalize_and_new_items_are_finalize_class() {
        let finalize = StorageWrite::FinalizeWorkItem {
            work_item_id: WorkItemId::new(),
            points: Estimate::new("5").unwrap(),
        };
        let vote = StorageWrite::RecordVote {
            work_item_id: WorkItemId::new(),
            participant_id: ParticipantId::new("a").unwrap(),
            value: Estimate::new("3").unwrap(),
        };
        assert!(finalize.is_finalize_class());
        assert!(!vote.is_finalize_class());
        assert_eq!(vote.kind(), "record_vote");
    }
}
