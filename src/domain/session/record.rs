//! Initial session state as supplied by the persistence collaborator.

use crate::domain::foundation::{ParticipantId, SessionId, WorkItemId};

use super::participant::Role;
use super::values::{Estimate, SessionKind};
use super::work_item::WorkItem;

/// A persisted roster member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub participant_id: ParticipantId,
    pub display_name: String,
    pub role: Role,
}

/// Everything needed to (re)create a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: SessionId,
    pub kind: SessionKind,
    pub name: String,
    pub leader: Option<ParticipantId>,
    pub auto_finish_voting: bool,
    /// Permitted vote and point values; empty means any value.
    pub allowed_values: Vec<Estimate>,
    pub active_work_item: Option<WorkItemId>,
    /// Whether votes on the active item were already revealed.
    pub revealed: bool,
    pub roster: Vec<RosterEntry>,
    pub work_items: Vec<WorkItem>,
}

impl SessionRecord {
    /// A fresh record with no roster or work items.
    pub fn new(id: SessionId, kind: SessionKind, name: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            name: name.into(),
            leader: None,
            auto_finish_voting: false,
            allowed_values: Vec::new(),
            active_work_item: None,
            revealed: false,
            roster: Vec::new(),
            work_items: Vec::new(),
        }
    }

    pub fn with_leader(mut self, leader: ParticipantId) -> Self {
        self.leader = Some(leader);
        self
    }

    pub fn with_auto_finish_voting(mut self, enabled: bool) -> Self {
        self.auto_finish_voting = enabled;
        self
    }

    pub fn with_allowed_values(mut self, values: Vec<Estimate>) -> Self {
        self.allowed_values = values;
        self
    }

    pub fn with_work_item(mut self, item: WorkItem) -> Self {
        self.work_items.push(item);
        self
    }
}
