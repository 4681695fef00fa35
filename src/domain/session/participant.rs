//! Participant entity: one identity's membership within a session.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::foundation::ParticipantId;

/// Role a participant plays in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Advances items, reveals and finalizes. Held by the session leader.
    Facilitator,
    /// Casts votes.
    Voter,
    /// Watches without voting.
    Spectator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Facilitator => "facilitator",
            Role::Voter => "voter",
            Role::Spectator => "spectator",
        }
    }

    /// Whether this role may cast votes.
    pub fn can_vote(&self) -> bool {
        !matches!(self, Role::Spectator)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a participant currently has a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Connected,
    Disconnected,
}

/// A member of a session.
///
/// Votes are stored on the work item being estimated, not here; the
/// participant's current vote is looked up from the active item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    id: ParticipantId,
    display_name: String,
    role: Role,
    presence: Presence,
}

impl Participant {
    /// Creates a connected participant.
    pub fn new(id: ParticipantId, display_name: String, role: Role) -> Self {
        Self {
            id,
            display_name,
            role,
            presence: Presence::Connected,
        }
    }

    /// Reconstitute a participant from persistence. Loaded participants are
    /// disconnected until they join.
    pub fn reconstitute(id: ParticipantId, display_name: String, role: Role) -> Self {
        Self {
            id,
            display_name,
            role,
            presence: Presence::Disconnected,
        }
    }

    pub fn id(&self) -> &ParticipantId {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn presence(&self) -> Presence {
        self.presence
    }

    pub fn is_connected(&self) -> bool {
        self.presence == Presence::Connected
    }

    pub(crate) fn set_role(&mut self, role: Role) {
        self.role = role;
    }

    pub(crate) fn set_display_name(&mut self, display_name: String) {
        self.display_name = display_name;
    }

    pub(crate) fn connect(&mut self) {
        self.presence = Presence::Connected;
    }

    pub(crate) fn disconnect(&mut self) {
        self.presence = Presence::Disconnected;
    }
}
