//! Session domain module.
//!
//! A session is one live estimation room (a battle or a storyboard). The
//! aggregate owns participants, work items and the reveal flag, and is the
//! only thing allowed to change them.
//!
//! # Events
//!
//! - `ParticipantJoined` / `ParticipantLeft` / `ParticipantRemoved` - roster changes
//! - `VoteCast` / `VoteRetracted` - someone voted (value withheld)
//! - `VotesRevealed` - all values of the active round
//! - `WorkItemActivated` / `WorkItemSkipped` / `WorkItemAdded` - backlog changes
//! - `PlanFinalized` - agreed points recorded
//! - `LeaderChanged` / `RoleChanged` - role changes
//! - `SessionEnded` - terminal

mod aggregate;
mod commands;
mod errors;
mod events;
mod participant;
mod record;
mod values;
mod work_item;
mod writes;

pub use aggregate::{Outcome, Session};
pub use commands::{Authority, Command, Phase};
pub use errors::SessionError;
pub use events::{
    EndReason, LeaderChangedPayload, ParticipantRef, ParticipantView, PlanFinalizedPayload,
    RoleChangedPayload, SessionEndedPayload, SessionEvent, SessionSnapshot, VoteCastPayload,
    VotesRevealedPayload, WorkItemRef, WorkItemView,
};
pub use participant::{Participant, Presence, Role};
pub use record::{RosterEntry, SessionRecord};
pub use values::{
    validate_description, validate_display_name, validate_title, AutoFinishPolicy, Estimate,
    SessionKind, MAX_DESCRIPTION_LENGTH, MAX_DISPLAY_NAME_LENGTH, MAX_ESTIMATE_LENGTH,
    MAX_TITLE_LENGTH,
};
pub use work_item::{Vote, VoteRound, WorkItem, WorkItemStatus};
pub use writes::{RosterChange, StorageWrite};
