//! Session commands and their guards.
//!
//! Every command declares who may issue it and in which phases it is legal.
//! The aggregate checks both before touching any state, so adding a command
//! means filling in both tables below.

use std::fmt;

use crate::domain::foundation::{ParticipantId, WorkItemId};

use super::values::Estimate;

/// Voting phase of the session, derived from the active item and reveal flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// No work item is active.
    Idle,
    /// A work item is active and votes are open.
    Voting,
    /// Votes on the active item have been revealed and are frozen.
    Revealed,
}

impl Phase {
    pub const ALL: &'static [Phase] = &[Phase::Idle, Phase::Voting, Phase::Revealed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Voting => "voting",
            Phase::Revealed => "revealed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who may issue a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    /// Any identity, including one not yet in the roster.
    Anyone,
    /// Any current participant.
    Participant,
    /// A participant whose role can vote.
    Voter,
    /// The session leader.
    Facilitator,
}

/// An immutable request to mutate session state.
///
/// The originating identity travels alongside the command, never inside it,
/// so it always comes from the authenticated connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Join { display_name: String },
    Leave,
    Vote { value: Estimate },
    RetractVote,
    Reveal,
    ActivateWorkItem { work_item_id: WorkItemId },
    SkipWorkItem,
    FinalizePoints { points: Estimate },
    ChangeLeader { new_leader: ParticipantId },
    AddWorkItem { title: String, description: Option<String> },
    SetSpectator { spectator: bool },
    EndSession,
}

impl Command {
    /// Short name used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Join { .. } => "join",
            Command::Leave => "leave",
            Command::Vote { .. } => "vote",
            Command::RetractVote => "retract_vote",
            Command::Reveal => "reveal",
            Command::ActivateWorkItem { .. } => "activate_work_item",
            Command::SkipWorkItem => "skip_work_item",
            Command::FinalizePoints { .. } => "finalize_points",
            Command::ChangeLeader { .. } => "change_leader",
            Command::AddWorkItem { .. } => "add_work_item",
            Command::SetSpectator { .. } => "set_spectator",
            Command::EndSession => "end_session",
        }
    }

    pub fn authority(&self) -> Authority {
        match self {
            Command::Join { .. } => Authority::Anyone,
            Command::Leave | Command::SetSpectator { .. } => Authority::Participant,
            Command::Vote { .. } | Command::RetractVote => Authority::Voter,
            Command::Reveal
            | Command::ActivateWorkItem { .. }
            | Command::SkipWorkItem
            | Command::FinalizePoints { .. }
            | Command::ChangeLeader { .. }
            | Command::AddWorkItem { .. }
            | Command::EndSession => Authority::Facilitator,
        }
    }

    /// Phases in which the command may be applied.
    pub fn legal_phases(&self) -> &'static [Phase] {
        match self {
            Command::Vote { .. } | Command::RetractVote | Command::Reveal => &[Phase::Voting],
            Command::FinalizePoints { .. } => &[Phase::Revealed],
            Command::SkipWorkItem => &[Phase::Voting, Phase::Revealed],
            Command::Join { .. }
            | Command::Leave
            | Command::ActivateWorkItem { .. }
            | Command::ChangeLeader { .. }
            | Command::AddWorkItem { .. }
            | Command::SetSpectator { .. }
            | Command::EndSession => Phase::ALL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_commands() -> Vec<Command> {
        vec![
            Command::Join {
                display_name: "a".into(),
            },
            Command::Leave,
            Command::Vote {
                value: Estimate::new("3").unwrap(),
            },
            Command::RetractVote,
            Command::Reveal,
            Command::ActivateWorkItem {
                work_item_id: WorkItemId::new(),
            },
            Command::SkipWorkItem,
            Command::FinalizePoints {
                points: Estimate::new("5").unwrap(),
            },
            Command::ChangeLeader {
                new_leader: ParticipantId::new("b").unwrap(),
            },
            Command::AddWorkItem {
                title: "t".into(),
                description: None,
            },
            Command::SetSpectator { spectator: true },
            Command::EndSession,
        ]
    }

    #[test]
    fn every_command_declares_at_least_one_phase() {
        for command in all_commands() {
            assert!(
                !command.legal_phases().is_empty(),
                "{} has no legal phase",
                command.name()
            );
        }
    }

    #[test]
    fn voting_commands_only_legal_while_voting() {
        let vote = Command::Vote {
            value: Estimate::new("1").unwrap(),
        };
        assert_eq!(vote.legal_phases(), &[Phase::Voting]);
        assert_eq!(Command::Reveal.legal_phases(), &[Phase::Voting]);
    }

    #[test]
    fn finalize_only_legal_after_reveal() {
        let finalize = Command::FinalizePoints {
            points: Estimate::new("8").unwrap(),
        };
        assert_eq!(finalize.legal_phases(), &[Phase::Revealed]);
        assert_eq!(finalize.authority(), Authority::Facilitator);
    }

    #[test]
    fn command_names_are_unique() {
        let mut names: Vec<_> = all_commands().iter().map(|c| c.name()).collect();
        let before = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(before, names.len());
    }
}
