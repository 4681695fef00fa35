//! Session aggregate - the authoritative state of one estimation room.
//!
//! The aggregate is a plain value: it never touches channels, timers or
//! storage. `execute` validates a command against the current state and
//! either rejects it without side effects or applies it and returns the
//! events to broadcast and the writes to persist.

use std::collections::BTreeMap;

use crate::domain::foundation::{ParticipantId, SessionId, WorkItemId};

use super::commands::{Authority, Command, Phase};
use super::errors::SessionError;
use super::events::{
    EndReason, LeaderChangedPayload, ParticipantRef, ParticipantView, PlanFinalizedPayload,
    RoleChangedPayload, SessionEndedPayload, SessionEvent, SessionSnapshot, VoteCastPayload,
    VotesRevealedPayload, WorkItemRef, WorkItemView,
};
use super::participant::{Participant, Role};
use super::record::SessionRecord;
use super::values::{validate_display_name, AutoFinishPolicy, Estimate, SessionKind};
use super::work_item::{WorkItem, WorkItemStatus};
use super::writes::{RosterChange, StorageWrite};

/// Result of an accepted command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    /// Events to broadcast, in order.
    pub events: Vec<SessionEvent>,
    /// Writes to hand to the persistence collaborator, in order.
    pub writes: Vec<StorageWrite>,
    /// Set when the command ended the session.
    pub ended: Option<EndReason>,
}

impl Outcome {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.writes.is_empty() && self.ended.is_none()
    }

    fn emit(&mut self, event: SessionEvent) {
        self.events.push(event);
    }

    fn write(&mut self, write: StorageWrite) {
        self.writes.push(write);
    }
}

/// One live estimation session.
///
/// # Invariants
///
/// - at most one work item is active, and `active` always indexes into `work_items`
/// - `revealed` implies an active item whose status is `Voted`
/// - the leader, when present in the roster, holds the facilitator role
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    kind: SessionKind,
    name: String,
    leader: Option<ParticipantId>,
    auto_finish_voting: bool,
    allowed_values: Vec<Estimate>,
    work_items: Vec<WorkItem>,
    active: Option<usize>,
    revealed: bool,
    participants: BTreeMap<ParticipantId, Participant>,
    policy: AutoFinishPolicy,
}

impl Session {
    /// Rebuild live state from a persisted record. Every roster member
    /// starts disconnected.
    pub fn reconstitute(record: SessionRecord, policy: AutoFinishPolicy) -> Self {
        let active = record
            .active_work_item
            .and_then(|id| record.work_items.iter().position(|w| w.id() == &id));
        let revealed = record.revealed
            && active
                .map(|i| record.work_items[i].status() == WorkItemStatus::Voted)
                .unwrap_or(false);

        let participants = record
            .roster
            .into_iter()
            .map(|entry| {
                let participant =
                    Participant::reconstitute(entry.participant_id, entry.display_name, entry.role);
                (participant.id().clone(), participant)
            })
            .collect();

        Self {
            id: record.id,
            kind: record.kind,
            name: record.name,
            leader: record.leader,
            auto_finish_voting: record.auto_finish_voting,
            allowed_values: record.allowed_values,
            work_items: record.work_items,
            active,
            revealed,
            participants,
            policy,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn leader(&self) -> Option<&ParticipantId> {
        self.leader.as_ref()
    }

    pub fn phase(&self) -> Phase {
        match (self.active, self.revealed) {
            (None, _) => Phase::Idle,
            (Some(_), false) => Phase::Voting,
            (Some(_), true) => Phase::Revealed,
        }
    }

    pub fn participant(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.get(id)
    }

    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    pub fn connected_count(&self) -> usize {
        self.participants.values().filter(|p| p.is_connected()).count()
    }

    pub fn work_items(&self) -> &[WorkItem] {
        &self.work_items
    }

    pub fn active_work_item(&self) -> Option<&WorkItem> {
        self.active.map(|i| &self.work_items[i])
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Command processing
    // ─────────────────────────────────────────────────────────────────────────

    /// Validate and apply one command on behalf of `actor`.
    ///
    /// Checks run in a fixed order: membership, role, phase, then
    /// command-specific arguments. A rejected command leaves the session
    /// untouched.
    pub fn execute(
        &mut self,
        actor: &ParticipantId,
        command: Command,
    ) -> Result<Outcome, SessionError> {
        self.authorize(actor, &command)?;

        let phase = self.phase();
        if !command.legal_phases().contains(&phase) {
            return Err(SessionError::invalid_state(format!(
                "{} is not allowed while {}",
                command.name(),
                phase
            )));
        }

        match command {
            Command::Join { display_name } => self.join(actor, &display_name),
            Command::Leave => Ok(self.leave(actor)),
            Command::Vote { value } => self.vote(actor, value),
            Command::RetractVote => self.retract_vote(actor),
            Command::Reveal => self.reveal(),
            Command::ActivateWorkItem { work_item_id } => self.activate(&work_item_id),
            Command::SkipWorkItem => self.skip(),
            Command::FinalizePoints { points } => self.finalize(points),
            Command::ChangeLeader { new_leader } => self.change_leader(actor, new_leader),
            Command::AddWorkItem { title, description } => self.add_work_item(&title, description),
            Command::SetSpectator { spectator } => self.set_spectator(actor, spectator),
            Command::EndSession => Ok(self.end()),
        }
    }

    fn authorize(&self, actor: &ParticipantId, command: &Command) -> Result<(), SessionError> {
        let authority = command.authority();
        if authority == Authority::Anyone {
            return Ok(());
        }

        let participant = self.participants.get(actor).ok_or_else(|| {
            SessionError::unauthorized(format!("{} is not a participant", actor))
        })?;

        match authority {
            Authority::Anyone | Authority::Participant => Ok(()),
            Authority::Voter if participant.role().can_vote() => Ok(()),
            Authority::Voter => Err(SessionError::unauthorized(format!(
                "{} cannot {}",
                participant.role(),
                command.name()
            ))),
            Authority::Facilitator if self.leader.as_ref() == Some(actor) => Ok(()),
            Authority::Facilitator => Err(SessionError::unauthorized(format!(
                "only the facilitator can {}",
                command.name()
            ))),
        }
    }

    fn join(&mut self, actor: &ParticipantId, display_name: &str) -> Result<Outcome, SessionError> {
        let display_name = validate_display_name(display_name)?;
        let mut out = Outcome::default();

        if let Some(existing) = self.participants.get_mut(actor) {
            if existing.is_connected() {
                return Ok(out);
            }
            existing.connect();
            existing.set_display_name(display_name.clone());
            let role = existing.role();
            out.emit(SessionEvent::ParticipantJoined(self.participant_view(actor)));
            out.write(StorageWrite::SaveRosterChange {
                participant_id: actor.clone(),
                change: RosterChange::Joined { display_name, role },
            });
            return Ok(out);
        }

        let claims_leadership = self.leader.is_none();
        if claims_leadership {
            self.leader = Some(actor.clone());
        }
        let role = if self.leader.as_ref() == Some(actor) {
            Role::Facilitator
        } else {
            Role::Voter
        };

        self.participants.insert(
            actor.clone(),
            Participant::new(actor.clone(), display_name.clone(), role),
        );

        out.emit(SessionEvent::ParticipantJoined(self.participant_view(actor)));
        if claims_leadership {
            out.emit(SessionEvent::LeaderChanged(LeaderChangedPayload {
                previous_leader: None,
                new_leader: actor.clone(),
            }));
        }
        out.write(StorageWrite::SaveRosterChange {
            participant_id: actor.clone(),
            change: RosterChange::Joined { display_name, role },
        });
        Ok(out)
    }

    fn leave(&mut self, actor: &ParticipantId) -> Outcome {
        let mut out = Outcome::default();
        let Some(participant) = self.participants.get_mut(actor) else {
            return out;
        };
        if !participant.is_connected() {
            return out;
        }
        participant.disconnect();

        out.emit(SessionEvent::ParticipantLeft(ParticipantRef {
            participant_id: actor.clone(),
        }));
        out.write(StorageWrite::SaveRosterChange {
            participant_id: actor.clone(),
            change: RosterChange::Left,
        });
        self.auto_reveal(&mut out);
        out
    }

    fn vote(&mut self, actor: &ParticipantId, value: Estimate) -> Result<Outcome, SessionError> {
        self.check_allowed(&value)?;
        let item = self.active_item_mut()?;
        item.cast_vote(actor.clone(), value.clone());
        let work_item_id = *item.id();

        let mut out = Outcome::default();
        out.emit(SessionEvent::VoteCast(VoteCastPayload {
            work_item_id,
            participant_id: actor.clone(),
        }));
        out.write(StorageWrite::RecordVote {
            work_item_id,
            participant_id: actor.clone(),
            value,
        });
        self.auto_reveal(&mut out);
        Ok(out)
    }

    fn retract_vote(&mut self, actor: &ParticipantId) -> Result<Outcome, SessionError> {
        let item = self.active_item_mut()?;
        if !item.retract_vote(actor) {
            return Err(SessionError::invalid_state("no vote to retract"));
        }
        let work_item_id = *item.id();

        let mut out = Outcome::default();
        out.emit(SessionEvent::VoteRetracted(VoteCastPayload {
            work_item_id,
            participant_id: actor.clone(),
        }));
        out.write(StorageWrite::RetractVote {
            work_item_id,
            participant_id: actor.clone(),
        });
        Ok(out)
    }

    fn reveal(&mut self) -> Result<Outcome, SessionError> {
        let mut out = Outcome::default();
        self.apply_reveal(false, &mut out)?;
        Ok(out)
    }

    fn apply_reveal(&mut self, automatic: bool, out: &mut Outcome) -> Result<(), SessionError> {
        let item = self.active_item_mut()?;
        item.reveal()
            .map_err(|e| SessionError::invalid_state(e.to_string()))?;
        let work_item_id = *item.id();
        let votes = item.votes().to_vec();
        self.revealed = true;

        out.emit(SessionEvent::VotesRevealed(VotesRevealedPayload {
            work_item_id,
            votes,
            automatic,
        }));
        out.write(StorageWrite::RevealVotes { work_item_id });
        Ok(())
    }

    fn activate(&mut self, work_item_id: &WorkItemId) -> Result<Outcome, SessionError> {
        let index = self
            .work_items
            .iter()
            .position(|w| w.id() == work_item_id)
            .ok_or_else(|| SessionError::not_found(format!("work item {}", work_item_id)))?;

        if let Some(previous) = self.active.filter(|&i| i != index) {
            let item = &mut self.work_items[previous];
            if matches!(item.status(), WorkItemStatus::Active | WorkItemStatus::Voted) {
                item.deactivate()
                    .map_err(|e| SessionError::internal(e.to_string()))?;
            }
        }

        self.work_items[index]
            .activate()
            .map_err(|e| SessionError::invalid_state(e.to_string()))?;
        self.active = Some(index);
        self.revealed = false;

        let mut out = Outcome::default();
        out.emit(SessionEvent::WorkItemActivated(WorkItemRef {
            work_item_id: *work_item_id,
        }));
        out.write(StorageWrite::SetActiveWorkItem {
            work_item_id: Some(*work_item_id),
        });
        Ok(out)
    }

    fn skip(&mut self) -> Result<Outcome, SessionError> {
        let item = self.active_item_mut()?;
        item.deactivate()
            .map_err(|e| SessionError::invalid_state(e.to_string()))?;
        let work_item_id = *item.id();
        self.active = None;
        self.revealed = false;

        let mut out = Outcome::default();
        out.emit(SessionEvent::WorkItemSkipped(WorkItemRef { work_item_id }));
        out.write(StorageWrite::SetActiveWorkItem { work_item_id: None });
        Ok(out)
    }

    fn finalize(&mut self, points: Estimate) -> Result<Outcome, SessionError> {
        self.check_allowed(&points)?;
        let item = self.active_item_mut()?;
        item.finalize(points.clone())
            .map_err(|e| SessionError::invalid_state(e.to_string()))?;
        let work_item_id = *item.id();
        self.active = None;
        self.revealed = false;

        let mut out = Outcome::default();
        out.emit(SessionEvent::PlanFinalized(PlanFinalizedPayload {
            work_item_id,
            points: points.clone(),
        }));
        out.write(StorageWrite::FinalizeWorkItem {
            work_item_id,
            points,
        });
        Ok(out)
    }

    fn change_leader(
        &mut self,
        actor: &ParticipantId,
        new_leader: ParticipantId,
    ) -> Result<Outcome, SessionError> {
        if &new_leader == actor {
            return Err(SessionError::invalid("already the facilitator"));
        }
        let candidate = self
            .participants
            .get(&new_leader)
            .ok_or_else(|| SessionError::not_found(format!("participant {}", new_leader)))?;
        if !candidate.is_connected() {
            return Err(SessionError::invalid_state(format!(
                "{} is not connected",
                new_leader
            )));
        }

        let mut out = Outcome::default();
        out.emit(SessionEvent::LeaderChanged(LeaderChangedPayload {
            previous_leader: Some(actor.clone()),
            new_leader: new_leader.clone(),
        }));
        self.leader = Some(new_leader.clone());
        self.assign_role(actor, Role::Voter, &mut out);
        self.assign_role(&new_leader, Role::Facilitator, &mut out);
        Ok(out)
    }

    fn add_work_item(
        &mut self,
        title: &str,
        description: Option<String>,
    ) -> Result<Outcome, SessionError> {
        let position = match self.work_items.iter().map(|w| w.position()).max() {
            Some(last) => last
                .checked_add(1)
                .ok_or_else(|| SessionError::invalid_state("no free work item position"))?,
            None => 0,
        };
        let item = WorkItem::new(WorkItemId::new(), title, description, position)?;

        let mut out = Outcome::default();
        out.emit(SessionEvent::WorkItemAdded(self.work_item_view(&item)));
        out.write(StorageWrite::SaveWorkItem {
            work_item_id: *item.id(),
            title: item.title().to_string(),
            description: item.description().map(str::to_string),
            position,
        });
        self.work_items.push(item);
        Ok(out)
    }

    fn set_spectator(
        &mut self,
        actor: &ParticipantId,
        spectator: bool,
    ) -> Result<Outcome, SessionError> {
        if self.leader.as_ref() == Some(actor) {
            return Err(SessionError::invalid_state(
                "the facilitator cannot change their own role",
            ));
        }
        let target = if spectator { Role::Spectator } else { Role::Voter };
        let mut out = Outcome::default();
        if self.participants.get(actor).map(Participant::role) == Some(target) {
            return Ok(out);
        }

        if spectator && self.phase() == Phase::Voting {
            if let Some(index) = self.active {
                let item = &mut self.work_items[index];
                if item.retract_vote(actor) {
                    let work_item_id = *item.id();
                    out.emit(SessionEvent::VoteRetracted(VoteCastPayload {
                        work_item_id,
                        participant_id: actor.clone(),
                    }));
                    out.write(StorageWrite::RetractVote {
                        work_item_id,
                        participant_id: actor.clone(),
                    });
                }
            }
        }

        self.assign_role(actor, target, &mut out);
        self.auto_reveal(&mut out);
        Ok(out)
    }

    fn end(&mut self) -> Outcome {
        let mut out = Outcome::default();
        out.emit(SessionEvent::SessionEnded(SessionEndedPayload {
            reason: EndReason::EndedByFacilitator,
        }));
        out.ended = Some(EndReason::EndedByFacilitator);
        out
    }

    /// Drop a disconnected participant whose reconnect window has passed.
    ///
    /// No-op if the participant is unknown or has reconnected since.
    pub fn expire_participant(&mut self, id: &ParticipantId) -> Outcome {
        let mut out = Outcome::default();
        match self.participants.get(id) {
            Some(p) if !p.is_connected() => {}
            _ => return out,
        }

        if self.phase() == Phase::Voting {
            if let Some(index) = self.active {
                let item = &mut self.work_items[index];
                if item.retract_vote(id) {
                    out.write(StorageWrite::RetractVote {
                        work_item_id: *item.id(),
                        participant_id: id.clone(),
                    });
                }
            }
        }
        self.participants.remove(id);

        out.emit(SessionEvent::ParticipantRemoved(ParticipantRef {
            participant_id: id.clone(),
        }));
        out.write(StorageWrite::SaveRosterChange {
            participant_id: id.clone(),
            change: RosterChange::Expired,
        });
        self.auto_reveal(&mut out);
        out
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────

    fn active_item_mut(&mut self) -> Result<&mut WorkItem, SessionError> {
        match self.active {
            Some(index) => Ok(&mut self.work_items[index]),
            None => Err(SessionError::invalid_state("no active work item")),
        }
    }

    fn check_allowed(&self, value: &Estimate) -> Result<(), SessionError> {
        if self.allowed_values.is_empty() || self.allowed_values.contains(value) {
            Ok(())
        } else {
            Err(SessionError::invalid(format!(
                "{} is not an allowed point value",
                value
            )))
        }
    }

    fn assign_role(&mut self, id: &ParticipantId, role: Role, out: &mut Outcome) {
        let Some(participant) = self.participants.get_mut(id) else {
            return;
        };
        participant.set_role(role);
        out.emit(SessionEvent::RoleChanged(RoleChangedPayload {
            participant_id: id.clone(),
            role,
        }));
        out.write(StorageWrite::SaveRosterChange {
            participant_id: id.clone(),
            change: RosterChange::RoleChanged { role },
        });
    }

    /// Reveal automatically once every required voter has voted.
    fn auto_reveal(&mut self, out: &mut Outcome) {
        if !self.auto_finish_voting || self.phase() != Phase::Voting {
            return;
        }
        let Some(item) = self.active_work_item() else {
            return;
        };
        if item.votes().is_empty() {
            return;
        }

        let counts_disconnected = self.policy.counts_disconnected;
        let required: Vec<&ParticipantId> = self
            .participants
            .values()
            .filter(|p| p.role().can_vote() && (p.is_connected() || counts_disconnected))
            .map(Participant::id)
            .collect();
        let everyone_voted = !required.is_empty() && required.iter().all(|id| item.has_voted(id));

        if everyone_voted {
            // Phase is Voting, so the active item is Active and reveal cannot fail.
            let _ = self.apply_reveal(true, out);
        }
    }

    fn participant_view(&self, id: &ParticipantId) -> ParticipantView {
        let has_voted = self
            .active_work_item()
            .map(|item| item.has_voted(id))
            .unwrap_or(false);
        match self.participants.get(id) {
            Some(p) => ParticipantView {
                participant_id: p.id().clone(),
                display_name: p.display_name().to_string(),
                role: p.role(),
                connected: p.is_connected(),
                has_voted,
            },
            None => ParticipantView {
                participant_id: id.clone(),
                display_name: String::new(),
                role: Role::Voter,
                connected: false,
                has_voted,
            },
        }
    }

    fn work_item_view(&self, item: &WorkItem) -> WorkItemView {
        let votes = if item.status() == WorkItemStatus::Voted {
            item.votes().to_vec()
        } else {
            Vec::new()
        };
        WorkItemView {
            work_item_id: *item.id(),
            title: item.title().to_string(),
            description: item.description().map(str::to_string),
            position: item.position(),
            status: item.status(),
            points: item.points().cloned(),
            voters: item.votes().iter().map(|v| v.participant_id.clone()).collect(),
            votes,
            history: item.history().to_vec(),
        }
    }

    /// Full state as seen by `viewer`. Unrevealed vote values are hidden
    /// except the viewer's own.
    pub fn snapshot_for(&self, viewer: &ParticipantId) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id,
            kind: self.kind,
            name: self.name.clone(),
            leader: self.leader.clone(),
            auto_finish_voting: self.auto_finish_voting,
            allowed_values: self.allowed_values.clone(),
            active_work_item_id: self.active_work_item().map(|w| *w.id()),
            revealed: self.revealed,
            participants: self
                .participants
                .keys()
                .map(|id| self.participant_view(id))
                .collect(),
            work_items: self
                .work_items
                .iter()
                .map(|item| self.work_item_view(item))
                .collect(),
            your_vote: self
                .active_work_item()
                .and_then(|item| item.vote_of(viewer))
                .cloned(),
        }
    }
}
