//! In-memory session store.
//!
//! Applies writes with the same semantics as the PostgreSQL adapter, so a
//! session reloaded after teardown sees exactly what was persisted. Useful
//! for development without a database and for tests, which can also inject
//! write failures and inspect what was written.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, ParticipantId, SessionId, WorkItemId};
use crate::domain::session::{
    Estimate, RosterChange, RosterEntry, Role, SessionRecord, Vote, VoteRound, WorkItem,
    WorkItemStatus,
};
use crate::ports::SessionStore;

#[derive(Debug, Clone)]
struct StoredItem {
    id: WorkItemId,
    title: String,
    description: Option<String>,
    position: u32,
    status: WorkItemStatus,
    points: Option<Estimate>,
    votes: Vec<Vote>,
    history: Vec<VoteRound>,
}

impl StoredItem {
    fn from_work_item(item: &WorkItem) -> Self {
        Self {
            id: *item.id(),
            title: item.title().to_string(),
            description: item.description().map(str::to_string),
            position: item.position(),
            status: item.status(),
            points: item.points().cloned(),
            votes: item.votes().to_vec(),
            history: item.history().to_vec(),
        }
    }

    fn to_work_item(&self) -> WorkItem {
        WorkItem::reconstitute(
            self.id,
            self.title.clone(),
            self.description.clone(),
            self.position,
            self.status,
            self.points.clone(),
            self.votes.clone(),
            self.history.clone(),
        )
    }

    /// Clear the current round, keeping it as history if it was revealed.
    fn close_round(&mut self) {
        let votes = std::mem::take(&mut self.votes);
        if self.status == WorkItemStatus::Voted && !votes.is_empty() {
            self.history.push(VoteRound { votes });
        }
    }
}

#[derive(Debug, Clone)]
struct StoredSession {
    record: SessionRecord,
    items: Vec<StoredItem>,
}

impl StoredSession {
    fn item_mut(&mut self, id: &WorkItemId) -> Result<&mut StoredItem, DomainError> {
        self.items
            .iter_mut()
            .find(|item| &item.id == id)
            .ok_or_else(|| DomainError::not_found(format!("work item {}", id)))
    }

    fn roster_mut(&mut self, id: &ParticipantId) -> Option<&mut RosterEntry> {
        self.record
            .roster
            .iter_mut()
            .find(|entry| &entry.participant_id == id)
    }
}

/// Session store backed by process memory.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionId, StoredSession>>,
    finalize_calls: RwLock<Vec<(SessionId, WorkItemId, Estimate)>>,
    failures_pending: AtomicUsize,
    loads: AtomicUsize,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a session.
    pub fn insert(&self, record: SessionRecord) {
        let items = record.work_items.iter().map(StoredItem::from_work_item).collect();
        let id = record.id;
        self.write().insert(id, StoredSession { record, items });
    }

    /// Builder form of `insert`.
    pub fn with_session(self, record: SessionRecord) -> Self {
        self.insert(record);
        self
    }

    /// Make the next `count` writes fail with a storage error.
    pub fn fail_next_writes(&self, count: usize) {
        self.failures_pending.store(count, Ordering::SeqCst);
    }

    /// Successful `finalize_work_item` calls for a session, in order.
    pub fn finalize_calls(&self, session_id: &SessionId) -> Vec<(WorkItemId, Estimate)> {
        self.finalize_calls
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|(id, _, _)| id == session_id)
            .map(|(_, item, points)| (*item, points.clone()))
            .collect()
    }

    /// How many times `load_session` has been called.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Current persisted state of a session.
    pub fn snapshot(&self, id: &SessionId) -> Option<SessionRecord> {
        self.read().get(id).map(Self::to_record)
    }

    fn to_record(stored: &StoredSession) -> SessionRecord {
        let mut record = stored.record.clone();
        record.work_items = stored.items.iter().map(StoredItem::to_work_item).collect();
        record
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<SessionId, StoredSession>> {
        self.sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<SessionId, StoredSession>> {
        self.sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn injected_failure(&self) -> Result<(), DomainError> {
        let consumed = self
            .failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if consumed {
            Err(DomainError::storage("injected write failure"))
        } else {
            Ok(())
        }
    }

    fn update<T>(
        &self,
        session_id: &SessionId,
        apply: impl FnOnce(&mut StoredSession) -> Result<T, DomainError>,
    ) -> Result<T, DomainError> {
        self.injected_failure()?;
        let mut sessions = self.write();
        let stored = sessions
            .get_mut(session_id)
            .ok_or_else(|| DomainError::not_found(format!("session {}", session_id)))?;
        apply(stored)
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load_session(&self, id: &SessionId) -> Result<SessionRecord, DomainError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.read()
            .get(id)
            .map(Self::to_record)
            .ok_or_else(|| DomainError::not_found(format!("session {}", id)))
    }

    async fn record_vote(
        &self,
        session_id: &SessionId,
        work_item_id: &WorkItemId,
        participant_id: &ParticipantId,
        value: &Estimate,
    ) -> Result<(), DomainError> {
        self.update(session_id, |stored| {
            let item = stored.item_mut(work_item_id)?;
            item.votes.retain(|v| &v.participant_id != participant_id);
            item.votes.push(Vote {
                participant_id: participant_id.clone(),
                value: value.clone(),
            });
            Ok(())
        })
    }

    async fn retract_vote(
        &self,
        session_id: &SessionId,
        work_item_id: &WorkItemId,
        participant_id: &ParticipantId,
    ) -> Result<(), DomainError> {
        self.update(session_id, |stored| {
            let item = stored.item_mut(work_item_id)?;
            item.votes.retain(|v| &v.participant_id != participant_id);
            Ok(())
        })
    }

    async fn reveal_votes(
        &self,
        session_id: &SessionId,
        work_item_id: &WorkItemId,
    ) -> Result<(), DomainError> {
        self.update(session_id, |stored| {
            stored.item_mut(work_item_id)?.status = WorkItemStatus::Voted;
            stored.record.revealed = true;
            Ok(())
        })
    }

    async fn finalize_work_item(
        &self,
        session_id: &SessionId,
        work_item_id: &WorkItemId,
        points: &Estimate,
    ) -> Result<(), DomainError> {
        self.update(session_id, |stored| {
            let item = stored.item_mut(work_item_id)?;
            item.close_round();
            item.status = WorkItemStatus::Finalized;
            item.points = Some(points.clone());
            if stored.record.active_work_item.as_ref() == Some(work_item_id) {
                stored.record.active_work_item = None;
                stored.record.revealed = false;
            }
            Ok(())
        })?;
        self.finalize_calls
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((*session_id, *work_item_id, points.clone()));
        Ok(())
    }

    async fn set_active_work_item(
        &self,
        session_id: &SessionId,
        work_item_id: Option<&WorkItemId>,
    ) -> Result<(), DomainError> {
        self.update(session_id, |stored| {
            if let Some(previous) = stored.record.active_work_item {
                if Some(&previous) != work_item_id {
                    let item = stored.item_mut(&previous)?;
                    if matches!(item.status, WorkItemStatus::Active | WorkItemStatus::Voted) {
                        item.close_round();
                        item.status = WorkItemStatus::Pending;
                    }
                }
            }
            if let Some(id) = work_item_id {
                let item = stored.item_mut(id)?;
                item.close_round();
                item.status = WorkItemStatus::Active;
            }
            stored.record.active_work_item = work_item_id.copied();
            stored.record.revealed = false;
            Ok(())
        })
    }

    async fn save_work_item(
        &self,
        session_id: &SessionId,
        work_item_id: &WorkItemId,
        title: &str,
        description: Option<&str>,
        position: u32,
    ) -> Result<(), DomainError> {
        self.update(session_id, |stored| {
            if stored.items.iter().any(|item| &item.id == work_item_id) {
                return Ok(());
            }
            stored.items.push(StoredItem {
                id: *work_item_id,
                title: title.to_string(),
                description: description.map(str::to_string),
                position,
                status: WorkItemStatus::Pending,
                points: None,
                votes: Vec::new(),
                history: Vec::new(),
            });
            Ok(())
        })
    }

    async fn save_roster_change(
        &self,
        session_id: &SessionId,
        participant_id: &ParticipantId,
        change: &RosterChange,
    ) -> Result<(), DomainError> {
        self.update(session_id, |stored| {
            match change {
                RosterChange::Joined { display_name, role } => {
                    match stored.roster_mut(participant_id) {
                        Some(entry) => {
                            entry.display_name = display_name.clone();
                            entry.role = *role;
                        }
                        None => stored.record.roster.push(RosterEntry {
                            participant_id: participant_id.clone(),
                            display_name: display_name.clone(),
                            role: *role,
                        }),
                    }
                    if *role == Role::Facilitator {
                        stored.record.leader = Some(participant_id.clone());
                    }
                }
                RosterChange::Left => {}
                RosterChange::Expired => {
                    stored
                        .record
                        .roster
                        .retain(|entry| &entry.participant_id != participant_id);
                }
                RosterChange::RoleChanged { role } => {
                    if let Some(entry) = stored.roster_mut(participant_id) {
                        entry.role = *role;
                    }
                    if *role == Role::Facilitator {
                        stored.record.leader = Some(participant_id.clone());
                    }
                }
            }
            Ok(())
        })
    }
}
