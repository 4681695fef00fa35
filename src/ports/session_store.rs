//! Persistence port for live sessions.
//!
//! The hub loads a session once on creation and afterwards only appends
//! facts. Every write is issued after the corresponding event has already
//! been broadcast, so implementations are free to be slow; they must not
//! assume they are called from the session worker.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, ParticipantId, SessionId, WorkItemId};
use crate::domain::session::{Estimate, RosterChange, SessionRecord, StorageWrite};

/// Storage contract consumed by session workers.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the persisted state of a session.
    ///
    /// # Errors
    ///
    /// - `NotFound` if no battle or storyboard has this id
    /// - `Storage` on persistence failure
    async fn load_session(&self, id: &SessionId) -> Result<SessionRecord, DomainError>;

    /// Record (or replace) a participant's vote on a work item.
    async fn record_vote(
        &self,
        session_id: &SessionId,
        work_item_id: &WorkItemId,
        participant_id: &ParticipantId,
        value: &Estimate,
    ) -> Result<(), DomainError>;

    async fn retract_vote(
        &self,
        session_id: &SessionId,
        work_item_id: &WorkItemId,
        participant_id: &ParticipantId,
    ) -> Result<(), DomainError>;

    /// Mark the votes of a work item as revealed.
    async fn reveal_votes(
        &self,
        session_id: &SessionId,
        work_item_id: &WorkItemId,
    ) -> Result<(), DomainError>;

    /// Record the agreed points and clear the active item if it was this one.
    async fn finalize_work_item(
        &self,
        session_id: &SessionId,
        work_item_id: &WorkItemId,
        points: &Estimate,
    ) -> Result<(), DomainError>;

    async fn set_active_work_item(
        &self,
        session_id: &SessionId,
        work_item_id: Option<&WorkItemId>,
    ) -> Result<(), DomainError>;

    /// Insert a work item created during the live session.
    async fn save_work_item(
        &self,
        session_id: &SessionId,
        work_item_id: &WorkItemId,
        title: &str,
        description: Option<&str>,
        position: u32,
    ) -> Result<(), DomainError>;

    /// Persist a roster fact.
    async fn save_roster_change(
        &self,
        session_id: &SessionId,
        participant_id: &ParticipantId,
        change: &RosterChange,
    ) -> Result<(), DomainError>;
}

/// Dispatch one queued write to the matching store call.
pub async fn apply_write(
    store: &dyn SessionStore,
    session_id: &SessionId,
    write: &StorageWrite,
) -> Result<(), DomainError> {
    match write {
        StorageWrite::RecordVote {
            work_item_id,
            participant_id,
            value,
        } => {
            store
                .record_vote(session_id, work_item_id, participant_id, value)
                .await
        }
        StorageWrite::RetractVote {
            work_item_id,
            participant_id,
        } => {
            store
                .retract_vote(session_id, work_item_id, participant_id)
                .await
        }
        StorageWrite::RevealVotes { work_item_id } => {
            store.reveal_votes(session_id, work_item_id).await
        }
        StorageWrite::FinalizeWorkItem {
            work_item_id,
            points,
        } => {
            store
                .finalize_work_item(session_id, work_item_id, points)
                .await
        }
        StorageWrite::SetActiveWorkItem { work_item_id } => {
            store
                .set_active_work_item(session_id, work_item_id.as_ref())
                .await
        }
        StorageWrite::SaveWorkItem {
            work_item_id,
            title,
            description,
            position,
        } => {
            store
                .save_work_item(
                    session_id,
                    work_item_id,
                    title,
                    description.as_deref(),
                    *position,
                )
                .await
        }
        StorageWrite::SaveRosterChange {
            participant_id,
            change,
        } => {
            store
                .save_roster_change(session_id, participant_id, change)
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_store_is_object_safe() {
        fn _accepts_dyn(_store: &dyn SessionStore) {}
    }
}
