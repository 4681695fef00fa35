//! Background writer that hands session facts to the store.
//!
//! Each session worker owns one `DurableWriter`. Writes are applied strictly
//! in the order they were queued so the store never sees a reveal before the
//! votes it reveals. The worker never waits on a write; it only waits on
//! `flush` before teardown.
//!
//! ## Failure handling
//!
//! | Write class | On error |
//! |-------------|----------|
//! | finalize-class (`FinalizeWorkItem`, `SaveWorkItem`) | retried with exponential backoff, then logged and dropped |
//! | everything else | logged and dropped |

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time;

use crate::domain::foundation::SessionId;
use crate::domain::session::{SessionError, StorageWrite};
use crate::ports::{apply_write, SessionStore};

/// Retry policy for finalize-class writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(200),
        }
    }
}

enum DurableMessage {
    Write(StorageWrite),
    Flush(oneshot::Sender<()>),
}

/// Handle to a session's durable writer task.
///
/// Dropping every handle lets the task finish the queued writes and exit.
#[derive(Clone)]
pub struct DurableWriter {
    tx: mpsc::UnboundedSender<DurableMessage>,
}

impl DurableWriter {
    /// Spawn the writer task for one session.
    pub fn spawn(store: Arc<dyn SessionStore>, session_id: SessionId, retry: RetryPolicy) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(store, session_id, retry, rx));
        Self { tx }
    }

    /// Queue writes without waiting for them.
    ///
    /// # Errors
    ///
    /// `Internal` if the writer task is gone; the writes can no longer
    /// reach the store.
    pub fn enqueue(
        &self,
        writes: impl IntoIterator<Item = StorageWrite>,
    ) -> Result<(), SessionError> {
        for write in writes {
            if self.tx.send(DurableMessage::Write(write)).is_err() {
                return Err(SessionError::internal("durable writer stopped"));
            }
        }
        Ok(())
    }

    /// Wait until every write queued so far has been attempted.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub async fn flush(&self, timeout: Duration) -> bool {
        let (done, wait) = oneshot::channel();
        if self.tx.send(DurableMessage::Flush(done)).is_err() {
            return true;
        }
        matches!(time::timeout(timeout, wait).await, Ok(Ok(())))
    }
}

async fn run(
    store: Arc<dyn SessionStore>,
    session_id: SessionId,
    retry: RetryPolicy,
    mut rx: mpsc::UnboundedReceiver<DurableMessage>,
) {
    while let Some(message) = rx.recv().await {
        match message {
            DurableMessage::Write(write) => {
                persist(store.as_ref(), &session_id, &write, retry).await;
            }
            DurableMessage::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!(session_id = %session_id, "durable writer drained");
}

async fn persist(
    store: &dyn SessionStore,
    session_id: &SessionId,
    write: &StorageWrite,
    retry: RetryPolicy,
) {
    let mut attempt = 0;
    loop {
        match apply_write(store, session_id, write).await {
            Ok(()) => return,
            Err(e) if write.is_finalize_class() && attempt < retry.max_retries => {
                attempt += 1;
                let delay = retry.delay_for(attempt);
                tracing::warn!(
                    session_id = %session_id,
                    write = write.kind(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "storage write failed, retrying"
                );
                time::sleep(delay).await;
            }
            Err(e) if write.is_finalize_class() => {
                tracing::error!(
                    session_id = %session_id,
                    write = write.kind(),
                    attempts = attempt + 1,
                    error = %e,
                    "storage write abandoned after retries"
                );
                return;
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %session_id,
                    write = write.kind(),
                    error = %e,
                    "storage write failed"
                );
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::storage::InMemorySessionStore;
    use crate::domain::foundation::WorkItemId;
    use crate::domain::session::{Estimate, SessionKind, SessionRecord, WorkItem};

    fn seeded_store() -> (Arc<InMemorySessionStore>, SessionId, WorkItemId) {
        let session_id = SessionId::new();
        let w1 = WorkItemId::new();
        let store = Arc::new(InMemorySessionStore::new());
        store.insert(
            SessionRecord::new(session_id, SessionKind::Battle, "s")
                .with_work_item(WorkItem::new(w1, "Login", None, 0).unwrap()),
        );
        (store, session_id, w1)
    }

    fn finalize(w1: WorkItemId) -> StorageWrite {
        StorageWrite::FinalizeWorkItem {
            work_item_id: w1,
            points: Estimate::new("5").unwrap(),
        }
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
    }

    #[tokio::test]
    async fn flush_waits_for_queued_writes() {
        let (store, session_id, w1) = seeded_store();
        let writer = DurableWriter::spawn(store.clone(), session_id, RetryPolicy::default());

        writer.enqueue([finalize(w1)]).unwrap();
        assert!(writer.flush(Duration::from_secs(1)).await);

        assert_eq!(store.finalize_calls(&session_id), vec![(w1, Estimate::new("5").unwrap())]);
    }

    #[tokio::test(start_paused = true)]
    async fn finalize_class_writes_are_retried() {
        let (store, session_id, w1) = seeded_store();
        store.fail_next_writes(2);
        let writer = DurableWriter::spawn(store.clone(), session_id, RetryPolicy::default());

        writer.enqueue([finalize(w1)]).unwrap();
        assert!(writer.flush(Duration::from_secs(60)).await);

        assert_eq!(store.finalize_calls(&session_id).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ordinary_writes_are_not_retried() {
        let (store, session_id, w1) = seeded_store();
        store.fail_next_writes(1);
        let writer = DurableWriter::spawn(store.clone(), session_id, RetryPolicy::default());

        writer
            .enqueue([StorageWrite::RevealVotes { work_item_id: w1 }, finalize(w1)])
            .unwrap();
        assert!(writer.flush(Duration::from_secs(60)).await);

        let record = store.snapshot(&session_id).unwrap();
        assert!(!record.revealed);
        assert_eq!(store.finalize_calls(&session_id).len(), 1);
    }
}
