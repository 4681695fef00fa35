//! Process-wide map of live sessions.
//!
//! The lock guards only lookup-or-insert and removal. Loading a session
//! happens outside the lock, inside a per-id `OnceCell`, so concurrent
//! callers for the same id share one load while other ids are unaffected.
//!
//! ```text
//! sessions: HashMap<SessionId, Arc<OnceCell<SessionHandle>>>
//!             │
//!             ├── s-1 ─▶ [initialized] handle(instance 7)
//!             └── s-2 ─▶ [loading...]  (callers wait on the cell)
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::OnceCell;

use crate::domain::foundation::SessionId;
use crate::domain::session::SessionError;

use super::handle::SessionHandle;

type Slot = Arc<OnceCell<SessionHandle>>;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Slot>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Slot>> {
        // The map holds no invariants a panicking holder could break.
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Return the handle for `id`, running `create` if there is none.
    ///
    /// At most one `create` runs per id at a time; concurrent callers wait
    /// for it and share the result. A failed `create` leaves no entry behind.
    pub async fn get_or_create<F, Fut>(
        &self,
        id: SessionId,
        create: F,
    ) -> Result<SessionHandle, SessionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SessionHandle, SessionError>>,
    {
        let slot = self.lock().entry(id).or_default().clone();

        match slot.get_or_try_init(create).await {
            Ok(handle) => Ok(handle.clone()),
            Err(e) => {
                let mut sessions = self.lock();
                let unclaimed = sessions
                    .get(&id)
                    .map(|current| Arc::ptr_eq(current, &slot) && !current.initialized())
                    .unwrap_or(false);
                if unclaimed {
                    sessions.remove(&id);
                }
                Err(e)
            }
        }
    }

    /// The current handle for `id`, if one is registered and initialized.
    pub fn get(&self, id: &SessionId) -> Option<SessionHandle> {
        self.lock().get(id).and_then(|slot| slot.get().cloned())
    }

    /// Deregister `id`, but only if it still belongs to `instance`.
    ///
    /// Returns whether an entry was removed.
    pub fn remove(&self, id: &SessionId, instance: u64) -> bool {
        let mut sessions = self.lock();
        let owned = sessions
            .get(id)
            .and_then(|slot| slot.get())
            .map(|handle| handle.instance() == instance)
            .unwrap_or(false);
        if owned {
            sessions.remove(id);
        }
        owned
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::SessionKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::{mpsc, watch};

    fn handle(id: SessionId, instance: u64) -> SessionHandle {
        let (tx, _rx) = mpsc::channel(1);
        let (cancel, _) = watch::channel(false);
        let (_, retired) = watch::channel(false);
        SessionHandle::new(
            id,
            SessionKind::Battle,
            instance,
            tx,
            Arc::new(cancel),
            retired,
        )
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_creation() {
        let registry = Arc::new(SessionRegistry::new());
        let created = Arc::new(AtomicUsize::new(0));
        let id = SessionId::new();

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            let created = created.clone();
            tasks.push(tokio::spawn(async move {
                registry
                    .get_or_create(id, || async move {
                        created.fetch_add(1, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        Ok(handle(id, 1))
                    })
                    .await
                    .unwrap()
                    .instance()
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap(), 1);
        }
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn failed_creation_leaves_no_entry() {
        let registry = SessionRegistry::new();
        let id = SessionId::new();

        let result = registry
            .get_or_create(id, || async { Err(SessionError::not_found("session")) })
            .await;

        assert!(result.is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn remove_ignores_other_instances() {
        let registry = SessionRegistry::new();
        let id = SessionId::new();
        registry
            .get_or_create(id, || async move { Ok(handle(id, 2)) })
            .await
            .unwrap();

        assert!(!registry.remove(&id, 1));
        assert!(registry.get(&id).is_some());
        assert!(registry.remove(&id, 2));
        assert!(!registry.remove(&id, 2));
        assert!(registry.get(&id).is_none());
    }
}
