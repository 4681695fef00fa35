//! Real-time session hub.
//!
//! The hub maps session ids to running session workers. It creates a
//! worker lazily on the first connection, loading initial state from the
//! `SessionStore`, and the worker retires itself once it has been empty for
//! the idle window.
//!
//! # Architecture
//!
//! ```text
//! Hub ── SessionRegistry ── s-1 ─▶ SessionHandle ─▶ [queue] ─▶ SessionWorker ─▶ DurableWriter
//!                        └─ s-2 ─▶ SessionHandle ─▶ [queue] ─▶ SessionWorker ─▶ DurableWriter
//! ```
//!
//! All access goes through `Hub`; nothing outside a worker touches its
//! session state.

mod durable;
mod handle;
mod outbound;
mod registry;
mod worker;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::domain::foundation::{AuthenticatedUser, SessionId};
use crate::domain::session::{AutoFinishPolicy, Session, SessionError, SessionKind};
use crate::ports::SessionStore;

pub use durable::{DurableWriter, RetryPolicy};
pub use handle::SessionHandle;
pub use outbound::{
    ConnectionId, ErrorPayload, Outbound, OutboundFrame, OutboundReceiver, OutboundSender,
    PongPayload, PrivateMessage,
};
pub use registry::SessionRegistry;

use worker::SessionWorker;

/// How often `connect` retries against a session that is ending.
const CONNECT_ATTEMPTS: usize = 3;

/// Runtime settings for the hub.
#[derive(Debug, Clone)]
pub struct HubSettings {
    /// Capacity of each session's command queue.
    pub command_queue_capacity: usize,
    /// Capacity of each connection's outbound queue; overflow disconnects.
    pub outbound_queue_capacity: usize,
    /// How long a session with no connections lives on.
    pub idle_teardown: Duration,
    /// How long a disconnected participant stays on the roster.
    pub roster_grace: Duration,
    pub retry: RetryPolicy,
    /// Upper bound on waiting for durable writes at teardown.
    pub flush_timeout: Duration,
    pub battle_policy: AutoFinishPolicy,
    pub storyboard_policy: AutoFinishPolicy,
}

impl HubSettings {
    pub fn policy_for(&self, kind: SessionKind) -> AutoFinishPolicy {
        match kind {
            SessionKind::Battle => self.battle_policy,
            SessionKind::Storyboard => self.storyboard_policy,
        }
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            command_queue_capacity: 256,
            outbound_queue_capacity: 64,
            idle_teardown: Duration::from_secs(60),
            roster_grace: Duration::from_secs(120),
            retry: RetryPolicy::default(),
            flush_timeout: Duration::from_secs(10),
            battle_policy: AutoFinishPolicy::default(),
            storyboard_policy: AutoFinishPolicy::default(),
        }
    }
}

/// A connection registered with a session.
pub struct Attachment {
    pub handle: SessionHandle,
    pub connection_id: ConnectionId,
    /// Frames for this connection. Closes when the session drops the connection.
    pub outbound: OutboundReceiver,
}

/// Registry of live sessions.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    registry: Arc<SessionRegistry>,
    store: Arc<dyn SessionStore>,
    settings: HubSettings,
    shutdown: watch::Sender<bool>,
    next_instance: AtomicU64,
}

impl Hub {
    pub fn new(store: Arc<dyn SessionStore>, settings: HubSettings) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(HubInner {
                registry: Arc::new(SessionRegistry::new()),
                store,
                settings,
                shutdown,
                next_instance: AtomicU64::new(1),
            }),
        }
    }

    pub fn settings(&self) -> &HubSettings {
        &self.inner.settings
    }

    /// Return the running session for `id`, loading and starting it if
    /// needed. Concurrent callers for the same id get the same session.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the store has no such session
    /// - `Storage` if loading failed
    /// - `Ended` if the hub is shutting down
    pub async fn get_or_create(&self, id: SessionId) -> Result<SessionHandle, SessionError> {
        if *self.inner.shutdown.borrow() {
            return Err(SessionError::Ended);
        }
        for _ in 0..CONNECT_ATTEMPTS {
            let handle = self
                .inner
                .registry
                .get_or_create(id, || self.spawn_session(id))
                .await?;
            if !handle.is_closed() {
                return Ok(handle);
            }
            // An ending worker stays registered until its writes are flushed,
            // so a new instance never loads state older than the broadcasts.
            handle.retired().await;
            self.inner.registry.remove(&id, handle.instance());
        }
        Err(SessionError::Ended)
    }

    /// Register a new connection for `user` with session `id`.
    ///
    /// Retries transparently if the session retires between lookup and
    /// attach. On success the connection's snapshot is already queued on
    /// `outbound`.
    pub async fn connect(
        &self,
        id: SessionId,
        user: AuthenticatedUser,
    ) -> Result<Attachment, SessionError> {
        for _ in 0..CONNECT_ATTEMPTS {
            let handle = self.get_or_create(id).await?;
            let connection_id = ConnectionId::new();
            let (tx, rx) = mpsc::channel(self.inner.settings.outbound_queue_capacity);

            match handle.attach(connection_id, user.clone(), tx).await {
                Ok(()) => {
                    return Ok(Attachment {
                        handle,
                        connection_id,
                        outbound: rx,
                    })
                }
                Err(SessionError::Ended) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(SessionError::Ended)
    }

    /// The running session for `id`, if any.
    pub fn get(&self, id: &SessionId) -> Option<SessionHandle> {
        self.inner.registry.get(id)
    }

    /// Tear a session down. A no-op if it is not running.
    pub fn teardown(&self, id: &SessionId) {
        if let Some(handle) = self.inner.registry.get(id) {
            handle.cancel();
        }
    }

    pub fn session_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Stop every session and wait (bounded by the flush timeout) for them
    /// to deregister.
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        let registry = self.inner.registry.clone();
        let drained = tokio::time::timeout(self.inner.settings.flush_timeout, async move {
            while !registry.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                remaining = self.inner.registry.len(),
                "sessions still running after shutdown timeout"
            );
        }
    }

    async fn spawn_session(&self, id: SessionId) -> Result<SessionHandle, SessionError> {
        let record = self.inner.store.load_session(&id).await.map_err(|e| {
            tracing::warn!(session_id = %id, error = %e, "failed to load session");
            SessionError::from(e)
        })?;

        let settings = self.inner.settings.clone();
        let kind = record.kind;
        let session = Session::reconstitute(record, settings.policy_for(kind));
        let instance = self.inner.next_instance.fetch_add(1, Ordering::Relaxed);

        let (tx, rx) = mpsc::channel(settings.command_queue_capacity);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (retired_tx, retired_rx) = watch::channel(false);
        let handle = SessionHandle::new(id, kind, instance, tx, Arc::new(cancel_tx), retired_rx);

        let durable = DurableWriter::spawn(self.inner.store.clone(), id, settings.retry);
        let worker = SessionWorker::new(
            session,
            instance,
            rx,
            durable,
            self.inner.registry.clone(),
            retired_tx,
            settings,
            cancel_rx,
            self.inner.shutdown.subscribe(),
        );

        let task = tokio::spawn(worker.run());
        let registry = self.inner.registry.clone();
        tokio::spawn(async move {
            if let Err(e) = task.await {
                if e.is_panic() {
                    tracing::error!(session_id = %id, instance, "session worker panicked");
                } else {
                    tracing::error!(session_id = %id, instance, error = %e, "session worker aborted");
                }
                registry.remove(&id, instance);
            }
        });

        tracing::info!(session_id = %id, instance, kind = %kind, "session loaded");
        Ok(handle)
    }
}
