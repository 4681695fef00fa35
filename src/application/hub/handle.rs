//! Cloneable handle to a running session worker.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use crate::domain::foundation::{AuthenticatedUser, SessionId};
use crate::domain::session::{Command, SessionError, SessionKind};

use super::outbound::{ConnectionId, OutboundSender};

/// Messages accepted by a session worker, processed strictly in order.
#[derive(Debug)]
pub(crate) enum WorkerMessage {
    Attach {
        connection_id: ConnectionId,
        user: AuthenticatedUser,
        outbound: OutboundSender,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Command {
        connection_id: ConnectionId,
        command: Command,
    },
    RequestState {
        connection_id: ConnectionId,
    },
    Ping {
        connection_id: ConnectionId,
    },
    Reject {
        connection_id: ConnectionId,
        error: SessionError,
    },
    Detach {
        connection_id: ConnectionId,
    },
}

/// The only way to talk to a session. Every method enqueues onto the
/// session's command queue; none of them touches session state directly.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    kind: SessionKind,
    instance: u64,
    tx: mpsc::Sender<WorkerMessage>,
    cancel: Arc<watch::Sender<bool>>,
    retired: watch::Receiver<bool>,
}

impl SessionHandle {
    pub(crate) fn new(
        id: SessionId,
        kind: SessionKind,
        instance: u64,
        tx: mpsc::Sender<WorkerMessage>,
        cancel: Arc<watch::Sender<bool>>,
        retired: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id,
            kind,
            instance,
            tx,
            cancel,
            retired,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    /// Distinguishes successive workers for the same session id.
    pub fn instance(&self) -> u64 {
        self.instance
    }

    /// True once the worker stopped accepting messages.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the worker has deregistered, which happens only after
    /// its durable writes were flushed, or once the worker is gone.
    pub async fn retired(&self) {
        let mut retired = self.retired.clone();
        let _ = retired.wait_for(|done| *done).await;
    }

    /// Register a connection and join its identity to the session.
    ///
    /// On success the worker has already queued the private snapshot on
    /// `outbound`.
    pub async fn attach(
        &self,
        connection_id: ConnectionId,
        user: AuthenticatedUser,
        outbound: OutboundSender,
    ) -> Result<(), SessionError> {
        let (reply, response) = oneshot::channel();
        self.send(WorkerMessage::Attach {
            connection_id,
            user,
            outbound,
            reply,
        })
        .await?;
        response.await.map_err(|_| SessionError::Ended)?
    }

    /// Enqueue a command. Rejections are delivered on the connection's
    /// outbound queue, not returned here.
    pub async fn submit(
        &self,
        connection_id: ConnectionId,
        command: Command,
    ) -> Result<(), SessionError> {
        self.send(WorkerMessage::Command {
            connection_id,
            command,
        })
        .await
    }

    pub async fn request_state(&self, connection_id: ConnectionId) -> Result<(), SessionError> {
        self.send(WorkerMessage::RequestState { connection_id })
            .await
    }

    pub async fn ping(&self, connection_id: ConnectionId) -> Result<(), SessionError> {
        self.send(WorkerMessage::Ping { connection_id }).await
    }

    /// Deliver `error` privately to the connection, in queue order with
    /// its commands. Used for messages that never became a command.
    pub async fn reject(
        &self,
        connection_id: ConnectionId,
        error: SessionError,
    ) -> Result<(), SessionError> {
        self.send(WorkerMessage::Reject {
            connection_id,
            error,
        })
        .await
    }

    /// Unregister a connection. A no-op if the session already ended.
    pub async fn detach(&self, connection_id: ConnectionId) {
        let _ = self.send(WorkerMessage::Detach { connection_id }).await;
    }

    /// Tear the session down. Idempotent.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    async fn send(&self, message: WorkerMessage) -> Result<(), SessionError> {
        self.tx.send(message).await.map_err(|_| SessionError::Ended)
    }
}
