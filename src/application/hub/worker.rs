//! The single writer of one session.
//!
//! A worker owns its `Session` outright and consumes one ordered queue.
//! Every message is handled to completion, including the broadcast of the
//! resulting events, before the next one is taken off the queue.
//!
//! ```text
//! connections ──▶ [command queue] ──▶ worker ──▶ Session::execute
//!                                       │
//!                                       ├──▶ try_send to every outbound queue
//!                                       └──▶ DurableWriter (never awaited)
//! ```
//!
//! Besides queue messages the worker wakes for the idle teardown deadline,
//! roster grace expiries, its own cancellation and process shutdown.
//!
//! An internal error from the aggregate, or a durable writer that died,
//! is a fault: the session ends with `internal_error` for everyone and the
//! next join loads it afresh from the store.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant};

use crate::domain::foundation::{AuthenticatedUser, ParticipantId, SessionId};
use crate::domain::session::{
    Command, EndReason, Outcome, Session, SessionEndedPayload, SessionError, SessionEvent,
};

use super::durable::DurableWriter;
use super::handle::WorkerMessage;
use super::outbound::{
    ConnectionId, Outbound, OutboundFrame, OutboundSender, PongPayload, PrivateMessage,
};
use super::registry::SessionRegistry;
use super::HubSettings;

struct Attached {
    participant_id: ParticipantId,
    outbound: OutboundSender,
}

pub(crate) struct SessionWorker {
    session: Session,
    instance: u64,
    rx: mpsc::Receiver<WorkerMessage>,
    connections: HashMap<ConnectionId, Attached>,
    /// Connections that failed a delivery and still need their Leave processed.
    evicted: Vec<(ConnectionId, ParticipantId)>,
    /// Disconnected participants and when they drop off the roster.
    grace: HashMap<ParticipantId, Instant>,
    idle_since: Option<Instant>,
    durable: DurableWriter,
    /// Set when the session can no longer continue.
    fault: Option<String>,
    registry: Arc<SessionRegistry>,
    /// Flipped once the session is deregistered.
    retired: watch::Sender<bool>,
    settings: HubSettings,
    cancel: watch::Receiver<bool>,
    shutdown: watch::Receiver<bool>,
}

enum Wake {
    Message(WorkerMessage),
    Closed,
    Cancelled,
    Shutdown,
    Idle,
    Expire,
}

impl SessionWorker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        session: Session,
        instance: u64,
        rx: mpsc::Receiver<WorkerMessage>,
        durable: DurableWriter,
        registry: Arc<SessionRegistry>,
        retired: watch::Sender<bool>,
        settings: HubSettings,
        cancel: watch::Receiver<bool>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let now = Instant::now();
        let grace = session
            .participants()
            .filter(|p| !p.is_connected())
            .map(|p| (p.id().clone(), now + settings.roster_grace))
            .collect();

        Self {
            session,
            instance,
            rx,
            connections: HashMap::new(),
            evicted: Vec::new(),
            grace,
            idle_since: Some(now),
            durable,
            fault: None,
            registry,
            retired,
            settings,
            cancel,
            shutdown,
        }
    }

    fn id(&self) -> SessionId {
        *self.session.id()
    }

    pub(crate) async fn run(mut self) {
        tracing::info!(session_id = %self.id(), instance = self.instance, "session started");

        loop {
            let idle_at = self.idle_since.map(|since| since + self.settings.idle_teardown);
            let expire_at = self.grace.values().min().copied();

            let wake = tokio::select! {
                biased;
                _ = wait_for_true(&mut self.cancel) => Wake::Cancelled,
                _ = wait_for_true(&mut self.shutdown) => Wake::Shutdown,
                message = self.rx.recv() => match message {
                    Some(message) => Wake::Message(message),
                    None => Wake::Closed,
                },
                _ = sleep_until(expire_at) => Wake::Expire,
                _ = sleep_until(idle_at) => Wake::Idle,
            };

            // The aggregate announces its own end; everything else is
            // announced here.
            let ended = match wake {
                Wake::Message(message) => self.handle(message).map(|reason| (reason, false)),
                Wake::Expire => {
                    self.expire_due();
                    None
                }
                Wake::Idle => {
                    if self.idle_teardown().await {
                        return;
                    }
                    None
                }
                Wake::Cancelled | Wake::Shutdown | Wake::Closed => {
                    Some((EndReason::Shutdown, true))
                }
            };

            let ended = match self.fault.take() {
                Some(fault) => {
                    tracing::error!(
                        session_id = %self.id(),
                        instance = self.instance,
                        fault = %fault,
                        "session worker fault, ending session"
                    );
                    Some((EndReason::InternalError, true))
                }
                None => ended,
            };

            if let Some((reason, announce)) = ended {
                self.end(reason, announce).await;
                return;
            }
        }
    }

    /// Handle one queue message. Returns the end reason if the session ended.
    fn handle(&mut self, message: WorkerMessage) -> Option<EndReason> {
        match message {
            WorkerMessage::Attach {
                connection_id,
                user,
                outbound,
                reply,
            } => {
                let result = self.attach(connection_id, user, outbound);
                if let Err(SessionError::Internal(fault)) = &result {
                    self.fault = Some(fault.clone());
                }
                let _ = reply.send(result);
                None
            }
            WorkerMessage::Command {
                connection_id,
                command,
            } => self.command(connection_id, command),
            WorkerMessage::RequestState { connection_id } => {
                self.send_snapshot(connection_id);
                self.process_evictions();
                None
            }
            WorkerMessage::Ping { connection_id } => {
                let pong = Outbound::Private(PrivateMessage::Pong(PongPayload::now()));
                self.send_private(connection_id, pong);
                self.process_evictions();
                None
            }
            WorkerMessage::Reject {
                connection_id,
                error,
            } => {
                self.send_private(connection_id, Outbound::error(&error));
                self.process_evictions();
                None
            }
            WorkerMessage::Detach { connection_id } => {
                if let Some(attached) = self.connections.remove(&connection_id) {
                    tracing::info!(
                        session_id = %self.id(),
                        connection_id = %connection_id,
                        participant_id = %attached.participant_id,
                        "connection detached"
                    );
                    self.release(attached.participant_id);
                }
                None
            }
        }
    }

    fn attach(
        &mut self,
        connection_id: ConnectionId,
        user: AuthenticatedUser,
        outbound: OutboundSender,
    ) -> Result<(), SessionError> {
        let participant_id = user.id.clone();
        let first_connection = !self
            .connections
            .values()
            .any(|c| c.participant_id == participant_id);

        let outcome = if first_connection {
            self.session.execute(
                &participant_id,
                Command::Join {
                    display_name: user.display_name,
                },
            )?
        } else {
            Outcome::default()
        };

        self.connections.insert(
            connection_id,
            Attached {
                participant_id: participant_id.clone(),
                outbound,
            },
        );
        self.grace.remove(&participant_id);
        self.idle_since = None;

        tracing::info!(
            session_id = %self.id(),
            connection_id = %connection_id,
            participant_id = %participant_id,
            connections = self.connections.len(),
            "connection attached"
        );

        self.send_snapshot(connection_id);
        self.publish(outcome);
        Ok(())
    }

    fn command(&mut self, connection_id: ConnectionId, command: Command) -> Option<EndReason> {
        let Some(participant_id) = self
            .connections
            .get(&connection_id)
            .map(|c| c.participant_id.clone())
        else {
            tracing::debug!(
                session_id = %self.id(),
                connection_id = %connection_id,
                "command from unattached connection ignored"
            );
            return None;
        };

        if matches!(command, Command::Leave) {
            // An explicit leave ends this connection like a close would.
            self.connections.remove(&connection_id);
            self.release(participant_id);
            return None;
        }

        let name = command.name();
        match self.session.execute(&participant_id, command) {
            Ok(outcome) => {
                let ended = outcome.ended;
                self.publish(outcome);
                ended
            }
            Err(SessionError::Internal(fault)) => {
                self.fault = Some(format!("{}: {}", name, fault));
                None
            }
            Err(e) => {
                tracing::debug!(
                    session_id = %self.id(),
                    participant_id = %participant_id,
                    command = name,
                    code = %e.code(),
                    "command rejected"
                );
                self.send_private(connection_id, Outbound::error(&e));
                self.process_evictions();
                None
            }
        }
    }

    /// Called once a connection of `participant_id` is gone.
    fn release(&mut self, participant_id: ParticipantId) {
        let still_connected = self
            .connections
            .values()
            .any(|c| c.participant_id == participant_id);
        if !still_connected {
            match self.session.execute(&participant_id, Command::Leave) {
                Ok(outcome) => self.publish(outcome),
                Err(e) => tracing::warn!(
                    session_id = %self.id(),
                    participant_id = %participant_id,
                    error = %e,
                    "leave rejected"
                ),
            }
            if self.session.participant(&participant_id).is_some() {
                self.grace
                    .insert(participant_id, Instant::now() + self.settings.roster_grace);
            }
        }
        if self.connections.is_empty() && self.idle_since.is_none() {
            self.idle_since = Some(Instant::now());
        }
    }

    fn expire_due(&mut self) {
        let now = Instant::now();
        let due: Vec<ParticipantId> = self
            .grace
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for participant_id in due {
            self.grace.remove(&participant_id);
            let outcome = self.session.expire_participant(&participant_id);
            if !outcome.is_empty() {
                tracing::info!(
                    session_id = %self.id(),
                    participant_id = %participant_id,
                    "participant removed after grace period"
                );
            }
            self.publish(outcome);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Delivery
    // ─────────────────────────────────────────────────────────────────────────

    /// Hand writes to the durable writer and broadcast events in order.
    fn publish(&mut self, outcome: Outcome) {
        if let Err(e) = self.durable.enqueue(outcome.writes) {
            self.fault.get_or_insert_with(|| e.message());
        }
        for event in outcome.events {
            self.broadcast(Arc::new(Outbound::Event(event)));
        }
        self.process_evictions();
    }

    /// Deliver to every connection without waiting. A connection whose
    /// queue is full or closed is dropped on the spot.
    fn broadcast(&mut self, frame: OutboundFrame) {
        let mut failed = Vec::new();
        for (connection_id, attached) in &self.connections {
            if attached.outbound.try_send(frame.clone()).is_err() {
                failed.push(*connection_id);
            }
        }
        for connection_id in failed {
            self.evict(connection_id, frame.type_name());
        }
    }

    fn send_private(&mut self, connection_id: ConnectionId, frame: Outbound) {
        let name = frame.type_name();
        let delivered = match self.connections.get(&connection_id) {
            Some(attached) => attached.outbound.try_send(Arc::new(frame)).is_ok(),
            None => return,
        };
        if !delivered {
            self.evict(connection_id, name);
        }
    }

    fn send_snapshot(&mut self, connection_id: ConnectionId) {
        let Some(viewer) = self
            .connections
            .get(&connection_id)
            .map(|c| c.participant_id.clone())
        else {
            return;
        };
        let snapshot = self.session.snapshot_for(&viewer);
        self.send_private(
            connection_id,
            Outbound::Private(PrivateMessage::SessionSnapshot(snapshot)),
        );
    }

    fn evict(&mut self, connection_id: ConnectionId, frame: &str) {
        if let Some(attached) = self.connections.remove(&connection_id) {
            tracing::warn!(
                session_id = %self.id(),
                connection_id = %connection_id,
                participant_id = %attached.participant_id,
                frame,
                "outbound queue full or closed, disconnecting"
            );
            self.evicted.push((connection_id, attached.participant_id));
        }
    }

    /// Turn evicted connections into leaves. Leaves may evict further
    /// connections, so this runs until nothing is pending.
    fn process_evictions(&mut self) {
        while let Some((_, participant_id)) = self.evicted.pop() {
            self.release(participant_id);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Teardown
    // ─────────────────────────────────────────────────────────────────────────

    /// Retire the session once it has been empty for the idle window.
    ///
    /// Returns `false` if activity arrived in the meantime.
    async fn idle_teardown(&mut self) -> bool {
        if !self.connections.is_empty() || !self.rx.is_empty() {
            return false;
        }
        if !self.durable.flush(self.settings.flush_timeout).await {
            tracing::error!(
                session_id = %self.id(),
                "storage writes still pending at teardown, continuing in background"
            );
        }
        if !self.rx.is_empty() {
            return false;
        }

        self.registry.remove(&self.id(), self.instance);
        self.retired.send_replace(true);
        self.rx.close();
        self.drain_queue();
        tracing::info!(session_id = %self.id(), instance = self.instance, "idle session retired");
        true
    }

    /// Stop the session. Queue intake closes first and deregistration
    /// comes last, after the durable writes were flushed. Until then the
    /// closed handle makes joiners wait for `retired`.
    async fn end(&mut self, reason: EndReason, announce: bool) {
        self.rx.close();

        if announce {
            let frame = Arc::new(Outbound::Event(SessionEvent::SessionEnded(
                SessionEndedPayload { reason },
            )));
            for attached in self.connections.values() {
                let _ = attached.outbound.try_send(frame.clone());
            }
        }
        self.connections.clear();
        self.drain_queue();

        if !self.durable.flush(self.settings.flush_timeout).await {
            tracing::error!(
                session_id = %self.id(),
                "storage writes still pending at shutdown, continuing in background"
            );
        }
        self.registry.remove(&self.id(), self.instance);
        self.retired.send_replace(true);
        tracing::info!(session_id = %self.id(), instance = self.instance, ?reason, "session ended");
    }

    /// Reject whatever is still queued after the queue was closed.
    fn drain_queue(&mut self) {
        while let Ok(message) = self.rx.try_recv() {
            if let WorkerMessage::Attach { reply, .. } = message {
                let _ = reply.send(Err(SessionError::Ended));
            }
        }
    }
}

/// Resolves once the watched flag is true. Never resolves if the sender is
/// dropped while the flag is false.
async fn wait_for_true(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
