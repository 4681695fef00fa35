//! One participant's live connection to a session.
//!
//! A connection runs two tasks for its lifetime:
//! - the read task decodes inbound frames and enqueues them on the session
//! - the write task drains the connection's outbound queue onto the wire
//!
//! Whichever finishes first ends the connection. The session is then told
//! to detach it, which the session treats as a Leave once the identity has
//! no other connection.
//!
//! The transport is any `Stream` of [`Frame`]s plus a `Sink` of them, so the
//! same loop serves axum WebSockets and in-process test channels.

use std::fmt::Display;

use futures::{Sink, SinkExt, Stream, StreamExt};

use crate::application::hub::{Attachment, ConnectionId, Outbound, OutboundReceiver, SessionHandle};
use crate::domain::session::{EndReason, SessionEndedPayload, SessionError, SessionEvent};

use super::messages::{ClientMessage, ClientRequest};

/// Transport-neutral frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

/// Drive a connection until either direction closes.
pub async fn run_connection<S, E, K>(attachment: Attachment, inbound: S, outbound: K)
where
    S: Stream<Item = Result<Frame, E>> + Unpin + Send + 'static,
    E: Display + Send + 'static,
    K: Sink<Frame> + Unpin + Send + 'static,
    K::Error: Display,
{
    let Attachment {
        handle,
        connection_id,
        outbound: queue,
    } = attachment;

    tracing::info!(
        session_id = %handle.id(),
        connection_id = %connection_id,
        "connection opened"
    );

    let mut send_task = tokio::spawn(write_loop(handle.clone(), connection_id, queue, outbound));
    let mut recv_task = tokio::spawn(read_loop(handle.clone(), connection_id, inbound));

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
        }
    }

    handle.detach(connection_id).await;
    tracing::info!(
        session_id = %handle.id(),
        connection_id = %connection_id,
        "connection closed"
    );
}

/// Decode inbound frames and enqueue them on the session, in order.
async fn read_loop<S, E>(handle: SessionHandle, connection_id: ConnectionId, mut inbound: S)
where
    S: Stream<Item = Result<Frame, E>> + Unpin,
    E: Display,
{
    while let Some(result) = inbound.next().await {
        let bytes = match result {
            Ok(Frame::Text(text)) => text.into_bytes(),
            Ok(Frame::Binary(bytes)) => bytes,
            Ok(Frame::Close) => {
                tracing::debug!(connection_id = %connection_id, "client sent close frame");
                break;
            }
            Err(e) => {
                tracing::debug!(connection_id = %connection_id, "receive error: {}", e);
                break;
            }
        };

        let submitted = match ClientMessage::decode(&bytes) {
            Ok(message) => match message.into_request() {
                ClientRequest::Command(command) => handle.submit(connection_id, command).await,
                ClientRequest::RequestState => handle.request_state(connection_id).await,
                ClientRequest::Ping => handle.ping(connection_id).await,
            },
            Err(e) => {
                tracing::debug!(connection_id = %connection_id, error = %e, "undecodable message");
                handle
                    .reject(
                        connection_id,
                        SessionError::invalid(format!("malformed message: {}", e)),
                    )
                    .await
            }
        };

        if submitted.is_err() {
            break;
        }
    }
}

/// Serialize outbound frames onto the wire until the queue closes.
async fn write_loop<K>(
    handle: SessionHandle,
    connection_id: ConnectionId,
    mut queue: OutboundReceiver,
    mut sink: K,
) where
    K: Sink<Frame> + Unpin,
    K::Error: Display,
{
    let mut ended = false;
    while let Some(frame) = queue.recv().await {
        if let Err(e) = send_frame(&mut sink, &frame).await {
            tracing::debug!(connection_id = %connection_id, "send error, closing connection: {}", e);
            return;
        }
        if frame.is_terminal() {
            ended = true;
            break;
        }
    }

    // The queue closes without a terminal frame either because this
    // connection was evicted or because the worker died. Only the latter
    // ends the session.
    if !ended && handle.is_closed() {
        let fault = Outbound::Event(SessionEvent::SessionEnded(SessionEndedPayload {
            reason: EndReason::InternalError,
        }));
        let _ = send_frame(&mut sink, &fault).await;
    }
    let _ = sink.send(Frame::Close).await;
}

async fn send_frame<K>(sink: &mut K, frame: &Outbound) -> Result<(), String>
where
    K: Sink<Frame> + Unpin,
    K::Error: Display,
{
    let json = serde_json::to_string(frame).map_err(|e| e.to_string())?;
    sink.send(Frame::Text(json)).await.map_err(|e| e.to_string())
}
