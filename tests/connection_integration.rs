//! Integration tests for the connection loop.
//!
//! Uses in-process channels as the transport so the full path (decode,
//! session queue, outbound queue, encode) runs without a socket.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::StreamExt;
use serde_json::{json, Value};

use estimation_hub::adapters::storage::InMemorySessionStore;
use estimation_hub::adapters::websocket::{run_connection, Frame};
use estimation_hub::application::hub::{Hub, HubSettings};
use estimation_hub::domain::foundation::{
    AuthenticatedUser, ParticipantId, SessionId, WorkItemId,
};
use estimation_hub::domain::session::{SessionKind, SessionRecord, WorkItem};

const WAIT: Duration = Duration::from_secs(2);

struct Client {
    to_server: UnboundedSender<Result<Frame, Infallible>>,
    from_server: UnboundedReceiver<Frame>,
}

impl Client {
    fn send(&self, value: Value) {
        self.to_server
            .unbounded_send(Ok(Frame::Text(value.to_string())))
            .unwrap();
    }

    fn send_raw(&self, text: &str) {
        self.to_server
            .unbounded_send(Ok(Frame::Text(text.to_string())))
            .unwrap();
    }

    async fn next(&mut self) -> Option<Value> {
        let frame = tokio::time::timeout(WAIT, self.from_server.next())
            .await
            .expect("timed out waiting for a frame")?;
        match frame {
            Frame::Text(text) => Some(serde_json::from_str(&text).unwrap()),
            Frame::Binary(_) => panic!("server sent binary"),
            Frame::Close => None,
        }
    }

    /// Skip frames until one of type `kind` arrives.
    async fn expect(&mut self, kind: &str) -> Value {
        loop {
            match self.next().await {
                Some(frame) if frame["type"] == kind => return frame,
                Some(_) => continue,
                None => panic!("connection closed while waiting for {}", kind),
            }
        }
    }
}

struct Fixture {
    hub: Hub,
    session_id: SessionId,
    w1: WorkItemId,
}

fn fixture() -> Fixture {
    let session_id = SessionId::new();
    let w1 = WorkItemId::new();
    let record = SessionRecord::new(session_id, SessionKind::Storyboard, "Roadmap")
        .with_leader(ParticipantId::new("f").unwrap())
        .with_work_item(WorkItem::new(w1, "Search", None, 1).unwrap());
    let store = Arc::new(InMemorySessionStore::new().with_session(record));
    Fixture {
        hub: Hub::new(store, HubSettings::default()),
        session_id,
        w1,
    }
}

impl Fixture {
    async fn open(&self, id: &str) -> Client {
        let user = AuthenticatedUser::registered(ParticipantId::new(id).unwrap(), id);
        let attachment = self.hub.connect(self.session_id, user).await.unwrap();

        let (to_server, inbound) = unbounded();
        let (outbound, from_server) = unbounded();
        tokio::spawn(run_connection(attachment, inbound, outbound));

        Client {
            to_server,
            from_server,
        }
    }
}

#[tokio::test]
async fn snapshot_arrives_first_then_join_event() {
    let fx = fixture();
    let mut f = fx.open("f").await;

    let first = f.next().await.unwrap();
    assert_eq!(first["type"], "session_snapshot");
    assert_eq!(first["payload"]["kind"], "storyboard");
    assert_eq!(first["payload"]["leader"], "f");

    let joined = f.next().await.unwrap();
    assert_eq!(joined["type"], "participant_joined");
    assert_eq!(joined["payload"]["participantId"], "f");
    assert_eq!(joined["payload"]["role"], "facilitator");
}

#[tokio::test]
async fn undecodable_message_gets_private_error_and_connection_survives() {
    let fx = fixture();
    let mut f = fx.open("f").await;
    f.expect("participant_joined").await;

    f.send_raw("{not json");
    let error = f.expect("error").await;
    assert_eq!(error["payload"]["code"], "EINVALID");

    f.send(json!({"type": "self_destruct"}));
    let error = f.expect("error").await;
    assert_eq!(error["payload"]["code"], "EINVALID");

    f.send(json!({"type": "ping"}));
    let pong = f.expect("pong").await;
    assert!(pong["payload"]["timestamp"].is_string());
}

#[tokio::test]
async fn vote_flow_over_the_wire() {
    let fx = fixture();
    let mut f = fx.open("f").await;
    let mut a = fx.open("a").await;
    f.expect("participant_joined").await;
    a.expect("session_snapshot").await;

    f.send(json!({
        "type": "activate_work_item",
        "payload": {"workItemId": fx.w1.to_string()}
    }));
    a.expect("work_item_activated").await;

    a.send(json!({"type": "vote", "payload": {"value": "13"}}));
    let cast = f.expect("vote_cast").await;
    assert_eq!(cast["payload"]["participantId"], "a");
    assert!(cast["payload"].get("value").is_none());

    f.send(json!({"type": "reveal"}));
    let revealed = a.expect("votes_revealed").await;
    assert_eq!(revealed["payload"]["votes"][0]["value"], "13");
    assert_eq!(revealed["payload"]["automatic"], false);
}

#[tokio::test]
async fn non_facilitator_reveal_is_rejected_privately() {
    let fx = fixture();
    let mut f = fx.open("f").await;
    let mut a = fx.open("a").await;
    a.expect("session_snapshot").await;

    f.send(json!({
        "type": "activate_work_item",
        "payload": {"workItemId": fx.w1.to_string()}
    }));
    a.expect("work_item_activated").await;

    a.send(json!({"type": "reveal"}));
    let error = a.expect("error").await;
    assert_eq!(error["payload"]["code"], "EUNAUTHORIZED");

    // f sees a's join and the activation, but nothing about the rejection.
    f.send(json!({"type": "ping"}));
    loop {
        let frame = f.next().await.unwrap();
        assert_ne!(frame["type"], "error");
        assert_ne!(frame["type"], "votes_revealed");
        if frame["type"] == "pong" {
            break;
        }
    }
}

#[tokio::test]
async fn closing_the_client_submits_leave() {
    let fx = fixture();
    let mut f = fx.open("f").await;
    let a = fx.open("a").await;
    f.expect("participant_joined").await;
    f.expect("participant_joined").await;

    a.to_server.unbounded_send(Ok(Frame::Close)).unwrap();

    let left = f.expect("participant_left").await;
    assert_eq!(left["payload"]["participantId"], "a");
}

#[tokio::test]
async fn dropped_transport_submits_leave() {
    let fx = fixture();
    let mut f = fx.open("f").await;
    let a = fx.open("a").await;
    f.expect("participant_joined").await;
    f.expect("participant_joined").await;

    drop(a);

    let left = f.expect("participant_left").await;
    assert_eq!(left["payload"]["participantId"], "a");
}

#[tokio::test]
async fn ending_the_session_sends_terminal_frame_then_close() {
    let fx = fixture();
    let mut f = fx.open("f").await;
    let mut a = fx.open("a").await;
    a.expect("session_snapshot").await;

    f.send(json!({"type": "end_session"}));

    let ended = a.expect("session_ended").await;
    assert_eq!(ended["payload"]["reason"], "ended_by_facilitator");
    assert!(a.next().await.is_none());
}

#[tokio::test]
async fn explicit_leave_closes_only_that_connection() {
    let fx = fixture();
    let mut f = fx.open("f").await;
    let mut a = fx.open("a").await;
    a.expect("session_snapshot").await;
    f.expect("participant_joined").await;
    f.expect("participant_joined").await;

    a.send(json!({"type": "leave"}));

    f.expect("participant_left").await;
    loop {
        match a.next().await {
            Some(frame) => assert_ne!(frame["type"], "session_ended"),
            None => break,
        }
    }
}
