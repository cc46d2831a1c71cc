//! End-to-end: a real server on an ephemeral port, driven over WebSocket and
//! over the long-poll transport.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tether_core::frame::Frame;
use tether_core::ids::{DeviceId, SessionId};
use tether_core::path::Path;
use tether_core::storage::FactoryStorage;
use tether_engine::live::LiveNode;
use tether_engine::{
    el, encode_client, text, Access, App, ClientMessage, EngineConfig, LiveTree, ServerFrame,
    ServerMessage, View,
};
use tether_server::{start, ServerConfig, ServerHandle};
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);

// body [0]: count [0,0], button [0,1]
fn counter(n: &u32) -> View<u32> {
    el("body")
        .child(text(n.to_string()))
        .child(
            el("button")
                .child(text("+1"))
                .on("click", |a: Access<u32>| async move { a.transition(|n: &u32| n + 1).await }),
        )
        .into()
}

async fn boot() -> ServerHandle<u32> {
    let app = App::new(Arc::new(FactoryStorage::new(|_: &DeviceId| 0u32)), counter);
    let config = ServerConfig {
        port: 0,
        poll_timeout: Duration::from_millis(500),
        ..Default::default()
    };
    start(config, EngineConfig::default(), app).await.unwrap()
}

/// Browser-side mirror: applies frames in sequence order, skipping replays.
struct Mirror {
    live: LiveTree,
    render_num: u64,
    last_seq: u64,
}

impl Mirror {
    fn new() -> Self {
        Self {
            live: LiveTree::new(),
            render_num: 0,
            last_seq: 0,
        }
    }

    fn apply(&mut self, frame: &Frame) -> Option<ServerFrame> {
        let frame = ServerFrame::decode(frame).unwrap();
        if frame.seq <= self.last_seq {
            return None;
        }
        assert_eq!(frame.seq, self.last_seq + 1, "frames must arrive in order");
        self.last_seq = frame.seq;
        for message in &frame.messages {
            match message {
                ServerMessage::SetRenderNum(n) => self.render_num = *n,
                ServerMessage::Clear => self.live.clear(),
                ServerMessage::Patch(op) => self.live.apply(op).unwrap(),
                _ => {}
            }
        }
        Some(frame)
    }

    fn count(&self) -> String {
        match self.live.node(&Path::from_indices(vec![0, 0])) {
            Some(LiveNode::Text(t)) => t.clone(),
            other => panic!("expected count text, got {other:?}"),
        }
    }

    fn ack(&self) -> String {
        encode_client(&[ClientMessage::CallbackAck { seq: self.last_seq }]).to_json()
    }

    fn click(&self) -> String {
        encode_client(&[
            ClientMessage::CallbackAck { seq: self.last_seq },
            ClientMessage::DomEvent {
                render_num: self.render_num,
                path: Path::from_indices(vec![0, 1]),
                event_type: "click".into(),
                data: "{}".into(),
            },
        ])
        .to_json()
    }
}

struct Ids {
    device: DeviceId,
    session: SessionId,
}

impl Ids {
    fn new() -> Self {
        Self {
            device: DeviceId::new(),
            session: SessionId::new(),
        }
    }

    fn ws_url(&self, port: u16, has_tree: bool) -> String {
        format!(
            "ws://127.0.0.1:{port}/bridge/ws?device={}&session={}&has_tree={has_tree}",
            self.device, self.session
        )
    }

    fn poll_url(&self, port: u16, has_tree: bool) -> String {
        format!(
            "http://127.0.0.1:{port}/bridge/poll/{}/{}?has_tree={has_tree}",
            self.device, self.session
        )
    }

    fn publish_url(&self, port: u16) -> String {
        format!(
            "http://127.0.0.1:{port}/bridge/publish/{}/{}",
            self.device, self.session
        )
    }
}

async fn next_text<S>(ws: &mut S) -> String
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let msg = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = msg {
            return text.as_str().to_owned();
        }
    }
}

async fn poll(client: &reqwest::Client, url: &str) -> Option<Vec<Frame>> {
    let resp = client.get(url).send().await.unwrap();
    match resp.status().as_u16() {
        200 => Some(resp.json().await.unwrap()),
        204 => None,
        other => panic!("unexpected poll status {other}"),
    }
}

#[tokio::test]
async fn bootstrap_issues_device_cookie_and_fresh_session() {
    let server = boot().await;
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/", server.port);

    let resp = client.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let cookie = resp.headers()["set-cookie"].to_str().unwrap().to_owned();
    assert!(cookie.starts_with("device=dev_"), "{cookie}");
    let body = resp.text().await.unwrap();
    assert!(body.contains("data-session=\"sess_"));

    let resp = client
        .get(&url)
        .header("cookie", "device=dev_known")
        .send()
        .await
        .unwrap();
    let body = resp.text().await.unwrap();
    assert!(body.contains("data-device=\"dev_known\""));
}

#[tokio::test]
async fn websocket_renders_then_patches_on_click() {
    let server = boot().await;
    let ids = Ids::new();
    let (mut ws, _) = tokio_tungstenite::connect_async(ids.ws_url(server.port, false))
        .await
        .unwrap();

    let mut mirror = Mirror::new();
    let first = mirror.apply(&Frame::from_json(&next_text(&mut ws).await).unwrap()).unwrap();
    assert_eq!(first.seq, 1);
    assert_eq!(first.messages[1], ServerMessage::Clear);
    assert_eq!(mirror.count(), "0");

    ws.send(Message::Text(mirror.click().into())).await.unwrap();
    let patch = mirror.apply(&Frame::from_json(&next_text(&mut ws).await).unwrap()).unwrap();
    assert_eq!(patch.messages[0], ServerMessage::SetRenderNum(2));
    assert_eq!(mirror.count(), "1");

    let health: serde_json::Value = reqwest::get(format!("http://127.0.0.1:{}/health", server.port))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["sessions"]["total"], 1);
    assert_eq!(health["sessions"]["active"], 1);
}

#[tokio::test]
async fn polling_transport_round_trip() {
    let server = boot().await;
    let ids = Ids::new();
    let client = reqwest::Client::new();
    let mut mirror = Mirror::new();

    let frames = poll(&client, &ids.poll_url(server.port, false)).await.unwrap();
    for frame in &frames {
        mirror.apply(frame);
    }
    assert_eq!(mirror.count(), "0");

    let resp = client
        .post(ids.publish_url(server.port))
        .body(mirror.click())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let frames = poll(&client, &ids.poll_url(server.port, true)).await.unwrap();
    for frame in &frames {
        mirror.apply(frame);
    }
    assert_eq!(mirror.count(), "1");

    client
        .post(ids.publish_url(server.port))
        .body(mirror.ack())
        .send()
        .await
        .unwrap();
    // Everything acked: the next poll has nothing to carry.
    assert!(poll(&client, &ids.poll_url(server.port, true)).await.is_none());
}

#[tokio::test]
async fn switching_websocket_to_polling_keeps_state() {
    let server = boot().await;
    let ids = Ids::new();
    let mut mirror = Mirror::new();

    let (mut ws, _) = tokio_tungstenite::connect_async(ids.ws_url(server.port, false))
        .await
        .unwrap();
    mirror.apply(&Frame::from_json(&next_text(&mut ws).await).unwrap());
    ws.send(Message::Text(mirror.click().into())).await.unwrap();
    mirror.apply(&Frame::from_json(&next_text(&mut ws).await).unwrap());
    assert_eq!(mirror.count(), "1");
    ws.send(Message::Text(mirror.ack().into())).await.unwrap();
    ws.close(None).await.unwrap();

    let client = reqwest::Client::new();
    client
        .post(ids.publish_url(server.port))
        .body(mirror.click())
        .send()
        .await
        .unwrap();
    let mut fresh = None;
    for _ in 0..4 {
        if let Some(frames) = poll(&client, &ids.poll_url(server.port, true)).await {
            for frame in &frames {
                if let Some(applied) = mirror.apply(frame) {
                    fresh = Some(applied);
                }
            }
        }
        if fresh.is_some() {
            break;
        }
    }
    let fresh = fresh.expect("no patch after switching transport");
    assert!(!fresh.messages.contains(&ServerMessage::Clear));
    assert_eq!(mirror.count(), "2");

    let handle = server.registry().get(&ids.session).unwrap();
    assert_eq!(handle.state().await.unwrap(), 2);
}

#[tokio::test]
async fn publish_to_unknown_session_is_gone() {
    let server = boot().await;
    let ids = Ids::new();
    let resp = reqwest::Client::new()
        .post(ids.publish_url(server.port))
        .body("[0, 1]")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 410);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "session_expired");
}
