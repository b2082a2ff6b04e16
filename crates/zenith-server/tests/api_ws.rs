mod common;

use common::harness;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream};
use zenith_server::connections::ConnectionTable;
use zenith_server::sessions::SessionRegistry;
use zenith_server::{app, AppState};

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn serve(state: AppState) -> String {
    let app = app(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("ws://{}/ws", addr)
}

async fn next_event(ws: &mut WsStream) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).expect("event is json");
        }
    }
}

async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .expect("send");
}

async fn wait_until<F: Fn() -> bool>(check: F) {
    for _ in 0..50 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}

struct Server {
    url: String,
    sessions: SessionRegistry,
    connections: ConnectionTable,
    _harness: common::Harness,
}

async fn start() -> Server {
    let h = harness();
    let state = h.state();
    let sessions = state.sessions.clone();
    let connections = state.connections.clone();
    let url = serve(state).await;
    Server {
        url,
        sessions,
        connections,
        _harness: h,
    }
}

#[tokio::test]
async fn connect_announces_client_id() {
    let server = start().await;
    let (mut ws, _) = connect_async(server.url.as_str()).await.expect("connect");

    let event = next_event(&mut ws).await;
    assert_eq!(event["type"], "connected");
    let client_id = event["client_id"].as_str().unwrap();
    assert!(!client_id.is_empty());
    assert!(server.connections.is_connected(client_id).await);
}

#[tokio::test]
async fn session_lifecycle_over_websocket() {
    let server = start().await;
    let (mut ws, _) = connect_async(server.url.as_str()).await.expect("connect");
    let connected = next_event(&mut ws).await;
    let client_id = connected["client_id"].as_str().unwrap().to_string();

    // Audio before any session is a protocol error; the socket stays open.
    send_json(&mut ws, json!({"type": "audio_chunk", "data": "AAAA"})).await;
    let event = next_event(&mut ws).await;
    assert_eq!(event["type"], "error");
    assert_eq!(event["message"], "No active session found");

    send_json(&mut ws, json!({"type": "start_session", "duration": 2})).await;
    let started = next_event(&mut ws).await;
    assert_eq!(started["type"], "session_started");
    assert_eq!(started["duration"], 2);
    assert_eq!(started["client_id"], client_id.as_str());
    let session_id = started["session_id"].as_str().unwrap().to_string();
    assert!(started.get("replaced_session_id").is_none());

    ws.send(Message::Binary(vec![0u8; 16].into()))
        .await
        .expect("send binary");
    let event = next_event(&mut ws).await;
    assert_eq!(event["type"], "audio_received");
    assert_eq!(event["status"], "processing");
    assert_eq!(event["chunks_received"], 1);
    assert_eq!(event["session_id"], session_id.as_str());

    send_json(&mut ws, json!({"type": "audio_chunk", "data": "AAECAw=="})).await;
    let event = next_event(&mut ws).await;
    assert_eq!(event["chunks_received"], 2);
    assert_eq!(
        server.sessions.get(&client_id).map(|s| s.bytes_received),
        Some(20)
    );

    send_json(&mut ws, json!({"type": "end_session"})).await;
    let event = next_event(&mut ws).await;
    assert_eq!(event["type"], "session_ended");
    assert_eq!(event["session_id"], session_id.as_str());
    assert!(event["duration"].as_f64().unwrap() >= 0.0);
    assert!(!server.sessions.contains(&client_id));

    send_json(&mut ws, json!({"type": "end_session"})).await;
    let event = next_event(&mut ws).await;
    assert_eq!(event["type"], "error");
    assert_eq!(event["message"], "No active session to end");
}

#[tokio::test]
async fn restarting_a_session_reports_the_replaced_one() {
    let server = start().await;
    let (mut ws, _) = connect_async(server.url.as_str()).await.expect("connect");
    next_event(&mut ws).await;

    send_json(&mut ws, json!({"type": "start_session"})).await;
    let first = next_event(&mut ws).await;
    assert_eq!(first["duration"], 30);

    send_json(&mut ws, json!({"type": "start_session", "duration": 5})).await;
    let second = next_event(&mut ws).await;
    assert_eq!(second["type"], "session_started");
    assert_eq!(second["replaced_session_id"], first["session_id"]);
    assert_ne!(second["session_id"], first["session_id"]);
    assert_eq!(server.sessions.len(), 1);
}

#[tokio::test]
async fn malformed_frames_get_error_events() {
    let server = start().await;
    let (mut ws, _) = connect_async(server.url.as_str()).await.expect("connect");
    next_event(&mut ws).await;

    ws.send(Message::Text("{not json".into()))
        .await
        .expect("send");
    let event = next_event(&mut ws).await;
    assert_eq!(event["type"], "error");
    assert_eq!(event["message"], "invalid message format");

    send_json(&mut ws, json!({"type": "dance"})).await;
    let event = next_event(&mut ws).await;
    assert_eq!(event["message"], "invalid message format");

    send_json(&mut ws, json!({"type": "start_session", "duration": 0})).await;
    let event = next_event(&mut ws).await;
    assert_eq!(event["type"], "error");

    send_json(&mut ws, json!({"type": "start_session", "duration": 1.5})).await;
    let event = next_event(&mut ws).await;
    assert_eq!(event["type"], "error");
    assert!(event["message"]
        .as_str()
        .unwrap()
        .starts_with("duration must be a whole number of minutes"));

    // Still usable afterwards.
    send_json(&mut ws, json!({"type": "start_session", "duration": 1})).await;
    let event = next_event(&mut ws).await;
    assert_eq!(event["type"], "session_started");
}

#[tokio::test]
async fn disconnect_discards_session_and_connection() {
    let server = start().await;
    let (mut ws, _) = connect_async(server.url.as_str()).await.expect("connect");
    let connected = next_event(&mut ws).await;
    let client_id = connected["client_id"].as_str().unwrap().to_string();

    send_json(&mut ws, json!({"type": "start_session", "duration": 10})).await;
    next_event(&mut ws).await;
    assert!(server.sessions.contains(&client_id));

    ws.close(None).await.expect("close");
    drop(ws);

    let sessions = server.sessions.clone();
    let id = client_id.clone();
    wait_until(move || !sessions.contains(&id)).await;

    for _ in 0..50 {
        if !server.connections.is_connected(&client_id).await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("connection entry was not removed");
}
