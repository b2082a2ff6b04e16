//! Tests for the background session reaper.
//!
//! These tests verify:
//! - Sessions past their budget are evicted and the client is told
//! - Sessions inside their budget survive a sweep
//! - The spawned task sweeps on its interval and stops on shutdown
//! - The task is disabled when the interval is 0

use std::time::Duration;
use tokio::sync::{mpsc, watch};
use zenith_server::api_ws::{handle_client_event, ClientEvent, ServerEvent};
use zenith_server::background::{reap_expired_sessions, start_session_reaper};
use zenith_server::connections::ConnectionTable;
use zenith_server::sessions::{SessionLimits, SessionRegistry};

async fn connected(
    connections: &ConnectionTable,
    client_id: &str,
) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    connections.add(client_id.to_string(), tx).await;
    rx
}

#[tokio::test(start_paused = true)]
async fn expired_session_is_evicted_and_notified() {
    let registry = SessionRegistry::new();
    let connections = ConnectionTable::new();
    let mut rx = connected(&connections, "c1").await;

    let started = registry.on_start("c1", 1);
    let session_id = started.session.db_session_id.clone();

    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(reap_expired_sessions(&registry, &connections).await, 1);
    assert!(!registry.contains("c1"));

    let json = rx.try_recv().expect("expiry event queued");
    let event: serde_json::Value = serde_json::from_str(&json).expect("valid json");
    assert_eq!(event["type"], "session_expired");
    assert_eq!(event["duration"], 1);
    assert_eq!(event["session_id"], session_id.as_str());

    // A later chunk on the same connection finds no session.
    let reply = handle_client_event(
        &registry,
        SessionLimits::default(),
        "c1",
        ClientEvent::AudioChunk {
            data: Some("AAAA".to_string()),
        },
    );
    assert_eq!(reply, ServerEvent::error("No active session found"));
}

#[tokio::test(start_paused = true)]
async fn live_session_survives_a_sweep() {
    let registry = SessionRegistry::new();
    let connections = ConnectionTable::new();
    let mut rx = connected(&connections, "c1").await;

    registry.on_start("c1", 1);
    tokio::time::advance(Duration::from_secs(59)).await;

    assert_eq!(reap_expired_sessions(&registry, &connections).await, 0);
    assert!(registry.contains("c1"));
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn expired_session_of_departed_client_is_still_evicted() {
    let registry = SessionRegistry::new();
    let connections = ConnectionTable::new();

    registry.on_start("gone", 1);
    tokio::time::advance(Duration::from_secs(120)).await;

    assert_eq!(reap_expired_sessions(&registry, &connections).await, 1);
    assert!(registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn spawned_reaper_sweeps_and_stops_on_shutdown() {
    let registry = SessionRegistry::new();
    let connections = ConnectionTable::new();
    let mut rx = connected(&connections, "c1").await;
    registry.on_start("c1", 1);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(start_session_reaper(
        registry.clone(),
        connections.clone(),
        Duration::from_secs(30),
        shutdown_rx,
    ));

    // Ticks at 30s and 60s leave the session alone; the 90s tick evicts it.
    tokio::time::sleep(Duration::from_secs(65)).await;
    assert!(registry.contains("c1"));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(!registry.contains("c1"));

    let json = rx.recv().await.expect("expiry event");
    assert!(json.contains("session_expired"));

    shutdown_tx.send(true).expect("reaper listening");
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("reaper stops promptly")
        .expect("reaper task");
}

#[tokio::test]
async fn zero_interval_disables_reaper() {
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::time::timeout(
        Duration::from_secs(1),
        start_session_reaper(
            SessionRegistry::new(),
            ConnectionTable::new(),
            Duration::ZERO,
            shutdown_rx,
        ),
    )
    .await
    .expect("returns immediately");
}
