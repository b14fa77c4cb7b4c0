//! End-to-end session against a local WebSocket hub.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use homelink_client::{
    HeartbeatConfig, Session, SessionConfig, SessionError, StaticCredentials, TungsteniteTransport,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

const TOKEN: &str = "good-token";
const WAIT: Duration = Duration::from_secs(5);

/// Accept one client, play the hub's side of the protocol, and return every
/// frame the client sent.
async fn spawn_hub() -> (String, JoinHandle<Vec<Value>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let reply = |value: Value| Message::text(value.to_string());

        ws.send(reply(json!({"type": "auth_required", "ha_version": "2024.1.0"})))
            .await
            .unwrap();

        let mut received = Vec::new();
        while let Some(Ok(message)) = ws.next().await {
            let text = match message {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            let frame: Value = serde_json::from_str(text.as_str()).unwrap();
            received.push(frame.clone());

            let id = frame["id"].clone();
            let outgoing = match frame["type"].as_str().unwrap_or_default() {
                "auth" if frame["access_token"] == TOKEN => {
                    vec![json!({"type": "auth_ok", "ha_version": "2024.1.0"})]
                }
                "auth" => vec![json!({"type": "auth_invalid", "message": "Invalid password"})],
                "subscribe_events" => vec![
                    json!({"id": id, "type": "result", "success": true, "result": null}),
                    json!({
                        "id": id,
                        "type": "event",
                        "event": {
                            "event_type": "state_changed",
                            "data": {
                                "entity_id": "switch.garage",
                                "old_state": {"entity_id": "switch.garage", "state": "off", "attributes": {}},
                                "new_state": {"entity_id": "switch.garage", "state": "on", "attributes": {}}
                            },
                            "origin": "LOCAL",
                            "time_fired": "2024-01-01T12:00:00+00:00"
                        }
                    }),
                ],
                "get_states" => vec![json!({
                    "id": id,
                    "type": "result",
                    "success": true,
                    "result": [{"entity_id": "switch.garage", "state": "on", "attributes": {}}]
                })],
                _ => vec![json!({
                    "id": id,
                    "type": "result",
                    "success": false,
                    "error": {"code": "unknown_command", "message": "Unknown command."}
                })],
            };
            for value in outgoing {
                if ws.send(reply(value)).await.is_err() {
                    break;
                }
            }
        }
        received
    });

    (format!("http://{}", addr), handle)
}

fn config() -> SessionConfig {
    SessionConfig {
        heartbeat: HeartbeatConfig {
            enabled: false,
            ..Default::default()
        },
        request_timeout: Some(WAIT),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_full_session_over_websocket() {
    let (url, hub) = spawn_hub().await;
    let session = Session::new(
        &StaticCredentials::new(url, TOKEN),
        TungsteniteTransport::new(WAIT),
        config(),
    )
    .unwrap();
    let mut subscription = session.subscribe_events();

    timeout(WAIT, session.connect()).await.unwrap().unwrap();
    assert!(session.status().is_ready());

    let event = timeout(WAIT, subscription.events.recv())
        .await
        .unwrap()
        .unwrap();
    let change = event.state_changed().unwrap();
    assert_eq!(change.entity_id, "switch.garage");
    assert_eq!(change.new_state.as_ref().unwrap().state, "on");

    let states = timeout(WAIT, session.get_states()).await.unwrap().unwrap();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].domain(), "switch");

    let err = timeout(WAIT, session.get_config()).await.unwrap().unwrap_err();
    assert_eq!(
        err,
        SessionError::Server {
            code: "unknown_command".to_string(),
            message: "Unknown command.".to_string(),
        }
    );

    session.shutdown().await;
    let received = timeout(WAIT, hub).await.unwrap().unwrap();
    let kinds: Vec<_> = received
        .iter()
        .map(|frame| frame["type"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(kinds, vec!["auth", "subscribe_events", "get_states", "get_config"]);
    assert_eq!(received[0]["access_token"], TOKEN);
    assert_eq!(received[1]["id"], 1);
}

#[tokio::test]
async fn test_rejected_token_fails_connect() {
    let (url, _hub) = spawn_hub().await;
    let session = Session::new(
        &StaticCredentials::new(url, "wrong-token"),
        TungsteniteTransport::new(WAIT),
        config(),
    )
    .unwrap();

    let result = timeout(WAIT, session.connect()).await.unwrap();
    assert_eq!(
        result,
        Err(SessionError::AuthenticationFailed("Invalid password".to_string()))
    );
    assert_eq!(session.status().last_error.as_deref(), Some("Invalid password"));
    session.shutdown().await;
}
