//! GPIO client exercised against an in-process mock daemon.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use servis_hardware::{GpioClient, GpioError, PinDirection};
use tokio::net::TcpListener;
use tokio_util::codec::{Framed, LinesCodec};

#[derive(Clone, Default)]
struct MockDaemonState {
    pins: Arc<Mutex<HashMap<u8, (String, i64)>>>,
}

async fn mock_daemon(listener: TcpListener, state: MockDaemonState) {
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            break;
        };
        let state = state.clone();
        tokio::spawn(async move {
            let mut framed = Framed::new(stream, LinesCodec::new());
            while let Some(Ok(line)) = framed.next().await {
                let request: Value = match serde_json::from_str(&line) {
                    Ok(value) => value,
                    Err(_) => continue,
                };
                let reply = handle(&state, &request);
                if framed.send(reply.to_string()).await.is_err() {
                    break;
                }
            }
        });
    }
}

fn handle(state: &MockDaemonState, request: &Value) -> Value {
    let mut pins = state.pins.lock().unwrap();
    match request["command"].as_str() {
        Some("configure") => {
            let pin = request["pin"].as_u64().unwrap() as u8;
            let direction = request["direction"].as_str().unwrap().to_string();
            pins.insert(pin, (direction, 0));
            json!({"status": "success"})
        }
        Some("set") => {
            let pin = request["pin"].as_u64().unwrap() as u8;
            match pins.get_mut(&pin) {
                Some(entry) => {
                    entry.1 = request["value"].as_i64().unwrap();
                    json!({"status": "success"})
                }
                None => json!({"status": "error", "message": "pin not configured"}),
            }
        }
        Some("get") => {
            let pin = request["pin"].as_u64().unwrap() as u8;
            match pins.get(&pin) {
                Some((_, value)) => json!({"status": "success", "value": value}),
                None => json!({"status": "error", "message": "pin not configured"}),
            }
        }
        Some("status") => {
            let listing: Vec<Value> = pins
                .iter()
                .map(|(pin, (direction, value))| {
                    json!({"pin": pin, "direction": direction, "value": value})
                })
                .collect();
            json!({"status": "success", "pins": listing})
        }
        _ => json!({"status": "error", "message": "unknown command"}),
    }
}

async fn start_daemon() -> (String, MockDaemonState) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let state = MockDaemonState::default();
    tokio::spawn(mock_daemon(listener, state.clone()));
    (addr, state)
}

#[tokio::test]
async fn configure_set_get_cycle() -> anyhow::Result<()> {
    let (addr, _state) = start_daemon().await;
    let client = GpioClient::new(addr);

    client.configure(13, PinDirection::Output).await?;
    client.set(13, 1).await?;
    assert_eq!(client.get(13).await?, 1);
    Ok(())
}

#[tokio::test]
async fn toggle_inverts_the_pin() -> anyhow::Result<()> {
    let (addr, _state) = start_daemon().await;
    let client = GpioClient::new(addr);

    client.configure(5, PinDirection::Output).await?;
    assert_eq!(client.toggle(5).await?, 1);
    assert_eq!(client.toggle(5).await?, 0);
    Ok(())
}

#[tokio::test]
async fn status_lists_configured_pins() -> anyhow::Result<()> {
    let (addr, _state) = start_daemon().await;
    let client = GpioClient::new(addr);

    client.configure(2, PinDirection::Input).await?;
    client.configure(3, PinDirection::Output).await?;
    let pins = client.status().await?;
    assert_eq!(pins.len(), 2);
    Ok(())
}

#[tokio::test]
async fn daemon_errors_become_typed_errors() {
    let (addr, _state) = start_daemon().await;
    let client = GpioClient::new(addr);

    let err = client.get(40).await.unwrap_err();
    assert!(matches!(err, GpioError::Daemon(msg) if msg.contains("not configured")));
}

#[tokio::test]
async fn unreachable_daemon_reports_connect_failure() {
    let client = GpioClient::new("127.0.0.1:1");
    let err = client.get(1).await.unwrap_err();
    assert!(matches!(err, GpioError::Connect(_)));
}
