//! WebSocket clients against a served router
#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use common::{rig_at_idle, service_for, wait_connected};
use futures::{SinkExt, StreamExt};
use motorsrv::test_utils::FakeRig;
use motorsrv::MotorService;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn serve(service: &MotorService) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = service.router();
    let shutdown = service.shutdown_token();
    tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .unwrap();
    });
    addr
}

async fn started() -> (FakeRig, MotorService, SocketAddr) {
    let rig = rig_at_idle().await;
    let mut service = service_for(&rig);
    service.start();
    wait_connected(&service).await;
    let addr = serve(&service).await;
    (rig, service, addr)
}

async fn connect(service: &MotorService, addr: SocketAddr) -> Client {
    let before = service.hub().subscriber_count();
    let (client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    // The hub subscription is taken after the upgrade completes
    timeout(Duration::from_secs(5), async {
        while service.hub().subscriber_count() <= before {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    client
}

async fn send_json(client: &mut Client, value: Value) {
    client
        .send(Message::text(value.to_string()))
        .await
        .unwrap();
}

/// Next frame whose `event` is `name`, skipping everything else
async fn next_event(client: &mut Client, name: &str) -> Value {
    timeout(Duration::from_secs(5), async {
        loop {
            let msg = client.next().await.unwrap().unwrap();
            if let Message::Text(text) = msg {
                let value: Value = serde_json::from_str(text.as_str()).unwrap();
                if value["event"] == name {
                    return value["data"].clone();
                }
            }
        }
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn test_telemetry_pushed_to_client() {
    let (_rig, service, addr) = started().await;
    let mut client = connect(&service, addr).await;

    let data = next_event(&mut client, "telemetry").await;
    assert_eq!(data["rpm"], json!(404));
    assert_eq!(data["torque"], json!(500));

    service.shutdown().await;
}

#[tokio::test]
async fn test_update_power_replies_and_acks() {
    let (rig, service, addr) = started().await;
    let mut operator = connect(&service, addr).await;
    let mut display = connect(&service, addr).await;

    send_json(&mut operator, json!({"event": "updatePower", "data": 150})).await;

    let result = next_event(&mut operator, "commandResult").await;
    assert_eq!(result["accepted"], json!(true));
    assert_eq!(result["registerValue"], json!(12150));

    let ack = next_event(&mut display, "commandAck").await;
    assert_eq!(ack["appliedPercent"], json!(100.0));
    assert_eq!(ack["registerValue"], json!(12150));
    assert_eq!(rig.writes().await, vec![(100, 12150)]);

    service.shutdown().await;
}

#[tokio::test]
async fn test_update_power_object_payload() {
    let (rig, service, addr) = started().await;
    let mut client = connect(&service, addr).await;

    send_json(
        &mut client,
        json!({"event": "updatePower", "data": {"power": "-5"}}),
    )
    .await;

    let result = next_event(&mut client, "commandResult").await;
    assert_eq!(result["appliedPercent"], json!(4.0));
    assert_eq!(rig.writes().await, vec![(100, 3510)]);

    send_json(&mut client, json!({"event": "updatePower", "data": "fast"})).await;
    let result = next_event(&mut client, "commandResult").await;
    assert_eq!(result["accepted"], json!(false));
    assert_eq!(rig.writes().await.len(), 1);

    service.shutdown().await;
}

#[tokio::test]
async fn test_update_display_relayed_to_all() {
    let (_rig, service, addr) = started().await;
    let mut console = connect(&service, addr).await;
    let mut screen = connect(&service, addr).await;

    let payload = json!({"page": "results", "rows": [1, 2, 3]});
    send_json(
        &mut console,
        json!({"event": "updateDisplay", "data": payload.clone()}),
    )
    .await;

    assert_eq!(next_event(&mut screen, "updateDisplay").await, payload);
    assert_eq!(next_event(&mut console, "updateDisplay").await, payload);

    service.shutdown().await;
}

#[tokio::test]
async fn test_malformed_message_gets_error() {
    let (_rig, service, addr) = started().await;
    let mut client = connect(&service, addr).await;

    client.send(Message::text("{oops")).await.unwrap();
    let error = next_event(&mut client, "error").await;
    assert!(error["message"]
        .as_str()
        .unwrap()
        .starts_with("Invalid message"));

    send_json(&mut client, json!({"event": "reboot"})).await;
    let error = next_event(&mut client, "error").await;
    assert_eq!(error["message"], json!("Unknown event: reboot"));

    service.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_unsubscribes() {
    let (_rig, service, addr) = started().await;
    let client = connect(&service, addr).await;
    assert_eq!(service.hub().subscriber_count(), 1);

    drop(client);
    timeout(Duration::from_secs(5), async {
        while service.hub().subscriber_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    service.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_sockets() {
    let (_rig, service, addr) = started().await;
    let mut client = connect(&service, addr).await;

    service.shutdown().await;

    let closed = timeout(Duration::from_secs(5), async {
        loop {
            match client.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return true,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .unwrap();
    assert!(closed);
}
