//! WebSocket event stream
//!
//! Each socket is one hub subscriber. Outbound frames are hub events
//! (`{"event": <topic>, "data": ...}`) interleaved with direct replies to
//! this client. Inbound frames:
//!
//! - `{"event": "updateDisplay", "data": <any>}`: relayed to every subscriber
//! - `{"event": "updatePower", "data": <number | {"power": <number>}>}`:
//!   runs a speed command, answered with `{"event": "commandResult", ...}`

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::ApiState;
use crate::fanout::{HubEvent, RecvError};

#[derive(Debug, Deserialize)]
struct ClientMessage {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Serialize)]
struct Reply<'a, T: Serialize> {
    event: &'a str,
    data: T,
}

fn reply<T: Serialize>(tx: &mpsc::UnboundedSender<String>, event: &str, data: T) {
    match serde_json::to_string(&Reply { event, data }) {
        Ok(text) => {
            // Receiver gone means the socket is closing
            let _ = tx.send(text);
        },
        Err(e) => warn!("WS reply encode: {}", e),
    }
}

/// @route GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: ApiState) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let (mut sender, mut receiver) = socket.split();
    let mut subscription = state.hub.subscribe();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<String>();
    let cancel = state.shutdown.child_token();

    info!(
        "WS {} connected ({} subscribers)",
        conn_id,
        state.hub.subscriber_count()
    );

    let send_id = conn_id.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            let text = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                reply = reply_rx.recv() => match reply {
                    Some(text) => text,
                    None => break,
                },
                event = subscription.recv() => match event {
                    Ok(event) => match event.to_json() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("WS {} encode: {}", send_id, e);
                            continue;
                        },
                    },
                    Err(RecvError::Lagged(n)) => {
                        warn!("WS {} lagged, {} events dropped", send_id, n);
                        continue;
                    },
                    Err(RecvError::Closed) => break,
                },
            };

            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    let recv_state = state.clone();
    let recv_id = conn_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    handle_client_message(&recv_state, &recv_id, text.as_str(), &reply_tx).await
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {},
                Err(e) => {
                    debug!("WS {} read: {}", recv_id, e);
                    break;
                },
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("WS {} disconnected", conn_id);
}

async fn handle_client_message(
    state: &ApiState,
    conn_id: &str,
    text: &str,
    reply_tx: &mpsc::UnboundedSender<String>,
) {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("WS {} bad message: {}", conn_id, e);
            reply(
                reply_tx,
                "error",
                serde_json::json!({ "message": format!("Invalid message: {e}") }),
            );
            return;
        },
    };

    match msg.event.as_str() {
        "updateDisplay" => {
            let delivered = state.hub.publish(HubEvent::UpdateDisplay(msg.data));
            debug!("WS {} updateDisplay -> {} subscribers", conn_id, delivered);
        },
        "updatePower" => {
            let power = msg.data.get("power").unwrap_or(&msg.data);
            let result = state.command.set_motor_speed_value(power).await;
            reply(reply_tx, "commandResult", &result);
        },
        other => {
            debug!("WS {} unknown event '{}'", conn_id, other);
            reply(
                reply_tx,
                "error",
                serde_json::json!({ "message": format!("Unknown event: {other}") }),
            );
        },
    }
}
