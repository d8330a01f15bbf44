//! HTTP and WebSocket surface
//!
//! - `POST /motor/velocidad`: speed command, always 200 with a `CommandResult` body
//! - `GET  /motor/status`: link state, register map, subscriber count
//! - `GET  /health`: health envelope
//! - `GET  /ws`: event stream plus `updateDisplay` / `updatePower` from clients

pub mod handlers;
pub mod websocket;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    routing::{get, post},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::command::CommandChannel;
use crate::fanout::EventHub;
use crate::link::MotorLink;
use crate::poller::RegisterMap;

/// Shared handler state
#[derive(Clone)]
pub struct ApiState {
    pub link: Arc<MotorLink>,
    pub hub: EventHub,
    pub command: Arc<CommandChannel>,
    pub registers: RegisterMap,
    pub unit_id: u8,
    pub started_at: Instant,
    /// Cancelled on service shutdown; closes open WebSockets
    pub shutdown: CancellationToken,
}

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/motor/status", get(handlers::motor_status))
        .route("/motor/velocidad", post(handlers::set_motor_speed))
        .route("/ws", get(websocket::ws_handler))
        .fallback(handlers::not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
