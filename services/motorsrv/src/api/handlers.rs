//! REST handlers

use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::State,
    http::{Method, Uri},
    response::Json,
};
use common::{AppError, ComponentHealth, HealthStatus, ServiceStatus, SuccessResponse};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::ApiState;
use crate::command::CommandResult;
use crate::config::SERVICE_NAME;
use crate::link::{LinkState, LinkStatus};
use crate::poller::RegisterMap;
use crate::reconnect::ReconnectStats;

#[derive(Debug, Serialize)]
pub struct MotorStatus {
    pub endpoint: String,
    pub unit_id: u8,
    pub link: LinkStatus,
    pub registers: RegisterMap,
    pub subscribers: usize,
    pub reconnect: ReconnectStats,
}

/// @route GET /health
pub async fn health_check(State(state): State<ApiState>) -> Json<SuccessResponse<HealthStatus>> {
    let link = state.link.status();
    let link_health = match link.state {
        LinkState::Connected => ComponentHealth::new(ServiceStatus::Healthy, None),
        LinkState::Connecting | LinkState::Disconnected => {
            ComponentHealth::new(ServiceStatus::Degraded, Some(link.state.to_string()))
        },
        LinkState::Faulted => ComponentHealth::new(ServiceStatus::Unhealthy, link.reason.clone()),
    };

    let mut checks = HashMap::new();
    checks.insert("motor_link".to_string(), link_health);

    Json(SuccessResponse::new(HealthStatus::from_checks(
        SERVICE_NAME,
        env!("CARGO_PKG_VERSION"),
        state.started_at.elapsed().as_secs(),
        checks,
    )))
}

/// @route GET /motor/status
pub async fn motor_status(State(state): State<ApiState>) -> Json<SuccessResponse<MotorStatus>> {
    Json(SuccessResponse::new(MotorStatus {
        endpoint: state.link.endpoint(),
        unit_id: state.unit_id,
        link: state.link.status(),
        registers: state.registers,
        subscribers: state.hub.subscriber_count(),
        reconnect: state.link.reconnect_stats().await,
    }))
}

/// @route POST /motor/velocidad
/// @input `{"power": <number | numeric string>}`
///
/// Always 200; failures are reported in the body.
pub async fn set_motor_speed(State(state): State<ApiState>, body: Bytes) -> Json<CommandResult> {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            debug!("Speed command: bad body: {}", e);
            return Json(CommandResult::rejected(format!("Invalid JSON body: {e}")));
        },
    };

    match payload.get("power") {
        Some(power) => Json(state.command.set_motor_speed_value(power).await),
        None => Json(CommandResult::rejected("Missing field: power")),
    }
}

pub async fn not_found(method: Method, uri: Uri) -> AppError {
    AppError::not_found(format!("No route for {method} {uri}"))
}
