//! Shared building blocks for rig services
//!
//! - logging bootstrap
//! - shutdown signal handling
//! - API response envelopes and health models

pub mod api_types;
pub mod logging;
pub mod shutdown;

pub use api_types::{
    ComponentHealth, ErrorInfo, ErrorResponse, HealthStatus, ServiceStatus, SuccessResponse,
};

#[cfg(feature = "axum")]
pub use api_types::AppError;
