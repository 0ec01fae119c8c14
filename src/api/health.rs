//! Health check endpoints

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use super::ApiState;
use crate::devices::DeviceCounts;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Readiness response with device totals
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub devices: DeviceCounts,
}

/// Liveness check: the service is up
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Readiness check; `degraded` while some initialized device is offline
async fn ready(State(state): State<Arc<ApiState>>) -> Json<ReadinessResponse> {
    let devices = state.manager.counts().await;
    let status = if devices.connected == devices.initialized {
        "ok"
    } else {
        "degraded"
    };
    Json(ReadinessResponse { status, devices })
}

/// Build health router (liveness only, no state needed)
pub fn router() -> Router {
    Router::new().route("/health", get(health))
}

/// Build readiness router
pub fn ready_router(state: Arc<ApiState>) -> Router {
    Router::new().route("/ready", get(ready)).with_state(state)
}
