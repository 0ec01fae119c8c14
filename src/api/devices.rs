//! Device command endpoints
//!
//! Each route runs one dispatcher command and answers in plain text, except
//! the device list which is JSON.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use serde::Deserialize;

use super::ApiState;
use crate::Error;
use crate::devices::{DeviceStatus, SetValue};
use crate::dispatch::{self, Command, DefineRequest};

/// Error response: status derived from the error kind, message as body
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (status_of(&self.0), self.0.to_string()).into_response()
    }
}

/// HTTP status for an error
#[must_use]
pub const fn status_of(error: &Error) -> StatusCode {
    match error {
        Error::NotFound(_) | Error::DeviceNotFound(_) => StatusCode::NOT_FOUND,
        Error::InvariantViolation(_) | Error::CalibrationBusy(_) => StatusCode::CONFLICT,
        Error::InvalidArgument(_) | Error::NotCalibrated(_) => StatusCode::BAD_REQUEST,
        Error::CommandRejected(_) | Error::ConnectFailed(_) | Error::Transport(_) => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

type ApiResult = Result<String, ApiError>;

/// Body of a rename request
#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub new_name: String,
}

async fn run(state: &ApiState, command: Command) -> ApiResult {
    Ok(dispatch::execute(&state.manager, command).await?)
}

async fn list(State(state): State<Arc<ApiState>>) -> Json<Vec<DeviceStatus>> {
    Json(state.manager.list().await)
}

async fn define(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<DefineRequest>,
) -> ApiResult {
    let spec = request.into_spec()?;
    run(&state, Command::Define(spec)).await
}

async fn undefine(State(state): State<Arc<ApiState>>, Path(name): Path<String>) -> ApiResult {
    run(&state, Command::Undefine { name }).await
}

async fn remove(State(state): State<Arc<ApiState>>, Path(name): Path<String>) -> ApiResult {
    run(&state, Command::Delete { name }).await
}

async fn rename(
    State(state): State<Arc<ApiState>>,
    Path(name): Path<String>,
    Json(request): Json<RenameRequest>,
) -> ApiResult {
    run(
        &state,
        Command::Rename {
            name,
            new_name: request.new_name,
        },
    )
    .await
}

async fn connect(State(state): State<Arc<ApiState>>, Path(name): Path<String>) -> ApiResult {
    run(&state, Command::Connect { name }).await
}

async fn get_property(
    State(state): State<Arc<ApiState>>,
    Path((name, property)): Path<(String, String)>,
) -> ApiResult {
    run(&state, Command::Get { name, property }).await
}

async fn set_property(
    State(state): State<Arc<ApiState>>,
    Path((name, property)): Path<(String, String)>,
    body: String,
) -> ApiResult {
    let value = SetValue::parse(&body);
    run(
        &state,
        Command::Set {
            name,
            property,
            value,
        },
    )
    .await
}

async fn calibrate(State(state): State<Arc<ApiState>>, Path(name): Path<String>) -> ApiResult {
    run(&state, Command::Calibrate { name }).await
}

async fn set_percentage(
    State(state): State<Arc<ApiState>>,
    Path(name): Path<String>,
    body: String,
) -> ApiResult {
    let percentage = body.trim().parse::<f64>().map_err(|_| {
        Error::InvalidArgument(format!("'{}' is not a percentage", body.trim()))
    })?;
    run(&state, Command::SetPercentage { name, percentage }).await
}

/// Build the device router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/devices", get(list).post(define))
        .route("/api/devices/{name}", delete(remove))
        .route("/api/devices/{name}/undefine", post(undefine))
        .route("/api/devices/{name}/rename", post(rename))
        .route("/api/devices/{name}/connect", post(connect))
        .route(
            "/api/devices/{name}/props/{property}",
            get(get_property).put(set_property),
        )
        .route("/api/devices/{name}/calibrate", post(calibrate))
        .route("/api/devices/{name}/percentage", put(set_percentage))
        .with_state(state)
}
