//! HTTP API server for the actuator bridge

mod auth;
pub mod devices;
pub mod health;

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::devices::DeviceManager;

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub manager: Arc<DeviceManager>,
    pub api_key: Option<String>,
}

/// Builder for the API server
pub struct ApiServerBuilder {
    manager: Arc<DeviceManager>,
    port: u16,
    api_key: Option<String>,
}

impl ApiServerBuilder {
    /// Create a new API server builder
    #[must_use]
    pub const fn new(manager: Arc<DeviceManager>, port: u16) -> Self {
        Self {
            manager,
            port,
            api_key: None,
        }
    }

    /// Require this Bearer key on device routes
    #[must_use]
    pub fn api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key;
        self
    }

    /// Build the API server
    #[must_use]
    pub fn build(self) -> ApiServer {
        ApiServer {
            state: Arc::new(ApiState {
                manager: self.manager,
                api_key: self.api_key,
            }),
            port: self.port,
        }
    }
}

/// HTTP API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    /// Build the router with all routes
    #[must_use]
    pub fn router(&self) -> Router {
        let devices = devices::router(self.state.clone()).layer(
            axum::middleware::from_fn_with_state(self.state.clone(), auth::authorize_command),
        );

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .merge(devices)
            .merge(health::router())
            .merge(health::ready_router(self.state.clone()))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        if self.state.api_key.is_none() {
            tracing::warn!("no API key configured, device routes are unauthenticated");
        }

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}
