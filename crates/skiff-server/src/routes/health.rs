//! Liveness route for the payload intake server.

use axum::{Json, Router, extract::State, routing::get};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

/// Body of `GET /health`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    /// Largest payload body `POST /` accepts, in bytes.
    pub max_body_size: usize,
}

impl HealthResponse {
    fn ok(state: &AppState) -> Self {
        Self {
            status: "ok".to_string(),
            service: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            max_body_size: state.config.max_body_size,
        }
    }
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::ok(&state))
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
