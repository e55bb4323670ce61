//! Key pool status and reset endpoints
//!
//! Endpoints:
//! - GET  /api/keys/status: masked per-key state, cursor, block windows
//! - POST /api/keys/reset:  lift every block (operational recovery)
//!
//! Raw keys are never returned; the status view only carries the masked form.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use key_pool::Rotator;
use tracing::info;

/// Shared state for key admin handlers.
#[derive(Clone)]
pub struct AdminState {
    rotator: Arc<Rotator>,
}

impl AdminState {
    pub fn new(rotator: Arc<Rotator>) -> Self {
        Self { rotator }
    }
}

/// Build the key admin router.
pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/api/keys/status", get(key_status))
        .route("/api/keys/reset", post(reset_keys))
        .with_state(state)
}

/// GET /api/keys/status: pool snapshot in camelCase JSON.
async fn key_status(State(state): State<AdminState>) -> impl IntoResponse {
    Json(state.rotator.snapshot().await)
}

/// POST /api/keys/reset: clear all blocks and confirm.
///
/// Request counts and the rotation cursor are left as they are.
async fn reset_keys(State(state): State<AdminState>) -> impl IntoResponse {
    state.rotator.reset_all().await;
    let snapshot = state.rotator.snapshot().await;
    info!(keys = snapshot.total_credentials, "API key blocks reset via admin endpoint");

    Json(serde_json::json!({
        "message": "All API keys reset successfully",
        "totalCredentials": snapshot.total_credentials,
        "timestamp": snapshot.timestamp,
    }))
}
