//! Health check endpoints.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::WebhookState;

pub fn router() -> Router<WebhookState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(ready))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Reports how much of the run is still outstanding.
async fn ready(State(state): State<WebhookState>) -> Json<Value> {
    Json(json!({
        "status": "ready",
        "pending": state.ctx.tree.pending_count(),
        "submitted": state.ctx.submitted(),
    }))
}
