//! Receiver routes.

pub mod health;
pub mod webhooks;

use crate::WebhookState;
use axum::Router;

/// Build the receiver router.
pub fn router(state: WebhookState) -> Router {
    Router::new()
        .merge(webhooks::router())
        .merge(health::router())
        .with_state(state)
}
