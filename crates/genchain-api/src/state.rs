//! Receiver state.

use genchain_scheduler::{EventDispatcher, PipelineContext};
use std::sync::Arc;

/// Shared receiver state.
#[derive(Clone)]
pub struct WebhookState {
    pub dispatcher: Arc<EventDispatcher>,
    pub ctx: Arc<PipelineContext>,
}

impl WebhookState {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self {
            dispatcher: Arc::new(EventDispatcher::new(ctx.clone())),
            ctx,
        }
    }
}
