//! Completion notifications posted by the remote services.

use axum::body::Bytes;
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use genchain_core::artifact::Attachment;
use genchain_core::{JobStatus, Notification, RemoteId, StageKind};
use serde::Deserialize;
use tracing::{debug, error, info};

use crate::WebhookState;
use crate::error::ApiError;

pub fn router() -> Router<WebhookState> {
    Router::new().route("/", get(greeting).post(receive))
}

/// Callback body as the remote services send it. Unknown fields are ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub verb: Option<String>,
    pub status: Option<String>,
    pub jobid: Option<String>,
    /// Reference supplied at submission, echoed by derived stages.
    pub reply_ref: Option<String>,
    pub content: Option<String>,
    #[serde(default)]
    pub attachments: Vec<PayloadAttachment>,
}

#[derive(Debug, Deserialize)]
pub struct PayloadAttachment {
    pub url: Option<String>,
}

impl WebhookPayload {
    /// `None` when the verb or the status is not one this pipeline knows.
    pub fn into_notification(self) -> Option<Notification> {
        let kind = StageKind::from_verb(self.verb.as_deref()?)?;
        let status = JobStatus::from_remote(self.status.as_deref()?)?;

        Some(Notification {
            kind,
            remote_id: self.jobid.map(RemoteId::from),
            correlation_ref: self.reply_ref,
            status,
            content: self.content,
            attachments: self
                .attachments
                .into_iter()
                .map(|a| Attachment {
                    url: a.url.unwrap_or_default(),
                })
                .collect(),
        })
    }
}

async fn greeting() -> &'static str {
    "Hello from genchain"
}

async fn receive(State(state): State<WebhookState>, body: Bytes) -> Result<&'static str, ApiError> {
    let payload: WebhookPayload = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON: {}", e)))?;

    info!(
        verb = ?payload.verb,
        jobid = ?payload.jobid,
        status = ?payload.status,
        "Received webhook"
    );

    let Some(notification) = payload.into_notification() else {
        debug!("Ignoring webhook with unknown verb or status");
        return Ok("ok");
    };

    match state.dispatcher.dispatch(notification).await {
        Ok(outcome) => {
            debug!(?outcome, "Webhook applied");
            Ok("ok")
        }
        Err(e) => {
            error!(error = %e, "Failed to apply notification");
            Err(e.into())
        }
    }
}
