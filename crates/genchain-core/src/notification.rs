//! Inbound completion notifications.

use serde::{Deserialize, Serialize};

use crate::artifact::Attachment;
use crate::job::{JobStatus, StageKind};
use crate::RemoteId;

/// A completion notification delivered out-of-band by the remote service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub kind: StageKind,
    /// Remote job id the notification is about.
    pub remote_id: Option<RemoteId>,
    /// Reference supplied at submission time and echoed back (derived stages).
    pub correlation_ref: Option<String>,
    pub status: JobStatus,
    pub content: Option<String>,
    pub attachments: Vec<Attachment>,
}

impl Notification {
    /// URL of the first attachment, if it is non-empty.
    pub fn artifact_url(&self) -> Option<&str> {
        self.attachments
            .first()
            .map(|a| a.url.as_str())
            .filter(|url| !url.is_empty())
    }

    /// Short preview of the content for log lines.
    pub fn content_preview(&self) -> String {
        let content = self.content.as_deref().unwrap_or_default();
        let preview: String = content.chars().take(20).collect();
        if content.chars().count() > 20 {
            format!("{preview}…")
        } else {
            preview
        }
    }
}

impl StageKind {
    /// Map the verb the remote service reports in its callbacks.
    pub fn from_verb(verb: &str) -> Option<Self> {
        match verb {
            "imagine" | "describe" | "blend" => Some(StageKind::Generation),
            "button" => Some(StageKind::Variant),
            "faceswap-swap" => Some(StageKind::FaceSwap),
            "pika-create" | "pika-animate" => Some(StageKind::Animation),
            _ => None,
        }
    }
}
