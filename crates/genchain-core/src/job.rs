//! Job nodes, stage payloads and statuses.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::artifact::Artifact;
use crate::submitter::SubmissionReceipt;
use crate::{NodeId, RemoteId};

/// Lifecycle status of a job node.
///
/// Statuses only move forward: `NotSubmitted → Submitted → terminal`, or
/// straight from `NotSubmitted` to a terminal status when the remote side
/// rejects the submission outright. `Skipped` is only reachable from
/// `NotSubmitted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[display("not_submitted")]
    NotSubmitted,
    #[display("submitted")]
    Submitted,
    #[display("completed")]
    Completed,
    #[display("moderated")]
    Moderated,
    #[display("failed")]
    Failed,
    #[display("cancelled")]
    Cancelled,
    /// Terminal without ever being submitted (an upstream stage did not complete).
    #[display("skipped")]
    Skipped,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed
                | JobStatus::Moderated
                | JobStatus::Failed
                | JobStatus::Cancelled
                | JobStatus::Skipped
        )
    }

    fn rank(&self) -> u8 {
        match self {
            JobStatus::NotSubmitted => 0,
            JobStatus::Submitted => 1,
            _ => 2,
        }
    }

    /// Whether moving from `self` to `next` respects forward-only ordering.
    pub fn can_advance_to(&self, next: JobStatus) -> bool {
        if next == JobStatus::Skipped {
            return *self == JobStatus::NotSubmitted;
        }
        next.rank() > self.rank()
    }

    /// Map a status string reported by the remote service.
    ///
    /// In-flight statuses (`created`, `started`, `progress`) all map to
    /// `Submitted`.
    pub fn from_remote(status: &str) -> Option<Self> {
        match status {
            "created" | "started" | "progress" | "submitted" => Some(JobStatus::Submitted),
            "completed" => Some(JobStatus::Completed),
            "moderated" => Some(JobStatus::Moderated),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }
}

/// Which pipeline stage a node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Root prompt generation.
    #[display("generation")]
    Generation,
    /// Variant selection (upscale or variation button) on a generated grid.
    #[display("variant")]
    Variant,
    /// Optional face-swap enhancement of a selected variant.
    #[display("face_swap")]
    FaceSwap,
    /// Final animation of the (possibly enhanced) image.
    #[display("animation")]
    Animation,
}

impl StageKind {
    /// Queue family that submits nodes of this kind.
    pub fn pipeline(&self) -> PipelineKind {
        match self {
            StageKind::Generation | StageKind::Variant => PipelineKind::Generation,
            StageKind::FaceSwap => PipelineKind::Enhancement,
            StageKind::Animation => PipelineKind::Animation,
        }
    }

    /// Derived stages are correlated by an echoed reference rather than by
    /// the remote job id.
    pub fn correlates_by_reference(&self) -> bool {
        matches!(self, StageKind::FaceSwap | StageKind::Animation)
    }
}

/// Independent queue families; each one has at most one submission in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    #[display("generation")]
    Generation,
    #[display("enhancement")]
    Enhancement,
    #[display("animation")]
    Animation,
}

/// Stage-specific payload needed to build the node's submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Stage {
    Generation {
        prompt: String,
    },
    Variant {
        /// Child key; a `-suffix` distinguishes repeated buttons.
        button: String,
        /// Remote id of the generation this variant is selected from.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<RemoteId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
        /// Artifact retrieved from the parent generation, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        upstream: Option<PathBuf>,
    },
    FaceSwap {
        source_image: PathBuf,
        target_image: PathBuf,
    },
    Animation {
        image: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
    },
}

impl Stage {
    pub fn kind(&self) -> StageKind {
        match self {
            Stage::Generation { .. } => StageKind::Generation,
            Stage::Variant { .. } => StageKind::Variant,
            Stage::FaceSwap { .. } => StageKind::FaceSwap,
            Stage::Animation { .. } => StageKind::Animation,
        }
    }

    /// Suffix used when naming artifacts retrieved for this stage.
    pub fn artifact_label(&self) -> &str {
        match self {
            Stage::Generation { .. } => "grid",
            Stage::Variant { button, .. } => button,
            Stage::FaceSwap { .. } => "faceswap",
            Stage::Animation { .. } => "animated",
        }
    }

    /// Whether this is an upscale button (`U1`..`U4`, with or without a
    /// `-suffix`). Only upscales yield a single image worth enhancing.
    pub fn is_upscale(&self) -> bool {
        match self {
            Stage::Variant { button, .. } => {
                let base = button.split('-').next().unwrap_or(button);
                matches!(base, "U1" | "U2" | "U3" | "U4")
            }
            _ => false,
        }
    }
}

/// One instance of a pipeline stage, tracked for its lifecycle and correlation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobNode {
    pub id: NodeId,
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<RemoteId>,
    pub status: JobStatus,
    /// True once this node itself needs no further action. Descendants carry
    /// their own flag.
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, JobNode>,
    /// Auxiliary records kept alongside the node; never traversed as work.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,
}

impl JobNode {
    pub fn new(stage: Stage) -> Self {
        Self {
            id: NodeId::new(),
            stage,
            remote_id: None,
            status: JobStatus::NotSubmitted,
            completed: false,
            content: None,
            error: None,
            error_details: None,
            http_status: None,
            submitted_at: None,
            finished_at: None,
            children: BTreeMap::new(),
            metadata: BTreeMap::new(),
            artifacts: Vec::new(),
        }
    }

    pub fn with_child(mut self, key: impl Into<String>, child: JobNode) -> Self {
        self.children.insert(key.into(), child);
        self
    }

    pub fn kind(&self) -> StageKind {
        self.stage.kind()
    }

    /// Move to `next` if that is a forward transition. Returns whether the
    /// status changed.
    pub fn advance(&mut self, next: JobStatus) -> bool {
        if !self.status.can_advance_to(next) {
            return false;
        }
        let now = Utc::now();
        if next == JobStatus::Submitted {
            self.submitted_at = Some(now);
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        self.status = next;
        true
    }

    /// Apply the remote side's answer to a submission attempt.
    pub fn record_submission(&mut self, receipt: &SubmissionReceipt) {
        self.http_status = Some(receipt.http_status);
        self.error = receipt.error.clone();
        self.error_details = receipt.error_details.clone();
        if let Some(body) = &receipt.body {
            self.metadata.insert("submission".to_string(), body.clone());
        }
        if let Some(remote_id) = &receipt.remote_id {
            self.remote_id = Some(remote_id.clone());
            self.advance(JobStatus::Submitted);
        }
        if let Some(status) = receipt.status.filter(|s| s.is_terminal()) {
            self.advance(status);
        }
        if self.error.is_some() {
            self.settle();
        }
    }

    /// Record a terminal notification. Returns false when the node already
    /// reached a terminal status, so repeated notifications are ignored.
    pub fn record_terminal(&mut self, status: JobStatus, content: Option<String>) -> bool {
        if !status.is_terminal() || self.status.is_terminal() {
            return false;
        }
        if !self.advance(status) {
            return false;
        }
        self.content = content;
        true
    }

    /// Mark every never-submitted descendant as skipped. Returns how many
    /// nodes were skipped.
    pub fn skip_pending_children(&mut self) -> usize {
        let mut skipped = 0;
        for child in self.children.values_mut() {
            if child.status == JobStatus::NotSubmitted {
                child.advance(JobStatus::Skipped);
                child.completed = true;
                skipped += 1 + child.skip_pending_children();
            }
        }
        skipped
    }

    /// Nothing further will happen below this node.
    pub fn settle(&mut self) {
        self.completed = true;
        self.skip_pending_children();
    }

    /// Give up on a node whose submission could not be delivered.
    pub fn abandon(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.settle();
    }

    /// Keys of children that have not been submitted yet.
    pub fn unsubmitted_children(&self) -> Vec<String> {
        self.children
            .iter()
            .filter(|(_, child)| child.status == JobStatus::NotSubmitted)
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn latest_artifact(&self) -> Option<&Artifact> {
        self.artifacts.last()
    }
}
