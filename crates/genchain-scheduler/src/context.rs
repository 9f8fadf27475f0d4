//! Shared state handed to queued tasks and the notification dispatcher.

use genchain_config::RunConfig;
use genchain_core::artifact::ArtifactFetcher;
use genchain_core::submitter::Submitter;
use genchain_core::{JobTree, NodePath, PipelineKind, StageKind};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use url::Url;

use crate::queue::{QueuedTask, TaskQueue};
use crate::submit::submission_task;

/// Run settings the scheduler needs, lifted out of [`RunConfig`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Where the remote service posts completion notifications.
    pub notify_url: Url,
    /// Child keys seeded under every generation node.
    pub variants: Vec<String>,
    /// Face source image; no face-swap stage when `None`.
    pub face_source: Option<PathBuf>,
    pub animation_prompt: Option<String>,
    pub poll_interval: Duration,
    pub rate_limit_pause: Duration,
    pub overload_pause: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            notify_url: config.webhook.public_url.clone(),
            variants: config.variants.clone(),
            face_source: config.face_swap.as_ref().map(|f| f.source.clone()),
            animation_prompt: config.animation.prompt.clone(),
            poll_interval: config.timing.poll_interval,
            rate_limit_pause: config.timing.rate_limit_pause,
            overload_pause: config.timing.overload_pause,
        }
    }
}

/// One queue per pipeline family.
pub struct QueueSet {
    generation: Arc<TaskQueue>,
    enhancement: Arc<TaskQueue>,
    animation: Arc<TaskQueue>,
}

impl Default for QueueSet {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueSet {
    pub fn new() -> Self {
        Self {
            generation: TaskQueue::new(PipelineKind::Generation.to_string()),
            enhancement: TaskQueue::new(PipelineKind::Enhancement.to_string()),
            animation: TaskQueue::new(PipelineKind::Animation.to_string()),
        }
    }

    pub fn get(&self, pipeline: PipelineKind) -> &Arc<TaskQueue> {
        match pipeline {
            PipelineKind::Generation => &self.generation,
            PipelineKind::Enhancement => &self.enhancement,
            PipelineKind::Animation => &self.animation,
        }
    }

    /// Wait until no queue has an attempt running.
    pub async fn settled(&self) {
        self.generation.settled().await;
        self.enhancement.settled().await;
        self.animation.settled().await;
    }
}

/// Everything a run shares between its queues, the dispatcher and the driver.
pub struct PipelineContext {
    pub tree: Arc<JobTree>,
    pub queues: QueueSet,
    pub submitter: Arc<dyn Submitter>,
    pub fetcher: Arc<dyn ArtifactFetcher>,
    pub settings: PipelineSettings,
    submitted: AtomicUsize,
}

impl PipelineContext {
    pub fn new(
        tree: Arc<JobTree>,
        submitter: Arc<dyn Submitter>,
        fetcher: Arc<dyn ArtifactFetcher>,
        settings: PipelineSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            tree,
            queues: QueueSet::new(),
            submitter,
            fetcher,
            settings,
            submitted: AtomicUsize::new(0),
        })
    }

    /// Queue the submission of the node at `path` on its family's queue.
    pub fn enqueue_submission(self: &Arc<Self>, path: NodePath, kind: StageKind) {
        let task = submission_task(Arc::clone(self), path);
        self.queues.get(kind.pipeline()).enqueue(task);
    }

    /// Queue a task that only logs. Also releases a queue paused on `Full`.
    pub fn notice(&self, pipeline: PipelineKind, message: impl Into<String>) {
        self.queues.get(pipeline).enqueue(QueuedTask::notice(message));
    }

    /// Submissions answered by the remote service so far.
    pub fn submitted(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }

    pub(crate) fn count_submission(&self) -> usize {
        self.submitted.fetch_add(1, Ordering::SeqCst) + 1
    }
}
