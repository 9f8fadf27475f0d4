//! Stub collaborators shared by the scheduler tests.

use async_trait::async_trait;
use chrono::Utc;
use genchain_core::artifact::{Artifact, ArtifactFetcher};
use genchain_core::store::MemoryStore;
use genchain_core::submitter::{SubmissionOutcome, SubmissionReceipt, SubmitRequest, Submitter};
use genchain_core::{Error, JobStatus, JobTree, RemoteId, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::context::{PipelineContext, PipelineSettings};

pub(crate) fn accepted(remote_id: &str) -> SubmissionOutcome {
    SubmissionOutcome::Responded(SubmissionReceipt {
        remote_id: Some(RemoteId::from(remote_id)),
        status: Some(JobStatus::Submitted),
        http_status: 200,
        error: None,
        error_details: None,
        body: Some(serde_json::json!({ "jobid": remote_id, "status": "created" })),
    })
}

/// Answers every submission with `r1`, `r2`, ... unless an outcome was scripted.
#[derive(Default)]
pub(crate) struct StubSubmitter {
    scripted: Mutex<VecDeque<Result<SubmissionOutcome>>>,
    requests: Mutex<Vec<SubmitRequest>>,
    issued: AtomicUsize,
}

impl StubSubmitter {
    pub(crate) fn script(&self, outcome: Result<SubmissionOutcome>) {
        self.scripted.lock().push_back(outcome);
    }

    pub(crate) fn requests(&self) -> Vec<SubmitRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Submitter for StubSubmitter {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn submit(&self, request: SubmitRequest) -> Result<SubmissionOutcome> {
        self.requests.lock().push(request);
        if let Some(outcome) = self.scripted.lock().pop_front() {
            return outcome;
        }
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(accepted(&format!("r{n}")))
    }
}

/// Pretends to download into `/artifacts/<stem>.png`.
#[derive(Default)]
pub(crate) struct StubFetcher {
    fetched: Mutex<Vec<(String, String)>>,
    fail: AtomicBool,
}

impl StubFetcher {
    /// Refuse the next download only.
    pub(crate) fn fail_once(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    /// `(url, stem)` pairs fetched so far.
    pub(crate) fn fetched(&self) -> Vec<(String, String)> {
        self.fetched.lock().clone()
    }
}

#[async_trait]
impl ArtifactFetcher for StubFetcher {
    async fn fetch(&self, url: &str, stem: &str) -> Result<Artifact> {
        if self.fail.swap(false, Ordering::SeqCst) {
            return Err(Error::Artifact(format!("download of {url} refused")));
        }
        self.fetched.lock().push((url.to_string(), stem.to_string()));
        Ok(Artifact {
            url: url.to_string(),
            path: PathBuf::from(format!("/artifacts/{stem}.png")),
            size: 1024,
            fetched_at: Utc::now(),
        })
    }
}

pub(crate) fn settings(face_swap: bool) -> PipelineSettings {
    PipelineSettings {
        notify_url: "http://localhost:8081/".parse().unwrap(),
        variants: vec!["U1".to_string(), "U2".to_string()],
        face_source: face_swap.then(|| PathBuf::from("/faces/source.jpg")),
        animation_prompt: Some("smiling".to_string()),
        poll_interval: Duration::from_millis(5),
        rate_limit_pause: Duration::from_millis(1),
        overload_pause: Duration::from_millis(1),
    }
}

pub(crate) struct Harness {
    pub ctx: Arc<PipelineContext>,
    pub submitter: Arc<StubSubmitter>,
    pub fetcher: Arc<StubFetcher>,
    pub store: Arc<MemoryStore>,
}

impl Harness {
    pub(crate) fn new(face_swap: bool) -> Self {
        Self::with_settings(settings(face_swap))
    }

    pub(crate) fn with_settings(settings: PipelineSettings) -> Self {
        let store = Arc::new(MemoryStore::new());
        let submitter = Arc::new(StubSubmitter::default());
        let fetcher = Arc::new(StubFetcher::default());
        let ctx = PipelineContext::new(
            Arc::new(JobTree::new(store.clone())),
            submitter.clone(),
            fetcher.clone(),
            settings,
        );
        Self {
            ctx,
            submitter,
            fetcher,
            store,
        }
    }
}
