//! Remote job submitter trait and submission types.
//!
//! Submitters hand one stage payload at a time to the remote worker pool.
//! Completion is reported later through a webhook notification, never in the
//! submission response itself.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::job::{JobStatus, Stage};
use crate::{RemoteId, Result};

/// A single submission attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Stage payload to submit.
    pub stage: Stage,
    /// Where the remote service should post its completion notification.
    pub notify_url: Url,
    /// Reference the remote service echoes back verbatim (derived stages only).
    pub correlation_ref: Option<String>,
}

/// What the remote service answered to a submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    /// Job id assigned by the remote service.
    pub remote_id: Option<RemoteId>,
    /// Status reported in the response.
    pub status: Option<JobStatus>,
    /// HTTP status code of the response.
    pub http_status: u16,
    /// Error message, if the service rejected the job.
    pub error: Option<String>,
    /// Additional error detail.
    pub error_details: Option<String>,
    /// Raw response body, kept for auditing.
    pub body: Option<serde_json::Value>,
}

/// Outcome of one submission attempt.
#[derive(Debug, Clone)]
pub enum SubmissionOutcome {
    /// The service answered; the receipt carries the job id or the rejection.
    Responded(SubmissionReceipt),
    /// The account's concurrency ceiling is reached. Resubmit after a
    /// running job completes.
    Full,
    /// Transient rate limiting. Resubmit after a short pause.
    RateLimited,
    /// The service reported a queue overflow but still answered.
    Overloaded(SubmissionReceipt),
}

/// Trait for remote job submitters.
#[async_trait]
pub trait Submitter: Send + Sync {
    /// Name of this submitter.
    fn name(&self) -> &'static str;

    /// Submit a job. Transport failures that persist after the submitter's
    /// own bounded retries are returned as errors.
    async fn submit(&self, request: SubmitRequest) -> Result<SubmissionOutcome>;
}
