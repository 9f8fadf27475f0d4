//! Submission task: hands one node to the remote service and records the answer.

use genchain_core::submitter::{SubmissionOutcome, SubmissionReceipt, SubmitRequest};
use genchain_core::{JobStatus, NodePath, Result};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::context::PipelineContext;
use crate::queue::{QueuedTask, TaskOutcome};

pub(crate) fn submission_task(ctx: Arc<PipelineContext>, path: NodePath) -> QueuedTask {
    QueuedTask::new(format!("submit {path}"), move || {
        submit(Arc::clone(&ctx), path.clone())
    })
}

async fn submit(ctx: Arc<PipelineContext>, path: NodePath) -> Result<TaskOutcome> {
    let (stage, status, id) = ctx
        .tree
        .read(&path, |node| (node.stage.clone(), node.status, node.id))?;

    if status != JobStatus::NotSubmitted {
        debug!(%path, %status, "Node already submitted, skipping");
        return Ok(TaskOutcome::Done);
    }

    let kind = stage.kind();
    let request = SubmitRequest {
        stage,
        notify_url: ctx.settings.notify_url.clone(),
        correlation_ref: kind.correlates_by_reference().then(|| id.to_string()),
    };

    let outcome = match ctx.submitter.submit(request).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(%path, submitter = ctx.submitter.name(), error = %e, "Submission failed, abandoning node");
            let message = e.to_string();
            ctx.tree.update(&path, |node| node.abandon(message)).await?;
            return Err(e);
        }
    };

    match outcome {
        SubmissionOutcome::Full => {
            info!(%path, "Remote queue is full, waiting for a running job to finish");
            Ok(TaskOutcome::Full)
        }
        SubmissionOutcome::RateLimited => {
            warn!(
                %path,
                pause_secs = ctx.settings.rate_limit_pause.as_secs(),
                "Rate limited, pausing before retry"
            );
            tokio::time::sleep(ctx.settings.rate_limit_pause).await;
            Ok(TaskOutcome::Retry)
        }
        SubmissionOutcome::Overloaded(receipt) => {
            // Recorded first so a completion arriving during the pause still matches.
            let outcome = record(&ctx, &path, receipt).await?;
            error!(
                %path,
                pause_secs = ctx.settings.overload_pause.as_secs(),
                "Remote queue overflow, pausing to let running jobs finish"
            );
            tokio::time::sleep(ctx.settings.overload_pause).await;
            Ok(outcome)
        }
        SubmissionOutcome::Responded(receipt) => record(&ctx, &path, receipt).await,
    }
}

async fn record(
    ctx: &PipelineContext,
    path: &NodePath,
    receipt: SubmissionReceipt,
) -> Result<TaskOutcome> {
    let number = ctx.count_submission();
    info!(
        submitted = number,
        %path,
        http_status = receipt.http_status,
        remote_id = ?receipt.remote_id.as_ref().map(|id| id.short()),
        error = ?receipt.error,
        "Submission answered"
    );

    let missing_id = receipt.remote_id.is_none() && receipt.error.is_none();
    if missing_id {
        warn!(%path, "Response carried no job id, abandoning node");
    }

    ctx.tree
        .update(path, |node| {
            node.record_submission(&receipt);
            if missing_id {
                node.abandon("response carried no job id");
            }
        })
        .await?;

    Ok(TaskOutcome::Done)
}
