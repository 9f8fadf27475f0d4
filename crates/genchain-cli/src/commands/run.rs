//! Pipeline run command.

use anyhow::{Context, Result};
use genchain_api::WebhookState;
use genchain_config::{load_prompts, parse_run_config};
use genchain_core::JobTree;
use genchain_core::store::JsonFileStore;
use genchain_executor::{HttpFetcher, HttpSubmitter};
use genchain_scheduler::{Orchestrator, PipelineContext, PipelineSettings, RunSummary};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Run every prompt through the pipeline, serving the webhook meanwhile.
pub async fn run(config_path: &Path, prompts_path: &Path, token: String) -> Result<()> {
    let content = std::fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
    let config = parse_run_config(&content)
        .with_context(|| format!("Failed to parse run config: {}", config_path.display()))?;
    let prompts = load_prompts(prompts_path)
        .with_context(|| format!("Failed to load prompts: {}", prompts_path.display()))?;

    let store = Arc::new(JsonFileStore::new(&config.output.state_file));
    let tree = Arc::new(JobTree::new(store));
    let ctx = PipelineContext::new(
        tree,
        Arc::new(HttpSubmitter::new(config.remote.clone(), token)),
        Arc::new(HttpFetcher::new(&config.output.artifacts_dir)),
        PipelineSettings::from_config(&config),
    );

    let app = genchain_api::router(WebhookState::new(ctx.clone())).layer(TraceLayer::new_for_http());
    let listener = TcpListener::bind(config.webhook.listen)
        .await
        .with_context(|| format!("Failed to bind webhook listener on {}", config.webhook.listen))?;
    info!(
        listen = %config.webhook.listen,
        public_url = %config.webhook.public_url,
        "Webhook receiver started"
    );
    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    info!(
        prompts = prompts.len(),
        state_file = %config.output.state_file.display(),
        "Starting run"
    );

    let orchestrator = Orchestrator::new(ctx.clone());
    let started = Instant::now();
    let outcome = tokio::select! {
        result = orchestrator.run(&prompts) => result.map(Some),
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, saving state");
            ctx.tree.persist().await.map(|_| None)
        }
    };
    server.abort();

    let summary = match outcome.context("Run failed")? {
        Some(summary) => summary,
        None => orchestrator.summary(started.elapsed()),
    };
    print_summary(&summary, &config.output.state_file);

    Ok(())
}

fn print_summary(summary: &RunSummary, state_file: &Path) {
    println!(
        "\nFinished in {:.1}s with {} submissions",
        summary.elapsed.as_secs_f64(),
        summary.submitted
    );
    for (status, count) in &summary.status_counts {
        println!("  {:<14} {}", status, count);
    }
    println!("State saved to {}", state_file.display());
}
