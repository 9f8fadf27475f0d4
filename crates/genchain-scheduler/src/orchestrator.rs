//! Run driver: seeds the job tree, starts the roots and waits for the tree
//! to settle.

use genchain_core::{JobNode, NodePath, Result, Stage, StageKind};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::context::PipelineContext;

/// Final tally of a run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub elapsed: Duration,
    pub submitted: usize,
    pub status_counts: BTreeMap<String, usize>,
}

pub struct Orchestrator {
    ctx: Arc<PipelineContext>,
}

impl Orchestrator {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    /// Root node for one prompt, with one variant child per configured key.
    pub fn root_node(&self, prompt: &str) -> JobNode {
        self.ctx.settings.variants.iter().fold(
            JobNode::new(Stage::Generation {
                prompt: prompt.to_string(),
            }),
            |node, key| {
                node.with_child(
                    key,
                    JobNode::new(Stage::Variant {
                        button: key.clone(),
                        parent: None,
                        prompt: None,
                        upstream: None,
                    }),
                )
            },
        )
    }

    /// Add one root per prompt and write the seeded tree once.
    pub async fn seed(&self, prompts: &[String]) -> Result<Vec<NodePath>> {
        let mut roots = Vec::with_capacity(prompts.len());
        for (i, prompt) in prompts.iter().enumerate() {
            let path = self
                .ctx
                .tree
                .insert_root(format!("imagine-{i}"), self.root_node(prompt))?;
            roots.push(path);
        }
        self.ctx.tree.persist().await?;
        info!(
            roots = roots.len(),
            variants = self.ctx.settings.variants.len(),
            "Job tree seeded"
        );
        Ok(roots)
    }

    /// Queue the submission of every root.
    pub fn start(&self, roots: &[NodePath]) {
        for path in roots {
            self.ctx
                .enqueue_submission(path.clone(), StageKind::Generation);
        }
    }

    /// Poll until no node is pending.
    pub async fn wait(&self) {
        let mut ticker = tokio::time::interval(self.ctx.settings.poll_interval);
        loop {
            ticker.tick().await;
            let pending = self.ctx.tree.pending_count();
            if pending == 0 {
                return;
            }
            debug!(pending, "Waiting for pending jobs");
        }
    }

    /// Seed, start and wait for a whole run.
    pub async fn run(&self, prompts: &[String]) -> Result<RunSummary> {
        let started = Instant::now();
        let roots = self.seed(prompts).await?;
        self.start(&roots);
        self.wait().await;
        Ok(self.summary(started.elapsed()))
    }

    pub fn summary(&self, elapsed: Duration) -> RunSummary {
        RunSummary {
            elapsed,
            submitted: self.ctx.submitted(),
            status_counts: self.ctx.tree.snapshot().status_counts(),
        }
    }
}
