//! Persisted job tree inspection.

use anyhow::{Context, Result};
use genchain_core::{JobNode, TreeState};
use std::fmt::Write;
use std::path::Path;

pub fn show(path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read state file: {}", path.display()))?;
    let state: TreeState = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse state file: {}", path.display()))?;

    print!("{}", render(&state));
    Ok(())
}

/// One line per node, indented by depth, followed by per-status counts.
pub fn render(state: &TreeState) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Run {} started {}",
        state.run_id,
        state.started_at.format("%Y-%m-%d %H:%M:%S")
    );
    for (key, root) in &state.roots {
        render_node(&mut out, key, root, 1);
    }

    let pending = state.pending_count();
    let _ = writeln!(out, "\n{} nodes, {} pending", state.nodes().len(), pending);
    for (status, count) in state.status_counts() {
        let _ = writeln!(out, "  {:<14} {}", status, count);
    }
    out
}

fn render_node(out: &mut String, key: &str, node: &JobNode, depth: usize) {
    let marker = if node.completed { "✓" } else { "…" };
    let _ = write!(
        out,
        "{}{} {} [{}] {}",
        "  ".repeat(depth),
        marker,
        key,
        node.kind(),
        node.status
    );
    if let Some(remote_id) = &node.remote_id {
        let _ = write!(out, " {}", remote_id.short());
    }
    if let Some(error) = &node.error {
        let _ = write!(out, " error: {}", error);
    }
    if let Some(artifact) = node.latest_artifact() {
        let _ = write!(out, " -> {}", artifact.path.display());
    }
    out.push('\n');

    for (key, child) in &node.children {
        render_node(out, key, child, depth + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use genchain_core::{JobStatus, RemoteId, Stage};

    #[test]
    fn test_render_lists_nodes_and_counts() {
        let mut root = JobNode::new(Stage::Generation {
            prompt: "cat".to_string(),
        })
        .with_child(
            "U1",
            JobNode::new(Stage::Variant {
                button: "U1".to_string(),
                parent: None,
                prompt: None,
                upstream: None,
            }),
        );
        root.remote_id = Some(RemoteId::from("abc"));
        root.advance(JobStatus::Submitted);
        root.advance(JobStatus::Moderated);
        root.settle();

        let mut state = TreeState::new();
        state.roots.insert("imagine-0".to_string(), root);

        let text = render(&state);

        assert!(text.contains("  ✓ imagine-0 [generation] moderated abc"));
        assert!(text.contains("    ✓ U1 [variant] skipped"));
        assert!(text.contains("2 nodes, 0 pending"));
        assert!(text.contains("moderated"));
    }
}
