//! The job tree: shared, append-only record of a run.
//!
//! Roots are seeded once; children are appended as stages fan out. Nodes are
//! never removed. Every mutation is a single critical section that does not
//! span an await point, and is followed by a write-through of the whole tree
//! to the state store.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::job::JobNode;
use crate::store::StateStore;
use crate::{Error, NodeId, RemoteId, Result};

/// Location of a node: the root key followed by child keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodePath(Vec<String>);

impl NodePath {
    pub fn root(key: impl Into<String>) -> Self {
        Self(vec![key.into()])
    }

    pub fn child(&self, key: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(key.into());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn parent(&self) -> Option<NodePath> {
        match self.0.len() {
            0 | 1 => None,
            n => Some(Self(self.0[..n - 1].to_vec())),
        }
    }

    /// File stem for an artifact retrieved for this node: the parent's stem
    /// followed by `label`, e.g. `imagine-0-U1`.
    pub fn artifact_stem(&self, label: &str) -> String {
        let base = self.parent().unwrap_or_else(|| self.clone());
        format!("{}-{}", base.file_stem(), label)
    }

    /// Name usable as a file stem, e.g. `imagine-0-U1`.
    pub fn file_stem(&self) -> String {
        self.0.join("-")
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

/// Serializable contents of the tree; this is the persisted document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeState {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub roots: BTreeMap<String, JobNode>,
}

impl Default for TreeState {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeState {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::now_v7(),
            started_at: Utc::now(),
            roots: BTreeMap::new(),
        }
    }

    pub fn node(&self, path: &NodePath) -> Option<&JobNode> {
        let (first, rest) = path.segments().split_first()?;
        let mut node = self.roots.get(first)?;
        for key in rest {
            node = node.children.get(key)?;
        }
        Some(node)
    }

    pub fn node_mut(&mut self, path: &NodePath) -> Option<&mut JobNode> {
        let (first, rest) = path.segments().split_first()?;
        let mut node = self.roots.get_mut(first)?;
        for key in rest {
            node = node.children.get_mut(key)?;
        }
        Some(node)
    }

    /// Every node, depth-first, roots in key order.
    pub fn nodes(&self) -> Vec<(NodePath, &JobNode)> {
        fn visit<'a>(path: NodePath, node: &'a JobNode, out: &mut Vec<(NodePath, &'a JobNode)>) {
            out.push((path.clone(), node));
            for (key, child) in &node.children {
                visit(path.child(key), child, out);
            }
        }

        let mut out = Vec::new();
        for (key, root) in &self.roots {
            visit(NodePath::root(key), root, &mut out);
        }
        out
    }

    fn find(&self, predicate: impl Fn(&JobNode) -> bool) -> Option<NodePath> {
        self.nodes()
            .into_iter()
            .find(|(_, node)| predicate(node))
            .map(|(path, _)| path)
    }

    /// The node holding `remote_id`. Nodes become eligible once submitted.
    pub fn find_by_remote_id(&self, remote_id: &RemoteId) -> Option<NodePath> {
        self.find(|node| {
            node.status != crate::JobStatus::NotSubmitted
                && node.remote_id.as_ref() == Some(remote_id)
        })
    }

    pub fn find_by_node_id(&self, id: NodeId) -> Option<NodePath> {
        self.find(|node| node.id == id)
    }

    /// First node whose `completed` flag is still false.
    pub fn first_pending(&self) -> Option<NodePath> {
        self.find(|node| !node.completed)
    }

    pub fn pending_count(&self) -> usize {
        self.nodes().iter().filter(|(_, node)| !node.completed).count()
    }

    /// Number of nodes per status.
    pub fn status_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for (_, node) in self.nodes() {
            *counts.entry(node.status.to_string()).or_insert(0) += 1;
        }
        counts
    }
}

struct Inner {
    state: TreeState,
    version: u64,
}

/// Shared handle to the job tree of one run.
pub struct JobTree {
    inner: Mutex<Inner>,
    store: Arc<dyn StateStore>,
    /// Version of the last document handed to the store.
    written: tokio::sync::Mutex<u64>,
}

impl JobTree {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: TreeState::new(),
                version: 0,
            }),
            store,
            written: tokio::sync::Mutex::new(0),
        }
    }

    /// Add a root node. Seeding does not persist; call [`JobTree::persist`]
    /// once the tree is seeded.
    pub fn insert_root(&self, key: impl Into<String>, node: JobNode) -> Result<NodePath> {
        let key = key.into();
        let mut inner = self.inner.lock();
        if inner.state.roots.contains_key(&key) {
            return Err(Error::InvalidInput(format!("duplicate root key: {key}")));
        }
        inner.state.roots.insert(key.clone(), node);
        inner.version += 1;
        Ok(NodePath::root(key))
    }

    /// Read a node without mutating it.
    pub fn read<R>(&self, path: &NodePath, f: impl FnOnce(&JobNode) -> R) -> Result<R> {
        let inner = self.inner.lock();
        let node = inner
            .state
            .node(path)
            .ok_or_else(|| Error::NotFound(format!("job node {path}")))?;
        Ok(f(node))
    }

    /// Mutate one node, then write the whole tree through to the store.
    pub async fn update<F, R>(&self, path: &NodePath, f: F) -> Result<R>
    where
        F: FnOnce(&mut JobNode) -> R + Send,
        R: Send,
    {
        let (result, document, version) = {
            let mut inner = self.inner.lock();
            let node = inner
                .state
                .node_mut(path)
                .ok_or_else(|| Error::NotFound(format!("job node {path}")))?;
            let result = f(node);
            inner.version += 1;
            let document = serde_json::to_string_pretty(&inner.state)?;
            (result, document, inner.version)
        };
        self.write(document, version).await?;
        Ok(result)
    }

    /// Write the current tree to the store.
    pub async fn persist(&self) -> Result<()> {
        let (document, version) = {
            let inner = self.inner.lock();
            (serde_json::to_string_pretty(&inner.state)?, inner.version)
        };
        self.write(document, version).await
    }

    async fn write(&self, document: String, version: u64) -> Result<()> {
        let mut written = self.written.lock().await;
        // A newer snapshot already reached the store.
        if version < *written {
            return Ok(());
        }
        self.store
            .save(&document)
            .await
            .map_err(|e| Error::Persistence(e.to_string()))?;
        debug!(version, "Persisted job tree");
        *written = version;
        Ok(())
    }

    pub fn find_by_remote_id(&self, remote_id: &RemoteId) -> Option<NodePath> {
        self.inner.lock().state.find_by_remote_id(remote_id)
    }

    /// Resolve a correlation reference echoed back by a derived stage.
    pub fn find_by_correlation(&self, reference: &str) -> Option<NodePath> {
        let id: NodeId = reference.parse().ok()?;
        self.inner.lock().state.find_by_node_id(id)
    }

    pub fn has_pending(&self) -> bool {
        self.inner.lock().state.first_pending().is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().state.pending_count()
    }

    pub fn root_paths(&self) -> Vec<NodePath> {
        self.inner
            .lock()
            .state
            .roots
            .keys()
            .map(NodePath::root)
            .collect()
    }

    pub fn snapshot(&self) -> TreeState {
        self.inner.lock().state.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobStatus, Stage};
    use crate::store::MemoryStore;

    fn generation(prompt: &str, buttons: &[&str]) -> JobNode {
        buttons.iter().fold(
            JobNode::new(Stage::Generation {
                prompt: prompt.to_string(),
            }),
            |node, button| {
                node.with_child(
                    *button,
                    JobNode::new(Stage::Variant {
                        button: button.to_string(),
                        parent: None,
                        prompt: None,
                        upstream: None,
                    }),
                )
            },
        )
    }

    fn tree() -> (JobTree, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (JobTree::new(store.clone()), store)
    }

    #[test]
    fn test_node_path_formatting() {
        let path = NodePath::root("imagine-0").child("U1").child("faceswap");
        assert_eq!(path.to_string(), "imagine-0/U1/faceswap");
        assert_eq!(path.file_stem(), "imagine-0-U1-faceswap");
        assert_eq!(path.parent(), Some(NodePath::root("imagine-0").child("U1")));
        assert_eq!(NodePath::root("imagine-0").parent(), None);
    }

    #[test]
    fn test_artifact_stem() {
        let root = NodePath::root("imagine-0");
        assert_eq!(root.artifact_stem("grid"), "imagine-0-grid");
        assert_eq!(root.child("U1").artifact_stem("U1"), "imagine-0-U1");
        assert_eq!(
            root.child("U1").child("faceswap").artifact_stem("faceswap"),
            "imagine-0-U1-faceswap"
        );
    }

    #[test]
    fn test_artifact_stem_distinguishes_suffixed_siblings() {
        let root = NodePath::root("imagine-0");
        let node = generation("cat", &["V1-2", "V1-3"]);

        let a = root.child("V1-2").artifact_stem(node.children["V1-2"].stage.artifact_label());
        let b = root.child("V1-3").artifact_stem(node.children["V1-3"].stage.artifact_label());

        assert_eq!(a, "imagine-0-V1-2");
        assert_eq!(b, "imagine-0-V1-3");
        assert_ne!(a, b);
    }

    #[test]
    fn test_insert_root_rejects_duplicates() {
        let (tree, _) = tree();
        tree.insert_root("imagine-0", generation("a", &[])).unwrap();
        let err = tree.insert_root("imagine-0", generation("b", &[])).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_pending_scan_requires_every_node_completed() {
        let mut state = TreeState::new();
        state
            .roots
            .insert("imagine-0".to_string(), generation("a", &["U1", "U2"]));
        assert!(state.first_pending().is_some());

        let root = state.roots.get_mut("imagine-0").unwrap();
        root.completed = true;
        root.children.get_mut("U1").unwrap().completed = true;
        assert_eq!(
            state.first_pending(),
            Some(NodePath::root("imagine-0").child("U2"))
        );

        state.roots.get_mut("imagine-0").unwrap().settle();
        assert!(state.first_pending().is_none());
        assert_eq!(state.pending_count(), 0);
    }

    #[test]
    fn test_pending_scan_ignores_metadata() {
        let mut state = TreeState::new();
        let mut root = generation("a", &[]);
        root.completed = true;
        root.metadata
            .insert("_notes".to_string(), serde_json::json!({ "completed": false }));
        state.roots.insert("imagine-0".to_string(), root);
        assert!(state.first_pending().is_none());
    }

    #[test]
    fn test_find_by_remote_id_requires_submission() {
        let mut state = TreeState::new();
        let mut root = generation("a", &["U1"]);
        root.remote_id = Some(RemoteId::from("r1"));
        state.roots.insert("imagine-0".to_string(), root);

        assert_eq!(state.find_by_remote_id(&RemoteId::from("r1")), None);

        state
            .roots
            .get_mut("imagine-0")
            .unwrap()
            .advance(JobStatus::Submitted);
        assert_eq!(
            state.find_by_remote_id(&RemoteId::from("r1")),
            Some(NodePath::root("imagine-0"))
        );
        assert_eq!(state.find_by_remote_id(&RemoteId::from("r2")), None);
    }

    #[test]
    fn test_find_by_correlation() {
        let (tree, _) = tree();
        let root = generation("a", &["U1"]);
        let child_id = root.children["U1"].id;
        tree.insert_root("imagine-0", root).unwrap();

        assert_eq!(
            tree.find_by_correlation(&child_id.to_string()),
            Some(NodePath::root("imagine-0").child("U1"))
        );
        assert_eq!(tree.find_by_correlation("not-a-node-id"), None);
        assert_eq!(tree.find_by_correlation(&NodeId::new().to_string()), None);
    }

    #[tokio::test]
    async fn test_update_writes_through() {
        let (tree, store) = tree();
        let path = tree.insert_root("imagine-0", generation("a", &[])).unwrap();
        tree.persist().await.unwrap();
        assert_eq!(store.saves(), 1);

        tree.update(&path, |node| node.completed = true).await.unwrap();

        assert_eq!(store.saves(), 2);
        let saved: TreeState = serde_json::from_str(&store.last().unwrap()).unwrap();
        assert!(saved.roots["imagine-0"].completed);
        assert!(!tree.has_pending());
    }

    #[tokio::test]
    async fn test_update_unknown_path_is_not_found() {
        let (tree, store) = tree();
        let err = tree
            .update(&NodePath::root("missing"), |node| node.completed = true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(store.saves(), 0);
    }

    #[test]
    fn test_status_counts() {
        let mut state = TreeState::new();
        let mut root = generation("a", &["U1", "U2"]);
        root.advance(JobStatus::Submitted);
        root.advance(JobStatus::Moderated);
        root.settle();
        state.roots.insert("imagine-0".to_string(), root);

        let counts = state.status_counts();
        assert_eq!(counts["moderated"], 1);
        assert_eq!(counts["skipped"], 2);
    }
}
