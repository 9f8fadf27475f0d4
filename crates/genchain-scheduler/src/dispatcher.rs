//! Routes completion notifications to the job tree and fans out follow-on work.
//!
//! Primary stages (generation, variant) are correlated by remote job id;
//! derived stages (face swap, animation) by the node id they echoed back.
//! Only terminal notifications change anything, and only the first one for a
//! node is applied.

use genchain_core::artifact::Artifact;
use genchain_core::{
    Error, JobNode, JobStatus, Notification, NodePath, PipelineKind, Result, Stage, StageKind,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::context::PipelineContext;

/// What a notification did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// The job is still running remotely.
    InFlight,
    /// No node matches the notification.
    Unmatched,
    /// The node already reached a terminal status.
    Duplicate,
    /// The matching node is a different kind of stage.
    Mismatched,
    /// The node was finalized; `enqueued` follow-on submissions were queued.
    Applied { path: NodePath, enqueued: usize },
}

pub struct EventDispatcher {
    ctx: Arc<PipelineContext>,
}

impl EventDispatcher {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    pub async fn dispatch(&self, notification: Notification) -> Result<Dispatch> {
        info!(
            kind = %notification.kind,
            remote_id = ?notification.remote_id.as_ref().map(|id| id.short()),
            correlation_ref = ?notification.correlation_ref,
            status = %notification.status,
            content = %notification.content_preview(),
            "Notification received"
        );

        if !notification.status.is_terminal() {
            debug!(kind = %notification.kind, "Job still in flight");
            return Ok(Dispatch::InFlight);
        }

        let Some(path) = self.resolve(&notification) else {
            warn!(
                kind = %notification.kind,
                remote_id = ?notification.remote_id,
                correlation_ref = ?notification.correlation_ref,
                "No job node matches notification, dropping"
            );
            return Ok(Dispatch::Unmatched);
        };

        let kind = notification.kind;
        let status = notification.status;

        // Checked again when committing, a concurrent delivery may get there first.
        let (current_kind, current_status, label) = self.ctx.tree.read(&path, |node| {
            (node.kind(), node.status, node.stage.artifact_label().to_string())
        })?;
        if let Some(outcome) = rejection(current_kind, current_status, kind) {
            warn!(%path, %kind, %status, ?outcome, "Notification not applied");
            return Ok(outcome);
        }

        // Retrieval happens before the terminal status is recorded, so a
        // failed download leaves the node as it was and a redelivery applies.
        let artifact = match wanted_artifact(&notification) {
            Some(url) => Some(self.fetch(&path, &label, url).await.inspect_err(|e| {
                warn!(%path, error = %e, "Artifact retrieval failed, node left unchanged");
            })?),
            None => None,
        };
        let image = artifact.as_ref().map(|a| a.path.clone());

        let content = notification.content.clone();
        let urls: Vec<String> = notification
            .attachments
            .iter()
            .map(|a| a.url.clone())
            .collect();

        let applied = self
            .ctx
            .tree
            .update(&path, |node| {
                if let Some(outcome) = rejection(node.kind(), node.status, kind) {
                    return Err(outcome);
                }
                if !node.record_terminal(status, content) {
                    return Err(Dispatch::Duplicate);
                }
                if !urls.is_empty() {
                    node.metadata
                        .insert("attachments".to_string(), serde_json::json!(urls));
                }
                if let Some(artifact) = artifact {
                    node.artifacts.push(artifact);
                }
                Ok(node.clone())
            })
            .await?;

        let node = match applied {
            Ok(node) => node,
            Err(outcome) => {
                warn!(%path, %kind, %status, ?outcome, "Notification not applied");
                return Ok(outcome);
            }
        };

        let enqueued = match kind {
            StageKind::Generation | StageKind::Variant => {
                self.on_primary(&path, &node, image).await?
            }
            StageKind::FaceSwap => self.on_enhancement(&path, &node, image).await?,
            StageKind::Animation => self.on_animation(&path, &node).await?,
        };

        Ok(Dispatch::Applied { path, enqueued })
    }

    fn resolve(&self, notification: &Notification) -> Option<NodePath> {
        if notification.kind.correlates_by_reference() {
            let reference = notification.correlation_ref.as_deref()?;
            self.ctx.tree.find_by_correlation(reference)
        } else {
            let remote_id = notification.remote_id.as_ref()?;
            self.ctx.tree.find_by_remote_id(remote_id)
        }
    }

    async fn fetch(&self, path: &NodePath, label: &str, url: &str) -> Result<Artifact> {
        let stem = path.artifact_stem(label);
        let artifact = self.ctx.fetcher.fetch(url, &stem).await?;
        info!(%path, file = %artifact.path.display(), size = artifact.size, "Artifact retrieved");
        Ok(artifact)
    }

    /// Generation or variant reached a terminal status.
    async fn on_primary(
        &self,
        path: &NodePath,
        node: &JobNode,
        image: Option<PathBuf>,
    ) -> Result<usize> {
        if node.status != JobStatus::Completed {
            let skipped = self
                .ctx
                .tree
                .update(path, |node| {
                    let skipped = node.skip_pending_children();
                    node.completed = true;
                    skipped
                })
                .await?;
            info!(%path, status = %node.status, skipped, "Stage did not complete, skipping what depends on it");
            self.ctx.notice(
                PipelineKind::Generation,
                format!("{path} ended {}, nothing to submit", node.status),
            );
            return Ok(0);
        }

        let remote_id = node.remote_id.clone();
        let next_stage = image
            .clone()
            .filter(|_| node.stage.is_upscale())
            .map(|image| self.next_stage(image));

        let follow_ups = self
            .ctx
            .tree
            .update(path, move |node| {
                let mut follow_ups = Vec::new();
                for key in node.unsubmitted_children() {
                    let Some(child) = node.children.get_mut(&key) else {
                        continue;
                    };
                    if let Stage::Variant {
                        parent,
                        upstream: child_upstream,
                        ..
                    } = &mut child.stage
                    {
                        *parent = remote_id.clone();
                        if child_upstream.is_none() {
                            *child_upstream = image.clone();
                        }
                    }
                    follow_ups.push((key, child.kind()));
                }

                if let Some((key, child)) = next_stage {
                    let kind = child.kind();
                    node.children.insert(key.to_string(), child);
                    follow_ups.push((key.to_string(), kind));
                }

                node.completed = true;
                follow_ups
            })
            .await?;

        Ok(self.enqueue_follow_ups(path, PipelineKind::Generation, follow_ups))
    }

    /// Face swap reached a terminal status. Animation always follows, using
    /// the swapped image when there is one and the original otherwise.
    async fn on_enhancement(
        &self,
        path: &NodePath,
        node: &JobNode,
        image: Option<PathBuf>,
    ) -> Result<usize> {
        let Stage::FaceSwap { target_image, .. } = &node.stage else {
            return Err(Error::Internal(format!("{path} is not a face swap")));
        };

        let image = match image {
            Some(image) => image,
            None => {
                info!(%path, status = %node.status, "No enhanced image, animating the original");
                target_image.clone()
            }
        };
        let prompt = self.ctx.settings.animation_prompt.clone();

        let follow_ups = self
            .ctx
            .tree
            .update(path, move |node| {
                node.children.insert(
                    "animation".to_string(),
                    JobNode::new(Stage::Animation { image, prompt }),
                );
                node.completed = true;
                vec![("animation".to_string(), StageKind::Animation)]
            })
            .await?;

        Ok(self.enqueue_follow_ups(path, PipelineKind::Enhancement, follow_ups))
    }

    /// Animation reached a terminal status; its branch is done.
    async fn on_animation(&self, path: &NodePath, node: &JobNode) -> Result<usize> {
        self.ctx
            .tree
            .update(path, |node| node.completed = true)
            .await?;

        info!(%path, status = %node.status, "Branch finished");
        Ok(self.enqueue_follow_ups(path, PipelineKind::Animation, Vec::new()))
    }

    /// The stage that follows a retrieved variant image.
    fn next_stage(&self, image: PathBuf) -> (&'static str, JobNode) {
        match &self.ctx.settings.face_source {
            Some(source) => (
                "faceswap",
                JobNode::new(Stage::FaceSwap {
                    source_image: source.clone(),
                    target_image: image,
                }),
            ),
            None => (
                "animation",
                JobNode::new(Stage::Animation {
                    image,
                    prompt: self.ctx.settings.animation_prompt.clone(),
                }),
            ),
        }
    }

    /// Queue follow-on submissions. The notified stage's own queue always
    /// gets a task, so a queue paused on `Full` resumes.
    fn enqueue_follow_ups(
        &self,
        path: &NodePath,
        own: PipelineKind,
        follow_ups: Vec<(String, StageKind)>,
    ) -> usize {
        let count = follow_ups.len();
        let mut nudged = false;
        for (key, kind) in follow_ups {
            nudged |= kind.pipeline() == own;
            self.ctx.enqueue_submission(path.child(key), kind);
        }
        if !nudged {
            self.ctx
                .notice(own, format!("{path} finished, nothing more to submit on the {own} queue"));
        }
        count
    }
}

/// Why a notification cannot be applied to a node in its current state.
fn rejection(node_kind: StageKind, node_status: JobStatus, kind: StageKind) -> Option<Dispatch> {
    if node_kind != kind {
        Some(Dispatch::Mismatched)
    } else if node_status.is_terminal() {
        Some(Dispatch::Duplicate)
    } else {
        None
    }
}

/// Attachment worth retrieving: any completed stage's, and the animation's
/// whatever its status.
fn wanted_artifact(notification: &Notification) -> Option<&str> {
    match notification.kind {
        StageKind::Animation => notification.artifact_url(),
        _ if notification.status == JobStatus::Completed => notification.artifact_url(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use genchain_core::artifact::Attachment;
    use genchain_core::{RemoteId, TreeState};

    fn seed(harness: &Harness) -> NodePath {
        let root = ["U1", "U2"].into_iter().fold(
            JobNode::new(Stage::Generation {
                prompt: "cat in the hat".to_string(),
            }),
            |node, key| {
                node.with_child(
                    key,
                    JobNode::new(Stage::Variant {
                        button: key.to_string(),
                        parent: None,
                        prompt: None,
                        upstream: None,
                    }),
                )
            },
        );
        harness.ctx.tree.insert_root("imagine-0", root).unwrap()
    }

    async fn submitted(harness: &Harness, path: &NodePath, remote_id: &str) {
        let remote_id = RemoteId::from(remote_id);
        harness
            .ctx
            .tree
            .update(path, |node| {
                node.remote_id = Some(remote_id);
                node.advance(JobStatus::Submitted);
            })
            .await
            .unwrap();
    }

    fn primary(kind: StageKind, remote_id: &str, status: JobStatus, url: Option<&str>) -> Notification {
        Notification {
            kind,
            remote_id: Some(RemoteId::from(remote_id)),
            correlation_ref: None,
            status,
            content: Some("cat in the hat --v 6".to_string()),
            attachments: url
                .map(|url| Attachment {
                    url: url.to_string(),
                })
                .into_iter()
                .collect(),
        }
    }

    fn derived(kind: StageKind, reference: String, status: JobStatus, url: Option<&str>) -> Notification {
        Notification {
            kind,
            remote_id: None,
            correlation_ref: Some(reference),
            status,
            content: None,
            attachments: url
                .map(|url| Attachment {
                    url: url.to_string(),
                })
                .into_iter()
                .collect(),
        }
    }

    fn snapshot_node(harness: &Harness, path: &NodePath) -> JobNode {
        let state: TreeState = harness.ctx.tree.snapshot();
        state.node(path).cloned().unwrap()
    }

    #[tokio::test]
    async fn test_generation_completed_activates_children() {
        let harness = Harness::new(false);
        let root = seed(&harness);
        submitted(&harness, &root, "R1").await;

        let dispatcher = EventDispatcher::new(harness.ctx.clone());
        let outcome = dispatcher
            .dispatch(primary(
                StageKind::Generation,
                "R1",
                JobStatus::Completed,
                Some("https://cdn.example/grid.png"),
            ))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Dispatch::Applied {
                path: root.clone(),
                enqueued: 2
            }
        );
        assert_eq!(
            harness.fetcher.fetched(),
            vec![(
                "https://cdn.example/grid.png".to_string(),
                "imagine-0-grid".to_string()
            )]
        );

        let node = snapshot_node(&harness, &root);
        assert_eq!(node.status, JobStatus::Completed);
        assert!(node.completed);
        assert_eq!(node.artifacts.len(), 1);
        match &node.children["U1"].stage {
            Stage::Variant {
                parent, upstream, ..
            } => {
                assert_eq!(parent, &Some(RemoteId::from("R1")));
                assert_eq!(upstream, &Some(PathBuf::from("/artifacts/imagine-0-grid.png")));
            }
            other => panic!("unexpected stage {other:?}"),
        }

        harness.ctx.queues.settled().await;
        let requests = harness.submitter.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.stage.kind() == StageKind::Variant));
        assert_eq!(
            harness.ctx.tree.read(&root.child("U1"), |n| n.status).unwrap(),
            JobStatus::Submitted
        );
    }

    #[tokio::test]
    async fn test_single_child_generation_enqueues_one_task() {
        let harness = Harness::new(false);
        let root = harness
            .ctx
            .tree
            .insert_root(
                "imagine-0",
                JobNode::new(Stage::Generation {
                    prompt: "a".to_string(),
                })
                .with_child(
                    "U1",
                    JobNode::new(Stage::Variant {
                        button: "U1".to_string(),
                        parent: None,
                        prompt: None,
                        upstream: None,
                    }),
                ),
            )
            .unwrap();
        submitted(&harness, &root, "R1").await;

        let outcome = EventDispatcher::new(harness.ctx.clone())
            .dispatch(primary(
                StageKind::Generation,
                "R1",
                JobStatus::Completed,
                Some("https://cdn.example/grid.png"),
            ))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Dispatch::Applied {
                path: root,
                enqueued: 1
            }
        );
        assert_eq!(harness.ctx.queues.get(PipelineKind::Generation).len(), 1);
    }

    #[tokio::test]
    async fn test_variant_completed_creates_face_swap() {
        let harness = Harness::new(true);
        let root = seed(&harness);
        let variant = root.child("U1");
        submitted(&harness, &variant, "V1").await;

        let outcome = EventDispatcher::new(harness.ctx.clone())
            .dispatch(primary(
                StageKind::Variant,
                "V1",
                JobStatus::Completed,
                Some("https://cdn.example/u1.png"),
            ))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Dispatch::Applied {
                path: variant.clone(),
                enqueued: 1
            }
        );
        let node = snapshot_node(&harness, &variant);
        assert!(node.completed);
        let swap = &node.children["faceswap"];
        assert_eq!(
            swap.stage,
            Stage::FaceSwap {
                source_image: PathBuf::from("/faces/source.jpg"),
                target_image: PathBuf::from("/artifacts/imagine-0-U1.png"),
            }
        );

        harness.ctx.queues.settled().await;
        let requests = harness.submitter.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].stage.kind(), StageKind::FaceSwap);
        assert_eq!(requests[0].correlation_ref, Some(swap.id.to_string()));
        // The variant's own queue was nudged.
        assert!(harness.ctx.queues.get(PipelineKind::Generation).is_empty());
    }

    #[tokio::test]
    async fn test_variant_completed_without_face_swap_animates() {
        let harness = Harness::new(false);
        let root = seed(&harness);
        let variant = root.child("U2");
        submitted(&harness, &variant, "V2").await;

        EventDispatcher::new(harness.ctx.clone())
            .dispatch(primary(
                StageKind::Variant,
                "V2",
                JobStatus::Completed,
                Some("https://cdn.example/u2.png"),
            ))
            .await
            .unwrap();

        let node = snapshot_node(&harness, &variant);
        assert_eq!(
            node.children["animation"].stage,
            Stage::Animation {
                image: PathBuf::from("/artifacts/imagine-0-U2.png"),
                prompt: Some("smiling".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_variant_completed_without_attachment_ends_branch() {
        let harness = Harness::new(false);
        let root = seed(&harness);
        let variant = root.child("U1");
        submitted(&harness, &variant, "V1").await;

        let outcome = EventDispatcher::new(harness.ctx.clone())
            .dispatch(primary(StageKind::Variant, "V1", JobStatus::Completed, None))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Dispatch::Applied {
                path: variant.clone(),
                enqueued: 0
            }
        );
        let node = snapshot_node(&harness, &variant);
        assert!(node.completed);
        assert!(node.children.is_empty());
        assert!(harness.fetcher.fetched().is_empty());
    }

    #[tokio::test]
    async fn test_face_swap_failure_falls_back_to_original() {
        let harness = Harness::new(true);
        let root = seed(&harness);
        let variant = root.child("U1");
        submitted(&harness, &variant, "V1").await;
        let dispatcher = EventDispatcher::new(harness.ctx.clone());
        dispatcher
            .dispatch(primary(
                StageKind::Variant,
                "V1",
                JobStatus::Completed,
                Some("https://cdn.example/u1.png"),
            ))
            .await
            .unwrap();
        harness.ctx.queues.settled().await;

        let swap = variant.child("faceswap");
        let swap_id = harness.ctx.tree.read(&swap, |n| n.id).unwrap();
        let outcome = dispatcher
            .dispatch(derived(
                StageKind::FaceSwap,
                swap_id.to_string(),
                JobStatus::Failed,
                None,
            ))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Dispatch::Applied {
                path: swap.clone(),
                enqueued: 1
            }
        );
        let node = snapshot_node(&harness, &swap);
        assert_eq!(node.status, JobStatus::Failed);
        assert!(node.completed);
        assert_eq!(
            node.children["animation"].stage,
            Stage::Animation {
                image: PathBuf::from("/artifacts/imagine-0-U1.png"),
                prompt: Some("smiling".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_face_swap_completed_uses_enhanced_image() {
        let harness = Harness::new(true);
        let root = seed(&harness);
        let variant = root.child("U1");
        submitted(&harness, &variant, "V1").await;
        let dispatcher = EventDispatcher::new(harness.ctx.clone());
        dispatcher
            .dispatch(primary(
                StageKind::Variant,
                "V1",
                JobStatus::Completed,
                Some("https://cdn.example/u1.png"),
            ))
            .await
            .unwrap();
        harness.ctx.queues.settled().await;

        let swap = variant.child("faceswap");
        let swap_id = harness.ctx.tree.read(&swap, |n| n.id).unwrap();
        dispatcher
            .dispatch(derived(
                StageKind::FaceSwap,
                swap_id.to_string(),
                JobStatus::Completed,
                Some("https://cdn.example/swapped.jpg"),
            ))
            .await
            .unwrap();

        let node = snapshot_node(&harness, &swap);
        assert_eq!(
            node.children["animation"].stage,
            Stage::Animation {
                image: PathBuf::from("/artifacts/imagine-0-U1-faceswap.png"),
                prompt: Some("smiling".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_animation_finishes_branch() {
        let harness = Harness::new(false);
        let root = seed(&harness);
        let variant = root.child("U1");
        submitted(&harness, &variant, "V1").await;
        let dispatcher = EventDispatcher::new(harness.ctx.clone());
        dispatcher
            .dispatch(primary(
                StageKind::Variant,
                "V1",
                JobStatus::Completed,
                Some("https://cdn.example/u1.png"),
            ))
            .await
            .unwrap();
        harness.ctx.queues.settled().await;

        let animation = variant.child("animation");
        let animation_id = harness.ctx.tree.read(&animation, |n| n.id).unwrap();
        let outcome = dispatcher
            .dispatch(derived(
                StageKind::Animation,
                animation_id.to_string(),
                JobStatus::Completed,
                Some("https://cdn.example/clip.mp4"),
            ))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Dispatch::Applied {
                path: animation.clone(),
                enqueued: 0
            }
        );
        let node = snapshot_node(&harness, &animation);
        assert!(node.completed);
        assert_eq!(
            node.latest_artifact().unwrap().path,
            PathBuf::from("/artifacts/imagine-0-U1-animated.png")
        );
    }

    #[tokio::test]
    async fn test_moderated_generation_skips_children() {
        let harness = Harness::new(false);
        let root = seed(&harness);
        submitted(&harness, &root, "R1").await;

        let outcome = EventDispatcher::new(harness.ctx.clone())
            .dispatch(primary(StageKind::Generation, "R1", JobStatus::Moderated, None))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Dispatch::Applied {
                path: root.clone(),
                enqueued: 0
            }
        );
        let node = snapshot_node(&harness, &root);
        assert_eq!(node.status, JobStatus::Moderated);
        assert!(node.children.values().all(|c| c.status == JobStatus::Skipped));
        assert!(!harness.ctx.tree.has_pending());
        harness.ctx.queues.settled().await;
        assert!(harness.submitter.requests().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_notification_is_ignored() {
        let harness = Harness::new(false);
        let root = seed(&harness);
        submitted(&harness, &root, "R1").await;
        let dispatcher = EventDispatcher::new(harness.ctx.clone());
        let notification = primary(
            StageKind::Generation,
            "R1",
            JobStatus::Completed,
            Some("https://cdn.example/grid.png"),
        );

        dispatcher.dispatch(notification.clone()).await.unwrap();
        harness.ctx.queues.settled().await;
        let outcome = dispatcher.dispatch(notification).await.unwrap();

        assert_eq!(outcome, Dispatch::Duplicate);
        assert_eq!(harness.fetcher.fetched().len(), 1);
        harness.ctx.queues.settled().await;
        assert_eq!(harness.submitter.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_remote_id_is_dropped() {
        let harness = Harness::new(false);
        let root = seed(&harness);
        submitted(&harness, &root, "R1").await;
        let saves = harness.store.saves();

        let outcome = EventDispatcher::new(harness.ctx.clone())
            .dispatch(primary(StageKind::Generation, "R404", JobStatus::Completed, None))
            .await
            .unwrap();

        assert_eq!(outcome, Dispatch::Unmatched);
        assert_eq!(harness.store.saves(), saves);
        assert!(harness.ctx.tree.has_pending());
    }

    #[tokio::test]
    async fn test_unsubmitted_node_does_not_match() {
        let harness = Harness::new(false);
        let root = seed(&harness);
        harness
            .ctx
            .tree
            .update(&root, |node| node.remote_id = Some(RemoteId::from("R1")))
            .await
            .unwrap();

        let outcome = EventDispatcher::new(harness.ctx.clone())
            .dispatch(primary(StageKind::Generation, "R1", JobStatus::Completed, None))
            .await
            .unwrap();

        assert_eq!(outcome, Dispatch::Unmatched);
    }

    #[tokio::test]
    async fn test_in_flight_notification_changes_nothing() {
        let harness = Harness::new(false);
        let root = seed(&harness);
        submitted(&harness, &root, "R1").await;
        let saves = harness.store.saves();

        let outcome = EventDispatcher::new(harness.ctx.clone())
            .dispatch(primary(StageKind::Generation, "R1", JobStatus::Submitted, None))
            .await
            .unwrap();

        assert_eq!(outcome, Dispatch::InFlight);
        assert_eq!(harness.store.saves(), saves);
    }

    #[tokio::test]
    async fn test_download_failure_leaves_node_for_redelivery() {
        let harness = Harness::new(false);
        let root = seed(&harness);
        submitted(&harness, &root, "R1").await;
        harness.fetcher.fail_once();
        let dispatcher = EventDispatcher::new(harness.ctx.clone());
        let notification = primary(
            StageKind::Generation,
            "R1",
            JobStatus::Completed,
            Some("https://cdn.example/grid.png"),
        );

        let err = dispatcher.dispatch(notification.clone()).await.unwrap_err();

        assert!(matches!(err, Error::Artifact(_)));
        let node = snapshot_node(&harness, &root);
        assert_eq!(node.status, JobStatus::Submitted);
        assert!(!node.completed);
        assert!(node.artifacts.is_empty());

        let outcome = dispatcher.dispatch(notification).await.unwrap();

        assert_eq!(
            outcome,
            Dispatch::Applied {
                path: root.clone(),
                enqueued: 2
            }
        );
        harness.ctx.queues.settled().await;
        assert_eq!(harness.submitter.requests().len(), 2);
        let node = snapshot_node(&harness, &root);
        assert!(node.completed);
        assert_eq!(node.artifacts.len(), 1);
        assert!(node.children.values().all(|c| c.status == JobStatus::Submitted));
    }

    #[tokio::test]
    async fn test_face_swap_download_failure_is_retried_on_redelivery() {
        let harness = Harness::new(true);
        let root = seed(&harness);
        let variant = root.child("U1");
        submitted(&harness, &variant, "V1").await;
        let dispatcher = EventDispatcher::new(harness.ctx.clone());
        dispatcher
            .dispatch(primary(
                StageKind::Variant,
                "V1",
                JobStatus::Completed,
                Some("https://cdn.example/u1.png"),
            ))
            .await
            .unwrap();
        harness.ctx.queues.settled().await;

        let swap = variant.child("faceswap");
        let swap_id = harness.ctx.tree.read(&swap, |n| n.id).unwrap();
        let notification = derived(
            StageKind::FaceSwap,
            swap_id.to_string(),
            JobStatus::Completed,
            Some("https://cdn.example/swapped.jpg"),
        );
        harness.fetcher.fail_once();

        assert!(dispatcher.dispatch(notification.clone()).await.is_err());
        let node = snapshot_node(&harness, &swap);
        assert_eq!(node.status, JobStatus::Submitted);
        assert!(node.children.is_empty());

        let outcome = dispatcher.dispatch(notification).await.unwrap();

        assert_eq!(
            outcome,
            Dispatch::Applied {
                path: swap.clone(),
                enqueued: 1
            }
        );
        let node = snapshot_node(&harness, &swap);
        assert!(node.completed);
        assert_eq!(
            node.children["animation"].stage,
            Stage::Animation {
                image: PathBuf::from("/artifacts/imagine-0-U1-faceswap.png"),
                prompt: Some("smiling".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_variation_grid_is_not_enhanced() {
        let harness = Harness::new(true);
        let root = harness
            .ctx
            .tree
            .insert_root(
                "imagine-0",
                JobNode::new(Stage::Generation {
                    prompt: "a".to_string(),
                })
                .with_child(
                    "V1-2",
                    JobNode::new(Stage::Variant {
                        button: "V1-2".to_string(),
                        parent: None,
                        prompt: None,
                        upstream: None,
                    }),
                ),
            )
            .unwrap();
        let variant = root.child("V1-2");
        submitted(&harness, &variant, "RV").await;

        let outcome = EventDispatcher::new(harness.ctx.clone())
            .dispatch(primary(
                StageKind::Variant,
                "RV",
                JobStatus::Completed,
                Some("https://cdn.example/v1.png"),
            ))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Dispatch::Applied {
                path: variant.clone(),
                enqueued: 0
            }
        );
        let node = snapshot_node(&harness, &variant);
        assert!(node.completed);
        assert!(node.children.is_empty());
        assert_eq!(
            node.latest_artifact().unwrap().path,
            PathBuf::from("/artifacts/imagine-0-V1-2.png")
        );
    }

    #[tokio::test]
    async fn test_completion_releases_full_queue() {
        let harness = Harness::new(false);
        let root = seed(&harness);
        let variant = root.child("U1");
        submitted(&harness, &root, "R1").await;
        submitted(&harness, &variant, "V1").await;

        // U2 is stalled behind a full remote queue.
        harness
            .submitter
            .script(Ok(genchain_core::submitter::SubmissionOutcome::Full));
        harness
            .ctx
            .enqueue_submission(root.child("U2"), StageKind::Variant);
        harness.ctx.queues.settled().await;
        let queue = harness.ctx.queues.get(PipelineKind::Generation);
        assert!(queue.is_full());

        EventDispatcher::new(harness.ctx.clone())
            .dispatch(primary(StageKind::Variant, "V1", JobStatus::Completed, None))
            .await
            .unwrap();
        harness.ctx.queues.settled().await;

        assert!(!queue.is_full());
        assert!(queue.is_empty());
        assert_eq!(
            harness.ctx.tree.read(&root.child("U2"), |n| n.status).unwrap(),
            JobStatus::Submitted
        );
    }
}
