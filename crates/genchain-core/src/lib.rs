//! Core domain types and traits for the genchain job orchestrator.
//!
//! This crate contains:
//! - Node and remote identifiers
//! - Job nodes, stage payloads and statuses
//! - The shared job tree and its durable state store
//! - Inbound completion notifications
//! - Collaborator traits (remote submitter, artifact fetcher)

pub mod artifact;
pub mod error;
pub mod id;
pub mod job;
pub mod notification;
pub mod store;
pub mod submitter;
pub mod tree;

pub use error::{Error, Result};
pub use id::{NodeId, RemoteId};
pub use job::{JobNode, JobStatus, PipelineKind, Stage, StageKind};
pub use notification::Notification;
pub use tree::{JobTree, NodePath, TreeState};
