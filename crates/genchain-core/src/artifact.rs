//! Artifact retrieval abstraction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::Result;

/// A downloadable attachment announced by a completion notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
}

/// Reference to an artifact retrieved to local storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Remote location the artifact was retrieved from.
    pub url: String,
    /// Local file holding the artifact.
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
    /// When the artifact was retrieved.
    pub fetched_at: DateTime<Utc>,
}

/// Trait for artifact retrieval backends.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Retrieve `url` into local storage under a file named after `stem`.
    ///
    /// The extension is taken from the URL. Failures are returned to the
    /// caller, never swallowed.
    async fn fetch(&self, url: &str, stem: &str) -> Result<Artifact>;
}
