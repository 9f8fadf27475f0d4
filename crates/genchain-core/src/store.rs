//! Durable state storage for the job tree.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

use crate::Result;

/// Trait for job tree state backends.
///
/// The whole tree is written as one document after every mutation. The
/// document is never read back by the orchestrator.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn save(&self, document: &str) -> Result<()>;
}

/// Writes the document to a JSON file, replacing it atomically.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn save(&self, document: &str) -> Result<()> {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, document).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// Keeps the latest document in memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    last: Option<String>,
    saves: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently saved document.
    pub fn last(&self) -> Option<String> {
        self.inner.lock().last.clone()
    }

    /// Number of saves so far.
    pub fn saves(&self) -> usize {
        self.inner.lock().saves
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn save(&self, document: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.last = Some(document.to_string());
        inner.saves += 1;
        Ok(())
    }
}
