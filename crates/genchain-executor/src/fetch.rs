//! Artifact retrieval over HTTP into a local directory.

use async_trait::async_trait;
use chrono::Utc;
use genchain_core::artifact::{Artifact, ArtifactFetcher};
use genchain_core::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::debug;
use url::Url;

/// Downloads artifacts into `dir`.
pub struct HttpFetcher {
    client: reqwest::Client,
    dir: PathBuf,
}

impl HttpFetcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_client(reqwest::Client::new(), dir)
    }

    pub fn with_client(client: reqwest::Client, dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            dir: dir.into(),
        }
    }
}

/// File name for an artifact: `stem` plus the extension found in the URL path.
pub fn file_name(url: &str, stem: &str) -> String {
    let path = Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string());
    match Path::new(&path).extension().and_then(|ext| ext.to_str()) {
        Some(ext) => format!("{}.{}", stem, ext),
        None => stem.to_string(),
    }
}

#[async_trait]
impl ArtifactFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, stem: &str) -> Result<Artifact> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Artifact(format!("GET {url}: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Artifact(format!(
                "GET {} returned HTTP {}",
                url,
                response.status()
            )));
        }

        let data = response
            .bytes()
            .await
            .map_err(|e| Error::Artifact(format!("reading {url}: {e}")))?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(file_name(url, stem));
        tokio::fs::write(&path, &data).await?;
        debug!(%url, path = %path.display(), bytes = data.len(), "Downloaded artifact");

        Ok(Artifact {
            url: url.to_string(),
            path,
            size: data.len() as u64,
            fetched_at: Utc::now(),
        })
    }
}
