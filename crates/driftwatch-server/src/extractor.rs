use crate::config::{ExtractorConfig, ExtractorKind};
use crate::error::CheckError;
use async_trait::async_trait;
use chrono::Utc;
use driftwatch_common::snapshot::{Snapshot, SnapshotError};
use driftwatch_common::types::Entity;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("Extract: entity descriptor is missing '{0}'")]
    Descriptor(&'static str),

    #[error("Extract: I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Extract: HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Extract: JSON pointer '{0}' matched nothing")]
    PointerNotFound(String),

    #[error("Extract: {0}")]
    Malformed(#[from] SnapshotError),
}

impl From<ExtractError> for CheckError {
    fn from(e: ExtractError) -> Self {
        match e {
            ExtractError::Malformed(inner) => CheckError::Malformed(inner.to_string()),
            other => CheckError::Extraction(other.to_string()),
        }
    }
}

/// Turns an entity's extraction descriptor into a structured snapshot.
///
/// How the snapshot is obtained (browser automation, an HTTP API, files
/// written by a scraper) is up to the implementation. Callers apply their
/// own timeout around [`Extractor::fetch_snapshot`].
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Returns the extractor type name (e.g., `"file"`, `"http"`).
    fn name(&self) -> &str;

    async fn fetch_snapshot(&self, entity: &Entity) -> Result<Snapshot, ExtractError>;
}

fn descriptor_str<'a>(entity: &'a Entity, key: &'static str) -> Result<&'a str, ExtractError> {
    entity
        .descriptor
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or(ExtractError::Descriptor(key))
}

/// Applies the descriptor's optional `pointer` (RFC 6901) to pick the
/// snapshot object out of a larger document.
fn select(entity: &Entity, document: serde_json::Value) -> Result<serde_json::Value, ExtractError> {
    match entity.descriptor.get("pointer").and_then(|v| v.as_str()) {
        Some(pointer) => document
            .pointer(pointer)
            .cloned()
            .ok_or_else(|| ExtractError::PointerNotFound(pointer.to_string())),
        None => Ok(document),
    }
}

/// Reads snapshots from JSON files written by an external scraper.
///
/// Descriptor: `{ path = "laptop.json", pointer = "/data" }`, with `path`
/// relative to the configured base directory.
pub struct FileExtractor {
    base_dir: PathBuf,
}

impl FileExtractor {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }
}

#[async_trait]
impl Extractor for FileExtractor {
    fn name(&self) -> &str {
        "file"
    }

    async fn fetch_snapshot(&self, entity: &Entity) -> Result<Snapshot, ExtractError> {
        let path = self.base_dir.join(descriptor_str(entity, "path")?);
        let raw = tokio::fs::read_to_string(&path).await?;
        let document: serde_json::Value =
            serde_json::from_str(&raw).map_err(SnapshotError::from)?;
        let snapshot = Snapshot::from_json(select(entity, document)?, Utc::now())?;
        Ok(snapshot)
    }
}

/// Fetches snapshots from a JSON HTTP endpoint.
///
/// Descriptor: `{ url = "https://...", pointer = "/product" }`.
pub struct HttpExtractor {
    client: reqwest::Client,
}

impl HttpExtractor {
    pub fn new(user_agent: &str) -> Result<Self, ExtractError> {
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Extractor for HttpExtractor {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch_snapshot(&self, entity: &Entity) -> Result<Snapshot, ExtractError> {
        let url = descriptor_str(entity, "url")?;
        let document: serde_json::Value = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let snapshot = Snapshot::from_json(select(entity, document)?, Utc::now())?;
        Ok(snapshot)
    }
}

pub fn build_extractor(config: &ExtractorConfig) -> anyhow::Result<Arc<dyn Extractor>> {
    let extractor: Arc<dyn Extractor> = match config.kind {
        ExtractorKind::File => Arc::new(FileExtractor::new(&config.base_dir)),
        ExtractorKind::Http => Arc::new(HttpExtractor::new(&config.user_agent)?),
    };
    Ok(extractor)
}
