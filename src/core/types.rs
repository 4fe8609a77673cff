use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, SyncError};

fn split_segments(path: &str) -> Result<Vec<&str>> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Err(SyncError::InvalidPath("path is empty".to_string()));
    }

    let segments: Vec<&str> = trimmed.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(SyncError::InvalidPath(format!(
            "path '{path}' contains an empty segment"
        )));
    }

    Ok(segments)
}

/// Path to a collection, e.g. `shows` or `venues/v1/reviews`.
///
/// Always has an odd number of segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn parse(path: &str) -> Result<Self> {
        let segments = split_segments(path)?;
        if segments.len() % 2 == 0 {
            return Err(SyncError::InvalidPath(format!(
                "'{path}' points at a document, not a collection"
            )));
        }
        Ok(Self(segments.join("/")))
    }

    pub fn doc(&self, id: &str) -> Result<DocumentPath> {
        if id.is_empty() || id.contains('/') {
            return Err(SyncError::InvalidPath(format!(
                "'{id}' is not a valid document id"
            )));
        }
        Ok(DocumentPath(format!("{}/{}", self.0, id)))
    }

    /// Last segment, the collection name itself.
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CollectionPath {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<CollectionPath> for String {
    fn from(path: CollectionPath) -> Self {
        path.0
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Path to a single document, e.g. `venues/v1/reviews/r1`.
///
/// Always has an even number of segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentPath(String);

impl DocumentPath {
    pub fn parse(path: &str) -> Result<Self> {
        let segments = split_segments(path)?;
        if segments.len() % 2 != 0 {
            return Err(SyncError::InvalidPath(format!(
                "'{path}' points at a collection, not a document"
            )));
        }
        Ok(Self(segments.join("/")))
    }

    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    pub fn parent(&self) -> CollectionPath {
        let (collection, _) = self.0.rsplit_once('/').unwrap_or((&self.0, ""));
        CollectionPath(collection.to_string())
    }

    /// Sub-collection owned by this document.
    pub fn collection(&self, name: &str) -> Result<CollectionPath> {
        CollectionPath::parse(&format!("{}/{}", self.0, name))
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DocumentPath {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<DocumentPath> for String {
    fn from(path: DocumentPath) -> Self {
        path.0
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Top-level collections whose documents own a `reviews` sub-collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParentCollection {
    Venues,
    Shows,
}

impl ParentCollection {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParentCollection::Venues => "venues",
            ParentCollection::Shows => "shows",
        }
    }

    pub fn path(&self) -> CollectionPath {
        CollectionPath(self.as_str().to_string())
    }
}

impl fmt::Display for ParentCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteKind {
    Created,
    Updated,
    Deleted,
}

/// Notification that a document was written, as delivered on the change stream.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DocumentWriteEvent {
    pub document: DocumentPath,
    #[serde(default = "default_write_kind")]
    pub change: WriteKind,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

fn default_write_kind() -> WriteKind {
    WriteKind::Updated
}

/// Message read from a Redis stream
#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub id: String,
    pub event: DocumentWriteEvent,
    pub source_stream: String,
}

/// Result of one consume call: the messages plus how many were reclaimed
/// from the pending list rather than freshly delivered.
#[derive(Debug, Default)]
pub struct BatchConsumptionResult {
    pub messages: Vec<StreamMessage>,
    pub claimed_count: usize,
}

/// Pipeline metrics for monitoring and observability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineMetrics {
    pub total_events_processed: u64,
    pub total_events_failed: u64,
    pub total_archive_runs: u64,
    pub circuit_breaker_state: String,
    pub redis_consumer_health: bool,
    pub store_health: bool,
}

/// Health status for the entire pipeline
#[derive(Debug, Clone, Serialize)]
pub struct PipelineHealth {
    pub healthy: bool,
    pub redis_consumer_healthy: bool,
    pub store_healthy: bool,
    pub circuit_breaker_closed: bool,
    pub last_check: DateTime<Utc>,
    pub next_archive_run: Option<DateTime<Utc>>,
    pub metrics: PipelineMetrics,
}
