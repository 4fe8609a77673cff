use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::{apply_update, merge_fields, Document, DocumentStore, DocumentWrite, Query, WriteBatch};
use crate::core::types::DocumentPath;
use crate::error::{Result, SyncError};

/// Process-local document store.
///
/// Used for `STORE_BACKEND=memory` and throughout the unit tests. A batch is
/// applied under a single write lock, which gives the same all-or-nothing
/// behaviour as a database transaction.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    documents: Arc<RwLock<BTreeMap<DocumentPath, Map<String, Value>>>>,
    batches_committed: Arc<AtomicU64>,
    fail_writes: Arc<AtomicBool>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of batches committed so far.
    pub fn batches_committed(&self) -> u64 {
        self.batches_committed.load(Ordering::Relaxed)
    }

    /// Make every subsequent write fail until switched off again.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(SyncError::Connection(
                "in-memory store is rejecting writes".to_string(),
            ));
        }
        Ok(())
    }
}

fn into_object(data: Value) -> Result<Map<String, Value>> {
    match data {
        Value::Object(map) => Ok(map),
        other => Err(SyncError::Processing(format!(
            "document data must be an object, got {other}"
        ))),
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>> {
        let documents = self.documents.read().await;
        Ok(documents
            .get(path)
            .map(|data| Document::new(path.clone(), Value::Object(data.clone()))))
    }

    async fn set(&self, path: &DocumentPath, data: Value) -> Result<()> {
        self.check_writable()?;
        let data = into_object(data)?;
        self.documents.write().await.insert(path.clone(), data);
        Ok(())
    }

    async fn set_merge(&self, path: &DocumentPath, write: DocumentWrite) -> Result<()> {
        self.check_writable()?;
        let incoming = write.resolve(Utc::now());
        let mut documents = self.documents.write().await;
        let target = documents.entry(path.clone()).or_default();
        merge_fields(target, incoming);
        Ok(())
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        let documents = self.documents.read().await;

        let mut matched: Vec<Document> = documents
            .iter()
            .map(|(path, data)| Document::new(path.clone(), Value::Object(data.clone())))
            .filter(|doc| query.matches(doc))
            .collect();

        matched.sort_by_key(|doc| query.sort_key(doc));

        if let Some(cursor) = &query.start_after {
            let cursor_key = query.sort_key(cursor);
            matched.retain(|doc| query.sort_key(doc) > cursor_key);
        }

        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }

        debug!(
            "In-memory query on '{}' returned {} documents",
            query.collection,
            matched.len()
        );
        Ok(matched)
    }

    async fn commit_batch(&self, batch: WriteBatch) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now();
        let mut documents = self.documents.write().await;
        let updates = batch.into_updates();

        if let Some((missing, _)) = updates.iter().find(|(path, _)| !documents.contains_key(path)) {
            return Err(SyncError::Processing(format!(
                "cannot update missing document '{missing}'"
            )));
        }

        for (path, write) in updates {
            if let Some(target) = documents.get_mut(&path) {
                apply_update(target, write.resolve(now));
            }
        }

        self.batches_committed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
