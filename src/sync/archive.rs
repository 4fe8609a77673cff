use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::core::types::CollectionPath;
use crate::error::{Result, SyncError};
use crate::store::{DocumentStore, DocumentWrite, Query, WriteBatch};

pub const SHOWS_COLLECTION: &str = "shows";
pub const DEFAULT_PAGE_SIZE: usize = 400;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveSummary {
    pub scanned: u64,
    pub archived: u64,
    pub pages: u64,
}

fn is_archived(data: &Value) -> bool {
    data.get("isArchived") == Some(&Value::Bool(true))
}

/// Flag every show dated before `now` as archived.
///
/// Walks `shows` in date order, `page_size` documents at a time, resuming
/// after the last document of the previous page. Each page's pending updates
/// are committed as one batch; shows that are already archived are left
/// untouched. Pages are independent, so a failed run can simply be repeated.
pub async fn archive_past_shows(
    store: &dyn DocumentStore,
    now: DateTime<Utc>,
    page_size: usize,
) -> Result<ArchiveSummary> {
    if page_size == 0 {
        return Err(SyncError::Config(
            "Archive page size must be greater than 0".to_string(),
        ));
    }

    let shows = CollectionPath::parse(SHOWS_COLLECTION)?;
    let mut summary = ArchiveSummary::default();
    let mut last_doc: Option<crate::store::Document> = None;

    loop {
        let mut query = Query::collection(shows.clone())
            .where_before("date", now)
            .order_by("date")
            .limit(page_size);
        let cursor = last_doc.take();
        if let Some(doc) = &cursor {
            query = query.start_after(doc.clone());
        }

        let page = store.query(&query).await?;
        if page.is_empty() {
            break;
        }
        if let Some(cursor) = &cursor {
            if page.iter().any(|doc| doc.path == cursor.path) {
                return Err(SyncError::Processing(format!(
                    "archive cursor did not advance past '{}'",
                    cursor.path
                )));
            }
        }
        summary.pages += 1;

        let mut batch = WriteBatch::new();
        for doc in &page {
            summary.scanned += 1;
            if is_archived(&doc.data) {
                continue;
            }
            batch.update(
                doc.path.clone(),
                DocumentWrite::new()
                    .set("isArchived", true)?
                    .server_timestamp("updatedAt"),
            );
        }

        let pending = batch.len() as u64;
        if pending > 0 {
            store.commit_batch(batch).await?;
            summary.archived += pending;
        }

        debug!(
            "Archive page {}: {} shows, {} newly archived",
            summary.pages,
            page.len(),
            pending
        );

        let page_len = page.len();
        last_doc = page.into_iter().last();
        if page_len < page_size {
            break;
        }
    }

    Ok(summary)
}
