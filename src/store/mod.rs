// Document store abstraction.
// The handlers only ever talk to `dyn DocumentStore`, so the same code runs
// against PostgreSQL in production and the in-memory store in tests.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgDocumentStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::core::types::{CollectionPath, DocumentPath};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub path: DocumentPath,
    pub data: Value,
}

impl Document {
    pub fn new(path: DocumentPath, data: Value) -> Self {
        Self { path, data }
    }

    pub fn id(&self) -> &str {
        self.path.id()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    pub fn get_timestamp(&self, field: &str) -> Option<DateTime<Utc>> {
        parse_timestamp(self.get(field)?)
    }
}

/// Parse a stored timestamp. Only the strict shape accepted by
/// `rfc3339_to_timestamptz` in the migrations is recognised, so both stores
/// agree on which documents carry a usable timestamp.
pub(crate) fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let raw = value.as_str()?;
    if !is_strict_rfc3339(raw) {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// `YYYY-MM-DDTHH:MM:SS[.ffffff](Z|+HH:MM|-HH:MM)` with year 1000-9999,
/// hours 00-23, seconds 00-59, at most six fraction digits and an offset of
/// at most 14 hours.
pub(crate) fn is_strict_rfc3339(raw: &str) -> bool {
    let b = raw.as_bytes();
    let digits = |range: std::ops::Range<usize>| {
        b.get(range.clone())
            .map(|s| s.iter().all(u8::is_ascii_digit))
            .unwrap_or(false)
    };
    let two = |at: usize| -> Option<u8> {
        if digits(at..at + 2) {
            Some((b[at] - b'0') * 10 + (b[at + 1] - b'0'))
        } else {
            None
        }
    };

    if b.len() < 20 || !digits(0..4) || b[0] == b'0' {
        return false;
    }
    if b[4] != b'-' || !digits(5..7) || b[7] != b'-' || !digits(8..10) || b[10] != b'T' {
        return false;
    }
    match (two(11), two(14), two(17)) {
        (Some(h), Some(m), Some(s)) if h <= 23 && m <= 59 && s <= 59 => {}
        _ => return false,
    }
    if b[13] != b':' || b[16] != b':' {
        return false;
    }

    let mut pos = 19;
    if b.get(pos) == Some(&b'.') {
        let frac = b[pos + 1..].iter().take_while(|c| c.is_ascii_digit()).count();
        if frac == 0 || frac > 6 {
            return false;
        }
        pos += 1 + frac;
    }

    match b.get(pos) {
        Some(b'Z') => pos + 1 == b.len(),
        Some(b'+') | Some(b'-') => {
            pos + 6 == b.len()
                && b[pos + 3] == b':'
                && matches!((two(pos + 1), two(pos + 4)), (Some(h), Some(m)) if h <= 14 && m <= 59)
        }
        _ => false,
    }
}

/// Value of a single field in a write.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Value(Value),
    /// Replaced by the store's clock when the write is applied.
    ServerTimestamp,
}

/// Set of top-level fields to write onto a document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentWrite {
    fields: BTreeMap<String, FieldValue>,
}

impl DocumentWrite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<T: Serialize>(mut self, field: &str, value: T) -> Result<Self> {
        let value = serde_json::to_value(value)?;
        self.fields
            .insert(field.to_string(), FieldValue::Value(value));
        Ok(self)
    }

    pub fn server_timestamp(mut self, field: &str) -> Self {
        self.fields
            .insert(field.to_string(), FieldValue::ServerTimestamp);
        self
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Materialize the write with server timestamps set to `now`.
    pub fn resolve(&self, now: DateTime<Utc>) -> Map<String, Value> {
        self.fields
            .iter()
            .map(|(field, value)| {
                let value = match value {
                    FieldValue::Value(v) => v.clone(),
                    FieldValue::ServerTimestamp => Value::String(format_timestamp(now)),
                };
                (field.clone(), value)
            })
            .collect()
    }
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Deep-merge `incoming` into `target`. Nested maps are merged key by key,
/// everything else is replaced.
pub fn merge_fields(target: &mut Map<String, Value>, incoming: Map<String, Value>) {
    for (key, value) in incoming {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(nested)) => {
                merge_fields(existing, nested);
            }
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

/// Apply an update: top-level fields are replaced wholesale.
pub fn apply_update(target: &mut Map<String, Value>, incoming: Map<String, Value>) {
    for (key, value) in incoming {
        target.insert(key, value);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Equal { field: String, value: Value },
    /// Timestamp field strictly earlier than `at`
    Before { field: String, at: DateTime<Utc> },
}

impl Filter {
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::Equal { field, value } => doc.get(field) == Some(value),
            Filter::Before { field, at } => doc
                .get_timestamp(field)
                .map(|ts| ts < *at)
                .unwrap_or(false),
        }
    }
}

/// Filtered read over one collection.
///
/// Results are ordered by `order_by` (a timestamp field) and then by document
/// id, so `start_after` with the last document of a page resumes exactly
/// where that page ended.
#[derive(Debug, Clone)]
pub struct Query {
    pub collection: CollectionPath,
    pub filters: Vec<Filter>,
    pub order_by: Option<String>,
    pub limit: Option<usize>,
    pub start_after: Option<Document>,
}

impl Query {
    pub fn collection(collection: CollectionPath) -> Self {
        Self {
            collection,
            filters: Vec::new(),
            order_by: None,
            limit: None,
            start_after: None,
        }
    }

    pub fn where_eq<T: Serialize>(mut self, field: &str, value: T) -> Result<Self> {
        self.filters.push(Filter::Equal {
            field: field.to_string(),
            value: serde_json::to_value(value)?,
        });
        Ok(self)
    }

    pub fn where_before(mut self, field: &str, at: DateTime<Utc>) -> Self {
        self.filters.push(Filter::Before {
            field: field.to_string(),
            at,
        });
        self
    }

    pub fn order_by(mut self, field: &str) -> Self {
        self.order_by = Some(field.to_string());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start_after(mut self, doc: Document) -> Self {
        self.start_after = Some(doc);
        self
    }

    /// Ordering key of `doc` under this query: (timestamp, id).
    pub fn sort_key(&self, doc: &Document) -> (Option<DateTime<Utc>>, String) {
        let ts = self
            .order_by
            .as_deref()
            .and_then(|field| doc.get_timestamp(field));
        (ts, doc.id().to_string())
    }

    pub fn matches(&self, doc: &Document) -> bool {
        if doc.path.parent() != self.collection {
            return false;
        }
        if let Some(field) = &self.order_by {
            // Documents without the ordering field are left out of ordered reads
            if doc.get_timestamp(field).is_none() {
                return false;
            }
        }
        self.filters.iter().all(|f| f.matches(doc))
    }
}

/// Group of updates committed atomically.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    updates: Vec<(DocumentPath, DocumentWrite)>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, path: DocumentPath, write: DocumentWrite) {
        self.updates.push((path, write));
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn into_updates(self) -> Vec<(DocumentPath, DocumentWrite)> {
        self.updates
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>>;

    /// Overwrite the whole document.
    async fn set(&self, path: &DocumentPath, data: Value) -> Result<()>;

    /// Merge `write` into the document, creating it when missing.
    async fn set_merge(&self, path: &DocumentPath, write: DocumentWrite) -> Result<()>;

    async fn query(&self, query: &Query) -> Result<Vec<Document>>;

    /// Apply every update or none. Fails if any target document is missing.
    async fn commit_batch(&self, batch: WriteBatch) -> Result<()>;

    async fn health_check(&self) -> Result<()>;
}
