use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder, Row, Transaction};
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use super::{
    apply_update, merge_fields, Document, DocumentStore, DocumentWrite, Filter, Query, WriteBatch,
};
use crate::core::types::DocumentPath;
use crate::error::{Result, SyncError};

/// Document store backed by a single JSONB table.
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub async fn new(database_url: &str, pool_size: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .connect(database_url)
            .await
            .map_err(|e| {
                error!("Failed to connect to PostgreSQL: {e}");
                SyncError::Connection(format!("Failed to connect to PostgreSQL: {e}"))
            })?;

        info!("Connected to PostgreSQL database");

        // Retry migrations to ride out a database that is still starting up
        const MAX_RETRIES: u32 = 5;
        const INITIAL_DELAY_MS: u64 = 1000;

        for attempt in 1..=MAX_RETRIES {
            match sqlx::migrate!("./migrations").run(&pool).await {
                Ok(_) => {
                    info!("Database migrations completed successfully");
                    break;
                }
                Err(e) => {
                    if attempt < MAX_RETRIES {
                        let delay_ms = INITIAL_DELAY_MS * 2_u64.pow(attempt - 1);
                        warn!(
                            "Migration attempt {}/{} failed, retrying in {}ms: {}",
                            attempt, MAX_RETRIES, delay_ms, e
                        );
                        sleep(Duration::from_millis(delay_ms)).await;
                    } else {
                        error!("Failed to run migrations after {MAX_RETRIES} attempts: {e}");
                        return Err(SyncError::Migrate(e));
                    }
                }
            }
        }

        Ok(Self { pool })
    }

    /// Wrap an existing pool. Migrations are assumed to have run.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn server_now(tx: &mut Transaction<'_, Postgres>) -> Result<DateTime<Utc>> {
        let now: DateTime<Utc> = sqlx::query_scalar("SELECT NOW()")
            .fetch_one(&mut **tx)
            .await?;
        Ok(now)
    }

    async fn lock_document(
        tx: &mut Transaction<'_, Postgres>,
        path: &DocumentPath,
    ) -> Result<Option<Map<String, Value>>> {
        let row: Option<Json<Value>> = sqlx::query_scalar(
            "SELECT data FROM documents WHERE collection_path = $1 AND doc_id = $2 FOR UPDATE",
        )
        .bind(path.parent().as_str())
        .bind(path.id())
        .fetch_optional(&mut **tx)
        .await?;

        Ok(row.map(|Json(data)| match data {
            Value::Object(map) => map,
            _ => Map::new(),
        }))
    }

    async fn upsert(
        tx: &mut Transaction<'_, Postgres>,
        path: &DocumentPath,
        data: Map<String, Value>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (collection_path, doc_id, data)
            VALUES ($1, $2, $3)
            ON CONFLICT (collection_path, doc_id) DO UPDATE SET
                data = EXCLUDED.data,
                updated_at = NOW()
            "#,
        )
        .bind(path.parent().as_str())
        .bind(path.id())
        .bind(Json(Value::Object(data)))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

/// Timestamp value of a JSON field, NULL when it is missing or malformed.
fn push_timestamp_expr(builder: &mut QueryBuilder<'_, Postgres>, field: &str) {
    builder.push("rfc3339_to_timestamptz(data->>");
    builder.push_bind(field.to_string());
    builder.push(")");
}

fn build_select(query: &Query) -> Result<QueryBuilder<'_, Postgres>> {
    let mut builder =
        QueryBuilder::new("SELECT collection_path, doc_id, data FROM documents WHERE collection_path = ");
    builder.push_bind(query.collection.as_str().to_string());

    for filter in &query.filters {
        match filter {
            Filter::Equal { field, value } => {
                builder.push(" AND data -> ");
                builder.push_bind(field.clone());
                builder.push(" = ");
                builder.push_bind(Json(value.clone()));
            }
            Filter::Before { field, at } => {
                builder.push(" AND ");
                push_timestamp_expr(&mut builder, field);
                builder.push(" < ");
                builder.push_bind(*at);
            }
        }
    }

    if let Some(field) = &query.order_by {
        builder.push(" AND ");
        push_timestamp_expr(&mut builder, field);
        builder.push(" IS NOT NULL");
    }

    if let Some(cursor) = &query.start_after {
        let (cursor_ts, cursor_id) = query.sort_key(cursor);
        match (&query.order_by, cursor_ts) {
            (Some(field), Some(ts)) => {
                builder.push(" AND (");
                push_timestamp_expr(&mut builder, field);
                builder.push(", doc_id) > (");
                builder.push_bind(ts);
                builder.push(", ");
                builder.push_bind(cursor_id);
                builder.push(")");
            }
            (Some(field), None) => {
                return Err(SyncError::Processing(format!(
                    "cursor document '{}' has no usable '{field}' timestamp",
                    cursor.path
                )));
            }
            (None, _) => {
                builder.push(" AND doc_id > ");
                builder.push_bind(cursor_id);
            }
        }
    }

    builder.push(" ORDER BY ");
    if let Some(field) = &query.order_by {
        push_timestamp_expr(&mut builder, field);
        builder.push(", ");
    }
    builder.push("doc_id");

    if let Some(limit) = query.limit {
        builder.push(" LIMIT ");
        builder.push_bind(limit as i64);
    }

    Ok(builder)
}

fn row_to_document(row: &PgRow) -> Result<Document> {
    let collection: String = row.try_get("collection_path")?;
    let doc_id: String = row.try_get("doc_id")?;
    let Json(data): Json<Value> = row.try_get("data")?;
    let path = DocumentPath::parse(&format!("{collection}/{doc_id}"))?;
    Ok(Document::new(path, data))
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>> {
        let row: Option<Json<Value>> = sqlx::query_scalar(
            "SELECT data FROM documents WHERE collection_path = $1 AND doc_id = $2",
        )
        .bind(path.parent().as_str())
        .bind(path.id())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|Json(data)| Document::new(path.clone(), data)))
    }

    async fn set(&self, path: &DocumentPath, data: Value) -> Result<()> {
        let data = match data {
            Value::Object(map) => map,
            other => {
                return Err(SyncError::Processing(format!(
                    "document data must be an object, got {other}"
                )))
            }
        };

        let mut tx = self.pool.begin().await?;
        Self::upsert(&mut tx, path, data).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn set_merge(&self, path: &DocumentPath, write: DocumentWrite) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let now = Self::server_now(&mut tx).await?;

        let mut data = Self::lock_document(&mut tx, path).await?.unwrap_or_default();
        merge_fields(&mut data, write.resolve(now));
        Self::upsert(&mut tx, path, data).await?;

        tx.commit().await?;
        debug!("Merged write into {}", path);
        Ok(())
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        let mut builder = build_select(query)?;
        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_document).collect()
    }

    async fn commit_batch(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let size = batch.len();
        let mut tx = self.pool.begin().await?;
        let now = Self::server_now(&mut tx).await?;

        for (path, write) in batch.into_updates() {
            // Dropping `tx` on the error path rolls the whole batch back
            let mut data = Self::lock_document(&mut tx, &path).await?.ok_or_else(|| {
                SyncError::Processing(format!("cannot update missing document '{path}'"))
            })?;
            apply_update(&mut data, write.resolve(now));
            Self::upsert(&mut tx, &path, data).await?;
        }

        tx.commit().await?;
        debug!("Committed batch of {} updates", size);
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
