use anyhow::Result;
use serde_json::Value;
use sqlx::PgPool;

#[derive(Debug, sqlx::FromRow)]
pub struct DocumentRow {
    pub collection_path: String,
    pub doc_id: String,
    pub data: Value,
}

pub struct DbAssertions;

impl DbAssertions {
    /// Fetches a stored document row
    pub async fn document(pool: &PgPool, collection_path: &str, doc_id: &str) -> Result<DocumentRow> {
        sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT collection_path, doc_id, data
            FROM documents
            WHERE collection_path = $1 AND doc_id = $2
            "#,
        )
        .bind(collection_path)
        .bind(doc_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Document not found: {}/{}", collection_path, doc_id))
    }

    /// Asserts the stats block on a venue or show, plus a server-set updatedAt
    pub async fn assert_stats(
        pool: &PgPool,
        collection_path: &str,
        doc_id: &str,
        avg_rating: f64,
        rating_count: u64,
    ) -> Result<DocumentRow> {
        let row = Self::document(pool, collection_path, doc_id).await?;

        let stats = row
            .data
            .get("stats")
            .ok_or_else(|| anyhow::anyhow!("No stats on {}/{}", collection_path, doc_id))?;
        assert_eq!(
            stats.get("avgRating").and_then(Value::as_f64),
            Some(avg_rating),
            "avgRating mismatch for {}/{}",
            collection_path,
            doc_id
        );
        assert_eq!(
            stats.get("ratingCount").and_then(Value::as_u64),
            Some(rating_count),
            "ratingCount mismatch for {}/{}",
            collection_path,
            doc_id
        );
        assert!(
            row.data.get("updatedAt").and_then(Value::as_str).is_some(),
            "updatedAt missing on {}/{}",
            collection_path,
            doc_id
        );

        Ok(row)
    }

    /// Counts shows with `isArchived = true`
    pub async fn archived_show_count(pool: &PgPool) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM documents
            WHERE collection_path = 'shows' AND data -> 'isArchived' = 'true'::jsonb
            "#,
        )
        .fetch_one(pool)
        .await?;
        Ok(count)
    }
}
