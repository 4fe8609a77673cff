use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use fake::faker::company::en::CompanyName;
use fake::faker::lorem::en::Sentence;
use fake::Fake;
use review_sync::core::types::{DocumentPath, DocumentWriteEvent, ParentCollection, WriteKind};
use review_sync::store::{format_timestamp, DocumentStore};
use serde_json::{json, Value};

fn random_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[derive(Clone)]
pub struct EventBuilder {
    change: WriteKind,
    timestamp: Option<DateTime<Utc>>,
}

impl EventBuilder {
    pub fn new() -> Self {
        Self {
            change: WriteKind::Created,
            timestamp: Some(Utc::now()),
        }
    }

    pub fn with_change(mut self, change: WriteKind) -> Self {
        self.change = change;
        self
    }

    /// Notification for a write to `{parent}/{parent_id}/reviews/{review_id}`
    pub fn review_written(
        &self,
        parent: ParentCollection,
        parent_id: &str,
        review_id: &str,
    ) -> DocumentWriteEvent {
        self.document_written(&format!("{parent}/{parent_id}/reviews/{review_id}"))
    }

    pub fn document_written(&self, path: &str) -> DocumentWriteEvent {
        DocumentWriteEvent {
            document: DocumentPath::parse(path).unwrap(),
            change: self.change,
            timestamp: self.timestamp,
        }
    }
}

/// Writes review documents under a venue or show.
pub struct ReviewSeeder {
    parent: ParentCollection,
    parent_id: String,
}

impl ReviewSeeder {
    pub fn new(parent: ParentCollection, parent_id: &str) -> Self {
        Self {
            parent,
            parent_id: parent_id.to_string(),
        }
    }

    pub fn parent_path(&self) -> String {
        format!("{}/{}", self.parent, self.parent_id)
    }

    /// Seeds one review and returns its id.
    pub async fn review(&self, store: &dyn DocumentStore, status: &str, rating: Value) -> Result<String> {
        let review_id = random_id();
        let path = DocumentPath::parse(&format!(
            "{}/reviews/{}",
            self.parent_path(),
            review_id
        ))?;
        let body: String = Sentence(3..12).fake();
        store
            .set(
                &path,
                json!({ "status": status, "rating": rating, "body": body }),
            )
            .await?;
        Ok(review_id)
    }

    /// Seeds `count` active reviews with random 1..=5 ratings; returns the ratings.
    pub async fn random_active(&self, store: &dyn DocumentStore, count: usize) -> Result<Vec<u8>> {
        let mut ratings = Vec::with_capacity(count);
        for _ in 0..count {
            let rating: u8 = (1..=5u8).fake();
            self.review(store, "active", json!(rating)).await?;
            ratings.push(rating);
        }
        Ok(ratings)
    }
}

/// Writes show documents with dates relative to now.
pub struct ShowSeeder;

impl ShowSeeder {
    pub async fn show(
        store: &dyn DocumentStore,
        id: &str,
        date: DateTime<Utc>,
        archived: bool,
    ) -> Result<()> {
        let title: String = CompanyName().fake();
        let mut data = json!({ "title": title, "date": format_timestamp(date) });
        if archived {
            data["isArchived"] = json!(true);
        }
        store.set(&DocumentPath::parse(&format!("shows/{id}"))?, data).await?;
        Ok(())
    }

    /// Seeds a show whose `date` is stored verbatim.
    pub async fn raw_date(store: &dyn DocumentStore, id: &str, date: &str) -> Result<()> {
        store
            .set(
                &DocumentPath::parse(&format!("shows/{id}"))?,
                json!({ "title": id, "date": date }),
            )
            .await?;
        Ok(())
    }

    /// Seeds `count` shows spread over the past `count` hours.
    pub async fn past_shows(store: &dyn DocumentStore, prefix: &str, count: usize) -> Result<()> {
        Self::past_shows_grouped(store, prefix, count, 1).await
    }

    /// Seeds `count` past shows where each run of `group` shows shares one date.
    pub async fn past_shows_grouped(
        store: &dyn DocumentStore,
        prefix: &str,
        count: usize,
        group: usize,
    ) -> Result<()> {
        let now = Utc::now();
        for i in 0..count {
            Self::show(
                store,
                &format!("{prefix}-{i:05}"),
                now - Duration::hours((i / group.max(1)) as i64 + 1),
                false,
            )
            .await?;
        }
        Ok(())
    }
}
