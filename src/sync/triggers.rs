use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, error, info};

use super::stats::recalculate_review_stats;
use crate::core::types::{DocumentPath, DocumentWriteEvent, ParentCollection};
use crate::error::{Result, SyncError};
use crate::monitoring::Metrics;
use crate::store::DocumentStore;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// Document path pattern such as `venues/{venueId}/reviews/{reviewId}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl DocumentPattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        let trimmed = pattern.trim_matches('/');
        let mut segments = Vec::new();

        for part in trimmed.split('/') {
            if part.is_empty() {
                return Err(SyncError::InvalidPath(format!(
                    "pattern '{pattern}' contains an empty segment"
                )));
            }
            let segment = match part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                Some("") => {
                    return Err(SyncError::InvalidPath(format!(
                        "pattern '{pattern}' has an unnamed parameter"
                    )))
                }
                Some(name) => Segment::Param(name.to_string()),
                None => Segment::Literal(part.to_string()),
            };
            segments.push(segment);
        }

        if segments.len() % 2 != 0 {
            return Err(SyncError::InvalidPath(format!(
                "pattern '{pattern}' does not address a document"
            )));
        }

        Ok(Self {
            raw: trimmed.to_string(),
            segments,
        })
    }

    /// Parameters captured from `path`, or `None` when it does not match.
    pub fn match_path(&self, path: &DocumentPath) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = path.segments().collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), part.to_string());
                }
            }
        }
        Some(params)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// What a trigger does once its pattern matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerAction {
    /// Recompute review stats on the parent named by `parent_param`.
    RecalculateStats {
        parent: ParentCollection,
        parent_param: String,
        review_param: String,
    },
}

#[derive(Debug, Clone)]
pub struct DocumentTrigger {
    pub name: String,
    pub pattern: DocumentPattern,
    pub action: TriggerAction,
}

impl DocumentTrigger {
    pub fn review_stats(name: &str, parent: ParentCollection, parent_param: &str) -> Result<Self> {
        let pattern =
            DocumentPattern::parse(&format!("{parent}/{{{parent_param}}}/reviews/{{reviewId}}"))?;
        Ok(Self {
            name: name.to_string(),
            pattern,
            action: TriggerAction::RecalculateStats {
                parent,
                parent_param: parent_param.to_string(),
                review_param: "reviewId".to_string(),
            },
        })
    }

    async fn run(
        &self,
        store: &dyn DocumentStore,
        params: &HashMap<String, String>,
    ) -> Result<()> {
        match &self.action {
            TriggerAction::RecalculateStats {
                parent,
                parent_param,
                review_param,
            } => {
                let parent_id = params.get(parent_param).ok_or_else(|| {
                    SyncError::Processing(format!(
                        "trigger '{}' is missing parameter '{parent_param}'",
                        self.name
                    ))
                })?;
                let review_id = params.get(review_param).map(String::as_str).unwrap_or("");

                let stats = recalculate_review_stats(store, *parent, parent_id).await?;

                match parent {
                    ParentCollection::Venues => info!(
                        venue_id = %parent_id,
                        review_id = %review_id,
                        rating_count = stats.rating_count,
                        avg_rating = stats.avg_rating,
                        "{} completed",
                        self.name
                    ),
                    ParentCollection::Shows => info!(
                        show_id = %parent_id,
                        review_id = %review_id,
                        rating_count = stats.rating_count,
                        avg_rating = stats.avg_rating,
                        "{} completed",
                        self.name
                    ),
                }
                Ok(())
            }
        }
    }
}

/// Named document triggers, checked in registration order.
#[derive(Debug, Clone)]
pub struct TriggerRegistry {
    triggers: Vec<DocumentTrigger>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self {
            triggers: Vec::new(),
        }
    }

    /// The review-stats triggers for venues and shows.
    pub fn with_review_triggers() -> Result<Self> {
        let mut registry = Self::new();
        registry.register(DocumentTrigger::review_stats(
            "syncVenueReviewStats",
            ParentCollection::Venues,
            "venueId",
        )?);
        registry.register(DocumentTrigger::review_stats(
            "syncShowReviewStats",
            ParentCollection::Shows,
            "showId",
        )?);
        Ok(registry)
    }

    pub fn register(&mut self, trigger: DocumentTrigger) {
        debug!(
            "Registered trigger '{}' on {}",
            trigger.name,
            trigger.pattern.as_str()
        );
        self.triggers.push(trigger);
    }

    pub fn triggers(&self) -> &[DocumentTrigger] {
        &self.triggers
    }

    /// Run every trigger whose pattern matches the written document.
    ///
    /// Returns the names of the triggers that ran. A write nothing listens to
    /// is not an error.
    pub async fn dispatch(
        &self,
        store: &dyn DocumentStore,
        metrics: &Metrics,
        event: &DocumentWriteEvent,
    ) -> Result<Vec<String>> {
        let mut fired = Vec::new();

        for trigger in &self.triggers {
            let Some(params) = trigger.pattern.match_path(&event.document) else {
                continue;
            };

            let start = Instant::now();
            let result = trigger.run(store, &params).await;
            metrics.record_trigger_duration(&trigger.name, start.elapsed());

            match result {
                Ok(()) => {
                    metrics.record_trigger_success(&trigger.name);
                    fired.push(trigger.name.clone());
                }
                Err(e) => {
                    error!(
                        "Trigger '{}' failed for {}: {}",
                        trigger.name, event.document, e
                    );
                    metrics.record_trigger_failure(&trigger.name);
                    return Err(e);
                }
            }
        }

        if fired.is_empty() {
            debug!("No trigger registered for {}", event.document);
        }
        Ok(fired)
    }
}

impl Default for TriggerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
