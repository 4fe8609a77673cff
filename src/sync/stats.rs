use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::core::types::{DocumentPath, ParentCollection};
use crate::error::Result;
use crate::store::{DocumentStore, DocumentWrite, Query};

pub const REVIEWS_COLLECTION: &str = "reviews";
pub const ACTIVE_STATUS: &str = "active";

/// Aggregate rating stats stored on a venue or show under `stats`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewStats {
    pub avg_rating: f64,
    pub rating_count: u64,
}

/// Interpret a stored rating the way a loose numeric conversion would.
///
/// Numbers pass through, strings go through [`parse_numeric_str`], booleans
/// count as 1/0 and null as 0. An empty array is 0 and a single-element array
/// converts its element; other arrays and objects have no numeric value.
pub fn coerce_rating(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_numeric_str(s),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Null => Some(0.0),
        Value::Array(items) => match items.as_slice() {
            [] => Some(0.0),
            // A lone element converts through its string form: "true" and
            // "[object Object]" are not numbers.
            [Value::Bool(_)] | [Value::Object(_)] => None,
            [item] => coerce_rating(item),
            _ => None,
        },
        Value::Object(_) => None,
    }
}

/// Numeric value of a string: surrounding whitespace is ignored, an empty
/// string is 0, `Infinity` may be signed, and unsigned `0x`/`0o`/`0b`
/// prefixes select hex, octal and binary integers.
pub fn parse_numeric_str(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Some(0.0);
    }

    match trimmed {
        "Infinity" | "+Infinity" => return Some(f64::INFINITY),
        "-Infinity" => return Some(f64::NEG_INFINITY),
        _ => {}
    }

    let radix = match trimmed.get(..2) {
        Some("0x") | Some("0X") => Some(16),
        Some("0o") | Some("0O") => Some(8),
        Some("0b") | Some("0B") => Some(2),
        _ => None,
    };
    if let Some(radix) = radix {
        let digits = &trimmed[2..];
        if digits.is_empty() {
            return None;
        }
        return digits.chars().try_fold(0.0f64, |acc, c| {
            c.to_digit(radix).map(|d| acc * radix as f64 + d as f64)
        });
    }

    // Decimal literals only: no "inf"/"nan" spellings and no digit separators
    if trimmed
        .chars()
        .any(|c| !(c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-')))
    {
        return None;
    }
    trimmed.parse::<f64>().ok()
}

/// Round to two decimals from the exact value of `value`, with ties going
/// away from zero. 1.075 is stored as 1.07499999... and rounds to 1.07.
pub fn round_to_cents(value: f64) -> f64 {
    Decimal::from_f64_retain(value)
        .map(|exact| exact.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|rounded| rounded.to_string().parse::<f64>().ok())
        .unwrap_or(value)
}

/// Count and average of the valid ratings: finite and strictly positive.
pub fn compute_stats<'a, I>(ratings: I) -> ReviewStats
where
    I: IntoIterator<Item = Option<&'a Value>>,
{
    let mut rating_count = 0u64;
    let mut rating_sum = 0.0f64;

    for rating in ratings.into_iter().flatten().filter_map(coerce_rating) {
        if !rating.is_finite() || rating <= 0.0 {
            continue;
        }
        rating_count += 1;
        rating_sum += rating;
    }

    let avg_rating = if rating_count > 0 {
        round_to_cents(rating_sum / rating_count as f64)
    } else {
        0.0
    };

    ReviewStats {
        avg_rating,
        rating_count,
    }
}

/// Recompute `stats` for one venue or show from its active reviews and merge
/// the result back onto the parent document.
pub async fn recalculate_review_stats(
    store: &dyn DocumentStore,
    parent: ParentCollection,
    parent_id: &str,
) -> Result<ReviewStats> {
    let parent_path: DocumentPath = parent.path().doc(parent_id)?;

    let query = Query::collection(parent_path.collection(REVIEWS_COLLECTION)?)
        .where_eq("status", ACTIVE_STATUS)?;
    let reviews = store.query(&query).await?;

    let stats = compute_stats(reviews.iter().map(|doc| doc.get("rating")));

    debug!(
        "Recalculated stats for {}: {} active reviews, {} rated, avg {:.2}",
        parent_path,
        reviews.len(),
        stats.rating_count,
        stats.avg_rating
    );

    let write = DocumentWrite::new()
        .set("stats", stats)?
        .server_timestamp("updatedAt");
    store.set_merge(&parent_path, write).await?;

    Ok(stats)
}
