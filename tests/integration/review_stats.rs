use crate::helpers::test_harness::TEST_STREAM;
use crate::helpers::{DbAssertions, EventBuilder, ReviewSeeder, TestHarness};
use review_sync::core::types::{ParentCollection, WriteKind};
use review_sync::core::EventProcessingPipeline;
use review_sync::store::DocumentStore;
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
#[ignore] // Run with --ignored flag since it requires containers
async fn test_venue_stats_follow_review_writes() {
    let harness = TestHarness::new().await.unwrap();
    let store = harness.store();
    let venues = ReviewSeeder::new(ParentCollection::Venues, "v1");

    // Only the active, finite, positive ratings count: 3, 5 and 4
    let mut last_review = String::new();
    for (status, rating) in [
        ("active", json!(3)),
        ("active", json!(5)),
        ("active", json!(0)),
        ("active", json!(-1)),
        ("active", json!("bad")),
        ("active", json!("4")),
        ("hidden", json!(1)),
    ] {
        last_review = venues.review(store.as_ref(), status, rating).await.unwrap();
    }

    harness
        .publish_events(
            TEST_STREAM,
            vec![EventBuilder::new().review_written(ParentCollection::Venues, "v1", &last_review)],
        )
        .await
        .unwrap();

    let pipeline = Arc::new(
        EventProcessingPipeline::with_store(harness.config(), store.clone())
            .await
            .unwrap(),
    );
    let pipeline_handle = tokio::spawn({
        let pipeline = pipeline.clone();
        async move { pipeline.start().await }
    });

    TestHarness::wait_for_stats(store.as_ref(), "venues/v1", 3, 15)
        .await
        .unwrap();

    let pool = harness.get_pool().await.unwrap();
    DbAssertions::assert_stats(&pool, "venues", "v1", 4.0, 3)
        .await
        .unwrap();

    pipeline.stop().await.unwrap();
    pipeline_handle.await.unwrap().unwrap();
}

#[tokio::test]
#[ignore]
async fn test_show_stats_recomputed_after_review_deleted() {
    let harness = TestHarness::new().await.unwrap();
    let store = harness.store();
    let shows = ReviewSeeder::new(ParentCollection::Shows, "s1");

    let keep = shows.review(store.as_ref(), "active", json!(2)).await.unwrap();
    let gone = shows.review(store.as_ref(), "active", json!(5)).await.unwrap();

    let pipeline = Arc::new(
        EventProcessingPipeline::with_store(harness.config(), store.clone())
            .await
            .unwrap(),
    );
    let pipeline_handle = tokio::spawn({
        let pipeline = pipeline.clone();
        async move { pipeline.start().await }
    });

    harness
        .publish_events(
            TEST_STREAM,
            vec![EventBuilder::new().review_written(ParentCollection::Shows, "s1", &keep)],
        )
        .await
        .unwrap();
    let stats = TestHarness::wait_for_stats(store.as_ref(), "shows/s1", 2, 15)
        .await
        .unwrap();
    assert_eq!(stats, json!({ "avgRating": 3.5, "ratingCount": 2 }));

    // Delete one review, then notify
    let pool = harness.get_pool().await.unwrap();
    sqlx::query("DELETE FROM documents WHERE collection_path = 'shows/s1/reviews' AND doc_id = $1")
        .bind(&gone)
        .execute(&pool)
        .await
        .unwrap();
    harness
        .publish_events(
            TEST_STREAM,
            vec![EventBuilder::new()
                .with_change(WriteKind::Deleted)
                .review_written(ParentCollection::Shows, "s1", &gone)],
        )
        .await
        .unwrap();

    TestHarness::wait_for_stats(store.as_ref(), "shows/s1", 1, 15)
        .await
        .unwrap();
    DbAssertions::assert_stats(&pool, "shows", "s1", 2.0, 1)
        .await
        .unwrap();

    pipeline.stop().await.unwrap();
    pipeline_handle.await.unwrap().unwrap();
}

#[tokio::test]
#[ignore]
async fn test_random_ratings_average_matches() {
    let harness = TestHarness::new().await.unwrap();
    let store = harness.store();
    let venues = ReviewSeeder::new(ParentCollection::Venues, "v-random");

    let ratings = venues.random_active(store.as_ref(), 25).await.unwrap();
    let sum: u32 = ratings.iter().map(|r| *r as u32).sum();
    let expected = (sum as f64 / ratings.len() as f64 * 100.0).round() / 100.0;

    let stats = review_sync::sync::recalculate_review_stats(
        store.as_ref(),
        ParentCollection::Venues,
        "v-random",
    )
    .await
    .unwrap();
    assert_eq!(stats.rating_count, 25);
    assert_eq!(stats.avg_rating, expected);

    // Existing parent fields survive the merge
    let venue = review_sync::core::types::DocumentPath::parse("venues/v-random").unwrap();
    let doc = store.get(&venue).await.unwrap().unwrap();
    assert_eq!(doc.get("stats").unwrap()["ratingCount"], json!(25));
}
