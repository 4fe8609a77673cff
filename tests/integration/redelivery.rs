use crate::helpers::test_harness::{TEST_GROUP, TEST_STREAM};
use crate::helpers::{EventBuilder, ReviewSeeder, TestHarness};
use review_sync::config::Config;
use review_sync::core::types::ParentCollection;
use review_sync::core::EventProcessingPipeline;
use review_sync::store::InMemoryStore;
use serde_json::json;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

// Retries must not trip the breaker while the store is down
fn config(harness: &TestHarness) -> Config {
    Config {
        circuit_breaker_threshold: 100,
        ..harness.config()
    }
}

#[tokio::test]
#[ignore] // Run with --ignored flag since it requires containers
async fn test_failed_recalculation_is_redelivered() {
    let harness = TestHarness::new().await.unwrap();
    let store = InMemoryStore::new();
    let venues = ReviewSeeder::new(ParentCollection::Venues, "v1");
    let review = venues.review(&store, "active", json!(5)).await.unwrap();

    // Writes fail until the store recovers
    store.set_fail_writes(true);

    let pipeline = Arc::new(
        EventProcessingPipeline::with_store(config(&harness), Arc::new(store.clone()))
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
            vec![EventBuilder::new().review_written(ParentCollection::Venues, "v1", &review)],
        )
        .await
        .unwrap();

    sleep(Duration::from_secs(2)).await;
    assert_eq!(harness.pending_count(TEST_STREAM, TEST_GROUP).await.unwrap(), 1);

    store.set_fail_writes(false);
    let stats = TestHarness::wait_for_stats(&store, "venues/v1", 1, 20)
        .await
        .unwrap();
    assert_eq!(stats, json!({ "avgRating": 5.0, "ratingCount": 1 }));

    sleep(Duration::from_millis(500)).await;
    assert_eq!(harness.pending_count(TEST_STREAM, TEST_GROUP).await.unwrap(), 0);

    pipeline.stop().await.unwrap();
    pipeline_handle.await.unwrap().unwrap();
}

#[tokio::test]
#[ignore]
async fn test_malformed_messages_are_dropped() {
    let harness = TestHarness::new().await.unwrap();
    let store = InMemoryStore::new();
    let venues = ReviewSeeder::new(ParentCollection::Venues, "v2");
    let review = venues.review(&store, "active", json!(3)).await.unwrap();

    harness
        .publish_raw(TEST_STREAM, "data", "{not json")
        .await
        .unwrap();
    harness
        .publish_raw(TEST_STREAM, "unrelated", "{}")
        .await
        .unwrap();
    harness
        .publish_events(
            TEST_STREAM,
            vec![EventBuilder::new().review_written(ParentCollection::Venues, "v2", &review)],
        )
        .await
        .unwrap();

    let pipeline = Arc::new(
        EventProcessingPipeline::with_store(config(&harness), Arc::new(store.clone()))
            .await
            .unwrap(),
    );
    let pipeline_handle = tokio::spawn({
        let pipeline = pipeline.clone();
        async move { pipeline.start().await }
    });

    TestHarness::wait_for_stats(&store, "venues/v2", 1, 15)
        .await
        .unwrap();
    sleep(Duration::from_millis(500)).await;
    assert_eq!(harness.pending_count(TEST_STREAM, TEST_GROUP).await.unwrap(), 0);

    pipeline.stop().await.unwrap();
    pipeline_handle.await.unwrap().unwrap();
}
