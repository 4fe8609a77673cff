use crate::helpers::{DbAssertions, ShowSeeder, TestHarness};
use chrono::{Duration, Utc};
use review_sync::monitoring::Metrics;
use review_sync::scheduler::{ArchiveScheduler, ArchiveSchedule};
use review_sync::sync::archive_past_shows;
use std::sync::Arc;
use tokio::time::{timeout, Duration as TokioDuration};

const SWEEP_TIMEOUT: TokioDuration = TokioDuration::from_secs(60);

#[tokio::test]
#[ignore] // Run with --ignored flag since it requires containers
async fn test_sweep_archives_across_pages() {
    let harness = TestHarness::new().await.unwrap();
    let store = harness.store();

    ShowSeeder::past_shows(store.as_ref(), "past", 801).await.unwrap();
    ShowSeeder::show(store.as_ref(), "future", Utc::now() + Duration::days(3), false)
        .await
        .unwrap();

    let summary = archive_past_shows(store.as_ref(), Utc::now(), 400)
        .await
        .unwrap();
    assert_eq!(summary.scanned, 801);
    assert_eq!(summary.archived, 801);
    assert_eq!(summary.pages, 3);

    let pool = harness.get_pool().await.unwrap();
    assert_eq!(DbAssertions::archived_show_count(&pool).await.unwrap(), 801);

    let future = DbAssertions::document(&pool, "shows", "future").await.unwrap();
    assert!(future.data.get("isArchived").is_none());
    let past = DbAssertions::document(&pool, "shows", "past-00000").await.unwrap();
    assert!(past.data.get("updatedAt").is_some());

    // Second run scans the same shows and writes nothing
    let rerun = archive_past_shows(store.as_ref(), Utc::now(), 400)
        .await
        .unwrap();
    assert_eq!(rerun.scanned, 801);
    assert_eq!(rerun.archived, 0);
}

#[tokio::test]
#[ignore]
async fn test_already_archived_shows_are_skipped() {
    let harness = TestHarness::new().await.unwrap();
    let store = harness.store();
    let now = Utc::now();

    ShowSeeder::show(store.as_ref(), "a", now - Duration::days(2), true)
        .await
        .unwrap();
    ShowSeeder::show(store.as_ref(), "b", now - Duration::days(1), false)
        .await
        .unwrap();

    let summary = archive_past_shows(store.as_ref(), now, 400).await.unwrap();
    assert_eq!(summary.scanned, 2);
    assert_eq!(summary.archived, 1);
}

#[tokio::test]
#[ignore]
async fn test_scheduler_run_once_against_postgres() {
    let harness = TestHarness::new().await.unwrap();
    let store = harness.store();
    ShowSeeder::past_shows(store.as_ref(), "old", 5).await.unwrap();

    let metrics = Arc::new(Metrics::new());
    let scheduler = ArchiveScheduler::new(
        ArchiveSchedule::daily(3, 30).unwrap(),
        3,
        400,
        store.clone(),
        metrics.clone(),
    );

    let summary = scheduler.run_once().await.unwrap();
    assert_eq!(summary.archived, 5);

    let snapshot = metrics.get_snapshot().await;
    assert!(snapshot.total_archive_runs >= 1);
    assert!(snapshot.last_archive_time.is_some());
}

#[tokio::test]
#[ignore]
async fn test_page_boundaries_with_shared_dates() {
    let harness = TestHarness::new().await.unwrap();
    let store = harness.store();
    let pool = harness.get_pool().await.unwrap();

    for n in [0usize, 1, 399, 400, 401] {
        harness.clear_documents().await.unwrap();
        // Runs of three shows share a date, so pages split inside tie groups
        ShowSeeder::past_shows_grouped(store.as_ref(), "show", n, 3)
            .await
            .unwrap();

        let summary = timeout(SWEEP_TIMEOUT, archive_past_shows(store.as_ref(), Utc::now(), 400))
            .await
            .unwrap_or_else(|_| panic!("sweep did not finish for n={n}"))
            .unwrap();

        assert_eq!(summary.scanned, n as u64, "n={n}");
        assert_eq!(summary.archived, n as u64, "n={n}");
        assert_eq!(summary.pages, n.div_ceil(400) as u64, "n={n}");
        assert_eq!(
            DbAssertions::archived_show_count(&pool).await.unwrap(),
            n as i64,
            "n={n}"
        );
    }
}

#[tokio::test]
#[ignore]
async fn test_one_date_across_many_small_pages() {
    let harness = TestHarness::new().await.unwrap();
    let store = harness.store();

    ShowSeeder::past_shows_grouped(store.as_ref(), "tie", 10, 10)
        .await
        .unwrap();

    let summary = timeout(SWEEP_TIMEOUT, archive_past_shows(store.as_ref(), Utc::now(), 3))
        .await
        .expect("sweep must terminate")
        .unwrap();
    assert_eq!(summary.scanned, 10);
    assert_eq!(summary.archived, 10);
    assert_eq!(summary.pages, 4);
}

#[tokio::test]
#[ignore]
async fn test_malformed_dates_are_left_out_of_the_sweep() {
    let harness = TestHarness::new().await.unwrap();
    let store = harness.store();

    for (id, date) in [
        ("naive-1", "2020-01-01T00:00:00"),
        ("naive-2", "2020-01-02T00:00:00"),
        ("naive-3", "2020-01-03T00:00:00"),
        ("month-13", "2025-13-01T00:00:00Z"),
        ("feb-30", "2024-02-30T00:00:00Z"),
        ("garbage", "2025-01-01Tlater"),
    ] {
        ShowSeeder::raw_date(store.as_ref(), id, date).await.unwrap();
    }
    ShowSeeder::past_shows(store.as_ref(), "valid", 3).await.unwrap();

    let summary = timeout(SWEEP_TIMEOUT, archive_past_shows(store.as_ref(), Utc::now(), 2))
        .await
        .expect("sweep must terminate")
        .unwrap();
    assert_eq!(summary.scanned, 3);
    assert_eq!(summary.archived, 3);

    let pool = harness.get_pool().await.unwrap();
    for id in ["naive-1", "month-13", "garbage"] {
        let row = DbAssertions::document(&pool, "shows", id).await.unwrap();
        assert!(row.data.get("isArchived").is_none(), "{id} should be untouched");
    }
}
