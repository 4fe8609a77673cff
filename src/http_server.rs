use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::info;
use warp::Filter;

use crate::core::EventProcessingPipeline;
use crate::monitoring::Metrics;

pub struct HttpServer {
    pipeline: Arc<EventProcessingPipeline>,
    port: u16,
}

impl HttpServer {
    pub fn new(pipeline: Arc<EventProcessingPipeline>, port: u16) -> Self {
        Self { pipeline, port }
    }

    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let pipeline = self.pipeline.clone();

        let health = warp::path("health")
            .and(warp::path::end())
            .and(warp::get())
            .and_then(move || {
                let pipeline = pipeline.clone();
                async move {
                    let health = pipeline.health().await;
                    let status = if health.healthy {
                        warp::http::StatusCode::OK
                    } else {
                        warp::http::StatusCode::SERVICE_UNAVAILABLE
                    };
                    Ok::<_, warp::Rejection>(warp::reply::with_status(
                        warp::reply::json(&health),
                        status,
                    ))
                }
            });

        let metrics = warp::path("metrics")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| {
                let body = Metrics::get_prometheus_metrics().unwrap_or_else(|e| {
                    tracing::error!("Failed to generate Prometheus metrics: {}", e);
                    "# Unable to generate metrics".to_string()
                });
                warp::reply::with_header(
                    body,
                    "content-type",
                    "text/plain; version=0.0.4; charset=utf-8",
                )
            });

        let metrics_pipeline = self.pipeline.clone();
        let json_metrics = warp::path!("metrics" / "json")
            .and(warp::get())
            .and_then(move || {
                let pipeline = metrics_pipeline.clone();
                async move {
                    let health = pipeline.health().await;
                    let snapshot = pipeline.metrics.get_snapshot().await;
                    let response = json!({
                        "events_processed": snapshot.total_events_processed,
                        "events_failed": snapshot.total_events_failed,
                        "batches_processed": snapshot.total_batches_processed,
                        "archive_runs": snapshot.total_archive_runs,
                        "shows_archived": snapshot.total_shows_archived,
                        "last_archive_time": snapshot.last_archive_time,
                        "next_archive_run": health.next_archive_run,
                        "redis_healthy": health.redis_consumer_healthy,
                        "store_healthy": health.store_healthy,
                        "circuit_breaker_state": health.metrics.circuit_breaker_state,
                        "uptime_seconds": snapshot.uptime_seconds,
                        "events_per_second": snapshot.events_per_second,
                        "last_check": health.last_check
                    });

                    Ok::<_, Infallible>(warp::reply::json(&response))
                }
            });

        let routes = health.or(json_metrics).or(metrics);

        info!("Starting HTTP server on port {}", self.port);
        warp::serve(routes).run(([0, 0, 0, 0], self.port)).await;

        Ok(())
    }
}
