use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::circuit_breaker::CircuitBreaker;
use super::types::{PipelineHealth, PipelineMetrics, StreamMessage};
use crate::config::{Config, StoreBackend};
use crate::consumer::RedisStreamConsumer;
use crate::error::{Result, SyncError};
use crate::monitoring::Metrics;
use crate::scheduler::ArchiveScheduler;
use crate::store::{DocumentStore, InMemoryStore, PgDocumentStore};
use crate::sync::TriggerRegistry;

const HEALTH_CHECK_INTERVAL_SECS: u64 = 60;

pub struct EventProcessingPipeline {
    config: Config,
    store: Arc<dyn DocumentStore>,
    redis_consumer: Arc<RedisStreamConsumer>,
    triggers: Arc<TriggerRegistry>,
    circuit_breaker: Arc<CircuitBreaker>,
    scheduler: Arc<ArchiveScheduler>,
    pub metrics: Arc<Metrics>,
    is_running: Arc<AtomicBool>,
    shutdown_sender: broadcast::Sender<()>,
    cancellation_token: CancellationToken,
}

impl EventProcessingPipeline {
    pub async fn new(config: Config) -> Result<Self> {
        let store: Arc<dyn DocumentStore> = match config.store_backend {
            StoreBackend::Postgres => Arc::new(
                PgDocumentStore::new(&config.database_url, config.database_pool_size).await?,
            ),
            StoreBackend::Memory => {
                warn!("Using the in-memory document store; data is lost on restart");
                Arc::new(InMemoryStore::new())
            }
        };

        Self::with_store(config, store).await
    }

    /// Build the pipeline around an already-connected store.
    pub async fn with_store(config: Config, store: Arc<dyn DocumentStore>) -> Result<Self> {
        info!("Initializing event processing pipeline");

        let redis_consumer = Arc::new(
            RedisStreamConsumer::new(
                &config.redis_url,
                &config.stream_names,
                &config.consumer_group,
                &config.consumer_name,
                config.claim_idle_ms,
            )
            .await?,
        );

        let triggers = Arc::new(TriggerRegistry::with_review_triggers()?);

        let circuit_breaker = Arc::new(CircuitBreaker::new(
            config.circuit_breaker_threshold,
            config.circuit_breaker_timeout_ms,
        ));

        let metrics = Arc::new(Metrics::new());

        let scheduler = Arc::new(ArchiveScheduler::new(
            config.schedule()?,
            config.archive_retry_count,
            config.archive_page_size,
            store.clone(),
            metrics.clone(),
        ));

        let (shutdown_sender, _) = broadcast::channel(1);
        let cancellation_token = CancellationToken::new();

        Ok(Self {
            config,
            store,
            redis_consumer,
            triggers,
            circuit_breaker,
            scheduler,
            metrics,
            is_running: Arc::new(AtomicBool::new(false)),
            shutdown_sender,
            cancellation_token,
        })
    }

    pub fn store(&self) -> Arc<dyn DocumentStore> {
        self.store.clone()
    }

    pub fn scheduler(&self) -> Arc<ArchiveScheduler> {
        self.scheduler.clone()
    }

    pub fn get_cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub async fn start(&self) -> Result<()> {
        if self
            .is_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SyncError::Processing(
                "Pipeline is already running".to_string(),
            ));
        }

        info!("Starting event processing pipeline");

        self.metrics.set_redis_health(true).await;
        self.metrics.set_store_health(true).await;

        let mut tasks = self.spawn_processing_tasks();
        tasks.push(self.spawn_scheduler_task());
        tasks.push(self.spawn_monitoring_task());

        let mut shutdown_rx = self.shutdown_sender.subscribe();
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received");
            }
            _ = self.cancellation_token.cancelled() => {
                info!("Cancellation token triggered");
            }
        }

        // Workers finish their current batch before exiting; unacked messages
        // stay pending and are reclaimed by the next consumer.
        self.cancellation_token.cancel();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Pipeline task ended abnormally: {}", e);
            }
        }

        self.is_running.store(false, Ordering::SeqCst);
        info!("Pipeline stopped");
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        info!("Stopping event processing pipeline");
        self.cancellation_token.cancel();
        let _ = self.shutdown_sender.send(());
        Ok(())
    }

    pub async fn health(&self) -> PipelineHealth {
        let snapshot = self.metrics.get_snapshot().await;
        let breaker_closed = !self.circuit_breaker.is_open();

        PipelineHealth {
            healthy: snapshot.redis_healthy && snapshot.store_healthy && breaker_closed,
            redis_consumer_healthy: snapshot.redis_healthy,
            store_healthy: snapshot.store_healthy,
            circuit_breaker_closed: breaker_closed,
            last_check: chrono::Utc::now(),
            next_archive_run: self.scheduler.next_run().await,
            metrics: PipelineMetrics {
                total_events_processed: snapshot.total_events_processed,
                total_events_failed: snapshot.total_events_failed,
                total_archive_runs: snapshot.total_archive_runs,
                circuit_breaker_state: self.circuit_breaker.get_state(),
                redis_consumer_health: snapshot.redis_healthy,
                store_health: snapshot.store_healthy,
            },
        }
    }

    fn spawn_processing_tasks(&self) -> Vec<tokio::task::JoinHandle<()>> {
        (0..self.config.workers)
            .map(|worker_id| self.spawn_worker(worker_id))
            .collect()
    }

    fn spawn_worker(&self, worker_id: usize) -> tokio::task::JoinHandle<()> {
        let redis_consumer = self.redis_consumer.clone();
        let store = self.store.clone();
        let triggers = self.triggers.clone();
        let circuit_breaker = self.circuit_breaker.clone();
        let metrics = self.metrics.clone();
        let batch_size = self.config.batch_size;
        let batch_timeout_ms = self.config.batch_timeout_ms;
        let cancellation_token = self.cancellation_token.clone();

        tokio::spawn(async move {
            info!("Worker {} started", worker_id);
            let mut batch_interval = interval(Duration::from_millis(batch_timeout_ms));

            loop {
                tokio::select! {
                    _ = batch_interval.tick() => {
                        let result = Self::process_batch(
                            &redis_consumer,
                            store.as_ref(),
                            &triggers,
                            &circuit_breaker,
                            &metrics,
                            batch_size,
                        )
                        .await;

                        match result {
                            Ok(()) => {}
                            Err(SyncError::CircuitBreakerOpen) => {
                                debug!("Worker {} paused, circuit breaker open", worker_id);
                            }
                            Err(e @ SyncError::Redis(_)) => {
                                error!("Worker {} stream error: {}", worker_id, e);
                                circuit_breaker.record_failure().await;
                                metrics.set_redis_health(false).await;
                            }
                            Err(e) => {
                                error!("Worker {} batch processing error: {}", worker_id, e);
                                circuit_breaker.record_failure().await;
                            }
                        }
                    }
                    _ = cancellation_token.cancelled() => {
                        info!("Worker {} stopping", worker_id);
                        break;
                    }
                }
            }
        })
    }

    async fn process_batch(
        redis_consumer: &RedisStreamConsumer,
        store: &dyn DocumentStore,
        triggers: &TriggerRegistry,
        circuit_breaker: &CircuitBreaker,
        metrics: &Metrics,
        batch_size: usize,
    ) -> Result<()> {
        circuit_breaker.check().await?;

        let batch = redis_consumer.consume_batch(batch_size).await?;
        metrics.set_redis_health(true).await;

        if batch.claimed_count > 0 {
            info!("Reclaimed {} pending messages for retry", batch.claimed_count);
            metrics.record_messages_claimed(batch.claimed_count);
        }
        if batch.messages.is_empty() {
            return Ok(());
        }

        debug!("Processing batch of {} messages", batch.messages.len());
        for message in &batch.messages {
            metrics.record_messages_consumed(&message.source_stream, 1);
        }

        let mut successful = 0u64;
        let mut failed = 0u64;

        for message in &batch.messages {
            match Self::handle_message(store, triggers, metrics, message).await {
                Ok(()) => {
                    if let Err(e) = redis_consumer
                        .ack_message(&message.source_stream, &message.id)
                        .await
                    {
                        warn!(
                            "Failed to acknowledge message {} from stream {}: {}",
                            message.id, message.source_stream, e
                        );
                    } else {
                        metrics.record_message_acked(&message.source_stream);
                    }
                    successful += 1;
                }
                Err(e) => {
                    // Left pending; reclaimed once idle for the claim window.
                    error!(
                        "Failed to handle write to {} (message {}): {}",
                        message.event.document, message.id, e
                    );
                    failed += 1;
                }
            }
        }

        if successful > 0 {
            metrics.record_event_success(successful);
            circuit_breaker.record_success().await;
            metrics.set_store_health(true).await;
        }

        if failed > 0 {
            metrics.record_event_failure(failed);
            circuit_breaker.record_failure().await;
            metrics.set_store_health(false).await;
        }

        metrics.record_batch();
        metrics.update_last_event_time().await;

        Ok(())
    }

    async fn handle_message(
        store: &dyn DocumentStore,
        triggers: &TriggerRegistry,
        metrics: &Metrics,
        message: &StreamMessage,
    ) -> Result<()> {
        debug!(
            "Write {:?} on {} from stream {}",
            message.event.change, message.event.document, message.source_stream
        );
        triggers.dispatch(store, metrics, &message.event).await?;
        Ok(())
    }

    fn spawn_scheduler_task(&self) -> tokio::task::JoinHandle<()> {
        let scheduler = self.scheduler.clone();
        let cancellation_token = self.cancellation_token.clone();

        tokio::spawn(async move {
            scheduler.run(cancellation_token).await;
        })
    }

    fn spawn_monitoring_task(&self) -> tokio::task::JoinHandle<()> {
        let metrics = self.metrics.clone();
        let store = self.store.clone();
        let redis_consumer = self.redis_consumer.clone();
        let cancellation_token = self.cancellation_token.clone();

        tokio::spawn(async move {
            let mut interval = interval(Duration::from_secs(HEALTH_CHECK_INTERVAL_SECS));

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match store.health_check().await {
                            Ok(()) => metrics.set_store_health(true).await,
                            Err(e) => {
                                warn!("Document store health check failed: {}", e);
                                metrics.set_store_health(false).await;
                            }
                        }
                        match redis_consumer.ping().await {
                            Ok(()) => metrics.set_redis_health(true).await,
                            Err(e) => {
                                warn!("Redis health check failed: {}", e);
                                metrics.set_redis_health(false).await;
                            }
                        }

                        let snapshot = metrics.get_snapshot().await;
                        info!(
                            "Metrics - Events processed: {}, failed: {}, batches: {}, archive runs: {}, shows archived: {}, rate: {:.2}/s",
                            snapshot.total_events_processed,
                            snapshot.total_events_failed,
                            snapshot.total_batches_processed,
                            snapshot.total_archive_runs,
                            snapshot.total_shows_archived,
                            snapshot.events_per_second
                        );
                    }
                    _ = cancellation_token.cancelled() => {
                        break;
                    }
                }
            }
        })
    }
}
