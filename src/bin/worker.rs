use moderation_service::{
    config::AppConfig,
    db::{self, store::PgStore},
    services::{classifier, queue::RedisQueue, worker::ModerationWorker},
    shutdown,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting moderation worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    if let Some(addr) = &config.worker_metrics_addr {
        let addr: SocketAddr = addr.parse().expect("Invalid WORKER_METRICS_ADDR");
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .expect("Failed to install Prometheus exporter");
        metrics::describe_counter!("moderation_tasks_completed_total", "Tasks moved to completed");
        metrics::describe_counter!("moderation_tasks_failed_total", "Tasks moved to failed");
        metrics::describe_counter!("moderation_dead_letters_total", "Dead letters published");
        metrics::describe_histogram!(
            "moderation_processing_seconds",
            "Time to process one work item"
        );
        tracing::info!(%addr, "Worker metrics exporter listening");
    }

    // Unlike the API, the worker cannot do anything useful without a model.
    let model = classifier::load_or_init(&config.model_path).expect("Failed to load model");

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url, config.db_max_connections)
        .await
        .expect("Failed to connect to database");

    let queue = Arc::new(
        RedisQueue::new(&config.redis_url, config.queue_topics())
            .expect("Failed to initialize moderation queue"),
    );

    let consumer_name = config.consumer_name();
    let mut consumer = queue
        .consumer(&consumer_name)
        .await
        .expect("Failed to join consumer group")
        .with_claim_idle(config.claim_idle());

    let store = Arc::new(PgStore::new(db_pool.clone()));
    let worker = ModerationWorker::new(store.clone(), store, queue.clone(), Arc::new(model));

    let shutdown_token = CancellationToken::new();
    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown::signal().await;
        signal_token.cancel();
    });

    tracing::info!(
        consumer = %consumer_name,
        group = %queue.topics().consumer_group,
        stream = %queue.topics().work_stream,
        "Worker ready, consuming work items"
    );

    worker.run(&mut consumer, shutdown_token).await;

    db_pool.close().await;
    tracing::info!("Worker shut down");
}
