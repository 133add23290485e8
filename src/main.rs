use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use moderation_service::{
    app_state::AppState,
    config::AppConfig,
    db::{self, store::PgStore},
    routes,
    shutdown,
    services::{classifier, queue::RedisQueue},
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing moderation API");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!(
        "moderation_submissions_total",
        "Moderation tasks accepted and published"
    );
    metrics::describe_counter!(
        "moderation_submission_failures_total",
        "Tasks created whose work item could not be published"
    );

    // A missing model keeps the API up; scoring endpoints answer 503.
    let model = match classifier::load_or_init(&config.model_path) {
        Ok(model) => Some(model),
        Err(e) => {
            tracing::error!(error = %e, path = %config.model_path, "Failed to load model");
            None
        }
    };

    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url, config.db_max_connections)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Connecting to Redis moderation streams");
    let queue = RedisQueue::new(&config.redis_url, config.queue_topics())
        .expect("Failed to initialize moderation queue");

    let state = AppState::new(PgStore::new(db_pool.clone()), queue, model);
    let app = routes::router(state, Some(prometheus_handle));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::signal())
        .await
        .expect("Server error");

    db_pool.close().await;
    tracing::info!("Server stopped");
}
