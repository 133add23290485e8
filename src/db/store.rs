use async_trait::async_trait;
use sqlx::PgPool;

use crate::db::{listing_queries, queries};
use crate::models::listing::ListingRecord;
use crate::models::task::{ModerationTask, TaskStatus};

/// Durable moderation task records.
///
/// `complete_task` and `fail_task` only ever move a task out of `pending`;
/// calling them on a terminal task returns [`StoreError::AlreadyTerminal`]
/// and leaves the row untouched.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, item_id: i64) -> Result<i64, StoreError>;

    async fn get_task(&self, task_id: i64) -> Result<Option<ModerationTask>, StoreError>;

    async fn find_latest_pending(&self, item_id: i64) -> Result<Option<i64>, StoreError>;

    async fn complete_task(
        &self,
        task_id: i64,
        is_violation: bool,
        probability: f64,
    ) -> Result<(), StoreError>;

    async fn fail_task(&self, task_id: i64, error_message: &str) -> Result<(), StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Read-only access to listings.
#[async_trait]
pub trait ListingStore: Send + Sync {
    async fn get_listing(&self, item_id: i64) -> Result<Option<ListingRecord>, StoreError>;
}

/// PostgreSQL implementation of both stores over one shared pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskStore for PgStore {
    async fn create_task(&self, item_id: i64) -> Result<i64, StoreError> {
        queries::create_task(&self.pool, item_id).await
    }

    async fn get_task(&self, task_id: i64) -> Result<Option<ModerationTask>, StoreError> {
        queries::get_task(&self.pool, task_id).await
    }

    async fn find_latest_pending(&self, item_id: i64) -> Result<Option<i64>, StoreError> {
        queries::find_latest_pending(&self.pool, item_id).await
    }

    async fn complete_task(
        &self,
        task_id: i64,
        is_violation: bool,
        probability: f64,
    ) -> Result<(), StoreError> {
        queries::complete_task(&self.pool, task_id, is_violation, probability).await
    }

    async fn fail_task(&self, task_id: i64, error_message: &str) -> Result<(), StoreError> {
        queries::fail_task(&self.pool, task_id, error_message).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ListingStore for PgStore {
    async fn get_listing(&self, item_id: i64) -> Result<Option<ListingRecord>, StoreError> {
        Ok(listing_queries::get_listing(&self.pool, item_id).await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Task {0} not found")]
    TaskNotFound(i64),

    #[error("Task {task_id} is already {status}")]
    AlreadyTerminal { task_id: i64, status: TaskStatus },

    #[error("Probability {0} outside [0, 1]")]
    InvalidProbability(f64),

    #[error("Unknown task status in database: {0}")]
    InvalidStatus(String),

    /// Backend failure outside PostgreSQL, e.g. the in-memory test store.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}
