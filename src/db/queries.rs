use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::str::FromStr;

use crate::db::store::StoreError;
use crate::models::task::{ModerationTask, TaskStatus};

/// Raw `moderation_results` row before the status column is decoded.
#[derive(sqlx::FromRow)]
struct TaskRow {
    id: i64,
    item_id: i64,
    status: String,
    is_violation: Option<bool>,
    probability: Option<f64>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<TaskRow> for ModerationTask {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let status = TaskStatus::from_str(&row.status)
            .map_err(|_| StoreError::InvalidStatus(row.status.clone()))?;

        Ok(ModerationTask {
            id: row.id,
            item_id: row.item_id,
            status,
            is_violation: row.is_violation,
            probability: row.probability,
            error_message: row.error_message,
            created_at: row.created_at,
            processed_at: row.processed_at,
        })
    }
}

/// Insert a new pending moderation task
pub async fn create_task(pool: &PgPool, item_id: i64) -> Result<i64, StoreError> {
    let id: i64 = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO moderation_results (item_id, status)
        VALUES ($1, 'pending')
        RETURNING id
        "#,
    )
    .bind(item_id)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// Get a task by ID
pub async fn get_task(pool: &PgPool, task_id: i64) -> Result<Option<ModerationTask>, StoreError> {
    let row = sqlx::query_as::<_, TaskRow>(
        r#"
        SELECT id, item_id, status, is_violation, probability, error_message,
               created_at, processed_at
        FROM moderation_results
        WHERE id = $1
        "#,
    )
    .bind(task_id)
    .fetch_optional(pool)
    .await?;

    row.map(ModerationTask::try_from).transpose()
}

/// Most recently created pending task for an item
pub async fn find_latest_pending(pool: &PgPool, item_id: i64) -> Result<Option<i64>, StoreError> {
    let id: Option<i64> = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT id
        FROM moderation_results
        WHERE item_id = $1 AND status = 'pending'
        ORDER BY created_at DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(item_id)
    .fetch_optional(pool)
    .await?;

    Ok(id)
}

/// Move a pending task to completed.
///
/// The `status = 'pending'` guard makes the update a single compare-and-set:
/// of several racing workers only one sees a row come back.
pub async fn complete_task(
    pool: &PgPool,
    task_id: i64,
    is_violation: bool,
    probability: f64,
) -> Result<(), StoreError> {
    if !(0.0..=1.0).contains(&probability) {
        return Err(StoreError::InvalidProbability(probability));
    }

    let updated: Option<i64> = sqlx::query_scalar::<_, i64>(
        r#"
        UPDATE moderation_results
        SET status = 'completed',
            is_violation = $1,
            probability = $2,
            processed_at = NOW()
        WHERE id = $3 AND status = 'pending'
        RETURNING id
        "#,
    )
    .bind(is_violation)
    .bind(probability)
    .bind(task_id)
    .fetch_optional(pool)
    .await?;

    match updated {
        Some(_) => Ok(()),
        None => Err(explain_missed_update(pool, task_id).await?),
    }
}

/// Move a pending task to failed.
pub async fn fail_task(pool: &PgPool, task_id: i64, error_message: &str) -> Result<(), StoreError> {
    let updated: Option<i64> = sqlx::query_scalar::<_, i64>(
        r#"
        UPDATE moderation_results
        SET status = 'failed',
            error_message = $1,
            processed_at = NOW()
        WHERE id = $2 AND status = 'pending'
        RETURNING id
        "#,
    )
    .bind(error_message)
    .bind(task_id)
    .fetch_optional(pool)
    .await?;

    match updated {
        Some(_) => Ok(()),
        None => Err(explain_missed_update(pool, task_id).await?),
    }
}

/// Work out why a guarded update touched no row.
async fn explain_missed_update(pool: &PgPool, task_id: i64) -> Result<StoreError, StoreError> {
    Ok(match get_task(pool, task_id).await? {
        None => StoreError::TaskNotFound(task_id),
        Some(task) => StoreError::AlreadyTerminal {
            task_id,
            status: task.status,
        },
    })
}
