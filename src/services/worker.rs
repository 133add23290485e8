//! Moderation worker: consumes work items and moves tasks to a terminal state.
//!
//! ```text
//! ModerationWorker
//!     │
//!     ├─► next_delivery (WorkConsumer, blocks until a message or timeout)
//!     ├─► decode WorkItem ── malformed ──► dead letter
//!     ├─► ListingStore.get_listing + features::extract + Classifier.score
//!     │       ├─ ok   ─► resolve task ─► TaskStore.complete_task
//!     │       └─ err  ─► resolve task ─► TaskStore.fail_task ─► dead letter
//!     └─► ack
//! ```
//!
//! Per-item failures never escape `process`; the loop only stops when the
//! shutdown token is cancelled, and it only looks at the token between
//! items, so an in-flight item always finishes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::db::store::{ListingStore, StoreError, TaskStore};
use crate::models::moderation::PredictResponse;
use crate::services::classifier::{Classifier, ClassifierError};
use crate::services::features;
use crate::services::queue::{Delivery, WorkConsumer, WorkItem, WorkPublisher};

/// Pause after a failed queue read before trying again.
const READ_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// Task moved to completed.
    Completed {
        task_id: i64,
        prediction: PredictResponse,
    },
    /// Scoring failed; the task (if one resolved) was marked failed and a
    /// dead letter was attempted.
    Failed {
        task_id: Option<i64>,
        error: String,
    },
    /// Scoring succeeded but there was no pending task to record it on.
    Unmatched { item_id: i64, error: String },
    /// The task was already terminal; nothing was written.
    Duplicate { task_id: i64 },
    /// The payload was not a work item.
    Malformed { error: String },
}

/// Failures while moderating one item. Always contained to that item.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("item {0} not found")]
    ItemNotFound(i64),

    #[error("listing lookup failed: {0}")]
    Lookup(#[source] StoreError),

    #[error(transparent)]
    Scoring(#[from] ClassifierError),
}

/// How a work item maps onto a task row.
enum TaskResolution {
    Pending(i64),
    Terminal(i64),
    Missing(String),
}

pub struct ModerationWorker {
    tasks: Arc<dyn TaskStore>,
    listings: Arc<dyn ListingStore>,
    dead_letters: Arc<dyn WorkPublisher>,
    classifier: Arc<dyn Classifier>,
}

impl ModerationWorker {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        listings: Arc<dyn ListingStore>,
        dead_letters: Arc<dyn WorkPublisher>,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        Self {
            tasks,
            listings,
            dead_letters,
            classifier,
        }
    }

    /// Consume until `shutdown` is cancelled.
    pub async fn run<C: WorkConsumer + ?Sized>(&self, consumer: &mut C, shutdown: CancellationToken) {
        info!("Moderation worker started");

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = consumer.next_delivery() => next,
            };

            let delivery = match next {
                Ok(Some(delivery)) => delivery,
                Ok(None) => {
                    debug!("No work items available");
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "Failed to read from work queue, will retry");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(READ_ERROR_BACKOFF) => {}
                    }
                    continue;
                }
            };

            let outcome = self.process(&delivery).await;
            debug!(entry_id = %delivery.id, outcome = ?outcome, "Delivery processed");

            if let Err(e) = consumer.ack(&delivery).await {
                // Unacked entries are replayed to this consumer after a restart.
                error!(entry_id = %delivery.id, error = %e, "Failed to acknowledge delivery");
            }
        }

        info!("Moderation worker stopped");
    }

    /// Handle one delivery end to end. Never fails: every error is logged,
    /// recorded on the task where possible and dead-lettered.
    pub async fn process(&self, delivery: &Delivery) -> ProcessOutcome {
        let item = match delivery.work_item() {
            Ok(item) => item,
            Err(e) => {
                let error = format!("malformed work item: {}", e);
                warn!(entry_id = %delivery.id, error = %error, "Rejecting work item");
                self.dead_letter(delivery, &error).await;
                return ProcessOutcome::Malformed { error };
            }
        };

        info!(item_id = item.item_id, task_id = ?item.task_id, "Processing work item");
        let start = Instant::now();

        let outcome = match self.score_item(item.item_id).await {
            Ok(prediction) => self.record_success(delivery, &item, prediction).await,
            Err(e) => self.record_failure(delivery, &item, e.to_string()).await,
        };

        metrics::histogram!("moderation_processing_seconds").record(start.elapsed().as_secs_f64());
        outcome
    }

    async fn score_item(&self, item_id: i64) -> Result<PredictResponse, ProcessingError> {
        let listing = self
            .listings
            .get_listing(item_id)
            .await
            .map_err(ProcessingError::Lookup)?
            .ok_or(ProcessingError::ItemNotFound(item_id))?;

        let features = features::extract(&listing);
        debug!(item_id, features = ?features.0, "Features prepared");

        Ok(self.classifier.score(&features)?)
    }

    /// Find the task a work item refers to.
    ///
    /// Items carrying `task_id` are looked up directly; older messages fall
    /// back to the newest pending task for the item.
    async fn resolve_task(&self, item: &WorkItem) -> Result<TaskResolution, StoreError> {
        let Some(task_id) = item.task_id else {
            return Ok(match self.tasks.find_latest_pending(item.item_id).await? {
                Some(task_id) => TaskResolution::Pending(task_id),
                None => TaskResolution::Missing(format!(
                    "no pending moderation task for item {}",
                    item.item_id
                )),
            });
        };

        Ok(match self.tasks.get_task(task_id).await? {
            None => TaskResolution::Missing(format!("task {} not found", task_id)),
            Some(task) if task.item_id != item.item_id => TaskResolution::Missing(format!(
                "task {} belongs to item {}, not {}",
                task_id, task.item_id, item.item_id
            )),
            Some(task) if task.status.is_terminal() => TaskResolution::Terminal(task_id),
            Some(_) => TaskResolution::Pending(task_id),
        })
    }

    async fn record_success(
        &self,
        delivery: &Delivery,
        item: &WorkItem,
        prediction: PredictResponse,
    ) -> ProcessOutcome {
        let task_id = match self.resolve_task(item).await {
            Ok(TaskResolution::Pending(task_id)) => task_id,
            Ok(TaskResolution::Terminal(task_id)) => {
                info!(task_id, item_id = item.item_id, "Task already processed, skipping duplicate");
                return ProcessOutcome::Duplicate { task_id };
            }
            Ok(TaskResolution::Missing(error)) => {
                error!(item_id = item.item_id, error = %error, "Scored item has no task to record on");
                self.dead_letter(delivery, &error).await;
                return ProcessOutcome::Unmatched {
                    item_id: item.item_id,
                    error,
                };
            }
            Err(e) => {
                let error = format!("task lookup failed: {}", e);
                error!(item_id = item.item_id, error = %error, "Could not resolve task");
                self.dead_letter(delivery, &error).await;
                return ProcessOutcome::Failed {
                    task_id: item.task_id,
                    error,
                };
            }
        };

        match self
            .tasks
            .complete_task(task_id, prediction.is_violation, prediction.probability)
            .await
        {
            Ok(()) => {
                metrics::counter!("moderation_tasks_completed_total").increment(1);
                info!(
                    task_id,
                    item_id = item.item_id,
                    is_violation = prediction.is_violation,
                    probability = prediction.probability,
                    "Task completed"
                );
                ProcessOutcome::Completed {
                    task_id,
                    prediction,
                }
            }
            Err(StoreError::AlreadyTerminal { .. }) => {
                info!(task_id, "Task finished by another delivery, skipping");
                ProcessOutcome::Duplicate { task_id }
            }
            Err(e) => {
                let error = format!("failed to store result: {}", e);
                error!(task_id, error = %error, "Could not complete task");
                self.dead_letter(delivery, &error).await;
                ProcessOutcome::Failed {
                    task_id: Some(task_id),
                    error,
                }
            }
        }
    }

    async fn record_failure(&self, delivery: &Delivery, item: &WorkItem, error: String) -> ProcessOutcome {
        error!(item_id = item.item_id, error = %error, "Moderation failed");

        let task_id = match self.resolve_task(item).await {
            Ok(TaskResolution::Pending(task_id)) => Some(task_id),
            Ok(TaskResolution::Terminal(task_id)) => {
                info!(task_id, "Task already terminal, skipping duplicate");
                return ProcessOutcome::Duplicate { task_id };
            }
            Ok(TaskResolution::Missing(reason)) => {
                warn!(item_id = item.item_id, reason = %reason, "No pending task to mark failed");
                None
            }
            Err(e) => {
                error!(item_id = item.item_id, error = %e, "Could not resolve task to mark failed");
                None
            }
        };

        if let Some(task_id) = task_id {
            match self.tasks.fail_task(task_id, &error).await {
                Ok(()) => {
                    metrics::counter!("moderation_tasks_failed_total").increment(1);
                    info!(task_id, "Task marked failed");
                }
                Err(StoreError::AlreadyTerminal { .. }) => {
                    info!(task_id, "Task finished by another delivery, skipping");
                    return ProcessOutcome::Duplicate { task_id };
                }
                Err(e) => error!(task_id, error = %e, "Failed to mark task failed"),
            }
        }

        self.dead_letter(delivery, &error).await;
        ProcessOutcome::Failed { task_id, error }
    }

    /// Best effort: a dead-letter failure is logged and swallowed.
    async fn dead_letter(&self, delivery: &Delivery, error: &str) {
        match self
            .dead_letters
            .publish_dead_letter(&delivery.payload, error, delivery.attempt)
            .await
        {
            Ok(id) => {
                metrics::counter!("moderation_dead_letters_total").increment(1);
                info!(entry_id = %delivery.id, dead_letter_id = %id, "Published dead letter");
            }
            Err(e) => error!(entry_id = %delivery.id, error = %e, "Failed to publish dead letter"),
        }
    }
}
