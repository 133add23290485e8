// In-memory dependencies for tests.
//
// They honour the same contracts as the PostgreSQL and Redis backends
// (pending-only transitions, append-only dead letters) and record every call
// so tests can assert on side effects and their order.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::app_state::AppState;
use crate::db::store::{ListingStore, StoreError, TaskStore};
use crate::models::listing::ListingRecord;
use crate::models::moderation::PredictResponse;
use crate::models::task::{ModerationTask, TaskStatus};
use crate::services::classifier::{Classifier, ClassifierError};
use crate::services::features::FeatureVector;
use crate::services::queue::{
    DeadLetterRecord, Delivery, QueueError, WorkConsumer, WorkItem, WorkPublisher,
};

/// Side effects in the order they happened, shared between the fakes.
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

// =============================================================================
// Task store
// =============================================================================

pub struct InMemoryTaskStore {
    tasks: Mutex<HashMap<i64, ModerationTask>>,
    next_id: AtomicUsize,
    fail_writes: Mutex<bool>,
    log: CallLog,
}

impl InMemoryTaskStore {
    pub fn new(log: CallLog) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            next_id: AtomicUsize::new(1),
            fail_writes: Mutex::new(false),
            log,
        }
    }

    /// Make every subsequent write fail with `StoreError::Unavailable`.
    pub fn fail_writes(&self, fail: bool) {
        *self.fail_writes.lock().unwrap() = fail;
    }

    pub fn all_tasks(&self) -> Vec<ModerationTask> {
        let mut tasks: Vec<_> = self.tasks.lock().unwrap().values().cloned().collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }

    pub fn task(&self, task_id: i64) -> Option<ModerationTask> {
        self.tasks.lock().unwrap().get(&task_id).cloned()
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if *self.fail_writes.lock().unwrap() {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }

    fn finish(
        &self,
        task_id: i64,
        apply: impl FnOnce(&mut ModerationTask),
    ) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks.get_mut(&task_id).ok_or(StoreError::TaskNotFound(task_id))?;
        if task.status.is_terminal() {
            return Err(StoreError::AlreadyTerminal {
                task_id,
                status: task.status,
            });
        }
        apply(task);
        task.processed_at = Some(Utc::now());
        Ok(())
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create_task(&self, item_id: i64) -> Result<i64, StoreError> {
        self.check_writable()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) as i64;
        // Spread creation times so "latest" is unambiguous.
        let created_at = Utc::now() + Duration::microseconds(id);
        self.tasks
            .lock()
            .unwrap()
            .insert(id, ModerationTask::pending(id, item_id, created_at));
        self.log.lock().unwrap().push(format!("create_task:{}", item_id));
        Ok(id)
    }

    async fn get_task(&self, task_id: i64) -> Result<Option<ModerationTask>, StoreError> {
        Ok(self.task(task_id))
    }

    async fn find_latest_pending(&self, item_id: i64) -> Result<Option<i64>, StoreError> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.item_id == item_id && t.status == TaskStatus::Pending)
            .max_by_key(|t| (t.created_at, t.id))
            .map(|t| t.id))
    }

    async fn complete_task(
        &self,
        task_id: i64,
        is_violation: bool,
        probability: f64,
    ) -> Result<(), StoreError> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(StoreError::InvalidProbability(probability));
        }
        self.finish(task_id, |task| {
            task.status = TaskStatus::Completed;
            task.is_violation = Some(is_violation);
            task.probability = Some(probability);
        })?;
        self.log.lock().unwrap().push(format!("complete_task:{}", task_id));
        Ok(())
    }

    async fn fail_task(&self, task_id: i64, error_message: &str) -> Result<(), StoreError> {
        self.finish(task_id, |task| {
            task.status = TaskStatus::Failed;
            task.error_message = Some(error_message.to_string());
        })?;
        self.log.lock().unwrap().push(format!("fail_task:{}", task_id));
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// =============================================================================
// Listings
// =============================================================================

pub struct InMemoryListings {
    listings: Mutex<HashMap<i64, ListingRecord>>,
    lookups: AtomicUsize,
}

impl InMemoryListings {
    pub fn new() -> Self {
        Self {
            listings: Mutex::new(HashMap::new()),
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn with_listing(self, listing: ListingRecord) -> Self {
        self.listings.lock().unwrap().insert(listing.item_id, listing);
        self
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryListings {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ListingStore for InMemoryListings {
    async fn get_listing(&self, item_id: i64) -> Result<Option<ListingRecord>, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.listings.lock().unwrap().get(&item_id).cloned())
    }
}

/// Listing with the fields the classifier reads; everything else fixed.
pub fn listing(
    item_id: i64,
    is_verified_seller: bool,
    images_qty: i32,
    description: &str,
    category: i32,
) -> ListingRecord {
    ListingRecord {
        item_id,
        seller_id: 1000 + item_id,
        name: format!("Item {}", item_id),
        description: description.to_string(),
        category,
        images_qty,
        is_verified_seller,
    }
}

// =============================================================================
// Queue
// =============================================================================

/// Publisher that keeps every message in memory.
pub struct RecordingQueue {
    work: Mutex<Vec<WorkItem>>,
    dead_letters: Mutex<Vec<DeadLetterRecord>>,
    fail_work: Mutex<bool>,
    fail_dead_letters: Mutex<bool>,
    log: CallLog,
}

impl RecordingQueue {
    pub fn new(log: CallLog) -> Self {
        Self {
            work: Mutex::new(Vec::new()),
            dead_letters: Mutex::new(Vec::new()),
            fail_work: Mutex::new(false),
            fail_dead_letters: Mutex::new(false),
            log,
        }
    }

    pub fn fail_work(&self, fail: bool) {
        *self.fail_work.lock().unwrap() = fail;
    }

    pub fn fail_dead_letters(&self, fail: bool) {
        *self.fail_dead_letters.lock().unwrap() = fail;
    }

    pub fn published_work(&self) -> Vec<WorkItem> {
        self.work.lock().unwrap().clone()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetterRecord> {
        self.dead_letters.lock().unwrap().clone()
    }

    /// Turn everything published so far into deliveries, as a consumer
    /// would see them.
    pub fn drain_deliveries(&self) -> Vec<Delivery> {
        self.work
            .lock()
            .unwrap()
            .drain(..)
            .enumerate()
            .map(|(i, item)| Delivery {
                id: format!("{}-0", i + 1),
                payload: serde_json::to_value(&item).unwrap(),
                attempt: 1,
            })
            .collect()
    }

    fn unavailable() -> QueueError {
        QueueError::Redis(redis::RedisError::from((
            redis::ErrorKind::IoError,
            "queue unavailable",
        )))
    }
}

#[async_trait]
impl WorkPublisher for RecordingQueue {
    async fn publish_work(&self, item_id: i64, task_id: Option<i64>) -> Result<String, QueueError> {
        self.log.lock().unwrap().push(format!("publish_work:{}", item_id));
        if *self.fail_work.lock().unwrap() {
            return Err(Self::unavailable());
        }
        let mut work = self.work.lock().unwrap();
        work.push(WorkItem::new(item_id, task_id));
        Ok(format!("{}-0", work.len()))
    }

    async fn publish_dead_letter(
        &self,
        original_message: &serde_json::Value,
        error: &str,
        retry_count: u32,
    ) -> Result<String, QueueError> {
        self.log.lock().unwrap().push("publish_dead_letter".to_string());
        if *self.fail_dead_letters.lock().unwrap() {
            return Err(Self::unavailable());
        }
        let mut dead_letters = self.dead_letters.lock().unwrap();
        dead_letters.push(DeadLetterRecord {
            original_message: original_message.clone(),
            error: error.to_string(),
            timestamp: Utc::now(),
            retry_count,
        });
        Ok(format!("{}-0", dead_letters.len()))
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

/// Consumer replaying a fixed list of deliveries, then cancelling `shutdown`.
pub struct ScriptedConsumer {
    pending: VecDeque<Result<Option<Delivery>, QueueError>>,
    acked: Vec<String>,
    shutdown: CancellationToken,
}

impl ScriptedConsumer {
    pub fn new(deliveries: Vec<Delivery>, shutdown: CancellationToken) -> Self {
        Self {
            pending: deliveries.into_iter().map(|d| Ok(Some(d))).collect(),
            acked: Vec::new(),
            shutdown,
        }
    }

    /// Queue an idle poll (`Ok(None)`) or a read error before the next delivery.
    pub fn push_front(&mut self, step: Result<Option<Delivery>, QueueError>) {
        self.pending.push_front(step);
    }

    pub fn acked(&self) -> &[String] {
        &self.acked
    }
}

#[async_trait]
impl WorkConsumer for ScriptedConsumer {
    async fn next_delivery(&mut self) -> Result<Option<Delivery>, QueueError> {
        match self.pending.pop_front() {
            Some(step) => step,
            None => {
                self.shutdown.cancel();
                Ok(None)
            }
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), QueueError> {
        self.acked.push(delivery.id.clone());
        Ok(())
    }
}

// =============================================================================
// Classifier
// =============================================================================

/// Classifier returning a fixed prediction and remembering its inputs.
pub struct FixedClassifier {
    prediction: Result<PredictResponse, String>,
    calls: Mutex<Vec<FeatureVector>>,
}

impl FixedClassifier {
    pub fn new(is_violation: bool, probability: f64) -> Self {
        Self {
            prediction: Ok(PredictResponse {
                is_violation,
                probability,
            }),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            prediction: Err(message.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<FeatureVector> {
        self.calls.lock().unwrap().clone()
    }
}

impl Classifier for FixedClassifier {
    fn score(&self, features: &FeatureVector) -> Result<PredictResponse, ClassifierError> {
        self.calls.lock().unwrap().push(*features);
        self.prediction
            .clone()
            .map_err(ClassifierError::Scoring)
    }
}

// =============================================================================
// Wiring
// =============================================================================

/// Everything a test needs, with handles to inspect each fake.
pub struct TestDependencies {
    pub log: CallLog,
    pub tasks: Arc<InMemoryTaskStore>,
    pub listings: Arc<InMemoryListings>,
    pub queue: Arc<RecordingQueue>,
    pub classifier: Arc<FixedClassifier>,
}

impl TestDependencies {
    pub fn new(listings: InMemoryListings, classifier: FixedClassifier) -> Self {
        let log = call_log();
        Self {
            tasks: Arc::new(InMemoryTaskStore::new(log.clone())),
            listings: Arc::new(listings),
            queue: Arc::new(RecordingQueue::new(log.clone())),
            classifier: Arc::new(classifier),
            log,
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState::from_parts(
            self.tasks.clone(),
            self.listings.clone(),
            self.queue.clone(),
            Some(self.classifier.clone()),
        )
    }

    /// State with no classifier loaded.
    pub fn app_state_without_model(&self) -> AppState {
        AppState::from_parts(
            self.tasks.clone(),
            self.listings.clone(),
            self.queue.clone(),
            None,
        )
    }

    pub fn worker(&self) -> crate::services::worker::ModerationWorker {
        crate::services::worker::ModerationWorker::new(
            self.tasks.clone(),
            self.listings.clone(),
            self.queue.clone(),
            self.classifier.clone(),
        )
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}
