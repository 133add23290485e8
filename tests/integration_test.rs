use moderation_service::{
    config::AppConfig,
    db::{self, listing_queries, queries, store::StoreError},
    models::task::TaskStatus,
    services::queue::{QueueTopics, RedisQueue, WorkConsumer, WorkPublisher},
};
use std::time::Duration;
use uuid::Uuid;

/// Integration test: task store against PostgreSQL
///
/// Covers create / read / latest-pending lookup / terminal transitions and
/// the guard against overwriting a terminal task.
///
/// Note: This requires a running PostgreSQL instance configured via
/// environment variables.
#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_task_store_lifecycle() {
    let config = AppConfig::from_env().expect("Failed to load config");

    let pool = db::init_pool(&config.database_url, 5)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    // Random item id so reruns do not see each other's rows
    let item_id = 1_000_000 + (Uuid::new_v4().as_u128() % 1_000_000) as i64;

    // 1. Create two pending tasks
    let older = queries::create_task(&pool, item_id).await.expect("Failed to create task");
    let newer = queries::create_task(&pool, item_id).await.expect("Failed to create task");

    let task = queries::get_task(&pool, older)
        .await
        .expect("Failed to get task")
        .expect("Task not found");
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.item_id, item_id);
    assert!(task.processed_at.is_none());

    // 2. Latest pending wins
    let latest = queries::find_latest_pending(&pool, item_id)
        .await
        .expect("Failed to find pending task");
    assert_eq!(latest, Some(newer));

    // 3. Complete the newer task
    queries::complete_task(&pool, newer, true, 0.82)
        .await
        .expect("Failed to complete task");
    let completed = queries::get_task(&pool, newer).await.unwrap().unwrap();
    assert_eq!(completed.status, TaskStatus::Completed);
    assert_eq!(completed.is_violation, Some(true));
    assert_eq!(completed.probability, Some(0.82));
    assert!(completed.processed_at.is_some());

    // 4. Terminal tasks are never overwritten
    let err = queries::fail_task(&pool, newer, "late failure").await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyTerminal { status: TaskStatus::Completed, .. }));
    let unchanged = queries::get_task(&pool, newer).await.unwrap().unwrap();
    assert_eq!(unchanged.error_message, None);
    assert_eq!(unchanged.processed_at, completed.processed_at);

    // 5. Fail the older task
    queries::fail_task(&pool, older, "item not found")
        .await
        .expect("Failed to fail task");
    let failed = queries::get_task(&pool, older).await.unwrap().unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.error_message.as_deref(), Some("item not found"));
    assert_eq!(queries::find_latest_pending(&pool, item_id).await.unwrap(), None);

    // 6. Unknown ids
    let err = queries::complete_task(&pool, i64::MAX, false, 0.1).await.unwrap_err();
    assert!(matches!(err, StoreError::TaskNotFound(_)));

    pool.close().await;
}

/// Listing lookup joins the seller's verification flag.
#[tokio::test]
#[ignore]
async fn test_listing_lookup() {
    let config = AppConfig::from_env().expect("Failed to load config");
    let pool = db::init_pool(&config.database_url, 5)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&pool).await.expect("Failed to run migrations");

    let seller_id = 2_000_000 + (Uuid::new_v4().as_u128() % 1_000_000) as i64;
    listing_queries::create_user(&pool, seller_id, true).await.unwrap();

    let listing = moderation_service::test_dependencies::listing(seller_id, true, 3, "Bike", 12);
    let listing = moderation_service::models::listing::ListingRecord { seller_id, ..listing };
    listing_queries::create_item(&pool, &listing).await.unwrap();

    let found = listing_queries::get_listing(&pool, listing.item_id)
        .await
        .unwrap()
        .expect("Listing not found");
    assert!(found.is_verified_seller);
    assert_eq!(found.images_qty, 3);
    assert_eq!(found.category, 12);

    assert!(listing_queries::get_listing(&pool, -1).await.unwrap().is_none());

    pool.close().await;
}

/// Redis Streams round trip through a fresh consumer group.
#[tokio::test]
#[ignore]
async fn test_queue_publish_consume_ack() {
    let config = AppConfig::from_env().expect("Failed to load config");
    let suffix = Uuid::new_v4();
    let topics = QueueTopics {
        work_stream: format!("moderation-test-{}", suffix),
        dead_letter_stream: format!("moderation-test-dlq-{}", suffix),
        consumer_group: "moderation-test-group".to_string(),
    };
    let queue = RedisQueue::new(&config.redis_url, topics).expect("Failed to initialize queue");
    queue.health_check().await.expect("Redis not reachable");

    let mut consumer = queue.consumer("test-consumer").await.expect("Failed to join group");
    queue.ensure_group().await.expect("ensure_group must be idempotent");

    queue.publish_work(42, Some(7)).await.expect("Failed to publish");
    assert_eq!(queue.queue_depth().await.unwrap(), 1);

    // First call drains the (empty) backlog, then new entries arrive.
    let mut delivery = None;
    for _ in 0..3 {
        if let Some(d) = consumer.next_delivery().await.expect("Failed to read") {
            delivery = Some(d);
            break;
        }
    }
    let delivery = delivery.expect("No delivery received");
    let item = delivery.work_item().unwrap();
    assert_eq!(item.item_id, 42);
    assert_eq!(item.task_id, Some(7));
    assert_eq!(delivery.attempt, 1);

    consumer.ack(&delivery).await.expect("Failed to ack");

    queue
        .publish_dead_letter(&delivery.payload, "item 42 not found", delivery.attempt)
        .await
        .expect("Failed to publish dead letter");
}

/// An entry read by one group member and never acknowledged is handed to
/// another member once it has been idle long enough.
#[tokio::test]
#[ignore]
async fn test_unacked_entry_is_claimed_by_another_consumer() {
    let config = AppConfig::from_env().expect("Failed to load config");
    let suffix = Uuid::new_v4();
    let topics = QueueTopics {
        work_stream: format!("moderation-test-{}", suffix),
        dead_letter_stream: format!("moderation-test-dlq-{}", suffix),
        consumer_group: "moderation-test-group".to_string(),
    };
    let queue = RedisQueue::new(&config.redis_url, topics).expect("Failed to initialize queue");

    let mut first = queue.consumer("consumer-a").await.expect("Failed to join group");
    queue.publish_work(42, Some(7)).await.expect("Failed to publish");

    // consumer-a takes the entry and goes away without acknowledging it.
    let mut taken = None;
    for _ in 0..3 {
        if let Some(d) = first.next_delivery().await.expect("Failed to read") {
            taken = Some(d);
            break;
        }
    }
    let taken = taken.expect("consumer-a received nothing");
    drop(first);

    let mut second = queue
        .consumer("consumer-b")
        .await
        .expect("Failed to join group")
        .with_claim_idle(Duration::ZERO);

    let claimed = second
        .next_delivery()
        .await
        .expect("Failed to read")
        .expect("consumer-b did not claim the abandoned entry");
    assert_eq!(claimed.id, taken.id);
    assert_eq!(claimed.work_item().unwrap().task_id, Some(7));
    assert_eq!(claimed.attempt, 2);

    second.ack(&claimed).await.expect("Failed to ack");
    assert!(second.next_delivery().await.expect("Failed to read").is_none());
}
