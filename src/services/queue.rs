use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Stream field every message body is stored under.
const PAYLOAD_FIELD: &str = "payload";
/// How long a consumer read blocks before returning empty-handed.
const BLOCK_MS: usize = 5000;
/// Entries left pending on another group member at least this long are
/// taken over.
pub const DEFAULT_CLAIM_IDLE: Duration = Duration::from_secs(60);

/// Work item published for the worker.
///
/// `task_id` is absent in messages from older producers; the worker then
/// falls back to the latest pending task for `item_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkItem {
    pub item_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

impl WorkItem {
    pub fn new(item_id: i64, task_id: Option<i64>) -> Self {
        Self {
            item_id,
            task_id,
            timestamp: Utc::now(),
        }
    }
}

/// Record of a work item whose processing failed, for external reprocessing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeadLetterRecord {
    pub original_message: serde_json::Value,
    pub error: String,
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
}

/// One message handed to a consumer, not yet acknowledged.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Stream entry id used for acknowledgement.
    pub id: String,
    /// Message body exactly as published.
    pub payload: serde_json::Value,
    /// How many times this entry has been handed out, starting at 1.
    pub attempt: u32,
}

impl Delivery {
    pub fn work_item(&self) -> Result<WorkItem, QueueError> {
        serde_json::from_value(self.payload.clone()).map_err(QueueError::Serialize)
    }
}

/// Producer side of the moderation queue.
#[async_trait]
pub trait WorkPublisher: Send + Sync {
    /// Publish a work item to the main stream.
    async fn publish_work(&self, item_id: i64, task_id: Option<i64>) -> Result<String, QueueError>;

    /// Publish a dead-letter record. Callers log failures and move on.
    async fn publish_dead_letter(
        &self,
        original_message: &serde_json::Value,
        error: &str,
        retry_count: u32,
    ) -> Result<String, QueueError>;

    async fn health_check(&self) -> Result<(), QueueError>;
}

/// Consumer side: at-least-once delivery of work items.
#[async_trait]
pub trait WorkConsumer: Send {
    /// Wait for the next delivery. `Ok(None)` means the wait timed out and
    /// the caller should poll again.
    async fn next_delivery(&mut self) -> Result<Option<Delivery>, QueueError>;

    /// Acknowledge a processed delivery so it is not handed out again.
    async fn ack(&mut self, delivery: &Delivery) -> Result<(), QueueError>;
}

/// Stream and group names shared by producers and consumers.
#[derive(Debug, Clone)]
pub struct QueueTopics {
    pub work_stream: String,
    pub dead_letter_stream: String,
    pub consumer_group: String,
}

/// Redis Streams backed moderation queue.
pub struct RedisQueue {
    client: redis::Client,
    topics: QueueTopics,
}

impl RedisQueue {
    pub fn new(redis_url: &str, topics: QueueTopics) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client, topics })
    }

    pub fn topics(&self) -> &QueueTopics {
        &self.topics
    }

    async fn append(&self, stream: &str, payload: &str) -> Result<String, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let id: String = conn
            .xadd(stream, "*", &[(PAYLOAD_FIELD, payload)])
            .await
            .map_err(QueueError::Redis)?;
        Ok(id)
    }

    /// Create the work stream and consumer group if they do not exist yet.
    pub async fn ensure_group(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let created: Result<(), redis::RedisError> = conn
            .xgroup_create_mkstream(&self.topics.work_stream, &self.topics.consumer_group, "0")
            .await;

        match created {
            Ok(()) => {
                tracing::info!(
                    stream = %self.topics.work_stream,
                    group = %self.topics.consumer_group,
                    "Created consumer group"
                );
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(QueueError::Redis(e)),
        }
    }

    /// Number of entries in the work stream.
    pub async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let depth: u64 = conn.xlen(&self.topics.work_stream).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }

    /// Open a consumer in the configured group under `consumer_name`.
    pub async fn consumer(&self, consumer_name: &str) -> Result<RedisConsumer, QueueError> {
        self.ensure_group().await?;
        let conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        Ok(RedisConsumer {
            conn,
            topics: self.topics.clone(),
            consumer_name: consumer_name.to_string(),
            replaying_backlog: true,
            claim_idle: DEFAULT_CLAIM_IDLE,
        })
    }
}

#[async_trait]
impl WorkPublisher for RedisQueue {
    async fn publish_work(&self, item_id: i64, task_id: Option<i64>) -> Result<String, QueueError> {
        let payload = serde_json::to_string(&WorkItem::new(item_id, task_id)).map_err(QueueError::Serialize)?;
        self.append(&self.topics.work_stream, &payload).await
    }

    async fn publish_dead_letter(
        &self,
        original_message: &serde_json::Value,
        error: &str,
        retry_count: u32,
    ) -> Result<String, QueueError> {
        let record = DeadLetterRecord {
            original_message: original_message.clone(),
            error: error.to_string(),
            timestamp: Utc::now(),
            retry_count,
        };
        let payload = serde_json::to_string(&record).map_err(QueueError::Serialize)?;
        self.append(&self.topics.dead_letter_stream, &payload).await
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

/// Group member reading the work stream.
///
/// On start it replays entries delivered to this consumer name but never
/// acknowledged (a crash mid-item), then switches to new entries. Whenever
/// there is nothing to read it also claims entries another member received
/// and left unacknowledged for longer than `claim_idle`, so work held by a
/// consumer name that never comes back is still delivered.
pub struct RedisConsumer {
    conn: redis::aio::MultiplexedConnection,
    topics: QueueTopics,
    consumer_name: String,
    replaying_backlog: bool,
    claim_idle: Duration,
}

impl RedisConsumer {
    pub fn with_claim_idle(mut self, claim_idle: Duration) -> Self {
        self.claim_idle = claim_idle;
        self
    }

    /// Move one stale pending entry from any group member to this consumer.
    async fn claim_stale(&mut self) -> Result<Option<Delivery>, QueueError> {
        let min_idle_ms = u64::try_from(self.claim_idle.as_millis()).unwrap_or(u64::MAX);
        let reply: Vec<redis::Value> = redis::cmd("XAUTOCLAIM")
            .arg(&self.topics.work_stream)
            .arg(&self.topics.consumer_group)
            .arg(&self.consumer_name)
            .arg(min_idle_ms)
            .arg("0-0")
            .arg("COUNT")
            .arg(1)
            .query_async(&mut self.conn)
            .await
            .map_err(QueueError::Redis)?;

        // Reply: [next cursor, [[id, [field, value, ...]], ...], (deleted ids)]
        let Some(entries) = reply.get(1) else {
            return Ok(None);
        };
        let entries: Vec<(String, HashMap<String, String>)> =
            redis::from_redis_value(entries).map_err(QueueError::Redis)?;
        let Some((id, mut fields)) = entries.into_iter().next() else {
            return Ok(None);
        };

        let attempt = self.delivery_count(&id).await?;
        tracing::warn!(
            consumer = %self.consumer_name,
            entry_id = %id,
            attempt,
            "Claimed entry abandoned by another consumer"
        );

        Ok(Some(Delivery {
            payload: decode_payload(fields.remove(PAYLOAD_FIELD)),
            id,
            attempt,
        }))
    }

    /// Times the given pending entry has been delivered, per XPENDING.
    async fn delivery_count(&mut self, entry_id: &str) -> Result<u32, QueueError> {
        let rows: Vec<(String, String, u64, u64)> = redis::cmd("XPENDING")
            .arg(&self.topics.work_stream)
            .arg(&self.topics.consumer_group)
            .arg(entry_id)
            .arg(entry_id)
            .arg(1)
            .query_async(&mut self.conn)
            .await
            .map_err(QueueError::Redis)?;

        Ok(rows
            .first()
            .map(|(_, _, _, count)| u32::try_from(*count).unwrap_or(u32::MAX))
            .unwrap_or(1)
            .max(1))
    }
}

#[async_trait]
impl WorkConsumer for RedisConsumer {
    async fn next_delivery(&mut self) -> Result<Option<Delivery>, QueueError> {
        // "0" re-reads this consumer's unacknowledged entries, ">" asks for new ones.
        let start_id = if self.replaying_backlog { "0" } else { ">" };
        let mut opts = StreamReadOptions::default()
            .group(&self.topics.consumer_group, &self.consumer_name)
            .count(1);
        if !self.replaying_backlog {
            opts = opts.block(BLOCK_MS);
        }

        let reply: Option<StreamReadReply> = self
            .conn
            .xread_options(&[&self.topics.work_stream], &[start_id], &opts)
            .await
            .map_err(QueueError::Redis)?;

        let entry = reply
            .and_then(|r| r.keys.into_iter().next())
            .and_then(|k| k.ids.into_iter().next());

        let Some(entry) = entry else {
            if self.replaying_backlog {
                tracing::debug!(consumer = %self.consumer_name, "Backlog drained, reading new entries");
                self.replaying_backlog = false;
            }
            return self.claim_stale().await;
        };

        let payload = decode_payload(entry.get::<String>(PAYLOAD_FIELD));

        let attempt = if self.replaying_backlog {
            self.delivery_count(&entry.id).await?
        } else {
            1
        };

        Ok(Some(Delivery {
            id: entry.id,
            payload,
            attempt,
        }))
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), QueueError> {
        self.conn
            .xack::<_, _, _, ()>(
                &self.topics.work_stream,
                &self.topics.consumer_group,
                &[&delivery.id],
            )
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

/// Entries without a decodable body still get delivered so the worker can
/// dead-letter and acknowledge them instead of replaying forever.
fn decode_payload(raw: Option<String>) -> serde_json::Value {
    match raw {
        Some(raw) => serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw)),
        None => serde_json::Value::Null,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_work_item_wire_format() {
        let item = WorkItem::new(42, Some(7));
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["item_id"], 42);
        assert_eq!(value["task_id"], 7);
        assert!(value["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_legacy_work_item_without_task_id() {
        let delivery = Delivery {
            id: "1-0".to_string(),
            payload: json!({"item_id": 42, "timestamp": "2024-05-01T10:00:00.000000Z"}),
            attempt: 1,
        };
        let item = delivery.work_item().unwrap();
        assert_eq!(item.item_id, 42);
        assert_eq!(item.task_id, None);
    }

    #[test]
    fn test_malformed_payload_is_rejected() {
        let delivery = Delivery {
            id: "1-0".to_string(),
            payload: json!({"item": "42"}),
            attempt: 1,
        };
        assert!(matches!(delivery.work_item(), Err(QueueError::Serialize(_))));
    }

    #[test]
    fn test_undecodable_payloads_are_still_delivered() {
        assert_eq!(decode_payload(Some(r#"{"item_id":1}"#.to_string()))["item_id"], 1);
        assert_eq!(decode_payload(Some("not json".to_string())), json!("not json"));
        assert_eq!(decode_payload(None), serde_json::Value::Null);
    }

    #[test]
    fn test_dead_letter_wire_format() {
        let record = DeadLetterRecord {
            original_message: json!({"item_id": 999}),
            error: "item 999 not found".to_string(),
            timestamp: Utc::now(),
            retry_count: 1,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["original_message"]["item_id"], 999);
        assert_eq!(value["error"], "item 999 not found");
        assert_eq!(value["retry_count"], 1);
        assert!(value["timestamp"].is_string());
    }
}
