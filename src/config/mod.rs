use serde::Deserialize;
use std::time::Duration;

use crate::services::queue::QueueTopics;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8003"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Upper bound of the shared connection pool
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// Redis connection string for the moderation streams
    pub redis_url: String,

    /// Where the classifier coefficients are read from (and first written to)
    #[serde(default = "default_model_path")]
    pub model_path: String,

    #[serde(default = "default_work_stream")]
    pub work_stream: String,

    #[serde(default = "default_dead_letter_stream")]
    pub dead_letter_stream: String,

    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// Consumer name inside the group. Give each worker a stable name so a
    /// restarted worker picks up its own unacknowledged entries.
    pub consumer_name: Option<String>,

    /// Idle time after which entries left unacknowledged by another
    /// consumer are claimed by this one
    #[serde(default = "default_claim_idle_ms")]
    pub claim_idle_ms: u64,

    /// Prometheus listener for the worker process, e.g. "0.0.0.0:9091"
    pub worker_metrics_addr: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8003".to_string()
}

fn default_db_max_connections() -> u32 {
    20
}

fn default_model_path() -> String {
    "model.json".to_string()
}

fn default_work_stream() -> String {
    "moderation".to_string()
}

fn default_dead_letter_stream() -> String {
    "moderation_dlq".to_string()
}

fn default_consumer_group() -> String {
    "moderation-worker-group".to_string()
}

fn default_claim_idle_ms() -> u64 {
    60_000
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn queue_topics(&self) -> QueueTopics {
        QueueTopics {
            work_stream: self.work_stream.clone(),
            dead_letter_stream: self.dead_letter_stream.clone(),
            consumer_group: self.consumer_group.clone(),
        }
    }

    pub fn consumer_name(&self) -> String {
        self.consumer_name
            .clone()
            .unwrap_or_else(|| format!("worker-{}", uuid::Uuid::new_v4()))
    }

    pub fn claim_idle(&self) -> Duration {
        Duration::from_millis(self.claim_idle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_env() {
        let vars = vec![
            ("DATABASE_URL".to_string(), "postgres://localhost/moderation".to_string()),
            ("REDIS_URL".to_string(), "redis://localhost:6379".to_string()),
        ];
        let config: AppConfig = envy::from_iter(vars).unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:8003");
        assert_eq!(config.db_max_connections, 20);
        assert_eq!(config.model_path, "model.json");

        let topics = config.queue_topics();
        assert_eq!(topics.work_stream, "moderation");
        assert_eq!(topics.dead_letter_stream, "moderation_dlq");
        assert_eq!(topics.consumer_group, "moderation-worker-group");
        assert!(config.consumer_name().starts_with("worker-"));
        assert_eq!(config.claim_idle(), Duration::from_secs(60));
    }

    #[test]
    fn test_missing_database_url_fails() {
        let vars = vec![("REDIS_URL".to_string(), "redis://localhost:6379".to_string())];
        assert!(envy::from_iter::<_, AppConfig>(vars).is_err());
    }
}
