use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle state of a moderation task.
///
/// `Completed` and `Failed` are terminal: the store refuses any transition
/// out of them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// A row of `moderation_results`, decoded at the store boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationTask {
    pub id: i64,
    pub item_id: i64,
    pub status: TaskStatus,
    pub is_violation: Option<bool>,
    pub probability: Option<f64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// What a task currently says about its item.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Pending,
    Completed { is_violation: bool, probability: f64 },
    Failed { error_message: String },
}

impl ModerationTask {
    /// Fresh pending task as the store creates it.
    pub fn pending(id: i64, item_id: i64, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            item_id,
            status: TaskStatus::Pending,
            is_violation: None,
            probability: None,
            error_message: None,
            created_at,
            processed_at: None,
        }
    }

    /// Interpret the nullable columns according to `status`.
    ///
    /// Returns `None` when the row breaks the outcome invariant, e.g. a
    /// completed task without a probability.
    pub fn outcome(&self) -> Option<TaskOutcome> {
        match self.status {
            TaskStatus::Pending => {
                if self.is_violation.is_some()
                    || self.probability.is_some()
                    || self.error_message.is_some()
                {
                    return None;
                }
                Some(TaskOutcome::Pending)
            }
            TaskStatus::Completed => match (self.is_violation, self.probability) {
                (Some(is_violation), Some(probability)) if self.error_message.is_none() => {
                    Some(TaskOutcome::Completed {
                        is_violation,
                        probability,
                    })
                }
                _ => None,
            },
            TaskStatus::Failed => match &self.error_message {
                Some(msg) if self.is_violation.is_none() && self.probability.is_none() => {
                    Some(TaskOutcome::Failed {
                        error_message: msg.clone(),
                    })
                }
                _ => None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn task(status: TaskStatus) -> ModerationTask {
        ModerationTask {
            status,
            ..ModerationTask::pending(1, 42, Utc::now())
        }
    }

    #[test]
    fn test_status_string_forms() {
        assert_eq!(TaskStatus::Pending.to_string(), "pending");
        assert_eq!(TaskStatus::from_str("completed").unwrap(), TaskStatus::Completed);
        assert_eq!(TaskStatus::from_str("failed").unwrap(), TaskStatus::Failed);
        assert!(TaskStatus::from_str("processing").is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }

    #[test]
    fn test_outcome_follows_status() {
        assert_eq!(task(TaskStatus::Pending).outcome(), Some(TaskOutcome::Pending));

        let mut completed = task(TaskStatus::Completed);
        completed.is_violation = Some(true);
        completed.probability = Some(0.82);
        assert_eq!(
            completed.outcome(),
            Some(TaskOutcome::Completed {
                is_violation: true,
                probability: 0.82
            })
        );

        let mut failed = task(TaskStatus::Failed);
        failed.error_message = Some("item 7 not found".to_string());
        assert!(matches!(failed.outcome(), Some(TaskOutcome::Failed { .. })));
    }

    #[test]
    fn test_outcome_rejects_mixed_rows() {
        // completed without probability
        let mut completed = task(TaskStatus::Completed);
        completed.is_violation = Some(false);
        assert_eq!(completed.outcome(), None);

        // failed that also carries a score
        let mut failed = task(TaskStatus::Failed);
        failed.error_message = Some("boom".to_string());
        failed.probability = Some(0.1);
        assert_eq!(failed.outcome(), None);
    }
}
