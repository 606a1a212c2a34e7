use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// `spec.md` §3 status set. Ordering here is declaration order, not the
/// sort order used by `Filter` (see `meridian-projections::filter::status_rank`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Blocked,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Blocked => "blocked",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Medium
    }
}

/// A unit of work tracked by the store. See `spec.md` §3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub repository: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub assignee: Option<String>,
    pub tags: BTreeSet<String>,
    pub metadata: BTreeMap<String, Value>,
    pub due_date: Option<DateTime<Utc>>,
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_by: String,
}

/// Input to `TaskStore::create`. Validated per `spec.md` §4.3 before a `Task`
/// is ever constructed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskDraft {
    pub title: String,
    pub repository: String,
    pub description: Option<String>,
    pub priority: Option<TaskPriority>,
    pub assignee: Option<String>,
    pub tags: BTreeSet<String>,
    pub metadata: BTreeMap<String, Value>,
    pub due_date: Option<DateTime<Utc>>,
    pub external_id: Option<String>,
    pub created_by: String,
}

/// Sparse patch applied by `TaskStore::update`. Only `Some` fields are
/// written, and only those fields appear in the emitted UPDATED event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub assignee: Option<Option<String>>,
    pub tags: Option<BTreeSet<String>>,
    pub metadata: Option<BTreeMap<String, Value>>,
    pub due_date: Option<Option<DateTime<Utc>>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.assignee.is_none()
            && self.tags.is_none()
            && self.metadata.is_none()
            && self.due_date.is_none()
    }
}

/// Title-length and repository-non-empty checks from `spec.md` §3/§4.3.
pub fn validate_draft(draft: &TaskDraft) -> Result<(), String> {
    let len = draft.title.chars().count();
    if !(3..=500).contains(&len) {
        return Err(format!(
            "title must be between 3 and 500 characters, got {len}"
        ));
    }
    if draft.repository.trim().is_empty() {
        return Err("repository must not be empty".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(title: &str, repo: &str) -> TaskDraft {
        TaskDraft {
            title: title.to_string(),
            repository: repo.to_string(),
            created_by: "tester".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn title_length_exactly_3_passes() {
        assert!(validate_draft(&draft("abc", "repo")).is_ok());
    }

    #[test]
    fn title_length_2_is_rejected() {
        assert!(validate_draft(&draft("ab", "repo")).is_err());
    }

    #[test]
    fn title_length_exactly_500_passes() {
        let title = "x".repeat(500);
        assert!(validate_draft(&draft(&title, "repo")).is_ok());
    }

    #[test]
    fn title_length_501_is_rejected() {
        let title = "x".repeat(501);
        assert!(validate_draft(&draft(&title, "repo")).is_err());
    }

    #[test]
    fn empty_repository_is_rejected() {
        assert!(validate_draft(&draft("valid title", "")).is_err());
    }

    #[test]
    fn default_priority_is_medium() {
        assert_eq!(TaskPriority::default(), TaskPriority::Medium);
    }
}
