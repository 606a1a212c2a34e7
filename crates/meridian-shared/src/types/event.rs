use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Event taxonomy from `spec.md` §3. Closed set — the store never emits a
/// type outside this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskEventType {
    Created,
    Updated,
    Deleted,
    StatusChanged,
    PriorityChanged,
    Assigned,
    Unassigned,
    Blocked,
    Unblocked,
    Completed,
    Failed,
    Cancelled,
    DependencyAdded,
    DependencyRemoved,
    CommentAdded,
    TagAdded,
    TagRemoved,
    WebhookReceived,
    Synced,
}

/// Immutable append-only log record. See `spec.md` §3 invariants: ordering is
/// `occurred_at` then `id`; `idempotency_key`, where present, is globally
/// unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub id: Uuid,
    pub task_id: Uuid,
    pub event_type: TaskEventType,
    pub data: Value,
    pub actor: String,
    pub occurred_at: DateTime<Utc>,
    pub correlation_id: Option<String>,
    pub idempotency_key: Option<String>,
}
