use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Dependency kind. Only `Blocks` and `Requires` participate in the
/// cycle-check and scheduling; `Related` is an undirected annotation layer
/// (`spec.md` §9, "Open question — cycle check on RELATED").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DependencyType {
    Blocks,
    Requires,
    Related,
}

impl DependencyType {
    /// Whether this edge type participates in cycle prevention and
    /// topological ordering (`spec.md` §4.4 step 4, §4.7 step 1).
    pub fn is_ordered(&self) -> bool {
        matches!(self, Self::Blocks | Self::Requires)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DependencyStatus {
    Pending,
    Satisfied,
    Failed,
    Blocked,
}

/// A directed edge `source_task -> target_task`. See `spec.md` §3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    pub id: Uuid,
    pub source_task: Uuid,
    pub target_task: Uuid,
    pub dependency_type: DependencyType,
    pub status: DependencyStatus,
    pub source_repo: String,
    pub target_repo: String,
    pub is_cross_repo: bool,
    pub created_at: DateTime<Utc>,
}
