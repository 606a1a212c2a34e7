//! Normalises external issues, applies an import filter, and creates tasks
//! idempotently via `TaskStore` (`spec.md` §4.10).

use crate::receiver::WebhookSource;
use chrono::{DateTime, Utc};
use meridian_shared::types::{TaskDraft, TaskPriority};
use meridian_shared::MeridianError;
use meridian_store::TaskStore;
use serde_json::{json, Value};
use sqlx::PgPool;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ExternalIssue {
    pub external_id: String,
    pub source: WebhookSource,
    pub title: String,
    pub description: String,
    pub status: String,
    pub labels: Vec<String>,
    pub url: String,
    pub repository: String,
    pub assignees: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ExternalIssue {
    /// Parses the `issue` sub-payload of a GitHub `issues` webhook event.
    /// `repository` comes from the event's top-level `repository.full_name`,
    /// which the issue object itself does not carry.
    pub fn from_github_issue(issue: &Value, repository: String) -> Self {
        let labels = issue
            .get("labels")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|l| l.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let assignees = issue
            .get("assignees")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|a| a.get("login").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            external_id: issue_id(issue, "number"),
            source: WebhookSource::Github,
            title: text(issue, "title"),
            description: text(issue, "body"),
            status: issue.get("state").and_then(Value::as_str).unwrap_or("open").to_string(),
            labels,
            url: text(issue, "html_url"),
            repository,
            assignees,
            created_at: parse_timestamp(issue.get("created_at")),
            updated_at: parse_timestamp(issue.get("updated_at")),
        }
    }

    /// Parses the `object_attributes` sub-payload of a GitLab `issue` event.
    pub fn from_gitlab_issue(attrs: &Value, repository: String) -> Self {
        let labels = attrs
            .get("labels")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|l| {
                        l.as_str()
                            .map(str::to_string)
                            .or_else(|| l.get("title").and_then(Value::as_str).map(str::to_string))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            external_id: issue_id(attrs, "iid"),
            source: WebhookSource::Gitlab,
            title: text(attrs, "title"),
            description: text(attrs, "description"),
            status: attrs.get("state").and_then(Value::as_str).unwrap_or("opened").to_string(),
            labels,
            url: text(attrs, "url"),
            repository,
            assignees: Vec::new(),
            created_at: parse_timestamp(attrs.get("created_at")),
            updated_at: parse_timestamp(attrs.get("updated_at")),
        }
    }
}

fn text(value: &Value, field: &str) -> String {
    value.get(field).and_then(Value::as_str).unwrap_or("").to_string()
}

/// GitHub/GitLab both prefer the numeric platform-wide `id`, falling back
/// to the repo-scoped `number`/`iid` when `id` is absent.
fn issue_id(value: &Value, fallback_field: &str) -> String {
    value
        .get("id")
        .or_else(|| value.get(fallback_field))
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_default()
}

fn parse_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[derive(Debug, Clone)]
pub struct IssueMapping {
    pub external_id: String,
    pub source: WebhookSource,
    pub task_id: Uuid,
    pub repository: String,
    pub mapped_at: DateTime<Utc>,
    pub approved: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ImportFilter {
    pub repository_allow_list: Option<BTreeSet<String>>,
    pub label_allow_list: Option<BTreeSet<String>>,
    pub import_closed: bool,
}

#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub filter: ImportFilter,
    pub auto_approve: bool,
    pub default_priority: TaskPriority,
    pub default_repository: String,
    pub actor: String,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            filter: ImportFilter::default(),
            auto_approve: false,
            default_priority: TaskPriority::Medium,
            default_repository: "meridian".to_string(),
            actor: "webhook-importer".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImportBatch {
    pub imported: usize,
    pub skipped: usize,
    pub failed: usize,
    pub imported_task_ids: Vec<Uuid>,
    pub errors: Vec<String>,
}

impl ImportBatch {
    pub fn total_processed(&self) -> usize {
        self.imported + self.skipped + self.failed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    Imported(Uuid),
    Skipped,
}

/// Filter + dedup set + mapping table for inbound issues. In-process state
/// only — a restart loses mappings, mirroring the teacher's in-memory cache.
#[derive(Debug)]
pub struct IssueImporter {
    config: ImportConfig,
    imported_ids: Mutex<HashSet<String>>,
    mappings: Mutex<BTreeMap<String, IssueMapping>>,
}

impl IssueImporter {
    pub fn new(config: ImportConfig) -> Self {
        Self {
            config,
            imported_ids: Mutex::new(HashSet::new()),
            mappings: Mutex::new(BTreeMap::new()),
        }
    }

    fn dedup_key(issue: &ExternalIssue) -> String {
        format!("{}:{}", issue.source.as_str(), issue.external_id)
    }

    pub fn should_import(&self, issue: &ExternalIssue) -> bool {
        let key = Self::dedup_key(issue);
        if self.imported_ids.lock().expect("lock poisoned").contains(&key) {
            return false;
        }
        if !self.config.filter.import_closed && matches!(issue.status.as_str(), "closed" | "merged") {
            return false;
        }
        if let Some(allow) = &self.config.filter.repository_allow_list {
            if !allow.contains(&issue.repository) {
                return false;
            }
        }
        if let Some(allow) = &self.config.filter.label_allow_list {
            if !issue.labels.iter().any(|l| allow.contains(l)) {
                return false;
            }
        }
        true
    }

    /// Creates a task for `issue` if it passes the filter. Unlike the
    /// prototype this ported from, any `should_import` rejection — dedup,
    /// closed status, repo/label filter — is reported as `Skipped`, not
    /// `Failed`; only a genuine `TaskStore` error is a failure.
    pub async fn import_issue(
        &self,
        pool: &PgPool,
        issue: &ExternalIssue,
    ) -> Result<ImportOutcome, MeridianError> {
        if !self.should_import(issue) {
            return Ok(ImportOutcome::Skipped);
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("external_source".to_string(), json!(issue.source.as_str()));
        metadata.insert("external_id".to_string(), json!(issue.external_id));
        metadata.insert("external_url".to_string(), json!(issue.url));
        metadata.insert("external_repository".to_string(), json!(issue.repository));

        let key = Self::dedup_key(issue);
        let draft = TaskDraft {
            title: issue.title.clone(),
            repository: self.config.default_repository.clone(),
            description: Some(issue.description.clone()),
            priority: Some(self.config.default_priority),
            assignee: issue.assignees.first().cloned(),
            tags: issue.labels.iter().cloned().collect(),
            metadata,
            due_date: None,
            external_id: Some(key.clone()),
            created_by: self.config.actor.clone(),
        };

        let task = TaskStore::create(pool, draft).await?;

        self.imported_ids.lock().expect("lock poisoned").insert(key.clone());
        self.mappings.lock().expect("lock poisoned").insert(
            key,
            IssueMapping {
                external_id: issue.external_id.clone(),
                source: issue.source,
                task_id: task.id,
                repository: task.repository.clone(),
                mapped_at: Utc::now(),
                approved: self.config.auto_approve,
            },
        );

        Ok(ImportOutcome::Imported(task.id))
    }

    pub async fn import_batch(&self, pool: &PgPool, issues: &[ExternalIssue]) -> ImportBatch {
        let mut batch = ImportBatch::default();
        for issue in issues {
            match self.import_issue(pool, issue).await {
                Ok(ImportOutcome::Imported(task_id)) => {
                    batch.imported += 1;
                    batch.imported_task_ids.push(task_id);
                }
                Ok(ImportOutcome::Skipped) => batch.skipped += 1,
                Err(e) => {
                    batch.failed += 1;
                    batch.errors.push(format!("failed to import issue {}: {e}", issue.external_id));
                }
            }
        }
        batch
    }

    pub fn mapping(&self, external_id: &str, source: WebhookSource) -> Option<IssueMapping> {
        let key = format!("{}:{}", source.as_str(), external_id);
        self.mappings.lock().expect("lock poisoned").get(&key).cloned()
    }

    pub fn all_mappings(&self) -> Vec<IssueMapping> {
        self.mappings.lock().expect("lock poisoned").values().cloned().collect()
    }

    pub fn clear(&self) {
        self.imported_ids.lock().expect("lock poisoned").clear();
        self.mappings.lock().expect("lock poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(status: &str, repo: &str, labels: &[&str]) -> ExternalIssue {
        ExternalIssue {
            external_id: "42".to_string(),
            source: WebhookSource::Github,
            title: "a bug".to_string(),
            description: "steps to reproduce".to_string(),
            status: status.to_string(),
            labels: labels.iter().map(|s| s.to_string()).collect(),
            url: "https://example.com/issues/42".to_string(),
            repository: repo.to_string(),
            assignees: vec![],
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn should_import_skips_closed_by_default() {
        let importer = IssueImporter::new(ImportConfig::default());
        assert!(!importer.should_import(&issue("closed", "owner/repo", &["bug"])));
    }

    #[test]
    fn should_import_allows_closed_when_configured() {
        let config = ImportConfig {
            filter: ImportFilter { import_closed: true, ..Default::default() },
            ..Default::default()
        };
        let importer = IssueImporter::new(config);
        assert!(importer.should_import(&issue("closed", "owner/repo", &["bug"])));
    }

    #[test]
    fn should_import_rejects_repo_outside_allow_list() {
        let config = ImportConfig {
            filter: ImportFilter {
                repository_allow_list: Some(BTreeSet::from(["owner/other".to_string()])),
                ..Default::default()
            },
            ..Default::default()
        };
        let importer = IssueImporter::new(config);
        assert!(!importer.should_import(&issue("open", "owner/repo", &["bug"])));
    }

    #[test]
    fn should_import_requires_any_allow_listed_label() {
        let config = ImportConfig {
            filter: ImportFilter {
                label_allow_list: Some(BTreeSet::from(["feature".to_string()])),
                ..Default::default()
            },
            ..Default::default()
        };
        let importer = IssueImporter::new(config);
        assert!(!importer.should_import(&issue("open", "owner/repo", &["bug"])));
        assert!(importer.should_import(&issue("open", "owner/repo", &["bug", "feature"])));
    }

    #[test]
    fn from_github_issue_extracts_labels_and_assignees() {
        let payload = json!({
            "id": 12345,
            "number": 42,
            "title": "New bug report",
            "body": "Description of the bug",
            "state": "open",
            "labels": [{"name": "bug"}],
            "assignees": [{"login": "alice"}],
            "html_url": "https://github.com/owner/test-repo/issues/42",
        });
        let parsed = ExternalIssue::from_github_issue(&payload, "owner/test-repo".to_string());
        assert_eq!(parsed.external_id, "12345");
        assert_eq!(parsed.labels, vec!["bug".to_string()]);
        assert_eq!(parsed.assignees, vec!["alice".to_string()]);
        assert_eq!(parsed.repository, "owner/test-repo");
    }

    #[test]
    fn from_gitlab_issue_unwraps_label_objects() {
        let payload = json!({
            "iid": 7,
            "title": "A GitLab issue",
            "description": "details",
            "state": "opened",
            "labels": [{"title": "bug"}, "triage"],
            "url": "https://gitlab.com/owner/test-repo/issues/7",
        });
        let parsed = ExternalIssue::from_gitlab_issue(&payload, "owner/test-repo".to_string());
        assert_eq!(parsed.external_id, "7");
        assert_eq!(parsed.labels, vec!["bug".to_string(), "triage".to_string()]);
    }

    #[test]
    fn import_batch_totals_match_processed_count() {
        let batch = ImportBatch {
            imported: 2,
            skipped: 1,
            failed: 1,
            ..Default::default()
        };
        assert_eq!(batch.total_processed(), 4);
    }
}
