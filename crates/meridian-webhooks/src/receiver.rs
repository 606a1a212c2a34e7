//! Verifies, parses, classifies, and idempotently handles inbound webhook
//! deliveries from two upstreams (`spec.md` §4.10). Stays transport-agnostic:
//! callers (the `meridian-server` Axum routes) extract the raw body and
//! headers and pass them in, so this is testable without a live socket.

use crate::importer::{ExternalIssue, ImportOutcome, IssueImporter};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

const MAX_PROCESSED_EVENTS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookSource {
    Github,
    Gitlab,
}

impl WebhookSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Github => "github",
            Self::Gitlab => "gitlab",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Push,
    IssueOpened,
    IssueClosed,
    IssueUpdated,
    PullRequest,
    MergeRequest,
    Unknown,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::IssueOpened => "issue_opened",
            Self::IssueClosed => "issue_closed",
            Self::IssueUpdated => "issue_updated",
            Self::PullRequest => "pull_request",
            Self::MergeRequest => "merge_request",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub event_id: String,
    pub source: WebhookSource,
    pub event_type: EventType,
    pub repository: String,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
    pub sender: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WebhookResult {
    pub success: bool,
    pub message: String,
    pub actions_taken: Vec<String>,
    pub error: Option<String>,
    pub event_id: Option<String>,
}

impl WebhookResult {
    fn failure(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// FIFO dedup cache of `source:event_id` keys, capped at
/// `MAX_PROCESSED_EVENTS`, mirroring the teacher's `OrderedDict`-based cache.
#[derive(Debug, Default)]
struct ProcessedCache {
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl ProcessedCache {
    fn contains(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    fn insert(&mut self, key: String) {
        if self.seen.insert(key.clone()) {
            self.order.push_back(key);
            while self.order.len() > MAX_PROCESSED_EVENTS {
                if let Some(oldest) = self.order.pop_front() {
                    self.seen.remove(&oldest);
                }
            }
        }
    }
}

#[derive(Debug)]
pub struct WebhookReceiver {
    github_secret: Option<String>,
    gitlab_token: Option<String>,
    processed: Mutex<ProcessedCache>,
}

impl WebhookReceiver {
    pub fn new(github_secret: Option<String>, gitlab_token: Option<String>) -> Self {
        Self {
            github_secret,
            gitlab_token,
            processed: Mutex::new(ProcessedCache::default()),
        }
    }

    pub fn verify_github_signature(&self, body: &[u8], signature: &str) -> bool {
        match &self.github_secret {
            None => true,
            Some(secret) => crate::signature::verify_hmac_signature(secret.as_bytes(), body, signature),
        }
    }

    pub fn verify_gitlab_token(&self, token: Option<&str>) -> bool {
        match &self.gitlab_token {
            None => true,
            Some(expected) => token.is_some_and(|t| crate::signature::verify_static_token(expected, t)),
        }
    }

    pub fn classify_github_event(event_type: &str, payload: &Value) -> EventType {
        match event_type {
            "push" => EventType::Push,
            "issues" => match payload.get("action").and_then(Value::as_str) {
                Some("opened") => EventType::IssueOpened,
                Some("closed") => EventType::IssueClosed,
                _ => EventType::IssueUpdated,
            },
            "pull_request" => EventType::PullRequest,
            _ => EventType::Unknown,
        }
    }

    pub fn classify_gitlab_event(object_kind: &str, payload: &Value) -> EventType {
        match object_kind {
            "push" => EventType::Push,
            "issue" => match payload.get("action").and_then(Value::as_str) {
                Some("open") => EventType::IssueOpened,
                Some("close") => EventType::IssueClosed,
                _ => EventType::IssueUpdated,
            },
            "merge_request" => EventType::MergeRequest,
            _ => EventType::Unknown,
        }
    }

    pub fn parse_github_event(event_type: &str, payload: Value) -> WebhookEvent {
        let repository = payload
            .get("repository")
            .and_then(|r| r.get("full_name"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let event_id = payload
            .get("hook_id")
            .map(|v| v.to_string())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let sender = payload
            .get("sender")
            .and_then(|s| s.get("login"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let event_type = Self::classify_github_event(event_type, &payload);

        WebhookEvent {
            event_id,
            source: WebhookSource::Github,
            event_type,
            repository,
            payload,
            received_at: Utc::now(),
            sender,
        }
    }

    pub fn parse_gitlab_event(payload: Value) -> WebhookEvent {
        let repository = payload
            .get("project")
            .and_then(|p| p.get("path_with_namespace"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let event_id = payload
            .get("object_id")
            .map(|v| v.to_string())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let sender = payload
            .get("user_username")
            .or_else(|| payload.get("user_name"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let object_kind = payload.get("object_kind").and_then(Value::as_str).unwrap_or("");
        let event_type = Self::classify_gitlab_event(object_kind, &payload);

        WebhookEvent {
            event_id,
            source: WebhookSource::Gitlab,
            event_type,
            repository,
            payload,
            received_at: Utc::now(),
            sender,
        }
    }

    pub async fn handle_github_delivery(
        &self,
        pool: &PgPool,
        importer: &IssueImporter,
        body: &[u8],
        signature: &str,
        event_type: &str,
    ) -> WebhookResult {
        if !self.verify_github_signature(body, signature) {
            return WebhookResult::failure("Signature verification failed", "Invalid webhook signature");
        }
        let payload: Value = match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(e) => return WebhookResult::failure("Invalid JSON payload", e.to_string()),
        };
        let event = Self::parse_github_event(event_type, payload);
        self.handle_event(pool, importer, event).await
    }

    pub async fn handle_gitlab_delivery(
        &self,
        pool: &PgPool,
        importer: &IssueImporter,
        body: &[u8],
        token: Option<&str>,
    ) -> WebhookResult {
        if !self.verify_gitlab_token(token) {
            return WebhookResult::failure("Token verification failed", "Invalid webhook token");
        }
        let payload: Value = match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(e) => return WebhookResult::failure("Invalid JSON payload", e.to_string()),
        };
        let event = Self::parse_gitlab_event(payload);
        self.handle_event(pool, importer, event).await
    }

    pub async fn handle_event(
        &self,
        pool: &PgPool,
        importer: &IssueImporter,
        event: WebhookEvent,
    ) -> WebhookResult {
        let key = format!("{}:{}", event.source.as_str(), event.event_id);
        {
            let processed = self.processed.lock().expect("lock poisoned");
            if processed.contains(&key) {
                return WebhookResult {
                    success: true,
                    message: "duplicate".to_string(),
                    event_id: Some(event.event_id),
                    ..Default::default()
                };
            }
        }

        let actions = match event.event_type {
            EventType::Push => vec![Self::describe_push(&event)],
            EventType::IssueOpened => self.handle_issue_opened(pool, importer, &event).await,
            other => vec![format!("Unsupported event type: {}", other.as_str())],
        };

        self.processed.lock().expect("lock poisoned").insert(key);

        WebhookResult {
            success: true,
            message: "Event processed successfully".to_string(),
            actions_taken: actions,
            event_id: Some(event.event_id),
            ..Default::default()
        }
    }

    async fn handle_issue_opened(
        &self,
        pool: &PgPool,
        importer: &IssueImporter,
        event: &WebhookEvent,
    ) -> Vec<String> {
        let issue = match event.source {
            WebhookSource::Github => event
                .payload
                .get("issue")
                .map(|v| ExternalIssue::from_github_issue(v, event.repository.clone())),
            WebhookSource::Gitlab => event
                .payload
                .get("object_attributes")
                .map(|v| ExternalIssue::from_gitlab_issue(v, event.repository.clone())),
        };
        let Some(issue) = issue else {
            return vec!["Issue opened event missing issue payload".to_string()];
        };

        match importer.import_issue(pool, &issue).await {
            Ok(ImportOutcome::Imported(task_id)) => {
                vec![format!("Imported issue {} as task {task_id}", issue.external_id)]
            }
            Ok(ImportOutcome::Skipped) => {
                vec![format!("Skipped issue {} (filtered or already imported)", issue.external_id)]
            }
            Err(e) => vec![format!("Failed to import issue {}: {e}", issue.external_id)],
        }
    }

    fn describe_push(event: &WebhookEvent) -> String {
        let commits = event
            .payload
            .get("commits")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);
        let reference = event.payload.get("ref").and_then(Value::as_str).unwrap_or("");
        format!("Received push to {reference} with {commits} commits")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn verify_github_signature_passes_through_when_unconfigured() {
        let receiver = WebhookReceiver::new(None, None);
        assert!(receiver.verify_github_signature(b"anything", "sha256=garbage"));
    }

    #[test]
    fn verify_github_signature_rejects_bad_digest() {
        let receiver = WebhookReceiver::new(Some("secret".to_string()), None);
        assert!(!receiver.verify_github_signature(b"body", "sha256=deadbeef"));
    }

    #[test]
    fn verify_gitlab_token_rejects_missing_header() {
        let receiver = WebhookReceiver::new(None, Some("token".to_string()));
        assert!(!receiver.verify_gitlab_token(None));
        assert!(receiver.verify_gitlab_token(Some("token")));
    }

    #[test]
    fn classify_github_issue_action_opened_is_issue_opened() {
        let event_type = WebhookReceiver::classify_github_event("issues", &json!({"action": "opened"}));
        assert_eq!(event_type, EventType::IssueOpened);
    }

    #[test]
    fn classify_github_issue_action_other_is_issue_updated() {
        let event_type = WebhookReceiver::classify_github_event("issues", &json!({"action": "labeled"}));
        assert_eq!(event_type, EventType::IssueUpdated);
    }

    #[test]
    fn classify_gitlab_merge_request_object_kind() {
        let event_type = WebhookReceiver::classify_gitlab_event("merge_request", &json!({}));
        assert_eq!(event_type, EventType::MergeRequest);
    }

    #[test]
    fn parse_github_event_extracts_repository_and_sender() {
        let payload = json!({
            "repository": {"full_name": "owner/test-repo"},
            "sender": {"login": "octocat"},
            "ref": "refs/heads/main",
            "commits": [{}, {}],
        });
        let event = WebhookReceiver::parse_github_event("push", payload);
        assert_eq!(event.repository, "owner/test-repo");
        assert_eq!(event.sender.as_deref(), Some("octocat"));
        assert_eq!(event.event_type, EventType::Push);
    }

    #[test]
    fn parse_gitlab_event_extracts_project_path() {
        let payload = json!({
            "object_kind": "push",
            "project": {"path_with_namespace": "owner/test-repo"},
            "user_name": "developer",
        });
        let event = WebhookReceiver::parse_gitlab_event(payload);
        assert_eq!(event.repository, "owner/test-repo");
        assert_eq!(event.sender.as_deref(), Some("developer"));
    }

    #[tokio::test]
    async fn processed_cache_rejects_duplicate_key_before_touching_the_pool() {
        let cache_key = "github:dup-1".to_string();
        let mut cache = ProcessedCache::default();
        cache.insert(cache_key.clone());
        assert!(cache.contains(&cache_key));
    }

    #[test]
    fn processed_cache_evicts_oldest_past_capacity() {
        let mut cache = ProcessedCache::default();
        for i in 0..(MAX_PROCESSED_EVENTS + 10) {
            cache.insert(format!("github:{i}"));
        }
        assert_eq!(cache.order.len(), MAX_PROCESSED_EVENTS);
        assert!(!cache.contains("github:0"));
        assert!(cache.contains(&format!("github:{}", MAX_PROCESSED_EVENTS + 9)));
    }
}
