//! # TaskStore
//!
//! The write path: every mutation is one transaction that writes the row
//! change to `tasks` and appends the matching event to `task_events`
//! (`spec.md` §4.3).

use crate::event_log::EventLog;
use chrono::Utc;
use meridian_shared::types::{
    Dependency, DependencyStatus, DependencyType, Task, TaskDraft, TaskEventType, TaskPatch,
    TaskPriority, TaskStatus,
};
use meridian_shared::MeridianError;
use serde_json::{json, Value};
use sqlx::{PgPool, Row};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct TaskFilterSpec {
    pub repository: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub assignee: Option<String>,
    pub tags: Vec<String>,
    pub search: Option<String>,
    pub due_before: Option<chrono::DateTime<Utc>>,
    pub due_after: Option<chrono::DateTime<Utc>>,
    pub created_after: Option<chrono::DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

pub struct TaskStore;

impl TaskStore {
    /// Validate, assign id/timestamps, insert, and emit CREATED — all in one
    /// transaction (`spec.md` §4.3).
    pub async fn create(pool: &PgPool, draft: TaskDraft) -> Result<Task, MeridianError> {
        meridian_shared::types::validate_draft(&draft).map_err(MeridianError::Validation)?;

        let now = Utc::now();
        let task = Task {
            id: Uuid::now_v7(),
            title: draft.title,
            repository: draft.repository,
            description: draft.description,
            status: TaskStatus::Pending,
            priority: draft.priority.unwrap_or_default(),
            assignee: draft.assignee,
            tags: draft.tags,
            metadata: draft.metadata,
            due_date: draft.due_date,
            external_id: draft.external_id,
            created_at: now,
            updated_at: now,
            completed_at: None,
            created_by: draft.created_by,
        };

        let mut tx = pool.begin().await?;

        let insert = sqlx::query(
            r#"
            INSERT INTO tasks
                (id, title, repository, description, status, priority, assignee, tags,
                 metadata, due_date, external_id, created_at, updated_at, completed_at, created_by)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)
            "#,
        )
        .bind(task.id)
        .bind(&task.title)
        .bind(&task.repository)
        .bind(&task.description)
        .bind(task.status)
        .bind(task.priority)
        .bind(&task.assignee)
        .bind(json!(task.tags))
        .bind(json!(task.metadata))
        .bind(task.due_date)
        .bind(&task.external_id)
        .bind(task.created_at)
        .bind(task.updated_at)
        .bind(task.completed_at)
        .bind(&task.created_by)
        .execute(&mut *tx)
        .await;

        if let Err(e) = insert {
            if is_unique_violation(&e, "tasks_external_id_key") {
                return Err(MeridianError::conflict(format!(
                    "external_id {:?} already in use",
                    task.external_id
                )));
            }
            return Err(MeridianError::from(e));
        }

        EventLog::append(
            &mut tx,
            task.id,
            TaskEventType::Created,
            json!({
                "title": task.title,
                "repository": task.repository,
                "status": task.status.as_str(),
                "priority": task.priority.as_str(),
            }),
            &task.created_by,
            None,
            None,
        )
        .await?;

        tx.commit().await?;
        Ok(task)
    }

    /// Runs every draft's creation inside a single transaction; any
    /// validation failure aborts the whole batch (`spec.md` §4.3).
    pub async fn create_batch(
        pool: &PgPool,
        drafts: Vec<TaskDraft>,
        actor: &str,
    ) -> Result<Vec<Task>, MeridianError> {
        for draft in &drafts {
            meridian_shared::types::validate_draft(draft).map_err(MeridianError::Validation)?;
        }

        let mut tx = pool.begin().await?;
        let mut created = Vec::with_capacity(drafts.len());
        let now = Utc::now();

        for mut draft in drafts {
            if draft.created_by.is_empty() {
                draft.created_by = actor.to_string();
            }
            let task = Task {
                id: Uuid::now_v7(),
                title: draft.title,
                repository: draft.repository,
                description: draft.description,
                status: TaskStatus::Pending,
                priority: draft.priority.unwrap_or_default(),
                assignee: draft.assignee,
                tags: draft.tags,
                metadata: draft.metadata,
                due_date: draft.due_date,
                external_id: draft.external_id,
                created_at: now,
                updated_at: now,
                completed_at: None,
                created_by: draft.created_by,
            };

            sqlx::query(
                r#"
                INSERT INTO tasks
                    (id, title, repository, description, status, priority, assignee, tags,
                     metadata, due_date, external_id, created_at, updated_at, completed_at, created_by)
                VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)
                "#,
            )
            .bind(task.id)
            .bind(&task.title)
            .bind(&task.repository)
            .bind(&task.description)
            .bind(task.status)
            .bind(task.priority)
            .bind(&task.assignee)
            .bind(json!(task.tags))
            .bind(json!(task.metadata))
            .bind(task.due_date)
            .bind(&task.external_id)
            .bind(task.created_at)
            .bind(task.updated_at)
            .bind(task.completed_at)
            .bind(&task.created_by)
            .execute(&mut *tx)
            .await?;

            EventLog::append(
                &mut tx,
                task.id,
                TaskEventType::Created,
                json!({"title": task.title, "repository": task.repository}),
                &task.created_by,
                None,
                None,
            )
            .await?;

            created.push(task);
        }

        tx.commit().await?;
        Ok(created)
    }

    pub async fn get(pool: &PgPool, id: Uuid) -> Result<Task, MeridianError> {
        let row = sqlx::query(SELECT_TASK)
            .bind(id)
            .fetch_optional(pool)
            .await?;
        row.map(row_to_task)
            .ok_or_else(|| MeridianError::not_found("task", id.to_string()))
    }

    pub async fn get_by_external_id(
        pool: &PgPool,
        external_id: &str,
    ) -> Result<Option<Task>, MeridianError> {
        let row = sqlx::query(SELECT_TASK_BY_EXTERNAL_ID)
            .bind(external_id)
            .fetch_optional(pool)
            .await?;
        Ok(row.map(row_to_task))
    }

    /// Dynamic column list — only fields present in `patch` are written.
    /// Transitioning to `completed` additionally stamps `completed_at`.
    /// Emits UPDATED with only the changed fields plus logical hints.
    pub async fn update(
        pool: &PgPool,
        id: Uuid,
        patch: TaskPatch,
        actor: &str,
    ) -> Result<Task, MeridianError> {
        if patch.is_empty() {
            return Self::get(pool, id).await;
        }

        let mut tx = pool.begin().await?;

        let existing_row = sqlx::query(SELECT_TASK)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| MeridianError::not_found("task", id.to_string()))?;
        let existing = row_to_task(existing_row);

        let mut sets: Vec<String> = Vec::new();
        let mut changed = serde_json::Map::new();
        let now = Utc::now();
        let mut completed_at = existing.completed_at;

        let mut idx = 1;
        macro_rules! bind_set {
            ($col:expr) => {{
                idx += 1;
                sets.push(format!("{} = ${}", $col, idx));
            }};
        }

        if let Some(title) = &patch.title {
            bind_set!("title");
            changed.insert("title".into(), json!(title));
        }
        if let Some(desc) = &patch.description {
            bind_set!("description");
            changed.insert("description".into(), json!(desc));
        }
        if let Some(status) = patch.status {
            bind_set!("status");
            changed.insert("new_status".into(), json!(status.as_str()));
            if status == TaskStatus::Completed {
                bind_set!("completed_at");
                completed_at = Some(now);
            }
        }
        if let Some(priority) = patch.priority {
            bind_set!("priority");
            changed.insert("new_priority".into(), json!(priority.as_str()));
        }
        if let Some(assignee) = &patch.assignee {
            bind_set!("assignee");
            changed.insert("assignee".into(), json!(assignee));
        }
        if let Some(tags) = &patch.tags {
            bind_set!("tags");
            changed.insert("tags".into(), json!(tags));
        }
        if let Some(metadata) = &patch.metadata {
            bind_set!("metadata");
            changed.insert("metadata".into(), json!(metadata));
        }
        if let Some(due_date) = &patch.due_date {
            bind_set!("due_date");
            changed.insert("due_date".into(), json!(due_date));
        }
        bind_set!("updated_at");

        // assignee/due_date are `Option<Option<T>>`: the outer `Some` means
        // "touch this column", the inner value is the new (possibly null)
        // content.

        let sql = format!(
            "UPDATE tasks SET {} WHERE id = $1",
            sets.join(", ")
        );
        let mut query = sqlx::query(&sql).bind(id);
        if let Some(title) = &patch.title {
            query = query.bind(title);
        }
        if let Some(desc) = &patch.description {
            query = query.bind(desc);
        }
        if let Some(status) = patch.status {
            query = query.bind(status);
            if status == TaskStatus::Completed {
                query = query.bind(completed_at);
            }
        }
        if let Some(priority) = patch.priority {
            query = query.bind(priority);
        }
        if let Some(assignee) = &patch.assignee {
            query = query.bind(assignee.clone());
        }
        if let Some(tags) = &patch.tags {
            query = query.bind(json!(tags));
        }
        if let Some(metadata) = &patch.metadata {
            query = query.bind(json!(metadata));
        }
        if let Some(due_date) = &patch.due_date {
            query = query.bind(*due_date);
        }
        query = query.bind(now);

        query.execute(&mut *tx).await?;

        EventLog::append(
            &mut tx,
            id,
            TaskEventType::Updated,
            Value::Object(changed),
            actor,
            None,
            None,
        )
        .await?;

        tx.commit().await?;
        Self::get(pool, id).await
    }

    /// Appends DELETED then removes the row; the event is retained for
    /// history even though subsequent `get`s return `NOT_FOUND`.
    pub async fn delete(pool: &PgPool, id: Uuid, actor: &str) -> Result<(), MeridianError> {
        let mut tx = pool.begin().await?;

        let exists = sqlx::query("SELECT 1 FROM tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(MeridianError::not_found("task", id.to_string()));
        }

        EventLog::append(&mut tx, id, TaskEventType::Deleted, json!({}), actor, None, None)
            .await?;

        sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Single SQL update plus one STATUS_CHANGED event per id, in one
    /// transaction. `completed_at` is set uniformly to the transaction's
    /// timestamp when transitioning to `completed`.
    pub async fn update_status_batch(
        pool: &PgPool,
        ids: &[Uuid],
        status: TaskStatus,
        actor: &str,
    ) -> Result<usize, MeridianError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut tx = pool.begin().await?;
        let now = Utc::now();
        let completed_at = if status == TaskStatus::Completed {
            Some(now)
        } else {
            None
        };

        let affected = sqlx::query(
            "UPDATE tasks SET status = $1, updated_at = $2, completed_at = COALESCE($3, completed_at)
             WHERE id = ANY($4)",
        )
        .bind(status)
        .bind(now)
        .bind(completed_at)
        .bind(ids)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        for &id in ids {
            EventLog::append(
                &mut tx,
                id,
                TaskEventType::StatusChanged,
                json!({"new_status": status.as_str()}),
                actor,
                None,
                None,
            )
            .await?;
        }

        tx.commit().await?;
        Ok(affected as usize)
    }

    pub async fn list(pool: &PgPool, filter: &TaskFilterSpec) -> Result<Vec<Task>, MeridianError> {
        let (where_clause, binds) = build_where(filter);
        let limit = if filter.limit > 0 { filter.limit } else { 50 };
        let sql = format!(
            "SELECT id, title, repository, description, status, priority, assignee, tags, metadata,
                    due_date, external_id, created_at, updated_at, completed_at, created_by
             FROM tasks {where_clause}
             ORDER BY created_at DESC, id DESC
             LIMIT {} OFFSET {}",
            limit, filter.offset
        );
        let mut query = sqlx::query(&sql);
        for bind in binds {
            query = bind.apply(query);
        }
        let rows = query.fetch_all(pool).await?;
        Ok(rows.into_iter().map(row_to_task).collect())
    }

    pub async fn count(pool: &PgPool, filter: &TaskFilterSpec) -> Result<i64, MeridianError> {
        let (where_clause, binds) = build_where(filter);
        let sql = format!("SELECT COUNT(*) AS n FROM tasks {where_clause}");
        let mut query = sqlx::query(&sql);
        for bind in binds {
            query = bind.apply(query);
        }
        let row = query.fetch_one(pool).await?;
        Ok(row.get::<i64, _>("n"))
    }

    pub async fn add_dependency(
        pool: &PgPool,
        source: Uuid,
        target: Uuid,
        dep_type: DependencyType,
        actor: &str,
    ) -> Result<Dependency, MeridianError> {
        if source == target {
            return Err(MeridianError::validation("a task cannot depend on itself"));
        }
        let source_task = Self::get(pool, source).await?;
        let target_task = Self::get(pool, target).await?;

        let dep = Dependency {
            id: Uuid::now_v7(),
            source_task: source,
            target_task: target,
            dependency_type: dep_type,
            status: DependencyStatus::Pending,
            source_repo: source_task.repository.clone(),
            target_repo: target_task.repository.clone(),
            is_cross_repo: source_task.repository != target_task.repository,
            created_at: Utc::now(),
        };

        let mut tx = pool.begin().await?;
        let insert = sqlx::query(
            r#"
            INSERT INTO task_dependencies
                (id, source_task, target_task, dependency_type, status, source_repo, target_repo, is_cross_repo, created_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
            "#,
        )
        .bind(dep.id)
        .bind(dep.source_task)
        .bind(dep.target_task)
        .bind(dep.dependency_type)
        .bind(dep.status)
        .bind(&dep.source_repo)
        .bind(&dep.target_repo)
        .bind(dep.is_cross_repo)
        .bind(dep.created_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = insert {
            if is_unique_violation(&e, "task_dependencies_source_task_target_task_key") {
                return Err(MeridianError::conflict("dependency already exists"));
            }
            return Err(MeridianError::from(e));
        }

        EventLog::append(
            &mut tx,
            source,
            TaskEventType::DependencyAdded,
            json!({"target": target, "type": dep_type}),
            actor,
            None,
            None,
        )
        .await?;

        tx.commit().await?;
        Ok(dep)
    }

    pub async fn remove_dependency(
        pool: &PgPool,
        edge_id: Uuid,
        actor: &str,
    ) -> Result<bool, MeridianError> {
        let mut tx = pool.begin().await?;
        let row = sqlx::query("SELECT source_task FROM task_dependencies WHERE id = $1")
            .bind(edge_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Ok(false);
        };
        let source_task: Uuid = row.get("source_task");

        sqlx::query("DELETE FROM task_dependencies WHERE id = $1")
            .bind(edge_id)
            .execute(&mut *tx)
            .await?;

        EventLog::append(
            &mut tx,
            source_task,
            TaskEventType::DependencyRemoved,
            json!({"edge_id": edge_id}),
            actor,
            None,
            None,
        )
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    pub async fn dependencies(pool: &PgPool, task_id: Uuid) -> Result<Vec<Dependency>, MeridianError> {
        let rows = sqlx::query(
            "SELECT id, source_task, target_task, dependency_type, status, source_repo, target_repo, is_cross_repo, created_at
             FROM task_dependencies WHERE source_task = $1",
        )
        .bind(task_id)
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(row_to_dependency).collect())
    }

    pub async fn dependents(pool: &PgPool, task_id: Uuid) -> Result<Vec<Dependency>, MeridianError> {
        let rows = sqlx::query(
            "SELECT id, source_task, target_task, dependency_type, status, source_repo, target_repo, is_cross_repo, created_at
             FROM task_dependencies WHERE target_task = $1",
        )
        .bind(task_id)
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(row_to_dependency).collect())
    }
}

const SELECT_TASK: &str = "SELECT id, title, repository, description, status, priority, assignee, tags, metadata, due_date, external_id, created_at, updated_at, completed_at, created_by FROM tasks WHERE id = $1";
const SELECT_TASK_BY_EXTERNAL_ID: &str = "SELECT id, title, repository, description, status, priority, assignee, tags, metadata, due_date, external_id, created_at, updated_at, completed_at, created_by FROM tasks WHERE external_id = $1";

fn row_to_task(row: sqlx::postgres::PgRow) -> Task {
    let tags_json: Value = row.get("tags");
    let metadata_json: Value = row.get("metadata");
    Task {
        id: row.get("id"),
        title: row.get("title"),
        repository: row.get("repository"),
        description: row.get("description"),
        status: row.get("status"),
        priority: row.get("priority"),
        assignee: row.get("assignee"),
        tags: serde_json::from_value::<BTreeSet<String>>(tags_json).unwrap_or_default(),
        metadata: serde_json::from_value::<BTreeMap<String, Value>>(metadata_json)
            .unwrap_or_default(),
        due_date: row.get("due_date"),
        external_id: row.get("external_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        completed_at: row.get("completed_at"),
        created_by: row.get("created_by"),
    }
}

fn row_to_dependency(row: sqlx::postgres::PgRow) -> Dependency {
    Dependency {
        id: row.get("id"),
        source_task: row.get("source_task"),
        target_task: row.get("target_task"),
        dependency_type: row.get("dependency_type"),
        status: row.get("status"),
        source_repo: row.get("source_repo"),
        target_repo: row.get("target_repo"),
        is_cross_repo: row.get("is_cross_repo"),
        created_at: row.get("created_at"),
    }
}

fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.constraint() == Some(constraint))
}

enum Bind {
    Text(String),
    Status(TaskStatus),
    Priority(TaskPriority),
    Time(chrono::DateTime<Utc>),
}

impl Bind {
    fn apply<'q>(
        self,
        query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
        match self {
            Bind::Text(v) => query.bind(v),
            Bind::Status(v) => query.bind(v),
            Bind::Priority(v) => query.bind(v),
            Bind::Time(v) => query.bind(v),
        }
    }
}

fn build_where(filter: &TaskFilterSpec) -> (String, Vec<Bind>) {
    let mut clauses = Vec::new();
    let mut binds = Vec::new();
    let mut idx = 0;

    let mut next = |clauses: &mut Vec<String>, idx: &mut i32, col: &str, op: &str| {
        *idx += 1;
        clauses.push(format!("{col} {op} ${idx}"));
    };

    if let Some(repo) = &filter.repository {
        next(&mut clauses, &mut idx, "repository", "=");
        binds.push(Bind::Text(repo.clone()));
    }
    if let Some(status) = filter.status {
        next(&mut clauses, &mut idx, "status", "=");
        binds.push(Bind::Status(status));
    }
    if let Some(priority) = filter.priority {
        next(&mut clauses, &mut idx, "priority", "=");
        binds.push(Bind::Priority(priority));
    }
    if let Some(assignee) = &filter.assignee {
        next(&mut clauses, &mut idx, "assignee", "=");
        binds.push(Bind::Text(assignee.clone()));
    }
    if !filter.tags.is_empty() {
        idx += 1;
        clauses.push(format!("tags @> ${idx}::jsonb"));
        binds.push(Bind::Text(json!(filter.tags).to_string()));
    }
    if let Some(search) = &filter.search {
        idx += 1;
        clauses.push(format!("search_vector @@ plainto_tsquery('english', ${idx})"));
        binds.push(Bind::Text(search.clone()));
    }
    if let Some(before) = filter.due_before {
        next(&mut clauses, &mut idx, "due_date", "<=");
        binds.push(Bind::Time(before));
    }
    if let Some(after) = filter.due_after {
        next(&mut clauses, &mut idx, "due_date", ">=");
        binds.push(Bind::Time(after));
    }
    if let Some(created_after) = filter.created_after {
        next(&mut clauses, &mut idx, "created_at", ">=");
        binds.push(Bind::Time(created_after));
    }

    if clauses.is_empty() {
        (String::new(), binds)
    } else {
        (format!("WHERE {}", clauses.join(" AND ")), binds)
    }
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

    #[sqlx::test]
    async fn create_rejects_invalid_draft_without_touching_the_database(pool: sqlx::PgPool) {
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        let err = TaskStore::create(&pool, draft("ab", "repo")).await.unwrap_err();
        assert!(matches!(err, MeridianError::Validation(_)));
    }

    #[sqlx::test]
    async fn create_then_get_round_trips(pool: sqlx::PgPool) {
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        let task = TaskStore::create(&pool, draft("a real title", "repo-a")).await.unwrap();
        let fetched = TaskStore::get(&pool, task.id).await.unwrap();
        assert_eq!(fetched.id, task.id);
        assert_eq!(fetched.status, TaskStatus::Pending);
        assert_eq!(fetched.priority, TaskPriority::Medium);
    }

    #[sqlx::test]
    async fn get_missing_task_is_not_found(pool: sqlx::PgPool) {
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        let err = TaskStore::get(&pool, Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, MeridianError::NotFound { .. }));
    }

    #[sqlx::test]
    async fn duplicate_external_id_is_a_conflict(pool: sqlx::PgPool) {
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        let mut d = draft("first task", "repo-a");
        d.external_id = Some("gh:42".to_string());
        TaskStore::create(&pool, d.clone()).await.unwrap();
        let err = TaskStore::create(&pool, d).await.unwrap_err();
        assert!(matches!(err, MeridianError::Conflict(_)));
    }

    #[sqlx::test]
    async fn update_to_completed_stamps_completed_at(pool: sqlx::PgPool) {
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        let task = TaskStore::create(&pool, draft("a real title", "repo-a")).await.unwrap();
        assert!(task.completed_at.is_none());

        let patch = TaskPatch {
            status: Some(TaskStatus::Completed),
            ..Default::default()
        };
        let updated = TaskStore::update(&pool, task.id, patch, "tester").await.unwrap();
        assert_eq!(updated.status, TaskStatus::Completed);
        assert!(updated.completed_at.is_some());
    }

    #[sqlx::test]
    async fn update_clearing_assignee_sets_it_to_null(pool: sqlx::PgPool) {
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        let mut d = draft("a real title", "repo-a");
        d.assignee = Some("alice".to_string());
        let task = TaskStore::create(&pool, d).await.unwrap();

        let patch = TaskPatch {
            assignee: Some(None),
            ..Default::default()
        };
        let updated = TaskStore::update(&pool, task.id, patch, "tester").await.unwrap();
        assert!(updated.assignee.is_none());
    }

    #[sqlx::test]
    async fn delete_then_get_is_not_found(pool: sqlx::PgPool) {
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        let task = TaskStore::create(&pool, draft("a real title", "repo-a")).await.unwrap();
        TaskStore::delete(&pool, task.id, "tester").await.unwrap();
        let err = TaskStore::get(&pool, task.id).await.unwrap_err();
        assert!(matches!(err, MeridianError::NotFound { .. }));
    }

    #[sqlx::test]
    async fn create_batch_aborts_entirely_on_one_invalid_draft(pool: sqlx::PgPool) {
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        let drafts = vec![draft("a real title", "repo-a"), draft("ab", "repo-a")];
        let err = TaskStore::create_batch(&pool, drafts, "tester").await.unwrap_err();
        assert!(matches!(err, MeridianError::Validation(_)));

        let count = TaskStore::count(&pool, &TaskFilterSpec::default()).await.unwrap();
        assert_eq!(count, 0);
    }

    #[sqlx::test]
    async fn update_status_batch_sets_completed_at_uniformly(pool: sqlx::PgPool) {
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        let a = TaskStore::create(&pool, draft("task one", "repo-a")).await.unwrap();
        let b = TaskStore::create(&pool, draft("task two", "repo-a")).await.unwrap();

        let affected = TaskStore::update_status_batch(
            &pool,
            &[a.id, b.id],
            TaskStatus::Completed,
            "tester",
        )
        .await
        .unwrap();
        assert_eq!(affected, 2);

        let a_after = TaskStore::get(&pool, a.id).await.unwrap();
        let b_after = TaskStore::get(&pool, b.id).await.unwrap();
        assert!(a_after.completed_at.is_some());
        assert!(b_after.completed_at.is_some());
    }

    #[sqlx::test]
    async fn list_filters_by_repository_and_orders_newest_first(pool: sqlx::PgPool) {
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        TaskStore::create(&pool, draft("first", "repo-a")).await.unwrap();
        TaskStore::create(&pool, draft("second", "repo-a")).await.unwrap();
        TaskStore::create(&pool, draft("other repo", "repo-b")).await.unwrap();

        let filter = TaskFilterSpec {
            repository: Some("repo-a".to_string()),
            limit: 50,
            ..Default::default()
        };
        let tasks = TaskStore::list(&pool, &filter).await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].title, "second");
        assert_eq!(tasks[1].title, "first");
    }

    #[sqlx::test]
    async fn add_dependency_rejects_self_reference(pool: sqlx::PgPool) {
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        let task = TaskStore::create(&pool, draft("a real title", "repo-a")).await.unwrap();
        let err = TaskStore::add_dependency(
            &pool,
            task.id,
            task.id,
            DependencyType::Blocks,
            "tester",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, MeridianError::Validation(_)));
    }

    #[sqlx::test]
    async fn add_dependency_marks_cross_repo_edges(pool: sqlx::PgPool) {
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        let a = TaskStore::create(&pool, draft("task a", "repo-a")).await.unwrap();
        let b = TaskStore::create(&pool, draft("task b", "repo-b")).await.unwrap();

        let dep = TaskStore::add_dependency(&pool, a.id, b.id, DependencyType::Blocks, "tester")
            .await
            .unwrap();
        assert!(dep.is_cross_repo);

        let deps = TaskStore::dependencies(&pool, a.id).await.unwrap();
        assert_eq!(deps.len(), 1);
        let dependents = TaskStore::dependents(&pool, b.id).await.unwrap();
        assert_eq!(dependents.len(), 1);
    }
}
