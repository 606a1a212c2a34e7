//! # EventLog
//!
//! Append-only log of typed task events. See `spec.md` §4.2. `append` is
//! always called from inside the caller's transaction (usually
//! `TaskStore`'s), so it takes a `&mut Transaction` rather than owning a
//! pool; the read operations take a plain pool reference since they never
//! need transactional isolation.

use chrono::{DateTime, Utc};
use meridian_shared::types::{TaskEvent, TaskEventType};
use meridian_shared::MeridianError;
use serde_json::Value;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub types: Option<Vec<TaskEventType>>,
    pub limit: i64,
}

pub struct EventLog;

impl EventLog {
    /// Append one event inside the caller's transaction.
    ///
    /// If `idempotency_key` is set and a row with that key already exists,
    /// the pre-existing row is returned unchanged and no insert is
    /// attempted. On a race between two concurrent appends sharing a key,
    /// the database's unique constraint rejects the losing writer, who then
    /// re-reads and returns the winner's row — duplicate-key races are not
    /// errors (`spec.md` §4.2).
    pub async fn append(
        tx: &mut Transaction<'_, Postgres>,
        task_id: Uuid,
        event_type: TaskEventType,
        data: Value,
        actor: &str,
        correlation_id: Option<&str>,
        idempotency_key: Option<&str>,
    ) -> Result<TaskEvent, MeridianError> {
        if let Some(key) = idempotency_key {
            if let Some(existing) = Self::find_by_idempotency_key(tx, key).await? {
                return Ok(existing);
            }
        }

        let id = Uuid::now_v7();
        let occurred_at = Utc::now();

        let insert = sqlx::query(
            r#"
            INSERT INTO task_events
                (id, task_id, event_type, event_data, actor, occurred_at, correlation_id, idempotency_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (idempotency_key) WHERE idempotency_key IS NOT NULL DO NOTHING
            "#,
        )
        .bind(id)
        .bind(task_id)
        .bind(event_type)
        .bind(&data)
        .bind(actor)
        .bind(occurred_at)
        .bind(correlation_id)
        .bind(idempotency_key)
        .execute(&mut **tx)
        .await?;

        if insert.rows_affected() == 0 {
            // Lost the race to a concurrent writer with the same key.
            let key = idempotency_key.expect("ON CONFLICT only fires when a key was supplied");
            return Self::find_by_idempotency_key(tx, key)
                .await?
                .ok_or_else(|| {
                    MeridianError::Internal(
                        "idempotency conflict reported but no row found".to_string(),
                    )
                });
        }

        Ok(TaskEvent {
            id,
            task_id,
            event_type,
            data,
            actor: actor.to_string(),
            occurred_at,
            correlation_id: correlation_id.map(str::to_string),
            idempotency_key: idempotency_key.map(str::to_string),
        })
    }

    async fn find_by_idempotency_key(
        tx: &mut Transaction<'_, Postgres>,
        key: &str,
    ) -> Result<Option<TaskEvent>, MeridianError> {
        let row = sqlx::query(
            "SELECT id, task_id, event_type, event_data, actor, occurred_at, correlation_id, idempotency_key
             FROM task_events WHERE idempotency_key = $1",
        )
        .bind(key)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row.map(row_to_event))
    }

    pub async fn events_for(
        pool: &PgPool,
        task_id: Uuid,
        filter: &EventFilter,
    ) -> Result<Vec<TaskEvent>, MeridianError> {
        let mut query = String::from(
            "SELECT id, task_id, event_type, event_data, actor, occurred_at, correlation_id, idempotency_key
             FROM task_events WHERE task_id = $1",
        );
        let mut args_idx = 2;
        if filter.since.is_some() {
            query.push_str(&format!(" AND occurred_at >= ${args_idx}"));
            args_idx += 1;
        }
        if filter.until.is_some() {
            query.push_str(&format!(" AND occurred_at <= ${args_idx}"));
            args_idx += 1;
        }
        if let Some(types) = &filter.types {
            if !types.is_empty() {
                query.push_str(&format!(" AND event_type = ANY(${args_idx})"));
                args_idx += 1;
            }
        }
        query.push_str(" ORDER BY occurred_at ASC, id ASC");
        if filter.limit > 0 {
            query.push_str(&format!(" LIMIT ${args_idx}"));
        }

        let mut q = sqlx::query(&query).bind(task_id);
        if let Some(since) = filter.since {
            q = q.bind(since);
        }
        if let Some(until) = filter.until {
            q = q.bind(until);
        }
        if let Some(types) = &filter.types {
            if !types.is_empty() {
                q = q.bind(types.clone());
            }
        }
        if filter.limit > 0 {
            q = q.bind(filter.limit);
        }

        let rows = q.fetch_all(pool).await?;
        Ok(rows.into_iter().map(row_to_event).collect())
    }

    pub async fn events_by_correlation(
        pool: &PgPool,
        correlation_id: &str,
    ) -> Result<Vec<TaskEvent>, MeridianError> {
        let rows = sqlx::query(
            "SELECT id, task_id, event_type, event_data, actor, occurred_at, correlation_id, idempotency_key
             FROM task_events WHERE correlation_id = $1 ORDER BY occurred_at ASC, id ASC",
        )
        .bind(correlation_id)
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(row_to_event).collect())
    }

    pub async fn events_by_type(
        pool: &PgPool,
        event_type: TaskEventType,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<TaskEvent>, MeridianError> {
        let rows = sqlx::query(
            "SELECT id, task_id, event_type, event_data, actor, occurred_at, correlation_id, idempotency_key
             FROM task_events
             WHERE event_type = $1 AND ($2::timestamptz IS NULL OR occurred_at >= $2)
             ORDER BY occurred_at DESC, id DESC
             LIMIT $3",
        )
        .bind(event_type)
        .bind(since)
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(row_to_event).collect())
    }

    /// A lazy, restartable, chunked scan intended for exporters. Each call
    /// fetches the next batch after `after_id`; the caller stops when a
    /// short batch (< `batch`) comes back.
    pub async fn next_batch(
        pool: &PgPool,
        since: Option<DateTime<Utc>>,
        after_id: Option<Uuid>,
        batch: i64,
    ) -> Result<Vec<TaskEvent>, MeridianError> {
        let rows = sqlx::query(
            "SELECT id, task_id, event_type, event_data, actor, occurred_at, correlation_id, idempotency_key
             FROM task_events
             WHERE ($1::timestamptz IS NULL OR occurred_at >= $1)
               AND ($2::uuid IS NULL OR id > $2)
             ORDER BY id ASC
             LIMIT $3",
        )
        .bind(since)
        .bind(after_id)
        .bind(batch)
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(row_to_event).collect())
    }
}

fn row_to_event(row: sqlx::postgres::PgRow) -> TaskEvent {
    TaskEvent {
        id: row.get("id"),
        task_id: row.get("task_id"),
        event_type: row.get("event_type"),
        data: row.get("event_data"),
        actor: row.get("actor"),
        occurred_at: row.get("occurred_at"),
        correlation_id: row.get("correlation_id"),
        idempotency_key: row.get("idempotency_key"),
    }
}

/// Restartable cursor for `EventLog::next_batch`, used by exporters that
/// need to resume a scan across process restarts (`spec.md` §4.2,
/// `iterate_all`). Stateless between calls by design — holds only the last
/// seen id.
#[derive(Debug, Clone, Default)]
pub struct ExportCursor {
    pub last_id: Option<Uuid>,
}

impl ExportCursor {
    pub fn advance(&mut self, events: &[TaskEvent]) {
        if let Some(last) = events.last() {
            self.last_id = Some(last.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[sqlx::test]
    async fn append_without_idempotency_key_always_inserts(pool: sqlx::PgPool) {
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        let task_id = Uuid::now_v7();
        let mut tx = pool.begin().await.unwrap();
        let e1 = EventLog::append(
            &mut tx,
            task_id,
            TaskEventType::Created,
            json!({"title": "t"}),
            "tester",
            None,
            None,
        )
        .await
        .unwrap();
        let e2 = EventLog::append(
            &mut tx,
            task_id,
            TaskEventType::Created,
            json!({"title": "t"}),
            "tester",
            None,
            None,
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
        assert_ne!(e1.id, e2.id);
    }

    #[sqlx::test]
    async fn repeated_idempotency_key_returns_same_event(pool: sqlx::PgPool) {
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        let task_id = Uuid::now_v7();
        let mut tx = pool.begin().await.unwrap();
        let e1 = EventLog::append(
            &mut tx,
            task_id,
            TaskEventType::WebhookReceived,
            json!({}),
            "webhook",
            None,
            Some("github:evt-42"),
        )
        .await
        .unwrap();
        let e2 = EventLog::append(
            &mut tx,
            task_id,
            TaskEventType::WebhookReceived,
            json!({}),
            "webhook",
            None,
            Some("github:evt-42"),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(e1.id, e2.id);
    }

    #[sqlx::test]
    async fn events_for_orders_ascending_by_time_then_id(pool: sqlx::PgPool) {
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        let task_id = Uuid::now_v7();
        let mut tx = pool.begin().await.unwrap();
        EventLog::append(&mut tx, task_id, TaskEventType::Created, json!({}), "a", None, None)
            .await
            .unwrap();
        EventLog::append(&mut tx, task_id, TaskEventType::Updated, json!({}), "a", None, None)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let events = EventLog::events_for(&pool, task_id, &EventFilter::default())
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, TaskEventType::Created);
        assert_eq!(events[1].event_type, TaskEventType::Updated);
    }
}
