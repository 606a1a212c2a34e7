//! # Filter
//!
//! In-memory refinement beyond what `TaskStore`'s SQL filter can express:
//! multiple statuses/priorities, ANY-tag match, date ranges, text search,
//! exclude-completed, and paginated sorting with fixed categorical orders
//! (`spec.md` §4.6, `cross_repo_filter.py`).

use chrono::{DateTime, Duration, Utc};
use meridian_shared::types::{Task, TaskPriority, TaskStatus};
use meridian_shared::MeridianError;
use meridian_store::{TaskFilterSpec, TaskStore};
use sqlx::PgPool;

const CANDIDATE_LIMIT: i64 = 10_000;
const DEFAULT_PAGE_SIZE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortBy {
    Priority,
    Status,
    CreatedAt,
    UpdatedAt,
    Title,
    Repository,
}

#[derive(Debug, Clone)]
pub struct DateRange {
    pub last_n_days: Option<i64>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    fn resolve(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let now = Utc::now();
        if let Some(days) = self.last_n_days {
            return (now - Duration::days(days), now);
        }
        let start = self.start.unwrap_or_else(|| now - Duration::days(30));
        let end = self.end.unwrap_or(now);
        (start, end)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FilterCriteria {
    pub repo_names: Vec<String>,
    pub statuses: Vec<TaskStatus>,
    pub priorities: Vec<TaskPriority>,
    pub tags_any: Vec<String>,
    pub tags_all: Vec<String>,
    pub date_range: Option<DateRange>,
    pub text_search: Option<String>,
    pub exclude_completed: bool,
    pub sort_by: Option<SortBy>,
    pub sort_order: Option<SortOrder>,
    pub page: usize,
    pub page_size: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FilterResult {
    pub tasks: Vec<Task>,
    pub total_count: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
}

impl FilterResult {
    pub fn has_more(&self) -> bool {
        self.page < self.total_pages
    }
}

pub struct Filter;

impl Filter {
    pub async fn apply(pool: &PgPool, criteria: &FilterCriteria) -> Result<FilterResult, MeridianError> {
        let status = single(&criteria.statuses);
        let priority = single(&criteria.priorities);

        let task_filter = TaskFilterSpec {
            status,
            priority,
            tags: criteria.tags_all.clone(),
            limit: CANDIDATE_LIMIT,
            ..Default::default()
        };
        let candidates = TaskStore::list(pool, &task_filter).await?;

        let filtered = apply_in_memory(candidates, criteria);
        let sorted = sort_tasks(
            filtered,
            criteria.sort_by.unwrap_or(SortBy::CreatedAt),
            criteria.sort_order.unwrap_or(SortOrder::Desc),
        );

        let page = criteria.page.max(1);
        let page_size = if criteria.page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            criteria.page_size
        };
        let total_count = sorted.len();
        let total_pages = ((total_count + page_size - 1) / page_size).max(1);

        let start = (page - 1) * page_size;
        let tasks = sorted.into_iter().skip(start).take(page_size).collect();

        Ok(FilterResult {
            tasks,
            total_count,
            page,
            page_size,
            total_pages,
        })
    }
}

fn single<T: Copy>(values: &[T]) -> Option<T> {
    if values.len() == 1 {
        Some(values[0])
    } else {
        None
    }
}

fn apply_in_memory(tasks: Vec<Task>, criteria: &FilterCriteria) -> Vec<Task> {
    let mut result = tasks;

    if !criteria.repo_names.is_empty() {
        result.retain(|t| criteria.repo_names.contains(&t.repository));
    }
    if !criteria.statuses.is_empty() {
        result.retain(|t| criteria.statuses.contains(&t.status));
    }
    if !criteria.priorities.is_empty() {
        result.retain(|t| criteria.priorities.contains(&t.priority));
    }
    if !criteria.tags_any.is_empty() {
        result.retain(|t| criteria.tags_any.iter().any(|tag| t.tags.contains(tag)));
    }
    if let Some(range) = &criteria.date_range {
        let (start, end) = range.resolve();
        result.retain(|t| t.created_at >= start && t.created_at <= end);
    }
    if let Some(query) = &criteria.text_search {
        let needle = query.to_lowercase();
        result.retain(|t| {
            t.title.to_lowercase().contains(&needle)
                || t.description
                    .as_deref()
                    .is_some_and(|d| d.to_lowercase().contains(&needle))
        });
    }
    if criteria.exclude_completed {
        result.retain(|t| t.status != TaskStatus::Completed);
    }

    result
}

/// Declaration order for `priority`: critical < high < medium < low.
fn priority_rank(p: TaskPriority) -> u8 {
    match p {
        TaskPriority::Critical => 0,
        TaskPriority::High => 1,
        TaskPriority::Medium => 2,
        TaskPriority::Low => 3,
    }
}

/// Declaration order for `status`: blocked < in_progress < pending <
/// completed < cancelled < failed.
fn status_rank(s: TaskStatus) -> u8 {
    match s {
        TaskStatus::Blocked => 0,
        TaskStatus::InProgress => 1,
        TaskStatus::Pending => 2,
        TaskStatus::Completed => 3,
        TaskStatus::Cancelled => 4,
        TaskStatus::Failed => 5,
    }
}

fn sort_tasks(mut tasks: Vec<Task>, sort_by: SortBy, order: SortOrder) -> Vec<Task> {
    tasks.sort_by(|a, b| {
        let ordering = match sort_by {
            SortBy::Priority => priority_rank(a.priority).cmp(&priority_rank(b.priority)),
            SortBy::Status => status_rank(a.status).cmp(&status_rank(b.status)),
            SortBy::CreatedAt => a.created_at.cmp(&b.created_at),
            SortBy::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            SortBy::Title => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
            SortBy::Repository => a.repository.to_lowercase().cmp(&b.repository.to_lowercase()),
        };
        if order == SortOrder::Desc {
            ordering.reverse()
        } else {
            ordering
        }
    });
    tasks
}
