//! # Aggregator
//!
//! Groups `TaskStore` output across repositories (`spec.md` §4.6,
//! `cross_repo_aggregator.py`).

use chrono::{DateTime, Utc};
use meridian_shared::types::{Task, TaskPriority, TaskStatus};
use meridian_shared::MeridianError;
use meridian_store::{TaskFilterSpec, TaskStore};
use sqlx::PgPool;
use std::collections::HashMap;

const AGGREGATE_ALL_LIMIT: i64 = 10_000;

#[derive(Debug, Clone, Default)]
pub struct RepoTaskStats {
    pub repo_name: String,
    pub total_tasks: usize,
    pub status_counts: HashMap<TaskStatus, usize>,
    pub priority_counts: HashMap<TaskPriority, usize>,
    pub tag_counts: HashMap<String, usize>,
    pub blocked_tasks: Vec<uuid::Uuid>,
    pub oldest_pending: Option<DateTime<Utc>>,
    pub newest_task: Option<DateTime<Utc>>,
}

impl RepoTaskStats {
    pub fn completion_rate(&self) -> f64 {
        if self.total_tasks == 0 {
            return 0.0;
        }
        *self.status_counts.get(&TaskStatus::Completed).unwrap_or(&0) as f64
            / self.total_tasks as f64
    }

    pub fn blocked_rate(&self) -> f64 {
        if self.total_tasks == 0 {
            return 0.0;
        }
        *self.status_counts.get(&TaskStatus::Blocked).unwrap_or(&0) as f64
            / self.total_tasks as f64
    }

    fn attention_score(&self) -> f64 {
        let high = *self.priority_counts.get(&TaskPriority::High).unwrap_or(&0) as f64;
        let critical = *self.priority_counts.get(&TaskPriority::Critical).unwrap_or(&0) as f64;
        self.blocked_rate() * 50.0
            + (high + critical * 2.0) * 5.0
            + (1.0 - self.completion_rate()) * 20.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct AggregatedTasks {
    pub tasks: Vec<Task>,
    pub total_count: usize,
    pub repo_counts: HashMap<String, usize>,
    pub status_counts: HashMap<TaskStatus, usize>,
    pub priority_counts: HashMap<TaskPriority, usize>,
    pub tag_counts: HashMap<String, usize>,
}

#[derive(Debug, Clone, Default)]
pub struct CrossRepoSummary {
    pub total_tasks: usize,
    pub total_repos: usize,
    pub pending_count: usize,
    pub in_progress_count: usize,
    pub completed_count: usize,
    pub blocked_count: usize,
    pub cancelled_count: usize,
    pub failed_count: usize,
    pub repo_stats: HashMap<String, RepoTaskStats>,
    /// High/critical priority tasks currently blocked or in progress.
    pub critical_count: usize,
}

pub struct Aggregator;

impl Aggregator {
    pub async fn aggregate_all(pool: &PgPool) -> Result<AggregatedTasks, MeridianError> {
        let filter = TaskFilterSpec {
            limit: AGGREGATE_ALL_LIMIT,
            ..Default::default()
        };
        let tasks = TaskStore::list(pool, &filter).await?;
        Ok(build_aggregated(tasks))
    }

    /// `repo_names`, where given, issues one query per name since the
    /// underlying filter only accepts a single repository.
    pub async fn aggregate_with_filter(
        pool: &PgPool,
        repo_names: &[String],
        status: Option<TaskStatus>,
        priority: Option<TaskPriority>,
        tags: &[String],
        exclude_completed: bool,
        limit: i64,
    ) -> Result<AggregatedTasks, MeridianError> {
        let mut tasks = Vec::new();
        if repo_names.is_empty() {
            let filter = TaskFilterSpec {
                status,
                priority,
                tags: tags.to_vec(),
                limit,
                ..Default::default()
            };
            tasks = TaskStore::list(pool, &filter).await?;
        } else {
            for repo in repo_names {
                let filter = TaskFilterSpec {
                    repository: Some(repo.clone()),
                    status,
                    priority,
                    tags: tags.to_vec(),
                    limit,
                    ..Default::default()
                };
                tasks.extend(TaskStore::list(pool, &filter).await?);
            }
            tasks.truncate(limit.max(0) as usize);
        }

        if exclude_completed {
            tasks.retain(|t| t.status != TaskStatus::Completed);
        }
        Ok(build_aggregated(tasks))
    }

    pub async fn aggregate_by_repo(
        pool: &PgPool,
    ) -> Result<HashMap<String, RepoTaskStats>, MeridianError> {
        let tasks = all_tasks(pool).await?;
        Ok(group_by_repo(tasks))
    }

    pub async fn aggregate_by_status(
        pool: &PgPool,
    ) -> Result<HashMap<TaskStatus, Vec<Task>>, MeridianError> {
        let tasks = all_tasks(pool).await?;
        let mut grouped: HashMap<TaskStatus, Vec<Task>> = HashMap::new();
        for task in tasks {
            grouped.entry(task.status).or_default().push(task);
        }
        Ok(grouped)
    }

    pub async fn aggregate_by_priority(
        pool: &PgPool,
    ) -> Result<HashMap<TaskPriority, Vec<Task>>, MeridianError> {
        let tasks = all_tasks(pool).await?;
        let mut grouped: HashMap<TaskPriority, Vec<Task>> = HashMap::new();
        for task in tasks {
            grouped.entry(task.priority).or_default().push(task);
        }
        Ok(grouped)
    }

    pub async fn aggregate_by_tag(pool: &PgPool) -> Result<HashMap<String, Vec<Task>>, MeridianError> {
        let tasks = all_tasks(pool).await?;
        let mut grouped: HashMap<String, Vec<Task>> = HashMap::new();
        for task in tasks {
            for tag in &task.tags {
                grouped.entry(tag.clone()).or_default().push(task.clone());
            }
        }
        Ok(grouped)
    }

    /// Groups tasks by repository role, resolved through a caller-supplied
    /// `repo -> role` map (the role registry lives outside this crate).
    pub async fn aggregate_by_role(
        pool: &PgPool,
        repo_roles: &HashMap<String, String>,
    ) -> Result<HashMap<String, Vec<Task>>, MeridianError> {
        let tasks = all_tasks(pool).await?;
        let mut grouped: HashMap<String, Vec<Task>> = HashMap::new();
        for task in tasks {
            let role = repo_roles
                .get(&task.repository)
                .cloned()
                .unwrap_or_else(|| "unknown".to_string());
            grouped.entry(role).or_default().push(task);
        }
        Ok(grouped)
    }

    pub async fn repo_stats(pool: &PgPool, repo_name: &str) -> Result<RepoTaskStats, MeridianError> {
        let filter = TaskFilterSpec {
            repository: Some(repo_name.to_string()),
            limit: AGGREGATE_ALL_LIMIT,
            ..Default::default()
        };
        let tasks = TaskStore::list(pool, &filter).await?;
        Ok(build_repo_stats(repo_name, &tasks))
    }

    pub async fn summary(pool: &PgPool) -> Result<CrossRepoSummary, MeridianError> {
        let tasks = all_tasks(pool).await?;
        let repo_stats = group_by_repo(tasks.clone());

        let mut status_counts: HashMap<TaskStatus, usize> = HashMap::new();
        let mut critical_count = 0;
        for task in &tasks {
            *status_counts.entry(task.status).or_insert(0) += 1;
            let is_high_priority = matches!(task.priority, TaskPriority::High | TaskPriority::Critical);
            let is_active = matches!(task.status, TaskStatus::Blocked | TaskStatus::InProgress);
            if is_high_priority && is_active {
                critical_count += 1;
            }
        }

        Ok(CrossRepoSummary {
            total_tasks: tasks.len(),
            total_repos: repo_stats.len(),
            pending_count: *status_counts.get(&TaskStatus::Pending).unwrap_or(&0),
            in_progress_count: *status_counts.get(&TaskStatus::InProgress).unwrap_or(&0),
            completed_count: *status_counts.get(&TaskStatus::Completed).unwrap_or(&0),
            blocked_count: *status_counts.get(&TaskStatus::Blocked).unwrap_or(&0),
            cancelled_count: *status_counts.get(&TaskStatus::Cancelled).unwrap_or(&0),
            failed_count: *status_counts.get(&TaskStatus::Failed).unwrap_or(&0),
            repo_stats,
            critical_count,
        })
    }

    /// Scores each repo as
    /// `50*blocked_rate + 5*(high_count + 2*critical_count) + 20*(1 - completion_rate)`
    /// and returns the top `limit`.
    pub async fn repos_needing_attention(
        pool: &PgPool,
        limit: usize,
    ) -> Result<Vec<RepoTaskStats>, MeridianError> {
        let all = Self::aggregate_by_repo(pool).await?;
        let mut ranked: Vec<RepoTaskStats> = all.into_values().collect();
        ranked.sort_by(|a, b| {
            b.attention_score()
                .partial_cmp(&a.attention_score())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.repo_name.cmp(&b.repo_name))
        });
        ranked.truncate(limit);
        Ok(ranked)
    }
}

async fn all_tasks(pool: &PgPool) -> Result<Vec<Task>, MeridianError> {
    let filter = TaskFilterSpec {
        limit: AGGREGATE_ALL_LIMIT,
        ..Default::default()
    };
    TaskStore::list(pool, &filter).await
}

fn build_aggregated(tasks: Vec<Task>) -> AggregatedTasks {
    let mut repo_counts = HashMap::new();
    let mut status_counts = HashMap::new();
    let mut priority_counts = HashMap::new();
    let mut tag_counts = HashMap::new();

    for task in &tasks {
        *repo_counts.entry(task.repository.clone()).or_insert(0) += 1;
        *status_counts.entry(task.status).or_insert(0) += 1;
        *priority_counts.entry(task.priority).or_insert(0) += 1;
        for tag in &task.tags {
            *tag_counts.entry(tag.clone()).or_insert(0) += 1;
        }
    }

    AggregatedTasks {
        total_count: tasks.len(),
        tasks,
        repo_counts,
        status_counts,
        priority_counts,
        tag_counts,
    }
}

fn group_by_repo(tasks: Vec<Task>) -> HashMap<String, RepoTaskStats> {
    let mut by_repo: HashMap<String, Vec<Task>> = HashMap::new();
    for task in tasks {
        by_repo.entry(task.repository.clone()).or_default().push(task);
    }
    by_repo
        .into_iter()
        .map(|(repo, tasks)| (repo.clone(), build_repo_stats(&repo, &tasks)))
        .collect()
}

fn build_repo_stats(repo_name: &str, tasks: &[Task]) -> RepoTaskStats {
    let mut status_counts = HashMap::new();
    let mut priority_counts = HashMap::new();
    let mut tag_counts = HashMap::new();
    let mut blocked_tasks = Vec::new();
    let mut oldest_pending = None;
    let mut newest_task = None;

    for task in tasks {
        *status_counts.entry(task.status).or_insert(0) += 1;
        *priority_counts.entry(task.priority).or_insert(0) += 1;
        for tag in &task.tags {
            *tag_counts.entry(tag.clone()).or_insert(0) += 1;
        }
        if task.status == TaskStatus::Blocked {
            blocked_tasks.push(task.id);
        }
        if task.status == TaskStatus::Pending
            && oldest_pending.is_none_or(|o| task.created_at < o)
        {
            oldest_pending = Some(task.created_at);
        }
        if newest_task.is_none_or(|n| task.created_at > n) {
            newest_task = Some(task.created_at);
        }
    }

    RepoTaskStats {
        repo_name: repo_name.to_string(),
        total_tasks: tasks.len(),
        status_counts,
        priority_counts,
        tag_counts,
        blocked_tasks,
        oldest_pending,
        newest_task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(repo: &str, status: TaskStatus, priority: TaskPriority) -> Task {
        Task {
            id: uuid::Uuid::now_v7(),
            title: "t".to_string(),
            repository: repo.to_string(),
            description: None,
            status,
            priority,
            assignee: None,
            tags: Default::default(),
            metadata: Default::default(),
            due_date: None,
            external_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
            created_by: "tester".to_string(),
        }
    }

    #[test]
    fn completion_rate_is_zero_for_empty_repo() {
        let stats = RepoTaskStats::default();
        assert_eq!(stats.completion_rate(), 0.0);
    }

    #[test]
    fn attention_score_matches_reference_formula() {
        let tasks = vec![
            task("r", TaskStatus::Blocked, TaskPriority::High),
            task("r", TaskStatus::Completed, TaskPriority::Low),
        ];
        let stats = build_repo_stats("r", &tasks);
        // blocked_rate=0.5, completion_rate=0.5, high=1, critical=0
        // 0.5*50 + (1+0)*5 + (1-0.5)*20 = 25 + 5 + 10 = 40
        assert!((stats.attention_score() - 40.0).abs() < 1e-9);
    }

    #[test]
    fn build_aggregated_counts_match_input() {
        let tasks = vec![
            task("a", TaskStatus::Pending, TaskPriority::Medium),
            task("b", TaskStatus::Completed, TaskPriority::Medium),
        ];
        let agg = build_aggregated(tasks);
        assert_eq!(agg.total_count, 2);
        assert_eq!(agg.repo_counts.len(), 2);
    }
}
