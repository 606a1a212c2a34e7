//! # Dashboard
//!
//! Per-repository health view built on top of `Aggregator`'s stats
//! (`spec.md` §4.6, `repo_dashboard.py`).

use crate::aggregator::{Aggregator, RepoTaskStats};
use chrono::{DateTime, Duration, Utc};
use meridian_shared::types::{Task, TaskPriority, TaskStatus};
use meridian_shared::MeridianError;
use meridian_store::{TaskFilterSpec, TaskStore};
use sqlx::PgPool;
use std::collections::HashMap;

const BLOCKED_RATE_WARNING: f64 = 0.10;
const BLOCKED_RATE_CRITICAL: f64 = 0.25;
const STALE_TASK_WARNING_DAYS: i64 = 14;
const VELOCITY_INCREASING: f64 = 0.8;
const VELOCITY_DECREASING: f64 = 0.5;
const DASHBOARD_LIMIT: i64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthIndicator {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VelocityTrend {
    Increasing,
    Steady,
    Decreasing,
}

#[derive(Debug, Clone, Default)]
pub struct TaskDistribution {
    pub by_status: HashMap<TaskStatus, usize>,
    pub by_priority: HashMap<TaskPriority, usize>,
}

#[derive(Debug, Clone)]
pub struct ActivityMetrics {
    pub completed_last_7_days: usize,
    pub completed_prior_7_days: usize,
    pub created_last_7_days: usize,
    pub velocity_trend: VelocityTrend,
    pub stale_tasks: Vec<uuid::Uuid>,
    pub overdue_tasks: Vec<uuid::Uuid>,
}

#[derive(Debug, Clone)]
pub struct DashboardView {
    pub repo_name: String,
    pub stats: RepoTaskStats,
    pub distribution: TaskDistribution,
    pub activity: ActivityMetrics,
    pub risk: RiskLevel,
    pub health: HealthIndicator,
    pub at_risk_task_ids: Vec<uuid::Uuid>,
}

pub struct Dashboard;

impl Dashboard {
    pub async fn for_repo(pool: &PgPool, repo_name: &str) -> Result<DashboardView, MeridianError> {
        let filter = TaskFilterSpec {
            repository: Some(repo_name.to_string()),
            limit: DASHBOARD_LIMIT,
            ..Default::default()
        };
        let tasks = TaskStore::list(pool, &filter).await?;
        let stats = Aggregator::repo_stats(pool, repo_name).await?;

        let distribution = build_distribution(&tasks);
        let activity = build_activity(&tasks);
        let high_priority_blocked = high_priority_blocked_count(&tasks);
        let risk = assess_risk(&stats, &activity, high_priority_blocked);
        let health = classify_health(&stats, risk, high_priority_blocked);
        let at_risk_task_ids = identify_at_risk_tasks(&tasks, stale_cutoff());

        Ok(DashboardView {
            repo_name: repo_name.to_string(),
            stats,
            distribution,
            activity,
            risk,
            health,
            at_risk_task_ids,
        })
    }
}

fn build_distribution(tasks: &[Task]) -> TaskDistribution {
    let mut by_status = HashMap::new();
    let mut by_priority = HashMap::new();
    for task in tasks {
        *by_status.entry(task.status).or_insert(0) += 1;
        *by_priority.entry(task.priority).or_insert(0) += 1;
    }
    TaskDistribution { by_status, by_priority }
}

/// Tasks pending longer than [`STALE_TASK_WARNING_DAYS`], clocked from
/// `created_at` (not `updated_at` — a task can sit untouched in `pending`
/// indefinitely and that's exactly the case this flags).
fn stale_cutoff() -> DateTime<Utc> {
    Utc::now() - Duration::days(STALE_TASK_WARNING_DAYS)
}

fn is_overdue(task: &Task, now: DateTime<Utc>) -> bool {
    task.due_date.is_some_and(|due| due < now)
        && !matches!(task.status, TaskStatus::Completed | TaskStatus::Cancelled)
}

fn high_priority_blocked_count(tasks: &[Task]) -> usize {
    tasks
        .iter()
        .filter(|t| {
            t.status == TaskStatus::Blocked
                && matches!(t.priority, TaskPriority::High | TaskPriority::Critical)
        })
        .count()
}

/// Union of: blocked + high/critical priority, pending + stale, or overdue.
fn identify_at_risk_tasks(tasks: &[Task], stale_cutoff: DateTime<Utc>) -> Vec<uuid::Uuid> {
    let now = Utc::now();
    tasks
        .iter()
        .filter(|t| {
            let blocked_and_urgent = t.status == TaskStatus::Blocked
                && matches!(t.priority, TaskPriority::High | TaskPriority::Critical);
            let pending_and_stale = t.status == TaskStatus::Pending && t.created_at < stale_cutoff;
            blocked_and_urgent || pending_and_stale || is_overdue(t, now)
        })
        .map(|t| t.id)
        .collect()
}

fn build_activity(tasks: &[Task]) -> ActivityMetrics {
    let now = Utc::now();
    let week_ago = now - Duration::days(7);
    let two_weeks_ago = now - Duration::days(14);
    let cutoff = stale_cutoff();

    let completed_last_7_days = tasks
        .iter()
        .filter(|t| t.completed_at.is_some_and(|c| c >= week_ago))
        .count();
    let completed_prior_7_days = tasks
        .iter()
        .filter(|t| {
            t.completed_at
                .is_some_and(|c| c >= two_weeks_ago && c < week_ago)
        })
        .count();
    let created_last_7_days = tasks.iter().filter(|t| t.created_at >= week_ago).count();

    let velocity_trend = velocity_trend(completed_last_7_days, completed_prior_7_days);

    let stale_tasks = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Pending && t.created_at < cutoff)
        .map(|t| t.id)
        .collect();

    let overdue_tasks = tasks
        .iter()
        .filter(|t| is_overdue(t, now))
        .map(|t| t.id)
        .collect();

    ActivityMetrics {
        completed_last_7_days,
        completed_prior_7_days,
        created_last_7_days,
        velocity_trend,
        stale_tasks,
        overdue_tasks,
    }
}

/// Ratio of this week's completions to last week's; > 0.8 above the prior
/// week counts as increasing, < 0.5 counts as decreasing.
fn velocity_trend(current: usize, prior: usize) -> VelocityTrend {
    if prior == 0 {
        return if current > 0 {
            VelocityTrend::Increasing
        } else {
            VelocityTrend::Steady
        };
    }
    let ratio = current as f64 / prior as f64;
    if ratio > 1.0 + VELOCITY_INCREASING {
        VelocityTrend::Increasing
    } else if ratio < VELOCITY_DECREASING {
        VelocityTrend::Decreasing
    } else {
        VelocityTrend::Steady
    }
}

fn assess_risk(
    stats: &RepoTaskStats,
    activity: &ActivityMetrics,
    high_priority_blocked: usize,
) -> RiskLevel {
    let blocked_rate = stats.blocked_rate();
    let has_signal = !activity.stale_tasks.is_empty() || !activity.overdue_tasks.is_empty();

    if blocked_rate >= BLOCKED_RATE_CRITICAL || high_priority_blocked > 0 {
        RiskLevel::High
    } else if blocked_rate >= BLOCKED_RATE_WARNING || has_signal {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// CRITICAL when the blocked rate crosses the critical threshold, risk is
/// already HIGH, or a high/critical-priority task is blocked. WARNING when
/// the blocked rate crosses the warning threshold, any risk signal fired
/// (risk above LOW), or a high/critical-priority task is blocked.
fn classify_health(
    stats: &RepoTaskStats,
    risk: RiskLevel,
    high_priority_blocked: usize,
) -> HealthIndicator {
    let blocked_rate = stats.blocked_rate();
    if blocked_rate >= BLOCKED_RATE_CRITICAL || risk == RiskLevel::High || high_priority_blocked > 0
    {
        HealthIndicator::Critical
    } else if blocked_rate >= BLOCKED_RATE_WARNING || risk != RiskLevel::Low || high_priority_blocked > 0
    {
        HealthIndicator::Warning
    } else {
        HealthIndicator::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(
        status: TaskStatus,
        priority: TaskPriority,
        created_at: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Task {
        Task {
            id: uuid::Uuid::now_v7(),
            title: "t".to_string(),
            repository: "repo".to_string(),
            description: None,
            status,
            priority,
            assignee: None,
            tags: Default::default(),
            metadata: Default::default(),
            due_date: None,
            external_id: None,
            created_at,
            updated_at: created_at,
            completed_at,
            created_by: "tester".to_string(),
        }
    }

    fn empty_activity() -> ActivityMetrics {
        ActivityMetrics {
            completed_last_7_days: 0,
            completed_prior_7_days: 0,
            created_last_7_days: 0,
            velocity_trend: VelocityTrend::Steady,
            stale_tasks: vec![],
            overdue_tasks: vec![],
        }
    }

    #[test]
    fn velocity_trend_detects_drop() {
        assert_eq!(velocity_trend(1, 10), VelocityTrend::Decreasing);
    }

    #[test]
    fn velocity_trend_detects_rise() {
        assert_eq!(velocity_trend(10, 1), VelocityTrend::Increasing);
    }

    #[test]
    fn velocity_trend_with_no_prior_activity_and_some_current_is_increasing() {
        assert_eq!(velocity_trend(2, 0), VelocityTrend::Increasing);
    }

    #[test]
    fn stale_tasks_require_pending_status_not_just_non_terminal() {
        let now = Utc::now();
        let old = now - Duration::days(30);
        let tasks = vec![
            task(TaskStatus::Pending, TaskPriority::Medium, old, None),
            task(TaskStatus::InProgress, TaskPriority::Medium, old, None),
            task(TaskStatus::Completed, TaskPriority::Medium, old, Some(old)),
        ];
        let activity = build_activity(&tasks);
        assert_eq!(activity.stale_tasks.len(), 1);
        assert_eq!(activity.stale_tasks[0], tasks[0].id);
    }

    #[test]
    fn stale_tasks_ignore_recently_created_pending_work() {
        let now = Utc::now();
        let tasks = vec![task(TaskStatus::Pending, TaskPriority::Medium, now, None)];
        let activity = build_activity(&tasks);
        assert!(activity.stale_tasks.is_empty());
    }

    #[test]
    fn overdue_excludes_completed_and_cancelled() {
        let now = Utc::now();
        let past = now - Duration::days(3);
        let mut overdue = task(TaskStatus::InProgress, TaskPriority::Medium, now, None);
        overdue.due_date = Some(past);
        let mut closed = task(TaskStatus::Completed, TaskPriority::Medium, now, Some(now));
        closed.due_date = Some(past);
        let tasks = vec![overdue.clone(), closed];
        let activity = build_activity(&tasks);
        assert_eq!(activity.overdue_tasks, vec![overdue.id]);
    }

    #[test]
    fn assess_risk_is_high_when_blocked_rate_exceeds_critical_threshold() {
        let mut stats = RepoTaskStats {
            repo_name: "repo".to_string(),
            total_tasks: 4,
            ..Default::default()
        };
        stats.status_counts.insert(TaskStatus::Blocked, 3);
        assert_eq!(assess_risk(&stats, &empty_activity(), 0), RiskLevel::High);
    }

    #[test]
    fn assess_risk_is_high_when_a_high_priority_task_is_blocked() {
        let stats = RepoTaskStats {
            repo_name: "repo".to_string(),
            total_tasks: 10,
            ..Default::default()
        };
        assert_eq!(assess_risk(&stats, &empty_activity(), 1), RiskLevel::High);
    }

    #[test]
    fn classify_health_is_healthy_with_low_blocked_rate_and_no_risk_signal() {
        let stats = RepoTaskStats {
            repo_name: "repo".to_string(),
            total_tasks: 10,
            ..Default::default()
        };
        assert_eq!(classify_health(&stats, RiskLevel::Low, 0), HealthIndicator::Healthy);
    }

    #[test]
    fn classify_health_is_critical_when_risk_is_high_even_with_low_blocked_rate() {
        let stats = RepoTaskStats {
            repo_name: "repo".to_string(),
            total_tasks: 10,
            ..Default::default()
        };
        assert_eq!(
            classify_health(&stats, RiskLevel::High, 0),
            HealthIndicator::Critical
        );
    }

    #[test]
    fn identify_at_risk_tasks_unions_blocked_stale_and_overdue() {
        let now = Utc::now();
        let old = now - Duration::days(30);
        let cutoff = stale_cutoff();

        let blocked_high = task(TaskStatus::Blocked, TaskPriority::High, now, None);
        let pending_stale = task(TaskStatus::Pending, TaskPriority::Low, old, None);
        let mut overdue = task(TaskStatus::InProgress, TaskPriority::Low, now, None);
        overdue.due_date = Some(now - Duration::days(1));
        let healthy = task(TaskStatus::InProgress, TaskPriority::Low, now, None);

        let tasks = vec![blocked_high.clone(), pending_stale.clone(), overdue.clone(), healthy];
        let at_risk = identify_at_risk_tasks(&tasks, cutoff);

        assert!(at_risk.contains(&blocked_high.id));
        assert!(at_risk.contains(&pending_stale.id));
        assert!(at_risk.contains(&overdue.id));
        assert_eq!(at_risk.len(), 3);
    }
}
