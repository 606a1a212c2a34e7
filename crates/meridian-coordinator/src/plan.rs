//! # Plan / Coordinator
//!
//! `CreatePlan` builds a topological order over a selected task set using
//! only BLOCKS edges, then `ExecutePlan`/`ExecuteStep`/`RollbackPlan` drive
//! tasks through completion and back (`spec.md` §4.7).

use chrono::{DateTime, Utc};
use meridian_graph::DependencyGraph;
use meridian_shared::types::{DependencyType, TaskPatch, TaskStatus};
use meridian_shared::MeridianError;
use meridian_store::TaskStore;
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStatus {
    Pending,
    Running,
    Completed,
    Failed,
    RolledBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    RolledBack,
}

#[derive(Debug, Clone)]
pub struct PlanStep {
    pub step_id: Uuid,
    pub task_id: Uuid,
    pub repository: String,
    pub action: String,
    pub dependencies: Vec<Uuid>,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct Plan {
    pub plan_id: Uuid,
    pub goal: String,
    pub steps: Vec<PlanStep>,
    pub repositories_involved: Vec<String>,
    pub status: PlanStatus,
    pub created_at: DateTime<Utc>,
}

/// `TaskStore::update`'s actor attribution for mutations the coordinator
/// itself drives, parallel to `meridian-webhooks`'s `"webhook-importer"`.
const ACTOR: &str = "coordinator";

pub struct Coordinator;

impl Coordinator {
    /// Induced subgraph over `task_ids` considering BLOCKS edges only, then
    /// Kahn's algorithm with an id tiebreak on the zero-degree frontier.
    /// Tasks unreachable by the sort (cycle inside the set, or a dependency
    /// on a task outside it) are appended at the end in id order.
    pub async fn create_plan(
        pool: &PgPool,
        graph: &DependencyGraph,
        goal: &str,
        task_ids: &[Uuid],
    ) -> Result<Plan, MeridianError> {
        let task_set: HashSet<Uuid> = task_ids.iter().copied().collect();

        let mut blocks_edges = Vec::new();
        for &task_id in task_ids {
            for edge in graph.dependencies_for(task_id) {
                if edge.dependency_type == DependencyType::Blocks && task_set.contains(&edge.target_task) {
                    blocks_edges.push((task_id, edge.target_task));
                }
            }
        }

        let order = kahn_order(task_ids, &blocks_edges);

        let mut steps = Vec::with_capacity(order.len());
        let mut repositories_involved = Vec::new();
        for task_id in &order {
            let task = TaskStore::get(pool, *task_id).await?;
            if !repositories_involved.contains(&task.repository) {
                repositories_involved.push(task.repository.clone());
            }
            let dependencies = graph
                .dependents(*task_id)
                .into_iter()
                .filter(|e| e.dependency_type == DependencyType::Blocks && task_set.contains(&e.source_task))
                .map(|e| e.source_task)
                .collect();
            steps.push(PlanStep {
                step_id: Uuid::now_v7(),
                task_id: *task_id,
                repository: task.repository,
                action: "complete".to_string(),
                dependencies,
                status: StepStatus::Pending,
                started_at: None,
                completed_at: None,
            });
        }

        Ok(Plan {
            plan_id: Uuid::now_v7(),
            goal: goal.to_string(),
            steps,
            repositories_involved,
            status: PlanStatus::Pending,
            created_at: Utc::now(),
        })
    }

    /// Completes the step's task. Refuses without mutating anything if a
    /// pending dependent edge still points at this task.
    pub async fn execute_step(
        pool: &PgPool,
        graph: &DependencyGraph,
        step: &mut PlanStep,
    ) -> Result<bool, MeridianError> {
        use meridian_shared::types::DependencyStatus;

        let blocking_dependent = graph
            .dependents(step.task_id)
            .into_iter()
            .any(|e| e.status == DependencyStatus::Pending);
        if blocking_dependent {
            warn!(task_id = %step.task_id, "refusing to execute step: a pending dependent edge remains");
            return Ok(false);
        }

        step.started_at = Some(Utc::now());

        let task = match TaskStore::get(pool, step.task_id).await {
            Ok(task) => task,
            Err(err) => {
                step.status = StepStatus::Failed;
                step.completed_at = Some(Utc::now());
                return Err(err);
            }
        };

        let patch = TaskPatch {
            status: Some(TaskStatus::Completed),
            ..Default::default()
        };
        TaskStore::update(pool, task.id, patch, ACTOR).await?;

        let mut statuses = HashMap::new();
        statuses.insert(task.id, TaskStatus::Completed);
        graph.update_all(&statuses);

        step.status = StepStatus::Completed;
        step.completed_at = Some(Utc::now());
        Ok(true)
    }

    /// Runs steps in order, stopping at the first failure. Does not
    /// auto-rollback: call `rollback_plan` explicitly if desired.
    pub async fn execute_plan(
        pool: &PgPool,
        graph: &DependencyGraph,
        plan: &mut Plan,
    ) -> Result<Vec<bool>, MeridianError> {
        plan.status = PlanStatus::Running;
        let mut results = Vec::with_capacity(plan.steps.len());

        for step in &mut plan.steps {
            match Self::execute_step(pool, graph, step).await {
                Ok(ok) => {
                    results.push(ok);
                    if !ok {
                        plan.status = PlanStatus::Failed;
                        return Ok(results);
                    }
                }
                Err(err) => {
                    error!(plan_id = %plan.plan_id, step_id = %step.step_id, error = %err, "step execution failed");
                    results.push(false);
                    plan.status = PlanStatus::Failed;
                    return Ok(results);
                }
            }
        }

        plan.status = PlanStatus::Completed;
        Ok(results)
    }

    /// Walks completed steps in reverse, resetting each task to pending.
    /// Errors during rollback are logged, never surfaced; the plan's
    /// terminal status is always ROLLED_BACK.
    pub async fn rollback_plan(pool: &PgPool, plan: &mut Plan) {
        for step in plan.steps.iter_mut().rev() {
            if step.status != StepStatus::Completed {
                continue;
            }
            let patch = TaskPatch {
                status: Some(TaskStatus::Pending),
                ..Default::default()
            };
            if let Err(err) = TaskStore::update(pool, step.task_id, patch, ACTOR).await {
                error!(task_id = %step.task_id, error = %err, "rollback update failed, continuing");
            }
            step.status = StepStatus::RolledBack;
        }
        plan.status = PlanStatus::RolledBack;
        info!(plan_id = %plan.plan_id, "plan rolled back");
    }
}

/// Kahn's algorithm over `task_ids` with `blocks_edges` as `(blocker,
/// blocked)` pairs. The zero-degree frontier is sorted by id before each
/// pop for a deterministic tiebreak. Tasks never reached (a cycle inside
/// the set, or only reachable through a task outside it) are appended at
/// the end in id order.
fn kahn_order(task_ids: &[Uuid], blocks_edges: &[(Uuid, Uuid)]) -> Vec<Uuid> {
    let mut dependents_of: HashMap<Uuid, Vec<Uuid>> =
        task_ids.iter().map(|id| (*id, Vec::new())).collect();
    let mut in_degree: HashMap<Uuid, usize> = task_ids.iter().map(|id| (*id, 0)).collect();

    for &(blocker, blocked) in blocks_edges {
        dependents_of.entry(blocker).or_default().push(blocked);
        *in_degree.entry(blocked).or_insert(0) += 1;
    }

    let mut order = Vec::with_capacity(task_ids.len());
    let mut remaining_degree = in_degree;
    let mut frontier: Vec<Uuid> = remaining_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(id, _)| *id)
        .collect();
    frontier.sort();

    while let Some(next) = frontier.first().copied() {
        frontier.remove(0);
        order.push(next);
        for dependent in dependents_of.get(&next).into_iter().flatten() {
            if let Some(deg) = remaining_degree.get_mut(dependent) {
                *deg -= 1;
                if *deg == 0 {
                    frontier.push(*dependent);
                    frontier.sort();
                }
            }
        }
    }

    let ordered: HashSet<Uuid> = order.iter().copied().collect();
    let mut leftover: Vec<Uuid> = task_ids
        .iter()
        .copied()
        .filter(|id| !ordered.contains(id))
        .collect();
    leftover.sort();
    order.extend(leftover);
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kahn_order_respects_chain_dependency() {
        let a = Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap();
        let b = Uuid::parse_str("00000000-0000-0000-0000-000000000002").unwrap();
        let c = Uuid::parse_str("00000000-0000-0000-0000-000000000003").unwrap();
        // C blocks A, A blocks B: order must complete C, then A, then B.
        let order = kahn_order(&[c, a, b], &[(c, a), (a, b)]);
        assert_eq!(order, vec![c, a, b]);
    }

    #[test]
    fn kahn_order_uses_id_tiebreak_on_independent_tasks() {
        let low = Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap();
        let high = Uuid::parse_str("00000000-0000-0000-0000-000000000002").unwrap();
        let order = kahn_order(&[high, low], &[]);
        assert_eq!(order, vec![low, high]);
    }

    #[test]
    fn kahn_order_appends_cyclic_tasks_at_the_end_in_id_order() {
        let a = Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap();
        let b = Uuid::parse_str("00000000-0000-0000-0000-000000000002").unwrap();
        // A blocks B and B blocks A: neither ever reaches in-degree 0.
        let order = kahn_order(&[b, a], &[(a, b), (b, a)]);
        assert_eq!(order, vec![a, b]);
    }

    #[test]
    fn plan_step_defaults_are_pending() {
        let step = PlanStep {
            step_id: Uuid::now_v7(),
            task_id: Uuid::now_v7(),
            repository: "repo".to_string(),
            action: "complete".to_string(),
            dependencies: vec![],
            status: StepStatus::Pending,
            started_at: None,
            completed_at: None,
        };
        assert_eq!(step.status, StepStatus::Pending);
    }
}
