//! # DependencyGraph
//!
//! Cross-repository directed edges over tasks (`spec.md` §4.4). Three
//! in-memory indexes behind a single `RwLock`: `edges[id]`, `out[task]`
//! (task is source), `in_[task]` (task is target). The graph is rebuilt from
//! task state on startup — it is never persisted on its own, even though
//! `meridian-store` mirrors edges into `task_dependencies` for recovery.

use chrono::{DateTime, Utc};
use meridian_shared::types::{Dependency, DependencyStatus, DependencyType, TaskStatus};
use meridian_shared::MeridianError;
use meridian_store::TaskStore;
use sqlx::PgPool;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default)]
pub struct EdgeCounts {
    pub total: usize,
    pub cross_repo: usize,
    pub blocks: usize,
    pub requires: usize,
    pub related: usize,
}

#[derive(Debug, Default)]
struct GraphState {
    edges: HashMap<Uuid, Dependency>,
    out: HashMap<Uuid, Vec<Uuid>>,
    in_: HashMap<Uuid, Vec<Uuid>>,
}

#[derive(Debug, Default)]
pub struct DependencyGraph {
    state: RwLock<GraphState>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate, cycle-check (BLOCKS/REQUIRES only), and insert an edge.
    pub async fn create(
        &self,
        pool: &PgPool,
        source: Uuid,
        target: Uuid,
        dependency_type: DependencyType,
    ) -> Result<Dependency, MeridianError> {
        if source == target {
            return Err(MeridianError::validation("a task cannot depend on itself"));
        }

        let source_task = TaskStore::get(pool, source).await?;
        let target_task = TaskStore::get(pool, target).await?;

        {
            let state = self.state.read().expect("graph lock poisoned");
            if let Some(edges) = state.out.get(&source) {
                let duplicate = edges
                    .iter()
                    .filter_map(|id| state.edges.get(id))
                    .any(|e| e.target_task == target);
                if duplicate {
                    return Err(MeridianError::conflict("dependency already exists"));
                }
            }

            if dependency_type.is_ordered() && self.would_cycle(&state, source, target) {
                return Err(MeridianError::conflict(
                    "adding this edge would create a dependency cycle",
                ));
            }
        }

        let edge = Dependency {
            id: Uuid::now_v7(),
            source_task: source,
            target_task: target,
            dependency_type,
            status: DependencyStatus::Pending,
            source_repo: source_task.repository,
            target_repo: target_task.repository.clone(),
            is_cross_repo: source_task.repository != target_task.repository,
            created_at: Utc::now(),
        };

        let mut state = self.state.write().expect("graph lock poisoned");
        state.out.entry(source).or_default().push(edge.id);
        state.in_.entry(target).or_default().push(edge.id);
        state.edges.insert(edge.id, edge.clone());
        Ok(edge)
    }

    /// BFS from `target` over outgoing BLOCKS/REQUIRES edges; a cycle forms
    /// iff `source` is reachable.
    fn would_cycle(&self, state: &GraphState, source: Uuid, target: Uuid) -> bool {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([target]);
        visited.insert(target);

        while let Some(node) = queue.pop_front() {
            if node == source {
                return true;
            }
            let Some(out_edges) = state.out.get(&node) else {
                continue;
            };
            for edge_id in out_edges {
                let Some(edge) = state.edges.get(edge_id) else {
                    continue;
                };
                if !edge.dependency_type.is_ordered() {
                    continue;
                }
                if visited.insert(edge.target_task) {
                    queue.push_back(edge.target_task);
                }
            }
        }
        false
    }

    /// Idempotent: returns `false` when the edge was already absent.
    pub fn remove(&self, edge_id: Uuid) -> bool {
        let mut state = self.state.write().expect("graph lock poisoned");
        let Some(edge) = state.edges.remove(&edge_id) else {
            return false;
        };
        if let Some(v) = state.out.get_mut(&edge.source_task) {
            v.retain(|id| *id != edge_id);
        }
        if let Some(v) = state.in_.get_mut(&edge.target_task) {
            v.retain(|id| *id != edge_id);
        }
        true
    }

    pub fn dependencies_for(&self, task: Uuid) -> Vec<Dependency> {
        let state = self.state.read().expect("graph lock poisoned");
        state
            .out
            .get(&task)
            .into_iter()
            .flatten()
            .filter_map(|id| state.edges.get(id).cloned())
            .collect()
    }

    pub fn dependents(&self, task: Uuid) -> Vec<Dependency> {
        let state = self.state.read().expect("graph lock poisoned");
        state
            .in_
            .get(&task)
            .into_iter()
            .flatten()
            .filter_map(|id| state.edges.get(id).cloned())
            .collect()
    }

    pub fn blocked(&self, task: Uuid) -> Vec<Dependency> {
        self.dependencies_for(task)
            .into_iter()
            .filter(|e| e.dependency_type == DependencyType::Blocks)
            .collect()
    }

    /// BFS walking *backwards* over incoming BLOCKS edges; returns edges in
    /// discovery order so immediate blockers come first.
    pub fn blocking_chain(&self, task: Uuid) -> Vec<Dependency> {
        let state = self.state.read().expect("graph lock poisoned");
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([task]);
        visited.insert(task);
        let mut chain = Vec::new();

        while let Some(node) = queue.pop_front() {
            let Some(in_edges) = state.in_.get(&node) else {
                continue;
            };
            for edge_id in in_edges {
                let Some(edge) = state.edges.get(edge_id) else {
                    continue;
                };
                if edge.dependency_type != DependencyType::Blocks {
                    continue;
                }
                chain.push(edge.clone());
                if visited.insert(edge.source_task) {
                    queue.push_back(edge.source_task);
                }
            }
        }
        chain
    }

    pub fn cross_repo_edges(&self) -> Vec<Dependency> {
        let state = self.state.read().expect("graph lock poisoned");
        state
            .edges
            .values()
            .filter(|e| e.is_cross_repo)
            .cloned()
            .collect()
    }

    pub fn edges_by_repo(&self, repo: &str) -> Vec<Dependency> {
        let state = self.state.read().expect("graph lock poisoned");
        state
            .edges
            .values()
            .filter(|e| e.source_repo == repo || e.target_repo == repo)
            .cloned()
            .collect()
    }

    pub fn all_edges(&self) -> Vec<Dependency> {
        let state = self.state.read().expect("graph lock poisoned");
        state.edges.values().cloned().collect()
    }

    pub fn edge_counts(&self) -> EdgeCounts {
        let state = self.state.read().expect("graph lock poisoned");
        let mut counts = EdgeCounts::default();
        for edge in state.edges.values() {
            counts.total += 1;
            if edge.is_cross_repo {
                counts.cross_repo += 1;
            }
            match edge.dependency_type {
                DependencyType::Blocks => counts.blocks += 1,
                DependencyType::Requires => counts.requires += 1,
                DependencyType::Related => counts.related += 1,
            }
        }
        counts
    }

    /// Re-fetches both endpoint tasks and re-derives this edge's status.
    pub async fn update_status(&self, pool: &PgPool, edge_id: Uuid) -> Result<(), MeridianError> {
        let (source, target, dep_type) = {
            let state = self.state.read().expect("graph lock poisoned");
            let edge = state
                .edges
                .get(&edge_id)
                .ok_or_else(|| MeridianError::not_found("dependency", edge_id.to_string()))?;
            (edge.source_task, edge.target_task, edge.dependency_type)
        };

        let source_task = TaskStore::get(pool, source).await?;
        let target_task = TaskStore::get(pool, target).await?;
        let new_status = derive_status(dep_type, source_task.status, target_task.status);

        let mut state = self.state.write().expect("graph lock poisoned");
        if let Some(edge) = state.edges.get_mut(&edge_id) {
            edge.status = new_status;
        }
        Ok(())
    }

    /// Applies the same derivation to every edge touching a task in `statuses`.
    /// Returns the number of edges whose status actually changed.
    pub fn update_all(&self, statuses: &HashMap<Uuid, TaskStatus>) -> usize {
        let mut state = self.state.write().expect("graph lock poisoned");
        let mut changed = 0;
        for edge in state.edges.values_mut() {
            let source_status = statuses.get(&edge.source_task).copied();
            let target_status = statuses.get(&edge.target_task).copied();
            if source_status.is_none() && target_status.is_none() {
                continue;
            }
            let derived = match edge.dependency_type {
                DependencyType::Blocks => source_status.map(|s| derive_blocks(s)),
                DependencyType::Requires => target_status.map(derive_requires),
                DependencyType::Related => None,
            };
            if let Some(new_status) = derived {
                if new_status != edge.status {
                    edge.status = new_status;
                    changed += 1;
                }
            }
        }
        changed
    }
}

fn derive_status(
    dep_type: DependencyType,
    source_status: TaskStatus,
    target_status: TaskStatus,
) -> DependencyStatus {
    match dep_type {
        DependencyType::Blocks => derive_blocks(source_status),
        DependencyType::Requires => derive_requires(target_status),
        DependencyType::Related => DependencyStatus::Pending,
    }
}

fn derive_blocks(source_status: TaskStatus) -> DependencyStatus {
    match source_status {
        TaskStatus::Completed => DependencyStatus::Satisfied,
        TaskStatus::Failed => DependencyStatus::Failed,
        TaskStatus::Blocked => DependencyStatus::Blocked,
        _ => DependencyStatus::Pending,
    }
}

fn derive_requires(target_status: TaskStatus) -> DependencyStatus {
    match target_status {
        TaskStatus::Completed => DependencyStatus::Satisfied,
        TaskStatus::Failed => DependencyStatus::Failed,
        _ => DependencyStatus::Pending,
    }
}

#[cfg(test)]
impl DependencyGraph {
    /// Test-only: insert an edge without the DB round-trip `create` needs,
    /// so pure in-memory traversal logic can be exercised without a pool.
    pub(crate) fn insert_raw_edge(&self, edge: Dependency) {
        let mut state = self.state.write().expect("graph lock poisoned");
        state.out.entry(edge.source_task).or_default().push(edge.id);
        state.in_.entry(edge.target_task).or_default().push(edge.id);
        state.edges.insert(edge.id, edge);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(id: Uuid, source: Uuid, target: Uuid, t: DependencyType) -> Dependency {
        Dependency {
            id,
            source_task: source,
            target_task: target,
            dependency_type: t,
            status: DependencyStatus::Pending,
            source_repo: "repo-a".to_string(),
            target_repo: "repo-a".to_string(),
            is_cross_repo: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn would_cycle_detects_direct_reversal() {
        let graph = DependencyGraph::new();
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        {
            let mut state = graph.state.write().unwrap();
            let e = edge(Uuid::now_v7(), b, a, DependencyType::Blocks);
            state.out.entry(b).or_default().push(e.id);
            state.edges.insert(e.id, e);
        }
        let state = graph.state.read().unwrap();
        assert!(graph.would_cycle(&state, a, b));
    }

    #[test]
    fn remove_missing_edge_is_idempotent() {
        let graph = DependencyGraph::new();
        assert!(!graph.remove(Uuid::now_v7()));
    }

    #[test]
    fn blocking_chain_orders_immediate_blockers_first() {
        let graph = DependencyGraph::new();
        let root = Uuid::now_v7();
        let immediate = Uuid::now_v7();
        let distant = Uuid::now_v7();
        {
            let mut state = graph.state.write().unwrap();
            let e1 = edge(Uuid::now_v7(), immediate, root, DependencyType::Blocks);
            state.in_.entry(root).or_default().push(e1.id);
            state.edges.insert(e1.id, e1);
            let e2 = edge(Uuid::now_v7(), distant, immediate, DependencyType::Blocks);
            state.in_.entry(immediate).or_default().push(e2.id);
            state.edges.insert(e2.id, e2);
        }
        let chain = graph.blocking_chain(root);
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].source_task, immediate);
        assert_eq!(chain[1].source_task, distant);
    }

    #[test]
    fn update_all_counts_only_actual_changes() {
        let graph = DependencyGraph::new();
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        {
            let mut state = graph.state.write().unwrap();
            let e = edge(Uuid::now_v7(), a, b, DependencyType::Blocks);
            state.edges.insert(e.id, e);
        }
        let mut statuses = HashMap::new();
        statuses.insert(a, TaskStatus::Completed);
        let changed = graph.update_all(&statuses);
        assert_eq!(changed, 1);
        // Running it again with the same status should report no changes.
        let changed_again = graph.update_all(&statuses);
        assert_eq!(changed_again, 0);
    }

    #[test]
    fn related_edges_are_exempt_from_cycle_check() {
        let graph = DependencyGraph::new();
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        {
            let mut state = graph.state.write().unwrap();
            let e = edge(Uuid::now_v7(), b, a, DependencyType::Related);
            state.out.entry(b).or_default().push(e.id);
            state.edges.insert(e.id, e);
        }
        let state = graph.state.read().unwrap();
        // would_cycle only walks ordered edge types, so a RELATED reversal
        // is never reported as a cycle.
        assert!(!graph.would_cycle(&state, a, b));
    }
}
