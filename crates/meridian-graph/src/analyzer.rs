//! # BlockerAnalyzer
//!
//! Memoised projections over `DependencyGraph` (`spec.md` §4.5). Caches are
//! keyed by task id and invalidated wholesale whenever an edge is created,
//! removed, or changes status — the analyzer trades precision of
//! invalidation for simplicity, since the graph is small enough in practice
//! that a full cache clear is cheap.

use crate::graph::DependencyGraph;
use chrono::{DateTime, Utc};
use meridian_shared::types::{Dependency, DependencyStatus, DependencyType};
use meridian_shared::MeridianError;
use meridian_store::TaskStore;
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct BlockingChain {
    pub task: Uuid,
    pub edges: Vec<Dependency>,
    pub repos: HashSet<String>,
    pub is_cross_repo: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ImpactReport {
    pub direct: usize,
    pub indirect: usize,
    pub affected_repos: HashSet<String>,
}

impl ImpactReport {
    pub fn total_impact(&self) -> usize {
        self.direct + self.indirect
    }
}

#[derive(Debug, Default)]
pub struct BlockerAnalyzer {
    chain_cache: RwLock<HashMap<Uuid, BlockingChain>>,
    impact_cache: RwLock<HashMap<Uuid, ImpactReport>>,
}

impl BlockerAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blocking_chain_of(&self, graph: &DependencyGraph, task: Uuid) -> BlockingChain {
        if let Some(cached) = self.chain_cache.read().expect("cache lock poisoned").get(&task) {
            return cached.clone();
        }

        let edges = graph.blocking_chain(task);
        let mut repos = HashSet::new();
        for edge in &edges {
            repos.insert(edge.source_repo.clone());
            repos.insert(edge.target_repo.clone());
        }
        let is_cross_repo = edges.iter().any(|e| e.is_cross_repo);
        let chain = BlockingChain {
            task,
            edges,
            repos,
            is_cross_repo,
        };

        self.chain_cache
            .write()
            .expect("cache lock poisoned")
            .insert(task, chain.clone());
        chain
    }

    /// Direct impact = unsatisfied BLOCKS edges sourced from `task`. Indirect
    /// impact = the same count for each directly-blocked target, summed.
    pub fn impact_of(&self, graph: &DependencyGraph, task: Uuid) -> ImpactReport {
        if let Some(cached) = self.impact_cache.read().expect("cache lock poisoned").get(&task) {
            return cached.clone();
        }

        let direct_edges: Vec<Dependency> = graph
            .blocked(task)
            .into_iter()
            .filter(|e| e.status != DependencyStatus::Satisfied)
            .collect();

        let mut report = ImpactReport {
            direct: direct_edges.len(),
            indirect: 0,
            affected_repos: HashSet::new(),
        };

        for edge in &direct_edges {
            report.affected_repos.insert(edge.target_repo.clone());
            let indirect_edges: Vec<Dependency> = graph
                .blocked(edge.target_task)
                .into_iter()
                .filter(|e| e.status != DependencyStatus::Satisfied)
                .collect();
            report.indirect += indirect_edges.len();
            for ie in &indirect_edges {
                report.affected_repos.insert(ie.target_repo.clone());
            }
        }

        self.impact_cache
            .write()
            .expect("cache lock poisoned")
            .insert(task, report.clone());
        report
    }

    /// The set of source ids of every BLOCKS edge whose status is not
    /// SATISFIED.
    pub fn all_blockers(&self, graph: &DependencyGraph) -> HashSet<Uuid> {
        graph
            .all_edges()
            .into_iter()
            .filter(|e| e.dependency_type == DependencyType::Blocks)
            .filter(|e| e.status != DependencyStatus::Satisfied)
            .map(|e| e.source_task)
            .collect()
    }

    /// Subset of `all_blockers` with `ImpactOf(x).total_impact >= min_impact`,
    /// ranked by total impact descending.
    pub fn critical_blockers(&self, graph: &DependencyGraph, min_impact: usize) -> Vec<(Uuid, usize)> {
        let mut ranked: Vec<(Uuid, usize)> = self
            .all_blockers(graph)
            .into_iter()
            .map(|task| (task, self.impact_of(graph, task).total_impact()))
            .filter(|(_, impact)| *impact >= min_impact)
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked
    }

    /// Blockers whose `ImpactOf` clears `min_blocked` and whose source task
    /// has been blocking for at least `min_days_blocked`.
    pub async fn escalation_candidates(
        &self,
        pool: &PgPool,
        graph: &DependencyGraph,
        min_blocked: usize,
        min_days_blocked: i64,
    ) -> Result<Vec<(Uuid, usize)>, MeridianError> {
        let now = Utc::now();
        let mut candidates = Vec::new();
        for task in self.all_blockers(graph) {
            let impact = self.impact_of(graph, task).total_impact();
            if impact < min_blocked {
                continue;
            }
            let source = TaskStore::get(pool, task).await?;
            if age_in_days(source.created_at, now) >= min_days_blocked {
                candidates.push((task, impact));
            }
        }
        candidates.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        Ok(candidates)
    }

    /// Marks every edge sourced from `task` as SATISFIED and invalidates any
    /// cache entry whose chain touches the task.
    pub fn resolve(&self, graph: &DependencyGraph, task: Uuid) {
        let statuses: HashMap<Uuid, meridian_shared::types::TaskStatus> =
            [(task, meridian_shared::types::TaskStatus::Completed)].into();
        graph.update_all(&statuses);
        self.invalidate_touching(task);
    }

    fn invalidate_touching(&self, task: Uuid) {
        let mut chains = self.chain_cache.write().expect("cache lock poisoned");
        chains.retain(|_, chain| chain.task != task && !chain.edges.iter().any(|e| e.source_task == task || e.target_task == task));
        drop(chains);
        let mut impacts = self.impact_cache.write().expect("cache lock poisoned");
        impacts.remove(&task);
    }

    /// Clears everything. Called on every edge create/remove/status change
    /// per `spec.md` §4.5.
    pub fn invalidate_all(&self) {
        self.chain_cache.write().expect("cache lock poisoned").clear();
        self.impact_cache.write().expect("cache lock poisoned").clear();
    }
}

fn age_in_days(created_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - created_at).num_days()
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_shared::types::{DependencyStatus, DependencyType};

    fn edge(source: Uuid, target: Uuid, t: DependencyType, status: DependencyStatus) -> Dependency {
        Dependency {
            id: Uuid::now_v7(),
            source_task: source,
            target_task: target,
            dependency_type: t,
            status,
            source_repo: "repo-a".to_string(),
            target_repo: "repo-b".to_string(),
            is_cross_repo: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn all_blockers_excludes_satisfied_edges() {
        let graph = DependencyGraph::new();
        let analyzer = BlockerAnalyzer::new();
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        let c = Uuid::now_v7();
        graph.insert_raw_edge(edge(a, b, DependencyType::Blocks, DependencyStatus::Pending));
        graph.insert_raw_edge(edge(c, b, DependencyType::Blocks, DependencyStatus::Satisfied));

        let blockers = analyzer.all_blockers(&graph);
        assert!(blockers.contains(&a));
        assert!(!blockers.contains(&c));
    }

    #[test]
    fn impact_report_total_is_direct_plus_indirect() {
        let report = ImpactReport {
            direct: 2,
            indirect: 3,
            affected_repos: HashSet::new(),
        };
        assert_eq!(report.total_impact(), 5);
    }

    #[test]
    fn invalidate_all_clears_both_caches() {
        let analyzer = BlockerAnalyzer::new();
        let task = Uuid::now_v7();
        analyzer.chain_cache.write().unwrap().insert(
            task,
            BlockingChain {
                task,
                edges: vec![],
                repos: HashSet::new(),
                is_cross_repo: false,
            },
        );
        analyzer.impact_cache.write().unwrap().insert(task, ImpactReport::default());
        analyzer.invalidate_all();
        assert!(analyzer.chain_cache.read().unwrap().is_empty());
        assert!(analyzer.impact_cache.read().unwrap().is_empty());
    }

    #[test]
    fn critical_blockers_are_sorted_descending_by_impact() {
        let graph = DependencyGraph::new();
        let analyzer = BlockerAnalyzer::new();
        let low = Uuid::now_v7();
        let high = Uuid::now_v7();
        let t1 = Uuid::now_v7();
        let t2 = Uuid::now_v7();
        let t3 = Uuid::now_v7();

        graph.insert_raw_edge(edge(low, t1, DependencyType::Blocks, DependencyStatus::Pending));
        graph.insert_raw_edge(edge(high, t2, DependencyType::Blocks, DependencyStatus::Pending));
        graph.insert_raw_edge(edge(high, t3, DependencyType::Blocks, DependencyStatus::Pending));

        let ranked = analyzer.critical_blockers(&graph, 1);
        assert_eq!(ranked[0].0, high);
        assert_eq!(ranked[0].1, 2);
        assert_eq!(ranked[1].0, low);
    }
}
