//! In-memory worktree registry and lifecycle state machine (`spec.md`
//! §4.11). Branch operations are delegated to an injected [`GitRunner`];
//! this module owns only the state transitions and bookkeeping.

use crate::runner::GitRunner;
use chrono::{DateTime, Utc};
use meridian_shared::MeridianError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorktreeState {
    Active,
    Completed,
    Abandoned,
    Merged,
}

#[derive(Debug, Clone)]
pub struct WorktreeInfo {
    pub worktree_id: Uuid,
    pub task_id: Uuid,
    pub path: PathBuf,
    pub repo_path: PathBuf,
    pub branch: String,
    pub base_branch: String,
    pub state: WorktreeState,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct WorktreeStatus {
    pub worktree_id: Uuid,
    pub current_branch: String,
    pub base_branch: String,
    pub state: WorktreeState,
    pub modified_files: usize,
    pub ahead: u32,
    pub behind: u32,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct WorktreeSummary {
    pub total: usize,
    pub active: usize,
    pub completed: usize,
    pub merged: usize,
    pub abandoned: usize,
}

pub struct WorktreeTracker {
    git: Arc<dyn GitRunner>,
    base_path: Option<PathBuf>,
    worktrees: RwLock<HashMap<Uuid, WorktreeInfo>>,
}

impl std::fmt::Debug for WorktreeTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorktreeTracker")
            .field("base_path", &self.base_path)
            .field("tracked", &self.worktrees.read().expect("lock poisoned").len())
            .finish()
    }
}

impl WorktreeTracker {
    pub fn new(git: Arc<dyn GitRunner>, base_path: Option<PathBuf>) -> Self {
        Self {
            git,
            base_path,
            worktrees: RwLock::new(HashMap::new()),
        }
    }

    fn worktree_path(&self, repo_path: &Path, task_id: Uuid) -> PathBuf {
        match &self.base_path {
            Some(base) => base.join(format!("worktree-{task_id}")),
            None => {
                let repo_name = repo_path.file_name().and_then(|s| s.to_str()).unwrap_or("repo");
                let parent = repo_path.parent().unwrap_or_else(|| Path::new("."));
                parent.join(format!("{repo_name}-worktree-{task_id}"))
            }
        }
    }

    /// Creates a new branch in a fresh worktree off `base_branch` and tracks
    /// it as `Active`.
    pub async fn create(
        &self,
        task_id: Uuid,
        repo_path: &Path,
        branch_name: &str,
        base_branch: &str,
    ) -> Result<WorktreeInfo, MeridianError> {
        let worktree_id = Uuid::now_v7();
        let path = self.worktree_path(repo_path, task_id);
        let path_str = path.to_string_lossy().to_string();

        self.git
            .run(&["worktree", "add", "-b", branch_name, &path_str, base_branch], repo_path)
            .await?;

        let worktree = WorktreeInfo {
            worktree_id,
            task_id,
            path,
            repo_path: repo_path.to_path_buf(),
            branch: branch_name.to_string(),
            base_branch: base_branch.to_string(),
            state: WorktreeState::Active,
            created_at: Utc::now(),
            completed_at: None,
        };

        self.worktrees
            .write()
            .expect("lock poisoned")
            .insert(worktree_id, worktree.clone());
        tracing::info!(%worktree_id, %task_id, path = %path_str, "created worktree");

        Ok(worktree)
    }

    pub fn list(&self) -> Vec<WorktreeInfo> {
        self.worktrees.read().expect("lock poisoned").values().cloned().collect()
    }

    pub fn get(&self, worktree_id: Uuid) -> Option<WorktreeInfo> {
        self.worktrees.read().expect("lock poisoned").get(&worktree_id).cloned()
    }

    pub fn get_for_task(&self, task_id: Uuid) -> Option<WorktreeInfo> {
        self.worktrees
            .read()
            .expect("lock poisoned")
            .values()
            .find(|w| w.task_id == task_id)
            .cloned()
    }

    pub fn active(&self) -> Vec<WorktreeInfo> {
        self.worktrees
            .read()
            .expect("lock poisoned")
            .values()
            .filter(|w| w.state == WorktreeState::Active)
            .cloned()
            .collect()
    }

    pub fn exists(&self, worktree_id: Uuid) -> bool {
        self.worktrees.read().expect("lock poisoned").contains_key(&worktree_id)
    }

    /// Marks a worktree completed, or merged when `merge` is set. Merging
    /// requires `repo_path` — without it there's nowhere to run `checkout`
    /// and `merge` against.
    pub async fn complete(
        &self,
        worktree_id: Uuid,
        merge: bool,
        repo_path: Option<&Path>,
    ) -> Result<bool, MeridianError> {
        let Some(worktree) = self.get(worktree_id) else {
            return Err(MeridianError::not_found("worktree", worktree_id.to_string()));
        };

        if merge && repo_path.is_none() {
            return Err(MeridianError::validation("merge requires a repository path"));
        }

        let final_state = if merge {
            let repo_path = repo_path.expect("checked above");
            self.git.run(&["checkout", &worktree.base_branch], repo_path).await?;
            let merge_message = format!("Merge {} into {}", worktree.branch, worktree.base_branch);
            self.git
                .run(&["merge", &worktree.branch, "--no-ff", "-m", &merge_message], repo_path)
                .await?;
            WorktreeState::Merged
        } else {
            WorktreeState::Completed
        };

        let mut guard = self.worktrees.write().expect("lock poisoned");
        if let Some(entry) = guard.get_mut(&worktree_id) {
            entry.state = final_state;
            entry.completed_at = Some(Utc::now());
        }
        Ok(true)
    }

    pub fn abandon(&self, worktree_id: Uuid) -> bool {
        let mut guard = self.worktrees.write().expect("lock poisoned");
        let Some(entry) = guard.get_mut(&worktree_id) else {
            return false;
        };
        entry.state = WorktreeState::Abandoned;
        entry.completed_at = Some(Utc::now());
        true
    }

    /// Best-effort `git worktree remove`; the entry is dropped from tracking
    /// regardless of whether the git command succeeds.
    pub async fn cleanup(&self, worktree_id: Uuid) -> bool {
        let Some(worktree) = self.get(worktree_id) else {
            return false;
        };

        let path_str = worktree.path.to_string_lossy().to_string();
        let result = self
            .git
            .run(&["worktree", "remove", &path_str, "--force"], &worktree.repo_path)
            .await;

        self.worktrees.write().expect("lock poisoned").remove(&worktree_id);

        match result {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(%worktree_id, error = %e, "worktree cleanup failed, removed from tracking anyway");
                false
            }
        }
    }

    pub async fn cleanup_completed(&self) -> usize {
        let to_cleanup: Vec<Uuid> = self
            .worktrees
            .read()
            .expect("lock poisoned")
            .iter()
            .filter(|(_, w)| {
                matches!(
                    w.state,
                    WorktreeState::Completed | WorktreeState::Merged | WorktreeState::Abandoned
                )
            })
            .map(|(id, _)| *id)
            .collect();

        let mut cleaned = 0;
        for worktree_id in to_cleanup {
            if self.cleanup(worktree_id).await {
                cleaned += 1;
            }
        }
        cleaned
    }

    pub async fn sync(&self, worktree_id: Uuid) -> bool {
        let Some(worktree) = self.get(worktree_id) else {
            return false;
        };
        let remote_branch = format!("origin/{}", worktree.base_branch);
        if self.git.run(&["fetch", "origin"], &worktree.path).await.is_err() {
            return false;
        }
        self.git.run(&["merge", &remote_branch], &worktree.path).await.is_ok()
    }

    pub async fn status(&self, worktree_id: Uuid) -> Result<Option<WorktreeStatus>, MeridianError> {
        let Some(worktree) = self.get(worktree_id) else {
            return Ok(None);
        };

        let current_branch = self.git.run(&["branch", "--show-current"], &worktree.path).await?;
        let status_output = self.git.run(&["status", "--short"], &worktree.path).await?;
        let range = format!("{}...{}", worktree.branch, worktree.base_branch);
        let ahead_behind = self
            .git
            .run(&["rev-list", "--left-right", "--count", &range], &worktree.path)
            .await?;

        let (ahead, behind) = ahead_behind
            .split_once('\t')
            .or_else(|| ahead_behind.split_once(' '))
            .and_then(|(a, b)| Some((a.trim().parse().ok()?, b.trim().parse().ok()?)))
            .unwrap_or((0u32, 0u32));

        let modified_files = if status_output.trim().is_empty() {
            0
        } else {
            status_output.trim().lines().count()
        };

        Ok(Some(WorktreeStatus {
            worktree_id,
            current_branch: current_branch.trim().to_string(),
            base_branch: worktree.base_branch,
            state: worktree.state,
            modified_files,
            ahead,
            behind,
            path: worktree.path,
        }))
    }

    /// Drops tracked worktrees whose path no longer exists on disk.
    pub fn prune_stale(&self) -> usize {
        let stale: Vec<Uuid> = self
            .worktrees
            .read()
            .expect("lock poisoned")
            .iter()
            .filter(|(_, w)| !w.path.exists())
            .map(|(id, _)| *id)
            .collect();

        let mut guard = self.worktrees.write().expect("lock poisoned");
        for worktree_id in &stale {
            guard.remove(worktree_id);
        }
        stale.len()
    }

    pub fn summary(&self) -> WorktreeSummary {
        let guard = self.worktrees.read().expect("lock poisoned");
        let mut summary = WorktreeSummary { total: guard.len(), ..Default::default() };
        for worktree in guard.values() {
            match worktree.state {
                WorktreeState::Active => summary.active += 1,
                WorktreeState::Completed => summary.completed += 1,
                WorktreeState::Merged => summary.merged += 1,
                WorktreeState::Abandoned => summary.abandoned += 1,
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::test_util::ScriptedRunner;
    use std::path::Path;

    fn tracker(git: Arc<ScriptedRunner>) -> WorktreeTracker {
        WorktreeTracker::new(git, None)
    }

    #[tokio::test]
    async fn create_tracks_worktree_as_active() {
        let git = Arc::new(ScriptedRunner::new());
        git.push_ok("");
        let tracker = tracker(git);

        let task_id = Uuid::now_v7();
        let info = tracker
            .create(task_id, Path::new("/repos/app"), "feature/x", "main")
            .await
            .unwrap();

        assert_eq!(info.state, WorktreeState::Active);
        assert_eq!(info.task_id, task_id);
        assert!(tracker.exists(info.worktree_id));
    }

    #[tokio::test]
    async fn create_propagates_git_failure_without_tracking() {
        let git = Arc::new(ScriptedRunner::new());
        git.push_err("branch already exists");
        let tracker = tracker(git);

        let err = tracker
            .create(Uuid::now_v7(), Path::new("/repos/app"), "feature/x", "main")
            .await
            .unwrap_err();
        assert!(matches!(err, MeridianError::Internal(_)));
        assert!(tracker.list().is_empty());
    }

    #[tokio::test]
    async fn complete_with_merge_requires_repo_path() {
        let git = Arc::new(ScriptedRunner::new());
        git.push_ok("");
        let tracker = tracker(git);
        let info = tracker
            .create(Uuid::now_v7(), Path::new("/repos/app"), "feature/x", "main")
            .await
            .unwrap();

        let err = tracker.complete(info.worktree_id, true, None).await.unwrap_err();
        assert!(matches!(err, MeridianError::Validation(_)));
    }

    #[tokio::test]
    async fn complete_without_merge_marks_completed() {
        let git = Arc::new(ScriptedRunner::new());
        git.push_ok("");
        let tracker = tracker(git);
        let info = tracker
            .create(Uuid::now_v7(), Path::new("/repos/app"), "feature/x", "main")
            .await
            .unwrap();

        tracker.complete(info.worktree_id, false, None).await.unwrap();
        let updated = tracker.get(info.worktree_id).unwrap();
        assert_eq!(updated.state, WorktreeState::Completed);
        assert!(updated.completed_at.is_some());
    }

    #[tokio::test]
    async fn complete_with_merge_runs_checkout_then_merge() {
        let git = Arc::new(ScriptedRunner::new());
        git.push_ok("");
        git.push_ok("");
        git.push_ok("");
        let tracker = tracker(git.clone());
        let info = tracker
            .create(Uuid::now_v7(), Path::new("/repos/app"), "feature/x", "main")
            .await
            .unwrap();

        tracker
            .complete(info.worktree_id, true, Some(Path::new("/repos/app")))
            .await
            .unwrap();

        let updated = tracker.get(info.worktree_id).unwrap();
        assert_eq!(updated.state, WorktreeState::Merged);

        let calls = git.calls.lock().unwrap();
        assert_eq!(calls[1][0], "checkout");
        assert_eq!(calls[2][0], "merge");
    }

    #[tokio::test]
    async fn abandon_unknown_worktree_returns_false() {
        let git = Arc::new(ScriptedRunner::new());
        let tracker = tracker(git);
        assert!(!tracker.abandon(Uuid::now_v7()));
    }

    #[tokio::test]
    async fn cleanup_removes_from_tracking_even_when_git_fails() {
        let git = Arc::new(ScriptedRunner::new());
        git.push_ok("");
        let tracker = tracker(git.clone());
        let info = tracker
            .create(Uuid::now_v7(), Path::new("/repos/app"), "feature/x", "main")
            .await
            .unwrap();

        git.push_err("worktree busy");
        let ok = tracker.cleanup(info.worktree_id).await;
        assert!(!ok);
        assert!(!tracker.exists(info.worktree_id));
    }

    #[tokio::test]
    async fn cleanup_completed_only_touches_terminal_states() {
        let git = Arc::new(ScriptedRunner::new());
        for _ in 0..4 {
            git.push_ok("");
        }
        let tracker = tracker(git.clone());

        let active = tracker
            .create(Uuid::now_v7(), Path::new("/repos/app"), "feature/a", "main")
            .await
            .unwrap();
        let completed = tracker
            .create(Uuid::now_v7(), Path::new("/repos/app"), "feature/b", "main")
            .await
            .unwrap();
        tracker.complete(completed.worktree_id, false, None).await.unwrap();

        let cleaned = tracker.cleanup_completed().await;
        assert_eq!(cleaned, 1);
        assert!(tracker.exists(active.worktree_id));
        assert!(!tracker.exists(completed.worktree_id));
    }

    #[tokio::test]
    async fn status_parses_ahead_behind_and_modified_count() {
        let git = Arc::new(ScriptedRunner::new());
        git.push_ok("");
        let tracker = tracker(git.clone());
        let info = tracker
            .create(Uuid::now_v7(), Path::new("/repos/app"), "feature/x", "main")
            .await
            .unwrap();

        git.push_ok("feature/x");
        git.push_ok(" M src/lib.rs\n?? new_file.rs");
        git.push_ok("3\t1");

        let status = tracker.status(info.worktree_id).await.unwrap().unwrap();
        assert_eq!(status.current_branch, "feature/x");
        assert_eq!(status.modified_files, 2);
        assert_eq!(status.ahead, 3);
        assert_eq!(status.behind, 1);
    }

    #[test]
    fn summary_counts_each_state() {
        let git = Arc::new(ScriptedRunner::new());
        let tracker = tracker(git);
        assert_eq!(tracker.summary().total, 0);
    }
}
