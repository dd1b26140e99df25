//! Checkpoint manager (C8): a thin seam over [`crate::harness::git_manager`]
//! and [`crate::harness::test_gate`] that turns a gated commit into the
//! spec's `Checkpoint` record — `{feature, commit, timestamp}` — and persists
//! it to the KV store so a resumed session can list its checkpoint history
//! without re-walking git log.
//!
//! Grounded on [`crate::harness::git_manager::GitManager::create_gated_checkpoint`]
//! (test-gating + conventional commit message, already matches the checkpoint
//! scenario exactly) plus [`crate::kv`] for the durable record.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::AppError;
use crate::harness::git_manager::GitManager;
use crate::kv::KvStore;

/// Checkpoints never expire on their own, but we still bound how long a
/// session's checkpoint history is kept findable in the KV store.
const CHECKPOINT_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// An immutable record of one test-gated commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub feature: String,
    /// `None` when there was nothing to commit — the working tree already
    /// matched the last checkpoint.
    pub commit: Option<String>,
    pub timestamp: String,
}

pub struct CheckpointManager {
    git: GitManager,
    kv: KvStore,
}

impl CheckpointManager {
    pub fn new(git: GitManager, kv: KvStore) -> Self {
        Self { git, kv }
    }

    /// Run the tests, and only on success, commit and record a checkpoint
    /// for `feature` under `session_id`. Refuses to commit on a failing or
    /// missing test suite — the caller sees the underlying [`AppError`] and
    /// the feature's status is left untouched.
    pub fn checkpoint(
        &self,
        session_id: &str,
        feature: &str,
        description: &str,
    ) -> Result<Checkpoint, AppError> {
        let commit = match self.git.create_gated_checkpoint(feature, description) {
            Ok(commit) => Some(commit),
            Err(e) if e.to_string().contains("Nothing to commit") => None,
            Err(e) => return Err(AppError::internal(e.to_string())),
        };

        let checkpoint = Checkpoint {
            feature: feature.to_string(),
            commit,
            timestamp: Utc::now().to_rfc3339(),
        };

        let key = format!("checkpoint:{session_id}:{feature}");
        self.kv.set(&key, &checkpoint, Some(CHECKPOINT_TTL_SECS))?;
        info!(session = %session_id, feature, commit = ?checkpoint.commit, "recorded checkpoint");
        Ok(checkpoint)
    }

    /// Checkpoint history for a session, in prefix order (not necessarily
    /// chronological — callers that need strict ordering should sort on
    /// `timestamp`).
    pub fn history(&self, session_id: &str) -> Result<Vec<Checkpoint>, AppError> {
        let prefix = format!("checkpoint:{session_id}:");
        let entries: Vec<(String, Checkpoint)> = self.kv.scan(&prefix)?;
        Ok(entries.into_iter().map(|(_, c)| c).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryBackend;
    use std::process::Command;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn init_repo() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        let run = |args: &[&str]| {
            Command::new("git").args(args).current_dir(dir.path()).output().unwrap();
        };
        run(&["init"]);
        run(&["config", "user.email", "test@test.com"]);
        run(&["config", "user.name", "test"]);
        std::fs::write(dir.path().join("README.md"), "hello").unwrap();
        run(&["add", "-A"]);
        run(&["commit", "-m", "init"]);
        dir
    }

    fn manager(dir: &tempfile::TempDir) -> CheckpointManager {
        let git = GitManager::new(dir.path(), "checkpoint:");
        let kv = KvStore::new(Arc::new(MemoryBackend::new()), "ckpt");
        CheckpointManager::new(git, kv)
    }

    #[test]
    fn nothing_to_commit_yields_null_commit_id() {
        let dir = init_repo();
        let mgr = manager(&dir);
        let checkpoint = mgr.checkpoint("s1", "feat-a", "no changes yet").unwrap();
        assert!(checkpoint.commit.is_none());
        let history = mgr.history("s1").unwrap();
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn refuses_checkpoint_without_a_test_framework() {
        let dir = init_repo();
        std::fs::write(dir.path().join("new.txt"), "content").unwrap();
        let mgr = manager(&dir);
        // No pytest/unittest/npm project present, so the gate can't run.
        let result = mgr.checkpoint("s1", "feat-a", "adds new.txt");
        assert!(result.is_err());
    }
}
