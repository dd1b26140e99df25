//! Progress & session manager (C7) — resume orientation and clean-state
//! checks, completing what [`super::feature_list`] and [`super::progress`]
//! leave out.
//!
//! Grounded in the teacher's [`super::git_manager::GitManager::recent_commits`]
//! / `has_uncommitted_changes` plus [`super::progress::ProgressTracker`]'s
//! last-N-entries read; `create_resume_context`'s section order and
//! `verify_clean_state`'s error-token scan follow spec.md §4.7 verbatim.

use std::path::Path;

use crate::harness::error::HarnessResult;
use crate::harness::feature_list::FeatureList;
use crate::harness::git_manager::GitManager;
use crate::harness::progress::ProgressTracker;

/// Substrings in recent progress entries that mark a prior run as having
/// left the workspace in a bad state.
const ERROR_INDICATORS: &[&str] = &["error", "failed", "panic", "exception"];

/// Deterministic multi-section orientation for a resumed session: working
/// directory, last 10 progress entries, last 5 git commits, progress
/// summary, and the next feature.
pub fn create_resume_context(
    workspace: &Path,
    progress: &ProgressTracker,
    features: &FeatureList,
    git: &GitManager,
) -> HarnessResult<String> {
    let mut out = String::new();
    out.push_str(&format!("## Working directory\n{}\n\n", workspace.display()));

    out.push_str("## Recent progress (last 10)\n");
    let recent = progress.read_last(10)?;
    if recent.is_empty() {
        out.push_str("(none recorded)\n");
    } else {
        for entry in &recent {
            out.push_str(&format!("- {}\n", entry.to_log_line()));
        }
    }
    out.push('\n');

    out.push_str("## Recent commits (last 5)\n");
    match git.recent_commits(5) {
        Ok(commits) if !commits.is_empty() => {
            for commit in &commits {
                out.push_str(&format!("- {} {}\n", commit.hash, commit.message));
            }
        }
        _ => out.push_str("(no commits, or not a git repository)\n"),
    }
    out.push('\n');

    let summary = features.get_progress_summary()?;
    out.push_str(&format!(
        "## Progress summary\n{} / {} features passing ({:.0}%)\n\n",
        summary.passing,
        summary.total,
        summary.rate * 100.0
    ));

    out.push_str("## Next feature\n");
    match &summary.next_feature {
        Some(name) => out.push_str(&format!("{name}\n")),
        None => out.push_str("(no unfinished features)\n"),
    }

    Ok(out)
}

/// `false` when the VCS reports uncommitted changes, or when the most
/// recent progress entries contain an error-indicative token — either way,
/// resuming should not assume the last run left a clean slate.
pub fn verify_clean_state(progress: &ProgressTracker, git: &GitManager) -> HarnessResult<bool> {
    if git.has_uncommitted_changes().unwrap_or(true) {
        return Ok(false);
    }
    let recent = progress.read_last(5)?;
    let has_error_marker = recent.iter().any(|entry| {
        let summary = entry.summary.to_lowercase();
        ERROR_INDICATORS.iter().any(|tok| summary.contains(tok))
    });
    Ok(!has_error_marker)
}
