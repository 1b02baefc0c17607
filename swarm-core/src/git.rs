//! Git Checkpoint Layer (C7) — branch-per-task isolation with one commit
//! per state transition, bounded by conflict-aware merge-to-mainline.
//!
//! The working tree is owned by the Listener; workers never call this
//! module directly. Every mutating git invocation goes through
//! `run_git_with_retry`, which backs off on the same transient failure
//! shapes (lock contention, a concurrent git process, a network blip) a
//! human would just rerun the command for.

use std::path::PathBuf;
use std::process::Command;

use crate::error::{CoreError, CoreResult};

const DEFAULT_MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 100;

/// Commit message prefix identifying a checkpoint made by this layer, as
/// opposed to a human or worker commit.
const CHECKPOINT_PREFIX: &str = "[TASK";

pub struct GitCheckpointLayer {
    working_dir: PathBuf,
    max_retries: u32,
}

impl GitCheckpointLayer {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn run_git(&self, args: &[&str]) -> CoreResult<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.working_dir)
            .output()
            .map_err(|e| CoreError::git("execute", e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CoreError::git(args.join(" "), stderr.to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn run_git_with_retry(&self, args: &[&str]) -> CoreResult<String> {
        let mut last_err = None;
        for attempt in 0..=self.max_retries {
            match self.run_git(args) {
                Ok(out) => return Ok(out),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = RETRY_BASE_DELAY_MS * (1 << attempt);
                    std::thread::sleep(std::time::Duration::from_millis(delay));
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| CoreError::git("retry", "max retries exceeded")))
    }

    pub fn current_branch(&self) -> CoreResult<String> {
        self.run_git(&["rev-parse", "--abbrev-ref", "HEAD"])
    }

    pub fn current_commit(&self) -> CoreResult<String> {
        self.run_git(&["rev-parse", "HEAD"])
    }

    pub fn has_uncommitted_changes(&self) -> CoreResult<bool> {
        let status = self.run_git(&["status", "--porcelain"])?;
        Ok(!status.is_empty())
    }

    /// Refuses if the working tree is dirty; creates and checks out
    /// `task/<task_id>` off `base`, returning the base commit so the
    /// caller can record it on the contract's `git.base_commit`.
    pub fn create_task_branch(&self, task_id: &str, base: &str) -> CoreResult<TaskBranch> {
        if self.has_uncommitted_changes()? {
            return Err(CoreError::git(
                "create_task_branch",
                "working tree is dirty; refusing to branch",
            ));
        }

        self.run_git_with_retry(&["checkout", base])?;
        let base_commit = self.current_commit()?;

        let branch_name = format!("task/{task_id}");
        self.run_git_with_retry(&["checkout", "-b", &branch_name])?;

        Ok(TaskBranch {
            branch_name,
            base_commit,
        })
    }

    /// Stage `changed_files` and commit with the `[TASK: <id>] Transition:
    /// <status> (Event: <event>)` message §4.7 mandates. Returns the new
    /// commit sha so the caller can append it to `git.checkpoint_shas`.
    pub fn checkpoint(
        &self,
        task_id: &str,
        status: &str,
        event: &str,
        changed_files: &[String],
    ) -> CoreResult<String> {
        if changed_files.is_empty() {
            self.run_git_with_retry(&["add", "-A"])?;
        } else {
            let mut args = vec!["add"];
            args.extend(changed_files.iter().map(String::as_str));
            self.run_git_with_retry(&args)?;
        }

        if !self.has_uncommitted_changes()? {
            return Err(CoreError::git("checkpoint", "nothing to commit"));
        }

        let message = format!("{CHECKPOINT_PREFIX}: {task_id}] Transition: {status} (Event: {event})");
        self.run_git_with_retry(&["commit", "-m", &message])?;
        self.current_commit()
    }

    /// Check out `target`, merge the task branch in, and report the
    /// outcome. A conflicting merge is aborted and reported rather than
    /// resolved — the caller trips the breaker on `Conflict`.
    pub fn merge_to_main(&self, task_id: &str, target: &str) -> CoreResult<MergeOutcome> {
        let branch_name = format!("task/{task_id}");
        self.run_git_with_retry(&["checkout", target])?;

        let output = Command::new("git")
            .args(["merge", "--no-ff", &branch_name, "-m", &format!("Merge {branch_name} into {target}")])
            .current_dir(&self.working_dir)
            .output()
            .map_err(|e| CoreError::git("merge", e.to_string()))?;

        if output.status.success() {
            let merge_commit = self.current_commit()?;
            return Ok(MergeOutcome::Merged { merge_commit });
        }

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let _ = self.run_git(&["merge", "--abort"]);
        Ok(MergeOutcome::Conflict { detail: stderr })
    }

    /// Abort any in-flight merge and hard-reset the working tree to
    /// `base`, discarding everything since.
    pub fn rollback(&self, base: &str) -> CoreResult<()> {
        let _ = self.run_git(&["merge", "--abort"]);
        self.run_git(&["cat-file", "-t", base])?;
        self.run_git_with_retry(&["reset", "--hard", base])?;
        Ok(())
    }
}

pub struct TaskBranch {
    pub branch_name: String,
    pub base_commit: String,
}

/// Result of [`GitCheckpointLayer::merge_to_main`]. A `Conflict` is never
/// auto-resolved — the caller trips the breaker and halts to
/// `erik_consultation` instead.
#[derive(Debug, Clone)]
pub enum MergeOutcome {
    Merged { merge_commit: String },
    Conflict { detail: String },
}
