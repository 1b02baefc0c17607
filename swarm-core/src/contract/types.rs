use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SCHEMA_VERSION: &str = "2.0";

/// Every status a Task Contract can be in. Closed set — an unrecognized
/// string fails to deserialize rather than being accepted silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    PendingImplementer,
    ImplementationInProgress,
    PendingLocalReview,
    PendingJudgeReview,
    JudgeReviewInProgress,
    ReviewComplete,
    PendingRebuttal,
    Merged,
    TimeoutImplementer,
    TimeoutJudge,
    ErikConsultation,
}

impl TaskStatus {
    /// `merged` is the only status after which the contract is archived
    /// and must never be mutated again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Merged)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_else(|| "unknown".into());
        write!(f, "{s}")
    }
}

/// `trivial|minor|major|critical`. Drives the default `Limits` at
/// contract creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Trivial,
    Minor,
    Major,
    Critical,
}

impl Complexity {
    pub fn default_limits(self) -> Limits {
        match self {
            Self::Trivial => Limits {
                max_rebuttals: 3,
                max_review_cycles: 3,
                cost_ceiling_usd: 0.25,
                global_timeout_hours: 2.0,
            },
            Self::Minor => Limits {
                max_rebuttals: 3,
                max_review_cycles: 3,
                cost_ceiling_usd: 0.50,
                global_timeout_hours: 3.0,
            },
            Self::Major => Limits {
                max_rebuttals: 3,
                max_review_cycles: 3,
                cost_ceiling_usd: 2.00,
                global_timeout_hours: 4.0,
            },
            Self::Critical => Limits {
                max_rebuttals: 3,
                max_review_cycles: 3,
                cost_ceiling_usd: 5.00,
                global_timeout_hours: 6.0,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Specification {
    #[serde(default)]
    pub source_files: Vec<String>,
    pub target_file: String,
    pub requirements: Vec<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default)]
    pub allowed_paths: Vec<String>,
    #[serde(default)]
    pub forbidden_paths: Vec<String>,
    #[serde(default)]
    pub delete_allowed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    pub max_rebuttals: u32,
    pub max_review_cycles: u32,
    pub cost_ceiling_usd: f64,
    pub global_timeout_hours: f64,
}

/// `armed|tripped`, persisted both in the contract and in the breaker's
/// sidecar file so it survives a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerStatus {
    Armed,
    Tripped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerCounters {
    pub status: BreakerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_by: Option<String>,
    #[serde(default)]
    pub rebuttal_count: u32,
    #[serde(default)]
    pub review_cycle_count: u32,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(default)]
    pub scope_file_count: u32,
    #[serde(default)]
    pub last_judge_hashes: Vec<String>,
}

impl Default for BreakerCounters {
    fn default() -> Self {
        Self {
            status: BreakerStatus::Armed,
            triggered_by: None,
            rebuttal_count: 0,
            review_cycle_count: 0,
            tokens_used: 0,
            cost_usd: 0.0,
            scope_file_count: 0,
            last_judge_hashes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lock {
    pub held_by: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lock {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitInfo {
    pub base_branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_branch: Option<String>,
    #[serde(default)]
    pub checkpoint_shas: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandoffData {
    #[serde(default)]
    pub changed_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judge_report_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rebuttal_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_implementer_hash: Option<String>,
    /// Whether the most recent local review passed, tracked so a judge
    /// verdict that disagrees with it (same content hash) can be recognized
    /// as a logical paradox rather than silently re-judged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_local_review_passed: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_status: Option<TaskStatus>,
    pub new_status: TaskStatus,
    pub event: String,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_delta_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timestamps {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContract {
    pub schema_version: String,
    pub task_id: String,
    pub project: String,
    pub status: TaskStatus,
    pub status_reason: String,
    pub complexity: Complexity,
    pub specification: Specification,
    pub constraints: Constraints,
    pub limits: Limits,
    pub breaker: BreakerCounters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock: Option<Lock>,
    pub git: GitInfo,
    #[serde(default)]
    pub handoff_data: HandoffData,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    pub timestamps: Timestamps,
}

/// A single unit submitted by a worker for the Sandbox Gate (C6) to judge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftSubmission {
    pub task_id: String,
    pub draft_path: String,
    pub original_path: String,
    pub change_summary: String,
    pub submitted_at: DateTime<Utc>,
    pub original_hash: String,
    pub draft_hash: String,
    pub original_lines: usize,
    pub draft_lines: usize,
}
