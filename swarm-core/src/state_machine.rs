//! State Machine (C4) — the transition table, lock discipline, history
//! ledger and cost accounting for a single [`TaskContract`].
//!
//! `transition` is a pure function: given a status and an event it either
//! names the one legal successor status or fails loudly. `apply_transition`
//! wraps it with everything §4.4 requires of an *accepted* transition:
//! acquiring (or stealing an expired) lock, writing the new status and
//! reason, appending a history entry, folding in a cost delta, and
//! releasing the lock. Persisting the result and asking the Git layer for
//! a checkpoint commit is the caller's job — this module never touches
//! disk.

use chrono::{DateTime, Duration, Utc};

use crate::contract::{HistoryEntry, Lock, TaskContract, TaskStatus};
use crate::error::{CoreError, CoreResult};

/// The events that can legally occur against a contract, per §4.4's
/// transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionEvent {
    ImplStarted,
    DraftAccepted,
    LocalPass,
    LocalFail,
    ReviewStarted,
    VerdictPass,
    VerdictConditional,
    VerdictFail,
    FailWithCyclesLeft,
    RebuttalResolved,
    MergeOk,
    BreakerTripped,
    ImplementerTimeout,
    JudgeTimeout,
    SecondStrike,
}

impl TransitionEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ImplStarted => "impl_started",
            Self::DraftAccepted => "draft_accepted",
            Self::LocalPass => "local_pass",
            Self::LocalFail => "local_fail",
            Self::ReviewStarted => "review_started",
            Self::VerdictPass => "verdict_pass",
            Self::VerdictConditional => "verdict_conditional",
            Self::VerdictFail => "verdict_fail",
            Self::FailWithCyclesLeft => "fail_with_cycles_left",
            Self::RebuttalResolved => "rebuttal_resolved",
            Self::MergeOk => "merge_ok",
            Self::BreakerTripped => "breaker_tripped",
            Self::ImplementerTimeout => "implementer_timeout",
            Self::JudgeTimeout => "judge_timeout",
            Self::SecondStrike => "second_strike",
        }
    }
}

impl std::fmt::Display for TransitionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The result of a legal `transition()` call.
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub new_status: TaskStatus,
    pub reason: String,
}

/// Legal transition table. `breaker_tripped` is accepted from every
/// non-terminal status — the one blanket rule, mirrored from how a halt
/// can interrupt any phase of the pipeline.
fn legal_successor(status: TaskStatus, event: TransitionEvent) -> Option<TaskStatus> {
    use TaskStatus::*;
    use TransitionEvent::*;

    if event == BreakerTripped && !status.is_terminal() {
        return Some(ErikConsultation);
    }

    match (status, event) {
        (PendingImplementer, ImplStarted) => Some(ImplementationInProgress),
        (ImplementationInProgress, DraftAccepted) => Some(PendingLocalReview),
        (ImplementationInProgress, ImplementerTimeout) => Some(TimeoutImplementer),
        (TimeoutImplementer, ImplStarted) => Some(ImplementationInProgress),
        (TimeoutImplementer, SecondStrike) => Some(ErikConsultation),

        (PendingLocalReview, LocalPass) => Some(PendingJudgeReview),
        (PendingLocalReview, LocalFail) => Some(PendingImplementer),

        (PendingJudgeReview, ReviewStarted) => Some(JudgeReviewInProgress),
        (PendingJudgeReview, FailWithCyclesLeft) => Some(PendingRebuttal),
        (PendingJudgeReview, JudgeTimeout) => Some(TimeoutJudge),
        (TimeoutJudge, ReviewStarted) => Some(JudgeReviewInProgress),
        (TimeoutJudge, SecondStrike) => Some(ErikConsultation),

        (JudgeReviewInProgress, VerdictPass) => Some(ReviewComplete),
        (JudgeReviewInProgress, VerdictConditional) => Some(PendingRebuttal),
        (JudgeReviewInProgress, VerdictFail) => Some(PendingRebuttal),
        (JudgeReviewInProgress, FailWithCyclesLeft) => Some(PendingRebuttal),

        (PendingRebuttal, RebuttalResolved) => Some(PendingImplementer),

        (ReviewComplete, MergeOk) => Some(Merged),

        _ => None,
    }
}

/// Pure transition: the only place that decides whether `(status, event)`
/// has a legal successor.
pub fn transition(
    status: TaskStatus,
    event: TransitionEvent,
    reason: &str,
) -> CoreResult<TransitionOutcome> {
    match legal_successor(status, event) {
        Some(new_status) => Ok(TransitionOutcome {
            new_status,
            reason: reason.to_string(),
        }),
        None => Err(CoreError::illegal_transition(status.to_string(), event.to_string())),
    }
}

/// Default lease duration for a contract lock, refreshed by the holder.
pub const DEFAULT_LOCK_SECONDS: i64 = 120;

/// Apply an accepted transition end to end: acquire or steal the lock,
/// move the status, append a history entry, fold in a cost delta, and
/// release the lock. The contract is mutated in place; persisting it is
/// the caller's responsibility.
#[allow(clippy::too_many_arguments)]
pub fn apply_transition(
    contract: &mut TaskContract,
    event: TransitionEvent,
    actor: &str,
    reason: &str,
    cost_delta_usd: Option<f64>,
    commit_sha: Option<String>,
) -> CoreResult<()> {
    if contract.status.is_terminal() {
        return Err(CoreError::illegal_transition(
            contract.status.to_string(),
            event.to_string(),
        ));
    }

    acquire_or_steal_lock(contract, actor)?;

    let outcome = transition(contract.status, event, reason)?;
    let old_status = contract.status;
    let now = Utc::now();

    contract.status = outcome.new_status;
    contract.status_reason = outcome.reason.clone();
    contract.timestamps.updated_at = now;

    if let Some(delta) = cost_delta_usd {
        contract.breaker.cost_usd += delta;
    }

    contract.history.push(HistoryEntry {
        timestamp: now,
        old_status: Some(old_status),
        new_status: outcome.new_status,
        event: event.to_string(),
        actor: actor.to_string(),
        reason: Some(outcome.reason),
        cost_delta_usd,
        commit_sha,
    });

    release_lock(contract);
    Ok(())
}

fn acquire_or_steal_lock(contract: &mut TaskContract, actor: &str) -> CoreResult<()> {
    let now = Utc::now();
    if let Some(lock) = &contract.lock {
        if lock.held_by != actor && !lock.is_expired(now) {
            return Err(CoreError::locked(
                lock.held_by.clone(),
                lock.expires_at.to_rfc3339(),
            ));
        }
    }
    contract.lock = Some(Lock {
        held_by: actor.to_string(),
        acquired_at: now,
        expires_at: now + Duration::seconds(DEFAULT_LOCK_SECONDS),
    });
    Ok(())
}

fn release_lock(contract: &mut TaskContract) {
    contract.lock = None;
}

/// Multiplies `(tokens_in, tokens_out)` through a per-model cost table and
/// folds the result into `breaker.cost_usd` / `breaker.tokens_used`. The
/// caller is expected to pass the returned delta into `apply_transition`
/// so the matching history entry carries it.
pub fn update_cost(contract: &mut TaskContract, tokens_in: u64, tokens_out: u64, model: &str) -> f64 {
    let (rate_in, rate_out) = model_cost_per_million(model);
    let delta = (tokens_in as f64 / 1_000_000.0) * rate_in
        + (tokens_out as f64 / 1_000_000.0) * rate_out;
    contract.breaker.cost_usd += delta;
    contract.breaker.tokens_used += tokens_in + tokens_out;
    delta
}

/// USD per million tokens, (input, output). Unknown models fall back to a
/// conservative default rather than being treated as free.
fn model_cost_per_million(model: &str) -> (f64, f64) {
    match model {
        m if m.contains("opus") => (15.0, 75.0),
        m if m.contains("sonnet") => (3.0, 15.0),
        m if m.contains("haiku") => (0.80, 4.0),
        _ => (3.0, 15.0),
    }
}

/// Whether `contract` has run past its global timeout (§4.4, trigger 10).
pub fn is_globally_timed_out(contract: &TaskContract, now: DateTime<Utc>) -> bool {
    let elapsed_hours = now
        .signed_duration_since(contract.timestamps.created_at)
        .num_seconds() as f64
        / 3600.0;
    elapsed_hours > contract.limits.global_timeout_hours
}
