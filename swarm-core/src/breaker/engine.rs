use chrono::{DateTime, Utc};

use crate::contract::{BreakerStatus, TaskContract, TaskStatus};
use crate::state_machine::is_globally_timed_out;

/// The ten halt conditions from §4.5, in the order they're checked. The
/// first one whose condition holds wins — trips are mutually exclusive
/// per contract mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    RebuttalLimit,
    DestructiveDiff,
    LogicalParadox,
    HallucinationLoop,
    Nitpicking,
    Inactivity,
    Budget,
    ScopeCreep,
    ReviewCycleCap,
    GlobalTimeout,
}

impl TriggerKind {
    /// The human label recorded in `breaker.triggered_by`, matching the
    /// "Trigger N: Name" shape from the end-to-end scenarios.
    pub fn label(self) -> &'static str {
        match self {
            Self::RebuttalLimit => "Trigger 1: Rebuttal Limit",
            Self::DestructiveDiff => "Trigger 2: Destructive Diff",
            Self::LogicalParadox => "Trigger 3: Logical Paradox",
            Self::HallucinationLoop => "Trigger 4: Hallucination Loop",
            Self::Nitpicking => "Trigger 5: GPT-Energy Nitpicking",
            Self::Inactivity => "Trigger 6: Inactivity",
            Self::Budget => "Trigger 7: Budget",
            Self::ScopeCreep => "Trigger 8: Scope Creep",
            Self::ReviewCycleCap => "Trigger 9: Review Cycle Cap",
            Self::GlobalTimeout => "Trigger 10: Global Timeout",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakerTrigger {
    pub kind: TriggerKind,
    pub reason: String,
}

/// Signals the ten checks need but that don't live on the contract itself:
/// diff statistics from the sandbox gate, reviewer-agreement evidence, and
/// stall detection fed by the message bus.
#[derive(Debug, Clone, Default)]
pub struct BreakerInputs {
    /// Fraction of a target file's lines removed by the most recent
    /// accepted change.
    pub destructive_deletion_ratio: Option<f64>,
    /// The verdict and the local reviewer disagree with matching file
    /// hashes across the last two cycles, and no external conflict
    /// resolution has run.
    pub logical_paradox: bool,
    /// Content hash of the current draft/submission, checked against
    /// `breaker.last_judge_hashes`.
    pub current_content_hash: Option<String>,
    /// True once `review_cycle_count >= 3` and every issue across those
    /// cycles was style/formatting/whitespace or the issue set was empty.
    pub nitpicking_detected: bool,
    /// True if the currently active role has gone silent for 3x the
    /// heartbeat interval.
    pub role_stalled: bool,
}

/// Stateless evaluator over a contract snapshot plus [`BreakerInputs`].
pub struct BreakerEngine;

impl BreakerEngine {
    /// Run all ten checks in order; return the first that fires.
    pub fn check(
        contract: &TaskContract,
        inputs: &BreakerInputs,
        now: DateTime<Utc>,
    ) -> Option<BreakerTrigger> {
        if contract.breaker.rebuttal_count > contract.limits.max_rebuttals {
            return Some(BreakerTrigger {
                kind: TriggerKind::RebuttalLimit,
                reason: format!(
                    "rebuttal_count {} exceeds max_rebuttals {}",
                    contract.breaker.rebuttal_count, contract.limits.max_rebuttals
                ),
            });
        }

        if let Some(ratio) = inputs.destructive_deletion_ratio {
            if ratio > 0.5 {
                return Some(BreakerTrigger {
                    kind: TriggerKind::DestructiveDiff,
                    reason: format!("deletion_ratio {ratio:.2} exceeds 0.5"),
                });
            }
        }

        if inputs.logical_paradox {
            return Some(BreakerTrigger {
                kind: TriggerKind::LogicalParadox,
                reason: "verdict contradicts local reviewer with matching file hashes".into(),
            });
        }

        if let Some(hash) = &inputs.current_content_hash {
            if contract.breaker.last_judge_hashes.iter().any(|h| h == hash) {
                return Some(BreakerTrigger {
                    kind: TriggerKind::HallucinationLoop,
                    reason: format!("content hash {hash} was previously rejected by a FAIL verdict"),
                });
            }
        }

        if inputs.nitpicking_detected && contract.breaker.review_cycle_count >= 3 {
            return Some(BreakerTrigger {
                kind: TriggerKind::Nitpicking,
                reason: format!(
                    "{} review cycles with no blocking issues",
                    contract.breaker.review_cycle_count
                ),
            });
        }

        if inputs.role_stalled {
            return Some(BreakerTrigger {
                kind: TriggerKind::Inactivity,
                reason: "active role produced no heartbeat for 3x the interval".into(),
            });
        }

        if contract.breaker.cost_usd >= contract.limits.cost_ceiling_usd {
            return Some(BreakerTrigger {
                kind: TriggerKind::Budget,
                reason: format!(
                    "cost_usd {:.2} reached cost_ceiling_usd {:.2}",
                    contract.breaker.cost_usd, contract.limits.cost_ceiling_usd
                ),
            });
        }

        if contract.breaker.scope_file_count > 20 {
            return Some(BreakerTrigger {
                kind: TriggerKind::ScopeCreep,
                reason: format!(
                    "scope_file_count {} exceeds 20",
                    contract.breaker.scope_file_count
                ),
            });
        }

        if contract.breaker.review_cycle_count > contract.limits.max_review_cycles {
            return Some(BreakerTrigger {
                kind: TriggerKind::ReviewCycleCap,
                reason: format!(
                    "review_cycle_count {} exceeds max_review_cycles {}",
                    contract.breaker.review_cycle_count, contract.limits.max_review_cycles
                ),
            });
        }

        if is_globally_timed_out(contract, now) {
            return Some(BreakerTrigger {
                kind: TriggerKind::GlobalTimeout,
                reason: format!(
                    "task exceeded global_timeout_hours {}",
                    contract.limits.global_timeout_hours
                ),
            });
        }

        None
    }

    /// Mark the breaker tripped on the contract. The caller is still
    /// responsible for driving `apply_transition(BreakerTripped)` and
    /// writing the halt artifact — this only updates the counters so they
    /// land in the same mutation.
    pub fn trip(contract: &mut TaskContract, trigger: &BreakerTrigger) {
        contract.breaker.status = BreakerStatus::Tripped;
        contract.breaker.triggered_by = Some(trigger.kind.label().to_string());
    }

    /// Explicit operator action — not a state transition. Clears the
    /// tripped flag so automated progress can resume. Does not touch
    /// `status`; an operator is expected to also move the contract out of
    /// `erik_consultation` once they've addressed the cause.
    pub fn reset(contract: &mut TaskContract) {
        contract.breaker.status = BreakerStatus::Armed;
        contract.breaker.triggered_by = None;
    }

    /// Render `ERIK_HALT.md`: task id, trigger, and where the failing
    /// contract snapshot lives.
    pub fn halt_artifact(
        contract: &TaskContract,
        trigger: &BreakerTrigger,
        contract_snapshot_path: &str,
    ) -> String {
        format!(
            "# Halt: {}\n\n\
             **Task:** {}\n\
             **Trigger:** {}\n\
             **Reason:** {}\n\
             **Status at halt:** {}\n\
             **Contract snapshot:** {}\n",
            trigger.kind.label(),
            contract.task_id,
            trigger.kind.label(),
            trigger.reason,
            contract.status,
            contract_snapshot_path,
        )
    }
}

impl TaskContract {
    /// Convenience accessor so callers don't need `TaskStatus` in scope
    /// just to check whether a halt already happened.
    pub fn is_halted(&self) -> bool {
        self.status == TaskStatus::ErikConsultation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{create_contract, parse_proposal};

    fn sample_contract() -> TaskContract {
        let proposal = parse_proposal(
            &serde_json::json!({
                "project": "ver",
                "slug": "version",
                "target_file": "src/watchdog.py",
                "requirements": ["add --version flag"],
                "complexity": "minor",
            })
            .to_string(),
        )
        .unwrap();
        create_contract(&proposal, 1, "main")
    }

    #[test]
    fn no_trigger_fires_on_fresh_contract() {
        let c = sample_contract();
        let result = BreakerEngine::check(&c, &BreakerInputs::default(), Utc::now());
        assert!(result.is_none());
    }

    #[test]
    fn rebuttal_limit_fires_first() {
        let mut c = sample_contract();
        c.breaker.rebuttal_count = c.limits.max_rebuttals + 1;
        let trigger = BreakerEngine::check(&c, &BreakerInputs::default(), Utc::now()).unwrap();
        assert_eq!(trigger.kind, TriggerKind::RebuttalLimit);
        assert_eq!(trigger.kind.label(), "Trigger 1: Rebuttal Limit");
    }

    #[test]
    fn destructive_diff_over_half() {
        let c = sample_contract();
        let inputs = BreakerInputs {
            destructive_deletion_ratio: Some(0.7),
            ..Default::default()
        };
        let trigger = BreakerEngine::check(&c, &inputs, Utc::now()).unwrap();
        assert_eq!(trigger.kind, TriggerKind::DestructiveDiff);
    }

    #[test]
    fn hallucination_loop_on_repeated_hash() {
        let mut c = sample_contract();
        c.breaker.last_judge_hashes = vec!["abc123".into()];
        let inputs = BreakerInputs {
            current_content_hash: Some("abc123".into()),
            ..Default::default()
        };
        let trigger = BreakerEngine::check(&c, &inputs, Utc::now()).unwrap();
        assert_eq!(trigger.kind, TriggerKind::HallucinationLoop);
    }

    #[test]
    fn nitpicking_requires_three_cycles() {
        let mut c = sample_contract();
        c.breaker.review_cycle_count = 2;
        let inputs = BreakerInputs {
            nitpicking_detected: true,
            ..Default::default()
        };
        assert!(BreakerEngine::check(&c, &inputs, Utc::now()).is_none());

        c.breaker.review_cycle_count = 3;
        let trigger = BreakerEngine::check(&c, &inputs, Utc::now()).unwrap();
        assert_eq!(trigger.kind, TriggerKind::Nitpicking);
    }

    #[test]
    fn budget_trigger_at_or_over_ceiling() {
        let mut c = sample_contract();
        c.breaker.cost_usd = c.limits.cost_ceiling_usd;
        let trigger = BreakerEngine::check(&c, &BreakerInputs::default(), Utc::now()).unwrap();
        assert_eq!(trigger.kind, TriggerKind::Budget);
    }

    #[test]
    fn scope_creep_over_twenty_files() {
        let mut c = sample_contract();
        c.breaker.scope_file_count = 21;
        let trigger = BreakerEngine::check(&c, &BreakerInputs::default(), Utc::now()).unwrap();
        assert_eq!(trigger.kind, TriggerKind::ScopeCreep);
    }

    #[test]
    fn review_cycle_cap_exceeded() {
        let mut c = sample_contract();
        c.breaker.review_cycle_count = c.limits.max_review_cycles + 1;
        let trigger = BreakerEngine::check(&c, &BreakerInputs::default(), Utc::now()).unwrap();
        assert_eq!(trigger.kind, TriggerKind::ReviewCycleCap);
    }

    #[test]
    fn global_timeout_fires_last() {
        let mut c = sample_contract();
        c.limits.global_timeout_hours = 1.0;
        c.timestamps.created_at = Utc::now() - chrono::Duration::hours(2);
        let trigger = BreakerEngine::check(&c, &BreakerInputs::default(), Utc::now()).unwrap();
        assert_eq!(trigger.kind, TriggerKind::GlobalTimeout);
    }

    #[test]
    fn trip_sets_status_and_label() {
        let mut c = sample_contract();
        let trigger = BreakerTrigger {
            kind: TriggerKind::Budget,
            reason: "over ceiling".into(),
        };
        BreakerEngine::trip(&mut c, &trigger);
        assert_eq!(c.breaker.status, BreakerStatus::Tripped);
        assert_eq!(c.breaker.triggered_by.as_deref(), Some("Trigger 7: Budget"));
    }

    #[test]
    fn reset_clears_tripped_state() {
        let mut c = sample_contract();
        let trigger = BreakerTrigger {
            kind: TriggerKind::Budget,
            reason: "over ceiling".into(),
        };
        BreakerEngine::trip(&mut c, &trigger);
        BreakerEngine::reset(&mut c);
        assert_eq!(c.breaker.status, BreakerStatus::Armed);
        assert!(c.breaker.triggered_by.is_none());
    }

    #[test]
    fn halt_artifact_contains_task_and_trigger() {
        let c = sample_contract();
        let trigger = BreakerTrigger {
            kind: TriggerKind::RebuttalLimit,
            reason: "exceeded".into(),
        };
        let artifact = BreakerEngine::halt_artifact(&c, &trigger, "/path/snapshot.json");
        assert!(artifact.contains(&c.task_id));
        assert!(artifact.contains("Trigger 1: Rebuttal Limit"));
        assert!(artifact.contains("/path/snapshot.json"));
    }
}
