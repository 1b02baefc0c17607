//! Worker Broker Contracts (C9) — the interface the core expects of an
//! external implementer/reviewer/judge process. This crate never spawns a
//! subprocess itself; the Listener's broker adapters do, and hand results
//! back through this trait. Declaring it here keeps the core fully
//! testable without a real worker on the other end.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::contract::{DraftSubmission, TaskContract};
use crate::error::CoreResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictKind {
    Pass,
    Conditional,
    Fail,
    CriticalHalt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalReviewReport {
    pub passed: bool,
    /// An infrastructure failure (the reviewer process itself errored) is
    /// reported as `critical=true` rather than swallowed as a pass.
    pub critical: bool,
    #[serde(default)]
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeVerdict {
    pub verdict: VerdictKind,
    #[serde(default)]
    pub blocking_issues: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    pub tokens_used: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalValidation {
    pub valid: bool,
    #[serde(default)]
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub side: String,
    pub reasoning: String,
    pub recommendation: String,
}

/// The interface a broker adapter must satisfy. Every call carries its own
/// timeout — the implementation is expected to race it against the
/// subprocess wait and return a `CoreError` on expiry rather than block
/// indefinitely, per §4.9 and §5's deadline-carrying-call rule.
#[async_trait]
pub trait WorkerBroker: Send + Sync {
    async fn run_implementer(
        &self,
        contract: &TaskContract,
        timeout: Duration,
    ) -> CoreResult<Vec<DraftSubmission>>;

    async fn run_local_review(
        &self,
        contract: &TaskContract,
        timeout: Duration,
    ) -> CoreResult<LocalReviewReport>;

    async fn run_judge(&self, contract: &TaskContract, timeout: Duration) -> CoreResult<JudgeVerdict>;

    async fn validate_proposal(
        &self,
        proposal_text: &str,
        timeout: Duration,
    ) -> CoreResult<ProposalValidation>;

    async fn resolve_conflict(
        &self,
        contract: &TaskContract,
        rebuttal: &str,
        judge_report: &str,
        timeout: Duration,
    ) -> CoreResult<ConflictResolution>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{create_contract, parse_proposal};

    struct StubBroker;

    #[async_trait]
    impl WorkerBroker for StubBroker {
        async fn run_implementer(
            &self,
            _contract: &TaskContract,
            _timeout: Duration,
        ) -> CoreResult<Vec<DraftSubmission>> {
            Ok(Vec::new())
        }

        async fn run_local_review(
            &self,
            _contract: &TaskContract,
            _timeout: Duration,
        ) -> CoreResult<LocalReviewReport> {
            Ok(LocalReviewReport {
                passed: true,
                critical: false,
                issues: Vec::new(),
            })
        }

        async fn run_judge(&self, _contract: &TaskContract, _timeout: Duration) -> CoreResult<JudgeVerdict> {
            Ok(JudgeVerdict {
                verdict: VerdictKind::Pass,
                blocking_issues: Vec::new(),
                suggestions: Vec::new(),
                tokens_used: 1200,
            })
        }

        async fn validate_proposal(
            &self,
            _proposal_text: &str,
            _timeout: Duration,
        ) -> CoreResult<ProposalValidation> {
            Ok(ProposalValidation {
                valid: true,
                issues: Vec::new(),
            })
        }

        async fn resolve_conflict(
            &self,
            _contract: &TaskContract,
            _rebuttal: &str,
            _judge_report: &str,
            _timeout: Duration,
        ) -> CoreResult<ConflictResolution> {
            Ok(ConflictResolution {
                side: "judge".to_string(),
                reasoning: "judge's blocking issue reproduces locally".to_string(),
                recommendation: "apply the judge's suggested fix".to_string(),
            })
        }
    }

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

    #[tokio::test]
    async fn stub_broker_round_trips_through_the_trait_object() {
        let broker: Box<dyn WorkerBroker> = Box::new(StubBroker);
        let contract = sample_contract();

        let review = broker
            .run_local_review(&contract, Duration::from_secs(30))
            .await
            .unwrap();
        assert!(review.passed);
        assert!(!review.critical);

        let verdict = broker.run_judge(&contract, Duration::from_secs(30)).await.unwrap();
        assert_eq!(verdict.verdict, VerdictKind::Pass);
    }

    #[test]
    fn verdict_kind_serializes_screaming_snake_case() {
        let v = serde_json::to_value(VerdictKind::CriticalHalt).unwrap();
        assert_eq!(v, serde_json::json!("CRITICAL_HALT"));
    }
}
