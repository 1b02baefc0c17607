//! The Listener Daemon (C8) — a single long-lived event loop that owns the
//! Git working tree and drives one task contract at a time through the
//! state machine, the breaker, the sandbox gate, and a broker adapter.
//!
//! This never runs a worker in-process. [`swarm_core::WorkerBroker`] is an
//! interface; whatever implements it is responsible for spawning and
//! supervising the actual subprocess. The Listener's job is to poll the
//! bus, dispatch by message type, keep a heartbeat going while a task is
//! active, and make sure `STOP_TASK` and a breaker trip both land the
//! contract in a terminal-enough state within one poll cycle.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use swarm_core::breaker::{BreakerEngine, BreakerInputs, BreakerSidecar, SidecarLoad};
use swarm_core::bus::{Message, MessageBus, MessageType};
use swarm_core::contract::{create_contract, parse_proposal, TaskContract};
use swarm_core::error::{CoreError, CoreResult};
use swarm_core::git::{GitCheckpointLayer, MergeOutcome};
use swarm_core::sandbox::{GateDecision, SandboxGate};
use swarm_core::state_machine::{apply_transition, TransitionEvent};
use swarm_core::store::AtomicStore;
use swarm_core::{CoreConfig, WorkerBroker};

/// Which option index a `QUESTION` is answered with when nothing more
/// specific is configured. §4.8 names "first option by default".
#[derive(Debug, Clone, Copy)]
pub enum QuestionPolicy {
    FirstOption,
    FixedIndex(usize),
}

impl Default for QuestionPolicy {
    fn default() -> Self {
        Self::FirstOption
    }
}

pub struct Listener {
    config: CoreConfig,
    bus: MessageBus,
    broker: Arc<dyn WorkerBroker>,
    git: GitCheckpointLayer,
    gate: SandboxGate,
    breaker_sidecar: BreakerSidecar,
    question_policy: QuestionPolicy,
    cancel: CancellationToken,
    cursor: Mutex<PollCursor>,
}

struct PollCursor {
    since: Option<DateTime<Utc>>,
    last_heartbeat: DateTime<Utc>,
}

impl Listener {
    pub fn new(config: CoreConfig, broker: Arc<dyn WorkerBroker>, workspace_root: PathBuf) -> CoreResult<Self> {
        let bus = MessageBus::open(&config.bus_path);
        bus.connect(&config.agent_id)?;

        let git = GitCheckpointLayer::new(workspace_root);
        let gate = SandboxGate::new(config.sandbox_dir());

        let breaker_sidecar = BreakerSidecar::open(config.breaker_sidecar_path());
        match breaker_sidecar.load_or_init()? {
            SidecarLoad::RecoveredFromCorruption { backup_path, .. } => {
                warn!(backup = %backup_path.display(), "breaker sidecar was corrupt, recovered a fresh one");
            }
            SidecarLoad::Migrated { from_version, .. } => {
                info!(from_version = %from_version, "breaker sidecar migrated to the current schema");
            }
            SidecarLoad::Loaded(_) | SidecarLoad::Initialized(_) => {}
        }

        Ok(Self {
            config,
            bus,
            broker,
            git,
            gate,
            breaker_sidecar,
            question_policy: QuestionPolicy::default(),
            cancel: CancellationToken::new(),
            cursor: Mutex::new(PollCursor {
                since: None,
                last_heartbeat: Utc::now() - chrono::Duration::days(1),
            }),
        })
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Boot-time health check: the bus store must be reachable. Fails fast
    /// and loud rather than entering the poll loop against a broken store.
    pub fn assert_broker_health(&self) -> CoreResult<()> {
        self.bus.connect(&self.config.agent_id)?;
        info!(agent_id = %self.config.agent_id, "registered with bus");
        Ok(())
    }

    /// Run the poll → dispatch → heartbeat loop until cancelled, sleeping
    /// `poll_interval_seconds` between iterations.
    pub async fn run_forever(&self) -> CoreResult<()> {
        self.assert_broker_health()?;

        loop {
            if self.cancel.is_cancelled() {
                info!("listener cancelled, exiting poll loop");
                return Ok(());
            }

            self.poll_once().await?;

            tokio::time::sleep(Duration::from_secs(self.config.poll_interval_seconds)).await;
        }
    }

    /// Process every message pending for this agent once, in receive
    /// order, then emit a heartbeat and check for a stall if a task is
    /// active. Exposed on its own so a caller (or `--once` on the CLI) can
    /// drive a single cycle without the sleep.
    pub async fn poll_once(&self) -> CoreResult<()> {
        let since = self.cursor.lock().unwrap().since;
        let messages = self.bus.receive(&self.config.agent_id, since)?;

        for message in &messages {
            self.cursor.lock().unwrap().since = Some(message.timestamp);
            if let Err(e) = self.dispatch(message).await {
                error!(error = %e, message_type = %message.message_type, "dispatch failed");
            }
            if self.cancel.is_cancelled() {
                break;
            }
        }

        if self.has_active_task()? {
            let last_heartbeat = self.cursor.lock().unwrap().last_heartbeat;
            let heartbeat_age = Utc::now().signed_duration_since(last_heartbeat);
            if heartbeat_age.num_seconds() >= self.config.heartbeat_interval_seconds as i64 {
                self.emit_heartbeat()?;
                self.cursor.lock().unwrap().last_heartbeat = Utc::now();
            }
            self.check_stall()?;
        }
        Ok(())
    }

    async fn dispatch(&self, message: &Message) -> CoreResult<()> {
        match message.message_type {
            MessageType::StopTask => self.handle_stop_task(message).await,
            MessageType::ProposalReady => self.handle_proposal_ready(message).await,
            MessageType::DraftReady => self.handle_draft_ready(message).await,
            MessageType::Question => self.handle_question(message).await,
            MessageType::VerdictSignal => self.handle_verdict_signal(message).await,
            MessageType::ReviewNeeded => self.handle_review_needed(message).await,
            MessageType::Answer
            | MessageType::Heartbeat
            | MessageType::DraftAccepted
            | MessageType::DraftRejected
            | MessageType::DraftEscalated => Ok(()),
        }
    }

    /// Whether the active contract (if any) is sitting in
    /// `erik_consultation` — the signal `main` uses to pick a forced-halt
    /// exit code at shutdown.
    pub fn halted(&self) -> CoreResult<bool> {
        Ok(self
            .load_contract()?
            .map(|c| c.status == swarm_core::TaskStatus::ErikConsultation)
            .unwrap_or(false))
    }

    /// Must interrupt the current pipeline within one poll cycle. A
    /// failure tearing down in-flight work still lands the task in
    /// `erik_consultation` rather than leaving state stale.
    async fn handle_stop_task(&self, message: &Message) -> CoreResult<()> {
        warn!(from = %message.from, "STOP_TASK received, cancelling");
        self.cancel.cancel();

        match self.load_contract()? {
            Some(mut contract) if !contract.status.is_terminal() => {
                let result = apply_transition(
                    &mut contract,
                    TransitionEvent::BreakerTripped,
                    &self.config.agent_id,
                    "STOP_TASK received",
                    None,
                    None,
                );
                if let Err(e) = result {
                    error!(error = %e, "failed to halt on STOP_TASK");
                    return Err(CoreError::cancelled("STOP_TASK teardown failed"));
                }
                self.finalize_transition(&mut contract, TransitionEvent::BreakerTripped)?;
                self.save_contract(&contract)?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Ask Git (C7) for a checkpoint commit after an already-applied
    /// transition and append the resulting history entry to
    /// `transition.ndjson`, one line per commit per §4.7/§4.4.
    ///
    /// A checkpoint with nothing staged (no file delta for this
    /// transition, e.g. `IMPL_STARTED`) is not a failure — it's logged and
    /// skipped rather than propagated.
    fn finalize_transition(&self, contract: &mut TaskContract, event: TransitionEvent) -> CoreResult<()> {
        let status = contract.status.to_string();
        match self.git.checkpoint(
            &contract.task_id,
            &status,
            event.as_str(),
            &contract.handoff_data.changed_files,
        ) {
            Ok(commit_sha) => {
                contract.git.checkpoint_shas.push(commit_sha.clone());
                if let Some(last) = contract.history.last_mut() {
                    last.commit_sha = Some(commit_sha);
                }
            }
            Err(CoreError::Git { ref message, .. }) if message.contains("nothing to commit") => {
                info!(task_id = %contract.task_id, event = event.as_str(), "checkpoint skipped, nothing to commit");
            }
            Err(e) => return Err(e),
        }

        if let Some(last) = contract.history.last() {
            let mut record = serde_json::to_value(last)?;
            if let Some(map) = record.as_object_mut() {
                map.insert("task_id".to_string(), serde_json::json!(contract.task_id));
            }
            AtomicStore::append(&self.config.transition_log_path(), serde_json::to_string(&record)?.as_bytes())?;
        }
        Ok(())
    }

    async fn handle_proposal_ready(&self, message: &Message) -> CoreResult<()> {
        let proposal_text = message.payload.to_string();
        let proposal = parse_proposal(&proposal_text)?;

        let validation = self
            .broker
            .validate_proposal(&proposal_text, Duration::from_secs(60))
            .await?;
        if !validation.valid {
            warn!(issues = ?validation.issues, "proposal failed validation");
            return Err(CoreError::validation(validation.issues.join("; ")));
        }

        let sequence = self.next_sequence()?;
        let mut contract = create_contract(&proposal, sequence, "main");

        let branch = self.git.create_task_branch(&contract.task_id, &contract.git.base_branch)?;
        contract.git.base_commit = Some(branch.base_commit);
        contract.git.task_branch = Some(branch.branch_name);

        apply_transition(
            &mut contract,
            TransitionEvent::ImplStarted,
            &self.config.agent_id,
            "proposal accepted, starting implementer",
            None,
            None,
        )?;
        self.finalize_transition(&mut contract, TransitionEvent::ImplStarted)?;
        self.save_contract(&contract)?;

        self.broker
            .run_implementer(&contract, Duration::from_secs(1800))
            .await?;
        Ok(())
    }

    async fn handle_draft_ready(&self, message: &Message) -> CoreResult<()> {
        let Some(mut contract) = self.load_contract()? else {
            return Err(CoreError::validation("DRAFT_READY with no active contract"));
        };

        let files_touched = contract.handoff_data.changed_files.len() + 1;
        let decision = self.gate.handle(&contract.task_id, files_touched)?;

        match decision {
            GateDecision::Accept { draft_hash, .. } => {
                self.gate.apply(&contract.task_id, &self.config.transition_log_path())?;
                contract.handoff_data.last_implementer_hash = Some(draft_hash);
                apply_transition(
                    &mut contract,
                    TransitionEvent::DraftAccepted,
                    &self.config.agent_id,
                    "draft accepted by the gate",
                    None,
                    None,
                )?;
                self.finalize_transition(&mut contract, TransitionEvent::DraftAccepted)?;
                self.bus.send(Message::new(
                    MessageType::DraftAccepted,
                    &self.config.agent_id,
                    &message.from,
                    serde_json::json!({"task_id": contract.task_id}),
                ))?;
                // Kick off local review now that the draft is on disk.
                self.bus.send(Message::new(
                    MessageType::ReviewNeeded,
                    &self.config.agent_id,
                    &self.config.agent_id,
                    serde_json::json!({"task_id": contract.task_id, "stage": "local"}),
                ))?;
            }
            GateDecision::Reject { reason } => {
                self.bus.send(Message::new(
                    MessageType::DraftRejected,
                    &self.config.agent_id,
                    &message.from,
                    serde_json::json!({"task_id": contract.task_id, "reason": reason}),
                ))?;
            }
            GateDecision::Escalate { reason } => {
                // §4.6: the gate escalating leaves the contract's status
                // untouched, awaiting an operator — it does not trip the
                // breaker itself.
                self.bus.send(Message::new(
                    MessageType::DraftEscalated,
                    &self.config.agent_id,
                    &message.from,
                    serde_json::json!({"task_id": contract.task_id, "reason": reason}),
                ))?;
            }
        }

        self.save_contract(&contract)?;
        Ok(())
    }

    /// Drives the two-stage review pipeline started by `ReviewNeeded`:
    /// `stage: "local"` runs the local reviewer and maps its verdict onto
    /// `LocalPass`/`LocalFail`; reaching `pending_judge_review` then
    /// self-sends the next `ReviewNeeded` to start judge review.
    async fn handle_review_needed(&self, message: &Message) -> CoreResult<()> {
        let Some(mut contract) = self.load_contract()? else {
            return Ok(());
        };

        let stage = message.payload.get("stage").and_then(|v| v.as_str()).unwrap_or("local");

        match stage {
            "local" => {
                let report = self
                    .broker
                    .run_local_review(&contract, Duration::from_secs(600))
                    .await?;
                contract.handoff_data.last_local_review_passed = Some(report.passed);

                let event = if report.passed {
                    TransitionEvent::LocalPass
                } else {
                    TransitionEvent::LocalFail
                };
                apply_transition(&mut contract, event, &self.config.agent_id, "local review complete", None, None)?;
                self.finalize_transition(&mut contract, event)?;

                if report.passed {
                    self.bus.send(Message::new(
                        MessageType::ReviewNeeded,
                        &self.config.agent_id,
                        &self.config.agent_id,
                        serde_json::json!({"task_id": contract.task_id, "stage": "judge"}),
                    ))?;
                } else if report.critical {
                    warn!(task_id = %contract.task_id, issues = ?report.issues, "local review found critical issues");
                }
            }
            "judge" => {
                apply_transition(
                    &mut contract,
                    TransitionEvent::ReviewStarted,
                    &self.config.agent_id,
                    "starting judge review",
                    None,
                    None,
                )?;
                self.finalize_transition(&mut contract, TransitionEvent::ReviewStarted)?;
                self.bus.send(Message::new(
                    MessageType::VerdictSignal,
                    &self.config.agent_id,
                    &self.config.agent_id,
                    serde_json::json!({"task_id": contract.task_id}),
                ))?;
            }
            other => {
                warn!(stage = other, "unrecognized review stage, ignoring");
            }
        }

        self.save_contract(&contract)?;
        Ok(())
    }

    async fn handle_verdict_signal(&self, _message: &Message) -> CoreResult<()> {
        let Some(mut contract) = self.load_contract()? else {
            return Ok(());
        };

        let verdict = self
            .broker
            .run_judge(&contract, Duration::from_secs(600))
            .await?;

        use swarm_core::broker::VerdictKind;

        contract.breaker.review_cycle_count += 1;

        let current_hash = contract.handoff_data.last_implementer_hash.clone();
        if verdict.verdict == VerdictKind::Fail {
            if let Some(hash) = current_hash.clone() {
                if !contract.breaker.last_judge_hashes.contains(&hash) {
                    contract.breaker.last_judge_hashes.push(hash);
                }
            }
        }

        let inputs = BreakerInputs {
            current_content_hash: current_hash,
            logical_paradox: matches!(verdict.verdict, VerdictKind::Fail | VerdictKind::Conditional)
                && contract.handoff_data.last_local_review_passed == Some(true),
            nitpicking_detected: verdict.blocking_issues.is_empty(),
            ..Default::default()
        };
        if self.run_breaker_check(&mut contract, &inputs)? {
            self.save_contract(&contract)?;
            return Ok(());
        }

        let event = match verdict.verdict {
            VerdictKind::Pass => TransitionEvent::VerdictPass,
            VerdictKind::Conditional => TransitionEvent::VerdictConditional,
            VerdictKind::Fail => TransitionEvent::VerdictFail,
            VerdictKind::CriticalHalt => TransitionEvent::BreakerTripped,
        };

        apply_transition(
            &mut contract,
            event,
            &self.config.agent_id,
            "judge verdict received",
            None,
            None,
        )?;
        self.finalize_transition(&mut contract, event)?;

        if contract.status == swarm_core::TaskStatus::ReviewComplete {
            apply_transition(
                &mut contract,
                TransitionEvent::MergeOk,
                &self.config.agent_id,
                "review complete, merging to base branch",
                None,
                None,
            )?;
            self.finalize_transition(&mut contract, TransitionEvent::MergeOk)?;
        }

        if contract.status == swarm_core::TaskStatus::Merged {
            match self.git.merge_to_main(&contract.task_id, &contract.git.base_branch)? {
                MergeOutcome::Merged { merge_commit } => {
                    contract.git.checkpoint_shas.push(merge_commit);
                }
                MergeOutcome::Conflict { detail } => {
                    apply_transition(
                        &mut contract,
                        TransitionEvent::BreakerTripped,
                        &self.config.agent_id,
                        &format!("merge conflict: {detail}"),
                        None,
                        None,
                    )?;
                    self.finalize_transition(&mut contract, TransitionEvent::BreakerTripped)?;
                }
            }
        }

        self.save_contract(&contract)?;
        Ok(())
    }

    /// Select an option index per the configured policy and answer via the
    /// bus. Default policy is the first option.
    async fn handle_question(&self, message: &Message) -> CoreResult<()> {
        let question_id = message
            .payload
            .get("question_id")
            .cloned()
            .ok_or_else(|| CoreError::validation("QUESTION payload missing question_id"))?;

        let selected_option = match self.question_policy {
            QuestionPolicy::FirstOption => 0,
            QuestionPolicy::FixedIndex(i) => i,
        };

        self.bus.send(Message::new(
            MessageType::Answer,
            &self.config.agent_id,
            &message.from,
            serde_json::json!({"question_id": question_id, "selected_option": selected_option}),
        ))?;
        Ok(())
    }

    fn has_active_task(&self) -> CoreResult<bool> {
        Ok(self
            .load_contract()?
            .map(|c| !c.status.is_terminal())
            .unwrap_or(false))
    }

    fn emit_heartbeat(&self) -> CoreResult<()> {
        let progress = self
            .load_contract()?
            .map(|c| format!("{}:{}", c.task_id, c.status))
            .unwrap_or_else(|| "idle".to_string());
        self.bus.heartbeat(&self.config.agent_id, &progress)
    }

    /// If the active role has gone stale for 3x the heartbeat interval,
    /// trip the breaker's inactivity trigger rather than waiting silently.
    fn check_stall(&self) -> CoreResult<()> {
        let Some(mut contract) = self.load_contract()? else {
            return Ok(());
        };
        if contract.status.is_terminal() {
            return Ok(());
        }

        let stalled = self
            .bus
            .is_stalled(&self.config.agent_id, self.config.stall_threshold_seconds() as i64)?;
        let inputs = BreakerInputs {
            role_stalled: stalled,
            current_content_hash: contract.handoff_data.last_implementer_hash.clone(),
            ..Default::default()
        };

        if self.run_breaker_check(&mut contract, &inputs)? {
            self.save_contract(&contract)?;
        }
        Ok(())
    }

    /// Evaluate every halt trigger (C5) against `inputs`. If one fires,
    /// trip the breaker, apply the `BreakerTripped` transition, checkpoint
    /// it, and write the halt artifact. Returns whether a halt occurred —
    /// the caller still owns saving the contract.
    fn run_breaker_check(&self, contract: &mut TaskContract, inputs: &BreakerInputs) -> CoreResult<bool> {
        if contract.status.is_terminal() {
            return Ok(false);
        }
        let Some(trigger) = BreakerEngine::check(contract, inputs, Utc::now()) else {
            return Ok(false);
        };

        warn!(trigger = trigger.kind.label(), task_id = %contract.task_id, "circuit breaker tripped");
        BreakerEngine::trip(contract, &trigger);
        apply_transition(
            contract,
            TransitionEvent::BreakerTripped,
            &self.config.agent_id,
            &trigger.reason,
            None,
            None,
        )?;
        self.finalize_transition(contract, TransitionEvent::BreakerTripped)?;
        let artifact = BreakerEngine::halt_artifact(
            contract,
            &trigger,
            &self.config.contract_path().display().to_string(),
        );
        AtomicStore::write(&self.config.halt_artifact_path(), artifact.as_bytes())?;
        Ok(true)
    }

    fn next_sequence(&self) -> CoreResult<u32> {
        Ok(self
            .load_contract()?
            .map(|c| c.history.len() as u32 + 1)
            .unwrap_or(1))
    }

    fn load_contract(&self) -> CoreResult<Option<TaskContract>> {
        match AtomicStore::read(&self.config.contract_path())? {
            None => Ok(None),
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        }
    }

    fn save_contract(&self, contract: &TaskContract) -> CoreResult<()> {
        self.breaker_sidecar.save(&contract.breaker)?;
        AtomicStore::write(
            &self.config.contract_path(),
            serde_json::to_string_pretty(contract)?.as_bytes(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use swarm_core::broker::{ConflictResolution, JudgeVerdict, LocalReviewReport, ProposalValidation, VerdictKind};
    use swarm_core::contract::DraftSubmission;

    struct StubBroker;

    #[async_trait]
    impl WorkerBroker for StubBroker {
        async fn run_implementer(&self, _c: &TaskContract, _t: Duration) -> CoreResult<Vec<DraftSubmission>> {
            Ok(Vec::new())
        }
        async fn run_local_review(&self, _c: &TaskContract, _t: Duration) -> CoreResult<LocalReviewReport> {
            Ok(LocalReviewReport { passed: true, critical: false, issues: vec![] })
        }
        async fn run_judge(&self, _c: &TaskContract, _t: Duration) -> CoreResult<JudgeVerdict> {
            Ok(JudgeVerdict { verdict: VerdictKind::Pass, blocking_issues: vec![], suggestions: vec![], tokens_used: 10 })
        }
        async fn validate_proposal(&self, _p: &str, _t: Duration) -> CoreResult<ProposalValidation> {
            Ok(ProposalValidation { valid: true, issues: vec![] })
        }
        async fn resolve_conflict(&self, _c: &TaskContract, _r: &str, _j: &str, _t: Duration) -> CoreResult<ConflictResolution> {
            Ok(ConflictResolution { side: "judge".into(), reasoning: "x".into(), recommendation: "y".into() })
        }
    }

    /// Every handler now checkpoints through git, so tests need a real
    /// (if minimal) repo under the test directory — mirrors `init_repo` in
    /// `swarm-core`'s own git tests.
    fn init_git_repo(dir: &std::path::Path) {
        let run = |args: &[&str]| {
            std::process::Command::new("git").args(args).current_dir(dir).output().unwrap();
        };
        run(&["init", "-b", "main"]);
        run(&["config", "user.email", "test@test.com"]);
        run(&["config", "user.name", "Test"]);
        std::fs::write(dir.join("README.md"), "# test\n").unwrap();
        run(&["add", "."]);
        run(&["commit", "-m", "initial"]);
    }

    fn listener(dir: &std::path::Path) -> Listener {
        init_git_repo(dir);
        let config = CoreConfig::for_tests(dir);
        Listener::new(config, Arc::new(StubBroker), dir.to_path_buf()).unwrap()
    }

    #[test]
    fn assert_broker_health_registers_agent() {
        let dir = tempfile::tempdir().unwrap();
        let l = listener(dir.path());
        assert!(l.assert_broker_health().is_ok());
    }

    #[test]
    fn has_active_task_false_with_no_contract() {
        let dir = tempfile::tempdir().unwrap();
        let l = listener(dir.path());
        assert!(!l.has_active_task().unwrap());
    }

    #[tokio::test]
    async fn question_is_answered_with_first_option_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let l = listener(dir.path());
        l.bus.connect("implementer").unwrap();

        let qid = uuid::Uuid::new_v4();
        let question = Message::new(
            MessageType::Question,
            "implementer",
            &l.config.agent_id,
            serde_json::json!({"question_id": qid, "text": "pick", "options": ["a", "b"]}),
        );
        l.handle_question(&question).await.unwrap();

        let answers = l.bus.receive("implementer", None).unwrap();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].payload["selected_option"], 0);
    }

    #[tokio::test]
    async fn stop_task_halts_an_active_contract() {
        let dir = tempfile::tempdir().unwrap();
        let l = listener(dir.path());

        let proposal = parse_proposal(
            &serde_json::json!({
                "project": "ver", "slug": "version", "target_file": "src/watchdog.py",
                "requirements": ["add flag"], "complexity": "minor",
            })
            .to_string(),
        )
        .unwrap();
        let contract = create_contract(&proposal, 1, "main");
        l.save_contract(&contract).unwrap();

        let stop = Message::new(MessageType::StopTask, "super_manager", &l.config.agent_id, serde_json::json!({}));
        l.handle_stop_task(&stop).await.unwrap();

        let reloaded = l.load_contract().unwrap().unwrap();
        assert_eq!(reloaded.status, swarm_core::TaskStatus::ErikConsultation);
        assert!(l.cancellation_token().is_cancelled());
    }
}
