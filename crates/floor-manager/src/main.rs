use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use floor_manager::Listener;
use swarm_core::broker::{ConflictResolution, JudgeVerdict, LocalReviewReport, ProposalValidation};
use swarm_core::{CoreConfig, CoreResult, TaskContract, WorkerBroker};

/// Exit codes §6 requires the daemon to distinguish rather than collapsing
/// every non-zero exit into the same code.
const EXIT_OK: i32 = 0;
const EXIT_GENERAL_FAILURE: i32 = 1;
const EXIT_BUS_UNREACHABLE: i32 = 2;
const EXIT_CONFIG_INVALID: i32 = 3;
const EXIT_FORCED_HALT: i32 = 4;

/// Listener daemon entrypoint. Reads configuration, asserts the broker is
/// reachable, then polls the bus until stopped.
#[derive(Debug, Parser)]
#[command(name = "floor-manager", about = "Polls the task bus and drives one active contract")]
struct Cli {
    /// TOML config file. Missing file falls back to env-derived defaults.
    #[arg(long, default_value = "floor_manager.toml")]
    config: PathBuf,

    /// Repository root the Git Checkpoint Layer operates on.
    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    /// Process exactly one poll cycle and exit, instead of looping forever.
    #[arg(long)]
    once: bool,
}

/// No broker adapter ships in this crate — §4.9 leaves subprocess
/// spawning external to the core. This stub satisfies `WorkerBroker` by
/// refusing every call, so running the daemon without a real adapter
/// wired in fails loudly the first time a task actually needs one rather
/// than silently fabricating results.
struct UnconfiguredBroker;

#[async_trait::async_trait]
impl WorkerBroker for UnconfiguredBroker {
    async fn run_implementer(
        &self,
        _contract: &TaskContract,
        _timeout: Duration,
    ) -> CoreResult<Vec<swarm_core::DraftSubmission>> {
        Err(swarm_core::CoreError::resource(
            "run_implementer",
            "no WorkerBroker adapter configured",
        ))
    }

    async fn run_local_review(
        &self,
        _contract: &TaskContract,
        _timeout: Duration,
    ) -> CoreResult<LocalReviewReport> {
        Err(swarm_core::CoreError::resource(
            "run_local_review",
            "no WorkerBroker adapter configured",
        ))
    }

    async fn run_judge(&self, _contract: &TaskContract, _timeout: Duration) -> CoreResult<JudgeVerdict> {
        Err(swarm_core::CoreError::resource(
            "run_judge",
            "no WorkerBroker adapter configured",
        ))
    }

    async fn validate_proposal(
        &self,
        _proposal_text: &str,
        _timeout: Duration,
    ) -> CoreResult<ProposalValidation> {
        Err(swarm_core::CoreError::resource(
            "validate_proposal",
            "no WorkerBroker adapter configured",
        ))
    }

    async fn resolve_conflict(
        &self,
        _contract: &TaskContract,
        _rebuttal: &str,
        _judge_report: &str,
        _timeout: Duration,
    ) -> CoreResult<ConflictResolution> {
        Err(swarm_core::CoreError::resource(
            "resolve_conflict",
            "no WorkerBroker adapter configured",
        ))
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let config = match CoreConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(EXIT_CONFIG_INVALID);
        }
    };
    info!(
        agent_id = %config.agent_id,
        bus_path = %config.bus_path.display(),
        poll_interval_seconds = config.poll_interval_seconds,
        heartbeat_interval_seconds = config.heartbeat_interval_seconds,
        "floor manager starting"
    );

    let broker: Arc<dyn WorkerBroker> = Arc::new(UnconfiguredBroker);
    let listener = match Listener::new(config, broker, cli.workspace) {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, "failed to start listener");
            std::process::exit(EXIT_GENERAL_FAILURE);
        }
    };

    if let Err(e) = listener.assert_broker_health() {
        error!(error = %e, "bus unreachable at startup");
        std::process::exit(EXIT_BUS_UNREACHABLE);
    }

    let run_result = if cli.once {
        warn!("running a single poll cycle (--once)");
        listener.poll_once().await
    } else {
        listener.run_forever().await
    };

    if let Err(e) = run_result {
        error!(error = %e, "listener exited with an error");
        std::process::exit(EXIT_GENERAL_FAILURE);
    }

    match listener.halted() {
        Ok(true) => {
            warn!("shutting down with an active task halted in erik_consultation");
            std::process::exit(EXIT_FORCED_HALT);
        }
        Ok(false) => std::process::exit(EXIT_OK),
        Err(e) => {
            error!(error = %e, "failed to check halt status at shutdown");
            std::process::exit(EXIT_GENERAL_FAILURE);
        }
    }
}
