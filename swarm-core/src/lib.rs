//! swarm-core — the Floor Manager's deterministic core.
//!
//! This crate holds every piece of the assembly line that must behave the
//! same way every time: the task contract and its transition table, the
//! circuit breaker that watches for runaway automation, the durable message
//! bus agents talk over, the sandbox gate that decides whether an untrusted
//! draft may land on a real file, and the git checkpoint layer that commits
//! one state transition at a time.
//!
//! None of it calls an LLM. Workers are reached through the broker contracts
//! in [`broker`]; this crate only routes, gates, persists, and halts.

#![allow(clippy::uninlined_format_args)]

pub mod breaker;
pub mod broker;
pub mod bus;
pub mod config;
pub mod contract;
pub mod error;
pub mod git;
pub mod sandbox;
pub mod state_machine;
pub mod store;

pub use breaker::{BreakerEngine, BreakerState, BreakerTrigger, TriggerKind};
pub use broker::{
    ConflictResolution, JudgeVerdict, LocalReviewReport, ProposalValidation, VerdictKind,
    WorkerBroker,
};
pub use bus::{Heartbeat, Message, MessageBus, MessageType};
pub use config::CoreConfig;
pub use contract::{
    Complexity, Constraints, DraftSubmission, HistoryEntry, Limits, Proposal, Specification,
    TaskContract, TaskStatus,
};
pub use error::{CoreError, CoreResult, StructuredError};
pub use git::GitCheckpointLayer;
pub use sandbox::{GateDecision, SandboxGate, SafetyWarning};
pub use state_machine::{transition, TransitionEvent, TransitionOutcome};
pub use store::AtomicStore;
