//! Contract Model & Validator (C2) — the Task Contract schema, its
//! invariants, and the proposal-to-contract pipeline.

mod types;
mod validator;

pub use types::{
    BreakerCounters, BreakerStatus, Constraints, DraftSubmission, GitInfo, HandoffData,
    HistoryEntry, Limits, Lock, Specification, TaskContract, TaskStatus, Timestamps,
};
pub use validator::{create_contract, parse_proposal, validate, Complexity, Proposal};
