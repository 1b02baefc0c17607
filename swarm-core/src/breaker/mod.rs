//! Circuit Breaker Engine (C5) — ten halt triggers, the sidecar that
//! survives a crash, and the halt artifact written when one fires.

mod engine;
mod sidecar;

pub use engine::{BreakerEngine, BreakerInputs, BreakerTrigger, TriggerKind};
pub use sidecar::{BreakerSidecar, SidecarLoad};

/// Re-exported for callers that only need the armed/tripped status type;
/// the real storage lives on [`crate::contract::BreakerCounters`].
pub use crate::contract::BreakerStatus as BreakerState;
