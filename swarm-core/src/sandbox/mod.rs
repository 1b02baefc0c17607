//! Sandbox & Draft Gate (C6) — the only place untrusted worker output may
//! touch a real file, and the decision procedure that lets it through.

mod gate;
mod safety;

pub use gate::{DraftInfo, GateDecision, SandboxGate};
pub use safety::{SafetyWarning, WarningCategory};
