//! Environment- and file-driven configuration for the Floor Manager.
//!
//! Mirrors the teacher's approach of a plain struct whose `Default` impl
//! reads `std::env::var` with a fallback per field, so tests can construct
//! a config without touching the environment and production can override
//! any field with an env var of the same name.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration for a Floor Manager process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Base directory for the contract, audit log, and sandbox.
    pub handoff_dir: PathBuf,
    /// Identity this process registers on the bus as.
    pub agent_id: String,
    /// Path to the durable bus store.
    pub bus_path: PathBuf,
    /// Seconds between heartbeats while a task is active.
    pub heartbeat_interval_seconds: u64,
    /// Seconds between `receive()` polls.
    pub poll_interval_seconds: u64,
    /// Default cost ceiling (USD) used when a complexity has no override.
    pub cost_ceiling_usd_default: f64,
    /// Default global timeout (hours).
    pub global_timeout_hours_default: f64,
    /// Default max rebuttals.
    pub max_rebuttals_default: u32,
    /// Default max review cycles.
    pub max_review_cycles_default: u32,
    /// Grace period (seconds) honored before a subprocess is force-killed.
    pub subprocess_grace_seconds: u64,
    /// Allow `reset()` to be called without an explicit operator token.
    /// Defaults to `false`; flipping this on is itself logged.
    pub allow_unattended_reset: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            handoff_dir: std::env::var("HANDOFF_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./_handoff")),
            agent_id: std::env::var("AGENT_ID").unwrap_or_else(|_| "floor_manager".into()),
            bus_path: std::env::var("BUS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./_handoff/bus.ndjson")),
            heartbeat_interval_seconds: std::env::var("HEARTBEAT_INTERVAL_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(30),
            poll_interval_seconds: std::env::var("POLL_INTERVAL_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(5),
            cost_ceiling_usd_default: std::env::var("COST_CEILING_USD_DEFAULT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.50),
            global_timeout_hours_default: std::env::var("GLOBAL_TIMEOUT_HOURS_DEFAULT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3.0),
            max_rebuttals_default: std::env::var("MAX_REBUTTALS_DEFAULT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            max_review_cycles_default: std::env::var("MAX_REVIEW_CYCLES_DEFAULT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            subprocess_grace_seconds: std::env::var("SUBPROCESS_GRACE_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            allow_unattended_reset: std::env::var("ALLOW_UNATTENDED_RESET")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }
}

impl CoreConfig {
    /// Configuration rooted at a scratch directory, for tests.
    pub fn for_tests(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            handoff_dir: root.join("_handoff"),
            agent_id: "floor_manager_test".into(),
            bus_path: root.join("_handoff").join("bus.ndjson"),
            heartbeat_interval_seconds: 30,
            poll_interval_seconds: 5,
            cost_ceiling_usd_default: 0.50,
            global_timeout_hours_default: 3.0,
            max_rebuttals_default: 3,
            max_review_cycles_default: 3,
            subprocess_grace_seconds: 10,
            allow_unattended_reset: false,
        }
    }

    pub fn contract_path(&self) -> PathBuf {
        self.handoff_dir.join("TASK_CONTRACT.json")
    }

    pub fn transition_log_path(&self) -> PathBuf {
        self.handoff_dir.join("transition.ndjson")
    }

    pub fn halt_artifact_path(&self) -> PathBuf {
        self.handoff_dir.join("ERIK_HALT.md")
    }

    pub fn sandbox_dir(&self) -> PathBuf {
        self.handoff_dir.join("drafts")
    }

    /// Mirror of the breaker counters, written next to the contract so a
    /// crash mid-write can't lose them.
    pub fn breaker_sidecar_path(&self) -> PathBuf {
        self.handoff_dir.join("breaker_sidecar.json")
    }

    /// The heartbeat staleness threshold (3x the interval), per §4.3.
    pub fn stall_threshold_seconds(&self) -> u64 {
        self.heartbeat_interval_seconds * 3
    }

    /// Load from a TOML file, falling back to env-derived defaults for any
    /// field the file omits. Missing file is not an error — it's treated
    /// the same as an empty file.
    pub fn load(path: &std::path::Path) -> crate::error::CoreResult<Self> {
        let defaults = Self::default();
        let Ok(text) = std::fs::read_to_string(path) else {
            return Ok(defaults);
        };
        let file: PartialConfig = toml::from_str(&text).map_err(|e| {
            crate::error::CoreError::integrity(path.display().to_string(), e.to_string())
        })?;
        Ok(file.merged_onto(defaults))
    }
}

/// Mirrors [`CoreConfig`] but with every field optional, for TOML overlays.
#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    handoff_dir: Option<PathBuf>,
    agent_id: Option<String>,
    bus_path: Option<PathBuf>,
    heartbeat_interval_seconds: Option<u64>,
    poll_interval_seconds: Option<u64>,
    cost_ceiling_usd_default: Option<f64>,
    global_timeout_hours_default: Option<f64>,
    max_rebuttals_default: Option<u32>,
    max_review_cycles_default: Option<u32>,
    subprocess_grace_seconds: Option<u64>,
    allow_unattended_reset: Option<bool>,
}

impl PartialConfig {
    fn merged_onto(self, mut base: CoreConfig) -> CoreConfig {
        if let Some(v) = self.handoff_dir {
            base.handoff_dir = v;
        }
        if let Some(v) = self.agent_id {
            base.agent_id = v;
        }
        if let Some(v) = self.bus_path {
            base.bus_path = v;
        }
        if let Some(v) = self.heartbeat_interval_seconds {
            base.heartbeat_interval_seconds = v;
        }
        if let Some(v) = self.poll_interval_seconds {
            base.poll_interval_seconds = v;
        }
        if let Some(v) = self.cost_ceiling_usd_default {
            base.cost_ceiling_usd_default = v;
        }
        if let Some(v) = self.global_timeout_hours_default {
            base.global_timeout_hours_default = v;
        }
        if let Some(v) = self.max_rebuttals_default {
            base.max_rebuttals_default = v;
        }
        if let Some(v) = self.max_review_cycles_default {
            base.max_review_cycles_default = v;
        }
        if let Some(v) = self.subprocess_grace_seconds {
            base.subprocess_grace_seconds = v;
        }
        if let Some(v) = self.allow_unattended_reset {
            base.allow_unattended_reset = v;
        }
        base
    }
}
