//! Error taxonomy for the Floor Manager core.
//!
//! Errors are organized by outcome, not by the subsystem that raised them:
//! validation failures never change state, resource errors get a bounded
//! retry for idempotent reads, safety violations reject and discard,
//! integrity failures back up and re-initialize or refuse to start, and
//! halts move a task to `erik_consultation` with no further automated
//! progress. Nothing that can change state is allowed to swallow an error.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    /// A proposal, contract, or message failed a field-level check.
    /// Never accompanied by a state change.
    #[error("validation failed: {message}")]
    Validation { message: String },

    /// An attempted `(status, event)` pair has no edge in the transition table.
    #[error("illegal transition: {from} --{event}--> (no such edge)")]
    IllegalTransition { from: String, event: String },

    /// A message carries a type outside the closed vocabulary.
    #[error("unknown message type: {type_name}")]
    UnknownMessageType { type_name: String },

    /// A lock is held by another actor and has not expired.
    #[error("contract locked by {holder} until {expires_at}")]
    Locked { holder: String, expires_at: String },

    /// I/O failure: disk, permission, process spawn. Retried with bounded
    /// backoff when the operation is an idempotent read; never retried
    /// silently for a contract mutation.
    #[error("resource error during {operation}: {message}")]
    Resource { operation: String, message: String },

    /// A draft was rejected because it contains a secret-shaped string or a
    /// hardcoded home path. The draft is discarded; no further action.
    #[error("safety violation: {reason}")]
    SafetyViolation { reason: String },

    /// A persisted file (bus store, breaker sidecar, contract) failed to
    /// parse or carries an incompatible schema version.
    #[error("integrity failure in {file}: {message}")]
    Integrity { file: String, message: String },

    /// One of the ten circuit breaker triggers fired, or the git merge
    /// conflicted, or a second stall occurred. State moves to
    /// `erik_consultation`; a halt artifact is written.
    #[error("halted: {reason}")]
    Halted { reason: String },

    /// Subprocess or task cancellation was requested; teardown is in
    /// progress or complete.
    #[error("cancelled: {reason}")]
    Cancelled { reason: String },

    /// Git operation failed outside of a halt-worthy merge conflict.
    #[error("git error during {operation}: {message}")]
    Git { operation: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn illegal_transition(from: impl Into<String>, event: impl Into<String>) -> Self {
        Self::IllegalTransition {
            from: from.into(),
            event: event.into(),
        }
    }

    pub fn unknown_message_type(type_name: impl Into<String>) -> Self {
        Self::UnknownMessageType {
            type_name: type_name.into(),
        }
    }

    pub fn locked(holder: impl Into<String>, expires_at: impl Into<String>) -> Self {
        Self::Locked {
            holder: holder.into(),
            expires_at: expires_at.into(),
        }
    }

    pub fn resource(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Resource {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn safety_violation(reason: impl Into<String>) -> Self {
        Self::SafetyViolation {
            reason: reason.into(),
        }
    }

    pub fn integrity(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Integrity {
            file: file.into(),
            message: message.into(),
        }
    }

    pub fn halted(reason: impl Into<String>) -> Self {
        Self::Halted {
            reason: reason.into(),
        }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    pub fn git(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Git {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Whether a caller may retry this error. Only ever true for resource
    /// errors that look like contention rather than a permanent failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Resource { message, .. } => {
                let m = message.to_lowercase();
                m.contains("lock") || m.contains("timeout") || m.contains("would block")
            }
            Self::Git { message, .. } => {
                let m = message.to_lowercase();
                m.contains("lock")
                    || m.contains("another git process")
                    || m.contains("timed out")
                    || m.contains("connection")
            }
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }

    /// Human-facing recovery guidance, where one applies.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Self::Validation { .. } => Some("fix the named field(s) and resubmit"),
            Self::IllegalTransition { .. } => {
                Some("check the current status before retrying the event")
            }
            Self::UnknownMessageType { .. } => {
                Some("use one of the closed set of message types")
            }
            Self::Locked { .. } => Some("wait for the lease to expire or ask the holder to finish"),
            Self::Resource { .. } => Some("retry with backoff if the read was idempotent"),
            Self::SafetyViolation { .. } => {
                Some("remove the offending content before resubmitting the draft")
            }
            Self::Integrity { .. } => Some("inspect the backed-up file and re-initialize or migrate"),
            Self::Halted { .. } => Some("an operator must call reset() after investigating"),
            Self::Cancelled { .. } => None,
            Self::Git { .. } => Some("resolve the working tree state and retry"),
            Self::Io(_) | Self::Json(_) => None,
        }
    }

    pub fn with_suggestion(&self) -> String {
        match self.recovery_suggestion() {
            Some(s) => format!("{self} (suggestion: {s})"),
            None => self.to_string(),
        }
    }

    /// Machine-readable code used in structured output and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            Self::UnknownMessageType { .. } => "UNKNOWN_MESSAGE_TYPE",
            Self::Locked { .. } => "CONTRACT_LOCKED",
            Self::Resource { .. } => "RESOURCE_ERROR",
            Self::SafetyViolation { .. } => "SAFETY_VIOLATION",
            Self::Integrity { .. } => "INTEGRITY_FAILURE",
            Self::Halted { .. } => "HALTED",
            Self::Cancelled { .. } => "CANCELLED",
            Self::Git { .. } => "GIT_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
        }
    }

    pub fn to_structured(&self) -> StructuredError {
        let mut context = HashMap::new();
        match self {
            Self::IllegalTransition { from, event } => {
                context.insert("from".into(), serde_json::Value::String(from.clone()));
                context.insert("event".into(), serde_json::Value::String(event.clone()));
            }
            Self::Locked { holder, expires_at } => {
                context.insert("holder".into(), serde_json::Value::String(holder.clone()));
                context.insert(
                    "expires_at".into(),
                    serde_json::Value::String(expires_at.clone()),
                );
            }
            Self::Resource { operation, .. } | Self::Git { operation, .. } => {
                context.insert(
                    "operation".into(),
                    serde_json::Value::String(operation.clone()),
                );
            }
            Self::Integrity { file, .. } => {
                context.insert("file".into(), serde_json::Value::String(file.clone()));
            }
            _ => {}
        }

        StructuredError::new(self.code(), self.to_string())
            .with_context_map(context)
            .retryable(self.is_retryable())
    }

    pub fn to_structured_json(&self) -> String {
        serde_json::to_string(&self.to_structured())
            .unwrap_or_else(|_| format!(r#"{{"code":"{}"}}"#, self.code()))
    }
}

/// Machine-readable rendering of a [`CoreError`], suitable for logging or
/// for handing back to an external Super-Manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_action: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
    pub retryable: bool,
}

impl StructuredError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            recovery_action: None,
            context: HashMap::new(),
            retryable: false,
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn with_context_map(mut self, context: HashMap<String, serde_json::Value>) -> Self {
        self.context.extend(context);
        self
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_is_not_retryable() {
        let e = CoreError::validation("missing field: target_file");
        assert!(!e.is_retryable());
        assert_eq!(e.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn resource_lock_message_is_retryable() {
        let e = CoreError::resource("bus.receive", "store lock held, try again");
        assert!(e.is_retryable());
    }

    #[test]
    fn git_lock_file_message_is_retryable() {
        let e = CoreError::git("add", "fatal: Unable to create lock file");
        assert!(e.is_retryable());
    }

    #[test]
    fn git_nothing_to_commit_is_not_retryable() {
        let e = CoreError::git("commit", "nothing to commit");
        assert!(!e.is_retryable());
    }

    #[test]
    fn io_would_block_is_retryable() {
        let e = CoreError::Io(std::io::Error::from(std::io::ErrorKind::WouldBlock));
        assert!(e.is_retryable());
    }

    #[test]
    fn halted_has_operator_suggestion() {
        let e = CoreError::halted("Trigger 1: Rebuttal Limit");
        assert!(e.recovery_suggestion().unwrap().contains("reset()"));
    }

    #[test]
    fn cancelled_has_no_suggestion() {
        let e = CoreError::cancelled("STOP_TASK received");
        assert!(e.recovery_suggestion().is_none());
    }

    #[test]
    fn structured_conversion_carries_context() {
        let e = CoreError::illegal_transition("merged", "impl_started");
        let s = e.to_structured();
        assert_eq!(s.code, "ILLEGAL_TRANSITION");
        assert_eq!(s.context.get("from").unwrap(), "merged");
        assert_eq!(s.context.get("event").unwrap(), "impl_started");
    }

    #[test]
    fn structured_json_roundtrips() {
        let e = CoreError::safety_violation("draft contains api key pattern");
        let json = e.to_structured_json();
        let parsed: StructuredError = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.code, "SAFETY_VIOLATION");
    }

    #[test]
    fn with_suggestion_appends_text() {
        let e = CoreError::locked("judge-agent", "2026-01-01T00:00:00Z");
        let s = e.with_suggestion();
        assert!(s.contains("suggestion:"));
    }
}
