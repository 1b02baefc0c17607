use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// The closed vocabulary of message types. There is deliberately no
/// catch-all variant — a type outside this set cannot be represented, let
/// alone sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    ProposalReady,
    ReviewNeeded,
    StopTask,
    Question,
    Answer,
    VerdictSignal,
    Heartbeat,
    DraftReady,
    DraftAccepted,
    DraftRejected,
    DraftEscalated,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_else(|| "UNKNOWN".into());
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub from: String,
    pub to: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Build a message without an id or timestamp — [`MessageBus::send`]
    /// fills both in if absent.
    pub fn new(
        message_type: MessageType,
        from: impl Into<String>,
        to: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::nil(),
            message_type,
            from: from.into(),
            to: to.into(),
            payload,
            timestamp: DateTime::<Utc>::MIN_UTC,
        }
    }
}

/// `{agent_id, progress, timestamp}`. Only the latest per agent is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub agent_id: String,
    pub progress: String,
    pub timestamp: DateTime<Utc>,
}

/// A `QUESTION` payload. `2 <= options.len() <= 4` is enforced at
/// construction and again at [`MessageBus::send`] time — open-ended
/// questions are not representable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionPayload {
    pub question_id: Uuid,
    pub text: String,
    pub options: Vec<String>,
}

impl QuestionPayload {
    pub fn new(text: impl Into<String>, options: Vec<String>) -> CoreResult<Self> {
        let question = Self {
            question_id: Uuid::new_v4(),
            text: text.into(),
            options,
        };
        question.validate()?;
        Ok(question)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if !(2..=4).contains(&self.options.len()) {
            return Err(CoreError::validation(format!(
                "QUESTION options must have between 2 and 4 entries, got {}",
                self.options.len()
            )));
        }
        Ok(())
    }
}

/// An `ANSWER` payload. `selected_option` must be a valid index into the
/// referenced question's `options`; callers validate this against the
/// original question via [`MessageBus::send`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerPayload {
    pub question_id: Uuid,
    pub selected_option: usize,
}
