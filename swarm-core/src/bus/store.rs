use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::store::AtomicStore;

use super::types::{AnswerPayload, Heartbeat, Message, MessageType, QuestionPayload};

/// Durable, multi-reader, single-writer-per-agent message bus. Every
/// operation goes through the [`AtomicStore`]; there is no in-memory
/// state that doesn't also live on disk, so a restarted Listener sees
/// exactly what it saw before it died.
pub struct MessageBus {
    messages_path: PathBuf,
    heartbeats_path: PathBuf,
    agents_path: PathBuf,
}

impl MessageBus {
    /// Open a bus rooted at `bus_path` (the messages ndjson file); sibling
    /// files for heartbeats and the agent registry are derived from it.
    pub fn open(bus_path: impl Into<PathBuf>) -> Self {
        let bus_path = bus_path.into();
        let dir = bus_path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self {
            heartbeats_path: dir.join("heartbeats.json"),
            agents_path: dir.join("agents.json"),
            messages_path: bus_path,
        }
    }

    /// Register an agent. Idempotent — connecting twice has no additional
    /// effect.
    pub fn connect(&self, agent_id: &str) -> CoreResult<()> {
        let mut agents = self.load_agents()?;
        if agents.insert(agent_id.to_string()) {
            self.save_agents(&agents)?;
        }
        Ok(())
    }

    /// Validate and persist a message. Assigns `id`/`timestamp` when the
    /// caller left them at the sentinel values from [`Message::new`].
    /// Returns the assigned id.
    pub fn send(&self, mut message: Message) -> CoreResult<Uuid> {
        if message.id.is_nil() {
            message.id = Uuid::new_v4();
        }
        if message.timestamp == DateTime::<Utc>::MIN_UTC {
            message.timestamp = Utc::now();
        }

        match message.message_type {
            MessageType::Question => {
                let payload: QuestionPayload = serde_json::from_value(message.payload.clone())
                    .map_err(|e| CoreError::validation(format!("invalid QUESTION payload: {e}")))?;
                payload.validate()?;
            }
            MessageType::Answer => {
                let payload: AnswerPayload = serde_json::from_value(message.payload.clone())
                    .map_err(|e| CoreError::validation(format!("invalid ANSWER payload: {e}")))?;
                self.validate_answer(&payload)?;
            }
            _ => {}
        }

        let line = serde_json::to_string(&message)?;
        AtomicStore::append(&self.messages_path, line.as_bytes())?;
        Ok(message.id)
    }

    /// Messages addressed to `agent_id` strictly newer than `since`, in
    /// send order.
    pub fn receive(&self, agent_id: &str, since: Option<DateTime<Utc>>) -> CoreResult<Vec<Message>> {
        Ok(self
            .all_messages()?
            .into_iter()
            .filter(|m| m.to == agent_id)
            .filter(|m| since.map(|s| m.timestamp > s).unwrap_or(true))
            .collect())
    }

    /// Upsert an agent's heartbeat. Last write wins.
    pub fn heartbeat(&self, agent_id: &str, progress: &str) -> CoreResult<()> {
        let mut heartbeats = self.load_heartbeats()?;
        heartbeats.insert(
            agent_id.to_string(),
            Heartbeat {
                agent_id: agent_id.to_string(),
                progress: progress.to_string(),
                timestamp: Utc::now(),
            },
        );
        self.save_heartbeats(&heartbeats)
    }

    pub fn latest_heartbeat(&self, agent_id: &str) -> CoreResult<Option<Heartbeat>> {
        Ok(self.load_heartbeats()?.remove(agent_id))
    }

    /// Whether `agent_id`'s heartbeat is older than `threshold_seconds`,
    /// or entirely absent. Feeds breaker trigger 6 (Inactivity).
    pub fn is_stalled(&self, agent_id: &str, threshold_seconds: i64) -> CoreResult<bool> {
        match self.latest_heartbeat(agent_id)? {
            None => Ok(true),
            Some(hb) => {
                let age = Utc::now().signed_duration_since(hb.timestamp);
                Ok(age.num_seconds() >= threshold_seconds)
            }
        }
    }

    pub fn list_agents(&self) -> CoreResult<Vec<String>> {
        let mut agents: Vec<String> = self.load_agents()?.into_iter().collect();
        agents.sort();
        Ok(agents)
    }

    pub fn all_messages(&self) -> CoreResult<Vec<Message>> {
        let Some(bytes) = AtomicStore::read(&self.messages_path)? else {
            return Ok(Vec::new());
        };
        let text = String::from_utf8_lossy(&bytes);
        let mut messages = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let message: Message = serde_json::from_str(line).map_err(|e| {
                CoreError::integrity(
                    self.messages_path.display().to_string(),
                    format!("line {}: {e}", line_no + 1),
                )
            })?;
            messages.push(message);
        }
        Ok(messages)
    }

    fn validate_answer(&self, payload: &AnswerPayload) -> CoreResult<()> {
        let question = self
            .all_messages()?
            .into_iter()
            .find(|m| {
                m.message_type == MessageType::Question
                    && serde_json::from_value::<QuestionPayload>(m.payload.clone())
                        .map(|q| q.question_id == payload.question_id)
                        .unwrap_or(false)
            })
            .ok_or_else(|| {
                CoreError::validation(format!(
                    "ANSWER references unknown question_id {}",
                    payload.question_id
                ))
            })?;

        let options_len = serde_json::from_value::<QuestionPayload>(question.payload)
            .map(|q| q.options.len())
            .unwrap_or(0);

        if payload.selected_option >= options_len {
            return Err(CoreError::validation(format!(
                "ANSWER selected_option {} out of range for {options_len} options",
                payload.selected_option
            )));
        }
        Ok(())
    }

    fn load_agents(&self) -> CoreResult<HashSet<String>> {
        match AtomicStore::read(&self.agents_path)? {
            None => Ok(HashSet::new()),
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
        }
    }

    fn save_agents(&self, agents: &HashSet<String>) -> CoreResult<()> {
        AtomicStore::write(&self.agents_path, serde_json::to_string_pretty(agents)?.as_bytes())
    }

    fn load_heartbeats(&self) -> CoreResult<HashMap<String, Heartbeat>> {
        match AtomicStore::read(&self.heartbeats_path)? {
            None => Ok(HashMap::new()),
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
        }
    }

    fn save_heartbeats(&self, heartbeats: &HashMap<String, Heartbeat>) -> CoreResult<()> {
        AtomicStore::write(
            &self.heartbeats_path,
            serde_json::to_string_pretty(heartbeats)?.as_bytes(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus(dir: &Path) -> MessageBus {
        MessageBus::open(dir.join("bus.ndjson"))
    }

    #[test]
    fn connect_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let bus = bus(dir.path());
        bus.connect("implementer").unwrap();
        bus.connect("implementer").unwrap();
        assert_eq!(bus.list_agents().unwrap(), vec!["implementer"]);
    }

    #[test]
    fn send_and_receive_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let bus = bus(dir.path());
        let msg = Message::new(
            MessageType::ProposalReady,
            "super_manager",
            "floor_manager",
            serde_json::json!({"task_id": "VER-001-VERSION"}),
        );
        bus.send(msg).unwrap();

        let received = bus.receive("floor_manager", None).unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].from, "super_manager");
    }

    #[test]
    fn receive_filters_by_since_and_recipient() {
        let dir = tempfile::tempdir().unwrap();
        let bus = bus(dir.path());
        bus.send(Message::new(
            MessageType::Heartbeat,
            "implementer",
            "floor_manager",
            serde_json::json!({}),
        ))
        .unwrap();
        let cutoff = Utc::now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        bus.send(Message::new(
            MessageType::Heartbeat,
            "implementer",
            "floor_manager",
            serde_json::json!({}),
        ))
        .unwrap();
        bus.send(Message::new(
            MessageType::Heartbeat,
            "implementer",
            "someone_else",
            serde_json::json!({}),
        ))
        .unwrap();

        let after_cutoff = bus.receive("floor_manager", Some(cutoff)).unwrap();
        assert_eq!(after_cutoff.len(), 1);
    }

    #[test]
    fn send_rejects_question_with_one_option() {
        let dir = tempfile::tempdir().unwrap();
        let bus = bus(dir.path());
        let payload = serde_json::json!({
            "question_id": Uuid::new_v4(),
            "text": "which?",
            "options": ["only one"],
        });
        let msg = Message::new(MessageType::Question, "implementer", "floor_manager", payload);
        let err = bus.send(msg).unwrap_err();
        assert!(err.to_string().contains("options"));
        assert!(bus.all_messages().unwrap().is_empty());
    }

    #[test]
    fn send_rejects_answer_to_unknown_question() {
        let dir = tempfile::tempdir().unwrap();
        let bus = bus(dir.path());
        let payload = serde_json::json!({
            "question_id": Uuid::new_v4(),
            "selected_option": 0,
        });
        let msg = Message::new(MessageType::Answer, "floor_manager", "implementer", payload);
        let err = bus.send(msg).unwrap_err();
        assert!(err.to_string().contains("unknown question_id"));
    }

    #[test]
    fn send_rejects_out_of_range_answer() {
        let dir = tempfile::tempdir().unwrap();
        let bus = bus(dir.path());
        let question = QuestionPayload::new("pick one", vec!["a".into(), "b".into()]).unwrap();
        let qid = question.question_id;
        bus.send(Message::new(
            MessageType::Question,
            "implementer",
            "floor_manager",
            serde_json::to_value(&question).unwrap(),
        ))
        .unwrap();

        let answer = serde_json::json!({"question_id": qid, "selected_option": 5});
        let msg = Message::new(MessageType::Answer, "floor_manager", "implementer", answer);
        let err = bus.send(msg).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn valid_answer_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let bus = bus(dir.path());
        let question = QuestionPayload::new("pick one", vec!["a".into(), "b".into()]).unwrap();
        let qid = question.question_id;
        bus.send(Message::new(
            MessageType::Question,
            "implementer",
            "floor_manager",
            serde_json::to_value(&question).unwrap(),
        ))
        .unwrap();

        let answer = serde_json::json!({"question_id": qid, "selected_option": 1});
        let msg = Message::new(MessageType::Answer, "floor_manager", "implementer", answer);
        assert!(bus.send(msg).is_ok());
    }

    #[test]
    fn heartbeat_is_last_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let bus = bus(dir.path());
        bus.heartbeat("implementer", "25%").unwrap();
        bus.heartbeat("implementer", "80%").unwrap();
        let hb = bus.latest_heartbeat("implementer").unwrap().unwrap();
        assert_eq!(hb.progress, "80%");
    }

    #[test]
    fn is_stalled_true_when_no_heartbeat_seen() {
        let dir = tempfile::tempdir().unwrap();
        let bus = bus(dir.path());
        assert!(bus.is_stalled("ghost", 90).unwrap());
    }

    #[test]
    fn is_stalled_false_right_after_heartbeat() {
        let dir = tempfile::tempdir().unwrap();
        let bus = bus(dir.path());
        bus.heartbeat("implementer", "10%").unwrap();
        assert!(!bus.is_stalled("implementer", 90).unwrap());
    }
}
