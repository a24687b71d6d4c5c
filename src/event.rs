//! Stream event classification and answer accumulation.

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;
use crate::outputs::format_outputs;
use crate::protocol::ProtocolVariant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Message,
    MessageEnd,
    WorkflowStarted,
    WorkflowFinished,
    NodeStarted,
    NodeFinished,
    AgentMessage,
    TextChunk,
    Error,
    Unknown,
}

impl EventKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            "message" => EventKind::Message,
            "message_end" => EventKind::MessageEnd,
            "workflow_started" => EventKind::WorkflowStarted,
            "workflow_finished" => EventKind::WorkflowFinished,
            "node_started" => EventKind::NodeStarted,
            "node_finished" => EventKind::NodeFinished,
            "agent_message" => EventKind::AgentMessage,
            "text_chunk" => EventKind::TextChunk,
            "error" => EventKind::Error,
            _ => EventKind::Unknown,
        }
    }
}

/// One decoded `data:` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub kind: EventKind,
    /// Answer fragment, or the error message for [`EventKind::Error`].
    pub text: Option<String>,
    pub message_id: Option<String>,
    pub conversation_id: Option<String>,
    /// `data.outputs` of a finished workflow.
    pub payload: Option<Value>,
    /// Raw `event` discriminator, kept for diagnostics.
    pub name: Option<String>,
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Chunk text of `agent_message` / `text_chunk`: top-level `answer`, else
/// `data` as a string, `data.text` or `data.answer`.
fn chunk_text(value: &Value) -> Option<String> {
    if let Some(answer) = str_field(value, "answer") {
        return Some(answer);
    }
    match value.get("data")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        data @ Value::Object(_) => str_field(data, "text").or_else(|| str_field(data, "answer")),
        _ => None,
    }
}

fn error_text(value: &Value) -> Option<String> {
    match value.get("error")? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

impl StreamEvent {
    /// Parse and classify one payload.
    pub fn parse(payload: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(payload)?;
        Ok(Self::classify(&value))
    }

    pub fn classify(value: &Value) -> Self {
        let name = value.get("event").and_then(Value::as_str).map(str::to_string);
        let mut kind = name.as_deref().map(EventKind::from_name).unwrap_or(EventKind::Unknown);

        let mut text = None;
        let mut payload = None;
        let message_id = str_field(value, "message_id").or_else(|| str_field(value, "id"));
        let conversation_id = str_field(value, "conversation_id");

        match kind {
            EventKind::Message => text = str_field(value, "answer"),
            EventKind::AgentMessage | EventKind::TextChunk => text = chunk_text(value),
            EventKind::WorkflowFinished => {
                payload = value.get("data").and_then(|d| d.get("outputs")).cloned();
            }
            EventKind::Error => {
                text = error_text(value)
                    .or_else(|| str_field(value, "message"))
                    .or_else(|| Some("stream error".to_string()));
            }
            EventKind::Unknown => {
                if let Some(err) = error_text(value) {
                    kind = EventKind::Error;
                    text = Some(err);
                }
            }
            _ => {}
        }

        StreamEvent { kind, text, message_id, conversation_id, payload, name }
    }
}

/// What applying one event did to the exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    /// The accumulated answer changed; re-render now.
    ContentUpdated,
    /// `message_end` arrived.
    Finished,
    /// Nothing changed.
    Ignored,
    /// The backend reported an error; the exchange is over.
    Failed(String),
}

/// Interpreter state for one query/answer exchange.
#[derive(Debug, Clone, Default)]
pub struct Exchange {
    variant: ProtocolVariant,
    answer: String,
    conversation_id: Option<String>,
    message_id: Option<String>,
    finished: bool,
}

impl Exchange {
    pub fn new(variant: ProtocolVariant) -> Self {
        Self { variant, ..Default::default() }
    }

    /// Parse a raw payload and apply it. Malformed JSON is logged and dropped.
    pub fn apply_payload(&mut self, payload: &str) -> EventOutcome {
        match StreamEvent::parse(payload) {
            Ok(event) => self.apply(&event),
            Err(e) => {
                warn!(error = %e, payload, "dropping malformed stream line");
                EventOutcome::Ignored
            }
        }
    }

    pub fn apply(&mut self, event: &StreamEvent) -> EventOutcome {
        match event.kind {
            EventKind::Message | EventKind::AgentMessage | EventKind::TextChunk => {
                if self.message_id.is_none() {
                    self.message_id = event.message_id.clone();
                }
                match event.text.as_deref() {
                    Some(fragment) if !fragment.is_empty() => {
                        self.answer.push_str(fragment);
                        EventOutcome::ContentUpdated
                    }
                    _ => EventOutcome::Ignored,
                }
            }
            EventKind::MessageEnd => {
                if event.conversation_id.is_some() {
                    self.conversation_id = event.conversation_id.clone();
                }
                if event.message_id.is_some() {
                    self.message_id = event.message_id.clone();
                }
                self.finished = true;
                EventOutcome::Finished
            }
            EventKind::WorkflowFinished if self.variant == ProtocolVariant::Workflow => {
                match event.payload.as_ref().and_then(format_outputs) {
                    Some(formatted) if !formatted.is_empty() => {
                        self.answer = formatted;
                        EventOutcome::ContentUpdated
                    }
                    _ => EventOutcome::Ignored,
                }
            }
            EventKind::WorkflowStarted
            | EventKind::WorkflowFinished
            | EventKind::NodeStarted
            | EventKind::NodeFinished => EventOutcome::Ignored,
            EventKind::Error => {
                EventOutcome::Failed(event.text.clone().unwrap_or_else(|| "stream error".into()))
            }
            EventKind::Unknown => {
                debug!(event = ?event.name, "ignoring unknown stream event");
                EventOutcome::Ignored
            }
        }
    }

    pub fn answer(&self) -> &str {
        &self.answer
    }

    pub fn has_content(&self) -> bool {
        !self.answer.is_empty()
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// Backend id of the answer, for feedback.
    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
