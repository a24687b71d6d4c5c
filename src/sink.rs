//! Where rendered messages go.
//!
//! The controller only talks to a [`RenderSink`]. [`Transcript`] keeps the
//! messages in memory; the binary wraps one to echo answers to the terminal
//! as they stream.

use uuid::Uuid;

use crate::protocol::FeedbackRating;
use crate::render::escape_html;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Bot,
}

/// One rendered bubble.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    pub id: String,
    pub role: Role,
    /// Source text: what the user typed or the accumulated answer.
    pub display_text: String,
    pub markup: String,
    /// Backend id of a bot answer; required for feedback.
    pub source_message_id: Option<String>,
    pub feedback: Option<FeedbackRating>,
}

impl MessageRecord {
    pub fn user(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::User,
            markup: escape_html(&text),
            display_text: text,
            source_message_id: None,
            feedback: None,
        }
    }

    pub fn bot(text: impl Into<String>, markup: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::Bot,
            display_text: text.into(),
            markup: markup.into(),
            source_message_id: None,
            feedback: None,
        }
    }

    pub fn with_source(mut self, source_message_id: Option<String>) -> Self {
        self.source_message_id = source_message_id;
        self
    }

    pub fn with_feedback(mut self, feedback: Option<FeedbackRating>) -> Self {
        self.feedback = feedback;
        self
    }

    pub fn is_rateable(&self) -> bool {
        self.role == Role::Bot && self.source_message_id.is_some()
    }
}

/// Display surface driven by the chat controller.
pub trait RenderSink {
    /// Show the "typing" placeholder while waiting for the first content.
    fn show_typing(&mut self);

    fn remove_typing(&mut self);

    /// Append a finished or streaming bubble; returns its id.
    fn push(&mut self, record: MessageRecord) -> String;

    /// Replace the text of an existing bubble in place.
    fn update(&mut self, id: &str, text: &str, markup: &str);

    /// The bubble will not change any more.
    fn complete(&mut self, _id: &str) {}

    fn set_source_message_id(&mut self, id: &str, source_message_id: &str);

    fn set_feedback(&mut self, id: &str, feedback: Option<FeedbackRating>);

    fn clear(&mut self);

    fn records(&self) -> &[MessageRecord];

    fn record(&self, id: &str) -> Option<&MessageRecord> {
        self.records().iter().find(|r| r.id == id)
    }
}

/// In-memory message list.
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    records: Vec<MessageRecord>,
    typing: bool,
    updates: usize,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_typing(&self) -> bool {
        self.typing
    }

    /// Number of in-place updates applied so far.
    pub fn update_count(&self) -> usize {
        self.updates
    }

    pub fn bot_records(&self) -> impl Iterator<Item = &MessageRecord> {
        self.records.iter().filter(|r| r.role == Role::Bot)
    }

    pub fn last(&self) -> Option<&MessageRecord> {
        self.records.last()
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut MessageRecord> {
        self.records.iter_mut().find(|r| r.id == id)
    }
}

impl RenderSink for Transcript {
    fn show_typing(&mut self) {
        self.typing = true;
    }

    fn remove_typing(&mut self) {
        self.typing = false;
    }

    fn push(&mut self, record: MessageRecord) -> String {
        let id = record.id.clone();
        self.records.push(record);
        id
    }

    fn update(&mut self, id: &str, text: &str, markup: &str) {
        if let Some(record) = self.get_mut(id) {
            record.display_text = text.to_string();
            record.markup = markup.to_string();
            self.updates += 1;
        }
    }

    fn set_source_message_id(&mut self, id: &str, source_message_id: &str) {
        if let Some(record) = self.get_mut(id) {
            record.source_message_id = Some(source_message_id.to_string());
        }
    }

    fn set_feedback(&mut self, id: &str, feedback: Option<FeedbackRating>) {
        if let Some(record) = self.get_mut(id) {
            record.feedback = feedback;
        }
    }

    fn clear(&mut self) {
        self.records.clear();
        self.typing = false;
    }

    fn records(&self) -> &[MessageRecord] {
        &self.records
    }
}
