//! The chat controller: owns one session and drives exchanges from query to
//! rendered answer.
//!
//! A submit walks the session through `Idle -> Streaming -> Idle`. Payloads
//! are interpreted strictly in arrival order and every content update is
//! re-rendered into the same bot bubble. However the exchange ends, exactly
//! one closing message is produced (the answer, the no-response fallback,
//! the stop notice or the error) and the session returns to `Idle`.

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::ChatBackend;
use crate::config::ChatConfig;
use crate::error::{ChatError, Result};
use crate::event::{EventOutcome, Exchange};
use crate::protocol::{ChatRequest, ConversationList, FeedbackRating, FeedbackRequest, HistoryMessage, ProtocolVariant};
use crate::render::{escape_html, render_with, RenderOptions};
use crate::session::{ConversationSession, SessionState, StopHandle};
use crate::sink::{MessageRecord, RenderSink};
use crate::sse;

/// Shown when a stream ends without any answer text.
pub const NO_RESPONSE_TEXT: &str = "Sorry, no response was received.";

/// Shown when the user stops an answer.
pub const STOPPED_TEXT: &str = "Stopped by user.";

/// How a call to [`ChatController::submit`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Blank query; nothing happened.
    Ignored,
    /// Another answer is still streaming; nothing happened.
    Busy,
    Answered { record_id: String },
    NoResponse { record_id: String },
    Stopped { record_id: String },
    Failed { record_id: String, error: String },
}

impl SubmitOutcome {
    /// Id of the bot message that closed the exchange.
    pub fn record_id(&self) -> Option<&str> {
        match self {
            SubmitOutcome::Answered { record_id }
            | SubmitOutcome::NoResponse { record_id }
            | SubmitOutcome::Stopped { record_id }
            | SubmitOutcome::Failed { record_id, .. } => Some(record_id),
            SubmitOutcome::Ignored | SubmitOutcome::Busy => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ControllerOptions {
    pub variant: ProtocolVariant,
    pub render: RenderOptions,
    pub history_limit: u32,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            variant: ProtocolVariant::Chat,
            render: RenderOptions::default(),
            history_limit: 20,
        }
    }
}

impl From<&ChatConfig> for ControllerOptions {
    fn from(config: &ChatConfig) -> Self {
        Self {
            variant: config.protocol,
            render: RenderOptions {
                bold_figures: config.bold_figures,
            },
            history_limit: config.history_limit,
        }
    }
}

pub struct ChatController<B, S> {
    backend: B,
    sink: S,
    session: ConversationSession,
    options: ControllerOptions,
}

impl<B: ChatBackend, S: RenderSink> ChatController<B, S> {
    pub fn new(backend: B, sink: S, user_id: impl Into<String>, options: ControllerOptions) -> Self {
        Self {
            backend,
            sink,
            session: ConversationSession::new(user_id),
            options,
        }
    }

    pub fn session(&self) -> &ConversationSession {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Handle that stops whichever exchange is running when it fires.
    pub fn stop_handle(&self) -> StopHandle {
        self.session.stop_handle()
    }

    /// Send `query` and stream the answer into the sink.
    pub async fn submit(&mut self, query: &str) -> SubmitOutcome {
        let query = query.trim();
        if query.is_empty() {
            return SubmitOutcome::Ignored;
        }
        let cancel = match self.session.begin() {
            Ok(token) => token,
            Err(_) => {
                debug!(state = %self.session.state(), "submit rejected while streaming");
                return SubmitOutcome::Busy;
            }
        };

        self.sink.push(MessageRecord::user(query));
        self.sink.show_typing();

        let mut bubble = None;
        let result = self.stream_answer(query, cancel, &mut bubble).await;
        self.sink.remove_typing();

        let outcome = match result {
            Ok(exchange) => self.conclude(&exchange, bubble),
            Err(e) => self.fail(e, bubble),
        };
        self.session.finish();
        outcome
    }

    async fn stream_answer(
        &mut self,
        query: &str,
        cancel: CancellationToken,
        bubble: &mut Option<String>,
    ) -> Result<Exchange> {
        let request = ChatRequest::new(
            query,
            self.session.user_id(),
            self.session.conversation_id().map(str::to_string),
        );
        let body = self.backend.stream_chat(&request, cancel.clone()).await?;
        let mut payloads = sse::payloads(body, cancel);
        let mut exchange = Exchange::new(self.options.variant);

        while let Some(payload) = payloads.next().await {
            let payload = payload?;
            match exchange.apply_payload(&payload) {
                EventOutcome::ContentUpdated => self.show_answer(bubble, exchange.answer()),
                EventOutcome::Finished => {
                    if let Some(id) = exchange.conversation_id() {
                        self.session.set_conversation_id(id);
                    }
                }
                EventOutcome::Failed(message) => return Err(ChatError::Protocol(message)),
                EventOutcome::Ignored => {}
            }
        }
        Ok(exchange)
    }

    /// Materialize the bot bubble on first content, update it after that.
    fn show_answer(&mut self, bubble: &mut Option<String>, answer: &str) {
        let markup = render_with(answer, &self.options.render);
        match bubble {
            Some(id) => self.sink.update(id, answer, &markup),
            None => {
                self.sink.remove_typing();
                *bubble = Some(self.sink.push(MessageRecord::bot(answer, markup)));
            }
        }
    }

    fn notice(&mut self, text: &str) -> String {
        self.sink.push(MessageRecord::bot(text, escape_html(text)))
    }

    fn conclude(&mut self, exchange: &Exchange, bubble: Option<String>) -> SubmitOutcome {
        // a stop that raced the end of the body changes nothing
        self.session.take_user_stopped();
        match bubble {
            Some(record_id) => {
                if let Some(message_id) = exchange.message_id() {
                    self.sink.set_source_message_id(&record_id, message_id);
                }
                self.sink.complete(&record_id);
                SubmitOutcome::Answered { record_id }
            }
            None => {
                info!("stream ended without answer text");
                let record_id = self.notice(NO_RESPONSE_TEXT);
                SubmitOutcome::NoResponse { record_id }
            }
        }
    }

    fn fail(&mut self, error: ChatError, bubble: Option<String>) -> SubmitOutcome {
        if let Some(id) = &bubble {
            self.sink.complete(id);
        }
        let stopped = self.session.take_user_stopped();
        if stopped || error.is_aborted() {
            debug!("exchange stopped by user");
            let record_id = self.notice(STOPPED_TEXT);
            return SubmitOutcome::Stopped { record_id };
        }
        warn!(error = %error, status = ?error.status(), "exchange failed");
        let record_id = self.notice(&format!("Sorry, something went wrong: {error}"));
        SubmitOutcome::Failed {
            record_id,
            error: error.to_string(),
        }
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.session.is_streaming() {
            return Err(ChatError::Busy);
        }
        Ok(())
    }

    /// Start over: clear the transcript and forget the conversation id.
    pub fn new_conversation(&mut self) -> Result<()> {
        self.ensure_idle()?;
        self.session.reset();
        self.sink.clear();
        Ok(())
    }

    pub async fn list_conversations(&self) -> Result<ConversationList> {
        self.backend
            .list_conversations(self.session.user_id(), self.options.history_limit)
            .await
    }

    /// Replace the transcript with a stored conversation and continue it.
    /// Returns the number of records shown.
    pub async fn load_conversation(&mut self, conversation_id: &str) -> Result<usize> {
        self.ensure_idle()?;
        let mut messages = self
            .backend
            .conversation_messages(conversation_id, self.session.user_id())
            .await?
            .data;
        // stable, so backends without timestamps keep their order
        messages.sort_by_key(|m| m.created_at.unwrap_or(i64::MIN));

        self.sink.clear();
        self.session.reset();
        let mut shown = 0;
        for message in &messages {
            shown += self.replay(message);
        }
        self.session.set_conversation_id(conversation_id);
        debug!(conversation_id, shown, "conversation loaded");
        Ok(shown)
    }

    fn replay(&mut self, message: &HistoryMessage) -> usize {
        let mut shown = 0;
        if !message.query.is_empty() {
            self.sink.push(MessageRecord::user(message.query.as_str()));
            shown += 1;
        }
        if !message.answer.is_empty() {
            let markup = render_with(&message.answer, &self.options.render);
            let record = MessageRecord::bot(message.answer.as_str(), markup)
                .with_source(Some(message.id.clone()))
                .with_feedback(message.feedback.as_ref().and_then(|f| f.rating));
            self.sink.push(record);
            shown += 1;
        }
        shown
    }

    /// Delete a stored conversation. Deleting the active one starts a new
    /// conversation. Returns whether the active conversation was deleted.
    pub async fn delete_conversation(&mut self, conversation_id: &str) -> Result<bool> {
        self.ensure_idle()?;
        self.backend
            .delete_conversation(conversation_id, self.session.user_id())
            .await?;
        let active = self.session.conversation_id() == Some(conversation_id);
        if active {
            self.new_conversation()?;
        }
        Ok(active)
    }

    /// Rate a bot message. Choosing the rating it already has retracts it.
    /// Returns the rating now stored.
    pub async fn rate(&mut self, record_id: &str, rating: FeedbackRating) -> Result<Option<FeedbackRating>> {
        let record = self
            .sink
            .record(record_id)
            .filter(|r| r.is_rateable())
            .ok_or_else(|| ChatError::NotRateable(record_id.to_string()))?;
        let message_id = record
            .source_message_id
            .clone()
            .ok_or_else(|| ChatError::NotRateable(record_id.to_string()))?;
        let next = if record.feedback == Some(rating) {
            None
        } else {
            Some(rating)
        };

        self.send_feedback(&message_id, next, "").await?;
        self.sink.set_feedback(record_id, next);
        Ok(next)
    }

    /// Send feedback for a backend message id directly.
    pub async fn send_feedback(
        &self,
        message_id: &str,
        rating: Option<FeedbackRating>,
        comment: &str,
    ) -> Result<()> {
        let request = FeedbackRequest {
            rating,
            user: self.session.user_id().to_string(),
            content: comment.to_string(),
        };
        self.backend.send_feedback(message_id, &request).await
    }
}
