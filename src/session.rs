//! Per-widget session state: the active conversation and whether an answer
//! is streaming.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use crate::error::{ChatError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Streaming,
    /// Stop was requested; the in-flight read has not unwound yet.
    Aborting,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Streaming => write!(f, "streaming"),
            SessionState::Aborting => write!(f, "aborting"),
        }
    }
}

#[derive(Debug, Default)]
struct StopState {
    current: Mutex<Option<CancellationToken>>,
    stopped: AtomicBool,
}

/// Requests a stop of the running exchange from another task.
///
/// One handle lives as long as its session and is re-armed for every
/// exchange, so it can be cloned into a Ctrl-C handler up front.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    inner: Arc<StopState>,
}

impl StopHandle {
    fn current(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.inner.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Cancel the running exchange. Returns `false` when nothing is running.
    pub fn stop(&self) -> bool {
        let current = self.current();
        match current.as_ref() {
            Some(token) => {
                self.inner.stopped.store(true, Ordering::SeqCst);
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.current().is_some()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    fn arm(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let mut current = self.current();
        self.inner.stopped.store(false, Ordering::SeqCst);
        *current = Some(token.clone());
        token
    }

    fn disarm(&self) {
        self.current().take();
    }

    fn take_stopped(&self) -> bool {
        self.inner.stopped.swap(false, Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct ConversationSession {
    conversation_id: Option<String>,
    user_id: String,
    state: SessionState,
    stop: StopHandle,
}

impl ConversationSession {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            conversation_id: None,
            user_id: user_id.into(),
            state: SessionState::Idle,
            stop: StopHandle::default(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn set_conversation_id(&mut self, id: impl Into<String>) {
        self.conversation_id = Some(id.into());
    }

    /// Current state. A stop requested through a [`StopHandle`] shows up as
    /// `Aborting` until the exchange unwinds.
    pub fn state(&self) -> SessionState {
        if self.state == SessionState::Streaming && self.stop.is_stopped() {
            SessionState::Aborting
        } else {
            self.state
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.state != SessionState::Idle
    }

    /// `Idle -> Streaming`. Returns the token the exchange must honour.
    ///
    /// # Errors
    /// [`ChatError::Busy`] if an exchange is already running.
    pub fn begin(&mut self) -> Result<CancellationToken> {
        if self.state != SessionState::Idle {
            return Err(ChatError::Busy);
        }
        self.state = SessionState::Streaming;
        Ok(self.stop.arm())
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// `Streaming -> Aborting`. No-op when idle.
    pub fn request_stop(&mut self) {
        if self.state == SessionState::Streaming && self.stop.stop() {
            self.state = SessionState::Aborting;
        }
    }

    /// Whether the user asked to stop the current exchange. Reading it clears
    /// the flag, so the stop message is produced once.
    pub fn take_user_stopped(&mut self) -> bool {
        self.stop.take_stopped()
    }

    /// Back to `Idle` from any state, dropping the cancellation token.
    pub fn finish(&mut self) {
        self.state = SessionState::Idle;
        self.stop.disarm();
    }

    /// Forget the active conversation.
    pub fn reset(&mut self) {
        self.conversation_id = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_idle_without_conversation() {
        let s = ConversationSession::new("user_1");
        assert_eq!(s.state(), SessionState::Idle);
        assert!(s.conversation_id().is_none());
        assert_eq!(s.user_id(), "user_1");
        assert!(!s.stop_handle().is_running());
    }

    #[test]
    fn test_begin_twice_is_busy() {
        let mut s = ConversationSession::new("u");
        s.begin().expect("first begin");
        assert!(matches!(s.begin(), Err(ChatError::Busy)));
        assert_eq!(s.state(), SessionState::Streaming);
    }

    #[test]
    fn test_request_stop_cancels_token() {
        let mut s = ConversationSession::new("u");
        let token = s.begin().unwrap();
        s.request_stop();
        assert!(token.is_cancelled());
        assert_eq!(s.state(), SessionState::Aborting);
        assert!(s.take_user_stopped());
        assert!(!s.take_user_stopped(), "flag is consumed once");
    }

    #[test]
    fn test_handle_taken_before_begin_stops_later_exchange() {
        let mut s = ConversationSession::new("u");
        let handle = s.stop_handle();
        assert!(!handle.stop(), "nothing to stop while idle");

        let token = s.begin().unwrap();
        assert!(handle.is_running());
        assert!(handle.clone().stop());
        assert!(token.is_cancelled());
        assert_eq!(s.state(), SessionState::Aborting);
        assert!(s.take_user_stopped());
    }

    #[test]
    fn test_new_exchange_gets_fresh_token() {
        let mut s = ConversationSession::new("u");
        let first = s.begin().unwrap();
        s.request_stop();
        s.finish();
        let second = s.begin().unwrap();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_eq!(s.state(), SessionState::Streaming);
    }

    #[test]
    fn test_request_stop_when_idle_is_noop() {
        let mut s = ConversationSession::new("u");
        s.request_stop();
        assert_eq!(s.state(), SessionState::Idle);
        assert!(!s.take_user_stopped());
    }

    #[test]
    fn test_finish_returns_to_idle_from_aborting() {
        let mut s = ConversationSession::new("u");
        s.begin().unwrap();
        s.request_stop();
        s.finish();
        assert_eq!(s.state(), SessionState::Idle);
        assert!(!s.stop_handle().is_running());
        assert!(s.begin().is_ok());
    }

    #[test]
    fn test_reset_clears_conversation() {
        let mut s = ConversationSession::new("u");
        s.set_conversation_id("c1");
        assert_eq!(s.conversation_id(), Some("c1"));
        s.reset();
        assert!(s.conversation_id().is_none());
    }
}
