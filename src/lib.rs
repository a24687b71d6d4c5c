//! Streaming chat client.
//!
//! A query goes out as one `POST`; the answer comes back as server-sent
//! `data:` lines. [`sse`] splits the body into payloads, [`event`]
//! interprets them into an accumulated answer, [`render`] turns the answer
//! into markup and [`controller`] ties it together around one
//! [`session::ConversationSession`], pushing bubbles into a
//! [`sink::RenderSink`].
//!
//! ```rust,ignore
//! let client = ChatClient::builder("http://127.0.0.1:8000").build();
//! let mut chat = ChatController::new(client, Transcript::new(), "user_1", ControllerOptions::default());
//! chat.submit("How many units shipped today?").await;
//! ```

pub mod cli;
pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod outputs;
pub mod protocol;
pub mod render;
pub mod session;
pub mod sink;
pub mod sse;

pub use client::{ChatBackend, ChatClient, ClientBuilder};
pub use config::ChatConfig;
pub use controller::{ChatController, ControllerOptions, SubmitOutcome, NO_RESPONSE_TEXT, STOPPED_TEXT};
pub use error::{ChatError, Result};
pub use event::{EventKind, EventOutcome, Exchange, StreamEvent};
pub use protocol::{FeedbackRating, ProtocolVariant};
pub use render::{render, render_with, RenderOptions};
pub use session::{ConversationSession, SessionState, StopHandle};
pub use sink::{MessageRecord, RenderSink, Role, Transcript};
