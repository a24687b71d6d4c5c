//! HTTP access to the chat backend.
//!
//! [`ChatBackend`] is the seam the controller is written against;
//! [`ChatClient`] implements it over `reqwest`. Build one with
//! [`ChatClient::builder`] or [`ClientBuilder::from_config`].

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Response;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{join_api_root, ChatConfig};
use crate::error::{ChatError, Result};
use crate::protocol::{
    ChatRequest, ConversationList, DeleteConversationRequest, FeedbackRequest, MessageList,
};
use crate::sse::ByteStream;

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Open the answer stream. Resolves once response headers arrive.
    ///
    /// # Errors
    /// - [`ChatError::Transport`] on a non-2xx status, with the body text.
    /// - [`ChatError::Network`] when the request cannot be sent.
    /// - [`ChatError::Aborted`] when `cancel` fires before the headers.
    async fn stream_chat(&self, request: &ChatRequest, cancel: CancellationToken) -> Result<ByteStream>;

    async fn list_conversations(&self, user: &str, limit: u32) -> Result<ConversationList>;

    async fn conversation_messages(&self, conversation_id: &str, user: &str) -> Result<MessageList>;

    async fn delete_conversation(&self, conversation_id: &str, user: &str) -> Result<()>;

    async fn send_feedback(&self, message_id: &str, feedback: &FeedbackRequest) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Scheme, host and port, e.g. `http://127.0.0.1:8000`.
    pub base_url: String,
    pub api_prefix: String,
    pub connect_timeout: Duration,
    /// Timeout for everything except the answer stream.
    pub request_timeout: Duration,
}

impl ClientConfig {
    /// Defaults: `/api/v1`, 10 s connect, 30 s request.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_prefix: "/api/v1".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }

    fn api_root(&self) -> String {
        join_api_root(&self.base_url, &self.api_prefix)
    }
}

#[derive(Debug, Clone)]
pub struct ChatClient {
    config: ClientConfig,
    api_root: String,
    http: reqwest::Client,
}

impl ChatClient {
    pub fn builder(base_url: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(base_url)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_root, path.trim_start_matches('/'))
    }

    async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T> {
        let resp = check_status(resp).await?;
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Turn a non-2xx response into [`ChatError::Transport`].
async fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let url = resp.url().to_string();
    let body = resp.text().await.unwrap_or_default();
    warn!(status = status.as_u16(), url = %url, "backend returned an error status");
    Err(ChatError::Transport {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl ChatBackend for ChatClient {
    async fn stream_chat(&self, request: &ChatRequest, cancel: CancellationToken) -> Result<ByteStream> {
        let url = self.url("chat/stream");
        debug!(url = %url, conversation = ?request.conversation_id, "opening answer stream");

        let send = self
            .http
            .post(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(request)
            .send();
        // an error body can stall as long as a stream does
        let open = async move { check_status(send.await?).await };

        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChatError::Aborted),
            resp = open => resp?,
        };

        let body = resp
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(ChatError::from));
        Ok(Box::pin(body))
    }

    async fn list_conversations(&self, user: &str, limit: u32) -> Result<ConversationList> {
        let resp = self
            .http
            .get(self.url("conversations"))
            .query(&[("user", user.to_string()), ("limit", limit.to_string())])
            .timeout(self.config.request_timeout)
            .send()
            .await?;
        Self::read_json(resp).await
    }

    async fn conversation_messages(&self, conversation_id: &str, user: &str) -> Result<MessageList> {
        let resp = self
            .http
            .get(self.url(&format!("conversations/{conversation_id}/messages")))
            .query(&[("user", user)])
            .timeout(self.config.request_timeout)
            .send()
            .await?;
        Self::read_json(resp).await
    }

    async fn delete_conversation(&self, conversation_id: &str, user: &str) -> Result<()> {
        let resp = self
            .http
            .delete(self.url(&format!("conversations/{conversation_id}")))
            .json(&DeleteConversationRequest { user: user.to_string() })
            .timeout(self.config.request_timeout)
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }

    async fn send_feedback(&self, message_id: &str, feedback: &FeedbackRequest) -> Result<()> {
        let resp = self
            .http
            .post(self.url(&format!("messages/{message_id}/feedbacks")))
            .json(feedback)
            .timeout(self.config.request_timeout)
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }
}

/// Builder for [`ChatClient`].
///
/// ```rust,ignore
/// let client = ChatClient::builder("http://127.0.0.1:8000")
///     .connect_timeout(Duration::from_secs(3))
///     .build();
/// ```
pub struct ClientBuilder {
    config: ClientConfig,
}

impl ClientBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            config: ClientConfig::new(base_url),
        }
    }

    pub fn from_config(config: &ChatConfig) -> Self {
        Self::new(config.base_url.clone())
            .api_prefix(config.api_prefix.clone())
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .request_timeout(Duration::from_secs(config.request_timeout_secs))
    }

    pub fn api_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.api_prefix = prefix.into();
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn build(self) -> ChatClient {
        // No overall timeout on the client: the answer stream runs until it
        // ends or the user stops it.
        let http = reqwest::Client::builder()
            .connect_timeout(self.config.connect_timeout)
            .build()
            .unwrap_or_default();

        ChatClient {
            api_root: self.config.api_root(),
            config: self.config,
            http,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let client = ChatClient::builder("http://127.0.0.1:8000").build();
        assert_eq!(client.config().api_prefix, "/api/v1");
        assert_eq!(client.config().connect_timeout, Duration::from_secs(10));
        assert_eq!(client.config().request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_builder_overrides() {
        let client = ChatClient::builder("http://h")
            .api_prefix("/v2")
            .connect_timeout(Duration::from_secs(1))
            .request_timeout(Duration::from_secs(2))
            .build();
        assert_eq!(client.url("chat/stream"), "http://h/v2/chat/stream");
        assert_eq!(client.config().request_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let client = ChatClient::builder("http://h:1/").build();
        assert_eq!(client.url("/conversations"), "http://h:1/api/v1/conversations");
    }

    #[test]
    fn test_empty_prefix() {
        let client = ChatClient::builder("http://h").api_prefix("").build();
        assert_eq!(client.url("messages/m1/feedbacks"), "http://h/messages/m1/feedbacks");
    }

    #[test]
    fn test_from_config() {
        let config = ChatConfig {
            base_url: "https://chat.example".into(),
            connect_timeout_secs: 4,
            request_timeout_secs: 9,
            ..Default::default()
        };
        let client = ClientBuilder::from_config(&config).build();
        assert_eq!(client.url("chat/stream"), "https://chat.example/api/v1/chat/stream");
        assert_eq!(client.config().connect_timeout, Duration::from_secs(4));
        assert_eq!(client.config().request_timeout, Duration::from_secs(9));
    }

    #[tokio::test]
    async fn test_cancel_before_headers_is_aborted() {
        // Reserved but unused port; the token fires first anyway.
        let client = ChatClient::builder("http://127.0.0.1:9").build();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client
            .stream_chat(&ChatRequest::new("q", "u", None), cancel)
            .await
            .err()
            .expect("aborted");
        assert!(err.is_aborted());
    }
}
