use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Which backend app flavour the stream comes from.
///
/// `Chat` apps deliver the answer through `message` events. `Workflow` apps
/// deliver it once, in the `outputs` of `workflow_finished`.
#[derive(Debug, Clone, Copy, Default, ValueEnum, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVariant {
    #[default]
    Chat,
    Workflow,
}

impl std::fmt::Display for ProtocolVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolVariant::Chat => write!(f, "chat"),
            ProtocolVariant::Workflow => write!(f, "workflow"),
        }
    }
}

impl std::str::FromStr for ProtocolVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "chat" => Ok(ProtocolVariant::Chat),
            "workflow" => Ok(ProtocolVariant::Workflow),
            other => Err(format!("Unknown protocol: {}", other)),
        }
    }
}

// -- Streaming chat request -------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub query: String,
    pub user: String,
    /// Sent as `null` to start a new conversation.
    pub conversation_id: Option<String>,
    pub inputs: serde_json::Map<String, serde_json::Value>,
}

impl ChatRequest {
    pub fn new(query: impl Into<String>, user: impl Into<String>, conversation_id: Option<String>) -> Self {
        Self {
            query: query.into(),
            user: user.into(),
            conversation_id,
            inputs: serde_json::Map::new(),
        }
    }
}

// -- Feedback ---------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackRating {
    Like,
    Dislike,
}

impl std::fmt::Display for FeedbackRating {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedbackRating::Like => write!(f, "like"),
            FeedbackRating::Dislike => write!(f, "dislike"),
        }
    }
}

/// Body of `POST /messages/{id}/feedbacks`. A `None` rating retracts.
#[derive(Debug, Clone, Serialize)]
pub struct FeedbackRequest {
    pub rating: Option<FeedbackRating>,
    pub user: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteConversationRequest {
    pub user: String,
}

// -- History ----------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub updated_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationList {
    #[serde(default)]
    pub data: Vec<ConversationSummary>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageFeedback {
    #[serde(default)]
    pub rating: Option<FeedbackRating>,
}

/// One query/answer pair from a stored conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub id: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub feedback: Option<MessageFeedback>,
    #[serde(default)]
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageList {
    #[serde(default)]
    pub data: Vec<HistoryMessage>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub limit: Option<u32>,
}
