//! Client configuration.
//!
//! Resolution order: built-in defaults, then an optional TOML file, then the
//! `CHAT_*` environment variables. CLI flags are applied last by the binary.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ChatError, Result};
use crate::protocol::ProtocolVariant;

pub const ENV_API_URL: &str = "CHAT_API_URL";
pub const ENV_USER_ID: &str = "CHAT_USER_ID";
pub const ENV_PROTOCOL: &str = "CHAT_PROTOCOL";
pub const ENV_CONFIG: &str = "CHAT_CONFIG";

const DEFAULT_FILE: &str = "sse-chat.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub base_url: String,
    pub api_prefix: String,
    /// Generated per process when not configured.
    pub user_id: Option<String>,
    pub protocol: ProtocolVariant,
    pub connect_timeout_secs: u64,
    /// Applies to history and feedback calls, never to the answer stream.
    pub request_timeout_secs: u64,
    pub history_limit: u32,
    pub bold_figures: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            api_prefix: "/api/v1".to_string(),
            user_id: None,
            protocol: ProtocolVariant::Chat,
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            history_limit: 20,
            bold_figures: true,
        }
    }
}

/// `user_` followed by the first eight hex digits of a v4 uuid.
pub fn generate_user_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("user_{}", &id[..8])
}

impl ChatConfig {
    /// Load from `path`, or from `$CHAT_CONFIG` / `./sse-chat.toml` when
    /// present, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path: Option<PathBuf> = match path {
            Some(p) => Some(p.to_path_buf()),
            None => env::var(ENV_CONFIG)
                .ok()
                .map(PathBuf::from)
                .or_else(|| Path::new(DEFAULT_FILE).exists().then(|| PathBuf::from(DEFAULT_FILE))),
        };

        let mut config = match path {
            Some(p) => Self::from_file(&p)?,
            None => Self::default(),
        };
        config.apply_env(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| ChatError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_toml(&contents)
            .map_err(|e| ChatError::Config(format!("failed to parse {}: {}", path.display(), e)))
    }

    pub fn from_toml(contents: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Apply `CHAT_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.trim().is_empty()) {
            self.base_url = url;
        }
        if let Some(user) = lookup(ENV_USER_ID).filter(|v| !v.trim().is_empty()) {
            self.user_id = Some(user);
        }
        if let Some(protocol) = lookup(ENV_PROTOCOL) {
            self.protocol = protocol.parse().map_err(ChatError::Config)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ChatError::Config(format!(
                "base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        if self.history_limit == 0 {
            return Err(ChatError::Config("history_limit must be at least 1".into()));
        }
        Ok(())
    }

    /// The configured user id, or a freshly generated one stored back.
    pub fn ensure_user_id(&mut self) -> &str {
        self.user_id.get_or_insert_with(generate_user_id)
    }

    /// `{base_url}{api_prefix}` without a doubled slash.
    pub fn api_root(&self) -> String {
        join_api_root(&self.base_url, &self.api_prefix)
    }
}

pub(crate) fn join_api_root(base_url: &str, api_prefix: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let prefix = api_prefix.trim_matches('/');
    if prefix.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{prefix}")
    }
}
