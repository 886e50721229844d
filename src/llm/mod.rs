pub mod deepseek;
pub mod geo;
pub mod ollama;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use deepseek::DeepSeekBackend;
pub use ollama::{parse_ollama_options, OllamaBackend, OllamaOptions};

pub const CHAT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }
}

/// Wire payload shared by both providers. `stream` is always `false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatPayload {
    pub model: String,
    pub stream: bool,
    pub messages: Vec<ChatMessage>,
}

impl ChatPayload {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            stream: false,
            messages,
        }
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("http client init failed: {0}")]
    ClientInit(#[source] reqwest::Error),
    #[error("{provider} request failed: {source}")]
    Transport {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{provider} returned HTTP {status}: {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },
    #[error("{provider} JSON decode failed: {source}")]
    Decode {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

/// One blocking model round-trip: payload in, assistant text out.
pub trait ChatBackend: Send + Sync + 'static {
    fn provider_name(&self) -> &'static str;

    fn send_chat(&self, payload: &ChatPayload) -> Result<String, BackendError>;
}

pub type SharedChatBackend = Arc<dyn ChatBackend>;

pub(crate) fn blocking_client(
    timeout: Duration,
) -> Result<reqwest::blocking::Client, BackendError> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(BackendError::ClientInit)
}

pub(crate) fn ensure_success(
    provider: &'static str,
    resp: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().unwrap_or_default();
    Err(BackendError::Status {
        provider,
        status: status.as_u16(),
        body,
    })
}
