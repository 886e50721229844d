use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{
    blocking_client, ensure_success, BackendError, ChatBackend, ChatPayload,
    CHAT_REQUEST_TIMEOUT,
};

const PROVIDER: &str = "ollama";

/// Keys owned by [`ChatPayload`]; options may not override them.
const RESERVED_KEYS: [&str; 3] = ["model", "stream", "messages"];

/// Extra top-level request fields (`options`, `keep_alive`, `format`, ...).
pub type OllamaOptions = Map<String, Value>;

#[derive(Debug, Clone)]
pub struct OllamaBackend {
    host: String,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    #[serde(flatten)]
    payload: &'a ChatPayload,
    #[serde(flatten)]
    options: &'a OllamaOptions,
}

#[derive(Debug, Default, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    message: Option<OllamaChatMessage>,
}

#[derive(Debug, Default, Deserialize)]
struct OllamaChatMessage {
    #[serde(default)]
    content: String,
}

impl OllamaBackend {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into().trim_end_matches('/').to_string(),
            options: OllamaOptions::new(),
        }
    }

    pub fn with_options(mut self, options: OllamaOptions) -> Self {
        self.options = options;
        self
    }

    pub fn endpoint(&self) -> String {
        format!("{}/api/chat", self.host)
    }
}

impl ChatBackend for OllamaBackend {
    fn provider_name(&self) -> &'static str {
        PROVIDER
    }

    fn send_chat(&self, payload: &ChatPayload) -> Result<String, BackendError> {
        let client = blocking_client(CHAT_REQUEST_TIMEOUT)?;
        debug!(model = %payload.model, messages = payload.messages.len(), "ollama chat request");
        let resp = client
            .post(self.endpoint())
            .json(&OllamaChatRequest {
                payload,
                options: &self.options,
            })
            .send()
            .map_err(|source| BackendError::Transport {
                provider: PROVIDER,
                source,
            })?;
        let parsed: OllamaChatResponse =
            ensure_success(PROVIDER, resp)?
                .json()
                .map_err(|source| BackendError::Decode {
                    provider: PROVIDER,
                    source,
                })?;
        Ok(parsed.message.map(|m| m.content).unwrap_or_default())
    }
}

/// Reads `OLLAMA_OPTIONS`. Anything but a JSON object is ignored with a
/// warning; payload-owned keys are dropped.
pub fn parse_ollama_options(raw: &str) -> OllamaOptions {
    let raw = raw.trim();
    if raw.is_empty() {
        return OllamaOptions::new();
    }
    let mut options = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(options)) => options,
        Ok(_) => {
            warn!("OLLAMA_OPTIONS is not a JSON object; ignoring it");
            return OllamaOptions::new();
        }
        Err(error) => {
            warn!(error = %error, "OLLAMA_OPTIONS is not valid JSON; ignoring it");
            return OllamaOptions::new();
        }
    };
    for key in RESERVED_KEYS {
        if options.remove(key).is_some() {
            warn!(key, "OLLAMA_OPTIONS cannot override this field");
        }
    }
    options
}
