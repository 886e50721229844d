use serde::Deserialize;
use tracing::debug;

use super::{
    blocking_client, ensure_success, BackendError, ChatBackend, ChatPayload,
    CHAT_REQUEST_TIMEOUT,
};

const PROVIDER: &str = "deepseek";

/// OpenAI-compatible hosted chat completions with bearer auth.
#[derive(Clone)]
pub struct DeepSeekBackend {
    base_url: String,
    api_key: String,
}

impl std::fmt::Debug for DeepSeekBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeepSeekBackend")
            .field("base_url", &self.base_url)
            .field("api_key", &"******")
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
struct CompletionsResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Default, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    message: Option<CompletionMessage>,
}

#[derive(Debug, Default, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

impl DeepSeekBackend {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

impl ChatBackend for DeepSeekBackend {
    fn provider_name(&self) -> &'static str {
        PROVIDER
    }

    fn send_chat(&self, payload: &ChatPayload) -> Result<String, BackendError> {
        let client = blocking_client(CHAT_REQUEST_TIMEOUT)?;
        debug!(model = %payload.model, messages = payload.messages.len(), "deepseek chat request");
        let resp = client
            .post(self.endpoint())
            .bearer_auth(self.api_key.as_str())
            .json(payload)
            .send()
            .map_err(|source| BackendError::Transport {
                provider: PROVIDER,
                source,
            })?;
        let parsed: CompletionsResponse =
            ensure_success(PROVIDER, resp)?
                .json()
                .map_err(|source| BackendError::Decode {
                    provider: PROVIDER,
                    source,
                })?;
        Ok(first_choice_content(parsed))
    }
}

fn first_choice_content(parsed: CompletionsResponse) -> String {
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_choices_yield_empty_reply() {
        let parsed: CompletionsResponse =
            serde_json::from_str(r#"{"choices":[]}"#).expect("response should decode");
        assert_eq!(first_choice_content(parsed), "");
    }

    #[test]
    fn first_choice_content_is_returned() {
        let parsed: CompletionsResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"你好"}},{"message":{"content":"ignored"}}]}"#,
        )
        .expect("response should decode");
        assert_eq!(first_choice_content(parsed), "你好");
    }

    #[test]
    fn debug_output_masks_api_key() {
        let backend = DeepSeekBackend::new("https://api.deepseek.com/", "sk-secret");
        let rendered = format!("{backend:?}");
        assert!(!rendered.contains("sk-secret"));
        assert_eq!(backend.endpoint(), "https://api.deepseek.com/chat/completions");
    }
}
