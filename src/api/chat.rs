use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;
use serde_json::Value;

use crate::api::handler_utils::{internal_error, into_json, map_chat_error, validation_error, ApiObject};
use crate::api::server::AppState;
use crate::chat::ChatRequest;

#[derive(Debug, Clone, Serialize)]
struct ChatResponse {
    ok: bool,
    reply: String,
    skill: Option<String>,
    image_base64: Option<String>,
}

/// The body is decoded by hand so malformed JSON gets the same error shape
/// as every other failure.
pub async fn chat_handler(State(state): State<AppState>, body: Bytes) -> ApiObject<Value> {
    let request = match serde_json::from_slice::<ChatRequest>(body.as_ref()) {
        Ok(request) => request,
        Err(error) => return validation_error(format!("Invalid JSON body: {error}")),
    };

    let chat = state.chat.clone();
    let result = tokio::task::spawn_blocking(move || chat.handle(request)).await;

    match result {
        Ok(Ok(outcome)) => (
            StatusCode::OK,
            into_json(ChatResponse {
                ok: true,
                reply: outcome.reply,
                skill: outcome.skill,
                image_base64: outcome.image_base64,
            }),
        ),
        Ok(Err(error)) => map_chat_error(error),
        Err(join_error) => internal_error(format!("chat task failed: {join_error}")),
    }
}
