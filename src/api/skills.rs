use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;
use serde_json::Value;

use crate::api::handler_utils::{internal_error, into_json, ApiObject};
use crate::api::server::AppState;

#[derive(Debug, Clone, Serialize)]
struct SkillSummary {
    name: String,
    description: String,
}

/// Bare `[{name, description}]` array; the bundled frontend reads it as is.
pub async fn list_skills_handler(State(state): State<AppState>) -> ApiObject<Value> {
    let chat = state.chat.clone();
    let result = tokio::task::spawn_blocking(move || chat.list_skills()).await;

    match result {
        Ok(Ok(skills)) => {
            let skills = skills
                .into_iter()
                .map(|skill| SkillSummary {
                    name: skill.name,
                    description: skill.description,
                })
                .collect::<Vec<_>>();
            (StatusCode::OK, into_json(skills))
        }
        Ok(Err(error)) => internal_error(format!("skill listing failed: {error}")),
        Err(join_error) => internal_error(format!("skill listing task failed: {join_error}")),
    }
}
