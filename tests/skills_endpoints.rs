use std::path::PathBuf;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use skillchat_backend::api::server::{build_router_with_state, AppState};
use skillchat_backend::chat::ChatService;
use skillchat_backend::llm::geo::DisabledLocator;
use skillchat_backend::llm::{BackendError, ChatBackend, ChatPayload};
use skillchat_backend::retouch::ImageClassifier;
use skillchat_backend::skills::AutoSelectStrategy;

struct SilentBackend;

impl ChatBackend for SilentBackend {
    fn provider_name(&self) -> &'static str {
        "silent"
    }

    fn send_chat(&self, _payload: &ChatPayload) -> Result<String, BackendError> {
        Ok(String::new())
    }
}

#[tokio::test]
async fn skills_are_listed_in_directory_order_with_fallbacks() {
    let root = temp_root();
    write_skill(&root, "b-weather", "---\nname: weather\ndescription: 查询天气\n---\n回答天气问题。");
    write_skill(&root, "a-writer", "直接写作，无元数据。");
    std::fs::create_dir_all(root.join("c-empty")).expect("dir without skill file");

    let payload = get_json(app_for(root), "/skills", StatusCode::OK).await;
    assert_eq!(
        payload,
        json!([
            {"name": "a-writer", "description": "无描述"},
            {"name": "weather", "description": "查询天气"}
        ])
    );
}

#[tokio::test]
async fn missing_skills_root_lists_nothing() {
    let root = std::env::temp_dir().join(format!("skillchat_missing_{}", Uuid::new_v4()));
    let payload = get_json(app_for(root), "/skills", StatusCode::OK).await;
    assert_eq!(payload, json!([]));
}

#[tokio::test]
async fn binary_reference_file_does_not_break_listing() {
    let root = temp_root();
    write_skill(&root, "photo", "---\nname: photo\ndescription: 修图\n---\n调色。");
    write_skill(&root, "writer", "---\nname: writer\ndescription: 写作\n---\n润色。");
    std::fs::create_dir_all(root.join("photo/reference")).expect("reference dir");
    std::fs::write(root.join("photo/reference/sample.png"), [0x89u8, 0x50, 0x4e, 0x47, 0xff])
        .expect("binary reference file");

    let payload = get_json(app_for(root), "/skills", StatusCode::OK).await;
    assert_eq!(
        payload,
        json!([
            {"name": "photo", "description": "修图"},
            {"name": "writer", "description": "写作"}
        ])
    );
}

async fn get_json(app: axum::Router, uri: &str, expected_status: StatusCode) -> Value {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");

    let response = app
        .oneshot(request)
        .await
        .expect("router should return response");
    assert_eq!(response.status(), expected_status);

    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should be readable");
    serde_json::from_slice(body.as_ref()).expect("response should be valid JSON")
}

fn app_for(skills_root: PathBuf) -> axum::Router {
    let backend = Arc::new(SilentBackend);
    let chat = Arc::new(ChatService::new(
        skills_root,
        backend.clone(),
        Arc::new(DisabledLocator),
        "test-model",
        AutoSelectStrategy::Keyword,
    ));
    let classifier = Arc::new(ImageClassifier::new(backend, None));
    build_router_with_state(AppState::new(chat, classifier, temp_root()))
}

fn temp_root() -> PathBuf {
    let root = std::env::temp_dir().join(format!("skillchat_skills_test_{}", Uuid::new_v4()));
    std::fs::create_dir_all(root.as_path()).expect("temp test root must be creatable");
    root
}

fn write_skill(root: &std::path::Path, dir: &str, body: &str) {
    let skill_dir = root.join(dir);
    std::fs::create_dir_all(skill_dir.as_path()).expect("skill dir");
    std::fs::write(skill_dir.join("SKILL.md"), body).expect("skill file");
}
