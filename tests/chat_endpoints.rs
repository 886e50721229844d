use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use image::{Rgb, RgbImage};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use skillchat_backend::api::server::{build_router_with_state, AppState};
use skillchat_backend::chat::ChatService;
use skillchat_backend::llm::geo::DisabledLocator;
use skillchat_backend::llm::{BackendError, ChatBackend, ChatPayload, ChatRole};
use skillchat_backend::retouch::{encode_png, ImageClassifier};
use skillchat_backend::skills::AutoSelectStrategy;

const SELECTOR_SYSTEM_PROMPT: &str = "只输出技能名称或 NONE，不要其他文字。";

struct FakeBackend {
    reply: Result<String, u16>,
    selection: Option<String>,
    payloads: Mutex<Vec<ChatPayload>>,
}

impl FakeBackend {
    fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(reply.to_string()),
            selection: None,
            payloads: Mutex::new(Vec::new()),
        })
    }

    fn selecting(selection: &str, reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(reply.to_string()),
            selection: Some(selection.to_string()),
            payloads: Mutex::new(Vec::new()),
        })
    }

    fn failing(status: u16) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(status),
            selection: None,
            payloads: Mutex::new(Vec::new()),
        })
    }

    fn chat_payloads(&self) -> Vec<ChatPayload> {
        self.payloads
            .lock()
            .expect("payload lock")
            .iter()
            .filter(|payload| payload.messages[0].content != SELECTOR_SYSTEM_PROMPT)
            .cloned()
            .collect()
    }
}

impl ChatBackend for FakeBackend {
    fn provider_name(&self) -> &'static str {
        "fake"
    }

    fn send_chat(&self, payload: &ChatPayload) -> Result<String, BackendError> {
        self.payloads
            .lock()
            .expect("payload lock")
            .push(payload.clone());
        if payload.messages[0].content == SELECTOR_SYSTEM_PROMPT {
            return Ok(self.selection.clone().unwrap_or_else(|| String::from("NONE")));
        }
        match &self.reply {
            Ok(reply) => Ok(reply.clone()),
            Err(status) => Err(BackendError::Status {
                provider: "fake",
                status: *status,
                body: String::from("upstream exploded"),
            }),
        }
    }
}

#[tokio::test]
async fn graded_image_is_returned_when_reply_carries_adjustments() {
    let backend = FakeBackend::replying("建议曝光+20，饱和度+10");
    let app = test_app(backend.clone(), empty_skills_root(), AutoSelectStrategy::Model);

    let payload = send_json(
        app,
        "/chat",
        Body::from(json!({"message": "帮我修图", "image_data": png_base64()}).to_string()),
        StatusCode::OK,
    )
    .await;

    assert_eq!(payload["ok"], json!(true));
    assert_eq!(payload["reply"], json!("建议曝光+20，饱和度+10"));
    assert_eq!(payload["skill"], Value::Null);
    let encoded = payload["image_base64"]
        .as_str()
        .expect("image_base64 should be set");
    let png = BASE64_STANDARD.decode(encoded).expect("valid base64");
    let graded = image::load_from_memory(png.as_slice())
        .expect("graded output should be an image")
        .to_rgb8();
    assert_eq!(graded.dimensions(), (4, 3));
    assert_ne!(graded, sample_image());

    let sent = backend.chat_payloads();
    assert_eq!(sent.len(), 1);
    let user_turn = sent[0].messages.last().expect("user turn");
    assert_eq!(user_turn.content, "帮我修图\n[[IMAGE_ATTACHED]]");
}

#[tokio::test]
async fn reply_asking_for_more_info_leaves_image_out() {
    let backend = FakeBackend::replying("信息不足，请提供更多细节");
    let app = test_app(backend, empty_skills_root(), AutoSelectStrategy::Model);

    let payload = send_json(
        app,
        "/chat",
        Body::from(
            json!({
                "message": "帮我修图",
                "image_data": format!("data:image/png;base64,{}", png_base64())
            })
            .to_string(),
        ),
        StatusCode::OK,
    )
    .await;

    assert_eq!(payload["reply"], json!("信息不足，请提供更多细节"));
    assert_eq!(payload["image_base64"], Value::Null);
}

#[tokio::test]
async fn chat_without_image_never_grades() {
    let backend = FakeBackend::replying("曝光+20");
    let app = test_app(backend, empty_skills_root(), AutoSelectStrategy::Model);

    let payload = send_json(
        app,
        "/chat",
        Body::from(r#"{"message":"hello"}"#),
        StatusCode::OK,
    )
    .await;
    assert_eq!(payload["image_base64"], Value::Null);
}

#[tokio::test]
async fn invalid_input_is_rejected_with_validation_errors() {
    let backend = FakeBackend::replying("unused");
    let app = test_app(backend.clone(), empty_skills_root(), AutoSelectStrategy::Model);

    let malformed = send_json(
        app.clone(),
        "/chat",
        Body::from("{not json"),
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(malformed["ok"], json!(false));
    assert_eq!(malformed["error_kind"], json!("validation"));

    let empty = send_json(
        app.clone(),
        "/chat",
        Body::from(r#"{"message":"  "}"#),
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(empty["error"], json!("Empty message"));

    let bad_image = send_json(
        app,
        "/chat",
        Body::from(r#"{"message":"hi","image_data":"@@@"}"#),
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert!(bad_image["error"]
        .as_str()
        .expect("error message")
        .starts_with("Invalid image data"));

    assert!(backend.payloads.lock().expect("payload lock").is_empty());
}

#[tokio::test]
async fn backend_failure_surfaces_as_provider_error_without_history() {
    let backend = FakeBackend::failing(503);
    let skills_root = empty_skills_root();
    let chat = Arc::new(chat_service(
        backend.clone(),
        skills_root.as_path(),
        AutoSelectStrategy::Model,
    ));
    let app = app_for(chat.clone(), backend);

    let payload = send_json(
        app,
        "/chat",
        Body::from(r#"{"message":"hello"}"#),
        StatusCode::BAD_GATEWAY,
    )
    .await;
    assert_eq!(payload["ok"], json!(false));
    assert_eq!(payload["error_kind"], json!("provider"));
    assert_eq!(payload["error_code"], json!("provider_error"));
    assert!(chat.session_snapshot().history.is_empty());
}

#[tokio::test]
async fn override_skill_builds_skill_prompt() {
    let backend = FakeBackend::replying("好的");
    let root = skills_root_with(&[
        ("writer", "---\nname: writer\ndescription: 写作助手\n---\n逐段润色用户文本。"),
        ("weather", "---\nname: weather\ndescription: 天气查询\n---\n回答天气。"),
    ]);
    std::fs::create_dir_all(root.join("writer/reference")).expect("reference dir");
    std::fs::write(root.join("writer/reference/style.md"), "  简洁\n").expect("reference file");
    let app = test_app(backend.clone(), root, AutoSelectStrategy::Model);

    let payload = send_json(
        app,
        "/chat",
        Body::from(json!({"message": "帮我改改这段话", "skill": "writer"}).to_string()),
        StatusCode::OK,
    )
    .await;
    assert_eq!(payload["skill"], json!("writer"));

    let sent = backend.chat_payloads();
    assert_eq!(sent.len(), 1);
    let system = &sent[0].messages[0];
    assert_eq!(system.role, ChatRole::System);
    assert!(system.content.contains("逐段润色用户文本。"));
    assert!(system.content.ends_with("### reference/style.md\n简洁"));
}

#[tokio::test]
async fn binary_reference_in_another_skill_does_not_break_chat() {
    let backend = FakeBackend::replying("好的");
    let root = skills_root_with(&[
        ("writer", "---\nname: writer\ndescription: 写作助手\n---\n逐段润色用户文本。"),
        ("photo", "---\nname: photo\ndescription: 修图\n---\n调色。"),
    ]);
    std::fs::create_dir_all(root.join("photo/reference")).expect("reference dir");
    std::fs::write(root.join("photo/reference/sample.png"), [0x89u8, 0x50, 0x4e, 0x47, 0xff])
        .expect("binary reference file");
    let app = test_app(backend.clone(), root, AutoSelectStrategy::Model);

    let payload = send_json(
        app,
        "/chat",
        Body::from(json!({"message": "hello", "skill": "writer"}).to_string()),
        StatusCode::OK,
    )
    .await;
    assert_eq!(payload["skill"], json!("writer"));
    assert_eq!(payload["reply"], json!("好的"));

    let sent = backend.chat_payloads();
    assert!(!sent[0].messages[0].content.contains("以下是参考资料"));
}

#[tokio::test]
async fn line_wrapped_image_data_is_accepted() {
    let backend = FakeBackend::replying("曝光+10");
    let app = test_app(backend, empty_skills_root(), AutoSelectStrategy::Model);

    let wrapped = png_base64()
        .as_bytes()
        .chunks(16)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join("\r\n");
    let payload = send_json(
        app,
        "/chat",
        Body::from(json!({"message": "修图", "image_data": wrapped}).to_string()),
        StatusCode::OK,
    )
    .await;
    assert!(payload["image_base64"].is_string());
}

#[tokio::test]
async fn auto_selection_uses_model_choice_and_none_means_default_persona() {
    let root = skills_root_with(&[(
        "writer",
        "---\nname: writer\ndescription: 写作助手\n---\n逐段润色用户文本。",
    )]);

    let backend = FakeBackend::selecting("writer\n", "ok");
    let app = test_app(backend.clone(), root.clone(), AutoSelectStrategy::Model);
    let payload = send_json(
        app,
        "/chat",
        Body::from(r#"{"message":"润色一下","skill":"auto"}"#),
        StatusCode::OK,
    )
    .await;
    assert_eq!(payload["skill"], json!("writer"));

    let backend = FakeBackend::selecting("NONE", "ok");
    let app = test_app(backend.clone(), root, AutoSelectStrategy::Model);
    let payload = send_json(
        app,
        "/chat",
        Body::from(r#"{"message":"你好"}"#),
        StatusCode::OK,
    )
    .await;
    assert_eq!(payload["skill"], Value::Null);
    assert_eq!(
        backend.chat_payloads()[0].messages[0].content,
        "你是一个助手。回答要清晰、分步骤。"
    );
}

#[tokio::test]
async fn mode_phrase_pins_skill_until_turned_off() {
    let backend = FakeBackend::replying("在呢");
    let root = skills_root_with(&[
        (
            "boyfriend-mode",
            "---\nname: boyfriend-mode\ndescription: 男友陪聊\n---\n温柔地回应。",
        ),
        ("writer", "---\nname: writer\ndescription: 写作助手\n---\n润色。"),
    ]);
    let app = test_app(backend, root, AutoSelectStrategy::Keyword);

    let on = send_json(
        app.clone(),
        "/chat",
        Body::from(r#"{"message":"开启男友模式"}"#),
        StatusCode::OK,
    )
    .await;
    assert_eq!(on["skill"], json!("boyfriend-mode"));

    let sticky = send_json(
        app.clone(),
        "/chat",
        Body::from(r#"{"message":"今天好累"}"#),
        StatusCode::OK,
    )
    .await;
    assert_eq!(sticky["skill"], json!("boyfriend-mode"));

    let overridden = send_json(
        app.clone(),
        "/chat",
        Body::from(r#"{"message":"帮我写点东西","skill":"writer"}"#),
        StatusCode::OK,
    )
    .await;
    assert_eq!(overridden["skill"], json!("writer"));

    let off = send_json(
        app,
        "/chat",
        Body::from(r#"{"message":"结束男友模式"}"#),
        StatusCode::OK,
    )
    .await;
    assert_eq!(off["skill"], Value::Null);
}

#[tokio::test]
async fn history_is_capped_at_three_exchanges() {
    let backend = FakeBackend::replying("ok");
    let chat = Arc::new(chat_service(
        backend.clone(),
        empty_skills_root().as_path(),
        AutoSelectStrategy::Keyword,
    ));
    let app = app_for(chat.clone(), backend.clone());

    for i in 1..=4 {
        send_json(
            app.clone(),
            "/chat",
            Body::from(json!({"message": format!("q{i}")}).to_string()),
            StatusCode::OK,
        )
        .await;
    }

    let history = chat.session_snapshot().history;
    let contents = history
        .turns()
        .map(|turn| turn.content.clone())
        .collect::<Vec<_>>();
    assert_eq!(contents, vec!["q2", "ok", "q3", "ok", "q4", "ok"]);

    let last = backend.chat_payloads().pop().expect("last payload");
    assert_eq!(last.messages.len(), 8);
}

async fn send_json(app: axum::Router, uri: &str, body: Body, expected_status: StatusCode) -> Value {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
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

fn chat_service(backend: Arc<FakeBackend>, skills_root: &Path, strategy: AutoSelectStrategy) -> ChatService {
    ChatService::new(
        skills_root,
        backend,
        Arc::new(DisabledLocator),
        "test-model",
        strategy,
    )
}

fn app_for(chat: Arc<ChatService>, backend: Arc<FakeBackend>) -> axum::Router {
    let classifier = Arc::new(ImageClassifier::new(backend, None));
    build_router_with_state(AppState::new(chat, classifier, temp_root("frontend")))
}

fn test_app(backend: Arc<FakeBackend>, skills_root: PathBuf, strategy: AutoSelectStrategy) -> axum::Router {
    let chat = Arc::new(chat_service(backend.clone(), skills_root.as_path(), strategy));
    app_for(chat, backend)
}

fn temp_root(label: &str) -> PathBuf {
    let root = std::env::temp_dir().join(format!("skillchat_{label}_{}", Uuid::new_v4()));
    std::fs::create_dir_all(root.as_path()).expect("temp test root must be creatable");
    root
}

fn empty_skills_root() -> PathBuf {
    temp_root("skills")
}

fn skills_root_with(skills: &[(&str, &str)]) -> PathBuf {
    let root = temp_root("skills");
    for (dir, body) in skills {
        let skill_dir = root.join(dir);
        std::fs::create_dir_all(skill_dir.as_path()).expect("skill dir");
        std::fs::write(skill_dir.join("SKILL.md"), body).expect("skill file");
    }
    root
}

fn sample_image() -> RgbImage {
    RgbImage::from_fn(4, 3, |x, y| Rgb([(x * 50 + 20) as u8, (y * 60 + 30) as u8, 90]))
}

fn png_base64() -> String {
    let png = encode_png(&sample_image()).expect("sample should encode");
    BASE64_STANDARD.encode(png)
}
