use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::activity::{run_inactivity_watchdog, track_activity, ActivityTracker, ShutdownSignal};
use crate::api::error::ErrorKind;
use crate::api::handler_utils::{error_response, internal_error, ApiObject};
use crate::chat::ChatService;
use crate::config::AppConfig;
use crate::retouch::ImageClassifier;

/// Uploaded photos travel base64-encoded inside the chat JSON body.
pub const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub service_name: &'static str,
    pub service_version: &'static str,
    pub started_unix_ms: u128,
    pub chat: Arc<ChatService>,
    pub classifier: Arc<ImageClassifier>,
    pub frontend_dir: PathBuf,
    pub activity: ActivityTracker,
    pub shutdown: ShutdownSignal,
}

impl AppState {
    pub fn new(
        chat: Arc<ChatService>,
        classifier: Arc<ImageClassifier>,
        frontend_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            service_name: "skillchat-backend",
            service_version: env!("CARGO_PKG_VERSION"),
            started_unix_ms: now_unix_ms(),
            chat,
            classifier,
            frontend_dir: frontend_dir.into(),
            activity: ActivityTracker::default(),
            shutdown: ShutdownSignal::default(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let backend = config.build_backend();
        let chat = ChatService::new(
            config.skills_dir.clone(),
            backend.clone(),
            config.build_locator(),
            config.provider.chat_model(),
            config.auto_select,
        );
        let classifier = ImageClassifier::new(backend, config.provider.vision_model());
        Self::new(
            Arc::new(chat),
            Arc::new(classifier),
            config.frontend_dir.clone(),
        )
    }
}

pub fn build_router(config: &AppConfig) -> Router {
    build_router_with_state(AppState::from_config(config))
}

pub fn build_router_with_state(state: AppState) -> Router {
    let assets = ServeDir::new(state.frontend_dir.join("assets"));

    Router::new()
        .route("/", get(index_handler))
        .route("/index.html", get(index_handler))
        .route("/health", get(health_handler))
        .route("/heartbeat", get(heartbeat_handler))
        .route("/shutdown", get(shutdown_handler).post(shutdown_handler))
        .route("/skills", get(crate::api::skills::list_skills_handler))
        .route("/chat", post(crate::api::chat::chat_handler))
        .route(
            "/analyze-image",
            post(crate::api::analyze::analyze_image_handler),
        )
        .nest_service("/assets", assets)
        .fallback(not_found_handler)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(middleware::from_fn_with_state(state.clone(), track_activity))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves until `/shutdown`, the inactivity watchdog or Ctrl-C stops it.
pub async fn serve(config: &AppConfig) -> std::io::Result<()> {
    let state = AppState::from_config(config);
    serve_with_state(config.bind, state, config.idle_timeout).await
}

pub async fn serve_with_state(
    addr: SocketAddr,
    state: AppState,
    idle_timeout: Option<std::time::Duration>,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let shutdown = state.shutdown.clone();

    if let Some(timeout) = idle_timeout {
        tokio::spawn(run_inactivity_watchdog(
            state.activity.clone(),
            timeout,
            shutdown.clone(),
        ));
    }
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received");
                shutdown.trigger();
            }
        });
    }

    let app = build_router_with_state(state);
    info!(bind = %addr, "starting skillchat-backend HTTP surface");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await?;
    info!("server stopped");
    Ok(())
}

async fn index_handler(State(state): State<AppState>) -> Response {
    let path = state.frontend_dir.join("index.html");
    let result = tokio::task::spawn_blocking(move || std::fs::read_to_string(path)).await;
    match result {
        Ok(Ok(html)) => Html(html).into_response(),
        Ok(Err(error)) => {
            warn!(error = %error, "frontend index is unavailable");
            (StatusCode::NOT_FOUND, "index.html not found").into_response()
        }
        Err(join_error) => internal_error(format!("index read task failed: {join_error}"))
            .into_response(),
    }
}

async fn health_handler(State(state): State<AppState>) -> ApiObject<Value> {
    (
        StatusCode::OK,
        Json(json!({
            "ok": true,
            "status": "ok",
            "service": state.service_name,
            "version": state.service_version,
            "started_unix_ms": state.started_unix_ms,
            "uptime_ms": now_unix_ms().saturating_sub(state.started_unix_ms),
        })),
    )
}

async fn heartbeat_handler() -> &'static str {
    "OK"
}

async fn shutdown_handler(State(state): State<AppState>) -> &'static str {
    info!("shutdown requested over HTTP");
    state.shutdown.trigger();
    "OK"
}

async fn not_found_handler() -> ApiObject<Value> {
    error_response(
        StatusCode::NOT_FOUND,
        ErrorKind::Validation,
        "not_found",
        "Not found",
    )
}

fn now_unix_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis())
}
