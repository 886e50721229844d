use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::api::handler_utils::{internal_error, into_json, validation_error, ApiObject};
use crate::api::server::AppState;
use crate::retouch::ImageCategory;

const IMAGE_FIELD: &str = "image";

#[derive(Debug, Clone, Serialize)]
struct AnalyzeImageResponse {
    ok: bool,
    category: ImageCategory,
    label: &'static str,
}

pub async fn analyze_image_handler(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiObject<Value> {
    let Ok(mut multipart) = multipart else {
        return validation_error("Invalid content type");
    };

    let mut upload = None::<(String, Vec<u8>)>;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(error) => return validation_error(format!("Invalid multipart body: {error}")),
        };
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        match field.bytes().await {
            Ok(bytes) => upload = Some((filename, bytes.to_vec())),
            Err(error) => return validation_error(format!("Invalid image data: {error}")),
        }
        break;
    }

    let Some((filename, bytes)) = upload else {
        return validation_error("Missing image");
    };
    if bytes.is_empty() {
        return validation_error("Empty image data");
    }

    let classifier = state.classifier.clone();
    let result =
        tokio::task::spawn_blocking(move || classifier.classify(bytes.as_slice(), filename.as_str()))
            .await;

    match result {
        Ok(category) => {
            info!(category = category.as_str(), "image classified");
            (
                StatusCode::OK,
                into_json(AnalyzeImageResponse {
                    ok: true,
                    category,
                    label: category.label(),
                }),
            )
        }
        Err(join_error) => internal_error(format!("image classification task failed: {join_error}")),
    }
}
