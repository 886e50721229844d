use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::Serialize;
use tracing::{debug, warn};

use crate::llm::{BackendError, ChatMessage, ChatPayload, SharedChatBackend};

const VISION_PROMPT: &str =
    "你是图像分类器。只输出一个标签：landscape, people, portrait, car_model, model, unknown。不要输出其它文字。";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageCategory {
    Landscape,
    People,
    Portrait,
    CarModel,
    Model,
    Unknown,
}

impl ImageCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Landscape => "landscape",
            Self::People => "people",
            Self::Portrait => "portrait",
            Self::CarModel => "car_model",
            Self::Model => "model",
            Self::Unknown => "unknown",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Landscape => "风景",
            Self::People => "人物",
            Self::Portrait => "人像",
            Self::CarModel => "车模",
            Self::Model => "模型",
            Self::Unknown => "未识别",
        }
    }
}

/// Maps a model answer onto the vocabulary; anything unrecognised is
/// `Unknown`.
pub fn normalize_category(raw: &str) -> ImageCategory {
    match raw.trim().to_lowercase().as_str() {
        "landscape" | "scenery" | "scene" => ImageCategory::Landscape,
        "people" | "person" => ImageCategory::People,
        "portrait" => ImageCategory::Portrait,
        "car_model" | "car-model" | "car" => ImageCategory::CarModel,
        "model" | "figure" => ImageCategory::Model,
        _ => ImageCategory::Unknown,
    }
}

const FILENAME_RULES: [(ImageCategory, &[&str]); 5] = [
    (ImageCategory::Portrait, &["portrait", "head", "face", "人像"]),
    (
        ImageCategory::People,
        &["people", "person", "人物", "合影", "group"],
    ),
    (
        ImageCategory::Landscape,
        &["landscape", "scenery", "风景", "mountain", "sea"],
    ),
    (ImageCategory::CarModel, &["car", "汽车", "车模", "auto"]),
    (ImageCategory::Model, &["model", "模型", "figure"]),
];

/// Filename keyword heuristic. Rules are checked in order, first hit wins.
pub fn classify_fallback(filename: &str) -> ImageCategory {
    let lower = filename.to_lowercase();
    FILENAME_RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|keyword| lower.contains(keyword)))
        .map_or(ImageCategory::Unknown, |(category, _)| *category)
}

pub struct ImageClassifier {
    backend: SharedChatBackend,
    vision_model: Option<String>,
}

impl ImageClassifier {
    /// `vision_model` is `None` when the configured provider cannot see
    /// images; classification then uses the filename only.
    pub fn new(backend: SharedChatBackend, vision_model: Option<String>) -> Self {
        Self {
            backend,
            vision_model,
        }
    }

    pub fn classify(&self, image: &[u8], filename: &str) -> ImageCategory {
        let Some(model) = self.vision_model.as_deref() else {
            return classify_fallback(filename);
        };
        match self.classify_with_model(model, image) {
            Ok(category) => {
                debug!(category = category.as_str(), "vision model classified image");
                category
            }
            Err(error) => {
                warn!(error = %error, "vision classification failed; using filename heuristic");
                classify_fallback(filename)
            }
        }
    }

    fn classify_with_model(&self, model: &str, image: &[u8]) -> Result<ImageCategory, BackendError> {
        let payload = ChatPayload::new(
            model,
            vec![ChatMessage::user(VISION_PROMPT).with_images(vec![BASE64_STANDARD.encode(image)])],
        );
        let answer = self.backend.send_chat(&payload)?;
        Ok(normalize_category(answer.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatBackend;
    use std::sync::{Arc, Mutex};

    struct VisionStub {
        answer: Option<&'static str>,
        seen: Mutex<Vec<ChatPayload>>,
    }

    impl ChatBackend for VisionStub {
        fn provider_name(&self) -> &'static str {
            "ollama"
        }

        fn send_chat(&self, payload: &ChatPayload) -> Result<String, BackendError> {
            self.seen
                .lock()
                .expect("payload lock")
                .push(payload.clone());
            self.answer.map(str::to_string).ok_or(BackendError::Status {
                provider: "ollama",
                status: 500,
                body: String::from("model not loaded"),
            })
        }
    }

    fn stub(answer: Option<&'static str>) -> Arc<VisionStub> {
        Arc::new(VisionStub {
            answer,
            seen: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn aliases_normalize_to_the_vocabulary() {
        assert_eq!(normalize_category(" Scenery\n"), ImageCategory::Landscape);
        assert_eq!(normalize_category("person"), ImageCategory::People);
        assert_eq!(normalize_category("car-model"), ImageCategory::CarModel);
        assert_eq!(normalize_category("figure"), ImageCategory::Model);
        assert_eq!(normalize_category("NONE"), ImageCategory::Unknown);
        assert_eq!(normalize_category("a cat"), ImageCategory::Unknown);
    }

    #[test]
    fn filename_rules_apply_in_order() {
        assert_eq!(classify_fallback("face_group.jpg"), ImageCategory::Portrait);
        assert_eq!(classify_fallback("合影2024.png"), ImageCategory::People);
        assert_eq!(classify_fallback("Mountain.JPG"), ImageCategory::Landscape);
        assert_eq!(classify_fallback("car_show.png"), ImageCategory::CarModel);
        assert_eq!(classify_fallback("gundam-model.png"), ImageCategory::Model);
        assert_eq!(classify_fallback("IMG_0001.png"), ImageCategory::Unknown);
        assert_eq!(ImageCategory::CarModel.label(), "车模");
    }

    #[test]
    fn vision_model_receives_base64_image() {
        let backend = stub(Some("portrait"));
        let classifier = ImageClassifier::new(backend.clone(), Some(String::from("llava")));
        assert_eq!(
            classifier.classify(b"\x89PNG", "sea.png"),
            ImageCategory::Portrait
        );

        let seen = backend.seen.lock().expect("payload lock");
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].model, "llava");
        assert_eq!(seen[0].messages[0].images, vec![BASE64_STANDARD.encode(b"\x89PNG")]);
    }

    #[test]
    fn model_failure_or_missing_model_uses_filename() {
        let classifier = ImageClassifier::new(stub(None), Some(String::from("llava")));
        assert_eq!(classifier.classify(b"x", "sea.png"), ImageCategory::Landscape);

        let backend = stub(Some("portrait"));
        let classifier = ImageClassifier::new(backend.clone(), None);
        assert_eq!(classifier.classify(b"x", "sea.png"), ImageCategory::Landscape);
        assert!(backend.seen.lock().expect("payload lock").is_empty());
    }
}
