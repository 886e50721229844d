pub mod conversation;
pub mod repl;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::llm::geo::SharedCityLocator;
use crate::llm::{BackendError, ChatMessage, ChatPayload, SharedChatBackend};
use crate::retouch::{
    decode_rgb, encode_png, grade_image, parse_adjustments, reply_requests_more_info,
    AdjustmentSet, GradingError,
};
use crate::skills::selector::apply_mode_command;
use crate::skills::{
    list_skills, AutoSelectStrategy, PromptComposer, SelectionRequest, SelectionSource, Skill,
    SkillRepositoryError, SkillSelector,
};

pub use conversation::{
    build_outbound_messages, ConversationHistory, SessionState, HISTORY_TURN_LIMIT,
};

pub const IMAGE_MARKER: &str = "[[IMAGE_ATTACHED]]";

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Empty message")]
    EmptyMessage,
    #[error("Invalid image data: {0}")]
    InvalidImageEncoding(#[source] base64::DecodeError),
    #[error("Invalid image data: {0}")]
    InvalidImage(#[source] GradingError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Repository(#[from] SkillRepositoryError),
    #[error("graded image could not be rendered: {0}")]
    Render(#[source] GradingError),
}

impl ChatError {
    /// Input problems the caller can fix.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::EmptyMessage | Self::InvalidImageEncoding(_) | Self::InvalidImage(_)
        )
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub skill: Option<String>,
    #[serde(default)]
    pub image_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub reply: String,
    pub skill: Option<String>,
    pub source: SelectionSource,
    pub adjustments: AdjustmentSet,
    pub image_base64: Option<String>,
}

/// Owns the process-wide conversation and routes each turn through skill
/// selection, prompt composition and the model backend.
pub struct ChatService {
    skills_root: PathBuf,
    backend: SharedChatBackend,
    locator: SharedCityLocator,
    model: String,
    strategy: AutoSelectStrategy,
    session: Mutex<SessionState>,
}

impl ChatService {
    pub fn new(
        skills_root: impl Into<PathBuf>,
        backend: SharedChatBackend,
        locator: SharedCityLocator,
        model: impl Into<String>,
        strategy: AutoSelectStrategy,
    ) -> Self {
        Self {
            skills_root: skills_root.into(),
            backend,
            locator,
            model: model.into(),
            strategy,
            session: Mutex::new(SessionState::default()),
        }
    }

    pub fn skills_root(&self) -> &Path {
        self.skills_root.as_path()
    }

    pub fn model(&self) -> &str {
        self.model.as_str()
    }

    pub fn list_skills(&self) -> Result<Vec<Skill>, ChatError> {
        Ok(list_skills(self.skills_root.as_path())?)
    }

    pub fn session_snapshot(&self) -> SessionState {
        self.lock_session().clone()
    }

    /// One full chat turn. Blocks on the backend; call from a blocking task.
    pub fn handle(&self, request: ChatRequest) -> Result<ChatReply, ChatError> {
        let request_id = Uuid::new_v4();
        let (user_text, image) = normalize_request(&request)?;

        let active_mode = {
            let mut session = self.lock_session();
            if let Some(command) = apply_mode_command(&mut session.active_mode, user_text.as_str()) {
                info!(%request_id, ?command, mode = ?session.active_mode, "chat mode toggled");
            }
            session.active_mode.clone()
        };

        let skills = self.list_skills()?;
        let (skill, source, system_prompt) = self.prepare_turn(
            skills.as_slice(),
            SelectionRequest {
                message: user_text.as_str(),
                override_name: request.skill.as_deref(),
                active_mode: active_mode.as_deref(),
            },
        );
        info!(
            %request_id,
            provider = self.backend.provider_name(),
            skill = skill.as_deref().unwrap_or("-"),
            source = source.as_str(),
            image = image.is_some(),
            "chat turn routed"
        );

        let history = self.lock_session().history.snapshot();
        let messages = build_outbound_messages(system_prompt, history, user_text.as_str());
        let reply = self
            .backend
            .send_chat(&ChatPayload::new(self.model.as_str(), messages))?;

        self.lock_session()
            .history
            .record_exchange(user_text.as_str(), reply.as_str());

        let (adjustments, image_base64) = match image {
            Some(image) if !reply_requests_more_info(reply.as_str()) => {
                let adjustments = parse_adjustments(reply.as_str());
                debug!(%request_id, keys = ?adjustments.present_keys(), "grading attached image");
                let graded = encode_png(&grade_image(&image, &adjustments)).map_err(ChatError::Render)?;
                (adjustments, Some(BASE64_STANDARD.encode(graded)))
            }
            Some(_) => {
                info!(%request_id, "reply asks for more information; image left untouched");
                (AdjustmentSet::default(), None)
            }
            None => (AdjustmentSet::default(), None),
        };

        Ok(ChatReply {
            reply,
            skill,
            source,
            adjustments,
            image_base64,
        })
    }

    /// Single exchange with no stored history and no sticky mode.
    pub fn ask_once(&self, message: &str, skill: Option<&str>) -> Result<ChatReply, ChatError> {
        let user_text = message.trim();
        if user_text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let skills = self.list_skills()?;
        let (skill, source, system_prompt) = self.prepare_turn(
            skills.as_slice(),
            SelectionRequest {
                message: user_text,
                override_name: skill,
                active_mode: None,
            },
        );
        let messages = vec![ChatMessage::system(system_prompt), ChatMessage::user(user_text)];
        let reply = self
            .backend
            .send_chat(&ChatPayload::new(self.model.as_str(), messages))?;
        Ok(ChatReply {
            reply,
            skill,
            source,
            adjustments: AdjustmentSet::default(),
            image_base64: None,
        })
    }

    fn prepare_turn(
        &self,
        skills: &[Skill],
        request: SelectionRequest<'_>,
    ) -> (Option<String>, SelectionSource, String) {
        let backend = self.backend.as_ref();
        let selection = SkillSelector::new(backend, self.model.as_str(), self.strategy)
            .select(skills, request);
        let system_prompt = PromptComposer::new(backend, self.locator.as_ref(), self.model.as_str())
            .compose(selection.skill, request.message);
        (
            selection.skill.map(|skill| skill.name.clone()),
            selection.source,
            system_prompt,
        )
    }

    fn lock_session(&self) -> MutexGuard<'_, SessionState> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Strips a data-URI prefix, decodes the image and tags the message. Runs
/// before any session state is touched.
fn normalize_request(request: &ChatRequest) -> Result<(String, Option<image::RgbImage>), ChatError> {
    let mut user_text = request.message.clone();
    let image = match request
        .image_data
        .as_deref()
        .map(str::trim)
        .filter(|data| !data.is_empty())
    {
        Some(data) => {
            let encoded = match data.strip_prefix("data:") {
                Some(rest) => rest.split_once(',').map_or(rest, |(_, payload)| payload),
                None => data,
            };
            let compact = encoded
                .chars()
                .filter(|ch| !ch.is_ascii_whitespace())
                .collect::<String>();
            let bytes = BASE64_STANDARD
                .decode(compact.as_bytes())
                .map_err(ChatError::InvalidImageEncoding)?;
            let image = decode_rgb(bytes.as_slice()).map_err(ChatError::InvalidImage)?;
            if !user_text.contains(IMAGE_MARKER) {
                user_text = format!("{user_text}\n{IMAGE_MARKER}");
            }
            Some(image)
        }
        None => None,
    };
    if user_text.trim().is_empty() {
        return Err(ChatError::EmptyMessage);
    }
    Ok((user_text, image))
}
