use tracing::{debug, warn};

use crate::llm::{BackendError, ChatBackend, ChatMessage, ChatPayload};
use crate::skills::Skill;

pub const AUTO_SKILL_SENTINEL: &str = "auto";
pub const BOYFRIEND_SKILL_NAME: &str = "boyfriend-mode";
pub const MODE_ON_PHRASES: [&str; 2] = ["开启男友模式", "男友模式"];
pub const MODE_OFF_PHRASES: [&str; 3] = ["结束男友模式", "终止男友模式", "结束"];

const SELECTOR_SYSTEM_PROMPT: &str = "只输出技能名称或 NONE，不要其他文字。";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeCommand {
    On,
    Off,
}

/// Exact match against the trimmed message; substrings never toggle.
pub fn detect_mode_command(text: &str) -> Option<ModeCommand> {
    let normalized = text.trim();
    if MODE_ON_PHRASES.contains(&normalized) {
        return Some(ModeCommand::On);
    }
    if MODE_OFF_PHRASES.contains(&normalized) {
        return Some(ModeCommand::Off);
    }
    None
}

/// Applies a mode toggle found in `text` and returns the command, if any.
pub fn apply_mode_command(active_mode: &mut Option<String>, text: &str) -> Option<ModeCommand> {
    let command = detect_mode_command(text)?;
    match command {
        ModeCommand::On => *active_mode = Some(String::from(BOYFRIEND_SKILL_NAME)),
        ModeCommand::Off => *active_mode = None,
    }
    Some(command)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoSelectStrategy {
    #[default]
    Model,
    Keyword,
}

impl AutoSelectStrategy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "model" => Some(Self::Model),
            "keyword" | "keywords" => Some(Self::Keyword),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionSource {
    Override,
    Mode,
    AutoModel,
    AutoKeyword,
    Unmatched,
}

impl SelectionSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Override => "override",
            Self::Mode => "mode",
            Self::AutoModel => "auto_model",
            Self::AutoKeyword => "auto_keyword",
            Self::Unmatched => "unmatched",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection<'a> {
    pub skill: Option<&'a Skill>,
    pub source: SelectionSource,
}

impl<'a> Selection<'a> {
    fn found(skill: &'a Skill, source: SelectionSource) -> Self {
        Self {
            skill: Some(skill),
            source,
        }
    }

    fn none(source: SelectionSource) -> Self {
        Self {
            skill: None,
            source,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SelectionRequest<'a> {
    pub message: &'a str,
    pub override_name: Option<&'a str>,
    pub active_mode: Option<&'a str>,
}

pub struct SkillSelector<'a> {
    backend: &'a dyn ChatBackend,
    model: &'a str,
    strategy: AutoSelectStrategy,
}

impl<'a> SkillSelector<'a> {
    pub fn new(backend: &'a dyn ChatBackend, model: &'a str, strategy: AutoSelectStrategy) -> Self {
        Self {
            backend,
            model,
            strategy,
        }
    }

    /// Override, then sticky mode, then the auto strategy. A failed model
    /// round-trip selects nothing.
    pub fn select<'s>(&self, skills: &'s [Skill], request: SelectionRequest<'_>) -> Selection<'s> {
        if let Some(name) = request
            .override_name
            .map(str::trim)
            .filter(|name| !name.is_empty() && *name != AUTO_SKILL_SENTINEL)
        {
            if let Some(skill) = find_skill(skills, name) {
                return Selection::found(skill, SelectionSource::Override);
            }
            debug!(skill = name, "requested skill is unknown, falling through");
        }

        if let Some(mode) = request.active_mode {
            if let Some(skill) = find_skill(skills, mode) {
                return Selection::found(skill, SelectionSource::Mode);
            }
            debug!(mode, "active mode has no matching skill, falling through");
        }

        match self.strategy {
            AutoSelectStrategy::Keyword => choose_skill_by_keywords(skills, request.message)
                .map(|skill| Selection::found(skill, SelectionSource::AutoKeyword))
                .unwrap_or_else(|| Selection::none(SelectionSource::Unmatched)),
            AutoSelectStrategy::Model => {
                match choose_skill_by_model(self.backend, self.model, skills, request.message) {
                    Ok(Some(skill)) => Selection::found(skill, SelectionSource::AutoModel),
                    Ok(None) => Selection::none(SelectionSource::Unmatched),
                    Err(error) => {
                        warn!(error = %error, "model skill selection failed; continuing without a skill");
                        Selection::none(SelectionSource::Unmatched)
                    }
                }
            }
        }
    }
}

pub fn find_skill<'s>(skills: &'s [Skill], name: &str) -> Option<&'s Skill> {
    skills.iter().find(|skill| skill.name == name)
}

pub fn choose_skill_by_model<'s>(
    backend: &dyn ChatBackend,
    model: &str,
    skills: &'s [Skill],
    user_text: &str,
) -> Result<Option<&'s Skill>, BackendError> {
    if skills.is_empty() {
        return Ok(None);
    }

    let payload = ChatPayload::new(
        model,
        vec![
            ChatMessage::system(SELECTOR_SYSTEM_PROMPT),
            ChatMessage::user(selector_prompt(skills, user_text)),
        ],
    );
    let raw = backend.send_chat(&payload)?;
    let Some(choice) = sanitize_skill_choice(raw.as_str()) else {
        return Ok(None);
    };
    Ok(find_skill(skills, choice.as_str()))
}

fn selector_prompt(skills: &[Skill], user_text: &str) -> String {
    let options = skills
        .iter()
        .map(|skill| format!("- {}: {}", skill.name, skill.description))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "你是一个技能选择器。根据用户需求，只输出一个技能名称，如果没有合适技能，输出 NONE。\n\n可选技能列表：\n{options}\n\n用户输入：{user_text}"
    )
}

/// Keeps `[A-Za-z0-9_-]` only. Empty output or `NONE` means no choice.
pub fn sanitize_skill_choice(raw: &str) -> Option<String> {
    let cleaned = raw
        .trim()
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '_' || *ch == '-')
        .collect::<String>();
    if cleaned.is_empty() || cleaned.eq_ignore_ascii_case("none") {
        return None;
    }
    Some(cleaned)
}

pub fn score_skill(skill: &Skill, user_text: &str) -> usize {
    let name = skill.name.to_lowercase();
    let description = skill.description.to_lowercase();
    let text = user_text.to_lowercase();

    let mut score = 0;
    if text.contains(name.as_str()) {
        score += 4;
    }
    if text.contains(description.as_str()) {
        score += 3;
    }

    let joined = format!("{name} {description}");
    score += joined
        .split(|ch: char| !(ch.is_ascii_lowercase() || ch.is_ascii_digit() || is_cjk(ch)))
        .filter(|token| token.chars().count() >= 2)
        .filter(|token| text.contains(token))
        .count();
    score
}

/// Highest positive score wins; ties keep the earlier skill.
pub fn choose_skill_by_keywords<'s>(skills: &'s [Skill], user_text: &str) -> Option<&'s Skill> {
    let mut best = None;
    let mut best_score = 0;
    for skill in skills {
        let score = score_skill(skill, user_text);
        if score > best_score {
            best = Some(skill);
            best_score = score;
        }
    }
    best
}

pub(crate) fn is_cjk(ch: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&ch)
}
