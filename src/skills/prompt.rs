use tracing::{debug, warn};

use crate::llm::geo::CityLocator;
use crate::llm::{ChatBackend, ChatMessage, ChatPayload};
use crate::skills::selector::is_cjk;
use crate::skills::repository::collect_reference_files;
use crate::skills::{Skill, SkillReference};

pub const BASE_PERSONA: &str = "你是一个助手。回答要清晰、分步骤。";
pub const SKILL_LABEL: &str = "以下是技能指令（SKILL.md）：";
pub const REFERENCE_LABEL: &str = "以下是参考资料：";
pub const WEATHER_SKILL_NAME: &str = "weather";
pub const CITY_PLACEHOLDER: &str = "当前位置";

const CITY_SYSTEM_PROMPT: &str = "只输出城市名或 NONE。";

/// Where the city appended for the weather skill came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CitySource {
    Model,
    Geolocation,
    Placeholder,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCity {
    pub name: String,
    pub source: CitySource,
}

pub fn build_system_prompt(skill: &Skill, references: &[SkillReference]) -> String {
    let mut parts = vec![
        BASE_PERSONA.to_string(),
        SKILL_LABEL.to_string(),
        skill.instructions.clone(),
    ];
    if !references.is_empty() {
        parts.push(REFERENCE_LABEL.to_string());
        parts.extend(
            references
                .iter()
                .map(|reference| format!("### {}\n{}", reference.name, reference.content)),
        );
    }
    parts.join("\n\n")
}

pub struct PromptComposer<'a> {
    backend: &'a dyn ChatBackend,
    locator: &'a dyn CityLocator,
    model: &'a str,
}

impl<'a> PromptComposer<'a> {
    pub fn new(backend: &'a dyn ChatBackend, locator: &'a dyn CityLocator, model: &'a str) -> Self {
        Self {
            backend,
            locator,
            model,
        }
    }

    /// System prompt for one turn. Never fails: city lookups degrade to the
    /// placeholder.
    pub fn compose(&self, skill: Option<&Skill>, user_text: &str) -> String {
        let Some(skill) = skill else {
            return BASE_PERSONA.to_string();
        };

        let references = collect_reference_files(skill.dir.as_path());
        let mut prompt = build_system_prompt(skill, references.as_slice());
        if skill.name == WEATHER_SKILL_NAME {
            let city = self.resolve_city(user_text);
            debug!(city = %city.name, source = ?city.source, "resolved weather city");
            prompt.push_str(city_directive(city.name.as_str()).as_str());
        }
        prompt
    }

    pub fn resolve_city(&self, user_text: &str) -> ResolvedCity {
        if let Some(name) = self.extract_city_by_model(user_text) {
            return ResolvedCity {
                name,
                source: CitySource::Model,
            };
        }

        match self.locator.locate_city() {
            Ok(Some(name)) => ResolvedCity {
                name,
                source: CitySource::Geolocation,
            },
            Ok(None) => placeholder_city(),
            Err(error) => {
                warn!(error = %error, "geolocation lookup failed; using placeholder city");
                placeholder_city()
            }
        }
    }

    fn extract_city_by_model(&self, user_text: &str) -> Option<String> {
        let payload = ChatPayload::new(
            self.model,
            vec![
                ChatMessage::system(CITY_SYSTEM_PROMPT),
                ChatMessage::user(format!(
                    "从用户输入中提取城市名，只输出城市名或 NONE。不要输出其它文字。\n\n用户输入：{user_text}"
                )),
            ],
        );
        match self.backend.send_chat(&payload) {
            Ok(raw) => sanitize_city(raw.as_str()),
            Err(error) => {
                warn!(error = %error, "city extraction failed");
                None
            }
        }
    }
}

fn placeholder_city() -> ResolvedCity {
    ResolvedCity {
        name: CITY_PLACEHOLDER.to_string(),
        source: CitySource::Placeholder,
    }
}

pub fn city_directive(city: &str) -> String {
    format!("\n\n[系统提示] 如果用户未指定城市，请使用解析到的城市：{city}。")
}

/// Keeps ASCII letters and digits, CJK ideographs and `-`.
pub fn sanitize_city(raw: &str) -> Option<String> {
    let cleaned = raw
        .trim()
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || is_cjk(*ch) || *ch == '-')
        .collect::<String>();
    if cleaned.is_empty() || cleaned.eq_ignore_ascii_case("none") {
        return None;
    }
    Some(cleaned)
}
