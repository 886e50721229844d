use std::collections::HashMap;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::llm::geo::{DisabledLocator, IpInfoLocator, SharedCityLocator, DEFAULT_GEOLOCATION_URL};
use crate::llm::{
    parse_ollama_options, DeepSeekBackend, OllamaBackend, OllamaOptions, SharedChatBackend,
};
use crate::skills::AutoSelectStrategy;

pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "deepseek-r1:7b";
pub const DEFAULT_DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEFAULT_DEEPSEEK_MODEL: &str = "deepseek-chat";
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";
pub const DEFAULT_SERVER_PORT: u16 = 8000;
pub const DEFAULT_MANAGER_PORT: u16 = 8010;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unknown LLM_PROVIDER '{0}' (expected ollama or deepseek)")]
    UnknownProvider(String),
    #[error("DEEPSEEK_API_KEY is required when LLM_PROVIDER=deepseek")]
    MissingApiKey,
    #[error("{key} is not a valid URL ({value}): {source}")]
    InvalidUrl {
        key: &'static str,
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("{key} must be a non-negative integer, got '{value}'")]
    InvalidNumber { key: &'static str, value: String },
    #[error("SERVER_HOST is not a valid address: '{0}'")]
    InvalidHost(String),
    #[error("SKILLCHAT_AUTO_SELECT must be model or keyword, got '{0}'")]
    InvalidAutoSelect(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Ollama,
    DeepSeek,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::DeepSeek => "deepseek",
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub ollama_host: String,
    pub ollama_model: String,
    pub ollama_vision_model: Option<String>,
    /// Merged into Ollama requests only.
    pub ollama_options: OllamaOptions,
    pub deepseek_base_url: String,
    pub deepseek_api_key: Option<String>,
    pub deepseek_model: String,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("ollama_host", &self.ollama_host)
            .field("ollama_model", &self.ollama_model)
            .field("ollama_vision_model", &self.ollama_vision_model)
            .field("ollama_options", &self.ollama_options)
            .field("deepseek_base_url", &self.deepseek_base_url)
            .field("deepseek_api_key", &self.masked_api_key())
            .field("deepseek_model", &self.deepseek_model)
            .finish()
    }
}

impl ProviderConfig {
    pub fn chat_model(&self) -> &str {
        match self.kind {
            ProviderKind::Ollama => self.ollama_model.as_str(),
            ProviderKind::DeepSeek => self.deepseek_model.as_str(),
        }
    }

    /// Image classification only runs against a local Ollama model.
    pub fn vision_model(&self) -> Option<String> {
        match self.kind {
            ProviderKind::Ollama => Some(
                self.ollama_vision_model
                    .clone()
                    .unwrap_or_else(|| self.ollama_model.clone()),
            ),
            ProviderKind::DeepSeek => None,
        }
    }

    pub fn endpoint(&self) -> &str {
        match self.kind {
            ProviderKind::Ollama => self.ollama_host.as_str(),
            ProviderKind::DeepSeek => self.deepseek_base_url.as_str(),
        }
    }

    pub fn masked_api_key(&self) -> String {
        match self.deepseek_api_key.as_deref() {
            None => String::from("<unset>"),
            Some(key) if key.chars().count() <= 8 => String::from("****"),
            Some(key) => {
                let head = key.chars().take(4).collect::<String>();
                format!("{head}****")
            }
        }
    }

    pub fn build_backend(&self) -> SharedChatBackend {
        match self.kind {
            ProviderKind::Ollama => Arc::new(
                OllamaBackend::new(self.ollama_host.clone()).with_options(self.ollama_options.clone()),
            ),
            ProviderKind::DeepSeek => Arc::new(DeepSeekBackend::new(
                self.deepseek_base_url.clone(),
                self.deepseek_api_key.clone().unwrap_or_default(),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub app_root: PathBuf,
    pub provider: ProviderConfig,
    pub bind: SocketAddr,
    pub skills_dir: PathBuf,
    pub frontend_dir: PathBuf,
    pub idle_timeout: Option<Duration>,
    pub auto_select: AutoSelectStrategy,
    pub geolocation_url: Option<String>,
    pub manager_port: u16,
}

impl AppConfig {
    /// Process environment first, then the first `.env` found in the
    /// working directory or `app_root`.
    pub fn from_env(app_root: &Path) -> Result<Self, ConfigError> {
        let dotenv = load_dotenv_map(app_root)?;
        Self::from_lookup(app_root, |key| {
            std::env::var(key).ok().or_else(|| dotenv.get(key).cloned())
        })
    }

    pub fn from_lookup(
        app_root: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let deepseek_api_key = get("DEEPSEEK_API_KEY");
        let kind = match get("LLM_PROVIDER").map(|value| value.to_ascii_lowercase()) {
            None if deepseek_api_key.is_some() => ProviderKind::DeepSeek,
            None => ProviderKind::Ollama,
            Some(value) if value == "ollama" => ProviderKind::Ollama,
            Some(value) if value == "deepseek" => ProviderKind::DeepSeek,
            Some(other) => return Err(ConfigError::UnknownProvider(other)),
        };
        if kind == ProviderKind::DeepSeek && deepseek_api_key.is_none() {
            return Err(ConfigError::MissingApiKey);
        }

        let provider = ProviderConfig {
            kind,
            ollama_host: validated_url(
                "OLLAMA_HOST",
                get("OLLAMA_HOST").unwrap_or_else(|| DEFAULT_OLLAMA_HOST.to_string()),
            )?,
            ollama_model: get("OLLAMA_MODEL").unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string()),
            ollama_vision_model: get("OLLAMA_VISION_MODEL"),
            ollama_options: match kind {
                ProviderKind::Ollama => get("OLLAMA_OPTIONS")
                    .map(|raw| parse_ollama_options(raw.as_str()))
                    .unwrap_or_default(),
                ProviderKind::DeepSeek => OllamaOptions::new(),
            },
            deepseek_base_url: validated_url(
                "DEEPSEEK_BASE_URL",
                get("DEEPSEEK_BASE_URL").unwrap_or_else(|| DEFAULT_DEEPSEEK_BASE_URL.to_string()),
            )?,
            deepseek_api_key,
            deepseek_model: get("DEEPSEEK_MODEL")
                .unwrap_or_else(|| DEFAULT_DEEPSEEK_MODEL.to_string()),
        };

        let host = get("SERVER_HOST").unwrap_or_else(|| DEFAULT_SERVER_HOST.to_string());
        let port = parse_port("SKILLCHAT_PORT", get("SKILLCHAT_PORT"), DEFAULT_SERVER_PORT)?;
        let bind = SocketAddr::new(parse_host(host.as_str())?, port);

        let idle_secs = match get("SKILLCHAT_IDLE_TIMEOUT_SECS") {
            Some(value) => value.parse::<u64>().map_err(|_| ConfigError::InvalidNumber {
                key: "SKILLCHAT_IDLE_TIMEOUT_SECS",
                value,
            })?,
            None => DEFAULT_IDLE_TIMEOUT_SECS,
        };

        let auto_select = match get("SKILLCHAT_AUTO_SELECT") {
            Some(value) => AutoSelectStrategy::parse(value.as_str())
                .ok_or(ConfigError::InvalidAutoSelect(value))?,
            None => AutoSelectStrategy::default(),
        };

        // Present but empty disables the lookup; absent uses the default.
        let geolocation_url = match lookup("SKILLCHAT_GEOLOCATION_URL") {
            Some(value) if value.trim().is_empty() => None,
            Some(value) => Some(validated_url(
                "SKILLCHAT_GEOLOCATION_URL",
                value.trim().to_string(),
            )?),
            None => Some(DEFAULT_GEOLOCATION_URL.to_string()),
        };

        Ok(Self {
            app_root: app_root.to_path_buf(),
            provider,
            bind,
            skills_dir: get("SKILLCHAT_SKILLS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| app_root.join("skills")),
            frontend_dir: get("SKILLCHAT_FRONTEND_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| app_root.join("frontend")),
            idle_timeout: (idle_secs > 0).then(|| Duration::from_secs(idle_secs)),
            auto_select,
            geolocation_url,
            manager_port: parse_port(
                "SKILLCHAT_MANAGER_PORT",
                get("SKILLCHAT_MANAGER_PORT"),
                DEFAULT_MANAGER_PORT,
            )?,
        })
    }

    pub fn build_backend(&self) -> SharedChatBackend {
        self.provider.build_backend()
    }

    pub fn build_locator(&self) -> SharedCityLocator {
        match self.geolocation_url.as_deref() {
            Some(url) => Arc::new(IpInfoLocator::new(url)),
            None => Arc::new(DisabledLocator),
        }
    }

    pub fn log_summary(&self) {
        info!(
            provider = self.provider.kind.as_str(),
            model = self.provider.chat_model(),
            endpoint = self.provider.endpoint(),
            api_key = %self.provider.masked_api_key(),
            bind = %self.bind,
            skills_dir = %self.skills_dir.display(),
            "resolved configuration"
        );
    }
}

fn validated_url(key: &'static str, value: String) -> Result<String, ConfigError> {
    match Url::parse(value.as_str()) {
        Ok(_) => Ok(value.trim_end_matches('/').to_string()),
        Err(source) => Err(ConfigError::InvalidUrl { key, value, source }),
    }
}

fn parse_port(key: &'static str, value: Option<String>, default: u16) -> Result<u16, ConfigError> {
    match value {
        Some(value) => value
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidNumber { key, value }),
        None => Ok(default),
    }
}

fn parse_host(host: &str) -> Result<IpAddr, ConfigError> {
    if host.eq_ignore_ascii_case("localhost") {
        return Ok(IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
    host.parse::<IpAddr>()
        .map_err(|_| ConfigError::InvalidHost(host.to_string()))
}

pub fn load_dotenv_map(app_root: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let candidates = [PathBuf::from(".env"), app_root.join(".env")];
    let Some(path) = candidates.into_iter().find(|path| path.is_file()) else {
        return Ok(HashMap::new());
    };
    let raw = fs::read_to_string(path.as_path()).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(parse_dotenv_content(raw.as_str()))
}

pub fn parse_dotenv_content(raw: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in raw.lines() {
        let mut value = line.trim();
        if value.is_empty() || value.starts_with('#') {
            continue;
        }
        if let Some(rest) = value.strip_prefix("export ") {
            value = rest.trim_start();
        }
        let Some((key_raw, value_raw)) = value.split_once('=') else {
            continue;
        };
        let key = key_raw.trim();
        if key.is_empty() {
            continue;
        }
        let mut parsed = value_raw.trim().to_string();
        if parsed.len() >= 2
            && ((parsed.starts_with('"') && parsed.ends_with('"'))
                || (parsed.starts_with('\'') && parsed.ends_with('\'')))
        {
            parsed = parsed[1..parsed.len() - 1].to_string();
        } else if let Some((before_comment, _)) = parsed.split_once(" #") {
            parsed = before_comment.trim_end().to_string();
        }
        out.insert(key.to_string(), parsed);
    }
    out
}
