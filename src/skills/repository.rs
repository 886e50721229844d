use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

pub const SKILL_FILE_NAME: &str = "SKILL.md";
pub const REFERENCE_DIR_NAME: &str = "reference";
pub const MISSING_DESCRIPTION: &str = "无描述";

const FRONT_MATTER_FENCE: &str = "---";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillReference {
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skill {
    pub name: String,
    pub description: String,
    pub instructions: String,
    pub dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SkillDocument {
    pub metadata: BTreeMap<String, String>,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum SkillRepositoryError {
    #[error("failed to read skill path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SkillRepositoryError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Loads every skill directory under `root`, sorted by directory name.
/// Only `SKILL.md` is read; see [`collect_reference_files`] for the rest.
///
/// A missing root yields an empty list. Directories without a `SKILL.md`
/// are skipped.
pub fn list_skills(root: &Path) -> Result<Vec<Skill>, SkillRepositoryError> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let mut dirs = Vec::new();
    for entry in fs::read_dir(root).map_err(|e| SkillRepositoryError::io(root, e))? {
        let entry = entry.map_err(|e| SkillRepositoryError::io(root, e))?;
        let path = entry.path();
        if path.is_dir() && path.join(SKILL_FILE_NAME).is_file() {
            dirs.push((entry.file_name().to_string_lossy().to_string(), path));
        }
    }
    dirs.sort_by(|a, b| a.0.cmp(&b.0));

    dirs.into_iter()
        .map(|(dir_name, dir)| load_skill(dir_name.as_str(), dir))
        .collect()
}

fn load_skill(dir_name: &str, dir: PathBuf) -> Result<Skill, SkillRepositoryError> {
    let skill_file = dir.join(SKILL_FILE_NAME);
    let raw = read_trimmed(skill_file.as_path())?;
    let SkillDocument { mut metadata, body } = parse_skill_document(raw.as_str());

    Ok(Skill {
        name: metadata
            .remove("name")
            .unwrap_or_else(|| dir_name.to_string()),
        description: metadata
            .remove("description")
            .unwrap_or_else(|| String::from(MISSING_DESCRIPTION)),
        instructions: body,
        dir,
    })
}

/// Splits a skill definition into its `---` fenced `key: value` block and
/// the trimmed body. Without a closing fence everything after the opening
/// line is kept as body.
pub fn parse_skill_document(raw: &str) -> SkillDocument {
    let lines = raw.trim().lines().collect::<Vec<_>>();
    let mut metadata = BTreeMap::new();
    let mut body_start = 0usize;

    if lines.first().map(|line| line.trim()) == Some(FRONT_MATTER_FENCE) {
        body_start = 1;
        for (idx, line) in lines.iter().enumerate().skip(1) {
            let line = line.trim();
            if line == FRONT_MATTER_FENCE {
                body_start = idx + 1;
                break;
            }
            if let Some((key, value)) = line.split_once(':') {
                metadata.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
    }

    let body = lines
        .get(body_start..)
        .unwrap_or_default()
        .join("\n")
        .trim()
        .to_string();
    SkillDocument { metadata, body }
}

/// Text files under `<skill>/reference`, sorted by file name. Files that
/// cannot be read as UTF-8 text are skipped.
pub fn collect_reference_files(skill_dir: &Path) -> Vec<SkillReference> {
    let reference_dir = skill_dir.join(REFERENCE_DIR_NAME);
    if !reference_dir.is_dir() {
        return Vec::new();
    }

    let entries = match fs::read_dir(reference_dir.as_path()) {
        Ok(entries) => entries,
        Err(error) => {
            warn!(path = %reference_dir.display(), error = %error, "reference dir unreadable");
            return Vec::new();
        }
    };
    let mut files = entries
        .filter_map(Result::ok)
        .map(|entry| (entry.file_name().to_string_lossy().to_string(), entry.path()))
        .filter(|(_, path)| path.is_file())
        .collect::<Vec<_>>();
    files.sort_by(|a, b| a.0.cmp(&b.0));

    files
        .into_iter()
        .filter_map(|(file_name, path)| match read_trimmed(path.as_path()) {
            Ok(content) => Some(SkillReference {
                name: format!("{REFERENCE_DIR_NAME}/{file_name}"),
                content,
            }),
            Err(error) => {
                warn!(error = %error, "skipping reference file");
                None
            }
        })
        .collect()
}

fn read_trimmed(path: &Path) -> Result<String, SkillRepositoryError> {
    fs::read_to_string(path)
        .map(|raw| raw.trim().to_string())
        .map_err(|e| SkillRepositoryError::io(path, e))
}
