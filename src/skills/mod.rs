pub mod prompt;
pub mod repository;
pub mod selector;

pub use prompt::{build_system_prompt, PromptComposer, BASE_PERSONA};
pub use repository::{list_skills, Skill, SkillReference, SkillRepositoryError};
pub use selector::{AutoSelectStrategy, Selection, SelectionRequest, SelectionSource, SkillSelector};
