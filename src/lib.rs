pub mod api;
pub mod chat;
pub mod config;
pub mod llm;
pub mod manager;
pub mod retouch;
pub mod skills;

use std::path::PathBuf;

/// Working directory, falling back to the crate root when it is unreadable.
pub fn default_app_root() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from(env!("CARGO_MANIFEST_DIR")))
}
