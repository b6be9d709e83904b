pub mod backfill;
pub mod delete;
pub mod get;
pub mod graph;
pub mod init;
pub mod list;
pub mod search;
#[cfg(feature = "web")]
pub mod serve;
pub mod status;
pub mod store;
pub mod suggest_tags;

use std::sync::Arc;

use anyhow::{Context as _, Result};

use notegraph_mcp::search::embedding::{self, Encoder};
use notegraph_mcp::{DataPaths, KnowledgeBase, Settings};

/// Resolved data directory and settings shared by every command.
pub struct Context {
    pub paths: DataPaths,
    pub settings: Settings,
}

impl Context {
    pub fn load(paths: DataPaths) -> Result<Self> {
        let settings = Settings::load(&paths)
            .with_context(|| format!("Failed to load settings from {}", paths.config.display()))?;
        Ok(Self { paths, settings })
    }

    pub fn open(&self) -> Result<KnowledgeBase> {
        let encoder: Arc<dyn Encoder> = embedding::global(&self.settings.embedding);
        KnowledgeBase::open(&self.paths, self.settings.clone(), encoder)
            .with_context(|| format!("Failed to open {}", self.paths.db.display()))
    }
}

/// Print `value` as pretty JSON on stdout.
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Truncate for one-line display (char-aware).
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        format!("{}...", text.chars().take(max).collect::<String>())
    } else {
        text.to_string()
    }
}
