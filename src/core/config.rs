//! Data directory layout and `config.toml` settings.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{Error, Result};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "DATA_DIR";

const DEFAULT_DIMENSIONS: usize = 384;
const DEFAULT_SEARCH_LIMIT: usize = 10;
const DEFAULT_MAX_SEARCH_LIMIT: usize = 100;
const DEFAULT_NEIGHBORS: usize = 3;
const DEFAULT_MAX_NEIGHBORS: usize = 50;
const DEFAULT_GRAPH_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_AUTO_TAG_THRESHOLD: f32 = 0.45;
const DEFAULT_AUTO_TAG_MAX: usize = 5;
const DEFAULT_BIND: &str = "127.0.0.1:8080";

#[derive(Debug, Clone)]
pub struct DataPaths {
    pub root: PathBuf,
    pub db: PathBuf,
    pub config: PathBuf,
    pub models: PathBuf,
}

impl DataPaths {
    /// Resolve the data directory: explicit override, then `DATA_DIR`, then `./data`.
    pub fn resolve(override_dir: Option<&Path>) -> Self {
        let root = match override_dir {
            Some(dir) => dir.to_path_buf(),
            None => std::env::var_os(DATA_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data")),
        };
        Self::from_root(root)
    }

    pub fn from_root(root: PathBuf) -> Self {
        Self {
            db: root.join("db.sqlite"),
            config: root.join("config.toml"),
            models: root.join("models"),
            root,
        }
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        fs::create_dir_all(&self.models)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    Harmonic,
    Fastembed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub backend: EmbeddingBackend,
    /// Model name, only read by the `fastembed` backend.
    pub model: String,
    pub dimensions: usize,
    #[serde(skip)]
    pub cache_dir: Option<PathBuf>,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Harmonic,
            model: "all-MiniLM-L6-v2".to_string(),
            dimensions: DEFAULT_DIMENSIONS,
            cache_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_SEARCH_LIMIT,
            max_limit: DEFAULT_MAX_SEARCH_LIMIT,
        }
    }
}

impl SearchSettings {
    /// Apply the default for a missing or zero limit and clamp to `max_limit`.
    pub fn clamp_limit(&self, requested: Option<usize>) -> usize {
        match requested {
            Some(0) | None => self.default_limit,
            Some(n) => n,
        }
        .min(self.max_limit)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphSettings {
    pub neighbors_per_node: usize,
    pub max_neighbors: usize,
    pub timeout_ms: u64,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            neighbors_per_node: DEFAULT_NEIGHBORS,
            max_neighbors: DEFAULT_MAX_NEIGHBORS,
            timeout_ms: DEFAULT_GRAPH_TIMEOUT_MS,
        }
    }
}

impl GraphSettings {
    pub fn clamp_neighbors(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.neighbors_per_node)
            .min(self.max_neighbors)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoTagSettings {
    pub threshold: f32,
    pub max_tags: usize,
    /// Tags too common to be useful as centroids.
    pub skip: BTreeSet<String>,
}

impl Default for AutoTagSettings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_AUTO_TAG_THRESHOLD,
            max_tags: DEFAULT_AUTO_TAG_MAX,
            skip: ["conversation", "context"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub embedding: EmbeddingSettings,
    pub search: SearchSettings,
    pub graph: GraphSettings,
    pub auto_tag: AutoTagSettings,
    pub server: ServerSettings,
}

impl Settings {
    /// Load `config.toml` from the data directory, falling back to defaults
    /// when the file does not exist.
    pub fn load(paths: &DataPaths) -> Result<Self> {
        let mut settings = if paths.config.exists() {
            let raw = fs::read_to_string(&paths.config)?;
            toml::from_str::<Settings>(&raw).map_err(|e| Error::Config {
                path: paths.config.clone(),
                message: e.to_string(),
            })?
        } else {
            Settings::default()
        };

        settings.embedding.cache_dir = Some(paths.models.clone());
        settings.validate(&paths.config)?;
        Ok(settings)
    }

    pub fn validate(&self, path: &Path) -> Result<()> {
        let fail = |message: &str| Error::Config {
            path: path.to_path_buf(),
            message: message.to_string(),
        };

        if self.embedding.dimensions == 0 || self.embedding.dimensions % 2 != 0 {
            return Err(fail("embedding.dimensions must be a positive even number"));
        }
        if self.search.default_limit == 0 || self.search.max_limit == 0 {
            return Err(fail("search limits must be greater than zero"));
        }
        if self.graph.timeout_ms == 0 {
            return Err(fail("graph.timeout_ms must be greater than zero"));
        }
        if !(-1.0..=1.0).contains(&self.auto_tag.threshold) {
            return Err(fail("auto_tag.threshold must be within [-1, 1]"));
        }

        Ok(())
    }
}
