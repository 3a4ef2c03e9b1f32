// Runtime configuration, loaded from a TOML file.

use crate::batch::ErrorPolicy;
use crate::reconciliation::DEFAULT_SOLD_LIMIT;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory the upstream feed drops XML documents into.
    pub feed_dir: PathBuf,

    /// Processed documents are moved here.
    pub history_dir: PathBuf,

    /// SQLite file holding the current/sold collections.
    pub db_path: PathBuf,

    /// Local checkout of the site repository the JSON publishes to.
    pub git_path: PathBuf,

    /// Only listings handled by this agent are tracked.
    pub agent_name: String,

    #[serde(default = "default_sold_limit")]
    pub sold_limit: usize,

    #[serde(default)]
    pub error_policy: ErrorPolicy,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_hook: Option<BuildHookConfig>,
}

/// Site rebuild endpoint, pinged after a successful publish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildHookConfig {
    pub url: String,
    pub username: String,
    pub password: String,
}

fn default_sold_limit() -> usize {
    DEFAULT_SOLD_LIMIT
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }
}

// ============================================================================
// TESTS
// ============================================================================
