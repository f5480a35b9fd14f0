// Configuration management for pkgraph

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const CONFIG_FILE: &str = ".pkgraph.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub project: ProjectConfig,
    pub indexing: IndexingConfig,
    pub agent: AgentConfig,
    pub heal: HealConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    /// Directory names skipped by the walker and the watcher
    pub exclude: Vec<String>,
    pub watch: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// First configured of Azure, Anthropic, OpenAI, then the backend key
    Auto,
    Azure,
    Anthropic,
    OpenAi,
    Backend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub openai_base_url: String,
    pub openai_api_key_env: String,
    pub anthropic_base_url: String,
    pub anthropic_api_key_env: String,
    pub anthropic_model: String,
    pub backend_url: String,
    pub backend_api_key_env: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HealConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    /// Also append logs to .pkgraph/logs/cli.log
    pub file: bool,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: "unnamed-project".to_string(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            exclude: [".git", ".hg", ".svn", "node_modules", "target", "__pycache__", ".venv", ".pkgraph"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            watch: false,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Auto,
            model: "gpt-4o-mini".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            openai_api_key_env: "OPENAI_API_KEY".to_string(),
            anthropic_base_url: "https://api.anthropic.com/v1".to_string(),
            anthropic_api_key_env: "ANTHROPIC_API_KEY".to_string(),
            anthropic_model: "claude-3-5-sonnet-latest".to_string(),
            backend_url: "https://api.aerocall.ai".to_string(),
            backend_api_key_env: "PKGRAPH_API_KEY".to_string(),
            request_timeout_secs: 120,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: "compact".to_string(),
            file: false,
        }
    }
}

impl Config {
    /// Parse and validate a TOML config file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        Ok(config)
    }

    /// Configuration for a project, defaults when `.pkgraph.toml` is absent.
    ///
    /// Runs before logging is set up, so a file that fails to load is handed
    /// back next to the defaults for the caller to report.
    pub fn from_project_dir<P: AsRef<Path>>(project_dir: P) -> (Self, Option<anyhow::Error>) {
        let config_path = project_dir.as_ref().join(CONFIG_FILE);
        if !config_path.exists() {
            return (Self::default(), None);
        }

        match Self::from_file(&config_path) {
            Ok(config) => (config, None),
            Err(e) => (Self::default(), Some(e)),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.project.name.is_empty() {
            return Err(anyhow::anyhow!("Project name cannot be empty"));
        }

        if self.indexing.exclude.iter().any(|e| e.is_empty() || e.contains('/')) {
            return Err(anyhow::anyhow!("Exclude entries must be plain directory names"));
        }

        if self.agent.model.is_empty() || self.agent.anthropic_model.is_empty() {
            return Err(anyhow::anyhow!("Agent model cannot be empty"));
        }
        if self.agent.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Request timeout must be greater than 0"));
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!("Invalid log level: {}", self.logging.level));
        }
        let valid_formats = ["compact", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(anyhow::anyhow!("Invalid log format: {}", self.logging.format));
        }

        Ok(())
    }
}
