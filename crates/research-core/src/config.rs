use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use tokio::sync::Semaphore;

use crate::ResearchError;
use crate::capability::SearchTopic;

const DEFAULT_CONFIG_PATH: &str = "config.toml";
const CONFIG_PATH_ENV: &str = "RESEARCH_CONFIG";

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub research: RunConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Helper to load configuration with guard rails.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a provided path or discoverable defaults.
    ///
    /// Resolution order:
    /// 1. Explicit `path` argument.
    /// 2. `RESEARCH_CONFIG` environment variable.
    /// 3. `config.toml` in the current working directory, falling back to built-in
    ///    defaults when that file does not exist.
    pub fn load(path: Option<PathBuf>) -> Result<Config, ResearchError> {
        let (candidate, explicit) = resolve_path(path);
        if !explicit && !candidate.exists() {
            tracing::debug!(path = %candidate.display(), "no config file found; using defaults");
            return Ok(Config::default());
        }

        let raw = fs::read_to_string(&candidate)
            .map_err(|err| ResearchError::config_io(candidate.clone(), err))?;
        Self::from_toml(&raw)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(raw: &str) -> Result<Config, ResearchError> {
        let config: Config = toml::from_str(raw)
            .map_err(|err| ResearchError::InvalidConfiguration(err.to_string()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn validate(config: &Config) -> Result<(), ResearchError> {
        config.research.validate()?;
        if config.search.max_results == 0 {
            return Err(ResearchError::InvalidConfiguration(
                "search.max_results must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn resolve_path(path: Option<PathBuf>) -> (PathBuf, bool) {
    if let Some(path) = path {
        return (path, true);
    }

    if let Ok(from_env) = env::var(CONFIG_PATH_ENV) {
        if !from_env.trim().is_empty() {
            return (PathBuf::from(from_env), true);
        }
    }

    (Path::new(DEFAULT_CONFIG_PATH).to_path_buf(), false)
}

/// Caps governing one run of the research pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// Maximum supervisor delegation rounds.
    #[serde(default = "RunConfig::default_max_rounds")]
    pub max_rounds: u32,
    /// Total tool-call budget shared by every worker of the run.
    #[serde(default = "RunConfig::default_max_tool_calls")]
    pub max_tool_calls: u32,
    /// Maximum decisions a single worker makes before it is forced to conclude.
    #[serde(default = "RunConfig::default_max_worker_iterations")]
    pub max_worker_iterations: u32,
    /// Maximum tool calls a single worker may spend.
    #[serde(default = "RunConfig::default_max_worker_tool_calls")]
    pub max_worker_tool_calls: u32,
    /// Maximum workers executing at once within a round.
    #[serde(default = "RunConfig::default_max_concurrent_workers")]
    pub max_concurrent_workers: usize,
    #[serde(default)]
    pub run_timeout_secs: Option<u64>,
}

impl RunConfig {
    const fn default_max_rounds() -> u32 {
        3
    }

    const fn default_max_tool_calls() -> u32 {
        30
    }

    const fn default_max_worker_iterations() -> u32 {
        6
    }

    const fn default_max_worker_tool_calls() -> u32 {
        8
    }

    const fn default_max_concurrent_workers() -> usize {
        3
    }

    pub fn validate(&self) -> Result<(), ResearchError> {
        let caps = [
            ("max_rounds", self.max_rounds as u64),
            ("max_tool_calls", self.max_tool_calls as u64),
            ("max_worker_iterations", self.max_worker_iterations as u64),
            ("max_worker_tool_calls", self.max_worker_tool_calls as u64),
            ("max_concurrent_workers", self.max_concurrent_workers as u64),
        ];
        for (name, value) in caps {
            if value == 0 {
                return Err(ResearchError::InvalidConfiguration(format!(
                    "research.{name} must be at least 1"
                )));
            }
        }
        if self.max_concurrent_workers > Semaphore::MAX_PERMITS {
            return Err(ResearchError::InvalidConfiguration(format!(
                "research.max_concurrent_workers must not exceed {}",
                Semaphore::MAX_PERMITS
            )));
        }
        if self.run_timeout_secs == Some(0) {
            return Err(ResearchError::InvalidConfiguration(
                "research.run_timeout_secs must be positive when set".into(),
            ));
        }
        Ok(())
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_rounds: Self::default_max_rounds(),
            max_tool_calls: Self::default_max_tool_calls(),
            max_worker_iterations: Self::default_max_worker_iterations(),
            max_worker_tool_calls: Self::default_max_worker_tool_calls(),
            max_concurrent_workers: Self::default_max_concurrent_workers(),
            run_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "SearchConfig::default_max_results")]
    pub max_results: usize,
    #[serde(default)]
    pub topic: SearchTopic,
}

impl SearchConfig {
    const fn default_max_results() -> usize {
        3
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: Self::default_max_results(),
            topic: SearchTopic::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}
