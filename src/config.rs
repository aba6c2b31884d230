//! Configuration for forkcheck, read from `forkcheck.toml`.
//!
//! Settings are layered: file → environment → explicit overrides.
//!
//! # Configuration File Format
//!
//! ```toml
//! [pools]
//! issues = 4
//! dependencies = 2
//!
//! [run]
//! async = true
//!
//! [issue]
//! include = ["src/**"]
//! exclude = ["**/*.test.ts"]
//!
//! [logging]
//! level = "debug"
//! format = "json"
//! ```
//!
//! # Environment
//!
//! - `FORKCHECK_ASYNC` overrides `run.async` (`false`/`0` disable, anything else enables)
//! - `RUST_LOG` overrides `logging.level`

use crate::issue::Issue;
use anyhow::{Context, Result};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::Path;

/// File name looked up by [`ForkcheckToml::load_or_default`].
pub const CONFIG_FILE: &str = "forkcheck.toml";

/// Pool sizes for the two worker kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolsConfig {
    /// Concurrent issues jobs
    #[serde(default = "default_pool_size")]
    pub issues: usize,
    /// Concurrent dependencies jobs
    #[serde(default = "default_pool_size")]
    pub dependencies: usize,
}

fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

impl Default for PoolsConfig {
    fn default() -> Self {
        Self {
            issues: default_pool_size(),
            dependencies: default_pool_size(),
        }
    }
}

/// Run-mode settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    /// Deliver watch-mode issues after the build is done instead of
    /// holding the build until they are known.
    #[serde(default, rename = "async")]
    pub async_mode: bool,
}

/// Which issues are delivered, by file glob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueConfig {
    /// When non-empty, an issue's file must match one of these.
    #[serde(default)]
    pub include: Vec<String>,
    /// Issues whose file matches any of these are dropped.
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl IssueConfig {
    /// Whether an issue passes the include/exclude globs.
    ///
    /// Issues without a file always pass. Invalid patterns match nothing.
    pub fn matches(&self, issue: &Issue) -> bool {
        let Some(file) = issue.file.as_deref() else {
            return true;
        };

        let matches_any = |patterns: &[String]| {
            patterns
                .iter()
                .filter_map(|pattern| Pattern::new(pattern).ok())
                .any(|pattern| pattern.matches_path(file))
        };

        if !self.include.is_empty() && !matches_any(&self.include) {
            return false;
        }
        !matches_any(&self.exclude)
    }

    pub fn filter(&self, issues: Vec<Issue>) -> Vec<Issue> {
        issues.into_iter().filter(|issue| self.matches(issue)).collect()
    }

    fn invalid_patterns(&self) -> Vec<&str> {
        self.include
            .iter()
            .chain(self.exclude.iter())
            .filter(|pattern| Pattern::new(pattern).is_err())
            .map(String::as_str)
            .collect()
    }
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines (default)
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Invalid log format '{}'. Valid values: pretty, json", s),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// The complete forkcheck.toml configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForkcheckToml {
    #[serde(default)]
    pub pools: PoolsConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub issue: IssueConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ForkcheckToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse forkcheck.toml")
    }

    /// Load `forkcheck.toml` from `dir`, or defaults if there is none.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize forkcheck.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Async delivery flag, with `FORKCHECK_ASYNC` taking precedence.
    pub fn async_mode(&self) -> bool {
        resolve_async_mode(self.run.async_mode, std::env::var("FORKCHECK_ASYNC").ok())
    }

    /// Validate configuration and return warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.pools.issues == 0 {
            warnings.push("pools.issues is 0; at least 1 issues job must be allowed".to_string());
        }
        if self.pools.dependencies == 0 {
            warnings.push(
                "pools.dependencies is 0; at least 1 dependencies job must be allowed".to_string(),
            );
        }
        for pattern in self.issue.invalid_patterns() {
            warnings.push(format!("Invalid issue glob pattern '{}'", pattern));
        }
        if self.logging.level.trim().is_empty() {
            warnings.push("logging.level is empty; defaulting to 'info'".to_string());
        }

        warnings
    }
}

fn resolve_async_mode(file_value: bool, env_value: Option<String>) -> bool {
    match env_value {
        Some(value) => value != "false" && value != "0",
        None => file_value,
    }
}

/// Runtime settings the orchestrator is built from.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub async_mode: bool,
    pub issues_pool_size: usize,
    pub dependencies_pool_size: usize,
    pub issue: IssueConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_toml(&ForkcheckToml::default())
    }
}

impl OrchestratorConfig {
    /// Resolve the runtime view of a parsed file, applying the environment.
    pub fn from_toml(toml: &ForkcheckToml) -> Self {
        Self {
            async_mode: toml.async_mode(),
            issues_pool_size: toml.pools.issues,
            dependencies_pool_size: toml.pools.dependencies,
            issue: toml.issue.clone(),
        }
    }

    pub fn with_async_mode(mut self, async_mode: bool) -> Self {
        self.async_mode = async_mode;
        self
    }

    pub fn with_pool_sizes(mut self, issues: usize, dependencies: usize) -> Self {
        self.issues_pool_size = issues;
        self.dependencies_pool_size = dependencies;
        self
    }

    pub fn with_issue_config(mut self, issue: IssueConfig) -> Self {
        self.issue = issue;
        self
    }
}
