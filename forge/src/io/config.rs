//! Pipeline configuration stored under `config/forge.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Pipeline configuration (TOML).
///
/// Intended to be edited by humans. Missing fields fall back to defaults, and
/// a missing file is the same as an empty one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ForgeConfig {
    /// Full generate/run/repair iterations allowed per task.
    pub max_iterations: u32,

    /// Wall-clock budget for one sandbox run, in seconds.
    pub run_timeout_secs: u64,

    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    pub oracle: OracleConfig,

    pub environment: EnvironmentConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OracleBackend {
    /// Pipe the prompt to a local command and read content from stdout.
    Command,
    /// Google Gemini `generateContent` over HTTPS.
    Gemini,
    /// Zhipu GLM chat completions over HTTPS.
    Zhipu,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OracleConfig {
    pub backend: OracleBackend,
    /// Argv for the `command` backend (e.g. `["llm", "-m", "gpt-4o"]`).
    pub command: Vec<String>,
    /// Model name for HTTP backends. Empty means the backend default.
    pub model: String,
    /// Calls per generation or repair before giving up.
    pub retries: u32,
    /// Fixed pause between retries, in milliseconds.
    pub backoff_ms: u64,
    /// Per-call timeout, in seconds.
    pub timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            backend: OracleBackend::Command,
            command: vec!["llm".to_string()],
            model: String::new(),
            retries: 3,
            backoff_ms: 2_000,
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Isolated environment directory, relative to the project root.
    pub dir: String,
    /// Interpreter used to create the environment and when none exists.
    pub python: String,
    /// Budget for one environment creation or package install, in seconds.
    pub install_timeout_secs: u64,
    /// Install `requirements.txt` when the environment is first created.
    pub install_requirements: bool,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            dir: "venv".to_string(),
            python: "python3".to_string(),
            install_timeout_secs: 600,
            install_requirements: true,
        }
    }
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            run_timeout_secs: 30,
            output_limit_bytes: 100_000,
            oracle: OracleConfig::default(),
            environment: EnvironmentConfig::default(),
        }
    }
}

impl ForgeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.run_timeout_secs == 0 {
            return Err(anyhow!("run_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.oracle.retries == 0 {
            return Err(anyhow!("oracle.retries must be > 0"));
        }
        if self.oracle.timeout_secs == 0 {
            return Err(anyhow!("oracle.timeout_secs must be > 0"));
        }
        if self.oracle.backend == OracleBackend::Command
            && self.oracle.command.first().is_none_or(|c| c.trim().is_empty())
        {
            return Err(anyhow!("oracle.command must be a non-empty array"));
        }
        if self.environment.dir.trim().is_empty() {
            return Err(anyhow!("environment.dir must be non-empty"));
        }
        if self.environment.python.trim().is_empty() {
            return Err(anyhow!("environment.python must be non-empty"));
        }
        if self.environment.install_timeout_secs == 0 {
            return Err(anyhow!("environment.install_timeout_secs must be > 0"));
        }
        Ok(())
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ForgeConfig::default()`.
pub fn load_config(path: &Path) -> Result<ForgeConfig> {
    let cfg = if path.exists() {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?
    } else {
        ForgeConfig::default()
    };
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ForgeConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, buf).with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
