//! Shared deterministic types for the pipeline core.
//!
//! These types define stable contracts between the scheduler, the verify/repair
//! engine and the I/O adapters. They must not depend on external state.

use serde::{Deserialize, Serialize};

/// Whether the oracle may deviate from the declared target layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flexibility {
    #[default]
    Fixed,
    Flexible,
}

impl Flexibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Flexibility::Fixed => "fixed",
            Flexibility::Flexible => "flexible",
        }
    }
}

/// A single implementation task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub technical_requirement: String,
    /// Relative path of the artifact. A trailing `/` marks a directory.
    pub target_path: String,
    /// Acceptance text for the oracle; never evaluated by the pipeline.
    #[serde(default)]
    pub verification: String,
    #[serde(default)]
    pub flexibility: Flexibility,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl Task {
    /// Target path with leading separators removed.
    pub fn relative_target(&self) -> &str {
        self.target_path.trim_start_matches(['/', '\\'])
    }

    pub fn target_kind(&self) -> TargetKind {
        TargetKind::of(&self.target_path)
    }
}

/// What kind of artifact a target path names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// Path ends with a separator; nothing to generate.
    Directory,
    /// Executable source verified in the sandbox.
    Source,
    /// Any other file (documents, data, config).
    Document,
}

impl TargetKind {
    pub fn of(target_path: &str) -> Self {
        if target_path.ends_with('/') || target_path.ends_with('\\') {
            return TargetKind::Directory;
        }
        if target_path.ends_with(".py") {
            return TargetKind::Source;
        }
        TargetKind::Document
    }
}

/// The validated project specification (`config/project.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSpec {
    pub project_name: String,
    pub description: String,
    #[serde(default)]
    pub architecture_proposal: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub tasks: Vec<Task>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// Classification attached to a sandbox run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Wall-clock budget exceeded; the child was killed.
    Timeout,
    /// Failure text names a module or import that could not be resolved.
    DependencyMissing,
    /// Any other non-zero exit or spawn failure.
    Execution,
}

/// Result of running an artifact once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub success: bool,
    /// Captured diagnostic text (empty on success).
    pub diagnostic: String,
    /// `None` on success.
    pub failure: Option<FailureKind>,
}

impl ExecutionOutcome {
    pub fn passed() -> Self {
        Self {
            success: true,
            diagnostic: String::new(),
            failure: None,
        }
    }

    pub fn failed(kind: FailureKind, diagnostic: impl Into<String>) -> Self {
        Self {
            success: false,
            diagnostic: diagnostic.into(),
            failure: Some(kind),
        }
    }
}

/// Transient record for one engine iteration.
#[derive(Debug, Clone, Default)]
pub struct GenerationAttempt {
    /// 1-indexed iteration number.
    pub index: u32,
    /// File content when the iteration began.
    pub current_content: String,
    /// Last content returned by the oracle in this iteration.
    pub response: String,
    /// Last sandbox outcome in this iteration.
    pub outcome: Option<ExecutionOutcome>,
}
