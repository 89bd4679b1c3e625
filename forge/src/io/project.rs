//! Project layout and specification loading.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use jsonschema::Draft;
use serde_json::Value;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::core::invariants::validate_invariants;
use crate::core::types::ProjectSpec;
use crate::error::PipelineError;

const PROJECT_SCHEMA: &str = include_str!("../../schemas/project.schema.json");

/// Well-known paths under a project root.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub src_dir: PathBuf,
    pub tests_dir: PathBuf,
    pub spec_path: PathBuf,
    pub config_path: PathBuf,
    pub ledger_path: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            src_dir: root.join("src"),
            tests_dir: root.join("tests"),
            spec_path: root.join("config").join("project.json"),
            config_path: root.join("config").join("forge.toml"),
            ledger_path: root.join("DEVELOPMENT_LOG.md"),
        }
    }
}

/// Load and validate `config/project.json`.
///
/// Schema and invariant violations surface as [`PipelineError::SpecInvalid`].
pub fn load_project_spec(path: &Path) -> Result<ProjectSpec> {
    debug!(path = %path.display(), "loading project spec");
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read project spec {}", path.display()))?;
    parse_project_spec(&raw)
}

/// Parse and validate a project specification document.
pub fn parse_project_spec(raw: &str) -> Result<ProjectSpec> {
    let instance: Value = serde_json::from_str(raw).map_err(|err| PipelineError::SpecInvalid {
        violations: vec![format!("malformed json: {err}")],
    })?;
    let schema: Value = serde_json::from_str(PROJECT_SCHEMA).context("parse project schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile project schema")?;
    let violations: Vec<String> = compiled
        .iter_errors(&instance)
        .map(|err| err.to_string())
        .collect();
    if !violations.is_empty() {
        return Err(PipelineError::SpecInvalid { violations }.into());
    }

    let spec: ProjectSpec =
        serde_json::from_value(instance).map_err(|err| PipelineError::SpecInvalid {
            violations: vec![err.to_string()],
        })?;
    let violations = validate_invariants(&spec);
    if !violations.is_empty() {
        return Err(PipelineError::SpecInvalid { violations }.into());
    }
    Ok(spec)
}

/// Make every directory under `src/` that holds Python sources an importable package.
///
/// Returns the `__init__.py` files created.
pub fn ensure_package_structure(src_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut created = Vec::new();
    if !src_dir.is_dir() {
        return Ok(created);
    }
    for entry in WalkDir::new(src_dir).into_iter().filter_entry(|e| !is_hidden(e.path())) {
        let entry = entry.with_context(|| format!("walk {}", src_dir.display()))?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let dir = entry.path();
        let init = dir.join("__init__.py");
        if init.exists() || !has_python_files(dir)? {
            continue;
        }
        fs::write(&init, "").with_context(|| format!("create {}", init.display()))?;
        info!(path = %init.display(), "created package marker");
        created.push(init);
    }
    Ok(created)
}

fn has_python_files(dir: &Path) -> Result<bool> {
    for entry in fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))? {
        let path = entry.context("read dir entry")?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "py") {
            return Ok(true);
        }
    }
    Ok(false)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.') || name == "__pycache__")
}
