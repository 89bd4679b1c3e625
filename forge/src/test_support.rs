//! Test-only helpers: deterministic tasks, scripted collaborators and a temp project.

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::types::{ExecutionOutcome, Flexibility, ProjectSpec, Task};
use crate::io::config::ForgeConfig;
use crate::io::environment::{InstallTarget, PackageInstaller};
use crate::io::oracle::{Oracle, OracleResponse};
use crate::io::project::ProjectPaths;
use crate::io::sandbox::Sandbox;

/// Create a deterministic task targeting `src/<id>.py`.
pub fn task(id: &str, deps: &[&str]) -> Task {
    Task {
        id: id.to_string(),
        title: format!("{} title", id),
        description: format!("{} description", id),
        technical_requirement: String::new(),
        target_path: format!("src/{}.py", id),
        verification: String::new(),
        flexibility: Flexibility::Fixed,
        dependencies: deps.iter().map(|d| d.to_string()).collect(),
    }
}

/// Wrap tasks in a project named `demo`.
pub fn project(tasks: Vec<Task>) -> ProjectSpec {
    ProjectSpec {
        project_name: "demo".to_string(),
        description: "demo project".to_string(),
        architecture_proposal: String::new(),
        version: "1.0.0".to_string(),
        tasks,
    }
}

/// A small module that passes the quality gate and the static import check.
pub fn sample_module(name: &str) -> String {
    format!(
        r#""""Inventory helpers for {name}."""
import json


class Inventory:
    def __init__(self):
        self.items = {{}}

    def add(self, sku, count):
        if count <= 0:
            raise ValueError("count must be positive")
        self.items[sku] = self.items.get(sku, 0) + count

    def total(self):
        return sum(self.items.values())


def main():
    inventory = Inventory()
    inventory.add("{name}", 3)
    print(json.dumps({{"total": inventory.total()}}))


if __name__ == "__main__":
    main()
"#
    )
}

/// Like [`sample_module`] but without any import lines.
pub fn import_free_module(name: &str) -> String {
    sample_module(name)
        .replace("import json\n", "")
        .replace("json.dumps({\"total\": inventory.total()})", "inventory.total()")
}

/// A module that runs but is a stub.
pub fn stub_module() -> String {
    "def run():\n    pass\n".to_string()
}

/// Oracle reply wrapping `code` in a fenced block.
pub fn fenced(code: &str) -> String {
    format!("Here is the file:\n```python\n{code}```\n")
}

/// Oracle that returns queued responses in order.
pub struct ScriptedOracle {
    responses: RefCell<VecDeque<OracleResponse>>,
    fallback: Option<OracleResponse>,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedOracle {
    /// Once the queue is empty every call fails.
    pub fn new(responses: Vec<OracleResponse>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            fallback: None,
            prompts: RefCell::new(Vec::new()),
        }
    }

    /// Return `response` for every call.
    pub fn repeating(response: OracleResponse) -> Self {
        Self {
            fallback: Some(response),
            ..Self::new(Vec::new())
        }
    }

    /// Prompts received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }
}

impl Oracle for ScriptedOracle {
    fn generate(&self, prompt: &str) -> OracleResponse {
        self.prompts.borrow_mut().push(prompt.to_string());
        self.responses
            .borrow_mut()
            .pop_front()
            .or_else(|| self.fallback.clone())
            .unwrap_or_else(|| OracleResponse::failure("scripted oracle exhausted"))
    }
}

/// Sandbox that returns queued outcomes, then a fixed fallback.
pub struct ScriptedSandbox {
    outcomes: RefCell<VecDeque<ExecutionOutcome>>,
    fallback: ExecutionOutcome,
    runs: RefCell<Vec<String>>,
}

impl ScriptedSandbox {
    /// Queued outcomes, then passing runs.
    pub fn new(outcomes: Vec<ExecutionOutcome>) -> Self {
        Self {
            outcomes: RefCell::new(outcomes.into()),
            fallback: ExecutionOutcome::passed(),
            runs: RefCell::new(Vec::new()),
        }
    }

    pub fn passing() -> Self {
        Self::new(Vec::new())
    }

    /// Every run returns `outcome`.
    pub fn failing(outcome: ExecutionOutcome) -> Self {
        Self {
            fallback: outcome,
            ..Self::new(Vec::new())
        }
    }

    /// Target paths run so far.
    pub fn runs(&self) -> Vec<String> {
        self.runs.borrow().clone()
    }
}

impl Sandbox for ScriptedSandbox {
    fn run(&self, target_path: &str, _project_root: &Path, _timeout: Duration) -> ExecutionOutcome {
        self.runs.borrow_mut().push(target_path.to_string());
        self.outcomes
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// Installer that records calls; creation makes the directory.
#[derive(Default)]
pub struct ScriptedInstaller {
    failing: HashSet<String>,
    calls: RefCell<Vec<String>>,
}

impl ScriptedInstaller {
    /// Installs of `names` fail; everything else succeeds.
    pub fn failing(names: &[&str]) -> Self {
        Self {
            failing: names.iter().map(|n| n.to_string()).collect(),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Calls so far, e.g. `create venv`, `install numpy`, `install -r requirements.txt`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl PackageInstaller for ScriptedInstaller {
    fn create(&self, env_dir: &Path) -> Result<()> {
        let name = env_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.calls.borrow_mut().push(format!("create {name}"));
        fs::create_dir_all(env_dir).with_context(|| format!("create {}", env_dir.display()))
    }

    fn install(&self, _env_dir: &Path, target: InstallTarget<'_>) -> Result<()> {
        let (call, name) = match target {
            InstallTarget::Package(name) => (format!("install {name}"), name.to_string()),
            InstallTarget::Requirements(path) => {
                let file = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                (format!("install -r {file}"), file)
            }
        };
        self.calls.borrow_mut().push(call);
        if self.failing.contains(&name) {
            return Err(anyhow!("no matching distribution found for {name}"));
        }
        Ok(())
    }
}

/// Temporary project root with the standard layout.
pub struct TestProject {
    temp: TempDir,
    paths: ProjectPaths,
}

impl TestProject {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let paths = ProjectPaths::new(temp.path());
        fs::create_dir_all(paths.root.join("config")).context("create config dir")?;
        fs::create_dir_all(&paths.src_dir).context("create src dir")?;
        Ok(Self { temp, paths })
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn paths(&self) -> &ProjectPaths {
        &self.paths
    }

    /// Default config with no retry backoff.
    pub fn config(&self) -> ForgeConfig {
        let mut cfg = ForgeConfig::default();
        cfg.oracle.backoff_ms = 0;
        cfg
    }

    pub fn write_spec(&self, spec: &ProjectSpec) -> Result<()> {
        let raw = serde_json::to_string_pretty(spec).context("serialize spec")?;
        fs::write(&self.paths.spec_path, raw).context("write project.json")
    }

    pub fn write_file(&self, relative: &str, contents: &str) -> Result<()> {
        let path = self.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
    }

    /// Read a project file; panics when missing.
    pub fn read(&self, relative: &str) -> String {
        fs::read_to_string(self.path().join(relative))
            .unwrap_or_else(|err| panic!("read {relative}: {err}"))
    }

    pub fn ledger(&self) -> String {
        fs::read_to_string(&self.paths.ledger_path).unwrap_or_default()
    }
}
