//! Pipeline driver: schedule, verify each task, then sweep for stubs.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

use crate::core::quality::is_substantial;
use crate::core::scheduler::order;
use crate::core::types::{Flexibility, Task};
use crate::engine::{TaskReport, VerifyRepairEngine};
use crate::error::PipelineError;
use crate::io::config::ForgeConfig;
use crate::io::environment::{EnvironmentManager, PackageInstaller};
use crate::io::ledger::{completed_ids, ensure_ledger, mark_completed};
use crate::io::oracle::Oracle;
use crate::io::project::{ProjectPaths, ensure_package_structure, load_project_spec};
use crate::io::sandbox::Sandbox;

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Skip tasks whose ledger entry is already marked complete.
    pub resume: bool,
}

/// What a run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Declared tasks that reached DONE, in execution order.
    pub completed: Vec<TaskReport>,
    /// Ids of declared tasks skipped by `--resume`.
    pub skipped: Vec<String>,
    /// Completion tasks synthesized by the discovery sweep.
    pub discovered: Vec<TaskReport>,
}

/// Run every task of the project at `paths` in dependency order.
///
/// Fatal errors ([`PipelineError`]) abort the run; the tasks completed before
/// the failure stay marked in the ledger.
#[instrument(skip_all, fields(root = %paths.root.display(), resume = options.resume))]
pub fn run_pipeline<O, S, I>(
    paths: &ProjectPaths,
    cfg: &ForgeConfig,
    oracle: &O,
    sandbox: &S,
    env: &mut EnvironmentManager<I>,
    options: RunOptions,
) -> Result<PipelineReport>
where
    O: Oracle + ?Sized,
    S: Sandbox,
    I: PackageInstaller,
{
    let spec = load_project_spec(&paths.spec_path)?;
    let ordered: Vec<Task> = order(&spec.tasks)
        .map_err(PipelineError::from)?
        .into_iter()
        .cloned()
        .collect();
    info!(project = %spec.project_name, tasks = ordered.len(), "pipeline starting");

    ensure_ledger(&paths.ledger_path, &spec)?;
    env.ensure_environment()?;
    let already_done = if options.resume {
        completed_ids(&paths.ledger_path)?
    } else {
        HashSet::new()
    };

    let mut report = PipelineReport::default();
    let mut verified: HashSet<PathBuf> = HashSet::new();
    let mut engine = VerifyRepairEngine::new(oracle, sandbox, env, &spec, cfg, &paths.root);

    for (position, task) in ordered.iter().enumerate() {
        if already_done.contains(&task.id) {
            info!(task = %task.id, "already completed, skipping");
            report.skipped.push(task.id.clone());
            continue;
        }
        ensure_package_structure(&paths.src_dir)?;
        let outcome = engine.run_task(task, &ordered[position + 1..])?;
        mark_completed(&paths.ledger_path, task)?;
        verified.insert(PathBuf::from(task.relative_target()));
        report.completed.push(outcome);
    }

    for (n, relative) in discover_stubs(&paths.root, &paths.src_dir, &verified)?
        .into_iter()
        .enumerate()
    {
        let task = completion_task(n + 1, &relative);
        info!(task = %task.id, target = %task.target_path, "completing stub artifact");
        ensure_package_structure(&paths.src_dir)?;
        let outcome = engine.run_task(&task, &[])?;
        mark_completed(&paths.ledger_path, &task)?;
        report.discovered.push(outcome);
    }

    info!(
        completed = report.completed.len(),
        skipped = report.skipped.len(),
        discovered = report.discovered.len(),
        "pipeline finished"
    );
    Ok(report)
}

/// Source files under `src_dir` that were not verified this run and are stubs.
///
/// Paths are relative to `root`, sorted for a stable order.
pub fn discover_stubs(
    root: &Path,
    src_dir: &Path,
    verified: &HashSet<PathBuf>,
) -> Result<Vec<PathBuf>> {
    let mut stubs = Vec::new();
    if !src_dir.is_dir() {
        return Ok(stubs);
    }
    let walker = WalkDir::new(src_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.file_name()
                .to_str()
                .is_none_or(|name| !name.starts_with('.') && name != "__pycache__")
        });
    for entry in walker {
        let entry = entry.with_context(|| format!("walk {}", src_dir.display()))?;
        let path = entry.path();
        if !entry.file_type().is_file()
            || path.extension().is_none_or(|ext| ext != "py")
            || entry.file_name() == "__init__.py"
        {
            continue;
        }
        let relative = path.strip_prefix(root).unwrap_or(path).to_path_buf();
        if verified.contains(&relative) {
            continue;
        }
        let contents =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        if is_substantial(&contents) {
            debug!(path = %relative.display(), "artifact is substantial");
        } else {
            stubs.push(relative);
        }
    }
    Ok(stubs)
}

/// Ad hoc task that finishes the artifact at `relative`.
pub fn completion_task(n: usize, relative: &Path) -> Task {
    let target = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    Task {
        id: format!("discover-{n}"),
        title: format!("Complete {target}"),
        description: format!(
            "{target} still contains placeholder code. Finish the implementation so it is complete and runnable, keeping its existing public names."
        ),
        technical_requirement: String::new(),
        target_path: target,
        verification: "Runs without error and contains no placeholders.".to_string(),
        flexibility: Flexibility::Flexible,
        dependencies: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_finds_unverified_stubs_only() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        let src = root.join("src");
        fs::create_dir_all(src.join("pkg/__pycache__")).expect("dirs");
        fs::write(src.join("__init__.py"), "").expect("write");
        fs::write(src.join("pkg/stub.py"), "def run():\n    pass\n").expect("write");
        fs::write(src.join("pkg/__pycache__/stub.py"), "pass\n").expect("write");
        fs::write(src.join("done.py"), "x = 1\n").expect("write");
        fs::write(src.join("notes.txt"), "todo\n").expect("write");

        let verified = HashSet::from([PathBuf::from("src/done.py")]);
        let stubs = discover_stubs(root, &src, &verified).expect("sweep");
        assert_eq!(stubs, vec![PathBuf::from("src/pkg/stub.py")]);
    }

    #[test]
    fn completion_task_targets_the_stub() {
        let task = completion_task(2, Path::new("src/pkg/stub.py"));
        assert_eq!(task.id, "discover-2");
        assert_eq!(task.target_path, "src/pkg/stub.py");
        assert_eq!(task.title, "Complete src/pkg/stub.py");
        assert_eq!(task.flexibility, Flexibility::Flexible);
    }
}
