//! Per-task verify/repair state machine.
//!
//! One call to [`VerifyRepairEngine::run_task`] drives a task through
//! GENERATE → WRITE → RUN → {DONE | DIAGNOSE → (INSTALL_DEPS | REPAIR) → RUN}
//! for at most `max_iterations` iterations. Every recoverable failure is
//! absorbed here; only [`PipelineError::BudgetExhausted`] and I/O errors
//! escape.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::dependencies::undeclared_symbols;
use crate::core::extract::{extract_content, merge_headers};
use crate::core::quality::is_substantial;
use crate::core::types::{
    ExecutionOutcome, FailureKind, GenerationAttempt, ProjectSpec, TargetKind, Task,
};
use crate::error::{OracleError, PipelineError};
use crate::io::config::ForgeConfig;
use crate::io::environment::{EnvironmentManager, PackageInstaller};
use crate::io::oracle::{Oracle, generate_with_retry};
use crate::io::prompt::{PromptEngine, RepairInputs};
use crate::io::sandbox::Sandbox;
use crate::io::symbols;

/// States of one engine iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Generate,
    Write,
    Preflight,
    Run,
    CheckQuality,
    Diagnose,
    InstallDeps,
    Repair,
    Done,
    NextIteration,
}

/// Steps already taken in the current iteration.
#[derive(Debug, Default)]
struct IterationFlags {
    preflight_done: bool,
    deps_tried: bool,
    repaired: bool,
    /// The pending response is a repair; it replaces the file without header carry-over.
    repair_response: bool,
}

/// Summary of a task that reached DONE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub id: String,
    pub title: String,
    pub target_path: String,
    /// Iterations used; 0 when nothing had to be generated.
    pub iterations: u32,
    /// Packages installed while verifying this task.
    pub installed: Vec<String>,
}

pub struct VerifyRepairEngine<'a, O: Oracle + ?Sized, S: Sandbox, I: PackageInstaller> {
    oracle: &'a O,
    sandbox: &'a S,
    env: &'a mut EnvironmentManager<I>,
    spec: &'a ProjectSpec,
    cfg: &'a ForgeConfig,
    root: &'a Path,
    prompts: PromptEngine,
}

impl<'a, O: Oracle + ?Sized, S: Sandbox, I: PackageInstaller> VerifyRepairEngine<'a, O, S, I> {
    pub fn new(
        oracle: &'a O,
        sandbox: &'a S,
        env: &'a mut EnvironmentManager<I>,
        spec: &'a ProjectSpec,
        cfg: &'a ForgeConfig,
        root: &'a Path,
    ) -> Self {
        Self {
            oracle,
            sandbox,
            env,
            spec,
            cfg,
            root,
            prompts: PromptEngine::new(),
        }
    }

    /// Drive `task` to DONE.
    ///
    /// `pending` are tasks scheduled after this one; modules they will produce
    /// are never treated as missing external dependencies.
    #[instrument(skip_all, fields(task = %task.id, target = %task.target_path))]
    pub fn run_task(&mut self, task: &Task, pending: &[Task]) -> Result<TaskReport> {
        let target = artifact_path(self.root, task);
        let mut report = TaskReport {
            id: task.id.clone(),
            title: task.title.clone(),
            target_path: task.target_path.clone(),
            iterations: 0,
            installed: Vec::new(),
        };

        if task.target_kind() == TargetKind::Directory {
            fs::create_dir_all(&target)
                .with_context(|| format!("create directory {}", target.display()))?;
            info!("directory target ready");
            return Ok(report);
        }

        info!("starting task");
        let max_iterations = self.cfg.max_iterations;
        let mut last_diagnostic = String::new();

        for index in 1..=max_iterations {
            report.iterations = index;
            let mut attempt = GenerationAttempt {
                index,
                current_content: read_or_empty(&target)?,
                ..GenerationAttempt::default()
            };
            let mut flags = IterationFlags::default();
            let mut phase = Phase::Generate;

            loop {
                debug!(iteration = index, phase = ?phase, "engine transition");
                phase = match phase {
                    Phase::Generate => {
                        let prompt =
                            self.prompts
                                .render_generate(self.spec, task, &attempt.current_content)?;
                        match self.ask_oracle(&prompt) {
                            Ok(content) => {
                                attempt.response = content;
                                flags.repair_response = false;
                                Phase::Write
                            }
                            Err(err) => {
                                warn!(iteration = index, err = %err, "generation failed");
                                last_diagnostic = err.to_string();
                                Phase::NextIteration
                            }
                        }
                    }
                    Phase::Write => {
                        let written =
                            write_artifact(&target, &attempt.response, !flags.repair_response)?;
                        match task.target_kind() {
                            TargetKind::Source if flags.preflight_done => Phase::Run,
                            TargetKind::Source => Phase::Preflight,
                            _ if written.trim().is_empty() => {
                                last_diagnostic = "generated content was empty".to_string();
                                Phase::NextIteration
                            }
                            _ => Phase::Done,
                        }
                    }
                    Phase::Preflight => {
                        flags.preflight_done = true;
                        let written = read_or_empty(&target)?;
                        let gaps = undeclared_symbols(&written);
                        if gaps.is_empty() {
                            Phase::Run
                        } else {
                            let diagnostic = format!(
                                "static check: {} used without an import",
                                gaps.join(", ")
                            );
                            warn!(iteration = index, gaps = ?gaps, "undeclared symbols before run");
                            attempt.outcome =
                                Some(ExecutionOutcome::failed(FailureKind::Execution, diagnostic));
                            Phase::Repair
                        }
                    }
                    Phase::Run => {
                        let outcome = self.sandbox.run(
                            &task.target_path,
                            self.root,
                            self.cfg.run_timeout(),
                        );
                        let next = if outcome.success {
                            Phase::CheckQuality
                        } else {
                            Phase::Diagnose
                        };
                        attempt.outcome = Some(outcome);
                        next
                    }
                    Phase::CheckQuality => {
                        if is_substantial(&read_or_empty(&target)?) {
                            Phase::Done
                        } else {
                            info!(iteration = index, "artifact runs but is not substantial");
                            last_diagnostic =
                                "execution succeeded but the content is a stub".to_string();
                            Phase::NextIteration
                        }
                    }
                    Phase::Diagnose => {
                        let (kind, diagnostic) = attempt
                            .outcome
                            .as_ref()
                            .map(|o| (o.failure, o.diagnostic.clone()))
                            .unwrap_or_default();
                        warn!(iteration = index, kind = ?kind, "artifact failed");
                        last_diagnostic = diagnostic;
                        if kind == Some(FailureKind::DependencyMissing) && !flags.deps_tried {
                            Phase::InstallDeps
                        } else if !flags.repaired {
                            flags.repaired = true;
                            Phase::Repair
                        } else {
                            Phase::NextIteration
                        }
                    }
                    Phase::InstallDeps => {
                        flags.deps_tried = true;
                        let missing = self
                            .env
                            .detect_missing_dependencies(&last_diagnostic, pending);
                        if missing.is_empty() {
                            debug!("no installable dependencies in failure");
                            flags.repaired = true;
                            Phase::Repair
                        } else {
                            let results = self.env.install(&missing)?;
                            let installed: Vec<String> = results
                                .into_iter()
                                .filter_map(|(name, ok)| ok.then_some(name))
                                .collect();
                            if installed.is_empty() {
                                flags.repaired = true;
                                Phase::Repair
                            } else {
                                report.installed.extend(installed);
                                Phase::Run
                            }
                        }
                    }
                    Phase::Repair => {
                        let failure = attempt
                            .outcome
                            .as_ref()
                            .map(|o| o.diagnostic.clone())
                            .unwrap_or_default();
                        let input = RepairInputs {
                            target_path: task.target_path.clone(),
                            task_title: task.title.clone(),
                            current_content: read_or_empty(&target)?,
                            mismatch: symbols::explain(&failure, self.root),
                            related: symbols::related_module_source(&failure, self.root),
                            self_import: symbols::self_import_hint(&failure, &task.target_path),
                            failure,
                        };
                        let prompt = self.prompts.render_repair(&input)?;
                        match self.ask_oracle(&prompt) {
                            Ok(content) => {
                                attempt.response = content;
                                flags.repair_response = true;
                                Phase::Write
                            }
                            Err(err) => {
                                warn!(iteration = index, err = %err, "repair failed");
                                last_diagnostic = err.to_string();
                                Phase::NextIteration
                            }
                        }
                    }
                    Phase::Done => {
                        info!(iterations = index, "task done");
                        return Ok(report);
                    }
                    Phase::NextIteration => break,
                };
            }
        }

        Err(PipelineError::BudgetExhausted {
            id: task.id.clone(),
            title: task.title.clone(),
            attempts: max_iterations,
            last_diagnostic,
        }
        .into())
    }

    fn ask_oracle(&self, prompt: &str) -> Result<String, OracleError> {
        generate_with_retry(
            self.oracle,
            prompt,
            self.cfg.oracle.retries,
            Duration::from_millis(self.cfg.oracle.backoff_ms),
        )
    }
}

fn read_or_empty(path: &Path) -> Result<String> {
    if !path.exists() {
        return Ok(String::new());
    }
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

/// Persist the oracle response to `target`.
///
/// With `keep_headers`, header lines of the previous version are carried into
/// content that declares no imports of its own.
fn write_artifact(target: &Path, response: &str, keep_headers: bool) -> Result<String> {
    let extracted = extract_content(response);
    let mut content = if keep_headers {
        merge_headers(&read_or_empty(target)?, &extracted)
    } else {
        extracted
    };
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(target, &content).with_context(|| format!("write {}", target.display()))?;
    debug!(path = %target.display(), bytes = content.len(), "artifact written");
    Ok(content)
}

/// Absolute path of `task`'s artifact under `root`.
pub fn artifact_path(root: &Path, task: &Task) -> PathBuf {
    root.join(task.relative_target())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classifier::TIMEOUT_MARKER;
    use crate::io::oracle::OracleResponse;
    use crate::test_support::{
        ScriptedInstaller, ScriptedOracle, ScriptedSandbox, TestProject, fenced,
        import_free_module, project, sample_module, task,
    };

    struct Harness {
        project: TestProject,
        spec: ProjectSpec,
        cfg: ForgeConfig,
        env: EnvironmentManager<ScriptedInstaller>,
    }

    impl Harness {
        fn new(tasks: Vec<Task>) -> Self {
            let repo = TestProject::new().expect("project");
            let cfg = repo.config();
            let env = EnvironmentManager::new(
                repo.path(),
                &cfg.environment,
                ScriptedInstaller::default(),
            );
            Self {
                spec: project(tasks),
                project: repo,
                cfg,
                env,
            }
        }

        fn run(
            &mut self,
            oracle: &ScriptedOracle,
            sandbox: &ScriptedSandbox,
            index: usize,
        ) -> Result<TaskReport> {
            let task = self.spec.tasks[index].clone();
            let mut engine = VerifyRepairEngine::new(
                oracle,
                sandbox,
                &mut self.env,
                &self.spec,
                &self.cfg,
                self.project.path(),
            );
            engine.run_task(&task, &[])
        }
    }

    #[test]
    fn clean_generation_is_done_in_one_iteration() {
        let mut h = Harness::new(vec![task("core", &[])]);
        let oracle = ScriptedOracle::new(vec![OracleResponse::ok(fenced(&sample_module("core")))]);
        let sandbox = ScriptedSandbox::passing();

        let report = h.run(&oracle, &sandbox, 0).expect("done");
        assert_eq!(report.iterations, 1);
        assert_eq!(sandbox.runs(), vec!["src/core.py"]);
        assert_eq!(h.project.read("src/core.py"), sample_module("core"));
    }

    #[test]
    fn directory_targets_skip_the_oracle() {
        let mut spec_task = task("assets", &[]);
        spec_task.target_path = "data/assets/".to_string();
        let mut h = Harness::new(vec![spec_task]);
        let oracle = ScriptedOracle::new(Vec::new());
        let sandbox = ScriptedSandbox::passing();

        let report = h.run(&oracle, &sandbox, 0).expect("done");
        assert_eq!(report.iterations, 0);
        assert!(h.project.path().join("data/assets").is_dir());
        assert!(oracle.prompts().is_empty());
    }

    #[test]
    fn documents_are_written_without_running() {
        let mut doc = task("readme", &[]);
        doc.target_path = "README.md".to_string();
        let mut h = Harness::new(vec![doc]);
        let oracle = ScriptedOracle::new(vec![OracleResponse::ok("# Demo\n\nUsage notes.")]);
        let sandbox = ScriptedSandbox::passing();

        h.run(&oracle, &sandbox, 0).expect("done");
        assert_eq!(h.project.read("README.md"), "# Demo\n\nUsage notes.\n");
        assert!(sandbox.runs().is_empty());
    }

    #[test]
    fn static_gaps_trigger_one_repair_before_running() {
        let mut h = Harness::new(vec![task("cli", &[])]);
        let gappy = format!("{}\nprint(sys.argv)\n", sample_module("cli"));
        let oracle = ScriptedOracle::new(vec![
            OracleResponse::ok(fenced(&gappy)),
            OracleResponse::ok(fenced(&sample_module("cli"))),
        ]);
        let sandbox = ScriptedSandbox::passing();

        let report = h.run(&oracle, &sandbox, 0).expect("done");
        assert_eq!(report.iterations, 1);
        let prompts = oracle.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("static check: sys used without an import"));
        assert_eq!(sandbox.runs().len(), 1);
    }

    #[test]
    fn previous_headers_survive_regeneration() {
        let mut h = Harness::new(vec![task("core", &[])]);
        h.project
            .write_file("src/core.py", "#!/usr/bin/env python3\nimport logging\n\n# TODO\n")
            .expect("seed");
        let oracle =
            ScriptedOracle::new(vec![OracleResponse::ok(fenced(&import_free_module("core")))]);
        let sandbox = ScriptedSandbox::passing();

        h.run(&oracle, &sandbox, 0).expect("done");
        let written = h.project.read("src/core.py");
        assert!(written.starts_with(
            "#!/usr/bin/env python3\n\"\"\"Inventory helpers for core.\"\"\"\nimport logging\n"
        ));
        assert!(oracle.prompts()[0].contains("# TODO"));
    }

    #[test]
    fn regenerated_imports_replace_previous_ones() {
        let mut h = Harness::new(vec![task("core", &[])]);
        h.project
            .write_file("src/core.py", "import legacy_pkg\nimport json\n\nprint(1)\n")
            .expect("seed");
        let oracle = ScriptedOracle::new(vec![OracleResponse::ok(fenced(&sample_module("core")))]);
        let sandbox = ScriptedSandbox::passing();

        h.run(&oracle, &sandbox, 0).expect("done");
        assert_eq!(h.project.read("src/core.py"), sample_module("core"));
    }

    #[test]
    fn multi_line_import_survives_regeneration() {
        let mut h = Harness::new(vec![task("core", &[])]);
        let block = "from typing import (\n    Any,\n    Dict,\n)\n";
        h.project
            .write_file("src/core.py", &format!("{block}\nx: Dict[str, Any] = {{}}\n"))
            .expect("seed");
        let oracle =
            ScriptedOracle::new(vec![OracleResponse::ok(fenced(&import_free_module("core")))]);
        let sandbox = ScriptedSandbox::passing();

        h.run(&oracle, &sandbox, 0).expect("done");
        let written = h.project.read("src/core.py");
        assert_eq!(written.matches("from typing import").count(), 1);
        assert!(written.contains(&format!("\"\"\"Inventory helpers for core.\"\"\"\n{block}")));
    }

    #[test]
    fn repair_can_drop_a_top_of_file_import() {
        let mut h = Harness::new(vec![task("core", &[])]);
        let broken = format!("import missing_pkg\n{}", sample_module("core"));
        let oracle = ScriptedOracle::new(vec![
            OracleResponse::ok(fenced(&broken)),
            OracleResponse::ok(fenced(&import_free_module("core"))),
        ]);
        let sandbox = ScriptedSandbox::new(vec![ExecutionOutcome::failed(
            FailureKind::Execution,
            "ModuleNotFoundError: No module named 'missing_pkg'",
        )]);

        let report = h.run(&oracle, &sandbox, 0).expect("done");
        assert_eq!(report.iterations, 1);
        assert!(oracle.prompts()[1].contains("missing_pkg"));
        let written = h.project.read("src/core.py");
        assert_eq!(written, import_free_module("core"));
        assert!(!written.contains("missing_pkg"));
    }

    #[test]
    fn timeout_leads_to_repair_then_done() {
        let mut h = Harness::new(vec![task("loop", &[])]);
        let oracle = ScriptedOracle::new(vec![
            OracleResponse::ok(fenced(&sample_module("loop"))),
            OracleResponse::ok(fenced(&sample_module("loop"))),
        ]);
        let sandbox = ScriptedSandbox::new(vec![
            ExecutionOutcome::failed(FailureKind::Timeout, format!("{TIMEOUT_MARKER} after 30s")),
            ExecutionOutcome::passed(),
        ]);

        let report = h.run(&oracle, &sandbox, 0).expect("done");
        assert_eq!(report.iterations, 1);
        assert!(oracle.prompts()[1].contains(TIMEOUT_MARKER));
    }

    #[test]
    fn failed_install_falls_back_to_repair() {
        let mut h = Harness::new(vec![task("vision", &[])]);
        h.env = EnvironmentManager::new(
            h.project.path(),
            &h.cfg.environment,
            ScriptedInstaller::failing(&["opencv-python"]),
        );
        let oracle = ScriptedOracle::new(vec![
            OracleResponse::ok(fenced(&sample_module("vision"))),
            OracleResponse::ok(fenced(&sample_module("vision"))),
        ]);
        let sandbox = ScriptedSandbox::new(vec![
            ExecutionOutcome::failed(
                FailureKind::DependencyMissing,
                "ModuleNotFoundError: No module named 'cv2'",
            ),
            ExecutionOutcome::passed(),
        ]);

        let report = h.run(&oracle, &sandbox, 0).expect("done");
        assert!(report.installed.is_empty());
        assert_eq!(oracle.prompts().len(), 2);
        assert!(oracle.prompts()[1].contains("No module named 'cv2'"));
    }

    #[test]
    fn same_failing_content_exhausts_the_budget() {
        let mut h = Harness::new(vec![task("core", &[])]);
        h.cfg.max_iterations = 3;
        let oracle = ScriptedOracle::repeating(OracleResponse::ok(fenced(&sample_module("core"))));
        let sandbox = ScriptedSandbox::failing(ExecutionOutcome::failed(
            FailureKind::Execution,
            "Traceback: ZeroDivisionError",
        ));

        let err = h.run(&oracle, &sandbox, 0).unwrap_err();
        match err.downcast::<PipelineError>().expect("pipeline error") {
            PipelineError::BudgetExhausted {
                id,
                attempts,
                last_diagnostic,
                ..
            } => {
                assert_eq!(id, "core");
                assert_eq!(attempts, 3);
                assert_eq!(last_diagnostic, "Traceback: ZeroDivisionError");
            }
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(oracle.prompts().len(), 6);
        assert_eq!(sandbox.runs().len(), 6);
    }
}
