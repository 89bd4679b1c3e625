//! Runs a generated artifact as a child process and classifies the result.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::core::classifier::{TIMEOUT_MARKER, classify_failure};
use crate::core::types::{ExecutionOutcome, FailureKind};
use crate::io::process::run_command_with_timeout;

/// Executes artifacts for verification.
///
/// Implementations never fail: every problem is reported as a non-success
/// [`ExecutionOutcome`] and the caller decides what is fatal.
pub trait Sandbox {
    fn run(&self, target_path: &str, project_root: &Path, timeout: Duration) -> ExecutionOutcome;
}

/// Sandbox that runs Python sources with the project's interpreter.
#[derive(Debug, Clone)]
pub struct PythonSandbox {
    /// Environment interpreter; used when it exists on disk.
    venv_interpreter: PathBuf,
    /// Fallback interpreter.
    default_interpreter: String,
    output_limit_bytes: usize,
}

impl PythonSandbox {
    pub fn new(
        venv_interpreter: PathBuf,
        default_interpreter: impl Into<String>,
        output_limit_bytes: usize,
    ) -> Self {
        Self {
            venv_interpreter,
            default_interpreter: default_interpreter.into(),
            output_limit_bytes,
        }
    }

    fn interpreter(&self) -> OsString {
        if self.venv_interpreter.is_file() {
            self.venv_interpreter.clone().into_os_string()
        } else {
            OsString::from(&self.default_interpreter)
        }
    }
}

impl Sandbox for PythonSandbox {
    #[instrument(skip_all, fields(target = target_path, timeout_secs = timeout.as_secs()))]
    fn run(&self, target_path: &str, project_root: &Path, timeout: Duration) -> ExecutionOutcome {
        let relative = target_path.trim_start_matches(['/', '\\']);
        let mut cmd = Command::new(self.interpreter());
        cmd.arg(relative).current_dir(project_root);
        match search_path(project_root) {
            Ok(value) => {
                cmd.env("PYTHONPATH", value);
            }
            Err(err) => warn!(err = %err, "could not build PYTHONPATH"),
        }
        cmd.env("QT_QPA_PLATFORM", "offscreen");

        let output = match run_command_with_timeout(cmd, None, timeout, self.output_limit_bytes) {
            Ok(output) => output,
            Err(err) => {
                warn!(err = %err, "sandbox could not start artifact");
                return ExecutionOutcome::failed(FailureKind::Execution, format!("{err:#}"));
            }
        };

        if output.timed_out {
            warn!("artifact exceeded its time budget");
            let mut diagnostic = format!("{TIMEOUT_MARKER} after {}s", timeout.as_secs());
            let partial = output.diagnostic();
            if !partial.is_empty() {
                diagnostic.push('\n');
                diagnostic.push_str(&partial);
            }
            return ExecutionOutcome::failed(FailureKind::Timeout, diagnostic);
        }
        if output.success() {
            debug!("artifact ran cleanly");
            return ExecutionOutcome::passed();
        }

        let mut diagnostic = output.diagnostic();
        if diagnostic.is_empty() {
            diagnostic = format!("exited with status {:?}", output.status.code());
        }
        let kind = classify_failure(&diagnostic);
        debug!(kind = ?kind, "artifact failed");
        ExecutionOutcome::failed(kind, diagnostic)
    }
}

/// `PYTHONPATH` value: `src/`, the root, then whatever the caller already had.
fn search_path(project_root: &Path) -> Result<OsString, std::env::JoinPathsError> {
    let mut entries = vec![project_root.join("src"), project_root.to_path_buf()];
    if let Some(existing) = std::env::var_os("PYTHONPATH") {
        entries.extend(std::env::split_paths(&existing));
    }
    std::env::join_paths(entries)
}

#[cfg(all(test, unix))]
mod tests {
    use std::fs;
    use std::time::Instant;

    use super::*;

    fn sandbox() -> PythonSandbox {
        PythonSandbox::new(PathBuf::from("/nonexistent/venv/bin/python"), "sh", 4096)
    }

    fn script(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("dirs");
        fs::write(path, body).expect("write");
    }

    #[test]
    fn clean_exit_passes() {
        let temp = tempfile::tempdir().expect("tempdir");
        script(temp.path(), "src/ok.sh", "exit 0\n");
        let outcome = sandbox().run("src/ok.sh", temp.path(), Duration::from_secs(5));
        assert_eq!(outcome, ExecutionOutcome::passed());
    }

    #[test]
    fn injects_search_path_and_headless_flag() {
        let temp = tempfile::tempdir().expect("tempdir");
        script(
            temp.path(),
            "src/env.sh",
            "echo \"$QT_QPA_PLATFORM|$PYTHONPATH\" >&2\nexit 1\n",
        );
        let outcome = sandbox().run("/src/env.sh", temp.path(), Duration::from_secs(5));
        assert!(!outcome.success);
        assert!(outcome.diagnostic.starts_with("offscreen|"));
        let src = temp.path().join("src");
        assert!(outcome.diagnostic.contains(src.to_str().expect("utf8")));
    }

    #[test]
    fn missing_module_failure_is_classified() {
        let temp = tempfile::tempdir().expect("tempdir");
        script(
            temp.path(),
            "main.sh",
            "echo \"ModuleNotFoundError: No module named 'cv2'\" >&2\nexit 1\n",
        );
        let outcome = sandbox().run("main.sh", temp.path(), Duration::from_secs(5));
        assert_eq!(outcome.failure, Some(FailureKind::DependencyMissing));
    }

    #[test]
    fn timeout_is_a_classified_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        script(temp.path(), "slow.sh", "exec sleep 5\n");
        let started = Instant::now();
        let outcome = sandbox().run("slow.sh", temp.path(), Duration::from_millis(200));
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(outcome.failure, Some(FailureKind::Timeout));
        assert!(outcome.diagnostic.starts_with(TIMEOUT_MARKER));
    }

    #[test]
    fn spawn_failure_is_an_outcome() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sandbox = PythonSandbox::new(PathBuf::from("/nope"), "/definitely/not/python", 64);
        let outcome = sandbox.run("main.py", temp.path(), Duration::from_secs(1));
        assert_eq!(outcome.failure, Some(FailureKind::Execution));
        assert!(outcome.diagnostic.contains("spawn"));
    }
}
