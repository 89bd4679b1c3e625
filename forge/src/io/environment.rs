//! Per-project isolated runtime environment and dependency installation.
//!
//! All environment state lives in [`EnvironmentManager`]. Spawning the actual
//! tools goes through [`PackageInstaller`] so tests can script installs.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::dependencies::{candidate_names, module_paths_for_target, package_for, top_level};
use crate::core::types::Task;
use crate::io::config::EnvironmentConfig;
use crate::io::process::run_command_with_timeout;

/// What to install into the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallTarget<'a> {
    /// A single distributable package.
    Package(&'a str),
    /// A requirements file (`pip install -r`).
    Requirements(&'a Path),
}

/// Backend that creates environments and installs packages into them.
pub trait PackageInstaller {
    /// Create an isolated environment at `env_dir`.
    fn create(&self, env_dir: &Path) -> Result<()>;

    /// Install `target` into the environment at `env_dir`.
    ///
    /// An `Err` carries the installer's failure text.
    fn install(&self, env_dir: &Path, target: InstallTarget<'_>) -> Result<()>;
}

/// Installer that shells out to `python -m venv` and `pip`.
#[derive(Debug, Clone)]
pub struct PipInstaller {
    python: String,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl PipInstaller {
    pub fn new(cfg: &EnvironmentConfig, output_limit_bytes: usize) -> Self {
        Self {
            python: cfg.python.clone(),
            timeout: Duration::from_secs(cfg.install_timeout_secs),
            output_limit_bytes,
        }
    }

    fn run(&self, cmd: Command, what: &str) -> Result<()> {
        let output = run_command_with_timeout(cmd, None, self.timeout, self.output_limit_bytes)?;
        if output.timed_out {
            return Err(anyhow!("{what} timed out after {:?}", self.timeout));
        }
        if !output.success() {
            return Err(anyhow!(
                "{what} failed with status {:?}: {}",
                output.status.code(),
                output.diagnostic()
            ));
        }
        Ok(())
    }
}

impl PackageInstaller for PipInstaller {
    #[instrument(skip_all, fields(env_dir = %env_dir.display()))]
    fn create(&self, env_dir: &Path) -> Result<()> {
        let mut cmd = Command::new(&self.python);
        cmd.arg("-m").arg("venv").arg(env_dir);
        self.run(cmd, "create environment")
    }

    #[instrument(skip_all, fields(target = ?target))]
    fn install(&self, env_dir: &Path, target: InstallTarget<'_>) -> Result<()> {
        let interpreter = venv_interpreter(env_dir);
        let mut cmd = if interpreter.is_file() {
            Command::new(interpreter)
        } else {
            Command::new(&self.python)
        };
        cmd.arg("-m").arg("pip").arg("install").arg("--quiet");
        match target {
            InstallTarget::Package(name) => {
                cmd.arg(name);
            }
            InstallTarget::Requirements(path) => {
                cmd.arg("-r").arg(path);
            }
        }
        self.run(cmd, "pip install")
    }
}

/// Interpreter path inside an environment directory.
pub fn venv_interpreter(env_dir: &Path) -> PathBuf {
    if cfg!(windows) {
        env_dir.join("Scripts").join("python.exe")
    } else {
        env_dir.join("bin").join("python")
    }
}

/// Owner of the project's isolated environment for one run.
pub struct EnvironmentManager<I: PackageInstaller> {
    installer: I,
    root: PathBuf,
    env_dir: PathBuf,
    install_requirements: bool,
    ready: bool,
    /// Package names already attempted this run.
    resolved: HashSet<String>,
}

impl<I: PackageInstaller> EnvironmentManager<I> {
    pub fn new(root: &Path, cfg: &EnvironmentConfig, installer: I) -> Self {
        Self {
            installer,
            root: root.to_path_buf(),
            env_dir: root.join(&cfg.dir),
            install_requirements: cfg.install_requirements,
            ready: false,
            resolved: HashSet::new(),
        }
    }

    pub fn env_dir(&self) -> &Path {
        &self.env_dir
    }

    pub fn installer(&self) -> &I {
        &self.installer
    }

    /// Interpreter of the isolated environment, if it exists on disk.
    pub fn interpreter(&self) -> Option<PathBuf> {
        let path = venv_interpreter(&self.env_dir);
        path.is_file().then_some(path)
    }

    /// Create the environment if absent. Idempotent.
    ///
    /// On first creation `requirements.txt` is installed when configured; a
    /// failing requirements install is logged, not fatal.
    #[instrument(skip_all, fields(env_dir = %self.env_dir.display()))]
    pub fn ensure_environment(&mut self) -> Result<()> {
        if self.ready {
            return Ok(());
        }
        if self.env_dir.is_dir() {
            debug!("environment already present");
            self.ready = true;
            return Ok(());
        }

        info!("creating isolated environment");
        self.installer.create(&self.env_dir)?;
        self.ready = true;

        let requirements = self.root.join("requirements.txt");
        if self.install_requirements && requirements.is_file() {
            info!(path = %requirements.display(), "installing project requirements");
            if let Err(err) = self
                .installer
                .install(&self.env_dir, InstallTarget::Requirements(&requirements))
            {
                warn!(err = %err, "requirements install failed");
            }
        }
        Ok(())
    }

    /// Package names to install for `failure_text`, in first-seen order.
    ///
    /// Local packages under the project and modules that `pending` tasks will
    /// produce are not external dependencies and are skipped.
    pub fn detect_missing_dependencies(&self, failure_text: &str, pending: &[Task]) -> Vec<String> {
        let pending_modules: Vec<String> = pending
            .iter()
            .flat_map(|task| module_paths_for_target(&task.target_path))
            .collect();

        let mut packages: Vec<String> = Vec::new();
        for candidate in candidate_names(failure_text) {
            if self.is_local_module(&candidate) {
                debug!(module = %candidate, "skipping local module");
                continue;
            }
            if is_pending_module(&candidate, &pending_modules) {
                debug!(module = %candidate, "skipping module produced by a pending task");
                continue;
            }
            let package = package_for(&candidate);
            if !packages.contains(&package) {
                packages.push(package);
            }
        }
        packages
    }

    /// Install each package once per run. Returns `(name, installed)` pairs.
    ///
    /// Names already attempted this run are skipped. One failure does not stop
    /// the rest.
    #[instrument(skip_all, fields(count = packages.len()))]
    pub fn install(&mut self, packages: &[String]) -> Result<Vec<(String, bool)>> {
        self.ensure_environment()?;
        let mut results = Vec::new();
        for package in packages {
            if !self.resolved.insert(package.clone()) {
                debug!(package = %package, "already attempted this run");
                continue;
            }
            let installed = match self
                .installer
                .install(&self.env_dir, InstallTarget::Package(package))
            {
                Ok(()) => {
                    info!(package = %package, "installed dependency");
                    true
                }
                Err(err) => {
                    warn!(package = %package, err = %err, "dependency install failed");
                    false
                }
            };
            results.push((package.clone(), installed));
        }
        Ok(results)
    }

    fn is_local_module(&self, module: &str) -> bool {
        let head = top_level(module);
        [
            self.root.join(head),
            self.root.join("src").join(head),
            self.root.join("lib").join(head),
        ]
        .iter()
        .any(|path| path.is_dir())
    }
}

fn is_pending_module(candidate: &str, pending_modules: &[String]) -> bool {
    pending_modules.iter().any(|module| {
        module == candidate
            || module
                .strip_prefix(candidate)
                .is_some_and(|rest| rest.starts_with('.'))
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::test_support::{ScriptedInstaller, task};

    fn manager(root: &Path, installer: ScriptedInstaller) -> EnvironmentManager<ScriptedInstaller> {
        EnvironmentManager::new(root, &EnvironmentConfig::default(), installer)
    }

    #[test]
    fn image_library_maps_to_distributable_name() {
        let temp = tempfile::tempdir().expect("tempdir");
        let env = manager(temp.path(), ScriptedInstaller::default());
        let found = env.detect_missing_dependencies("ModuleNotFoundError: No module named 'cv2'", &[]);
        assert_eq!(found, vec!["opencv-python"]);
    }

    #[test]
    fn local_packages_are_not_dependencies() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("src").join("engine")).expect("dirs");
        let env = manager(temp.path(), ScriptedInstaller::default());
        let text = "ModuleNotFoundError: No module named 'engine.physics'\nNo module named 'yaml'";
        assert_eq!(env.detect_missing_dependencies(text, &[]), vec!["PyYAML"]);
    }

    #[test]
    fn pending_task_modules_are_not_dependencies() {
        let temp = tempfile::tempdir().expect("tempdir");
        let env = manager(temp.path(), ScriptedInstaller::default());
        let mut pending = task("later", &[]);
        pending.target_path = "src/image_processing/recognizer.py".to_string();
        let text = "ModuleNotFoundError: No module named 'image_processing.recognizer'";
        assert!(env.detect_missing_dependencies(text, std::slice::from_ref(&pending)).is_empty());
        assert_eq!(
            env.detect_missing_dependencies(text, &[]),
            vec!["image_processing"]
        );
    }

    #[test]
    fn ensure_creates_once_and_installs_requirements() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("requirements.txt"), "requests\n").expect("write");
        let mut env = manager(temp.path(), ScriptedInstaller::default());

        env.ensure_environment().expect("ensure");
        env.ensure_environment().expect("ensure again");

        let calls = env.installer().calls();
        assert_eq!(calls, vec!["create venv", "install -r requirements.txt"]);
    }

    #[test]
    fn existing_environment_is_left_alone() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("venv")).expect("dirs");
        let mut env = manager(temp.path(), ScriptedInstaller::default());
        env.ensure_environment().expect("ensure");
        assert!(env.installer().calls().is_empty());
    }

    #[test]
    fn install_attempts_each_name_once_and_continues_past_failures() {
        let temp = tempfile::tempdir().expect("tempdir");
        let installer = ScriptedInstaller::failing(&["broken-pkg"]);
        let mut env = manager(temp.path(), installer);

        let names = vec!["broken-pkg".to_string(), "numpy".to_string()];
        let results = env.install(&names).expect("install");
        assert_eq!(
            results,
            vec![("broken-pkg".to_string(), false), ("numpy".to_string(), true)]
        );

        assert!(env.install(&names).expect("again").is_empty());
        let installs: Vec<String> = env
            .installer()
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("install"))
            .collect();
        assert_eq!(installs, vec!["install broken-pkg", "install numpy"]);
    }
}
