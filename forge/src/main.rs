//! `forge` command line.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use forge::core::quality::is_substantial;
use forge::core::scheduler::order;
use forge::error::PipelineError;
use forge::exit_codes;
use forge::io::config::load_config;
use forge::io::environment::{EnvironmentManager, PipInstaller, venv_interpreter};
use forge::io::oracle::oracle_from_config;
use forge::io::project::{ProjectPaths, load_project_spec};
use forge::io::sandbox::PythonSandbox;
use forge::logging;
use forge::pipeline::{RunOptions, run_pipeline};

#[derive(Parser)]
#[command(
    name = "forge",
    version,
    about = "Generate, verify and repair project artifacts in dependency order"
)]
struct Cli {
    /// Log task lifecycle at info level (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every task of the project until each artifact verifies.
    Run {
        /// Project root containing `config/project.json`.
        #[arg(long, default_value = ".")]
        project: PathBuf,
        /// Skip tasks already marked complete in the development log.
        #[arg(long)]
        resume: bool,
    },
    /// Print task ids in execution order.
    Order {
        #[arg(long, default_value = ".")]
        project: PathBuf,
    },
    /// Check `config/project.json` against the schema and invariants.
    Validate {
        #[arg(long, default_value = ".")]
        project: PathBuf,
    },
    /// Apply the stub detector to a file (exit 0 substantial, 2 not).
    Check { file: PathBuf },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Run { project, resume } => cmd_run(&project, resume),
        Command::Order { project } => cmd_order(&project),
        Command::Validate { project } => cmd_validate(&project),
        Command::Check { file } => cmd_check(&file),
    }
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<PipelineError>() {
        Some(PipelineError::CycleDetected(_)) => exit_codes::CYCLE,
        Some(PipelineError::BudgetExhausted { .. }) => exit_codes::BUDGET_EXHAUSTED,
        Some(PipelineError::SpecInvalid { .. }) | None => exit_codes::INVALID,
    }
}

fn cmd_run(project: &Path, resume: bool) -> Result<i32> {
    let paths = ProjectPaths::new(project);
    load_dotenv(&paths.root)?;
    let cfg = load_config(&paths.config_path)?;
    let oracle = oracle_from_config(&cfg.oracle, cfg.output_limit_bytes)?;
    let installer = PipInstaller::new(&cfg.environment, cfg.output_limit_bytes);
    let mut env = EnvironmentManager::new(&paths.root, &cfg.environment, installer);
    let sandbox = PythonSandbox::new(
        venv_interpreter(env.env_dir()),
        cfg.environment.python.clone(),
        cfg.output_limit_bytes,
    );

    let report = run_pipeline(
        &paths,
        &cfg,
        oracle.as_ref(),
        &sandbox,
        &mut env,
        RunOptions { resume },
    )?;

    for id in &report.skipped {
        println!("skipped  {id} (already complete)");
    }
    for task in report.completed.iter().chain(&report.discovered) {
        let installed = if task.installed.is_empty() {
            String::new()
        } else {
            format!(" [installed: {}]", task.installed.join(", "))
        };
        println!(
            "done     {} ({}) -> {} in {} iteration(s){installed}",
            task.id, task.title, task.target_path, task.iterations
        );
    }
    Ok(exit_codes::OK)
}

fn cmd_order(project: &Path) -> Result<i32> {
    let paths = ProjectPaths::new(project);
    let spec = load_project_spec(&paths.spec_path)?;
    let ordered = order(&spec.tasks).map_err(PipelineError::from)?;
    for task in ordered {
        println!("{}", task.id);
    }
    Ok(exit_codes::OK)
}

fn cmd_validate(project: &Path) -> Result<i32> {
    let paths = ProjectPaths::new(project);
    let spec = load_project_spec(&paths.spec_path)?;
    order(&spec.tasks).map_err(PipelineError::from)?;
    println!("ok: {} ({} tasks)", spec.project_name, spec.tasks.len());
    Ok(exit_codes::OK)
}

fn cmd_check(file: &Path) -> Result<i32> {
    let contents =
        fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
    if is_substantial(&contents) {
        println!("substantial");
        Ok(exit_codes::OK)
    } else {
        println!("not substantial");
        Ok(exit_codes::NOT_SUBSTANTIAL)
    }
}

/// Load oracle credentials from `<root>/.env`, else from the working directory.
fn load_dotenv(root: &Path) -> Result<()> {
    let env_file = root.join(".env");
    if env_file.is_file() {
        dotenvy::from_path(&env_file).with_context(|| format!("load {}", env_file.display()))?;
    } else {
        dotenvy::dotenv().ok();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge::core::scheduler::CycleError;

    #[test]
    fn parse_run_with_resume() {
        let cli = Cli::parse_from(["forge", "run", "--project", "out/demo", "--resume"]);
        match cli.command {
            Command::Run { project, resume } => {
                assert_eq!(project, PathBuf::from("out/demo"));
                assert!(resume);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn parse_defaults_to_current_dir() {
        let cli = Cli::parse_from(["forge", "-v", "order"]);
        assert!(cli.verbose);
        assert!(matches!(cli.command, Command::Order { project } if project == Path::new(".")));
    }

    #[test]
    fn fatal_errors_map_to_exit_codes() {
        let cycle: anyhow::Error = PipelineError::from(CycleError {
            unresolved: vec!["a".into()],
        })
        .into();
        assert_eq!(exit_code_for(&cycle), exit_codes::CYCLE);

        let budget: anyhow::Error = PipelineError::BudgetExhausted {
            id: "a".into(),
            title: "A".into(),
            attempts: 10,
            last_diagnostic: String::new(),
        }
        .into();
        assert_eq!(exit_code_for(&budget), exit_codes::BUDGET_EXHAUSTED);
        assert_eq!(exit_code_for(&anyhow::anyhow!("io")), exit_codes::INVALID);
    }

    #[test]
    fn check_reports_stub_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("stub.py");
        fs::write(&path, "def main():\n    pass\n").expect("write");
        assert_eq!(cmd_check(&path).expect("check"), exit_codes::NOT_SUBSTANTIAL);
    }
}
