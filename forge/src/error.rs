//! Typed fatal errors surfaced by the pipeline.
//!
//! Everything recoverable is absorbed by the engine; only these variants reach
//! the driver and abort a run. The CLI downcasts them to pick an exit code.

use thiserror::Error;

use crate::core::scheduler::CycleError;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// `config/project.json` failed schema or invariant validation.
    #[error("invalid project specification:\n- {}", violations.join("\n- "))]
    SpecInvalid { violations: Vec<String> },

    #[error(transparent)]
    CycleDetected(#[from] CycleError),

    /// A task did not reach DONE within the iteration bound.
    #[error(
        "task {id} ({title}) failed verification after {attempts} iterations\nlast diagnostic:\n{last_diagnostic}"
    )]
    BudgetExhausted {
        id: String,
        title: String,
        attempts: u32,
        last_diagnostic: String,
    },
}

/// The oracle did not produce content within the local retry ceiling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("oracle failed after {attempts} attempts: {last_error}")]
pub struct OracleError {
    pub attempts: u32,
    pub last_error: String,
}
