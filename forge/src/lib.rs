//! Dependency-ordered generate/verify/repair pipeline.
//!
//! A project declares tasks in `config/project.json`. The pipeline schedules
//! them so producers run before consumers, asks a generation oracle for each
//! artifact, runs the result in a sandbox and repairs failures until the
//! artifact executes cleanly and is not a stub, or the iteration budget runs
//! out. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (scheduling, classification,
//!   quality heuristics, content extraction). No I/O.
//! - **[`io`]**: Side-effecting adapters (filesystem, child processes,
//!   oracle backends, package installation). Behind traits where tests need
//!   to script them.
//!
//! [`engine`] runs one task through the verify/repair state machine and
//! [`pipeline`] drives the whole project.

pub mod core;
pub mod engine;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
