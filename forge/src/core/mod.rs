//! Deterministic, pure logic shared by the pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod classifier;
pub mod dependencies;
pub mod extract;
pub mod invariants;
pub mod quality;
pub mod scheduler;
pub mod types;
