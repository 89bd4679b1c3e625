//! Side-effecting adapters: filesystem, child processes, oracle backends.

pub mod config;
pub mod environment;
pub mod ledger;
pub mod oracle;
pub mod process;
pub mod project;
pub mod prompt;
pub mod sandbox;
pub mod symbols;
