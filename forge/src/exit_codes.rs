//! Stable exit codes for forge CLI commands.

/// Command succeeded; for `forge check`, the file is substantial.
pub const OK: i32 = 0;
/// Invalid project layout/config/specification or other errors.
pub const INVALID: i32 = 1;
/// `forge check` judged the file to be a stub.
pub const NOT_SUBSTANTIAL: i32 = 2;
/// A task exhausted its iteration budget.
pub const BUDGET_EXHAUSTED: i32 = 3;
/// The task dependency graph contains a cycle.
pub const CYCLE: i32 = 4;
