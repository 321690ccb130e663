//! Stable exit codes for `srag-report` commands.

/// Command succeeded; for `run`, a report was produced.
pub const OK: i32 = 0;
/// `run` finished without producing a report.
pub const NO_REPORT: i32 = 1;
/// Invalid configuration, arguments or input files.
pub const INVALID: i32 = 2;
