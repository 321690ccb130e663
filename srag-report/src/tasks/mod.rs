//! Workflow Tasks.
//!
//! A Task reads a state snapshot and returns a [`StateDelta`]. It never
//! returns an error or mutates shared state: failures become entries in
//! `StateDelta::errors`, alongside whatever partial fields could still be
//! produced. Prerequisites missing because an earlier Task failed are
//! reported as new errors, never as panics.

mod curate;
mod download;
mod process;
mod report;

pub use curate::CurateTask;
pub use download::DownloadTask;
pub use process::ProcessTask;
pub use report::ReportTask;

use crate::core::state::{StateDelta, WorkflowState};

pub const DOWNLOAD: &str = "download";
pub const PROCESS: &str = "process";
pub const CURATE: &str = "curate";
pub const REPORT: &str = "report";

/// A named unit of work in the workflow graph.
pub trait Task: Send + Sync {
    fn name(&self) -> &'static str;
    fn execute(&self, state: &WorkflowState) -> StateDelta;
}
