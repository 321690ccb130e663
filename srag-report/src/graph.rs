//! Fixed workflow topology.
//!
//! ```text
//! start ─┬─ download ─ process ─┐
//!        └─ curate ─────────────┴─ barrier ─(report)─ report ─ end
//!                                        └─(terminate)──────── end
//! ```

use anyhow::{Result, bail};

use crate::core::barrier::BranchId;
use crate::core::router::Route;
use crate::tasks::{CURATE, DOWNLOAD, PROCESS, REPORT, Task};

pub const START: &str = "start";
pub const BARRIER: &str = "barrier";
pub const END: &str = "end";

/// Task names of each branch, in execution order.
pub fn branch_tasks(branch: BranchId) -> &'static [&'static str] {
    match branch {
        BranchId::Data => &[DOWNLOAD, PROCESS],
        BranchId::News => &[CURATE],
    }
}

/// Directed edge; `route` is set on the barrier's conditional edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub from: &'static str,
    pub to: &'static str,
    pub route: Option<Route>,
}

impl Edge {
    const fn always(from: &'static str, to: &'static str) -> Self {
        Self {
            from,
            to,
            route: None,
        }
    }
}

/// Every edge of the graph.
pub fn edges() -> Vec<Edge> {
    let mut edges = Vec::new();
    for branch in BranchId::ALL {
        let mut previous = START;
        for &task in branch_tasks(branch) {
            edges.push(Edge::always(previous, task));
            previous = task;
        }
        edges.push(Edge::always(previous, BARRIER));
    }
    edges.push(Edge {
        from: BARRIER,
        to: REPORT,
        route: Some(Route::Report),
    });
    edges.push(Edge {
        from: BARRIER,
        to: END,
        route: Some(Route::Terminate),
    });
    edges.push(Edge::always(REPORT, END));
    edges
}

/// Check that `tasks` are exactly the nodes of `branch`, in order.
pub fn validate_branch(branch: BranchId, tasks: &[&dyn Task]) -> Result<()> {
    let expected = branch_tasks(branch);
    let actual: Vec<&str> = tasks.iter().map(|task| task.name()).collect();
    if actual != expected {
        bail!(
            "{branch} branch must run [{}], got [{}]",
            expected.join(", "),
            actual.join(", ")
        );
    }
    Ok(())
}

/// Check that `task` is the report sink.
pub fn validate_report(task: &dyn Task) -> Result<()> {
    if task.name() != REPORT {
        bail!("report sink must be `{REPORT}`, got `{}`", task.name());
    }
    Ok(())
}

/// Mermaid flowchart of the topology.
pub fn to_mermaid() -> String {
    let node = |name: &str| match name {
        START => "start([start])".to_string(),
        END => "finish([end])".to_string(),
        BARRIER => "barrier{barrier}".to_string(),
        other => other.to_string(),
    };
    let mut out = String::from("flowchart TD\n");
    for edge in edges() {
        let label = edge
            .route
            .map(|route| format!("|{}|", route.as_str()))
            .unwrap_or_default();
        out.push_str(&format!(
            "    {} -->{} {}\n",
            node(edge.from),
            label,
            node(edge.to)
        ));
    }
    out
}
