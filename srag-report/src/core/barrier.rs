//! Barrier evaluation over the merged branch results.
//!
//! Evaluated exactly once per run, after the join point has collected every
//! branch token (or given up waiting). The outcome is a flag delta for the
//! engine to merge plus any barrier-level errors.

use std::fmt;

use crate::core::router::{NewsPolicy, data_ready, news_ready};
use crate::core::state::{StateDelta, WorkflowState};

/// Independent branch of the workflow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchId {
    Data,
    News,
}

impl BranchId {
    pub const ALL: [BranchId; 2] = [BranchId::Data, BranchId::News];

    pub fn as_str(self) -> &'static str {
        match self {
            BranchId::Data => "data",
            BranchId::News => "news",
        }
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a branch ended from the join point's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchStatus {
    /// Ran every task and posted its token.
    Completed,
    /// Posted a token after a task panicked; later tasks were skipped.
    Aborted,
    /// Never posted (join timed out or the branch vanished).
    Missing,
}

/// Per-branch arrival record handed to [`evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arrivals {
    pub data: BranchStatus,
    pub news: BranchStatus,
    pub timed_out: bool,
}

impl Arrivals {
    pub fn status(&self, branch: BranchId) -> BranchStatus {
        match branch {
            BranchId::Data => self.data,
            BranchId::News => self.news,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierState {
    Waiting,
    BothReady,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarrierDecision {
    pub state: BarrierState,
    pub delta: StateDelta,
}

/// Decide readiness for both branches and build the barrier delta.
///
/// A branch is complete only if it posted a normal completion token and its
/// readiness predicate holds on the merged state.
pub fn evaluate(state: &WorkflowState, arrivals: &Arrivals, policy: NewsPolicy) -> BarrierDecision {
    let mut delta = StateDelta::default();

    let data_complete = arrivals.data == BranchStatus::Completed && data_ready(state);
    let news_complete = arrivals.news == BranchStatus::Completed && news_ready(state, policy);

    for branch in BranchId::ALL {
        if arrivals.status(branch) == BranchStatus::Missing {
            if arrivals.timed_out {
                delta.push_error(format!(
                    "{branch} branch did not reach the barrier before the join timeout"
                ));
            } else {
                delta.push_error(format!("{branch} branch ended without posting completion"));
            }
        }
    }

    if arrivals.news == BranchStatus::Completed {
        let count = state.article_count();
        match policy {
            NewsPolicy::RequireArticles { min_articles } if !news_complete => {
                delta.push_error(format!(
                    "insufficient news: curated {count} article(s), need at least {}",
                    min_articles.max(1)
                ));
            }
            NewsPolicy::AllowEmpty if news_complete && count == 0 => {
                delta.push_error("no news articles curated; report will not include news");
            }
            _ => {}
        }
    }

    if data_complete {
        delta.data_complete = Some(true);
    }
    if news_complete {
        delta.news_complete = Some(true);
    }

    let barrier_state = if data_complete && news_complete {
        delta.ready_for_report = Some(true);
        BarrierState::BothReady
    } else if arrivals.timed_out {
        BarrierState::TimedOut
    } else {
        BarrierState::Waiting
    };

    BarrierDecision {
        state: barrier_state,
        delta,
    }
}
