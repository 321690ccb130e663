//! Two-phase join point for the workflow branches.
//!
//! Each branch owns one [`CompletionPoster`] and posts exactly one
//! [`BranchToken`] when it stops. [`JoinPoint::wait`] collects tokens until
//! every expected branch has posted, the optional timeout elapses, or every
//! poster is gone. Readiness is decided afterwards, once, by the barrier.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::core::barrier::{Arrivals, BranchId, BranchStatus};
use crate::core::state::StateDelta;

/// Outcome of one Task inside a branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    pub task: &'static str,
    pub delta: StateDelta,
}

/// Completion signal carrying everything a branch produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchToken {
    pub branch: BranchId,
    /// Task outcomes in execution order.
    pub records: Vec<TaskRecord>,
    /// A Task panicked and the rest of the branch was skipped.
    pub aborted: bool,
}

/// Sending half held by one branch.
#[derive(Debug)]
pub struct CompletionPoster {
    branch: BranchId,
    tx: Sender<BranchToken>,
}

impl CompletionPoster {
    pub fn branch(&self) -> BranchId {
        self.branch
    }

    /// Post this branch's token. Consumes the poster, so a branch posts once.
    pub fn post(self, records: Vec<TaskRecord>, aborted: bool) {
        let token = BranchToken {
            branch: self.branch,
            records,
            aborted,
        };
        if self.tx.send(token).is_err() {
            // Join point already gave up (timeout); the token is discarded.
            debug!(branch = %self.branch, "join point closed before branch posted");
        }
    }
}

/// What the join point saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Tokens in arrival order.
    pub tokens: Vec<BranchToken>,
    pub timed_out: bool,
}

impl JoinOutcome {
    pub fn arrivals(&self) -> Arrivals {
        let status = |branch: BranchId| {
            self.tokens
                .iter()
                .find(|token| token.branch == branch)
                .map_or(BranchStatus::Missing, |token| {
                    if token.aborted {
                        BranchStatus::Aborted
                    } else {
                        BranchStatus::Completed
                    }
                })
        };
        Arrivals {
            data: status(BranchId::Data),
            news: status(BranchId::News),
            timed_out: self.timed_out,
        }
    }
}

/// Receiving half, owned by the engine.
#[derive(Debug)]
pub struct JoinPoint {
    rx: Receiver<BranchToken>,
    expected: Vec<BranchId>,
}

impl JoinPoint {
    /// Join point expecting one token from each of `branches`, plus the
    /// matching posters in the same order.
    pub fn new(branches: &[BranchId]) -> (Self, Vec<CompletionPoster>) {
        let (tx, rx) = mpsc::channel();
        let posters = branches
            .iter()
            .map(|&branch| CompletionPoster {
                branch,
                tx: tx.clone(),
            })
            .collect();
        (
            Self {
                rx,
                expected: branches.to_vec(),
            },
            posters,
        )
    }

    /// Block until every expected branch has posted, `timeout` elapses, or
    /// all posters are dropped.
    pub fn wait(self, timeout: Option<Duration>) -> JoinOutcome {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut tokens: Vec<BranchToken> = Vec::with_capacity(self.expected.len());
        let mut timed_out = false;

        while tokens.len() < self.expected.len() {
            let received = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    self.rx.recv_timeout(remaining)
                }
                None => self.rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(token) => {
                    debug!(branch = %token.branch, aborted = token.aborted, "branch posted");
                    tokens.push(token);
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(arrived = tokens.len(), "join timed out");
                    timed_out = true;
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    warn!(arrived = tokens.len(), "all branches gone before join completed");
                    break;
                }
            }
        }
        JoinOutcome { tokens, timed_out }
    }
}
