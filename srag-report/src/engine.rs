//! Workflow scheduler.
//!
//! Runs both branches from a fresh state, joins them, evaluates the barrier
//! once, routes, and runs the report Task when the route allows it.
//!
//! Branches work on private copies of the initial snapshot; the engine is the
//! only writer of the run's [`WorkflowState`] and merges branch deltas in the
//! order the branch tokens arrive.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info, warn};

use crate::core::barrier::{self, BranchId};
use crate::core::router::{self, NewsPolicy, Route};
use crate::core::state::{InitialState, StateDelta, WorkflowState, apply_delta};
use crate::graph;
use crate::io::config::Scheduling;
use crate::join::{CompletionPoster, JoinPoint, TaskRecord};
use crate::tasks::Task;

/// The four Tasks of the fixed topology.
pub struct EngineTasks {
    pub download: Arc<dyn Task>,
    pub process: Arc<dyn Task>,
    pub curate: Arc<dyn Task>,
    pub report: Arc<dyn Task>,
}

/// Scheduling knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOptions {
    pub news_policy: NewsPolicy,
    pub scheduling: Scheduling,
    /// Maximum wait at the join point; unbounded when `None`.
    pub join_timeout: Option<Duration>,
}

pub struct Engine {
    data: Vec<Arc<dyn Task>>,
    news: Vec<Arc<dyn Task>>,
    report: Arc<dyn Task>,
    options: EngineOptions,
}

impl Engine {
    /// Build the engine, checking the Tasks against the graph topology.
    pub fn new(tasks: EngineTasks, options: EngineOptions) -> Result<Self> {
        let data = vec![tasks.download, tasks.process];
        let news = vec![tasks.curate];
        graph::validate_branch(BranchId::Data, &task_refs(&data))?;
        graph::validate_branch(BranchId::News, &task_refs(&news))?;
        graph::validate_report(tasks.report.as_ref())?;
        Ok(Self {
            data,
            news,
            report: tasks.report,
            options,
        })
    }

    /// Execute one run from `initial` and return the final state.
    pub fn run(&self, initial: InitialState) -> WorkflowState {
        let mut state = WorkflowState::from_initial(initial);
        info!(
            scheduling = ?self.options.scheduling,
            policy = ?self.options.news_policy,
            "workflow started"
        );

        let (join, posters) = JoinPoint::new(&BranchId::ALL);
        self.start_branches(&state, posters);
        let outcome = join.wait(self.options.join_timeout);

        for token in &outcome.tokens {
            for record in &token.records {
                let summary = apply_delta(&mut state, record.delta.clone());
                if !summary.fields_ignored.is_empty() {
                    warn!(
                        task = record.task,
                        fields = ?summary.fields_ignored,
                        "task tried to overwrite set fields"
                    );
                }
            }
        }
        info!(
            refined_dataset = ?state.refined_dataset_path,
            articles = state.article_count(),
            errors = state.errors.len(),
            "pipelines joined"
        );

        let arrivals = outcome.arrivals();
        let decision = barrier::evaluate(&state, &arrivals, self.options.news_policy);
        apply_delta(&mut state, decision.delta);
        info!(
            barrier = ?decision.state,
            data_complete = state.data_complete,
            news_complete = state.news_complete,
            "barrier evaluated"
        );

        let next = router::route(&state, self.options.news_policy);
        info!(route = next.as_str(), "route decided");
        if next == Route::Report {
            let delta = run_guarded(self.report.as_ref(), &state).unwrap_or_else(|message| {
                error!(%message, "report task crashed");
                StateDelta::error(format!("Report Task crashed: {message}"))
            });
            apply_delta(&mut state, delta);
        }

        info!(
            report = ?state.final_report_path,
            errors = state.errors.len(),
            "workflow complete"
        );
        state
    }

    fn start_branches(&self, snapshot: &WorkflowState, posters: Vec<CompletionPoster>) {
        let mut pending: Vec<(CompletionPoster, Vec<Arc<dyn Task>>)> = posters
            .into_iter()
            .map(|poster| {
                let tasks = match poster.branch() {
                    BranchId::Data => self.data.clone(),
                    BranchId::News => self.news.clone(),
                };
                (poster, tasks)
            })
            .collect();

        match self.options.scheduling {
            Scheduling::Parallel => {
                for (poster, tasks) in pending {
                    let snapshot = snapshot.clone();
                    let branch = poster.branch();
                    // Detached: a branch still running after a join timeout is
                    // abandoned and its token discarded.
                    let spawned = thread::Builder::new()
                        .name(format!("{branch}-branch"))
                        .spawn(move || run_branch(&tasks, snapshot, poster));
                    if let Err(err) = spawned {
                        error!(%branch, err = %err, "failed to spawn branch thread");
                    }
                }
            }
            Scheduling::DataFirst | Scheduling::NewsFirst => {
                if self.options.scheduling == Scheduling::NewsFirst {
                    pending.reverse();
                }
                for (poster, tasks) in pending {
                    run_branch(&tasks, snapshot.clone(), poster);
                }
            }
        }
    }
}

fn task_refs(tasks: &[Arc<dyn Task>]) -> Vec<&dyn Task> {
    tasks.iter().map(|task| task.as_ref()).collect()
}

/// Run a branch's Tasks in order on a private copy of the state and post its
/// token. A panicking Task aborts the rest of the branch.
fn run_branch(tasks: &[Arc<dyn Task>], mut local: WorkflowState, poster: CompletionPoster) {
    let branch = poster.branch();
    let mut records = Vec::with_capacity(tasks.len());
    let mut aborted = false;

    for task in tasks {
        info!(%branch, task = task.name(), "task started");
        let delta = match run_guarded(task.as_ref(), &local) {
            Ok(delta) => delta,
            Err(message) => {
                error!(%branch, task = task.name(), %message, "task crashed");
                aborted = true;
                StateDelta::error(format!("{} Task crashed: {message}", task.name()))
            }
        };
        if !delta.errors.is_empty() {
            warn!(%branch, task = task.name(), errors = delta.errors.len(), "task reported errors");
        }
        apply_delta(&mut local, delta.clone());
        records.push(TaskRecord {
            task: task.name(),
            delta,
        });
        if aborted {
            break;
        }
    }
    poster.post(records, aborted);
}

fn run_guarded(task: &dyn Task, state: &WorkflowState) -> Result<StateDelta, String> {
    panic::catch_unwind(AssertUnwindSafe(|| task.execute(state))).map_err(panic_message)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
