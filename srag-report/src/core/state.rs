//! Workflow state and engine-owned merge rules.
//!
//! Tasks never mutate [`WorkflowState`]. They return a [`StateDelta`] and the
//! engine folds it in with [`apply_delta`]:
//!
//! - `errors` is append-only (concatenation).
//! - Set-once fields (`topic`, dataset paths, `news_articles`,
//!   `final_report_path`) are written only while still unset.
//! - `metrics` is latest-wins.
//! - Boolean flags are monotonic: a delta can raise a flag, never clear it.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::types::{Article, Metrics};

/// Progress of a single workflow run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub topic: Option<String>,
    pub raw_dataset_path: Option<PathBuf>,
    pub refined_dataset_path: Option<PathBuf>,
    pub metadata_valid: bool,
    /// `None` until the curation Task has run; `Some(vec![])` means it ran and
    /// found nothing.
    pub news_articles: Option<Vec<Article>>,
    pub metrics: Option<Metrics>,
    pub final_report_path: Option<PathBuf>,
    pub errors: Vec<String>,
    pub data_complete: bool,
    pub news_complete: bool,
    pub ready_for_report: bool,
}

/// Caller-supplied seed for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitialState {
    pub errors: Vec<String>,
    pub topic: Option<String>,
}

impl WorkflowState {
    /// Fresh state for a new run. Every run starts here; nothing carries over.
    pub fn from_initial(initial: InitialState) -> Self {
        Self {
            topic: initial.topic.filter(|t| !t.trim().is_empty()),
            errors: initial.errors,
            ..Self::default()
        }
    }

    pub fn article_count(&self) -> usize {
        self.news_articles.as_ref().map_or(0, Vec::len)
    }
}

/// Partial update produced by a Task or by the barrier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateDelta {
    pub topic: Option<String>,
    pub raw_dataset_path: Option<PathBuf>,
    pub refined_dataset_path: Option<PathBuf>,
    pub metadata_valid: Option<bool>,
    pub news_articles: Option<Vec<Article>>,
    pub metrics: Option<Metrics>,
    pub final_report_path: Option<PathBuf>,
    pub errors: Vec<String>,
    pub data_complete: Option<bool>,
    pub news_complete: Option<bool>,
    pub ready_for_report: Option<bool>,
}

impl StateDelta {
    /// Delta carrying only an error message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            errors: vec![message.into()],
            ..Self::default()
        }
    }

    pub fn push_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// What [`apply_delta`] did with a delta.
///
/// Field lists use the state field names and follow declaration order, so the
/// summary is deterministic for a given delta.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub fields_set: Vec<&'static str>,
    /// Writes rejected because the field was already set (or a flag clear).
    pub fields_ignored: Vec<&'static str>,
    pub errors_appended: usize,
}

/// Fold `delta` into `state` following the merge rules in the module docs.
pub fn apply_delta(state: &mut WorkflowState, delta: StateDelta) -> MergeSummary {
    let mut summary = MergeSummary::default();

    set_once(&mut state.topic, delta.topic, "topic", &mut summary);
    set_once(
        &mut state.raw_dataset_path,
        delta.raw_dataset_path,
        "raw_dataset_path",
        &mut summary,
    );
    set_once(
        &mut state.refined_dataset_path,
        delta.refined_dataset_path,
        "refined_dataset_path",
        &mut summary,
    );
    raise_flag(
        &mut state.metadata_valid,
        delta.metadata_valid,
        "metadata_valid",
        &mut summary,
    );
    set_once(
        &mut state.news_articles,
        delta.news_articles,
        "news_articles",
        &mut summary,
    );
    if let Some(metrics) = delta.metrics {
        state.metrics = Some(metrics);
        summary.fields_set.push("metrics");
    }
    set_once(
        &mut state.final_report_path,
        delta.final_report_path,
        "final_report_path",
        &mut summary,
    );

    summary.errors_appended = delta.errors.len();
    state.errors.extend(delta.errors);

    raise_flag(
        &mut state.data_complete,
        delta.data_complete,
        "data_complete",
        &mut summary,
    );
    raise_flag(
        &mut state.news_complete,
        delta.news_complete,
        "news_complete",
        &mut summary,
    );
    raise_flag(
        &mut state.ready_for_report,
        delta.ready_for_report,
        "ready_for_report",
        &mut summary,
    );

    summary
}

fn set_once<T>(
    slot: &mut Option<T>,
    value: Option<T>,
    name: &'static str,
    summary: &mut MergeSummary,
) {
    let Some(value) = value else {
        return;
    };
    if slot.is_some() {
        summary.fields_ignored.push(name);
        return;
    }
    *slot = Some(value);
    summary.fields_set.push(name);
}

fn raise_flag(
    slot: &mut bool,
    value: Option<bool>,
    name: &'static str,
    summary: &mut MergeSummary,
) {
    match value {
        Some(true) if !*slot => {
            *slot = true;
            summary.fields_set.push(name);
        }
        Some(false) if *slot => summary.fields_ignored.push(name),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(title: &str) -> Article {
        Article::new(title, "summary", "https://example.com", "2025-01-01").expect("article")
    }

    #[test]
    fn errors_concatenate_across_deltas() {
        let mut state = WorkflowState::from_initial(InitialState {
            errors: vec!["seed".to_string()],
            topic: None,
        });
        apply_delta(&mut state, StateDelta::error("first"));
        let summary = apply_delta(&mut state, StateDelta::error("second"));

        assert_eq!(summary.errors_appended, 1);
        assert_eq!(state.errors, vec!["seed", "first", "second"]);
    }

    #[test]
    fn set_once_fields_are_never_overwritten() {
        let mut state = WorkflowState::default();
        apply_delta(
            &mut state,
            StateDelta {
                raw_dataset_path: Some(PathBuf::from("a.csv")),
                ..StateDelta::default()
            },
        );
        let summary = apply_delta(
            &mut state,
            StateDelta {
                raw_dataset_path: Some(PathBuf::from("b.csv")),
                ..StateDelta::default()
            },
        );

        assert_eq!(state.raw_dataset_path, Some(PathBuf::from("a.csv")));
        assert_eq!(summary.fields_ignored, vec!["raw_dataset_path"]);
    }

    #[test]
    fn absent_fields_in_delta_leave_state_untouched() {
        let mut state = WorkflowState {
            refined_dataset_path: Some(PathBuf::from("refined.csv")),
            news_articles: Some(vec![article("a")]),
            ..WorkflowState::default()
        };
        let before = state.clone();

        let summary = apply_delta(&mut state, StateDelta::default());
        assert_eq!(state, before);
        assert_eq!(summary, MergeSummary::default());
    }

    #[test]
    fn empty_article_list_counts_as_set() {
        let mut state = WorkflowState::default();
        apply_delta(
            &mut state,
            StateDelta {
                news_articles: Some(Vec::new()),
                ..StateDelta::default()
            },
        );
        apply_delta(
            &mut state,
            StateDelta {
                news_articles: Some(vec![article("late")]),
                ..StateDelta::default()
            },
        );

        assert_eq!(state.news_articles, Some(Vec::new()));
        assert_eq!(state.article_count(), 0);
    }

    #[test]
    fn metrics_are_latest_wins() {
        let mut state = WorkflowState::default();
        for total in [1, 7] {
            apply_delta(
                &mut state,
                StateDelta {
                    metrics: Some(Metrics {
                        total_cases: total,
                        ..Metrics::default()
                    }),
                    ..StateDelta::default()
                },
            );
        }
        assert_eq!(state.metrics.map(|m| m.total_cases), Some(7));
    }

    #[test]
    fn flags_are_monotonic() {
        let mut state = WorkflowState::default();
        apply_delta(
            &mut state,
            StateDelta {
                news_complete: Some(true),
                ..StateDelta::default()
            },
        );
        let summary = apply_delta(
            &mut state,
            StateDelta {
                news_complete: Some(false),
                data_complete: Some(false),
                ..StateDelta::default()
            },
        );

        assert!(state.news_complete);
        assert!(!state.data_complete);
        assert_eq!(summary.fields_ignored, vec!["news_complete"]);
    }

    #[test]
    fn blank_initial_topic_is_dropped() {
        let state = WorkflowState::from_initial(InitialState {
            errors: Vec::new(),
            topic: Some("   ".to_string()),
        });
        assert_eq!(state.topic, None);
    }
}
