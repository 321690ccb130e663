use std::sync::Arc;

use tracing::{error, info};

use crate::core::backoff::RetryPolicy;
use crate::core::state::{StateDelta, WorkflowState};
use crate::io::dataset::DatasetSource;
use crate::io::retry::retry_transient;

use super::{DOWNLOAD, Task};

/// Acquires the raw dataset, retrying transient failures.
pub struct DownloadTask {
    source: Arc<dyn DatasetSource>,
    retry: RetryPolicy,
}

impl DownloadTask {
    pub fn new(source: Arc<dyn DatasetSource>, retry: RetryPolicy) -> Self {
        Self { source, retry }
    }
}

impl Task for DownloadTask {
    fn name(&self) -> &'static str {
        DOWNLOAD
    }

    fn execute(&self, state: &WorkflowState) -> StateDelta {
        if let Some(existing) = &state.raw_dataset_path {
            info!(path = %existing.display(), "raw dataset already set; skipping download");
            return StateDelta::default();
        }

        match retry_transient(&self.retry, "dataset download", |_| self.source.fetch()) {
            Ok(path) if path.as_os_str().is_empty() => {
                let message = "Dataset download failed - no path returned";
                error!("{message}");
                StateDelta::error(message)
            }
            Ok(path) => {
                info!(path = %path.display(), "dataset ready");
                StateDelta {
                    raw_dataset_path: Some(path),
                    ..StateDelta::default()
                }
            }
            Err(err) => {
                let message = format!("Dataset download failed - {err}");
                error!("{message}");
                StateDelta::error(message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollaboratorError;
    use crate::test_support::ScriptedDatasetSource;
    use std::path::PathBuf;

    fn task(source: &Arc<ScriptedDatasetSource>) -> DownloadTask {
        DownloadTask::new(source.clone(), RetryPolicy::immediate(3))
    }

    /// Verifies two transient failures followed by success leave no error.
    #[test]
    fn transient_failures_then_success() {
        let source = Arc::new(ScriptedDatasetSource::new(vec![
            Err(CollaboratorError::transient("reset")),
            Err(CollaboratorError::transient("timeout")),
            Ok(PathBuf::from("data/INFLUD25.csv")),
        ]));

        let delta = task(&source).execute(&WorkflowState::default());
        assert_eq!(delta.raw_dataset_path, Some(PathBuf::from("data/INFLUD25.csv")));
        assert!(delta.errors.is_empty());
        assert_eq!(source.calls(), 3);
    }

    /// Verifies exhausted retries yield exactly one error and no path.
    #[test]
    fn exhausted_retries_record_one_error() {
        let source = Arc::new(ScriptedDatasetSource::new(vec![
            Err(CollaboratorError::transient("reset")),
            Err(CollaboratorError::transient("reset")),
            Err(CollaboratorError::transient("reset")),
            Ok(PathBuf::from("never.csv")),
        ]));

        let delta = task(&source).execute(&WorkflowState::default());
        assert_eq!(delta.raw_dataset_path, None);
        assert_eq!(delta.errors.len(), 1);
        assert!(delta.errors[0].starts_with("Dataset download failed"));
        assert_eq!(source.calls(), 3);
    }

    #[test]
    fn permanent_failure_is_not_retried() {
        let source = Arc::new(ScriptedDatasetSource::new(vec![Err(
            CollaboratorError::permanent("http 404: missing"),
        )]));

        let delta = task(&source).execute(&WorkflowState::default());
        assert_eq!(delta.errors.len(), 1);
        assert_eq!(source.calls(), 1);
    }

    #[test]
    fn empty_path_counts_as_failure() {
        let source = Arc::new(ScriptedDatasetSource::new(vec![Ok(PathBuf::new())]));
        let delta = task(&source).execute(&WorkflowState::default());
        assert_eq!(delta.raw_dataset_path, None);
        assert_eq!(delta.errors, vec!["Dataset download failed - no path returned"]);
    }
}
