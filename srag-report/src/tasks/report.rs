use std::sync::Arc;

use tracing::{error, info, warn};

use crate::core::state::{StateDelta, WorkflowState};
use crate::core::types::Metrics;
use crate::io::dataset::compute_metrics;
use crate::io::render::{ReportData, ReportRenderer};

use super::{REPORT, Task};

/// Computes metrics and renders the final report.
///
/// Runs at most once per run, after the barrier. Rendering failures are
/// terminal: they are recorded and never retried here.
pub struct ReportTask {
    renderer: Arc<dyn ReportRenderer>,
    default_topic: String,
}

impl ReportTask {
    pub fn new(renderer: Arc<dyn ReportRenderer>, default_topic: impl Into<String>) -> Self {
        Self {
            renderer,
            default_topic: default_topic.into(),
        }
    }
}

impl Task for ReportTask {
    fn name(&self) -> &'static str {
        REPORT
    }

    fn execute(&self, state: &WorkflowState) -> StateDelta {
        let metrics = match &state.refined_dataset_path {
            Some(path) => compute_metrics(path),
            None => {
                warn!("no refined dataset available for metrics");
                Metrics::default()
            }
        };
        info!(total_cases = metrics.total_cases, "metrics calculated");

        let data = ReportData {
            topic: state
                .topic
                .clone()
                .unwrap_or_else(|| self.default_topic.clone()),
            refined_dataset_path: state
                .refined_dataset_path
                .as_ref()
                .map_or_else(|| "N/A".to_string(), |p| p.display().to_string()),
            metrics: metrics.clone(),
            articles: state.news_articles.clone().unwrap_or_default(),
            errors: state.errors.clone(),
        };

        let mut delta = StateDelta {
            metrics: Some(metrics),
            ..StateDelta::default()
        };
        match self.renderer.render(&data) {
            Ok(path) if path.as_os_str().is_empty() => {
                let message = "Report rendering failed - no path returned";
                error!("{message}");
                delta.push_error(message);
            }
            Ok(path) => {
                info!(path = %path.display(), "report created");
                delta.final_report_path = Some(path);
            }
            Err(err) => {
                let message = format!("Report creation failed: {err}");
                error!("{message}");
                delta.push_error(message);
            }
        }
        delta
    }
}
