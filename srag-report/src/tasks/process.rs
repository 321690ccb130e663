use std::sync::Arc;

use tracing::{error, info, warn};

use crate::core::state::{StateDelta, WorkflowState};
use crate::io::columns::ColumnMapper;
use crate::io::dataset::DatasetCleaner;
use crate::io::rate_limit::RateLimiter;

use super::{PROCESS, Task};

/// Maps columns and cleans the raw dataset into the refined one.
pub struct ProcessTask {
    mapper: Arc<dyn ColumnMapper>,
    cleaner: Arc<dyn DatasetCleaner>,
    limiter: Arc<RateLimiter>,
}

impl ProcessTask {
    pub fn new(
        mapper: Arc<dyn ColumnMapper>,
        cleaner: Arc<dyn DatasetCleaner>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            mapper,
            cleaner,
            limiter,
        }
    }
}

impl Task for ProcessTask {
    fn name(&self) -> &'static str {
        PROCESS
    }

    fn execute(&self, state: &WorkflowState) -> StateDelta {
        let Some(raw_path) = &state.raw_dataset_path else {
            let message = "No raw dataset available for processing";
            error!("{message}");
            return StateDelta::error(message);
        };
        if !raw_path.exists() {
            let message = format!("Raw dataset file not found: {}", raw_path.display());
            error!("{message}");
            return StateDelta::error(message);
        }

        let mut delta = StateDelta::default();

        // Column mapping may call the LLM.
        self.limiter.wait_until_allowed();
        let columns = match self.mapper.map_columns(raw_path) {
            Ok(mapping) => {
                if let Some(warning) = mapping.warning {
                    delta.push_error(warning);
                }
                if mapping.columns.is_empty() {
                    let message = "Column validation returned no columns; keeping all columns";
                    warn!("{message}");
                    delta.push_error(message);
                } else {
                    info!(count = mapping.columns.len(), "selected columns for refinement");
                    delta.metadata_valid = Some(true);
                }
                mapping.columns
            }
            Err(err) => {
                let message = format!("Column validation failed: {err}; keeping all columns");
                warn!("{message}");
                delta.push_error(message);
                Vec::new()
            }
        };

        match self.cleaner.clean(raw_path, &columns) {
            Ok(path) if path.as_os_str().is_empty() => {
                let message = "Data cleaning failed - no path returned";
                error!("{message}");
                delta.push_error(message);
            }
            Ok(path) => {
                info!(path = %path.display(), "refined dataset ready");
                delta.refined_dataset_path = Some(path);
            }
            Err(err) => {
                let message = format!("Data cleaning failed - {err}");
                error!("{message}");
                delta.push_error(message);
            }
        }
        delta
    }
}
