//! HTML report rendering and output directory housekeeping.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use minijinja::Environment;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{Article, Metrics};
use crate::error::CollaboratorError;

const REPORT_TEMPLATE: &str = include_str!("templates/report.html");

/// Everything the report shows.
#[derive(Debug, Clone, Serialize)]
pub struct ReportData {
    pub topic: String,
    /// Refined dataset path, or `N/A`.
    pub refined_dataset_path: String,
    pub metrics: Metrics,
    pub articles: Vec<Article>,
    /// Errors accumulated so far, embedded as caveats.
    pub errors: Vec<String>,
}

/// Writes the final report artifact.
pub trait ReportRenderer: Send + Sync {
    fn render(&self, data: &ReportData) -> Result<PathBuf, CollaboratorError>;
}

/// Renders `report_YYYYmmdd_HHMMSS.html` into the output directory.
pub struct HtmlReportRenderer {
    output_dir: PathBuf,
    max_reports: usize,
    env: Environment<'static>,
}

impl HtmlReportRenderer {
    pub fn new(output_dir: impl Into<PathBuf>, max_reports: usize) -> Self {
        let mut env = Environment::new();
        env.add_template("report.html", REPORT_TEMPLATE)
            .expect("report template should be valid");
        Self {
            output_dir: output_dir.into(),
            max_reports,
            env,
        }
    }

    fn next_report_path(&self) -> PathBuf {
        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let mut path = self.output_dir.join(format!("report_{stamp}.html"));
        let mut suffix = 1;
        while path.exists() {
            path = self.output_dir.join(format!("report_{stamp}_{suffix}.html"));
            suffix += 1;
        }
        path
    }
}

impl ReportRenderer for HtmlReportRenderer {
    #[instrument(skip_all, fields(topic = %data.topic, articles = data.articles.len()))]
    fn render(&self, data: &ReportData) -> Result<PathBuf, CollaboratorError> {
        let template = self
            .env
            .get_template("report.html")
            .map_err(|err| CollaboratorError::permanent(format!("load report template: {err}")))?;
        let html = template
            .render(minijinja::context! {
                topic => &data.topic,
                generated_at => Local::now().format("%d/%m/%Y %H:%M:%S").to_string(),
                refined_dataset_path => &data.refined_dataset_path,
                metrics => &data.metrics,
                articles => &data.articles,
                errors => &data.errors,
            })
            .map_err(|err| CollaboratorError::permanent(format!("render report: {err}")))?;

        fs::create_dir_all(&self.output_dir)?;
        let path = self.next_report_path();
        fs::write(&path, html)?;
        info!(path = %path.display(), "report written");

        match cleanup_old_reports(&self.output_dir, self.max_reports) {
            Ok(0) => {}
            Ok(removed) => debug!(removed, "old reports removed"),
            Err(err) => warn!(err = %err, "failed to clean up old reports"),
        }
        Ok(path)
    }
}

/// Delete all but the newest `keep` `report_*.html` files. Returns the
/// number deleted.
pub fn cleanup_old_reports(dir: &Path, keep: usize) -> std::io::Result<usize> {
    let mut reports: Vec<String> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with("report_") && name.ends_with(".html"))
        .collect();
    // Timestamped names sort chronologically.
    reports.sort_unstable_by(|a, b| b.cmp(a));

    let mut removed = 0;
    for name in reports.iter().skip(keep) {
        fs::remove_file(dir.join(name))?;
        removed += 1;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> ReportData {
        ReportData {
            topic: "SRAG".to_string(),
            refined_dataset_path: "data/refined_dataset.csv".to_string(),
            metrics: Metrics {
                total_cases: 42,
                states_affected: Some(3),
                death_count: None,
                ..Metrics::default()
            },
            articles: vec![
                Article::new("Alta de <casos>", "Resumo.", "https://n/a", "2025-10-01")
                    .expect("article"),
            ],
            errors: vec!["insufficient news: curated 1 article(s), need at least 3".to_string()],
        }
    }

    #[test]
    fn renders_report_with_escaped_content() {
        let temp = tempfile::tempdir().expect("tempdir");
        let renderer = HtmlReportRenderer::new(temp.path().join("out"), 3);

        let path = renderer.render(&data()).expect("render");
        let name = path.file_name().and_then(|n| n.to_str()).expect("name");
        assert!(name.starts_with("report_") && name.ends_with(".html"));

        let html = fs::read_to_string(&path).expect("read report");
        assert!(html.contains("<td>42</td>"));
        assert!(html.contains("Estados afetados"));
        assert!(!html.contains("Óbitos"));
        assert!(html.contains("Alta de &lt;casos&gt;"));
        assert!(html.contains("insufficient news"));
    }

    #[test]
    fn same_second_renders_do_not_collide() {
        let temp = tempfile::tempdir().expect("tempdir");
        let renderer = HtmlReportRenderer::new(temp.path(), 5);
        let first = renderer.render(&data()).expect("first");
        let second = renderer.render(&data()).expect("second");
        assert_ne!(first, second);
        assert!(first.exists() && second.exists());
    }

    #[test]
    fn cleanup_keeps_newest_reports() {
        let temp = tempfile::tempdir().expect("tempdir");
        for name in [
            "report_20250101_000000.html",
            "report_20250301_000000.html",
            "report_20250201_000000.html",
            "notes.html",
        ] {
            fs::write(temp.path().join(name), "").expect("write");
        }

        let removed = cleanup_old_reports(temp.path(), 2).expect("cleanup");
        assert_eq!(removed, 1);
        assert!(!temp.path().join("report_20250101_000000.html").exists());
        assert!(temp.path().join("report_20250301_000000.html").exists());
        assert!(temp.path().join("notes.html").exists());
    }
}
