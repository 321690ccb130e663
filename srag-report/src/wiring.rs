//! Assembles the production engine from configuration.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::debug;

use crate::engine::{Engine, EngineOptions, EngineTasks};
use crate::io::columns::LlmColumnMapper;
use crate::io::config::AppConfig;
use crate::io::dataset::{CsvDatasetCleaner, HttpDatasetSource};
use crate::io::http::build_client;
use crate::io::llm::{LlmClient, OpenAiCompatClient};
use crate::io::news::{LlmArticleCurator, RssNewsSearch};
use crate::io::rate_limit::RateLimiter;
use crate::io::render::HtmlReportRenderer;
use crate::tasks::{CurateTask, DownloadTask, ProcessTask, ReportTask};

/// Dataset exports are large; give the transfer room.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);
const PAGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Engine options taken from `[engine]` and `[news_policy]`.
pub fn engine_options(cfg: &AppConfig) -> EngineOptions {
    EngineOptions {
        news_policy: cfg.news_policy,
        scheduling: cfg.engine.scheduling,
        join_timeout: cfg.engine.join_timeout(),
    }
}

/// Build an engine wired to the real collaborators.
pub fn build_engine(cfg: &AppConfig, options: EngineOptions) -> Result<Engine> {
    fs::create_dir_all(&cfg.data_dir)
        .with_context(|| format!("create data dir {}", cfg.data_dir.display()))?;
    fs::create_dir_all(&cfg.output_dir)
        .with_context(|| format!("create output dir {}", cfg.output_dir.display()))?;

    let download_client = build_client(DOWNLOAD_TIMEOUT)?;
    let page_client = build_client(PAGE_TIMEOUT)?;
    let llm: Arc<dyn LlmClient> = Arc::new(OpenAiCompatClient::from_config(&cfg.llm)?);
    let limiter = Arc::new(RateLimiter::per_minute(cfg.api_calls_per_minute));
    let retry = cfg.retry.policy();
    debug!(min_interval = ?limiter.min_interval(), ?retry, "collaborators configured");

    let tasks = EngineTasks {
        download: Arc::new(DownloadTask::new(
            Arc::new(HttpDatasetSource::new(
                download_client,
                cfg.dataset_url.clone(),
                cfg.data_dir.clone(),
            )),
            retry,
        )),
        process: Arc::new(ProcessTask::new(
            Arc::new(LlmColumnMapper::new(llm.clone())),
            Arc::new(CsvDatasetCleaner::default()),
            limiter.clone(),
        )),
        curate: Arc::new(CurateTask::new(
            Arc::new(RssNewsSearch::new(
                page_client.clone(),
                cfg.search_feed_url.clone(),
            )),
            Arc::new(LlmArticleCurator::new(
                Arc::new(page_client),
                llm,
                limiter.clone(),
                retry,
            )?),
            limiter,
            retry,
            cfg.default_topic.clone(),
            cfg.max_news_results,
        )),
        report: Arc::new(ReportTask::new(
            Arc::new(HtmlReportRenderer::new(
                cfg.output_dir.clone(),
                cfg.max_reports,
            )),
            cfg.default_topic.clone(),
        )),
    };
    Engine::new(tasks, options)
}
