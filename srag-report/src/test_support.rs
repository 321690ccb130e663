//! Scripted collaborators and fixtures for tests.
//!
//! Each double replays a fixed script and records what it was asked, so tests
//! can drive the workflow without network, LLM or filesystem side effects.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::core::backoff::RetryPolicy;
use crate::core::state::{StateDelta, WorkflowState};
use crate::core::types::{Article, RawNewsItem};
use crate::engine::EngineTasks;
use crate::error::CollaboratorError;
use crate::io::columns::{ColumnMapper, ColumnMapping};
use crate::io::dataset::{DatasetCleaner, DatasetSource};
use crate::io::llm::LlmClient;
use crate::io::news::{ArticleCurator, NewsSearch, PageFetcher};
use crate::io::rate_limit::RateLimiter;
use crate::io::render::{ReportData, ReportRenderer};
use crate::tasks::{CurateTask, DownloadTask, ProcessTask, ReportTask, Task};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Deterministic article `i`.
pub fn article(i: usize) -> Article {
    Article::new(
        format!("Article {i}"),
        format!("Summary {i}"),
        format!("https://news.example/{i}"),
        "2025-10-01",
    )
    .expect("fixture article")
}

/// `n` search hits with distinct links.
pub fn raw_items(n: usize) -> Vec<RawNewsItem> {
    (0..n)
        .map(|i| RawNewsItem {
            title: format!("Hit {i}"),
            link: format!("https://news.example/{i}"),
            date: "2025-10-01".to_string(),
            source: "Example".to_string(),
            body: String::new(),
        })
        .collect()
}

/// Temp directory holding a small raw SRAG export; keep the guard alive for
/// as long as the path is used.
pub fn raw_dataset_file() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("INFLUD25-01-10-2025.csv");
    std::fs::write(
        &path,
        "NU_NOTIFIC;DT_NOTIFIC;SG_UF_NOT;HOSPITAL;UTI;EVOLUCAO\n\
         1;2025-09-01;SP;1;1;1\n\
         2;2025-09-02;RJ;1;2;2\n",
    )
    .expect("write raw dataset");
    (dir, path)
}

/// LLM that replays scripted replies; fails once the script runs out.
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<Value, CollaboratorError>>>,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<Result<Value, CollaboratorError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LlmClient for ScriptedLlm {
    fn complete_json(&self, _system: &str, _user: &str) -> Result<Value, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.replies)
            .pop_front()
            .unwrap_or_else(|| Err(CollaboratorError::permanent("llm script exhausted")))
    }
}

/// Dataset source replaying scripted fetch results.
pub struct ScriptedDatasetSource {
    results: Mutex<VecDeque<Result<PathBuf, CollaboratorError>>>,
    calls: AtomicUsize,
}

impl ScriptedDatasetSource {
    pub fn new(results: Vec<Result<PathBuf, CollaboratorError>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DatasetSource for ScriptedDatasetSource {
    fn fetch(&self) -> Result<PathBuf, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut results = lock(&self.results);
        // The last entry repeats once the script is down to it.
        if results.len() > 1 {
            results
                .pop_front()
                .unwrap_or_else(|| Err(CollaboratorError::permanent("source script exhausted")))
        } else {
            results
                .front()
                .cloned()
                .unwrap_or_else(|| Err(CollaboratorError::permanent("source script exhausted")))
        }
    }
}

/// Page fetcher replaying scripted bodies; fails once the script runs out.
pub struct ScriptedPages {
    pages: Mutex<VecDeque<Result<String, CollaboratorError>>>,
    calls: AtomicUsize,
}

impl ScriptedPages {
    pub fn new(pages: Vec<Result<String, CollaboratorError>>) -> Self {
        Self {
            pages: Mutex::new(pages.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PageFetcher for ScriptedPages {
    fn fetch_page(&self, _url: &str) -> Result<String, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.pages)
            .pop_front()
            .unwrap_or_else(|| Err(CollaboratorError::permanent("page script exhausted")))
    }
}

/// Column mapper that always returns the same result.
pub struct ScriptedMapper {
    result: Result<ColumnMapping, CollaboratorError>,
}

impl ScriptedMapper {
    pub fn returning(result: Result<Vec<String>, CollaboratorError>) -> Self {
        Self {
            result: result.map(ColumnMapping::new),
        }
    }
}

impl ColumnMapper for ScriptedMapper {
    fn map_columns(&self, _raw_path: &Path) -> Result<ColumnMapping, CollaboratorError> {
        self.result.clone()
    }
}

/// Cleaner that always returns the same result and records requested columns.
pub struct ScriptedCleaner {
    result: Result<PathBuf, CollaboratorError>,
    received: Mutex<Vec<Vec<String>>>,
}

impl ScriptedCleaner {
    pub fn returning(result: Result<PathBuf, CollaboratorError>) -> Self {
        Self {
            result,
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn received(&self) -> Vec<Vec<String>> {
        lock(&self.received).clone()
    }
}

impl DatasetCleaner for ScriptedCleaner {
    fn clean(&self, _raw_path: &Path, columns: &[String]) -> Result<PathBuf, CollaboratorError> {
        lock(&self.received).push(columns.to_vec());
        self.result.clone()
    }
}

/// Search replaying scripted results; returns no hits once the script runs out.
pub struct ScriptedSearch {
    results: Mutex<VecDeque<Result<Vec<RawNewsItem>, CollaboratorError>>>,
    topics: Mutex<Vec<String>>,
}

impl ScriptedSearch {
    pub fn new(results: Vec<Result<Vec<RawNewsItem>, CollaboratorError>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            topics: Mutex::new(Vec::new()),
        }
    }

    /// Topics searched so far, one entry per call.
    pub fn topics(&self) -> Vec<String> {
        lock(&self.topics).clone()
    }
}

impl NewsSearch for ScriptedSearch {
    fn search(&self, topic: &str, max_results: usize) -> Result<Vec<RawNewsItem>, CollaboratorError> {
        lock(&self.topics).push(topic.to_string());
        let next = lock(&self.results).pop_front().unwrap_or_else(|| Ok(Vec::new()));
        next.map(|mut items| {
            items.truncate(max_results);
            items
        })
    }
}

/// Curator approving the first `approve` hits it sees and rejecting the rest.
///
/// Links containing `/fail` produce a permanent error instead.
pub struct ApproveFirst {
    approve: usize,
    seen: AtomicUsize,
}

impl ApproveFirst {
    pub fn new(approve: usize) -> Self {
        Self {
            approve,
            seen: AtomicUsize::new(0),
        }
    }
}

impl ArticleCurator for ApproveFirst {
    fn curate(&self, item: &RawNewsItem, _topic: &str) -> Result<Option<Article>, CollaboratorError> {
        if item.link.contains("/fail") {
            return Err(CollaboratorError::permanent("page unavailable"));
        }
        let index = self.seen.fetch_add(1, Ordering::SeqCst);
        if index >= self.approve {
            return Ok(None);
        }
        Article::new(
            item.title.as_str(),
            format!("Summary of {}", item.title),
            item.link.as_str(),
            item.date.as_str(),
        )
        .map(Some)
        .map_err(CollaboratorError::permanent)
    }
}

/// Renderer that always returns the same result and records its inputs.
pub struct ScriptedRenderer {
    result: Result<PathBuf, CollaboratorError>,
    received: Mutex<Vec<ReportData>>,
}

impl ScriptedRenderer {
    pub fn returning(result: Result<PathBuf, CollaboratorError>) -> Self {
        Self {
            result,
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn received(&self) -> Vec<ReportData> {
        lock(&self.received).clone()
    }
}

impl ReportRenderer for ScriptedRenderer {
    fn render(&self, data: &ReportData) -> Result<PathBuf, CollaboratorError> {
        lock(&self.received).push(data.clone());
        self.result.clone()
    }
}

/// Renderer that panics, for run-fatal error tests.
pub struct PanickingRenderer;

impl ReportRenderer for PanickingRenderer {
    fn render(&self, _data: &ReportData) -> Result<PathBuf, CollaboratorError> {
        panic!("template engine crashed");
    }
}

/// Task backed by a closure.
pub struct FnTask<F> {
    name: &'static str,
    run: F,
}

impl<F> FnTask<F>
where
    F: Fn(&WorkflowState) -> StateDelta + Send + Sync,
{
    pub fn new(name: &'static str, run: F) -> Self {
        Self { name, run }
    }
}

impl<F> Task for FnTask<F>
where
    F: Fn(&WorkflowState) -> StateDelta + Send + Sync,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn execute(&self, state: &WorkflowState) -> StateDelta {
        (self.run)(state)
    }
}

/// Collaborators for a fully scripted run.
pub struct ScriptedWorld {
    pub source: Arc<dyn DatasetSource>,
    pub mapper: Arc<dyn ColumnMapper>,
    pub cleaner: Arc<dyn DatasetCleaner>,
    pub search: Arc<dyn NewsSearch>,
    pub curator: Arc<dyn ArticleCurator>,
    pub renderer: Arc<dyn ReportRenderer>,
}

impl ScriptedWorld {
    /// Real Tasks over the scripted collaborators, with no throttling and no
    /// retry delay.
    pub fn tasks(&self) -> EngineTasks {
        let limiter = Arc::new(RateLimiter::unlimited());
        let retry = RetryPolicy::immediate(3);
        EngineTasks {
            download: Arc::new(DownloadTask::new(self.source.clone(), retry)),
            process: Arc::new(ProcessTask::new(
                self.mapper.clone(),
                self.cleaner.clone(),
                limiter.clone(),
            )),
            curate: Arc::new(CurateTask::new(
                self.search.clone(),
                self.curator.clone(),
                limiter,
                retry,
                "SRAG",
                5,
            )),
            report: Arc::new(ReportTask::new(self.renderer.clone(), "SRAG")),
        }
    }
}
