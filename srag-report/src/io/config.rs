//! Application configuration stored in `srag-report.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::backoff::RetryPolicy;
use crate::core::router::NewsPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "srag-report.toml";

/// Application configuration (TOML).
///
/// Missing fields default to the values used for the SRAG report; environment
/// variables (see [`AppConfig::apply_overrides`]) win over the file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding raw and refined datasets.
    pub data_dir: PathBuf,
    /// Directory receiving rendered reports.
    pub output_dir: PathBuf,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,

    /// Direct URL of the raw dataset CSV.
    pub dataset_url: String,

    pub default_topic: String,
    pub max_news_results: usize,
    /// RSS search URL; `{query}` is replaced by the URL-encoded topic.
    pub search_feed_url: String,

    /// Budget shared by network and LLM calls.
    pub api_calls_per_minute: u32,

    /// Number of rendered reports kept in `output_dir`.
    pub max_reports: usize,

    pub retry: RetryConfig,
    pub llm: LlmConfig,
    pub news_policy: NewsPolicy,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    /// OpenAI-compatible API root (`/chat/completions` is appended).
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    pub scheduling: Scheduling,
    /// Upper bound on waiting for both branches. Unbounded when absent.
    pub join_timeout_secs: Option<u64>,
}

/// How the two branches are driven.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scheduling {
    /// One thread per branch.
    #[default]
    Parallel,
    /// Data branch then news branch on the calling thread.
    DataFirst,
    /// News branch then data branch on the calling thread.
    NewsFirst,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2_000,
            max_delay_ms: 30_000,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.0,
            timeout_secs: 60,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scheduling: Scheduling::Parallel,
            join_timeout_secs: None,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            output_dir: PathBuf::from("output"),
            log_level: "info".to_string(),
            dataset_url:
                "https://s3.sa-east-1.amazonaws.com/ckan.saude.gov.br/SRAG/2025/INFLUD25.csv"
                    .to_string(),
            default_topic: "SRAG".to_string(),
            max_news_results: 5,
            search_feed_url:
                "https://news.google.com/rss/search?q={query}&hl=pt-BR&gl=BR&ceid=BR:pt-419"
                    .to_string(),
            api_calls_per_minute: 30,
            max_reports: 3,
            retry: RetryConfig::default(),
            llm: LlmConfig::default(),
            news_policy: NewsPolicy::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

impl EngineConfig {
    pub fn join_timeout(&self) -> Option<Duration> {
        self.join_timeout_secs.map(Duration::from_secs)
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=20).contains(&self.max_news_results) {
            return Err(anyhow!("max_news_results must be between 1 and 20"));
        }
        if self.api_calls_per_minute == 0 {
            return Err(anyhow!("api_calls_per_minute must be > 0"));
        }
        if self.max_reports == 0 {
            return Err(anyhow!("max_reports must be > 0"));
        }
        if self.default_topic.trim().is_empty() {
            return Err(anyhow!("default_topic must not be empty"));
        }
        if !self.search_feed_url.contains("{query}") {
            return Err(anyhow!("search_feed_url must contain a {{query}} placeholder"));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow!("retry.max_attempts must be > 0"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(anyhow!("retry.base_delay_ms must not exceed retry.max_delay_ms"));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(anyhow!("llm.temperature must be between 0.0 and 2.0"));
        }
        if self.llm.timeout_secs == 0 {
            return Err(anyhow!("llm.timeout_secs must be > 0"));
        }
        if let NewsPolicy::RequireArticles { min_articles: 0 } = self.news_policy {
            return Err(anyhow!(
                "news_policy.min_articles must be > 0 (use mode = \"allow_empty\" instead)"
            ));
        }
        if self.engine.join_timeout_secs == Some(0) {
            return Err(anyhow!("engine.join_timeout_secs must be > 0 when set"));
        }
        Ok(())
    }

    /// Apply environment overrides using `lookup` (normally `std::env::var`).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("OUTPUT_DIR") {
            self.output_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.log_level = v.to_lowercase();
        }
        if let Some(v) = lookup("DEFAULT_TOPIC") {
            self.default_topic = v;
        }
        if let Some(v) = lookup("DATASET_URL") {
            self.dataset_url = v;
        }
        if let Some(v) = lookup("MAX_NEWS_RESULTS") {
            self.max_news_results = v
                .parse()
                .with_context(|| format!("parse MAX_NEWS_RESULTS={v}"))?;
        }
        if let Some(v) = lookup("API_CALLS_PER_MINUTE") {
            self.api_calls_per_minute = v
                .parse()
                .with_context(|| format!("parse API_CALLS_PER_MINUTE={v}"))?;
        }
        if let Some(v) = lookup("LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = lookup("LLM_MODEL_NAME") {
            self.llm.model = v;
        }
        if let Some(v) = lookup("LLM_TEMPERATURE") {
            self.llm.temperature = v
                .parse()
                .with_context(|| format!("parse LLM_TEMPERATURE={v}"))?;
        }
        Ok(())
    }
}

/// Load config from a TOML file, then apply environment overrides.
///
/// If the file is missing, starts from `AppConfig::default()`.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let mut cfg = read_config_file(path)?;
    cfg.apply_overrides(|key| std::env::var(key).ok())?;
    cfg.validate()?;
    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AppConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn missing_file_reads_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = read_config_file(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, AppConfig::default());
        cfg.validate().expect("defaults are valid");
    }

    #[test]
    fn write_then_read_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("srag-report.toml");
        let cfg = AppConfig {
            news_policy: NewsPolicy::AllowEmpty,
            engine: EngineConfig {
                scheduling: Scheduling::NewsFirst,
                join_timeout_secs: Some(120),
            },
            ..AppConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = read_config_file(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("srag-report.toml");
        fs::write(&path, "default_topic = \"Dengue\"\n[retry]\nmax_attempts = 5\n").expect("write");
        let cfg = read_config_file(&path).expect("load");
        assert_eq!(cfg.default_topic, "Dengue");
        assert_eq!(cfg.retry.max_attempts, 5);
        assert_eq!(cfg.retry.base_delay_ms, 2_000);
        assert_eq!(cfg.max_news_results, 5);
    }

    #[test]
    fn env_overrides_win_over_file() {
        let vars: HashMap<&str, &str> = [
            ("DEFAULT_TOPIC", "Influenza"),
            ("MAX_NEWS_RESULTS", "8"),
            ("LOG_LEVEL", "DEBUG"),
        ]
        .into_iter()
        .collect();
        let mut cfg = AppConfig::default();
        cfg.apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .expect("overrides");

        assert_eq!(cfg.default_topic, "Influenza");
        assert_eq!(cfg.max_news_results, 8);
        assert_eq!(cfg.log_level, "debug");
    }

    #[test]
    fn invalid_override_is_an_error() {
        let mut cfg = AppConfig::default();
        let err = cfg
            .apply_overrides(|key| (key == "API_CALLS_PER_MINUTE").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("API_CALLS_PER_MINUTE"));
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let cfg = AppConfig {
            max_news_results: 21,
            ..AppConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = AppConfig {
            news_policy: NewsPolicy::RequireArticles { min_articles: 0 },
            ..AppConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
