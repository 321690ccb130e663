//! News search and LLM-backed article curation.

use std::sync::{Arc, LazyLock};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate};
use jsonschema::{Draft, Validator};
use regex::Regex;
use reqwest::blocking::Client;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::core::backoff::RetryPolicy;
use crate::core::types::{Article, RawNewsItem, is_web_link};
use crate::error::CollaboratorError;
use crate::io::http::get_text;
use crate::io::llm::LlmClient;
use crate::io::prompt::{CURATE_ARTICLE_SYSTEM, PromptEngine};
use crate::io::rate_limit::RateLimiter;
use crate::io::retry::retry_transient;

const CURATED_ARTICLE_SCHEMA: &str = include_str!("../../schemas/curated_article.schema.json");

/// Pages with less extracted text than this are not worth curating.
pub const MIN_ARTICLE_CHARS: usize = 100;
/// Article text sent to the LLM is cut to this many characters.
pub const MAX_ARTICLE_CHARS: usize = 5_000;

/// Finds candidate news items for a topic.
pub trait NewsSearch: Send + Sync {
    /// Up to `max_results` items; an empty result is not an error.
    fn search(&self, topic: &str, max_results: usize) -> Result<Vec<RawNewsItem>, CollaboratorError>;
}

/// Decides relevance of one search hit and summarizes it.
pub trait ArticleCurator: Send + Sync {
    /// `Ok(None)` means irrelevant or unusable, which is not an error.
    fn curate(&self, item: &RawNewsItem, topic: &str) -> Result<Option<Article>, CollaboratorError>;
}

/// Fetches the body of an article page.
pub trait PageFetcher: Send + Sync {
    fn fetch_page(&self, url: &str) -> Result<String, CollaboratorError>;
}

impl PageFetcher for Client {
    fn fetch_page(&self, url: &str) -> Result<String, CollaboratorError> {
        get_text(self, url)
    }
}

/// Search backed by an RSS feed URL template containing `{query}`.
pub struct RssNewsSearch {
    client: Client,
    feed_url: String,
}

impl RssNewsSearch {
    pub fn new(client: Client, feed_url: impl Into<String>) -> Self {
        Self {
            client,
            feed_url: feed_url.into(),
        }
    }

    fn url_for(&self, topic: &str) -> String {
        self.feed_url
            .replace("{query}", &urlencoding::encode(topic.trim()))
    }
}

impl NewsSearch for RssNewsSearch {
    #[instrument(skip(self))]
    fn search(&self, topic: &str, max_results: usize) -> Result<Vec<RawNewsItem>, CollaboratorError> {
        let feed = get_text(&self.client, &self.url_for(topic))?;
        let items = parse_rss_items(&feed, max_results);
        info!(found = items.len(), "news search finished");
        Ok(items)
    }
}

/// Parse `<item>` entries of an RSS document, skipping entries whose link is
/// missing or not an `http(s)` URL.
pub fn parse_rss_items(feed: &str, max_results: usize) -> Vec<RawNewsItem> {
    static ITEM: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)<item\b[^>]*>(.*?)</item>").expect("item regex"));

    ITEM.captures_iter(feed)
        .filter_map(|caps| {
            let fields = ItemFields::parse(&caps[1]);
            if !is_web_link(&fields.link) {
                debug!(link = %fields.link, "feed item without usable link skipped");
                return None;
            }
            Some(RawNewsItem {
                title: fields.title,
                link: fields.link,
                date: rss_date(&fields.pub_date),
                source: fields.source,
                body: html_to_text(&fields.description),
            })
        })
        .take(max_results)
        .collect()
}

/// Text of the child elements of one `<item>`; the first occurrence wins.
#[derive(Debug, Default)]
struct ItemFields {
    title: String,
    link: String,
    pub_date: String,
    source: String,
    description: String,
}

impl ItemFields {
    fn parse(body: &str) -> Self {
        static FIELD: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(
                r"(?s)<(title|link|pubDate|source|description)\b[^>]*>(.*?)</(?:title|link|pubDate|source|description)>",
            )
            .expect("item field regex")
        });

        let mut fields = Self::default();
        for caps in FIELD.captures_iter(body) {
            let slot = match &caps[1] {
                "title" => &mut fields.title,
                "link" => &mut fields.link,
                "pubDate" => &mut fields.pub_date,
                "source" => &mut fields.source,
                _ => &mut fields.description,
            };
            if slot.is_empty() {
                *slot = field_text(&caps[2]);
            }
        }
        fields
    }
}

fn field_text(raw: &str) -> String {
    let raw = raw.trim();
    let raw = raw
        .strip_prefix("<![CDATA[")
        .and_then(|rest| rest.strip_suffix("]]>"))
        .unwrap_or(raw);
    decode_entities(raw).trim().to_string()
}

/// RFC 2822 `pubDate` as `YYYY-MM-DD`; empty when unparseable.
fn rss_date(raw: &str) -> String {
    DateTime::parse_from_rfc2822(raw.trim())
        .map(|date| date.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

/// Resolve character references (named and numeric) in a text field.
fn decode_entities(text: &str) -> String {
    Html::parse_fragment(text).root_element().text().collect()
}

/// Elements whose text is never shown to a reader.
const HIDDEN_ELEMENTS: [&str; 5] = ["head", "script", "style", "noscript", "template"];

/// Visible text of an HTML page or fragment.
///
/// Reads the first `<article>`, else `<main>`, else `<body>`, with whitespace
/// collapsed to single spaces.
pub fn html_to_text(html: &str) -> String {
    static CONTENT_ROOTS: LazyLock<[Selector; 3]> = LazyLock::new(|| {
        ["article", "main", "body"].map(|css| Selector::parse(css).expect("content selector"))
    });

    let document = Html::parse_document(html);
    let root = CONTENT_ROOTS
        .iter()
        .find_map(|selector| document.select(selector).next())
        .unwrap_or_else(|| document.root_element());
    visible_text(root)
}

fn visible_text(root: ElementRef<'_>) -> String {
    let mut chunks: Vec<&str> = Vec::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|element| HIDDEN_ELEMENTS.contains(&element.name()))
        });
        if !hidden {
            chunks.push(text);
        }
    }
    chunks
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Deserialize)]
struct CurationReply {
    relevant: bool,
    #[serde(default)]
    title: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    date: String,
    #[serde(default)]
    reason: String,
}

/// Fetches the article page and lets the LLM judge and summarize it.
///
/// The page fetch and the LLM call each take one slot from the shared
/// limiter; only the fetch is retried.
pub struct LlmArticleCurator {
    pages: Arc<dyn PageFetcher>,
    llm: Arc<dyn LlmClient>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    prompts: PromptEngine,
    schema: Validator,
}

impl LlmArticleCurator {
    pub fn new(
        pages: Arc<dyn PageFetcher>,
        llm: Arc<dyn LlmClient>,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let schema: Value =
            serde_json::from_str(CURATED_ARTICLE_SCHEMA).context("parse curated article schema")?;
        let schema = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&schema)
            .context("compile curated article schema")?;
        Ok(Self {
            pages,
            llm,
            limiter,
            retry,
            prompts: PromptEngine::new(),
            schema,
        })
    }

    /// Curate already-extracted article text.
    pub fn curate_text(
        &self,
        item: &RawNewsItem,
        topic: &str,
        text: &str,
    ) -> Result<Option<Article>, CollaboratorError> {
        let chars = text.chars().count();
        if chars < MIN_ARTICLE_CHARS {
            debug!(url = %item.link, chars, "article text too short");
            return Ok(None);
        }
        let text: String = text.chars().take(MAX_ARTICLE_CHARS).collect();
        let prompt = self
            .prompts
            .render_curation(topic, &item.link, &text, Some(item.date.as_str()))
            .map_err(|err| CollaboratorError::permanent(format!("render prompt: {err:#}")))?;

        self.limiter.wait_until_allowed();
        let reply = self.llm.complete_json(CURATE_ARTICLE_SYSTEM, &prompt)?;
        let violations: Vec<String> = self
            .schema
            .iter_errors(&reply)
            .map(|err| err.to_string())
            .collect();
        if !violations.is_empty() {
            return Err(CollaboratorError::permanent(format!(
                "curation reply failed schema validation: {}",
                violations.join("; ")
            )));
        }
        let reply: CurationReply = serde_json::from_value(reply)
            .map_err(|err| CollaboratorError::permanent(format!("parse curation reply: {err}")))?;

        if !reply.relevant {
            debug!(url = %item.link, reason = %reply.reason, "article rejected");
            return Ok(None);
        }
        let title = if reply.title.trim().is_empty() {
            &item.title
        } else {
            &reply.title
        };
        let date = article_date(&reply.date, &item.date);
        let article = Article::new(title.as_str(), reply.summary, item.link.as_str(), date)
            .map_err(CollaboratorError::permanent)?;
        info!(title = article.title(), "article approved");
        Ok(Some(article))
    }
}

impl ArticleCurator for LlmArticleCurator {
    #[instrument(skip_all, fields(url = %item.link))]
    fn curate(&self, item: &RawNewsItem, topic: &str) -> Result<Option<Article>, CollaboratorError> {
        let page = retry_transient(&self.retry, "article fetch", |_| {
            self.limiter.wait_until_allowed();
            self.pages.fetch_page(&item.link)
        })?;
        self.curate_text(item, topic, &html_to_text(&page))
    }
}

/// First valid `YYYY-MM-DD` among the LLM's date and the listing date, else
/// today.
fn article_date(reply_date: &str, listed_date: &str) -> String {
    [reply_date, listed_date]
        .into_iter()
        .map(str::trim)
        .find(|candidate| NaiveDate::parse_from_str(candidate, "%Y-%m-%d").is_ok())
        .map(str::to_string)
        .unwrap_or_else(|| chrono::Local::now().format("%Y-%m-%d").to_string())
}
