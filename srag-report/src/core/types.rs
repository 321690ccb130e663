//! Shared value types for workflow state.
//!
//! These types carry no behaviour beyond construction-time validation. They are
//! produced by Tasks and read by the engine, barrier and report renderer.

use serde::{Deserialize, Serialize};

/// A curated news article.
///
/// Articles are immutable once constructed: fields are private and only the
/// validating constructor (or deserialization, which routes through it) can
/// produce one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ArticleFields")]
pub struct Article {
    title: String,
    summary: String,
    original_link: String,
    date: String,
}

#[derive(Deserialize)]
struct ArticleFields {
    title: String,
    summary: String,
    original_link: String,
    date: String,
}

impl TryFrom<ArticleFields> for Article {
    type Error = String;

    fn try_from(fields: ArticleFields) -> Result<Self, Self::Error> {
        Article::new(
            fields.title,
            fields.summary,
            fields.original_link,
            fields.date,
        )
    }
}

impl Article {
    /// Build an article, rejecting blank fields and links that are not
    /// `http(s)` URLs.
    pub fn new(
        title: impl Into<String>,
        summary: impl Into<String>,
        original_link: impl Into<String>,
        date: impl Into<String>,
    ) -> Result<Self, String> {
        let article = Self {
            title: title.into().trim().to_string(),
            summary: summary.into().trim().to_string(),
            original_link: original_link.into().trim().to_string(),
            date: date.into().trim().to_string(),
        };
        for (name, value) in [
            ("title", &article.title),
            ("summary", &article.summary),
            ("original_link", &article.original_link),
            ("date", &article.date),
        ] {
            if value.is_empty() {
                return Err(format!("article {name} must not be empty"));
            }
        }
        if !is_web_link(&article.original_link) {
            return Err(format!(
                "article original_link must be an http(s) URL: {}",
                article.original_link
            ));
        }
        Ok(article)
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn original_link(&self) -> &str {
        &self.original_link
    }

    /// Publication date, `YYYY-MM-DD`.
    pub fn date(&self) -> &str {
        &self.date
    }
}

/// Whether `link` is an absolute `http://` or `https://` URL.
pub fn is_web_link(link: &str) -> bool {
    let link = link.trim();
    ["http://", "https://"].iter().any(|scheme| {
        link.len() > scheme.len()
            && link
                .get(..scheme.len())
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
    })
}

/// Raw search hit returned by the news search collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawNewsItem {
    pub title: String,
    pub link: String,
    pub date: String,
    pub source: String,
    pub body: String,
}

/// Summary metrics computed from the refined dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    pub total_cases: u64,
    pub states_affected: Option<u64>,
    pub hospitalized_count: Option<u64>,
    pub uti_count: Option<u64>,
    pub death_count: Option<u64>,
    /// Set when the dataset could not be read; counts are then zero/absent.
    pub error: Option<String>,
}
