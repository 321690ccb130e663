use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::core::backoff::RetryPolicy;
use crate::core::state::{StateDelta, WorkflowState};
use crate::io::news::{ArticleCurator, NewsSearch};
use crate::io::rate_limit::RateLimiter;
use crate::io::retry::retry_transient;

use super::{CURATE, Task};

/// Searches news for the topic and curates each hit in turn.
///
/// The limiter throttles the search; curators throttle their own calls.
pub struct CurateTask {
    search: Arc<dyn NewsSearch>,
    curator: Arc<dyn ArticleCurator>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    default_topic: String,
    max_results: usize,
}

impl CurateTask {
    pub fn new(
        search: Arc<dyn NewsSearch>,
        curator: Arc<dyn ArticleCurator>,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
        default_topic: impl Into<String>,
        max_results: usize,
    ) -> Self {
        Self {
            search,
            curator,
            limiter,
            retry,
            default_topic: default_topic.into(),
            max_results,
        }
    }
}

impl Task for CurateTask {
    fn name(&self) -> &'static str {
        CURATE
    }

    fn execute(&self, state: &WorkflowState) -> StateDelta {
        let mut delta = StateDelta::default();
        let topic = match &state.topic {
            Some(topic) => topic.clone(),
            None => {
                delta.topic = Some(self.default_topic.clone());
                self.default_topic.clone()
            }
        };
        info!(topic = %topic, max_results = self.max_results, "searching news");

        let items = retry_transient(&self.retry, "news search", |_| {
            self.limiter.wait_until_allowed();
            self.search.search(&topic, self.max_results)
        });
        let items = match items {
            Ok(items) => items,
            Err(err) => {
                let message = format!("News search failed - {err}");
                error!("{message}");
                delta.push_error(message);
                Vec::new()
            }
        };

        let mut articles = Vec::new();
        for item in &items {
            if item.link.trim().is_empty() {
                debug!(title = %item.title, "search hit without link skipped");
                continue;
            }
            match self.curator.curate(item, &topic) {
                Ok(Some(article)) => articles.push(article),
                Ok(None) => debug!(url = %item.link, "article not approved"),
                Err(err) => {
                    let message = format!("Failed to curate {}: {err}", item.link);
                    warn!("{message}");
                    delta.push_error(message);
                }
            }
        }

        info!(
            curated = articles.len(),
            results = items.len(),
            "news curation finished"
        );
        delta.news_articles = Some(articles);
        delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::RawNewsItem;
    use crate::error::CollaboratorError;
    use crate::test_support::{ApproveFirst, ScriptedSearch, raw_items};

    fn task(search: &Arc<ScriptedSearch>, approve: usize) -> CurateTask {
        CurateTask::new(
            search.clone(),
            Arc::new(ApproveFirst::new(approve)),
            Arc::new(RateLimiter::unlimited()),
            RetryPolicy::immediate(3),
            "SRAG",
            5,
        )
    }

    #[test]
    fn curates_approved_items_and_defaults_topic() {
        let search = Arc::new(ScriptedSearch::new(vec![Ok(raw_items(5))]));
        let delta = task(&search, 4).execute(&WorkflowState::default());

        assert_eq!(delta.topic.as_deref(), Some("SRAG"));
        assert_eq!(delta.news_articles.as_ref().map(Vec::len), Some(4));
        assert!(delta.errors.is_empty());
        assert_eq!(search.topics(), vec!["SRAG".to_string()]);
    }

    /// Verifies the task spends limiter slots on the search only.
    #[test]
    fn limiter_covers_search_only() {
        let search = Arc::new(ScriptedSearch::new(vec![Ok(raw_items(3))]));
        let limiter = Arc::new(RateLimiter::unlimited());
        let task = CurateTask::new(
            search,
            Arc::new(ApproveFirst::new(3)),
            limiter.clone(),
            RetryPolicy::immediate(3),
            "SRAG",
            5,
        );
        let delta = task.execute(&WorkflowState::default());

        assert_eq!(delta.news_articles.as_ref().map(Vec::len), Some(3));
        assert_eq!(limiter.granted(), 1);
    }

    #[test]
    fn uses_topic_from_state() {
        let search = Arc::new(ScriptedSearch::new(vec![Ok(Vec::new())]));
        let state = WorkflowState {
            topic: Some("influenza".to_string()),
            ..WorkflowState::default()
        };
        let delta = task(&search, 0).execute(&state);

        assert_eq!(delta.topic, None);
        assert_eq!(delta.news_articles, Some(Vec::new()));
        assert_eq!(search.topics(), vec!["influenza".to_string()]);
    }

    /// Verifies a failed search still marks curation as run, with one error.
    #[test]
    fn search_failure_yields_empty_articles_and_error() {
        let search = Arc::new(ScriptedSearch::new(vec![Err(CollaboratorError::permanent(
            "http 403: blocked",
        ))]));
        let delta = task(&search, 5).execute(&WorkflowState::default());

        assert_eq!(delta.news_articles, Some(Vec::new()));
        assert_eq!(delta.errors, vec!["News search failed - http 403: blocked"]);
    }

    #[test]
    fn search_retries_transient_failures() {
        let search = Arc::new(ScriptedSearch::new(vec![
            Err(CollaboratorError::transient("timeout")),
            Ok(raw_items(2)),
        ]));
        let delta = task(&search, 5).execute(&WorkflowState::default());

        assert_eq!(delta.news_articles.as_ref().map(Vec::len), Some(2));
        assert!(delta.errors.is_empty());
        assert_eq!(search.topics().len(), 2);
    }

    #[test]
    fn per_item_failure_is_recorded_and_skipped() {
        let mut items = raw_items(2);
        items.push(RawNewsItem {
            title: "broken".to_string(),
            link: "https://news.example/fail".to_string(),
            ..RawNewsItem::default()
        });
        items.push(RawNewsItem {
            title: "no link".to_string(),
            ..RawNewsItem::default()
        });
        let search = Arc::new(ScriptedSearch::new(vec![Ok(items)]));
        let delta = task(&search, 5).execute(&WorkflowState::default());

        assert_eq!(delta.news_articles.as_ref().map(Vec::len), Some(2));
        assert_eq!(delta.errors.len(), 1);
        assert!(delta.errors[0].contains("https://news.example/fail"));
    }
}
