//! Branch readiness predicates and the post-barrier router.
//!
//! The router is a pure function of merged state: the same state and policy
//! always yield the same [`Route`].

use serde::{Deserialize, Serialize};

use crate::core::state::WorkflowState;

/// When the news branch counts as ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum NewsPolicy {
    /// Ready only with at least `min_articles` curated articles.
    RequireArticles {
        #[serde(default = "default_min_articles")]
        min_articles: usize,
    },
    /// Ready once curation has run, even with zero articles.
    AllowEmpty,
}

fn default_min_articles() -> usize {
    1
}

impl Default for NewsPolicy {
    fn default() -> Self {
        Self::RequireArticles {
            min_articles: default_min_articles(),
        }
    }
}

/// Next edge out of the barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Report,
    Terminate,
}

impl Route {
    pub fn as_str(self) -> &'static str {
        match self {
            Route::Report => "report",
            Route::Terminate => "terminate",
        }
    }
}

/// Data branch is ready once a refined dataset exists.
pub fn data_ready(state: &WorkflowState) -> bool {
    state.refined_dataset_path.is_some()
}

pub fn news_ready(state: &WorkflowState, policy: NewsPolicy) -> bool {
    let Some(articles) = &state.news_articles else {
        return false;
    };
    match policy {
        NewsPolicy::RequireArticles { min_articles } => articles.len() >= min_articles.max(1),
        NewsPolicy::AllowEmpty => true,
    }
}

/// `Report` iff both readiness predicates hold.
pub fn route(state: &WorkflowState, policy: NewsPolicy) -> Route {
    if data_ready(state) && news_ready(state, policy) {
        Route::Report
    } else {
        Route::Terminate
    }
}
