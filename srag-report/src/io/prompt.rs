//! Prompt rendering for LLM-backed collaborators.

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;

const COLUMN_MAPPING_TEMPLATE: &str = include_str!("prompts/column_mapping.md");
const CURATE_ARTICLE_TEMPLATE: &str = include_str!("prompts/curate_article.md");

pub const COLUMN_MAPPING_SYSTEM: &str = "You are a data engineer who maps raw epidemiological \
CSV headers to a target schema. Answer with JSON only.";

pub const CURATE_ARTICLE_SYSTEM: &str = "You are a public-health news curator. You judge \
relevance strictly and write neutral, factual summaries in Portuguese. Answer with JSON only.";

/// Target field description for the column mapping prompt.
#[derive(Debug, Clone, Serialize)]
pub struct TargetField<'a> {
    pub name: &'a str,
    pub description: &'a str,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("column_mapping", COLUMN_MAPPING_TEMPLATE)
            .expect("column mapping template should be valid");
        env.add_template("curate_article", CURATE_ARTICLE_TEMPLATE)
            .expect("curate article template should be valid");
        Self { env }
    }

    pub fn render_column_mapping(
        &self,
        targets: &[TargetField<'_>],
        raw_columns: &[String],
    ) -> Result<String> {
        let template = self.env.get_template("column_mapping")?;
        let rendered = template.render(context! {
            targets => targets,
            raw_columns => raw_columns,
        })?;
        Ok(rendered)
    }

    pub fn render_curation(
        &self,
        topic: &str,
        url: &str,
        text: &str,
        fallback_date: Option<&str>,
    ) -> Result<String> {
        let template = self.env.get_template("curate_article")?;
        let rendered = template.render(context! {
            topic => topic,
            url => url,
            text => text,
            fallback_date => fallback_date.filter(|d| !d.trim().is_empty()),
        })?;
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_mapping_lists_targets_and_columns() {
        let engine = PromptEngine::new();
        let prompt = engine
            .render_column_mapping(
                &[TargetField {
                    name: "uti",
                    description: "ICU admission",
                }],
                &["UTI".to_string(), "CS_SEXO".to_string()],
            )
            .expect("render");
        assert!(prompt.contains("- `uti`: ICU admission"));
        assert!(prompt.contains("UTI, CS_SEXO"));
    }

    #[test]
    fn curation_omits_blank_fallback_date() {
        let engine = PromptEngine::new();
        let prompt = engine
            .render_curation("SRAG", "https://x", "body text", Some(" "))
            .expect("render");
        assert!(prompt.contains("\"SRAG\""));
        assert!(prompt.contains("body text"));
        assert!(!prompt.contains("Listed date"));
    }
}
