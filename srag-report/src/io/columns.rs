//! Mapping of the refined SRAG schema onto raw dataset headers.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::error::CollaboratorError;
use crate::io::dataset::read_raw_header;
use crate::io::llm::LlmClient;
use crate::io::prompt::{COLUMN_MAPPING_SYSTEM, PromptEngine, TargetField};

/// Fields of the refined dataset, with their data dictionary descriptions.
pub const TARGET_FIELDS: [TargetField<'static>; 13] = [
    TargetField {
        name: "nu_notific",
        description: "Notification record ID",
    },
    TargetField {
        name: "dt_notific",
        description: "Date the notification form was filled",
    },
    TargetField {
        name: "sg_uf_not",
        description: "Federal unit (state) of the notifying health unit",
    },
    TargetField {
        name: "id_municip",
        description: "IBGE code of the notifying municipality",
    },
    TargetField {
        name: "vacina_cov",
        description: "Whether the patient received a COVID-19 vaccine",
    },
    TargetField {
        name: "vacina",
        description: "Whether the patient was vaccinated against influenza in the last campaign",
    },
    TargetField {
        name: "hospital",
        description: "Whether the patient was hospitalized",
    },
    TargetField {
        name: "dt_interna",
        description: "Date of hospitalization",
    },
    TargetField {
        name: "uti",
        description: "Whether the patient was admitted to an ICU",
    },
    TargetField {
        name: "surto_sg",
        description: "Whether the case is part of an SRAG outbreak",
    },
    TargetField {
        name: "classi_fin",
        description: "Final case classification",
    },
    TargetField {
        name: "evolucao",
        description: "Case outcome: 1=cure, 2=death, 3=death from other causes, 9=unknown",
    },
    TargetField {
        name: "dt_encerra",
        description: "Case closure date",
    },
];

/// Columns chosen for the refined dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMapping {
    /// Raw header names to keep, in target field order. Empty means no
    /// column could be matched.
    pub columns: Vec<String>,
    /// Set when the preferred strategy failed and a fallback chose the columns.
    pub warning: Option<String>,
}

impl ColumnMapping {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            warning: None,
        }
    }
}

/// Chooses which raw columns to keep.
pub trait ColumnMapper: Send + Sync {
    fn map_columns(&self, raw_path: &Path) -> Result<ColumnMapping, CollaboratorError>;
}

/// Case-insensitive header match against the target field names.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactMatchMapper;

impl ColumnMapper for ExactMatchMapper {
    fn map_columns(&self, raw_path: &Path) -> Result<ColumnMapping, CollaboratorError> {
        let headers = read_raw_header(raw_path)?;
        Ok(ColumnMapping::new(exact_matches(&headers)))
    }
}

fn exact_matches(headers: &[String]) -> Vec<String> {
    TARGET_FIELDS
        .iter()
        .filter_map(|field| {
            headers
                .iter()
                .find(|header| header.eq_ignore_ascii_case(field.name))
                .cloned()
        })
        .collect()
}

/// Asks the LLM for the mapping and falls back to exact matching when the
/// call fails or yields nothing usable.
pub struct LlmColumnMapper {
    llm: Arc<dyn LlmClient>,
    prompts: PromptEngine,
}

impl LlmColumnMapper {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            prompts: PromptEngine::new(),
        }
    }
}

impl ColumnMapper for LlmColumnMapper {
    #[instrument(skip_all, fields(raw = %raw_path.display()))]
    fn map_columns(&self, raw_path: &Path) -> Result<ColumnMapping, CollaboratorError> {
        let headers = read_raw_header(raw_path)?;
        let prompt = self
            .prompts
            .render_column_mapping(&TARGET_FIELDS, &headers)
            .map_err(|err| CollaboratorError::permanent(format!("render prompt: {err:#}")))?;

        let failure = match self.llm.complete_json(COLUMN_MAPPING_SYSTEM, &prompt) {
            Ok(reply) => {
                let mapped = columns_from_reply(&reply, &headers);
                if !mapped.is_empty() {
                    info!(columns = mapped.len(), "llm column mapping");
                    return Ok(ColumnMapping::new(mapped));
                }
                "LLM column mapping named no existing columns".to_string()
            }
            Err(err) => format!("LLM column mapping failed - {err}"),
        };

        let columns = exact_matches(&headers);
        let warning = format!(
            "{failure}; used exact header match ({} column(s))",
            columns.len()
        );
        warn!("{warning}");
        Ok(ColumnMapping {
            columns,
            warning: Some(warning),
        })
    }
}

/// Raw columns named by the reply, restricted to real headers and deduplicated,
/// in target field order.
fn columns_from_reply(reply: &Value, headers: &[String]) -> Vec<String> {
    let Some(object) = reply.as_object() else {
        warn!("llm column mapping was not a json object");
        return Vec::new();
    };
    let mut columns: Vec<String> = Vec::new();
    for field in &TARGET_FIELDS {
        let Some(raw) = object.get(field.name).and_then(Value::as_str) else {
            continue;
        };
        let raw = raw.trim();
        if !headers.iter().any(|h| h == raw) {
            debug!(field = field.name, raw, "llm named a column that does not exist");
            continue;
        }
        if !columns.iter().any(|c| c == raw) {
            columns.push(raw.to_string());
        }
    }
    columns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedLlm;
    use serde_json::json;
    use std::fs;

    fn raw_csv(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("INFLUD25.csv");
        fs::write(&path, "NU_NOTIFIC;DT_NOTIFIC;UTI;CS_SEXO\n1;2025-01-01;1;F\n").expect("write");
        path
    }

    #[test]
    fn exact_match_is_case_insensitive() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mapping = ExactMatchMapper
            .map_columns(&raw_csv(temp.path()))
            .expect("map");
        assert_eq!(mapping.columns, vec!["NU_NOTIFIC", "DT_NOTIFIC", "UTI"]);
        assert_eq!(mapping.warning, None);
    }

    #[test]
    fn llm_mapping_keeps_only_real_headers() {
        let temp = tempfile::tempdir().expect("tempdir");
        let llm = Arc::new(ScriptedLlm::new(vec![Ok(json!({
            "uti": "UTI",
            "hospital": "HOSPITALIZADO",
            "nu_notific": "NU_NOTIFIC",
            "dt_notific": "UTI",
        }))]));
        let mapper = LlmColumnMapper::new(llm.clone());

        let mapping = mapper.map_columns(&raw_csv(temp.path())).expect("map");
        assert_eq!(mapping.columns, vec!["NU_NOTIFIC", "UTI"]);
        assert_eq!(mapping.warning, None);
        assert_eq!(llm.calls(), 1);
    }

    #[test]
    fn llm_failure_falls_back_to_exact_match() {
        let temp = tempfile::tempdir().expect("tempdir");
        let llm = Arc::new(ScriptedLlm::new(vec![Err(CollaboratorError::transient(
            "rate limited",
        ))]));
        let mapper = LlmColumnMapper::new(llm);

        let mapping = mapper.map_columns(&raw_csv(temp.path())).expect("map");
        assert_eq!(mapping.columns, vec!["NU_NOTIFIC", "DT_NOTIFIC", "UTI"]);
        assert_eq!(
            mapping.warning.as_deref(),
            Some(
                "LLM column mapping failed - transient: rate limited; \
                 used exact header match (3 column(s))"
            )
        );
    }

    #[test]
    fn unusable_llm_mapping_falls_back_with_warning() {
        let temp = tempfile::tempdir().expect("tempdir");
        let llm = Arc::new(ScriptedLlm::new(vec![Ok(json!({"uti": "NOPE"}))]));
        let mapper = LlmColumnMapper::new(llm);

        let mapping = mapper.map_columns(&raw_csv(temp.path())).expect("map");
        assert_eq!(mapping.columns.len(), 3);
        let warning = mapping.warning.expect("warning");
        assert!(warning.starts_with("LLM column mapping named no existing columns"));
    }

    #[test]
    fn unreadable_file_is_an_error() {
        let err = ExactMatchMapper
            .map_columns(Path::new("/nonexistent/raw.csv"))
            .unwrap_err();
        assert!(!err.is_transient());
    }
}
