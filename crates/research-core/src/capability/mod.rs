//! Contracts for the external capabilities the research core depends on.
//!
//! The core never talks to a concrete provider: language-model and web-search access is
//! injected as trait objects when a run is assembled.

pub mod offline;

pub use offline::{IngestDocument, InMemorySearch, OfflineModel};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::state::SearchResult;

/// Schema handed to a model when a schema-constrained answer is required.
#[derive(Debug, Clone)]
pub struct OutputSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub schema: Value,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Free-text generation.
    async fn invoke(&self, prompt: &str) -> anyhow::Result<String>;

    /// Generation constrained to `schema`; the returned value is validated by the caller.
    async fn invoke_structured(&self, prompt: &str, schema: &OutputSchema)
    -> anyhow::Result<Value>;
}

pub type DynLanguageModel = Arc<dyn LanguageModel>;

/// Topic filter understood by the search capability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchTopic {
    #[default]
    General,
    News,
    Finance,
}

impl SearchTopic {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchTopic::General => "general",
            SearchTopic::News => "news",
            SearchTopic::Finance => "finance",
        }
    }
}

impl fmt::Display for SearchTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        topic: SearchTopic,
    ) -> anyhow::Result<Vec<SearchResult>>;
}

pub type DynSearchProvider = Arc<dyn SearchProvider>;

/// A record a model must produce in a fixed shape.
pub trait StructuredOutput: DeserializeOwned {
    fn schema() -> OutputSchema;

    /// Local validation applied after deserialisation.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum StructuredOutputError {
    #[error("model unavailable: {0}")]
    Unavailable(#[source] anyhow::Error),
    #[error("malformed {schema} output: {reason}")]
    Malformed { schema: &'static str, reason: String },
}

/// Invoke `model` for a `T`, rejecting anything that does not deserialise or validate.
pub async fn invoke_structured<T: StructuredOutput>(
    model: &dyn LanguageModel,
    prompt: &str,
) -> Result<T, StructuredOutputError> {
    let schema = T::schema();
    let raw = model
        .invoke_structured(prompt, &schema)
        .await
        .map_err(StructuredOutputError::Unavailable)?;

    let record: T =
        serde_json::from_value(raw).map_err(|err| StructuredOutputError::Malformed {
            schema: schema.name,
            reason: err.to_string(),
        })?;
    record
        .validate()
        .map_err(|reason| StructuredOutputError::Malformed {
            schema: schema.name,
            reason,
        })?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ResearchQuestion;
    use serde_json::json;

    struct FixedModel(Value);

    #[async_trait]
    impl LanguageModel for FixedModel {
        async fn invoke(&self, _prompt: &str) -> anyhow::Result<String> {
            Ok(String::new())
        }

        async fn invoke_structured(
            &self,
            _prompt: &str,
            _schema: &OutputSchema,
        ) -> anyhow::Result<Value> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn wrong_shape_is_malformed() {
        let model = FixedModel(json!({"brief": "missing field name"}));
        let err = invoke_structured::<ResearchQuestion>(&model, "prompt")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StructuredOutputError::Malformed {
                schema: "ResearchQuestion",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn validation_failure_is_malformed() {
        let model = FixedModel(json!({"research_brief": "   "}));
        let err = invoke_structured::<ResearchQuestion>(&model, "prompt")
            .await
            .unwrap_err();
        assert!(matches!(err, StructuredOutputError::Malformed { .. }));
    }

    #[tokio::test]
    async fn valid_record_is_returned() {
        let model = FixedModel(json!({"research_brief": "Compare espresso bars"}));
        let question = invoke_structured::<ResearchQuestion>(&model, "prompt")
            .await
            .expect("valid record");
        assert_eq!(question.research_brief, "Compare espresso bars");
    }
}
