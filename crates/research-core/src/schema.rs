//! Structured judgment records exchanged with the language model.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::capability::{OutputSchema, StructuredOutput};

/// Whether the user must be asked a clarifying question before research starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarifyWithUser {
    pub need_clarification: bool,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub verification: String,
}

impl StructuredOutput for ClarifyWithUser {
    fn schema() -> OutputSchema {
        OutputSchema {
            name: "ClarifyWithUser",
            description: "Decide whether the request needs a clarifying question.",
            schema: json!({
                "type": "object",
                "properties": {
                    "need_clarification": {"type": "boolean"},
                    "question": {"type": "string"},
                    "verification": {"type": "string"}
                },
                "required": ["need_clarification", "question", "verification"]
            }),
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.need_clarification && self.question.trim().is_empty() {
            return Err("clarification requested without a question".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchQuestion {
    pub research_brief: String,
}

impl StructuredOutput for ResearchQuestion {
    fn schema() -> OutputSchema {
        OutputSchema {
            name: "ResearchQuestion",
            description: "A research question that will guide the research.",
            schema: json!({
                "type": "object",
                "properties": {"research_brief": {"type": "string"}},
                "required": ["research_brief"]
            }),
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.research_brief.trim().is_empty() {
            return Err("research_brief is empty".into());
        }
        Ok(())
    }
}

/// Condensed view of one web page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub summary: String,
    #[serde(default)]
    pub key_excerpts: String,
}

impl Summary {
    pub fn render(&self) -> String {
        format!(
            "<summary>\n{}\n</summary>\n\n<key_excerpts>\n{}\n</key_excerpts>",
            self.summary.trim(),
            self.key_excerpts.trim()
        )
    }
}

impl StructuredOutput for Summary {
    fn schema() -> OutputSchema {
        OutputSchema {
            name: "Summary",
            description: "Concise summary of webpage content plus key excerpts.",
            schema: json!({
                "type": "object",
                "properties": {
                    "summary": {"type": "string"},
                    "key_excerpts": {"type": "string"}
                },
                "required": ["summary", "key_excerpts"]
            }),
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.summary.trim().is_empty() {
            return Err("summary is empty".into());
        }
        Ok(())
    }
}

/// One planning decision of the supervisor.
///
/// `research_complete` wins over any topics issued alongside it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorDecision {
    #[serde(default)]
    pub conduct_research: Vec<String>,
    #[serde(default)]
    pub research_complete: bool,
    #[serde(default)]
    pub reflection: Option<String>,
}

impl StructuredOutput for SupervisorDecision {
    fn schema() -> OutputSchema {
        OutputSchema {
            name: "SupervisorDecision",
            description: "Delegate research topics to sub-agents or declare research complete.",
            schema: json!({
                "type": "object",
                "properties": {
                    "conduct_research": {"type": "array", "items": {"type": "string"}},
                    "research_complete": {"type": "boolean"},
                    "reflection": {"type": "string"}
                }
            }),
        }
    }
}

/// The closed set of actions a research worker may take per iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ResearcherAction {
    Search {
        query: String,
    },
    DatasetSearch {
        query: String,
        #[serde(default = "ResearcherAction::default_platforms")]
        platforms: Vec<String>,
    },
    Think {
        reflection: String,
    },
    Conclude,
}

impl ResearcherAction {
    fn default_platforms() -> Vec<String> {
        vec!["kaggle".into(), "huggingface".into(), "github".into()]
    }

    /// Tool name as reported in traces and metrics; `None` for the conclude signal.
    pub fn tool_name(&self) -> Option<&'static str> {
        match self {
            ResearcherAction::Search { .. } => Some("web_search"),
            ResearcherAction::DatasetSearch { .. } => Some("dataset_search"),
            ResearcherAction::Think { .. } => Some("think"),
            ResearcherAction::Conclude => None,
        }
    }
}

impl StructuredOutput for ResearcherAction {
    fn schema() -> OutputSchema {
        OutputSchema {
            name: "ResearcherAction",
            description: "Next step of the research loop: search, dataset_search, think, or conclude.",
            schema: json!({
                "oneOf": [
                    {"type": "object", "properties": {"action": {"const": "search"}, "query": {"type": "string"}}, "required": ["action", "query"]},
                    {"type": "object", "properties": {"action": {"const": "dataset_search"}, "query": {"type": "string"}, "platforms": {"type": "array", "items": {"type": "string"}}}, "required": ["action", "query"]},
                    {"type": "object", "properties": {"action": {"const": "think"}, "reflection": {"type": "string"}}, "required": ["action", "reflection"]},
                    {"type": "object", "properties": {"action": {"const": "conclude"}}, "required": ["action"]}
                ]
            }),
        }
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            ResearcherAction::Search { query } | ResearcherAction::DatasetSearch { query, .. }
                if query.trim().is_empty() =>
            {
                Err("search query is empty".into())
            }
            _ => Ok(()),
        }
    }
}
