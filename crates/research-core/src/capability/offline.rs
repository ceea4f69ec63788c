//! Deterministic capabilities for offline runs and tests.
//!
//! [`OfflineModel`] answers every prompt from the tagged sections the prompt builders
//! emit, and [`InMemorySearch`] ranks ingested documents by token overlap.

use std::collections::HashSet;

use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Value, json};
use tracing::debug;

use super::{LanguageModel, OutputSchema, SearchProvider, SearchTopic};
use crate::prompts::extract_section;
use crate::state::SearchResult;

static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").expect("valid token regex"));

const MAX_TOPICS: usize = 3;
const SNIPPET_CHARS: usize = 200;

fn tokens(text: &str) -> HashSet<String> {
    TOKEN
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|token| token.len() > 2)
        .collect()
}

fn sentences(text: &str) -> Vec<String> {
    text.split_inclusive(['.', '?', '!'])
        .map(str::trim)
        .filter(|sentence| !sentence.is_empty())
        .map(str::to_string)
        .collect()
}

/// Text of every `Human:` turn in a conversation buffer, joined by spaces.
fn human_text(buffer: &str) -> String {
    buffer
        .lines()
        .filter_map(|line| line.strip_prefix("Human:"))
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Rule-based stand-in for a hosted language model.
#[derive(Debug, Clone, Default)]
pub struct OfflineModel;

impl OfflineModel {
    pub fn new() -> Self {
        Self
    }

    fn clarify(&self, prompt: &str) -> Value {
        let request = human_text(extract_section(prompt, "Messages").unwrap_or_default());
        if request.split_whitespace().count() < 3 {
            json!({
                "need_clarification": true,
                "question": "Could you describe in more detail what you would like researched?",
                "verification": ""
            })
        } else {
            json!({
                "need_clarification": false,
                "question": "",
                "verification": format!("I have enough information to start researching: {request}")
            })
        }
    }

    fn supervise(&self, prompt: &str) -> Value {
        let notes = extract_section(prompt, "Notes").unwrap_or_default();
        if !notes.is_empty() {
            return json!({ "research_complete": true, "reflection": "notes cover the brief" });
        }
        let brief = extract_section(prompt, "Brief").unwrap_or_default();
        let mut topics = sentences(brief);
        topics.truncate(MAX_TOPICS);
        json!({ "conduct_research": topics, "research_complete": false })
    }

    fn act(&self, prompt: &str) -> Value {
        let topic = extract_section(prompt, "Topic").unwrap_or_default();
        let transcript = extract_section(prompt, "Transcript").unwrap_or_default();
        if !transcript.contains("[search]") {
            json!({ "action": "search", "query": topic })
        } else if !transcript.contains("Reflection recorded") {
            json!({ "action": "think", "reflection": format!("search results gathered for {topic}") })
        } else {
            json!({ "action": "conclude" })
        }
    }

    fn summarize(&self, prompt: &str) -> Value {
        let content = extract_section(prompt, "Content").unwrap_or_default();
        let leading = sentences(content);
        let summary = leading.iter().take(2).cloned().collect::<Vec<_>>().join(" ");
        let summary = if summary.is_empty() {
            content.chars().take(SNIPPET_CHARS).collect()
        } else {
            summary
        };
        json!({
            "summary": summary,
            "key_excerpts": leading.first().cloned().unwrap_or_default()
        })
    }
}

#[async_trait]
impl LanguageModel for OfflineModel {
    async fn invoke(&self, prompt: &str) -> anyhow::Result<String> {
        let findings = extract_section(prompt, "Findings").unwrap_or_default();
        match extract_section(prompt, "Brief") {
            Some(brief) => Ok(format!("# Report\n\n{brief}\n\n{findings}")),
            None => Ok(findings.to_string()),
        }
    }

    async fn invoke_structured(
        &self,
        prompt: &str,
        schema: &OutputSchema,
    ) -> anyhow::Result<Value> {
        debug!(schema = schema.name, "offline model answering");
        match schema.name {
            "ClarifyWithUser" => Ok(self.clarify(prompt)),
            "ResearchQuestion" => Ok(json!({
                "research_brief": human_text(extract_section(prompt, "Messages").unwrap_or_default())
            })),
            "SupervisorDecision" => Ok(self.supervise(prompt)),
            "ResearcherAction" => Ok(self.act(prompt)),
            "Summary" => Ok(self.summarize(prompt)),
            other => anyhow::bail!("offline model has no answer for schema {other}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestDocument {
    pub id: String,
    pub url: String,
    pub title: String,
    pub text: String,
}

/// Token-overlap search over ingested documents, keyed by URL.
#[derive(Default)]
pub struct InMemorySearch {
    store: DashMap<String, IngestDocument>,
}

impl InMemorySearch {
    pub fn new() -> Self {
        Self {
            store: DashMap::new(),
        }
    }

    /// Add documents; a later document replaces an earlier one with the same URL.
    pub fn ingest<I>(&self, docs: I) -> usize
    where
        I: IntoIterator<Item = IngestDocument>,
    {
        let mut count = 0;
        for doc in docs {
            self.store.insert(doc.url.clone(), doc);
            count += 1;
        }
        count
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

#[async_trait]
impl SearchProvider for InMemorySearch {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        topic: SearchTopic,
    ) -> anyhow::Result<Vec<SearchResult>> {
        let wanted = tokens(query);
        let mut scored: Vec<(usize, IngestDocument)> = self
            .store
            .iter()
            .filter_map(|entry| {
                let doc = entry.value();
                let haystack = tokens(&format!("{} {}", doc.title, doc.text));
                let score = wanted.intersection(&haystack).count();
                (score > 0).then(|| (score, doc.clone()))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.url.cmp(&b.1.url)));

        debug!(query, %topic, hits = scored.len(), "in-memory search");
        Ok(scored
            .into_iter()
            .take(max_results)
            .map(|(score, doc)| {
                let snippet: String = doc.text.chars().take(SNIPPET_CHARS).collect();
                SearchResult::new(doc.url, doc.title)
                    .with_content(snippet)
                    .with_raw_content(doc.text)
                    .with_metadata("score", json!(score))
                    .with_metadata("id", json!(doc.id))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{StructuredOutput, invoke_structured};
    use crate::prompts;
    use crate::schema::{ClarifyWithUser, ResearcherAction, SupervisorDecision};
    use crate::state::{Conversation, ResearchBrief};

    fn doc(id: &str, title: &str, text: &str) -> IngestDocument {
        IngestDocument {
            id: id.into(),
            url: format!("https://local.test/{id}"),
            title: title.into(),
            text: text.into(),
        }
    }

    #[tokio::test]
    async fn search_ranks_by_overlap_then_url() {
        let search = InMemorySearch::new();
        search.ingest([
            doc("b", "Lantern Cafe", "Lantern Cafe pours a bright single origin espresso."),
            doc("a", "Ember Roasters", "Ember Roasters roast espresso blends in house."),
            doc("c", "Bakery", "Croissants and sourdough only."),
        ]);

        let hits = search
            .search("Ember Roasters espresso", 5, SearchTopic::General)
            .await
            .unwrap();

        let urls: Vec<_> = hits.iter().map(|hit| hit.url.as_str()).collect();
        assert_eq!(urls, vec!["https://local.test/a", "https://local.test/b"]);
        assert!(hits[0].raw_content.as_deref().unwrap().contains("house"));
    }

    #[tokio::test]
    async fn short_requests_trigger_clarification() {
        let model = OfflineModel::new();
        let prompt = prompts::clarify_prompt(&Conversation::from_user("coffee?"), "today");
        let decision: ClarifyWithUser = invoke_structured(&model, &prompt).await.unwrap();
        assert!(decision.need_clarification);

        let prompt = prompts::clarify_prompt(
            &Conversation::from_user("Compare espresso bars in city X"),
            "today",
        );
        let decision: ClarifyWithUser = invoke_structured(&model, &prompt).await.unwrap();
        assert!(!decision.need_clarification);
        assert!(decision.verification.contains("espresso bars"));
    }

    #[tokio::test]
    async fn supervisor_splits_brief_then_completes() {
        let model = OfflineModel::new();
        let brief = ResearchBrief::new("Visit A. Visit B. Visit C. Visit D.").unwrap();

        let prompt = prompts::supervisor_prompt(&brief, &[], 1, 3, "today");
        let decision: SupervisorDecision = invoke_structured(&model, &prompt).await.unwrap();
        assert_eq!(decision.conduct_research, vec!["Visit A.", "Visit B.", "Visit C."]);

        let note = crate::state::ResearchNote::new(
            &crate::state::DelegationRequest::new("Visit A.", 1).unwrap(),
            "A is open late",
        );
        let prompt = prompts::supervisor_prompt(&brief, &[note], 2, 3, "today");
        let decision: SupervisorDecision = invoke_structured(&model, &prompt).await.unwrap();
        assert!(decision.research_complete);
    }

    #[tokio::test]
    async fn worker_actions_cycle_search_think_conclude() {
        let model = OfflineModel::new();
        let first = prompts::researcher_prompt("topic", "", 3, "today");
        let action: ResearcherAction = invoke_structured(&model, &first).await.unwrap();
        assert_eq!(action.tool_name(), Some("web_search"));

        let second = prompts::researcher_prompt("topic", "[search] topic\nresults", 2, "today");
        let action: ResearcherAction = invoke_structured(&model, &second).await.unwrap();
        assert_eq!(action.tool_name(), Some("think"));

        let third = prompts::researcher_prompt(
            "topic",
            "[search] topic\nresults\n\nReflection recorded: ok",
            1,
            "today",
        );
        let action: ResearcherAction = invoke_structured(&model, &third).await.unwrap();
        assert_eq!(action, ResearcherAction::Conclude);
        assert_eq!(ResearcherAction::schema().name, "ResearcherAction");
    }
}
