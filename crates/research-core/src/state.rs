//! Records shared across the pipeline stages.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ResearchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Human,
    Assistant,
}

impl Role {
    pub fn label(&self) -> &'static str {
        match self {
            Role::Human => "Human",
            Role::Assistant => "AI",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

/// Ordered, append-only sequence of conversation turns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_user(text: impl Into<String>) -> Self {
        let mut conversation = Self::new();
        conversation.push_user(text);
        conversation
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.turns.push(Turn {
            role: Role::Human,
            text: text.into(),
        });
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.turns.push(Turn {
            role: Role::Assistant,
            text: text.into(),
        });
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// True when no turn carries any non-whitespace text.
    pub fn is_blank(&self) -> bool {
        self.turns.iter().all(|turn| turn.text.trim().is_empty())
    }

    /// Render as a `Human: ...` / `AI: ...` transcript.
    pub fn to_buffer_string(&self) -> String {
        self.turns
            .iter()
            .map(|turn| format!("{}: {}", turn.role.label(), turn.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// The single research question every later stage works from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResearchBrief(String);

impl ResearchBrief {
    pub fn new(text: impl Into<String>) -> Result<Self, ResearchError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ResearchError::EmptyBrief);
        }
        Ok(Self(text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResearchBrief {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One research sub-task handed to a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationRequest {
    topic: String,
    round: u32,
}

impl DelegationRequest {
    /// Returns `None` for blank topics; those are never dispatched.
    pub fn new(topic: impl Into<String>, round: u32) -> Option<Self> {
        let topic = topic.into().trim().to_string();
        if topic.is_empty() {
            return None;
        }
        Some(Self { topic, round })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn round(&self) -> u32 {
        self.round
    }
}

/// One hit returned by the search capability; `url` is its canonical identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    #[serde(default)]
    pub title: String,
    /// Provider snippet, used verbatim when no raw content is available.
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub raw_content: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl SearchResult {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            content: String::new(),
            raw_content: None,
            metadata: Map::new(),
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_raw_content(mut self, raw: impl Into<String>) -> Self {
        self.raw_content = Some(raw.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Free-text synthesis of one completed delegation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchNote {
    topic: String,
    round: u32,
    content: String,
}

impl ResearchNote {
    pub fn new(request: &DelegationRequest, content: impl Into<String>) -> Self {
        Self {
            topic: request.topic().to_string(),
            round: request.round(),
            content: content.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

/// Why the supervisor stopped delegating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConclusionReason {
    /// The planner sent an explicit completion signal.
    ResearchComplete,
    /// The planner issued no requests and no completion signal.
    ImplicitCompletion,
    RoundLimit,
    ToolCallLimit,
    PlanningFailed,
}

impl ConclusionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConclusionReason::ResearchComplete => "research_complete",
            ConclusionReason::ImplicitCompletion => "implicit_completion",
            ConclusionReason::RoundLimit => "round_limit",
            ConclusionReason::ToolCallLimit => "tool_call_limit",
            ConclusionReason::PlanningFailed => "planning_failed",
        }
    }
}

/// State owned and mutated exclusively by the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorState {
    research_brief: ResearchBrief,
    notes: Vec<ResearchNote>,
    round_count: u32,
    tool_call_count: u32,
    terminal: bool,
    conclusion: Option<ConclusionReason>,
}

impl SupervisorState {
    pub fn new(research_brief: ResearchBrief) -> Self {
        Self {
            research_brief,
            notes: Vec::new(),
            round_count: 0,
            tool_call_count: 0,
            terminal: false,
            conclusion: None,
        }
    }

    pub fn research_brief(&self) -> &ResearchBrief {
        &self.research_brief
    }

    pub fn notes(&self) -> &[ResearchNote] {
        &self.notes
    }

    pub fn round_count(&self) -> u32 {
        self.round_count
    }

    pub fn tool_call_count(&self) -> u32 {
        self.tool_call_count
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    pub fn conclusion(&self) -> Option<ConclusionReason> {
        self.conclusion
    }

    pub fn into_notes(self) -> Vec<ResearchNote> {
        self.notes
    }

    /// Fold one finished round in. Notes must already be in request-issue order.
    pub(crate) fn record_round(&mut self, notes: Vec<ResearchNote>, tool_calls: u32) {
        debug_assert!(!self.terminal, "round recorded after conclusion");
        self.notes.extend(notes);
        self.round_count += 1;
        self.tool_call_count = self.tool_call_count.saturating_add(tool_calls);
    }

    pub(crate) fn conclude(&mut self, reason: ConclusionReason) {
        if !self.terminal {
            self.terminal = true;
            self.conclusion = Some(reason);
        }
    }
}

/// The run's single terminal artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FinalReport(String);

impl FinalReport {
    pub(crate) fn new(text: String) -> Self {
        Self(text)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for FinalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_topics_are_rejected() {
        assert!(DelegationRequest::new("   ", 1).is_none());
        let request = DelegationRequest::new("  latte art  ", 2).expect("topic kept");
        assert_eq!(request.topic(), "latte art");
        assert_eq!(request.round(), 2);
    }

    #[test]
    fn empty_brief_is_rejected() {
        assert!(matches!(
            ResearchBrief::new(" \n"),
            Err(ResearchError::EmptyBrief)
        ));
    }

    #[test]
    fn buffer_string_labels_roles() {
        let mut conversation = Conversation::from_user("Compare coffee shops");
        conversation.push_assistant("Which city?");
        conversation.push_user("City X");
        assert_eq!(
            conversation.to_buffer_string(),
            "Human: Compare coffee shops\nAI: Which city?\nHuman: City X"
        );
    }

    #[test]
    fn supervisor_state_counts_rounds_and_freezes() {
        let brief = ResearchBrief::new("brief").unwrap();
        let mut state = SupervisorState::new(brief);
        let request = DelegationRequest::new("topic", 1).unwrap();
        state.record_round(vec![ResearchNote::new(&request, "note")], 3);
        state.conclude(ConclusionReason::RoundLimit);
        state.conclude(ConclusionReason::ResearchComplete);

        assert_eq!(state.round_count(), 1);
        assert_eq!(state.tool_call_count(), 3);
        assert!(state.is_terminal());
        assert_eq!(state.conclusion(), Some(ConclusionReason::RoundLimit));
    }
}
