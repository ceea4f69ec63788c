//! Research worker: a bounded tool-use loop over one delegated topic.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::capability::{DynLanguageModel, SearchTopic, StructuredOutputError, invoke_structured};
use crate::error::WorkerFailure;
use crate::events::{EventCollector, EventKind};
use crate::prompts;
use crate::schema::ResearcherAction;
use crate::search::{SearchAggregator, format_search_output};
use crate::state::{DelegationRequest, ResearchNote};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    Searching,
    Reflecting,
    Concluding,
    Done,
}

/// Phase following `action` when taken in `phase`.
pub fn next_phase(phase: WorkerPhase, action: &ResearcherAction) -> WorkerPhase {
    match (phase, action) {
        (WorkerPhase::Concluding | WorkerPhase::Done, _) => phase,
        (_, ResearcherAction::Search { .. } | ResearcherAction::DatasetSearch { .. }) => {
            WorkerPhase::Reflecting
        }
        (_, ResearcherAction::Think { .. }) => WorkerPhase::Searching,
        (_, ResearcherAction::Conclude) => WorkerPhase::Concluding,
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The model judged the topic covered.
    Covered,
    ToolBudget,
    IterationLimit,
    /// The model returned an action that failed validation.
    MalformedAction,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub max_iterations: u32,
    pub max_results: usize,
    pub topic: SearchTopic,
}

#[derive(Debug, Clone)]
pub struct WorkerReport {
    pub note: ResearchNote,
    pub tool_calls: u32,
    pub stop: StopReason,
    /// Always [`WorkerPhase::Done`] for a report that was returned.
    pub phase: WorkerPhase,
}

pub struct ResearchWorker {
    model: DynLanguageModel,
    aggregator: Arc<SearchAggregator>,
    settings: WorkerSettings,
    date: String,
    events: EventCollector,
}

impl ResearchWorker {
    pub fn new(
        model: DynLanguageModel,
        aggregator: Arc<SearchAggregator>,
        settings: WorkerSettings,
        date: String,
        events: EventCollector,
    ) -> Self {
        Self {
            model,
            aggregator,
            settings,
            date,
            events,
        }
    }

    /// Research one topic, spending at most `budget` tool calls.
    #[instrument(name = "worker.research", skip(self, request), fields(topic = %request.topic(), round = request.round()))]
    pub async fn research(
        &self,
        request: &DelegationRequest,
        index: usize,
        budget: u32,
    ) -> Result<WorkerReport, WorkerFailure> {
        let topic = request.topic();
        let mut phase = WorkerPhase::Searching;
        let mut transcript: Vec<String> = Vec::new();
        let mut findings: Vec<String> = Vec::new();
        let mut tool_calls = 0u32;
        let mut iterations = 0u32;

        let stop = loop {
            if tool_calls >= budget {
                break StopReason::ToolBudget;
            }
            if iterations >= self.settings.max_iterations {
                break StopReason::IterationLimit;
            }
            iterations += 1;

            let prompt = prompts::researcher_prompt(
                topic,
                &transcript.join("\n\n"),
                budget - tool_calls,
                &self.date,
            );
            let action = match invoke_structured::<ResearcherAction>(self.model.as_ref(), &prompt).await {
                Ok(action) => action,
                Err(StructuredOutputError::Unavailable(err)) => {
                    return Err(WorkerFailure::new(topic, err.to_string(), tool_calls));
                }
                Err(malformed) => {
                    warn!(error = %malformed, "discarding malformed action; concluding early");
                    break StopReason::MalformedAction;
                }
            };

            if let Some(tool) = action.tool_name() {
                tool_calls += 1;
                self.events.emit(EventKind::ToolCall {
                    round: request.round(),
                    index,
                    tool: tool.to_string(),
                });
            }
            let next = next_phase(phase, &action);
            debug!(from = ?phase, to = ?next, tool_calls, "worker transition");
            phase = next;

            match action {
                ResearcherAction::Search { query } => {
                    let results = self
                        .aggregator
                        .search(
                            std::slice::from_ref(&query),
                            self.settings.max_results,
                            self.settings.topic,
                        )
                        .await;
                    let output = format_search_output(&results);
                    transcript.push(format!("[search] {query}\n{output}"));
                    findings.push(output);
                }
                ResearcherAction::DatasetSearch { query, platforms } => {
                    let results = self.aggregator.search_datasets(&query, &platforms).await;
                    let output = format!(
                        "Dataset Search Results for '{query}':\n{}",
                        format_search_output(&results)
                    );
                    transcript.push(format!("[dataset_search] {query}\n{output}"));
                    findings.push(output);
                }
                ResearcherAction::Think { reflection } => {
                    transcript.push(format!("Reflection recorded: {reflection}"));
                }
                ResearcherAction::Conclude => break StopReason::Covered,
            }
        };

        debug!(from = ?phase, to = ?WorkerPhase::Concluding, ?stop, "worker concluding");
        phase = WorkerPhase::Concluding;
        let content = self.compress(topic, &transcript, &findings, tool_calls).await?;
        debug!(from = ?phase, to = ?WorkerPhase::Done, "note compressed");
        phase = WorkerPhase::Done;
        info!(tool_calls, iterations, ?stop, ?phase, "worker done");

        Ok(WorkerReport {
            note: ResearchNote::new(request, content),
            tool_calls,
            stop,
            phase,
        })
    }

    /// Condense the transcript into the note text. Never returns an empty note.
    async fn compress(
        &self,
        topic: &str,
        transcript: &[String],
        findings: &[String],
        tool_calls: u32,
    ) -> Result<String, WorkerFailure> {
        let prompt = prompts::compress_prompt(topic, &transcript.join("\n\n"), &self.date);
        match self.model.invoke(&prompt).await {
            Ok(text) if !text.trim().is_empty() => Ok(text),
            Ok(_) => {
                warn!("compression returned no text; using raw findings");
                Ok(fallback_note(topic, findings))
            }
            Err(err) if !findings.is_empty() => {
                warn!(error = %err, "compression failed; using raw findings");
                Ok(fallback_note(topic, findings))
            }
            Err(err) => Err(WorkerFailure::new(topic, err.to_string(), tool_calls)),
        }
    }
}

fn fallback_note(topic: &str, findings: &[String]) -> String {
    if findings.is_empty() {
        format!("No findings were gathered for \"{topic}\" before the research loop stopped.")
    } else {
        format!("Findings for \"{topic}\":\n\n{}", findings.join("\n\n"))
    }
}
