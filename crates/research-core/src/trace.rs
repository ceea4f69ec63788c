use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::events::{Event, EventKind, TaskOutcome};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceStep {
    pub index: usize,
    pub actor: String,
    pub message: String,
}

/// Human-readable view over the events of one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceSummary {
    pub steps: Vec<TraceStep>,
}

fn outcome_text(outcome: &TaskOutcome) -> String {
    match outcome {
        TaskOutcome::Success => "succeeded".to_string(),
        TaskOutcome::Failure { reason } => format!("failed: {reason}"),
    }
}

fn describe(kind: &EventKind) -> (String, String) {
    match kind {
        EventKind::StageStarted { stage } => (stage.as_str().to_string(), "started".to_string()),
        EventKind::StageFinished { stage, outcome } => {
            (stage.as_str().to_string(), outcome_text(outcome))
        }
        EventKind::RoundStarted { round, requests } => (
            "supervisor".to_string(),
            format!("round {round} delegated {requests} topic(s)"),
        ),
        EventKind::WorkerStarted {
            round,
            index,
            topic,
        } => (format!("worker {round}.{index}"), format!("researching {topic}")),
        EventKind::ToolCall { round, index, tool } => {
            (format!("worker {round}.{index}"), format!("called {tool}"))
        }
        EventKind::WorkerFinished {
            round,
            index,
            outcome,
            tool_calls,
            duration_ms,
        } => (
            format!("worker {round}.{index}"),
            format!(
                "{} after {tool_calls} tool call(s) in {duration_ms} ms",
                outcome_text(outcome)
            ),
        ),
        EventKind::SupervisorConcluded {
            reason,
            rounds,
            tool_calls,
            notes,
        } => (
            "supervisor".to_string(),
            format!(
                "concluded ({}) after {rounds} round(s), {tool_calls} tool call(s), {notes} note(s)",
                reason.as_str()
            ),
        ),
    }
}

impl TraceSummary {
    pub fn from_events(events: &[Event]) -> Self {
        let steps = events
            .iter()
            .enumerate()
            .map(|(idx, event)| {
                let (actor, message) = describe(&event.kind);
                TraceStep {
                    index: idx + 1,
                    actor,
                    message,
                }
            })
            .collect();
        Self { steps }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn render_markdown(&self) -> String {
        if self.steps.is_empty() {
            return "No trace events recorded.".to_string();
        }
        let mut output = String::from("### Trace Summary\n");
        for step in &self.steps {
            let _ = writeln!(output, "{}. {} → {}", step.index, step.actor, step.message);
        }
        output
    }

    pub fn render_mermaid(&self) -> String {
        if self.steps.is_empty() {
            return "flowchart TD\n  %% no trace events captured".to_string();
        }

        let mut output = String::from("flowchart TD\n  %% auto-generated trace\n");
        for step in &self.steps {
            let label = sanitize_mermaid(&format!("{}: {}", step.actor, step.message));
            let _ = writeln!(output, "  step{}[\"{label}\"]", step.index);
        }
        for idx in 1..self.steps.len() {
            let _ = writeln!(output, "  step{idx} --> step{}", idx + 1);
        }

        output
    }
}

fn sanitize_mermaid(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('[', "(")
        .replace(']', ")")
        .replace('\n', "<br/>")
}
