//! Event bus for explainability and trace collection.
//!
//! Pipeline stages, the supervisor and its workers report lifecycle events through an
//! [`EventCollector`]; the run gathers them into an [`EventLog`] once it finishes.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

use crate::state::ConclusionReason;

/// Unique identifier for an event
pub type EventId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Clarify,
    Brief,
    Supervisor,
    Report,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Clarify => "clarify",
            Stage::Brief => "brief",
            Stage::Supervisor => "supervisor",
            Stage::Report => "report",
        }
    }
}

/// Outcome of a stage or worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Success,
    Failure { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    StageStarted {
        stage: Stage,
    },
    StageFinished {
        stage: Stage,
        outcome: TaskOutcome,
    },
    RoundStarted {
        round: u32,
        requests: usize,
    },
    WorkerStarted {
        round: u32,
        index: usize,
        topic: String,
    },
    ToolCall {
        round: u32,
        index: usize,
        tool: String,
    },
    WorkerFinished {
        round: u32,
        index: usize,
        outcome: TaskOutcome,
        tool_calls: u32,
        duration_ms: u64,
    },
    SupervisorConcluded {
        reason: ConclusionReason,
        rounds: u32,
        tool_calls: u32,
        notes: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: EventId,
    pub timestamp: u64,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Event collector handed to every component of a run
#[derive(Clone)]
pub struct EventCollector {
    sender: mpsc::UnboundedSender<Event>,
}

impl EventCollector {
    /// Create a new event collector
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn emit(&self, kind: EventKind) {
        let event = Event {
            event_id: generate_event_id(),
            timestamp: current_timestamp(),
            kind,
        };

        if let Err(e) = self.sender.send(event) {
            tracing::trace!(error = %e, "event dropped; no receiver");
        }
    }
}

impl Default for EventCollector {
    fn default() -> Self {
        Self::new().0
    }
}

/// Generate a unique event ID
fn generate_event_id() -> EventId {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let id = COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("evt_{}", id)
}

/// Get current Unix timestamp in milliseconds
fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Receiving end that buffers events in arrival order.
pub struct EventLog {
    receiver: mpsc::UnboundedReceiver<Event>,
    events: Vec<Event>,
}

impl EventLog {
    pub fn new(receiver: mpsc::UnboundedReceiver<Event>) -> Self {
        Self {
            receiver,
            events: Vec::new(),
        }
    }

    /// Move every event already sent into the buffer without waiting for more.
    pub fn drain_pending(&mut self) -> usize {
        let before = self.events.len();
        while let Ok(event) = self.receiver.try_recv() {
            tracing::trace!(event_id = %event.event_id, "collected event");
            self.events.push(event);
        }
        self.events.len() - before
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn into_events(mut self) -> Vec<Event> {
        self.drain_pending();
        self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_collector() {
        let (collector, mut receiver) = EventCollector::new();

        collector.emit(EventKind::StageStarted {
            stage: Stage::Clarify,
        });

        let event = receiver.recv().await.unwrap();
        match event.kind {
            EventKind::StageStarted { stage } => assert_eq!(stage, Stage::Clarify),
            _ => panic!("Expected StageStarted event"),
        }
    }

    #[test]
    fn event_log_drains_in_order_and_serialises_flat() {
        let (collector, receiver) = EventCollector::new();
        let mut log = EventLog::new(receiver);

        collector.emit(EventKind::RoundStarted {
            round: 1,
            requests: 2,
        });
        collector.emit(EventKind::ToolCall {
            round: 1,
            index: 0,
            tool: "web_search".into(),
        });

        assert_eq!(log.drain_pending(), 2);
        assert!(matches!(
            log.events()[0].kind,
            EventKind::RoundStarted { round: 1, .. }
        ));

        let json = serde_json::to_string_pretty(log.events()).unwrap();
        assert!(json.contains("\"type\": \"round_started\""));
        assert!(json.contains("\"event_id\""));
    }
}
