//! Research orchestration core built directly on top of `graph_flow`.
//!
//! A run scopes the user's request, hands a research brief to a supervisor that fans
//! research workers out in bounded rounds, and synthesizes a final report from the notes
//! they return. Language-model and web-search access are injected capabilities.

pub mod capability;
pub mod config;
mod error;
pub mod events;
pub mod metrics;
pub mod prompts;
mod report;
pub mod schema;
mod scoping;
pub mod search;
pub mod state;
pub mod supervisor;
mod tasks;
pub mod telemetry;
mod trace;
pub mod worker;
mod workflow;

pub use capability::{
    DynLanguageModel, DynSearchProvider, IngestDocument, InMemorySearch, LanguageModel,
    OfflineModel, OutputSchema, SearchProvider, SearchTopic,
};
pub use config::{Config, ConfigLoader, LoggingConfig, RunConfig, SearchConfig};
pub use error::{AggregatorFailure, ResearchError, WorkerFailure};
pub use events::{Event, EventCollector, EventKind, EventLog, Stage, TaskOutcome};
pub use report::ReportSynthesizer;
pub use scoping::{EMPTY_REQUEST_QUESTION, ScopingDecision, ScopingStage};
pub use state::{
    ConclusionReason, Conversation, DelegationRequest, FinalReport, ResearchBrief, ResearchNote,
    Role, SearchResult, SupervisorState, Turn,
};
pub use supervisor::{Supervisor, allot_budgets};
pub use tasks::{BriefTask, ClarifyTask, ReportTask, StageFailure, SupervisorTask};
pub use telemetry::{TelemetryOptions, init_telemetry};
pub use trace::{TraceStep, TraceSummary};
pub use workflow::{
    Capabilities, CompletedRun, RunOptions, RunOutcome, SupervisorSummary, run_research,
};
