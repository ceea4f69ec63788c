use std::sync::Arc;
use std::time::Duration;

use graph_flow::{
    ExecutionStatus, FlowRunner, GraphBuilder, InMemorySessionStorage, Session, SessionStorage,
    Task,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::ResearchError;
use crate::capability::{DynLanguageModel, DynSearchProvider};
use crate::config::{Config, RunConfig, SearchConfig};
use crate::events::{EventCollector, EventLog};
use crate::prompts;
use crate::report::ReportSynthesizer;
use crate::scoping::ScopingStage;
use crate::search::SearchAggregator;
use crate::state::{
    ConclusionReason, Conversation, FinalReport, ResearchBrief, ResearchNote, SupervisorState,
};
use crate::supervisor::Supervisor;
use crate::tasks::{BriefTask, ClarifyTask, ReportTask, StageFailure, SupervisorTask, keys};
use crate::trace::TraceSummary;
use crate::worker::{ResearchWorker, WorkerSettings};

/// External capabilities a run is assembled from.
#[derive(Clone)]
pub struct Capabilities {
    pub model: DynLanguageModel,
    pub search: DynSearchProvider,
    /// Model used for the final report; defaults to `model`.
    pub writer: Option<DynLanguageModel>,
}

impl Capabilities {
    pub fn new(model: DynLanguageModel, search: DynSearchProvider) -> Self {
        Self {
            model,
            search,
            writer: None,
        }
    }

    pub fn with_writer(mut self, writer: DynLanguageModel) -> Self {
        self.writer = Some(writer);
        self
    }
}

/// Options for one research run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub conversation: Conversation,
    pub session_id: Option<String>,
    pub config: RunConfig,
    pub search: SearchConfig,
}

impl RunOptions {
    pub fn new(conversation: Conversation) -> Self {
        Self {
            conversation,
            ..Self::default()
        }
    }

    pub fn with_config(mut self, config: &Config) -> Self {
        self.config = config.research.clone();
        self.search = config.search.clone();
        self
    }

    pub fn with_run_config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorSummary {
    pub round_count: u32,
    pub tool_call_count: u32,
    pub conclusion: ConclusionReason,
}

#[derive(Debug, Clone)]
pub struct CompletedRun {
    pub session_id: String,
    pub conversation: Conversation,
    pub research_brief: ResearchBrief,
    pub notes: Vec<ResearchNote>,
    pub final_report: FinalReport,
    pub supervisor: SupervisorSummary,
    pub trace: TraceSummary,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The conversation gained a clarifying question; nothing was researched.
    NeedsClarification {
        conversation: Conversation,
        question: String,
    },
    Completed(Box<CompletedRun>),
}

struct Pipeline {
    graph: Arc<graph_flow::Graph>,
    start: String,
}

fn build_graph(capabilities: &Capabilities, options: &RunOptions, events: &EventCollector) -> Pipeline {
    let date = prompts::today_str();
    let scoping = Arc::new(ScopingStage::new(capabilities.model.clone(), date.clone()));
    let aggregator = Arc::new(SearchAggregator::new(
        capabilities.search.clone(),
        capabilities.model.clone(),
        date.clone(),
    ));
    let worker = Arc::new(ResearchWorker::new(
        capabilities.model.clone(),
        aggregator,
        WorkerSettings {
            max_iterations: options.config.max_worker_iterations,
            max_results: options.search.max_results,
            topic: options.search.topic,
        },
        date.clone(),
        events.clone(),
    ));
    let supervisor = Arc::new(Supervisor::new(
        capabilities.model.clone(),
        worker,
        options.config.clone(),
        date.clone(),
        events.clone(),
    ));
    let writer = capabilities
        .writer
        .clone()
        .unwrap_or_else(|| capabilities.model.clone());
    let synthesizer = Arc::new(ReportSynthesizer::new(writer, date));

    let clarify = Arc::new(ClarifyTask::new(scoping.clone(), events.clone()));
    let brief = Arc::new(BriefTask::new(scoping, events.clone()));
    let supervise = Arc::new(SupervisorTask::new(supervisor, events.clone()));
    let report = Arc::new(ReportTask::new(synthesizer, events.clone()));

    let builder = GraphBuilder::new("research_workflow")
        .add_task(clarify.clone())
        .add_task(brief.clone())
        .add_task(supervise.clone())
        .add_task(report.clone())
        .add_edge(clarify.id(), brief.id())
        .add_edge(brief.id(), supervise.id())
        .add_edge(supervise.id(), report.id())
        .set_start_task(clarify.id());

    Pipeline {
        graph: Arc::new(builder.build()),
        start: clarify.id().to_string(),
    }
}

/// Run the research pipeline for one conversation.
///
/// Returns either the clarifying question the user must answer or the completed run.
/// Scoping and report failures are fatal; worker and search failures only thin out the
/// notes.
#[instrument(name = "workflow.run", skip_all, fields(session_id))]
pub async fn run_research(
    capabilities: Capabilities,
    options: RunOptions,
) -> Result<RunOutcome, ResearchError> {
    options.config.validate()?;
    if options.search.max_results == 0 {
        return Err(ResearchError::InvalidConfiguration(
            "search.max_results must be at least 1".into(),
        ));
    }

    match options.config.run_timeout_secs {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), execute(capabilities, options))
            .await
            .map_err(|_| {
                warn!(timeout_secs = secs, "run timed out; abandoning in-flight work");
                ResearchError::Cancelled(format!("run exceeded {secs}s"))
            })?,
        None => execute(capabilities, options).await,
    }
}

async fn execute(
    capabilities: Capabilities,
    options: RunOptions,
) -> Result<RunOutcome, ResearchError> {
    let (events, receiver) = EventCollector::new();
    let log = EventLog::new(receiver);
    let pipeline = build_graph(&capabilities, &options, &events);

    let storage = Arc::new(InMemorySessionStorage::new());
    let runner = FlowRunner::new(pipeline.graph, storage.clone());

    let session_id = options
        .session_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    tracing::Span::current().record("session_id", session_id.as_str());

    let session = Session::new_from_task(session_id.clone(), &pipeline.start);
    session
        .context
        .set(keys::CONVERSATION, &options.conversation)
        .await;
    storage
        .save(session)
        .await
        .map_err(|err| ResearchError::Workflow(format!("failed to persist session: {err}")))?;

    loop {
        let result = runner
            .run(&session_id)
            .await
            .map_err(|err| ResearchError::Workflow(format!("graph execution failure: {err}")))?;

        match result.status {
            ExecutionStatus::Completed => break,
            ExecutionStatus::WaitingForInput => continue,
            ExecutionStatus::Error(message) => return Err(ResearchError::Workflow(message)),
        }
    }

    let session = storage
        .get(&session_id)
        .await
        .map_err(|err| ResearchError::Workflow(format!("failed to reload session: {err}")))?
        .ok_or_else(|| ResearchError::Workflow("session missing after execution".into()))?;
    let context = session.context;

    if let Some(failure) = context.get::<StageFailure>(keys::FAILURE).await {
        return Err(failure.into());
    }

    let conversation: Conversation = context
        .get(keys::CONVERSATION)
        .await
        .unwrap_or_else(|| options.conversation.clone());

    if let Some(question) = context.get::<String>(keys::QUESTION).await {
        info!(%question, "run needs clarification");
        return Ok(RunOutcome::NeedsClarification {
            conversation,
            question,
        });
    }

    let missing = |key: &str| ResearchError::Workflow(format!("{key} missing after execution"));
    let research_brief: ResearchBrief = context
        .get(keys::BRIEF)
        .await
        .ok_or_else(|| missing(keys::BRIEF))?;
    let state: SupervisorState = context
        .get(keys::SUPERVISOR)
        .await
        .ok_or_else(|| missing(keys::SUPERVISOR))?;
    let final_report: FinalReport = context
        .get(keys::REPORT)
        .await
        .ok_or_else(|| missing(keys::REPORT))?;

    let supervisor = SupervisorSummary {
        round_count: state.round_count(),
        tool_call_count: state.tool_call_count(),
        conclusion: state
            .conclusion()
            .ok_or_else(|| ResearchError::Workflow("supervisor never concluded".into()))?,
    };
    let trace = TraceSummary::from_events(&log.into_events());

    info!(
        rounds = supervisor.round_count,
        tool_calls = supervisor.tool_call_count,
        notes = state.notes().len(),
        "research run completed"
    );

    Ok(RunOutcome::Completed(Box::new(CompletedRun {
        session_id,
        conversation,
        research_brief,
        notes: state.into_notes(),
        final_report,
        supervisor,
        trace,
    })))
}
