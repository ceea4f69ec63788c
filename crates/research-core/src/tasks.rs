//! `graph_flow` tasks wrapping each pipeline stage.
//!
//! Stage components travel inside the tasks; run data travels through the session
//! context under the keys below. A fatal stage failure is written to [`keys::FAILURE`]
//! and ends the graph.

use std::sync::Arc;

use async_trait::async_trait;
use graph_flow::{Context, NextAction, Task, TaskResult};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::ResearchError;
use crate::events::{EventCollector, EventKind, Stage, TaskOutcome};
use crate::report::ReportSynthesizer;
use crate::scoping::{ScopingDecision, ScopingStage};
use crate::state::{Conversation, FinalReport, ResearchBrief, SupervisorState};
use crate::supervisor::Supervisor;

pub mod keys {
    pub const CONVERSATION: &str = "conversation";
    pub const QUESTION: &str = "clarification.question";
    pub const BRIEF: &str = "research.brief";
    pub const SUPERVISOR: &str = "supervisor.state";
    pub const REPORT: &str = "final.report";
    pub const FAILURE: &str = "run.failure";
}

/// Serializable record of the fatal failure that ended a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum StageFailure {
    Scoping(String),
    EmptyBrief,
    Report(String),
    Workflow(String),
}

impl From<&ResearchError> for StageFailure {
    fn from(err: &ResearchError) -> Self {
        match err {
            ResearchError::Scoping(reason) => Self::Scoping(reason.clone()),
            ResearchError::EmptyBrief => Self::EmptyBrief,
            ResearchError::Report(reason) => Self::Report(reason.clone()),
            other => Self::Workflow(other.to_string()),
        }
    }
}

impl From<StageFailure> for ResearchError {
    fn from(failure: StageFailure) -> Self {
        match failure {
            StageFailure::Scoping(reason) => Self::Scoping(reason),
            StageFailure::EmptyBrief => Self::EmptyBrief,
            StageFailure::Report(reason) => Self::Report(reason),
            StageFailure::Workflow(reason) => Self::Workflow(reason),
        }
    }
}

fn started(events: &EventCollector, stage: Stage) {
    events.emit(EventKind::StageStarted { stage });
}

fn succeeded(events: &EventCollector, stage: Stage) {
    events.emit(EventKind::StageFinished {
        stage,
        outcome: TaskOutcome::Success,
    });
}

/// Record a fatal failure and end the graph.
async fn fail(
    context: &Context,
    events: &EventCollector,
    stage: Stage,
    err: &ResearchError,
) -> graph_flow::Result<TaskResult> {
    error!(stage = stage.as_str(), error = %err, "stage failed; ending run");
    events.emit(EventKind::StageFinished {
        stage,
        outcome: TaskOutcome::Failure {
            reason: err.to_string(),
        },
    });
    context.set(keys::FAILURE, StageFailure::from(err)).await;
    Ok(TaskResult::new(Some(err.to_string()), NextAction::End))
}

pub struct ClarifyTask {
    scoping: Arc<ScopingStage>,
    events: EventCollector,
}

impl ClarifyTask {
    pub fn new(scoping: Arc<ScopingStage>, events: EventCollector) -> Self {
        Self { scoping, events }
    }
}

#[async_trait]
impl Task for ClarifyTask {
    fn id(&self) -> &str {
        "clarify"
    }

    #[instrument(name = "task.clarify", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        started(&self.events, Stage::Clarify);
        let mut conversation: Conversation =
            context.get(keys::CONVERSATION).await.unwrap_or_default();

        let decision = match self.scoping.clarify(&mut conversation).await {
            Ok(decision) => decision,
            Err(err) => return fail(&context, &self.events, Stage::Clarify, &err).await,
        };
        context.set(keys::CONVERSATION, &conversation).await;
        succeeded(&self.events, Stage::Clarify);

        match decision {
            ScopingDecision::Clarify { question } => {
                context.set(keys::QUESTION, &question).await;
                info!(%question, "run paused for clarification");
                Ok(TaskResult::new(Some(question), NextAction::End))
            }
            ScopingDecision::Proceed => Ok(TaskResult::new(
                Some("Request is ready for research".to_string()),
                NextAction::ContinueAndExecute,
            )),
        }
    }
}

pub struct BriefTask {
    scoping: Arc<ScopingStage>,
    events: EventCollector,
}

impl BriefTask {
    pub fn new(scoping: Arc<ScopingStage>, events: EventCollector) -> Self {
        Self { scoping, events }
    }
}

#[async_trait]
impl Task for BriefTask {
    fn id(&self) -> &str {
        "write_brief"
    }

    #[instrument(name = "task.write_brief", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        started(&self.events, Stage::Brief);
        let conversation: Conversation = context.get(keys::CONVERSATION).await.unwrap_or_default();

        match self.scoping.write_brief(&conversation).await {
            Ok(brief) => {
                context.set(keys::BRIEF, &brief).await;
                succeeded(&self.events, Stage::Brief);
                Ok(TaskResult::new(
                    Some(brief.to_string()),
                    NextAction::ContinueAndExecute,
                ))
            }
            Err(err) => fail(&context, &self.events, Stage::Brief, &err).await,
        }
    }
}

pub struct SupervisorTask {
    supervisor: Arc<Supervisor>,
    events: EventCollector,
}

impl SupervisorTask {
    pub fn new(supervisor: Arc<Supervisor>, events: EventCollector) -> Self {
        Self { supervisor, events }
    }
}

#[async_trait]
impl Task for SupervisorTask {
    fn id(&self) -> &str {
        "supervisor"
    }

    #[instrument(name = "task.supervisor", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        started(&self.events, Stage::Supervisor);
        let Some(brief) = context.get::<ResearchBrief>(keys::BRIEF).await else {
            return fail(
                &context,
                &self.events,
                Stage::Supervisor,
                &ResearchError::EmptyBrief,
            )
            .await;
        };

        let state = self.supervisor.run(brief).await;
        let summary = format!(
            "Research concluded after {} round(s) with {} note(s)",
            state.round_count(),
            state.notes().len()
        );
        context.set(keys::SUPERVISOR, &state).await;
        succeeded(&self.events, Stage::Supervisor);

        Ok(TaskResult::new(Some(summary), NextAction::ContinueAndExecute))
    }
}

pub struct ReportTask {
    synthesizer: Arc<ReportSynthesizer>,
    events: EventCollector,
}

impl ReportTask {
    pub fn new(synthesizer: Arc<ReportSynthesizer>, events: EventCollector) -> Self {
        Self {
            synthesizer,
            events,
        }
    }
}

#[async_trait]
impl Task for ReportTask {
    fn id(&self) -> &str {
        "final_report"
    }

    #[instrument(name = "task.final_report", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        started(&self.events, Stage::Report);
        let Some(state) = context.get::<SupervisorState>(keys::SUPERVISOR).await else {
            let err = ResearchError::Workflow("supervisor state missing".into());
            return fail(&context, &self.events, Stage::Report, &err).await;
        };

        let report: FinalReport = match self
            .synthesizer
            .synthesize(state.research_brief(), state.notes())
            .await
        {
            Ok(report) => report,
            Err(err) => return fail(&context, &self.events, Stage::Report, &err).await,
        };

        context.set(keys::REPORT, &report).await;
        succeeded(&self.events, Stage::Report);

        Ok(TaskResult::new(Some(report.into_string()), NextAction::End))
    }
}
