//! Supervisor: plans delegation rounds, fans research workers out, joins them back in
//! request-issue order and decides when research is complete.
//!
//! Both the round count and the tool-call count are capped; the guard runs before every
//! planning step so a cap forces conclusion without another planner call.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::capability::{DynLanguageModel, StructuredOutputError, invoke_structured};
use crate::config::RunConfig;
use crate::error::WorkerFailure;
use crate::events::{EventCollector, EventKind, TaskOutcome};
use crate::metrics;
use crate::prompts;
use crate::schema::SupervisorDecision;
use crate::state::{ConclusionReason, DelegationRequest, ResearchBrief, SupervisorState};
use crate::worker::{ResearchWorker, WorkerReport};

#[derive(Debug)]
pub enum SupervisorPhase {
    Planning,
    Delegating(Vec<DelegationRequest>),
    Aggregating(Vec<WorkerOutcome>),
    Concluding(ConclusionReason),
}

/// Result of one dispatched request, kept next to the request that produced it.
#[derive(Debug)]
pub struct WorkerOutcome {
    pub request: DelegationRequest,
    pub result: Result<WorkerReport, WorkerFailure>,
}

enum Plan {
    Delegate(Vec<DelegationRequest>),
    Complete(ConclusionReason),
}

pub struct Supervisor {
    planner: DynLanguageModel,
    worker: Arc<ResearchWorker>,
    config: RunConfig,
    date: String,
    events: EventCollector,
}

impl Supervisor {
    pub fn new(
        planner: DynLanguageModel,
        worker: Arc<ResearchWorker>,
        config: RunConfig,
        date: String,
        events: EventCollector,
    ) -> Self {
        Self {
            planner,
            worker,
            config,
            date,
            events,
        }
    }

    /// Drive the delegation loop to completion and return the frozen state.
    #[instrument(name = "supervisor.run", skip_all)]
    pub async fn run(&self, brief: ResearchBrief) -> SupervisorState {
        let mut state = SupervisorState::new(brief);
        let mut phase = SupervisorPhase::Planning;

        loop {
            phase = match phase {
                SupervisorPhase::Planning => match self.guard(&state) {
                    Some(reason) => SupervisorPhase::Concluding(reason),
                    None => match self.plan(&state).await {
                        Ok(Plan::Delegate(requests)) => SupervisorPhase::Delegating(requests),
                        Ok(Plan::Complete(reason)) => SupervisorPhase::Concluding(reason),
                        Err(err) => {
                            error!(error = %err, "planning failed; concluding with collected notes");
                            SupervisorPhase::Concluding(ConclusionReason::PlanningFailed)
                        }
                    },
                },
                SupervisorPhase::Delegating(requests) => {
                    let remaining = self
                        .config
                        .max_tool_calls
                        .saturating_sub(state.tool_call_count());
                    let assignments =
                        allot_budgets(requests, remaining, self.config.max_worker_tool_calls);
                    SupervisorPhase::Aggregating(self.delegate(assignments).await)
                }
                SupervisorPhase::Aggregating(outcomes) => {
                    aggregate(&mut state, outcomes);
                    SupervisorPhase::Planning
                }
                SupervisorPhase::Concluding(reason) => {
                    state.conclude(reason);
                    self.events.emit(EventKind::SupervisorConcluded {
                        reason,
                        rounds: state.round_count(),
                        tool_calls: state.tool_call_count(),
                        notes: state.notes().len(),
                    });
                    info!(
                        reason = reason.as_str(),
                        rounds = state.round_count(),
                        tool_calls = state.tool_call_count(),
                        notes = state.notes().len(),
                        "supervisor concluded"
                    );
                    return state;
                }
            };
        }
    }

    fn guard(&self, state: &SupervisorState) -> Option<ConclusionReason> {
        if state.round_count() >= self.config.max_rounds {
            Some(ConclusionReason::RoundLimit)
        } else if state.tool_call_count() >= self.config.max_tool_calls {
            Some(ConclusionReason::ToolCallLimit)
        } else {
            None
        }
    }

    async fn plan(&self, state: &SupervisorState) -> Result<Plan, StructuredOutputError> {
        let round = state.round_count() + 1;
        let prompt = prompts::supervisor_prompt(
            state.research_brief(),
            state.notes(),
            round,
            self.config.max_rounds,
            &self.date,
        );
        let decision =
            invoke_structured::<SupervisorDecision>(self.planner.as_ref(), &prompt).await?;

        if let Some(reflection) = decision.reflection.as_deref() {
            debug!(round, %reflection, "supervisor reflection");
        }
        if decision.research_complete {
            if !decision.conduct_research.is_empty() {
                debug!(
                    ignored = decision.conduct_research.len(),
                    "completion signalled; ignoring topics issued alongside it"
                );
            }
            return Ok(Plan::Complete(ConclusionReason::ResearchComplete));
        }

        let issued = decision.conduct_research.len();
        let requests: Vec<DelegationRequest> = decision
            .conduct_research
            .into_iter()
            .filter_map(|topic| DelegationRequest::new(topic, round))
            .collect();
        if requests.len() < issued {
            warn!(
                rejected = issued - requests.len(),
                "rejected delegation requests with empty topics"
            );
        }

        if requests.is_empty() {
            Ok(Plan::Complete(ConclusionReason::ImplicitCompletion))
        } else {
            Ok(Plan::Delegate(requests))
        }
    }

    /// Run every assignment on its own task and return outcomes in issue order.
    async fn delegate(&self, assignments: Vec<(DelegationRequest, u32)>) -> Vec<WorkerOutcome> {
        let round = assignments
            .first()
            .map(|(request, _)| request.round())
            .unwrap_or_default();
        info!(round, requests = assignments.len(), "delegating research round");
        metrics::record_round(assignments.len());
        self.events.emit(EventKind::RoundStarted {
            round,
            requests: assignments.len(),
        });

        let width = self
            .config
            .max_concurrent_workers
            .clamp(1, assignments.len().max(1));
        let semaphore = Arc::new(Semaphore::new(width));
        let mut join_set = JoinSet::new();
        let requests: Vec<DelegationRequest> = assignments
            .iter()
            .map(|(request, _)| request.clone())
            .collect();

        for (index, (request, budget)) in assignments.into_iter().enumerate() {
            let worker = Arc::clone(&self.worker);
            let semaphore = Arc::clone(&semaphore);
            let events = self.events.clone();

            join_set.spawn(async move {
                // Permit for concurrency control
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(err) => {
                        let failure = WorkerFailure::new(request.topic(), err.to_string(), 0);
                        return (index, Err(failure));
                    }
                };

                events.emit(EventKind::WorkerStarted {
                    round: request.round(),
                    index,
                    topic: request.topic().to_string(),
                });
                let started = Instant::now();

                let result = AssertUnwindSafe(worker.research(&request, index, budget))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        // Spend is unknown after a panic; charge the whole allotment.
                        Err(WorkerFailure::new(request.topic(), "worker panicked", budget))
                    });

                let duration_ms = started.elapsed().as_millis() as u64;
                let (status, outcome, tool_calls) = match &result {
                    Ok(report) => ("success", TaskOutcome::Success, report.tool_calls),
                    Err(failure) => (
                        "failure",
                        TaskOutcome::Failure {
                            reason: failure.reason.clone(),
                        },
                        failure.tool_calls,
                    ),
                };
                metrics::record_worker_metrics(status, tool_calls, duration_ms);
                events.emit(EventKind::WorkerFinished {
                    round: request.round(),
                    index,
                    outcome,
                    tool_calls,
                    duration_ms,
                });

                (index, result)
            });
        }

        // Buffer by index: completion order must not leak into note order.
        let mut slots: Vec<Option<Result<WorkerReport, WorkerFailure>>> =
            (0..requests.len()).map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(err) => warn!(error = %err, "worker task did not complete"),
            }
        }

        requests
            .into_iter()
            .zip(slots)
            .map(|(request, slot)| {
                let result = slot.unwrap_or_else(|| {
                    Err(WorkerFailure::new(
                        request.topic(),
                        "worker task did not complete",
                        0,
                    ))
                });
                WorkerOutcome { request, result }
            })
            .collect()
    }
}

/// Split the remaining tool-call budget across a round's requests.
///
/// Every dispatched request gets the same budget, capped per worker; when fewer calls
/// remain than requests, only the first `remaining` requests are kept, each with one call.
pub fn allot_budgets(
    requests: Vec<DelegationRequest>,
    remaining: u32,
    per_worker_cap: u32,
) -> Vec<(DelegationRequest, u32)> {
    if remaining == 0 || requests.is_empty() {
        return Vec::new();
    }

    let dispatched = requests.len().min(remaining as usize);
    if dispatched < requests.len() {
        warn!(
            dropped = requests.len() - dispatched,
            remaining, "tool-call budget cannot cover every request; dropping the tail"
        );
    }
    let share = (remaining / dispatched as u32).min(per_worker_cap).max(1);

    requests
        .into_iter()
        .take(dispatched)
        .map(|request| (request, share))
        .collect()
}

/// Append the round's notes in issue order and charge its tool calls.
fn aggregate(state: &mut SupervisorState, outcomes: Vec<WorkerOutcome>) {
    let mut notes = Vec::with_capacity(outcomes.len());
    let mut tool_calls = 0u32;

    for outcome in outcomes {
        match outcome.result {
            Ok(report) => {
                tool_calls += report.tool_calls;
                notes.push(report.note);
            }
            Err(failure) => {
                tool_calls += failure.tool_calls;
                warn!(%failure, "topic produced no note");
            }
        }
    }

    state.record_round(notes, tool_calls);
    debug!(
        round = state.round_count(),
        notes = state.notes().len(),
        tool_calls = state.tool_call_count(),
        "round aggregated"
    );
}
