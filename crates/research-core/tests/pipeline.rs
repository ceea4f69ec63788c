use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use research_core::{
    Capabilities, ConclusionReason, Conversation, EMPTY_REQUEST_QUESTION, IngestDocument,
    InMemorySearch, LanguageModel, OfflineModel, OutputSchema, ResearchError, Role, RunConfig,
    RunOptions, RunOutcome, prompts, run_research,
};
use serde_json::Value;

const SHOPS: [&str; 3] = ["Ember Roasters", "Lantern Cafe", "Juniper Bar"];

fn coffee_corpus() -> Arc<InMemorySearch> {
    let search = InMemorySearch::new();
    search.ingest([
        IngestDocument {
            id: "ember".into(),
            url: "https://local.test/ember".into(),
            title: "Ember Roasters".into(),
            text: "Ember Roasters roasts its own beans in city X. Espresso costs $3.50 and the room is loud but warm.".into(),
        },
        IngestDocument {
            id: "lantern".into(),
            url: "https://local.test/lantern".into(),
            title: "Lantern Cafe".into(),
            text: "Lantern Cafe serves single origin pour-overs. Prices start at $4 and the atmosphere is quiet.".into(),
        },
        IngestDocument {
            id: "juniper".into(),
            url: "https://local.test/juniper".into(),
            title: "Juniper Bar".into(),
            text: "Juniper Bar is a coffee bar with a $3 cortado. Seating is limited but the staff are friendly.".into(),
        },
    ]);
    Arc::new(search)
}

fn coffee_request() -> Conversation {
    Conversation::from_user(
        SHOPS
            .iter()
            .map(|shop| format!("Evaluate {shop} in city X on quality, price and atmosphere."))
            .collect::<Vec<_>>()
            .join(" "),
    )
}

/// Offline model with injectable faults.
#[derive(Default)]
struct Faulty {
    inner: OfflineModel,
    failing_topic: Option<&'static str>,
    broken_scoping: bool,
    broken_writer: bool,
    stall: bool,
}

#[async_trait]
impl LanguageModel for Faulty {
    async fn invoke(&self, prompt: &str) -> anyhow::Result<String> {
        if self.broken_writer && prompts::extract_section(prompt, "Brief").is_some() {
            anyhow::bail!("writer unavailable");
        }
        self.inner.invoke(prompt).await
    }

    async fn invoke_structured(
        &self,
        prompt: &str,
        schema: &OutputSchema,
    ) -> anyhow::Result<Value> {
        if self.broken_scoping && schema.name == "ClarifyWithUser" {
            anyhow::bail!("scoping model unavailable");
        }
        if schema.name == "ResearcherAction" {
            let topic = prompts::extract_section(prompt, "Topic").unwrap_or_default();
            if self.failing_topic.is_some_and(|failing| topic.contains(failing)) {
                anyhow::bail!("research model unavailable for {topic}");
            }
            if self.stall {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
        }
        self.inner.invoke_structured(prompt, schema).await
    }
}

fn capabilities(model: Faulty) -> Capabilities {
    Capabilities::new(Arc::new(model), coffee_corpus())
}

#[tokio::test]
async fn coffee_shop_scenario_reports_on_every_shop() {
    let outcome = run_research(
        capabilities(Faulty::default()),
        RunOptions::new(coffee_request()).with_session_id("coffee"),
    )
    .await
    .unwrap();

    let RunOutcome::Completed(run) = outcome else {
        panic!("expected a completed run");
    };

    assert_eq!(run.session_id, "coffee");
    assert_eq!(run.notes.len(), 3);
    for (note, shop) in run.notes.iter().zip(SHOPS) {
        assert!(note.topic().contains(shop));
        assert!(note.content().contains(shop));
        assert_eq!(note.round(), 1);
    }

    let report = run.final_report.as_str();
    assert!(!report.trim().is_empty());
    for shop in SHOPS {
        assert!(report.contains(shop), "report is missing {shop}");
    }

    assert_eq!(run.supervisor.round_count, 1);
    assert_eq!(run.supervisor.tool_call_count, 6);
    assert_eq!(run.supervisor.conclusion, ConclusionReason::ResearchComplete);

    // Scoping adds the verification turn; later stages leave the conversation alone.
    let turns = run.conversation.turns();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role, Role::Human);
    assert_eq!(turns[1].role, Role::Assistant);
    assert!(turns.iter().all(|turn| !turn.text.contains("# Report")));

    let trace = run.trace.render_markdown();
    assert!(trace.contains("concluded (research_complete)"));
    assert!(trace.contains("worker 1.2 → researching Evaluate Juniper Bar"));
}

#[tokio::test]
async fn vague_request_ends_with_clarifying_question() {
    let outcome = run_research(
        capabilities(Faulty::default()),
        RunOptions::new(Conversation::from_user("coffee?")),
    )
    .await
    .unwrap();

    let RunOutcome::NeedsClarification {
        conversation,
        question,
    } = outcome
    else {
        panic!("expected a clarification outcome");
    };
    assert_eq!(conversation.len(), 2);
    assert_eq!(conversation.last().unwrap().text, question);
}

#[tokio::test]
async fn empty_conversation_is_a_deterministic_clarification() {
    for _ in 0..2 {
        let outcome = run_research(
            capabilities(Faulty::default()),
            RunOptions::new(Conversation::new()),
        )
        .await
        .unwrap();

        assert!(matches!(
            outcome,
            RunOutcome::NeedsClarification { ref question, .. } if question == EMPTY_REQUEST_QUESTION
        ));
    }
}

#[tokio::test]
async fn one_failed_worker_still_completes_the_run() {
    let model = Faulty {
        failing_topic: Some("Lantern"),
        ..Faulty::default()
    };
    let outcome = run_research(capabilities(model), RunOptions::new(coffee_request()))
        .await
        .unwrap();

    let RunOutcome::Completed(run) = outcome else {
        panic!("expected a completed run");
    };
    let topics: Vec<_> = run.notes.iter().map(|note| note.topic()).collect();
    assert_eq!(topics.len(), 2);
    assert!(topics[0].contains("Ember Roasters"));
    assert!(topics[1].contains("Juniper Bar"));
    assert!(!run.final_report.as_str().is_empty());
    assert!(
        run.trace
            .render_markdown()
            .contains("failed: research model unavailable")
    );
}

#[tokio::test]
async fn scoping_failure_aborts_the_run() {
    let model = Faulty {
        broken_scoping: true,
        ..Faulty::default()
    };
    let err = run_research(capabilities(model), RunOptions::new(coffee_request()))
        .await
        .unwrap_err();

    assert!(matches!(err, ResearchError::Scoping(_)));
}

#[tokio::test]
async fn report_failure_discards_research() {
    let writer = Faulty {
        broken_writer: true,
        ..Faulty::default()
    };
    let caps = capabilities(Faulty::default()).with_writer(Arc::new(writer));

    let err = run_research(caps, RunOptions::new(coffee_request()))
        .await
        .unwrap_err();

    assert!(matches!(err, ResearchError::Report(reason) if reason.contains("writer unavailable")));
}

#[tokio::test]
async fn run_timeout_cancels_in_flight_workers() {
    let model = Faulty {
        stall: true,
        ..Faulty::default()
    };
    let config = RunConfig {
        run_timeout_secs: Some(1),
        ..RunConfig::default()
    };

    let err = run_research(
        capabilities(model),
        RunOptions::new(coffee_request()).with_run_config(config),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ResearchError::Cancelled(_)));
}

#[tokio::test]
async fn invalid_caps_are_rejected_before_running() {
    let config = RunConfig {
        max_rounds: 0,
        ..RunConfig::default()
    };
    let err = run_research(
        capabilities(Faulty::default()),
        RunOptions::new(coffee_request()).with_run_config(config),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ResearchError::InvalidConfiguration(_)));
}
