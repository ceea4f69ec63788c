//! Scoping: decide whether the request needs a clarifying question, then turn the
//! conversation into a research brief.

use tracing::{info, instrument, warn};

use crate::ResearchError;
use crate::capability::{DynLanguageModel, invoke_structured};
use crate::prompts;
use crate::schema::{ClarifyWithUser, ResearchQuestion};
use crate::state::{Conversation, ResearchBrief};

/// Asked without consulting the model when there is nothing to scope.
pub const EMPTY_REQUEST_QUESTION: &str = "What would you like me to research?";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopingDecision {
    /// The question has been appended to the conversation; the run stops here.
    Clarify { question: String },
    Proceed,
}

pub struct ScopingStage {
    model: DynLanguageModel,
    date: String,
}

impl ScopingStage {
    pub fn new(model: DynLanguageModel, date: String) -> Self {
        Self { model, date }
    }

    /// Step one. Extends `conversation` by one assistant turn in either direction.
    #[instrument(name = "scoping.clarify", skip_all, fields(turns = conversation.len()))]
    pub async fn clarify(
        &self,
        conversation: &mut Conversation,
    ) -> Result<ScopingDecision, ResearchError> {
        if conversation.is_blank() {
            warn!("empty conversation; asking for a research request");
            conversation.push_assistant(EMPTY_REQUEST_QUESTION);
            return Ok(ScopingDecision::Clarify {
                question: EMPTY_REQUEST_QUESTION.to_string(),
            });
        }

        let prompt = prompts::clarify_prompt(conversation, &self.date);
        let judgment = invoke_structured::<ClarifyWithUser>(self.model.as_ref(), &prompt)
            .await
            .map_err(|err| ResearchError::Scoping(err.to_string()))?;

        if judgment.need_clarification {
            let question = judgment.question.trim().to_string();
            info!(%question, "clarification needed");
            conversation.push_assistant(question.clone());
            return Ok(ScopingDecision::Clarify { question });
        }

        if !judgment.verification.trim().is_empty() {
            conversation.push_assistant(judgment.verification.trim());
        }
        Ok(ScopingDecision::Proceed)
    }

    /// Step two.
    #[instrument(name = "scoping.brief", skip_all, fields(turns = conversation.len()))]
    pub async fn write_brief(
        &self,
        conversation: &Conversation,
    ) -> Result<ResearchBrief, ResearchError> {
        let prompt = prompts::research_brief_prompt(conversation, &self.date);
        let question = invoke_structured::<ResearchQuestion>(self.model.as_ref(), &prompt)
            .await
            .map_err(|err| ResearchError::Scoping(err.to_string()))?;

        let brief = ResearchBrief::new(question.research_brief)?;
        info!(chars = brief.as_str().len(), "research brief written");
        Ok(brief)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{LanguageModel, OutputSchema};
    use crate::state::Role;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Judge {
        clarify: Value,
        brief: Value,
        calls: AtomicUsize,
    }

    impl Judge {
        fn new(clarify: Value, brief: Value) -> Self {
            Self {
                clarify,
                brief,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for Judge {
        async fn invoke(&self, _prompt: &str) -> anyhow::Result<String> {
            anyhow::bail!("free text not used while scoping")
        }

        async fn invoke_structured(
            &self,
            _prompt: &str,
            schema: &OutputSchema,
        ) -> anyhow::Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match schema.name {
                "ClarifyWithUser" => Ok(self.clarify.clone()),
                _ => Ok(self.brief.clone()),
            }
        }
    }

    fn stage(judge: Arc<Judge>) -> ScopingStage {
        ScopingStage::new(judge, "today".into())
    }

    #[tokio::test]
    async fn clarifying_question_is_appended() {
        let judge = Arc::new(Judge::new(
            json!({"need_clarification": true, "question": "Which city?", "verification": ""}),
            json!({}),
        ));
        let mut conversation = Conversation::from_user("coffee shops");

        let decision = stage(judge).clarify(&mut conversation).await.unwrap();

        assert_eq!(
            decision,
            ScopingDecision::Clarify {
                question: "Which city?".into()
            }
        );
        assert_eq!(conversation.len(), 2);
        let last = conversation.last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.text, "Which city?");
    }

    #[tokio::test]
    async fn proceeding_records_verification_and_writes_brief() {
        let judge = Arc::new(Judge::new(
            json!({"need_clarification": false, "question": "", "verification": "Starting research."}),
            json!({"research_brief": "Evaluate coffee shops in city X"}),
        ));
        let stage = stage(judge);
        let mut conversation = Conversation::from_user("Evaluate coffee shops in city X");

        assert_eq!(
            stage.clarify(&mut conversation).await.unwrap(),
            ScopingDecision::Proceed
        );
        assert_eq!(conversation.last().unwrap().text, "Starting research.");

        let brief = stage.write_brief(&conversation).await.unwrap();
        assert_eq!(brief.as_str(), "Evaluate coffee shops in city X");
    }

    #[tokio::test]
    async fn blank_conversation_asks_without_calling_model() {
        let judge = Arc::new(Judge::new(json!({}), json!({})));
        let mut conversation = Conversation::from_user("   ");

        let decision = stage(judge.clone()).clarify(&mut conversation).await.unwrap();

        assert_eq!(
            decision,
            ScopingDecision::Clarify {
                question: EMPTY_REQUEST_QUESTION.into()
            }
        );
        assert_eq!(judge.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn malformed_judgments_are_scoping_failures() {
        let judge = Arc::new(Judge::new(
            json!({"need_clarification": true, "question": " "}),
            json!({"research_brief": ""}),
        ));
        let stage = stage(judge);
        let mut conversation = Conversation::from_user("coffee shops in city X");

        let err = stage.clarify(&mut conversation).await.unwrap_err();
        assert!(matches!(err, ResearchError::Scoping(_)));
        assert_eq!(conversation.len(), 1);

        let err = stage.write_brief(&conversation).await.unwrap_err();
        assert!(matches!(err, ResearchError::Scoping(_)));
    }
}
