use tracing::{info, instrument};

use crate::ResearchError;
use crate::capability::DynLanguageModel;
use crate::prompts;
use crate::state::{FinalReport, ResearchBrief, ResearchNote};

/// Writes the final report from the brief and the notes, in note order.
pub struct ReportSynthesizer {
    writer: DynLanguageModel,
    date: String,
}

impl ReportSynthesizer {
    pub fn new(writer: DynLanguageModel, date: String) -> Self {
        Self { writer, date }
    }

    /// Single attempt; any writer failure is fatal to the run.
    #[instrument(name = "report.synthesize", skip_all, fields(notes = notes.len()))]
    pub async fn synthesize(
        &self,
        brief: &ResearchBrief,
        notes: &[ResearchNote],
    ) -> Result<FinalReport, ResearchError> {
        let findings = prompts::render_notes(notes);
        let prompt = prompts::final_report_prompt(brief, &findings, &self.date);

        let text = self
            .writer
            .invoke(&prompt)
            .await
            .map_err(|err| ResearchError::Report(err.to_string()))?;
        if text.trim().is_empty() {
            return Err(ResearchError::Report("writer returned an empty report".into()));
        }

        info!(chars = text.len(), "final report written");
        Ok(FinalReport::new(text))
    }
}
