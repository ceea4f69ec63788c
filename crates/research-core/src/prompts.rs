//! Prompt builders. Each prompt carries its inputs in tagged sections so capabilities
//! (and the offline model) can locate them.

use chrono::{DateTime, Utc};

use crate::state::{Conversation, ResearchBrief, ResearchNote};

/// Today's date in the `Fri Oct 16, 2026` form injected into prompts.
pub fn today_str() -> String {
    format_date(Utc::now())
}

pub fn format_date(now: DateTime<Utc>) -> String {
    now.format("%a %b %-d, %Y").to_string()
}

pub(crate) fn section(tag: &str, body: &str) -> String {
    format!("<{tag}>\n{body}\n</{tag}>")
}

/// Body of the first `<tag>...</tag>` section in `prompt`, trimmed.
pub fn extract_section<'a>(prompt: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = prompt.find(&open)? + open.len();
    let end = prompt[start..].find(&close)? + start;
    Some(prompt[start..end].trim())
}

pub fn clarify_prompt(conversation: &Conversation, date: &str) -> String {
    format!(
        "Today's date is {date}.\n\
         Decide whether the request below can be researched as-is. If an acronym, scope or \
         key term is ambiguous, ask ONE clarifying question. Otherwise acknowledge that \
         research will start.\n\n{}",
        section("Messages", &conversation.to_buffer_string())
    )
}

pub fn research_brief_prompt(conversation: &Conversation, date: &str) -> String {
    format!(
        "Today's date is {date}.\n\
         Translate the conversation below into one detailed research question written from \
         the user's perspective. Keep every stated preference and leave unstated dimensions \
         open.\n\n{}",
        section("Messages", &conversation.to_buffer_string())
    )
}

pub fn supervisor_prompt(
    brief: &ResearchBrief,
    notes: &[ResearchNote],
    round: u32,
    max_rounds: u32,
    date: &str,
) -> String {
    let findings = if notes.is_empty() {
        String::new()
    } else {
        render_notes(notes)
    };
    format!(
        "Today's date is {date}. You lead a research team (round {round} of {max_rounds}).\n\
         Delegate independent sub-topics with `conduct_research` (one detailed topic each), \
         or set `research_complete` when the findings answer the brief.\n\n{}\n\n{}",
        section("Brief", brief.as_str()),
        section("Notes", &findings)
    )
}

pub fn researcher_prompt(topic: &str, transcript: &str, remaining_calls: u32, date: &str) -> String {
    format!(
        "Today's date is {date}. You research a single topic with tools: `search`, \
         `dataset_search`, `think` (reflect after each search) and `conclude` when the \
         topic is covered. {remaining_calls} tool call(s) remain.\n\n{}\n\n{}",
        section("Topic", topic),
        section("Transcript", transcript)
    )
}

pub fn compress_prompt(topic: &str, findings: &str, date: &str) -> String {
    format!(
        "Today's date is {date}. Rewrite the research findings below into a clean, \
         comprehensive note for the topic. Keep every relevant fact and cite source URLs.\n\n\
         {}\n\n{}",
        section("Topic", topic),
        section("Findings", findings)
    )
}

pub fn summarize_prompt(raw_content: &str, date: &str) -> String {
    format!(
        "Today's date is {date}. Summarise the web page content below and list its key \
         excerpts.\n\n{}",
        section("Content", raw_content)
    )
}

pub fn final_report_prompt(brief: &ResearchBrief, findings: &str, date: &str) -> String {
    format!(
        "Today's date is {date}. Write a comprehensive, well-structured report answering \
         the brief from the findings. Cite sources inline.\n\n{}\n\n{}",
        section("Brief", brief.as_str()),
        section("Findings", findings)
    )
}

/// Notes joined in insertion order.
pub fn render_notes(notes: &[ResearchNote]) -> String {
    notes
        .iter()
        .map(|note| note.content())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn date_format_matches_prompt_convention() {
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 9, 30, 0).unwrap();
        assert_eq!(format_date(now), "Fri Oct 16, 2026");
    }

    #[test]
    fn sections_round_trip_through_extraction() {
        let prompt = researcher_prompt("flat whites in city X", "", 4, "today");
        assert_eq!(extract_section(&prompt, "Topic"), Some("flat whites in city X"));
        assert_eq!(extract_section(&prompt, "Transcript"), Some(""));
        assert_eq!(extract_section(&prompt, "Brief"), None);
    }
}
