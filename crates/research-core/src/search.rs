//! Search aggregation: fan queries out to the search capability, deduplicate by url and
//! condense each surviving page.

use std::collections::HashSet;
use std::fmt::Write as _;

use futures::future::join_all;
use tracing::{debug, instrument, warn};

use crate::capability::{DynLanguageModel, DynSearchProvider, SearchTopic, invoke_structured};
use crate::error::AggregatorFailure;
use crate::prompts;
use crate::schema::Summary;
use crate::state::SearchResult;

const DATASET_RESULTS_PER_PLATFORM: usize = 3;

/// A deduplicated search result together with its condensed text.
#[derive(Debug, Clone, PartialEq)]
pub struct SummarizedResult {
    pub url: String,
    pub title: String,
    pub content: String,
}

pub struct SearchAggregator {
    provider: DynSearchProvider,
    summarizer: DynLanguageModel,
    date: String,
}

impl SearchAggregator {
    pub fn new(provider: DynSearchProvider, summarizer: DynLanguageModel, date: String) -> Self {
        Self {
            provider,
            summarizer,
            date,
        }
    }

    /// Run every query, keep the first occurrence of each url, then summarise.
    ///
    /// Failed queries and failed summaries are logged and dropped; the call itself never
    /// fails.
    #[instrument(name = "search.aggregate", skip(self, queries), fields(queries = queries.len()))]
    pub async fn search(
        &self,
        queries: &[String],
        max_results: usize,
        topic: SearchTopic,
    ) -> Vec<SummarizedResult> {
        let lookups = queries
            .iter()
            .map(|query| self.provider.search(query, max_results, topic));
        let responses = join_all(lookups).await;

        let mut raw = Vec::new();
        for (query, response) in queries.iter().zip(responses) {
            match response {
                Ok(results) => raw.extend(results),
                Err(err) => {
                    let failure = AggregatorFailure::new(query.as_str(), err.to_string());
                    warn!(%failure, "search query failed; continuing with partial results");
                }
            }
        }

        let unique = dedupe_by_url(raw);
        debug!(unique = unique.len(), "deduplicated search results");
        self.summarize_all(unique).await
    }

    /// Site-scoped searches for datasets on the requested platforms.
    #[instrument(name = "search.datasets", skip(self, platforms))]
    pub async fn search_datasets(&self, query: &str, platforms: &[String]) -> Vec<SummarizedResult> {
        let queries: Vec<String> = platforms
            .iter()
            .filter_map(|platform| dataset_query(platform, query))
            .collect();
        if queries.is_empty() {
            warn!(?platforms, "no supported dataset platforms requested");
            return Vec::new();
        }
        self.search(&queries, DATASET_RESULTS_PER_PLATFORM, SearchTopic::General)
            .await
    }

    async fn summarize_all(&self, results: Vec<SearchResult>) -> Vec<SummarizedResult> {
        let condensed = join_all(results.iter().map(|result| self.summarize(result))).await;
        condensed
            .into_iter()
            .filter_map(|outcome| match outcome {
                Ok(summary) => Some(summary),
                Err(failure) => {
                    warn!(%failure, "dropping search result");
                    None
                }
            })
            .collect()
    }

    async fn summarize(&self, result: &SearchResult) -> Result<SummarizedResult, AggregatorFailure> {
        let content = match result.raw_content.as_deref() {
            Some(raw) if !raw.trim().is_empty() => {
                let prompt = prompts::summarize_prompt(raw, &self.date);
                invoke_structured::<Summary>(self.summarizer.as_ref(), &prompt)
                    .await
                    .map_err(|err| AggregatorFailure::new(result.url.as_str(), err.to_string()))?
                    .render()
            }
            _ => result.content.clone(),
        };

        Ok(SummarizedResult {
            url: result.url.clone(),
            title: result.title.clone(),
            content,
        })
    }
}

/// Keep the first record for every url, preserving first-seen order.
pub fn dedupe_by_url(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|result| seen.insert(result.url.clone()))
        .collect()
}

fn dataset_query(platform: &str, query: &str) -> Option<String> {
    match platform.to_ascii_lowercase().as_str() {
        "kaggle" => Some(format!("site:kaggle.com/datasets {query} machine learning dataset")),
        "huggingface" => Some(format!("site:huggingface.co/datasets {query} dataset")),
        "github" => Some(format!("site:github.com {query} dataset machine learning data")),
        _ => None,
    }
}

/// Render summarised results as numbered source blocks.
pub fn format_search_output(results: &[SummarizedResult]) -> String {
    if results.is_empty() {
        return "No valid search results found. Please try different search queries.".to_string();
    }

    let mut output = String::from("Search results:\n");
    for (idx, result) in results.iter().enumerate() {
        let _ = write!(
            output,
            "\n--- SOURCE {}: {} ---\nURL: {}\n\nSUMMARY:\n{}\n\n{}\n",
            idx + 1,
            result.title,
            result.url,
            result.content,
            "-".repeat(80)
        );
    }
    output.truncate(output.trim_end().len());
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{LanguageModel, OutputSchema, SearchProvider};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};

    struct CannedSearch {
        by_query: Vec<(String, anyhow::Result<Vec<SearchResult>>)>,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SearchProvider for CannedSearch {
        async fn search(
            &self,
            query: &str,
            _max_results: usize,
            _topic: SearchTopic,
        ) -> anyhow::Result<Vec<SearchResult>> {
            self.seen.lock().unwrap().push(query.to_string());
            match self.by_query.iter().find(|(q, _)| q == query) {
                Some((_, Ok(results))) => Ok(results.clone()),
                Some((_, Err(err))) => Err(anyhow::anyhow!("{err}")),
                None => Ok(Vec::new()),
            }
        }
    }

    /// Summarises by echoing the content; refuses content containing "poison".
    struct EchoSummarizer;

    #[async_trait]
    impl LanguageModel for EchoSummarizer {
        async fn invoke(&self, _prompt: &str) -> anyhow::Result<String> {
            anyhow::bail!("free text not expected")
        }

        async fn invoke_structured(
            &self,
            prompt: &str,
            _schema: &OutputSchema,
        ) -> anyhow::Result<Value> {
            let content = prompts::extract_section(prompt, "Content").unwrap_or_default();
            if content.contains("poison") {
                anyhow::bail!("summariser rate limited");
            }
            Ok(json!({"summary": content, "key_excerpts": ""}))
        }
    }

    fn hit(url: &str, raw: &str) -> SearchResult {
        SearchResult::new(url, format!("title {url}")).with_raw_content(raw)
    }

    fn build(by_query: Vec<(String, anyhow::Result<Vec<SearchResult>>)>) -> (SearchAggregator, Arc<CannedSearch>) {
        let provider = Arc::new(CannedSearch {
            by_query,
            seen: Mutex::new(Vec::new()),
        });
        let aggregator = SearchAggregator::new(provider.clone(), Arc::new(EchoSummarizer), "today".into());
        (aggregator, provider)
    }

    #[test]
    fn dedupe_keeps_first_occurrence_in_order() {
        let results = vec![
            hit("https://a", "first a"),
            hit("https://b", "first b"),
            hit("https://a", "second a"),
            hit("https://c", "first c"),
            hit("https://b", "second b"),
        ];
        let unique = dedupe_by_url(results);
        let urls: Vec<_> = unique.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a", "https://b", "https://c"]);
        assert_eq!(unique[0].raw_content.as_deref(), Some("first a"));
        assert_eq!(unique[1].raw_content.as_deref(), Some("first b"));
    }

    #[tokio::test]
    async fn duplicate_urls_across_queries_are_summarised_once() {
        let (aggregator, _) = build(vec![
            ("q1".into(), Ok(vec![hit("https://a", "alpha"), hit("https://b", "beta")])),
            ("q2".into(), Ok(vec![hit("https://b", "beta again"), hit("https://c", "gamma")])),
        ]);

        let results = aggregator
            .search(&["q1".into(), "q2".into()], 3, SearchTopic::General)
            .await;
        let urls: Vec<_> = results.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a", "https://b", "https://c"]);
        assert!(results[1].content.contains("beta"));
        assert!(!results[1].content.contains("again"));
    }

    #[tokio::test]
    async fn failed_summary_drops_only_that_result() {
        let (aggregator, _) = build(vec![(
            "q".into(),
            Ok(vec![
                hit("https://a", "alpha"),
                hit("https://b", "poison"),
                hit("https://c", "gamma"),
            ]),
        )]);

        let results = aggregator.search(&["q".into()], 3, SearchTopic::News).await;
        let urls: Vec<_> = results.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a", "https://c"]);
    }

    #[tokio::test]
    async fn failed_query_keeps_partial_results() {
        let (aggregator, _) = build(vec![
            ("down".into(), Err(anyhow::anyhow!("quota exhausted"))),
            ("up".into(), Ok(vec![hit("https://a", "alpha")])),
        ]);

        let results = aggregator
            .search(&["down".into(), "up".into()], 3, SearchTopic::General)
            .await;
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn results_without_raw_content_keep_snippet() {
        let snippet = SearchResult::new("https://s", "snippet only").with_content("short snippet");
        let (aggregator, _) = build(vec![("q".into(), Ok(vec![snippet]))]);

        let results = aggregator.search(&["q".into()], 3, SearchTopic::General).await;
        assert_eq!(results[0].content, "short snippet");
    }

    #[tokio::test]
    async fn dataset_search_scopes_queries_per_platform() {
        let (aggregator, provider) = build(Vec::new());
        let platforms = vec!["Kaggle".to_string(), "gitlab".to_string(), "github".to_string()];

        let results = aggregator.search_datasets("espresso", &platforms).await;
        assert!(results.is_empty());

        let seen = provider.seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                "site:kaggle.com/datasets espresso machine learning dataset".to_string(),
                "site:github.com espresso dataset machine learning data".to_string(),
            ]
        );
    }

    #[test]
    fn formatted_output_is_numbered() {
        let results = vec![SummarizedResult {
            url: "https://a".into(),
            title: "Alpha".into(),
            content: "alpha summary".into(),
        }];
        insta::assert_snapshot!(format_search_output(&results), @r"
        Search results:

        --- SOURCE 1: Alpha ---
        URL: https://a

        SUMMARY:
        alpha summary

        --------------------------------------------------------------------------------
        ");
    }
}
