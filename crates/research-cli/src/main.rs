use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use research_core::metrics::init_metrics_from_env;
use research_core::{
    Capabilities, ConfigLoader, Conversation, IngestDocument, InMemorySearch, OfflineModel,
    RunOptions, RunOutcome, TelemetryOptions, init_telemetry, run_research,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(
    name = "research-cli",
    version,
    about = "Supervised multi-worker research over an offline corpus"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the research pipeline for one request.
    Run(RunArgs),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TraceFormat {
    Markdown,
    Mermaid,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Research request (first user turn).
    #[arg(long)]
    query: String,

    /// Additional user turns, e.g. answers to an earlier clarifying question.
    #[arg(long = "turn")]
    turns: Vec<String>,

    /// Optional session ID (a UUID is generated when omitted).
    #[arg(long)]
    session: Option<String>,

    /// Configuration file (defaults to `RESEARCH_CONFIG` or `config.toml`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// File or directory of text documents to search.
    #[arg(long)]
    corpus: Option<PathBuf>,

    /// Recurse into subdirectories of the corpus.
    #[arg(long, default_value_t = false)]
    recursive: bool,

    #[arg(long)]
    max_rounds: Option<u32>,

    #[arg(long)]
    max_tool_calls: Option<u32>,

    #[arg(long)]
    max_concurrent_workers: Option<usize>,

    /// Print the run trace after the report.
    #[arg(long, value_enum)]
    trace: Option<TraceFormat>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let rt = Runtime::new()?;
    rt.block_on(async move {
        match cli.command {
            Command::Run(args) => run_command(args).await?,
        }
        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}

async fn run_command(args: RunArgs) -> Result<()> {
    let mut config = ConfigLoader::load(args.config.clone())?;
    init_telemetry(TelemetryOptions::from_logging(&config.logging))?;
    init_metrics_from_env("research-cli")?;

    if let Some(max_rounds) = args.max_rounds {
        config.research.max_rounds = max_rounds;
    }
    if let Some(max_tool_calls) = args.max_tool_calls {
        config.research.max_tool_calls = max_tool_calls;
    }
    if let Some(workers) = args.max_concurrent_workers {
        config.research.max_concurrent_workers = workers;
    }

    let search = Arc::new(InMemorySearch::new());
    match &args.corpus {
        Some(path) => {
            let ingested = search.ingest(collect_documents(path, args.recursive)?);
            info!(path = %path.display(), ingested, "corpus loaded");
        }
        None => warn!("no corpus given; searches will return no results"),
    }

    let mut conversation = Conversation::from_user(args.query.as_str());
    for turn in &args.turns {
        conversation.push_user(turn.as_str());
    }

    let mut options = RunOptions::new(conversation).with_config(&config);
    if let Some(session_id) = args.session {
        options = options.with_session_id(session_id);
    }

    info!(query = %args.query, "starting research run");
    let capabilities = Capabilities::new(Arc::new(OfflineModel::new()), search);

    match run_research(capabilities, options).await? {
        RunOutcome::NeedsClarification { question, .. } => {
            println!("{question}");
            println!("\n(re-run with --turn \"<answer>\" to continue)");
        }
        RunOutcome::Completed(run) => {
            println!("{}", run.final_report);
            info!(
                session = %run.session_id,
                rounds = run.supervisor.round_count,
                tool_calls = run.supervisor.tool_call_count,
                conclusion = run.supervisor.conclusion.as_str(),
                "research run finished"
            );
            match args.trace {
                Some(TraceFormat::Markdown) => println!("\n{}", run.trace.render_markdown()),
                Some(TraceFormat::Mermaid) => println!("\n{}", run.trace.render_mermaid()),
                None => {}
            }
        }
    }
    Ok(())
}

fn collect_documents(path: &Path, recursive: bool) -> Result<Vec<IngestDocument>> {
    let mut docs = Vec::new();
    let entries: Box<dyn Iterator<Item = PathBuf>> = if path.is_file() {
        Box::new(std::iter::once(path.to_path_buf()))
    } else {
        let walker = WalkDir::new(path)
            .min_depth(0)
            .max_depth(if recursive { usize::MAX } else { 1 });
        Box::new(
            walker
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path()),
        )
    };

    for file in entries {
        let text = fs::read_to_string(&file)
            .with_context(|| format!("failed to read {}", file.display()))?;
        if text.trim().is_empty() {
            continue;
        }
        let title = file
            .file_stem()
            .map(|stem| stem.to_string_lossy().replace(['-', '_'], " "))
            .unwrap_or_else(|| file.display().to_string());
        docs.push(IngestDocument {
            id: Uuid::new_v4().to_string(),
            url: format!("file://{}", file.display()),
            title,
            text,
        });
    }

    Ok(docs)
}
