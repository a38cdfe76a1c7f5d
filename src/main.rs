use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ragloop_core::config::{AppConfig, RetryConfig};
use ragloop_core::event::EventBus;
use ragloop_core::traits::{EmbeddingProvider, LlmClient};
use ragloop_core::types::{RunEvent, Turn};

use ragloop_agent::{GraphExecutor, RunContext};
use ragloop_index::{HttpEmbeddingProvider, RecursiveCharacterSplitter, VectorIndex, WebLoader};
use ragloop_tools::{RetrieverTool, ToolRegistry};

#[derive(Parser)]
#[command(name = "ragloop", version, about = "Agentic retrieval-augmented question answering")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "ragloop.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest the configured sources and answer one question
    Run {
        /// The question (read from stdin when omitted)
        #[arg(trailing_var_arg = true)]
        question: Vec<String>,
    },
    /// Fetch and split the configured sources, then report counts
    Ingest,
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("ragloop=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "ragloop", &mut io::stdout());
        return Ok(());
    }

    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Ingest => {
            let docs = WebLoader::new().load_all(&config.ingest.urls).await?;
            let splitter =
                RecursiveCharacterSplitter::new(config.ingest.chunk_size, config.ingest.chunk_overlap);
            let chunks = splitter.split_documents(&docs);
            println!("Loaded {} documents", docs.len());
            println!("Split into {} chunks", chunks.len());
        }
        Commands::Run { question } => {
            let mut text = question.join(" ");
            if text.trim().is_empty() {
                text = io::stdin()
                    .lock()
                    .lines()
                    .map_while(|l| l.ok())
                    .collect::<Vec<_>>()
                    .join("\n");
            }
            if text.trim().is_empty() {
                anyhow::bail!("no question given");
            }
            run_once(&config, text.trim()).await?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }
    if let Some(home) = AppConfig::home_config_path() {
        if home.exists() {
            info!(path = %home.display(), "Loading config from home directory");
            return Ok(AppConfig::load(&home)?);
        }
    }
    warn!(path = %path.display(), "No config file found, using defaults (local Ollama)");
    Ok(AppConfig::default())
}

/// Primary client, wrapped with retry and fallbacks when configured.
fn build_llm(config: &AppConfig) -> Arc<dyn LlmClient> {
    let primary = ragloop_llm::create_client(&config.model);
    if config.fallback_models.is_empty() && config.model.retry.is_none() {
        return Arc::from(primary);
    }

    let retry_config = config.model.retry.clone().unwrap_or_else(RetryConfig::default);
    let fallbacks: Vec<_> = config
        .fallback_models
        .iter()
        .map(|mc| (mc.clone(), ragloop_llm::create_client(mc)))
        .collect();
    Arc::new(ragloop_llm::RetryingClient::new(primary, fallbacks, retry_config))
}

async fn build_retriever(config: &AppConfig) -> anyhow::Result<RetrieverTool> {
    let docs = WebLoader::new().load_all(&config.ingest.urls).await?;
    let splitter =
        RecursiveCharacterSplitter::new(config.ingest.chunk_size, config.ingest.chunk_overlap);
    let embedder: Arc<dyn EmbeddingProvider> =
        Arc::new(HttpEmbeddingProvider::from_config(&config.embedding));

    let index: VectorIndex = ragloop_index::build_index(
        &docs,
        &splitter,
        embedder.as_ref(),
        config.embedding.batch_size,
    )
    .await?;
    info!(chunks = index.len(), "Retriever ready");

    Ok(RetrieverTool::from_config(
        &config.retriever,
        Arc::new(index),
        embedder,
    ))
}

async fn run_once(config: &AppConfig, question: &str) -> anyhow::Result<()> {
    let mut tools = ToolRegistry::new();
    tools.register(build_retriever(config).await?);

    let event_bus = Arc::new(EventBus::default());
    let ctx = RunContext::new(
        build_llm(config),
        config.model.clone(),
        config.agent.clone(),
        Arc::new(tools),
    )
    .with_event_bus(event_bus.clone());

    let cancel = ctx.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let printer = tokio::spawn(print_events(event_bus.subscribe()));
    let result = GraphExecutor::agentic_rag().run(question, &ctx).await;
    // Closing the bus lets the printer finish even if no terminal event was sent.
    drop(ctx);
    drop(event_bus);
    join_printer(printer).await;

    let result = result?;
    match result.answer() {
        Some(answer) => println!("{}", answer),
        None => println!("(no answer produced)"),
    }
    Ok(())
}

/// Wait for the printer task; a panic there is logged, never propagated.
async fn join_printer(printer: tokio::task::JoinHandle<()>) -> bool {
    match printer.await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Event printer task failed");
            false
        }
    }
}

/// Print each node's output as it arrives, until the run ends.
async fn print_events(mut rx: tokio::sync::broadcast::Receiver<RunEvent>) {
    loop {
        match rx.recv().await {
            Ok(RunEvent::NodeOutput {
                node, turns, grade, ..
            }) => {
                println!("Output from node: '{}'", node);
                let shown = match turns.last() {
                    Some(turn) => render_turn(turn),
                    None => serde_json::json!({ "grade": grade }),
                };
                println!(
                    "{}",
                    serde_json::to_string_pretty(&shown).unwrap_or_else(|_| shown.to_string())
                );
                println!("---\n");
            }
            Ok(RunEvent::RunComplete { .. }) | Ok(RunEvent::RunFailed { .. }) => break,
            Ok(_) => {}
            Err(RecvError::Lagged(n)) => warn!(skipped = n, "Event printer lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

fn render_turn(turn: &Turn) -> serde_json::Value {
    serde_json::json!({
        "type": turn.role.to_string(),
        "content": turn.content,
        "tool_calls": turn.tool_calls,
    })
}
