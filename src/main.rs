use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use skein_core::config::EngineConfig;
use skein_core::graph::GraphTemplate;
use skein_core::suspension::InteractiveSuspension;
use skein_core::traits::EventSink;
use skein_core::types::Message;

use skein_engine::stream::format_frame;
use skein_engine::{RunRequest, RunUser, WorkflowEngine};
use skein_llm::TiktokenCounter;

#[derive(Parser)]
#[command(name = "skein", version, about = "Run LLM workflow graphs and stream their events")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "skein.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow graph and write its event frames to stdout
    Run {
        /// Graph template (JSON)
        #[arg(short, long)]
        graph: PathBuf,
        /// Conversation history (JSON array of messages)
        #[arg(long)]
        history: Option<PathBuf>,
        /// Resume the paused run stored in this file; the query is the reply
        #[arg(long)]
        resume: Option<PathBuf>,
        /// Where to store the suspension if the run pauses for input
        #[arg(long, default_value = "suspension.json")]
        suspension_out: PathBuf,
        /// Only write answer, interactive and error frames
        #[arg(long)]
        no_detail: bool,
        /// Ask models for complete responses instead of streams
        #[arg(long)]
        no_stream: bool,
        /// Node dispatch budget for the run
        #[arg(long)]
        max_run_times: Option<u32>,
        /// Treat provider keys as the user's own: no billing, raw provider errors
        #[arg(long)]
        external_key: bool,
        /// The question (read from stdin when omitted)
        #[arg(trailing_var_arg = true)]
        query: Vec<String>,
    },
    /// Check that a graph template loads
    Validate {
        /// Graph template (JSON)
        graph: PathBuf,
    },
    /// Show current configuration
    Config,
}

/// Writes frames to stdout until the run is cancelled.
struct StdoutSink {
    cancel: CancellationToken,
}

impl EventSink for StdoutSink {
    fn write(&self, event: Option<&str>, data: &str) -> bool {
        let mut out = io::stdout().lock();
        if out.write_all(format_frame(event, data).as_bytes()).is_err() || out.flush().is_err() {
            self.cancel.cancel();
        }
        true
    }

    fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn drained(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Frames go to stdout, logs to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("skein=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        EngineConfig::load(&cli.config)?
    } else {
        warn!(path = %cli.config.display(), "Config not found, using defaults");
        EngineConfig::default()
    };

    let llm = skein_llm::create_client(&config)?;
    let engine = WorkflowEngine::builder(config.clone(), Arc::new(llm), Arc::new(TiktokenCounter)).build();

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Validate { graph } => {
            let template = read_template(&graph)?;
            engine.validate(&template)?;
            println!(
                "{}: ok ({} nodes, {} edges)",
                graph.display(),
                template.nodes.len(),
                template.edges.len()
            );
        }
        Commands::Run {
            graph,
            history,
            resume,
            suspension_out,
            no_detail,
            no_stream,
            max_run_times,
            external_key,
            query,
        } => {
            let query = if query.is_empty() {
                io::stdin()
                    .lock()
                    .lines()
                    .map_while(|l| l.ok())
                    .collect::<Vec<_>>()
                    .join("\n")
            } else {
                query.join(" ")
            };

            let mut request = RunRequest::new(read_template(&graph)?, query.clone())
                .user(RunUser {
                    external_key,
                    ..Default::default()
                })
                .stream(!no_stream);
            if no_detail {
                request = request.detail(false);
            }
            if let Some(limit) = max_run_times {
                request = request.max_run_times(limit);
            }
            if let Some(path) = history {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading history {}", path.display()))?;
                let histories: Vec<Message> = serde_json::from_str(&text)?;
                request = request.histories(histories);
            }
            if let Some(path) = resume {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading suspension {}", path.display()))?;
                request = request.resume(InteractiveSuspension::from_json(&text)?, query);
            }

            run_once(&engine, request, &suspension_out).await?;
        }
    }

    Ok(())
}

async fn run_once(
    engine: &WorkflowEngine,
    request: RunRequest,
    suspension_out: &Path,
) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let sink = Arc::new(StdoutSink {
        cancel: cancel.clone(),
    });

    // Ctrl-C closes the sink; the engine stops at its next check
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Cancelling run...");
            cancel.cancel();
        })
    };

    let outcome = engine.run(request, sink).await;
    watcher.abort();
    let outcome = outcome?;

    if let Some(suspension) = &outcome.suspension {
        std::fs::write(suspension_out, suspension.to_json()?)
            .with_context(|| format!("writing suspension {}", suspension_out.display()))?;
        eprintln!(
            "\n[paused for input; resume with --resume {} <reply>]",
            suspension_out.display()
        );
    }
    info!(
        dispatched = outcome.flow.dispatch_count,
        points = outcome.flow.total_points(),
        budget_left = outcome.budget_left,
        cancelled = cancel.is_cancelled(),
        "Run complete"
    );
    Ok(())
}

fn read_template(path: &Path) -> anyhow::Result<GraphTemplate> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading graph {}", path.display()))?;
    Ok(serde_json::from_str(&text)?)
}
