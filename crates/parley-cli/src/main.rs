//! # parley
//!
//! Command-line driver: runs a discovery meeting between offline persona
//! agents on a durable thread and prints what was said.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::pin::pin;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use parley_core::{ThreadId, logging::init_subscriber};
use parley_runtime::{
    ConversationConfig, EchoBackend, OrchestratorConfig, OrchestratorRegistry,
    StreamDeduplicator, SubmitRequest, Transcript, dedup_stream_with,
};
use parley_settings::{ParleySettings, load_settings};
use parley_store::{CheckpointStore, SqliteCheckpointStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Multi-agent discovery conversations.
#[derive(Parser, Debug)]
#[command(name = "parley", about = "Multi-agent discovery conversations")]
struct Cli {
    /// Path to the `SQLite` database (overrides settings).
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a message to a thread and let the agents take their turns.
    Run {
        /// Thread key.
        #[arg(long)]
        thread: String,

        /// Start a new conversation on a thread the agents already finished.
        #[arg(long)]
        restart: bool,

        /// Product brief handed to the customer (overrides settings).
        #[arg(long)]
        brief: Option<String>,

        /// Turn limit (overrides settings).
        #[arg(long)]
        max_turns: Option<u32>,

        /// Message text; omit to retry a failed turn.
        message: Vec<String>,
    },
    /// Print a stored thread.
    Show {
        /// Thread key.
        #[arg(long)]
        thread: String,
    },
}

fn load_or_default() -> (ParleySettings, Option<String>) {
    match load_settings() {
        Ok(settings) => (settings, None),
        Err(e) => (ParleySettings::default(), Some(e.to_string())),
    }
}

fn open_store(cli_path: Option<PathBuf>, settings: &ParleySettings) -> Result<Arc<SqliteCheckpointStore>> {
    let db_path = cli_path.unwrap_or_else(|| settings.store.resolved_db_path());
    let store = SqliteCheckpointStore::open(&db_path)
        .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
    debug!(path = %db_path.display(), "opened checkpoint store");
    Ok(Arc::new(store))
}

fn build_request(thread: &str, message: &[String], restart: bool, cancel: CancellationToken) -> SubmitRequest {
    let request = if message.is_empty() {
        SubmitRequest::retry(thread)
    } else {
        SubmitRequest::new(thread, message.join(" "))
    };
    let request = request.with_cancel(cancel);
    if restart { request.restart() } else { request }
}

async fn run(
    settings: &ParleySettings,
    store: Arc<SqliteCheckpointStore>,
    request: SubmitRequest,
    brief: Option<String>,
    max_turns: Option<u32>,
) -> Result<()> {
    let mut config = ConversationConfig::from_settings(settings);
    if let Some(brief) = brief {
        config.product_brief = brief;
    }
    if let Some(max_turns) = max_turns {
        config.max_turns = max_turns;
    }

    let registry = OrchestratorRegistry::new(settings.orchestrator.registry_capacity);
    let orchestrator = registry
        .get_or_build(
            &config,
            Arc::new(EchoBackend),
            Arc::clone(&store) as Arc<dyn CheckpointStore>,
            OrchestratorConfig::from_settings(&settings.orchestrator),
        )
        .context("Failed to set up the conversation")?;
    info!(config = %config.key(), thread = %request.thread_id, "submitting");

    let thread_id = request.thread_id.clone();
    let next_seq = store
        .get(&thread_id)
        .context("Failed to read thread")?
        .map_or(0, |cp| cp.state.messages().next_sequence_id());
    let dedup = StreamDeduplicator::new().expecting(thread_id, next_seq);

    let mut events = pin!(dedup_stream_with(orchestrator.submit(request), dedup));
    let mut transcript = Transcript::new();
    while let Some(item) = events.next().await {
        let event = item?;
        if event.is_final() {
            transcript.record(&event);
            if let Some(entry) = transcript.entries().last() {
                println!("{}: {}\n", entry.label.to_uppercase(), entry.text);
            }
        } else {
            debug!(role = event.role.tag(), turn = event.turn_index, partial = event.content(), "partial");
        }
    }
    info!(messages = transcript.entries().len(), "run finished");
    Ok(())
}

fn show(store: &SqliteCheckpointStore, thread: &str) -> Result<()> {
    let thread_id = ThreadId::from(thread);
    let Some(checkpoint) = store.get(&thread_id).context("Failed to read thread")? else {
        bail!("no thread named {thread}");
    };
    let state = &checkpoint.state;
    println!("{}", Transcript::from_history(state.history()).render());
    println!(
        "\n[{}: turn {}, {} messages, version {}]",
        state.status(),
        state.turn_index(),
        state.messages().len(),
        checkpoint.version
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (settings, load_error) = load_or_default();
    init_subscriber(&settings.logging.level, settings.logging.format);
    if let Some(error) = load_error {
        warn!(%error, "failed to load settings, using defaults");
    }

    let store = open_store(cli.db_path, &settings)?;
    match cli.command {
        Command::Run {
            thread,
            restart,
            brief,
            max_turns,
            message,
        } => {
            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            drop(tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    trigger.cancel();
                }
            }));
            let request = build_request(&thread, &message, restart, cancel);
            run(&settings, store, request, brief, max_turns).await
        }
        Command::Show { thread } => show(&store, &thread),
    }
}
