//! `council`: run an expert debate against a local Ollama server, or
//! inspect debates saved earlier.
//!
//! # Usage
//!
//! ```bash
//! # Debate with one rebuttal round, streamed to stdout
//! council run --topic "Was the Mauryan state centralized?"
//!
//! # No model server needed
//! council run --topic "Caste and the colonial census" --dry-run --rounds 2
//!
//! # Saved debates
//! council list --limit 5
//! council show 20260101T120000Z_caste-and-the-colonial-census_1a2b3c4d
//! ```

mod render;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use council::config::parse_roles;
use council::debate::EventFilter;
use council::persistence::DEFAULT_LIST_LIMIT;
use council::{
    CancelHandle, CouncilConfig, DebateOrchestrator, DebateState, DebateTopic, GenerationBackend,
    JsonFileRepository, OllamaBackend, Roster, ScriptedBackend, SessionRepository,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use render::LiveRenderer;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-agent expert council debates", long_about = None)]
struct Cli {
    /// TOML configuration file (defaults, then this file, then environment)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging (same as COUNCIL_DEBUG=1)
    #[arg(long, global = true, default_value_t = false)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a debate and save its record
    Run(RunArgs),
    /// List saved debates, most recent first
    List {
        #[arg(long, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: usize,
        /// Print JSON instead of a table
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Print a saved debate
    Show {
        id: String,
        /// Print the raw record
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Debate topic title
    #[arg(long)]
    topic: String,

    #[arg(long)]
    description: Option<String>,

    /// Scope or constraints given to every speaker
    #[arg(long)]
    constraints: Option<String>,

    /// Rebuttal rounds (overrides COUNCIL_REBUTTAL_ROUNDS)
    #[arg(long)]
    rounds: Option<u32>,

    /// Comma-separated role ids, e.g. indian_historian,policymaker_expert
    #[arg(long)]
    roles: Option<String>,

    /// Use the scripted backend instead of Ollama
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Do not write the debate record
    #[arg(long, default_value_t = false)]
    no_save: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config =
        CouncilConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if cli.debug {
        config.debug = true;
    }

    let default_filter = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    match cli.command {
        Command::Run(args) => run(config, args).await,
        Command::List { limit, json } => list(&config, limit, json).await,
        Command::Show { id, json } => show(&config, &id, json).await,
    }
}

async fn run(mut config: CouncilConfig, args: RunArgs) -> Result<ExitCode> {
    if let Some(rounds) = args.rounds {
        config.max_rebuttal_rounds = rounds;
    }
    if let Some(roles) = &args.roles {
        config.council_roles = parse_roles(roles).context("invalid --roles")?;
    }

    let backend: Arc<dyn GenerationBackend> = if args.dry_run {
        Arc::new(ScriptedBackend::new())
    } else {
        let ollama = OllamaBackend::new(&config.ollama_host)
            .context("failed to create Ollama client")?;
        if !ollama.check_health().await {
            warn!(host = %config.ollama_host, "Ollama server not reachable, calls will likely fail");
        }
        Arc::new(ollama)
    };
    info!(
        backend = backend.name(),
        host = %config.ollama_host,
        rounds = config.max_rebuttal_rounds,
        "Council starting"
    );

    let cancel = CancelHandle::new();
    spawn_interrupt_handler(cancel.clone());

    let orchestrator = DebateOrchestrator::new(backend).with_cancel_handle(cancel);
    let roster = Roster::from_config(&config).context("failed to build council roster")?;

    let mut topic = DebateTopic::new(args.topic.as_str());
    if let Some(description) = &args.description {
        topic = topic.with_description(description.as_str());
    }
    if let Some(constraints) = &args.constraints {
        topic = topic.with_constraints(constraints.as_str());
    }

    let mut session = orchestrator
        .create_session(topic, roster, &config)
        .context("invalid debate setup")?;

    let mut events = orchestrator.events().subscribe();
    let filter = EventFilter::new().session(&session.id);
    let printer = tokio::spawn(async move {
        let mut renderer = LiveRenderer::new(std::io::stdout());
        loop {
            match events.recv().await {
                Ok(event) if filter.matches(&event) => renderer.handle(&event)?,
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Live output fell behind; some chunks were not shown")
                }
                Err(RecvError::Closed) => break,
            }
        }
        Ok::<_, std::io::Error>(())
    });

    let state = orchestrator
        .run(&mut session)
        .await
        .context("debate aborted")?;

    let saved_to = if args.no_save {
        None
    } else {
        let repository = JsonFileRepository::new(&config.debates_dir);
        orchestrator
            .persist(&session, &repository)
            .await
            .with_context(|| format!("failed to save debate {}", session.id))?;
        Some(repository.path_for(&session.id))
    };

    // Closing the bus lets the printer drain and stop.
    drop(orchestrator);
    printer
        .await
        .context("live output task panicked")?
        .context("failed to write live output")?;

    println!("{}", render::render_outcome(&session));
    if let Some(path) = saved_to {
        println!("Saved to {}", path.display());
    }
    Ok(if state == DebateState::Archived {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn list(config: &CouncilConfig, limit: usize, json: bool) -> Result<ExitCode> {
    let repository = JsonFileRepository::new(&config.debates_dir);
    let summaries = repository
        .list(limit)
        .await
        .with_context(|| format!("failed to list {}", config.debates_dir.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else if summaries.is_empty() {
        println!("No saved debates in {}", config.debates_dir.display());
    } else {
        print!("{}", render::render_summaries(&summaries));
    }
    Ok(ExitCode::SUCCESS)
}

async fn show(config: &CouncilConfig, id: &str, json: bool) -> Result<ExitCode> {
    let repository = JsonFileRepository::new(&config.debates_dir);
    let record = repository
        .load(id)
        .await
        .with_context(|| format!("failed to load debate {id}"))?;

    if json {
        println!("{}", record.to_json()?);
    } else {
        print!("{}", render::render_record(&record));
    }
    Ok(ExitCode::SUCCESS)
}

/// First Ctrl-C finishes the current turn and stops; the second drops the
/// in-flight stream.
fn spawn_interrupt_handler(cancel: CancelHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Interrupt received: finishing the current turn (Ctrl-C again to abort)");
        cancel.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Second interrupt: aborting in-flight generation");
            cancel.abort();
        }
    });
}
