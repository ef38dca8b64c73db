//! CLI binary for running, resuming and querying analysis sessions.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use analyst_llm::{CliModel, LlmCollaborator};
use analyst_pipeline::{
    ChatCollaborators, Collaborators, ConsoleInterviewer, EventEmitter, InteractiveRouter,
    SessionController, SessionEvent, SessionOutcome, SessionStore,
};
use analyst_sandbox::SandboxExecutor;
use analyst_types::{AnalystConfig, Dataset, TextModel};

#[derive(Parser)]
#[command(name = "analyst", version, about = "LLM-planned process-mining analysis of CSV event logs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyse a CSV file in a new session
    Run {
        /// Path to the CSV event log
        csv: PathBuf,

        /// JSON config file (defaults apply to missing fields)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Session directory (default: a new directory under .analyst/sessions)
        #[arg(short, long)]
        session_dir: Option<PathBuf>,

        /// Override the maximum number of planning rounds
        #[arg(long)]
        max_steps: Option<usize>,

        /// Override the number of whole-session restarts
        #[arg(long)]
        max_restarts: Option<usize>,

        /// Model CLI to use: claude, codex or gemini
        #[arg(long)]
        provider: Option<String>,

        /// Model name passed to the provider CLI
        #[arg(long)]
        model: Option<String>,

        /// Exit after the report instead of opening the chat
        #[arg(long)]
        no_chat: bool,
    },

    /// Continue an interrupted session
    Resume {
        /// Session directory written by `run`
        session_dir: PathBuf,

        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Exit after the report instead of opening the chat
        #[arg(long)]
        no_chat: bool,
    },

    /// Ask questions about a finished session's dataset
    Chat {
        session_dir: PathBuf,

        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Run a snippet against a CSV file in the sandbox
    Exec {
        csv: PathBuf,

        /// Snippet source; must assign `result`
        #[arg(long)]
        code: String,

        /// Timeout in seconds (default from config)
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Check a snippet for syntax errors without running it
    Check {
        #[arg(long)]
        code: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            csv,
            config,
            session_dir,
            max_steps,
            max_restarts,
            provider,
            model,
            no_chat,
        } => {
            let mut config = AnalystConfig::load_or_default(config.as_deref())?;
            if let Some(n) = max_steps {
                config.session.max_steps = n;
            }
            if let Some(n) = max_restarts {
                config.session.max_restarts = n;
            }
            if let Some(p) = provider {
                config.model.provider = p;
            }
            if model.is_some() {
                config.model.model = model;
            }
            config.validate()?;
            cmd_run(&csv, session_dir.as_deref(), &config, no_chat).await?;
        }
        Commands::Resume {
            session_dir,
            config,
            no_chat,
        } => {
            let config = AnalystConfig::load_or_default(config.as_deref())?;
            cmd_resume(&session_dir, &config, no_chat).await?;
        }
        Commands::Chat { session_dir, config } => {
            let config = AnalystConfig::load_or_default(config.as_deref())?;
            let store = SessionStore::open(&session_dir)?;
            let dataset = store.load_dataset().await?;
            chat_loop(&config, model(&config), store, &dataset).await?;
        }
        Commands::Exec { csv, code, timeout } => {
            cmd_exec(&csv, &code, timeout).await?;
        }
        Commands::Check { code } => {
            cmd_check(&code)?;
        }
    }

    Ok(())
}

fn model(config: &AnalystConfig) -> Arc<dyn TextModel> {
    Arc::new(CliModel::from_settings(&config.model))
}

fn controller(config: &AnalystConfig, model: Arc<dyn TextModel>, store: SessionStore) -> SessionController {
    let llm = Arc::new(LlmCollaborator::new(model.clone()).with_memory_limit(config.session.memory_char_limit));
    let collab = Collaborators {
        planner: llm.clone(),
        judge: llm.clone(),
        summarizer: llm,
    };
    SessionController::new(config.session.clone(), analyst_pipeline::default_registry(), collab)
        .with_store(store)
        .with_model(model)
}

async fn cmd_run(
    csv: &Path,
    session_dir: Option<&Path>,
    config: &AnalystConfig,
    no_chat: bool,
) -> anyhow::Result<()> {
    tracing::debug!(?config, "Loaded configuration");
    let dataset = Dataset::load_csv(csv)?;
    let store = match session_dir {
        Some(dir) => SessionStore::create(dir).await?,
        None => SessionStore::new_session_dir(Path::new(".analyst/sessions")).await?,
    };

    println!("Analysing: {} ({} rows x {} columns)", csv.display(), dataset.height(), dataset.width());
    println!("Session: {}", store.dir().display());
    println!("Model: {}", config.model.provider);

    let model = model(config);
    let controller = controller(config, model.clone(), store.clone());
    let progress = follow(controller.events());
    let outcome = controller.run(dataset).await;
    progress.abort();
    let outcome = outcome?;

    print_outcome(&outcome, &store);
    if !no_chat {
        chat_loop(config, model, store, &outcome.dataset).await?;
    }
    Ok(())
}

async fn cmd_resume(session_dir: &Path, config: &AnalystConfig, no_chat: bool) -> anyhow::Result<()> {
    let store = SessionStore::open(session_dir)?;
    println!("Resuming session: {}", store.dir().display());

    let model = model(config);
    let controller = controller(config, model.clone(), store.clone());
    let progress = follow(controller.events());
    let outcome = controller.resume().await;
    progress.abort();
    let outcome = outcome?;

    print_outcome(&outcome, &store);
    if !no_chat {
        chat_loop(config, model, store, &outcome.dataset).await?;
    }
    Ok(())
}

/// Print session progress as it happens.
fn follow(events: &EventEmitter) -> tokio::task::JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => print_event(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::StagePlanned { round, stage, thought } => {
            println!("\n[round {round}] {stage}");
            if !thought.is_empty() {
                println!("  plan: {thought}");
            }
        }
        SessionEvent::AttemptJudged {
            attempt,
            passed,
            score,
            critique,
            ..
        } => {
            let mark = if *passed { "accepted" } else { "rejected" };
            println!("  attempt {attempt}: {mark} (score {score:.1}) {critique}");
        }
        SessionEvent::DatasetReplaced {
            rows_before, rows_after, ..
        } => {
            println!("  dataset: {rows_before} -> {rows_after} rows");
        }
        SessionEvent::SessionJudged { passed: false, critique, .. } => {
            println!("  session review: {critique}");
        }
        SessionEvent::SessionRestarted { restarts, .. } => {
            println!("\nRestarting analysis (restart {restarts})");
        }
        _ => {}
    }
}

fn print_outcome(outcome: &SessionOutcome, store: &SessionStore) {
    println!("\nSession finished: {}", outcome.reason);
    println!("Rounds: {}, restarts: {}", outcome.rounds, outcome.restarts);
    println!("Completed stages: {}", outcome.artifacts.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>().join(", "));
    if let Some(verdict) = outcome.last_verdict.as_ref().filter(|v| !v.passed) {
        println!("Last review: {}", verdict.critique);
    }
    let report = store.path(analyst_pipeline::stages::REPORT_FILE);
    if report.exists() {
        println!("Report: {}", report.display());
    }
}

async fn chat_loop(
    config: &AnalystConfig,
    model: Arc<dyn TextModel>,
    store: SessionStore,
    dataset: &Dataset,
) -> anyhow::Result<()> {
    let llm = Arc::new(LlmCollaborator::new(model).with_capabilities(analyst_sandbox::CAPABILITIES));
    let mut router = InteractiveRouter::new(
        analyst_tools::default_registry(),
        SandboxExecutor::new(config.sandbox.clone()),
        ChatCollaborators {
            planner: llm.clone(),
            verifier: llm.clone(),
            coder: llm,
        },
        Arc::new(ConsoleInterviewer),
        config.chat.clone(),
    )
    .with_store(store);
    router.load_history().await?;

    println!("\nAsk questions about the data (type 'exit' to quit).");
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(question) = read_line().await? else {
            break;
        };
        let question = question.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question.to_ascii_lowercase().as_str(), "exit" | "quit") {
            break;
        }
        let answer = router.ask(question, dataset).await?;
        println!("{}\n", answer.display());
    }
    Ok(())
}

/// One line from stdin; `None` at end of input.
async fn read_line() -> anyhow::Result<Option<String>> {
    let line = tokio::task::spawn_blocking(|| {
        let mut buf = String::new();
        std::io::stdin().lock().read_line(&mut buf).map(|n| (n > 0).then_some(buf))
    })
    .await??;
    Ok(line)
}

async fn cmd_exec(csv: &Path, code: &str, timeout: Option<u64>) -> anyhow::Result<()> {
    let dataset = Dataset::load_csv(csv)?;
    let sandbox = SandboxExecutor::new(AnalystConfig::default().sandbox);
    let limit = timeout.map(Duration::from_secs).unwrap_or_else(|| sandbox.default_timeout());
    match sandbox.execute_with_timeout(code, &dataset, limit).await {
        Ok(output) => {
            println!("{}", output.text);
            Ok(())
        }
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

fn cmd_check(code: &str) -> anyhow::Result<()> {
    match SandboxExecutor::default().validate(code) {
        Ok(()) => {
            println!("Snippet is valid");
            Ok(())
        }
        Err(issue) => {
            println!("[ERROR] {issue}");
            std::process::exit(1);
        }
    }
}
