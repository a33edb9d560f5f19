use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use pyscribe::agent::{ChatMessage, MessageKind, Placeholder, SessionRecord, SessionStore};
use pyscribe::catalog::{find_example, find_model, AVAILABLE_MODELS, CODE_EXAMPLES};
use pyscribe::{
    metrics, telemetry, AgentController, Config, GenerationMode, LazyModel, OllamaClient,
    OllamaLauncher, PythonLauncher, SessionSnapshot,
};

/// Turn prompts into Python programs with a local model and run them
#[derive(Debug, Parser)]
#[command(name = "pyscribe", version)]
struct Cli {
    /// Model id to load from Ollama
    #[arg(short, long, env = "PYSCRIBE_MODEL")]
    model: Option<String>,

    /// Base URL of the Ollama server
    #[arg(long, env = "PYSCRIBE_OLLAMA_URL")]
    ollama_url: Option<String>,

    /// Start in agent mode (failed runs are repaired automatically)
    #[arg(short, long)]
    agent: bool,

    /// Repair attempts before the agent gives up
    #[arg(long, env = "PYSCRIBE_MAX_RETRIES")]
    max_retries: Option<u32>,

    /// Per-execution timeout in seconds
    #[arg(long, env = "PYSCRIBE_TIMEOUT")]
    timeout: Option<u64>,

    /// Python executable used for the sandbox
    #[arg(long, env = "PYSCRIBE_PYTHON")]
    python: Option<PathBuf>,

    /// Export spans to this OTLP collector
    #[arg(long, env = "PYSCRIBE_OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,

    /// Print the model catalog and exit
    #[arg(long)]
    list_models: bool,

    /// Config file (defaults to ~/.pyscribe/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl Cli {
    /// Layer command-line values over the file configuration
    fn apply(&self, mut config: Config) -> Config {
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(url) = &self.ollama_url {
            config.ollama_url = url.clone();
        }
        if self.agent {
            config.autonomous = true;
        }
        if let Some(max_retries) = self.max_retries {
            config.max_retries = max_retries;
        }
        if let Some(timeout) = self.timeout {
            config.execution_timeout_secs = timeout.max(1);
        }
        if let Some(python) = &self.python {
            config.python = python.clone();
        }
        if let Some(endpoint) = &self.otlp_endpoint {
            config.otlp_endpoint = Some(endpoint.clone());
        }
        config
    }
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("pyscribe error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    if cli.list_models {
        print_catalog();
        return Ok(());
    }

    let config = cli.apply(Config::load(cli.config.as_deref())?);
    telemetry::init_tracing("pyscribe", config.otlp_endpoint.as_deref())?;

    let result = repl(config).await;
    telemetry::shutdown_tracing();
    result
}

fn print_catalog() {
    println!("{:<28} {:<24} {:>7}  DESCRIPTION", "ID", "NAME", "SIZE");
    for model in AVAILABLE_MODELS {
        println!(
            "{:<28} {:<24} {:>5.1}GB  {}",
            model.id, model.display_name, model.size_gb, model.description
        );
    }
}

async fn repl(config: Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let display_name = match find_model(&config.model) {
        Some(model) => model.display_name,
        None => {
            warn!(model = %config.model, "Model is not in the catalog, asking Ollama anyway");
            config.model.as_str()
        }
    };

    let client = OllamaClient::new(&config.ollama_url);
    let model = Arc::new(LazyModel::new(OllamaLauncher::new(
        client,
        config.model.clone(),
        config.generation_options(),
    )));

    println!("Loading {display_name}...");
    match model.initialize().await {
        Ok(()) => println!("Model ready."),
        Err(e) => {
            // The session retries initialization on the first prompt.
            warn!(error = %e, "Model initialization failed");
            println!("Model not loaded yet: {e}");
        }
    }

    let launcher = Arc::new(PythonLauncher::new(&config.python));
    let session = AgentController::spawn(model, launcher, config.agent_config());
    let renderer = spawn_renderer(session.subscribe());

    let store = SessionStore::default_store();
    let mut record = SessionRecord::new(config.model.clone(), config.mode());

    println!("Mode: {}. Type a prompt, or /help for commands.", config.mode());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            let mut parts = command.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("quit") | Some("exit"), _) => break,
                (Some("help"), _) => print_help(),
                (Some("agent"), Some(setting @ ("on" | "off"))) => {
                    let mode = if setting == "on" {
                        GenerationMode::Autonomous
                    } else {
                        GenerationMode::SingleShot
                    };
                    session.set_mode(mode).await?;
                    println!("Mode: {}", session.settled().await?.mode);
                }
                (Some("agent"), None) => println!("Mode: {}", session.snapshot().mode),
                (Some("run"), Some(name)) => match find_example(name) {
                    Some(example) => {
                        session.run_code(example.code).await?;
                        session.settled().await?;
                    }
                    None => println!("Unknown example: {name}. Try one of: {}", example_names()),
                },
                (Some("run"), None) => {
                    println!("Enter code, then /end on a line of its own.");
                    let mut code = String::new();
                    while let Some(line) = lines.next_line().await? {
                        if line.trim() == "/end" {
                            break;
                        }
                        code.push_str(&line);
                        code.push('\n');
                    }
                    session.run_code(code).await?;
                    session.settled().await?;
                }
                (Some("reset"), _) => {
                    session.reset().await?;
                    session.settled().await?;
                    record = SessionRecord::new(config.model.clone(), session.snapshot().mode);
                    println!("Session cleared.");
                }
                (Some("save"), _) => match &store {
                    Ok(store) => {
                        let snapshot = session.snapshot();
                        record.update(snapshot.mode, &snapshot.messages);
                        match store.save(&record) {
                            Ok(path) => println!("Saved to {}", path.display()),
                            Err(e) => println!("Could not save session: {e}"),
                        }
                    }
                    Err(e) => println!("Session store unavailable: {e}"),
                },
                (Some("sessions"), _) => match &store {
                    Ok(store) => match store.list() {
                        Ok(summaries) if summaries.is_empty() => println!("No saved sessions."),
                        Ok(summaries) => {
                            for summary in summaries {
                                println!(
                                    "{}  {}  {:>3} messages  {}",
                                    summary.id, summary.updated_at, summary.message_count, summary.title
                                );
                            }
                        }
                        Err(e) => println!("Could not list sessions: {e}"),
                    },
                    Err(e) => println!("Session store unavailable: {e}"),
                },
                (Some("metrics"), _) => match metrics::render() {
                    Ok(text) => print!("{text}"),
                    Err(e) => println!("Could not render metrics: {e}"),
                },
                _ => println!("Unknown command: /{command}. Type /help for commands."),
            }
            continue;
        }

        session.submit(line).await?;
        // Input stays disabled until the turn settles.
        session.settled().await?;
    }

    info!("Shutting down");
    session.shutdown().await?;
    renderer.abort();
    Ok(())
}

fn print_help() {
    println!("/agent on|off  switch agent mode (automatic repair of failed runs)");
    println!("/run           type code and run it as is, ending with /end");
    println!("/run <example> run a ready-made program ({})", example_names());
    println!("/reset         clear the transcript and restart the interpreter");
    println!("/save          save the transcript to ~/.pyscribe/sessions");
    println!("/sessions      list saved transcripts");
    println!("/metrics       print Prometheus metrics");
    println!("/quit          exit");
}

fn example_names() -> String {
    CODE_EXAMPLES
        .iter()
        .map(|example| example.name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Print new transcript entries and status changes as they are published
fn spawn_renderer(mut snapshots: watch::Receiver<SessionSnapshot>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut shown = 0usize;
        let mut status: Option<Placeholder> = None;

        while snapshots.changed().await.is_ok() {
            let snapshot = snapshots.borrow_and_update().clone();

            // A reset empties the transcript.
            shown = shown.min(snapshot.messages.len());
            for message in &snapshot.messages[shown..] {
                render_message(message);
            }
            shown = snapshot.messages.len();

            if snapshot.placeholder != status {
                if let Some(placeholder) = &snapshot.placeholder {
                    render_message(&placeholder.to_message());
                }
                status = snapshot.placeholder;
            }
        }
    })
}

fn render_message(message: &ChatMessage) {
    match message {
        // The user's own input is already on screen.
        ChatMessage::User { .. } => {}
        ChatMessage::Assistant { kind, text, code } => match kind {
            MessageKind::TransientStatus => {
                println!("… {text}");
                if let Some(code) = code {
                    println!("```python\n{code}\n```");
                }
            }
            MessageKind::CodeResult => {
                if let Some(code) = code {
                    println!("```python\n{code}\n```");
                }
                println!("Output:\n{text}");
            }
            MessageKind::Error => println!("Error: {text}"),
            MessageKind::PlainText => println!("{text}"),
        },
    }
}
