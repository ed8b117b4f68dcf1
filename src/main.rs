mod demo;

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use keyflow_core::config::{FlowConfig, ReplayMode};
use keyflow_core::event::FlowEvent;
use keyflow_core::types::Record;
use keyflow_engine::{Executor, ReplayExecutor, RunLog};

const DEFAULT_PROMPT: &str = "Can you describe me what I can do with this code?";

#[derive(Parser)]
#[command(name = "keyflow", version, about = "Key-wired dataflow executor with replayable run logs")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "keyflow.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the research graph on a prompt
    Run {
        /// The prompt to seed the graph with
        #[arg(trailing_var_arg = true)]
        prompt: Vec<String>,
        /// Rebuild the store from the run log afterwards
        #[arg(long)]
        replay: bool,
        /// Replay in verify mode, re-running every node against the log
        #[arg(long)]
        verify: bool,
        /// Print run log entries as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("keyflow=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Some(Commands::Completions { shell }) = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "keyflow", &mut std::io::stdout());
        return Ok(());
    }

    let config = if cli.config.exists() {
        info!(path = %cli.config.display(), "Loading config");
        FlowConfig::load(&cli.config)?
    } else {
        debug!(path = %cli.config.display(), "No config file, using defaults");
        FlowConfig::default()
    };

    match cli.command {
        Some(Commands::Config) => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Some(Commands::Run {
            prompt,
            replay,
            verify,
            json,
        }) => run(&config, &prompt.join(" "), replay || verify, verify, json).await,
        None => run(&config, "", false, false, false).await,
        Some(Commands::Completions { .. }) => Ok(()),
    }
}

async fn run(
    config: &FlowConfig,
    prompt: &str,
    replay: bool,
    verify: bool,
    json: bool,
) -> anyhow::Result<()> {
    let prompt = if prompt.trim().is_empty() {
        DEFAULT_PROMPT
    } else {
        prompt
    };

    let executor = Executor::new(config.executor.clone());
    let progress = tokio::spawn(report_progress(executor.subscribe()));

    // Start first; the graph is wired up while the loop is already waiting.
    executor.start()?;
    for node in demo::research_graph() {
        executor.spawn(node)?;
    }
    executor.put(demo::PROMPT, vec![Record::text(prompt).with_author("user")])?;

    let outcome = executor.wait().await;
    progress.await.ok();
    outcome?;

    if let Some(records) = executor.read(demo::FINAL_RESPONSE) {
        for record in &records {
            match record.as_text() {
                Some(text) => println!("{}", text),
                None => println!("{}", record.content),
            }
        }
    }

    let log = executor.event_log();
    print_log(&log, json)?;

    if replay {
        replay_log(config, log, verify).await?;
    }
    Ok(())
}

async fn replay_log(config: &FlowConfig, log: RunLog, verify: bool) -> anyhow::Result<()> {
    println!("\nReplaying from run log...");
    let mut replay_config = config.replay.clone();
    if verify {
        replay_config.mode = ReplayMode::Verify;
    }

    let mut replayer = ReplayExecutor::with_config(log, replay_config);
    for node in demo::research_graph() {
        replayer.register(node);
    }
    let report = replayer.start().await?;

    println!(
        "Restored {} writes across {} keys ({} node runs seen)",
        report.writes_restored,
        replayer.store().len(),
        report.node_runs.len()
    );
    for node in &report.unverified {
        println!("  unverified: {} -> {}", node.id, node.output);
    }
    for d in &report.divergences {
        println!("  diverged: {} -> {}: {:?}", d.node.id, d.node.output, d.kind);
    }
    if !report.is_consistent() {
        warn!(divergences = report.divergences.len(), "Replay found divergent nodes");
    }
    Ok(())
}

fn print_log(log: &RunLog, json: bool) -> anyhow::Result<()> {
    println!("\nRun log ({} entries):", log.len());
    for entry in log {
        if json {
            println!("{}", serde_json::to_string(entry)?);
        } else {
            println!("  {}", entry.label());
        }
    }
    Ok(())
}

async fn report_progress(mut rx: tokio::sync::broadcast::Receiver<FlowEvent>) {
    use tokio::sync::broadcast::error::RecvError;

    loop {
        match rx.recv().await {
            Ok(FlowEvent::NodeCompleted {
                node,
                output,
                elapsed_ms,
                ..
            }) => eprintln!("  ✓ {} {} ({}ms)", node, output, elapsed_ms),
            Ok(FlowEvent::RunCompleted) | Ok(FlowEvent::RunFailed { .. }) => break,
            Ok(_) => {}
            Err(RecvError::Lagged(n)) => debug!(skipped = n, "Progress reporter lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
