//! Motor command line: drive task runs and watch their signals.

use std::io::Write as _;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use motor_core::ai::AnthropicClient;
use motor_core::config::EngineConfig;
use motor_core::container::LocalRuntime;
use motor_core::paths;
use motor_core::run::{FullEnergy, ManagerDeps, RunConfig, RunManager, RunSignal, StartOptions};
use motor_core::storage::SqliteStore;
use motor_core::tools::implementations::register_default_tools;
use motor_core::tools::ToolRegistry;

const DEFAULT_TOOLS: &str = "read,write,list,glob,bash,grep,patch,fetch";

#[derive(Parser)]
#[command(name = "motor", about = "Agentic task execution engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Model to drive the loop with
    #[arg(long, global = true, default_value = "claude-sonnet-4-5")]
    model: String,
}

#[derive(Subcommand)]
enum Command {
    /// Start a run and stream its signals until it finishes
    Run {
        /// The task, in natural language
        task: String,
        /// Comma-separated tool grant
        #[arg(long, default_value = DEFAULT_TOOLS)]
        tools: String,
        /// Domains the fetch tool may contact (repeatable)
        #[arg(long = "domain")]
        domains: Vec<String>,
        /// Seed the workspace from an installed skill
        #[arg(long)]
        skill: Option<String>,
        /// Iteration cap for the attempt
        #[arg(long)]
        max_iterations: Option<usize>,
    },
    /// Show one run
    Status {
        run_id: String,
        /// Emit the full persisted record as JSON
        #[arg(long)]
        json: bool,
    },
    /// List known runs
    List,
    /// Cancel a non-terminal run
    Cancel { run_id: String },
    /// Run a single shell snippet in the scratch sandbox, no bookkeeping
    Oneshot {
        code: String,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Recover persisted runs after a restart
    Recover,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let (manager, mut signals) = build_manager(&cli.model).await?;

    match cli.command {
        Command::Run {
            task,
            tools,
            domains,
            skill,
            max_iterations,
        } => {
            if std::env::var("ANTHROPIC_API_KEY").is_err() {
                bail!("ANTHROPIC_API_KEY must be set to drive runs");
            }
            let started = manager
                .start_run(StartOptions {
                    task,
                    tools: tools.split(',').map(|t| t.trim().to_string()).collect(),
                    max_iterations,
                    skill,
                    domains,
                    config: RunConfig::default(),
                })
                .await?;
            println!("run {} started", started.run_id);

            while let Some(signal) = signals.recv().await {
                match signal {
                    RunSignal::Completed { result, .. } => {
                        println!("\n{result}");
                        break;
                    }
                    RunSignal::Failed { failure, .. } => {
                        let hint = failure
                            .hint
                            .unwrap_or_else(|| "no further detail".to_string());
                        println!("\nrun failed ({:?}): {hint}", failure.category);
                        break;
                    }
                    RunSignal::AwaitingInput { run_id, question, .. } => {
                        let answer = prompt(&format!("\n{question}\n> ")).await?;
                        manager.respond_to_run(&run_id, &answer, vec![]).await?;
                    }
                    RunSignal::AwaitingApproval { run_id, action, .. } => {
                        let answer = prompt(&format!("\nApprove: {action}? [y/N] ")).await?;
                        let approved = matches!(answer.trim(), "y" | "Y" | "yes");
                        manager.respond_to_approval(&run_id, approved).await?;
                    }
                }
            }
        }
        Command::Status { run_id, json } => {
            let run = manager.get_run_status(&run_id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&run)?);
            } else {
                println!(
                    "{}  {}  attempts={}  task={}",
                    run.id,
                    run.status.as_str(),
                    run.attempts.len(),
                    run.task
                );
                if let Some(result) = run.result {
                    println!("{result}");
                }
            }
        }
        Command::List => {
            for run in manager.list_runs(Default::default())? {
                println!("{}  {}  {}", run.id, run.status.as_str(), run.task);
            }
        }
        Command::Cancel { run_id } => {
            let change = manager.cancel_run(&run_id).await?;
            println!(
                "{}: {} -> {}",
                change.run_id,
                change.previous_status.as_str(),
                change.new_status.as_str()
            );
        }
        Command::Oneshot { code, timeout_ms } => {
            let result = manager.execute_oneshot(&code, timeout_ms).await?;
            if result.ok {
                print!("{}", result.output);
            } else {
                bail!("oneshot failed: {}", result.output);
            }
        }
        Command::Recover => {
            let report = manager.recover_on_restart().await?;
            println!(
                "resumed={} failed={} pruned_containers={}",
                report.resumed.len(),
                report.failed.len(),
                report.pruned_containers
            );
            // Resumed runs report through signals; drain until they settle.
            let mut open = report.resumed.len();
            while open > 0 {
                let Some(signal) = signals.recv().await else {
                    break;
                };
                if let RunSignal::Completed { run_id, .. } | RunSignal::Failed { run_id, .. } =
                    &signal
                {
                    println!("{run_id}: settled");
                    open -= 1;
                } else if let RunSignal::AwaitingInput { run_id, question, .. } = &signal {
                    println!("{run_id}: awaiting input: {question}");
                    open -= 1;
                } else if let RunSignal::AwaitingApproval { run_id, action, .. } = &signal {
                    println!("{run_id}: awaiting approval: {action}");
                    open -= 1;
                }
            }
        }
    }

    Ok(())
}

async fn build_manager(model: &str) -> Result<(RunManager, motor_core::run::SignalReceiver)> {
    // Only run-driving commands actually reach the provider; oneshot, list
    // and status work without a key.
    let api_key = std::env::var("ANTHROPIC_API_KEY").unwrap_or_default();

    let registry = Arc::new(ToolRegistry::new());
    register_default_tools(&registry).await;

    let config = EngineConfig::load(&paths::config_path())?;
    let store = Arc::new(SqliteStore::open(&paths::db_path())?);

    Ok(RunManager::new(ManagerDeps {
        client: Arc::new(AnthropicClient::new(api_key, model)),
        registry: registry.clone(),
        runtime: Arc::new(LocalRuntime::new(registry)),
        store,
        energy: Arc::new(FullEnergy),
        config,
        workspaces_root: paths::workspaces_dir(),
        skills_root: paths::skills_dir(),
    }))
}

async fn prompt(message: &str) -> Result<String> {
    let message = message.to_string();
    tokio::task::spawn_blocking(move || {
        print!("{message}");
        std::io::stdout().flush()?;
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        Ok(answer.trim().to_string())
    })
    .await?
}
