//! Taxis CLI - run orchestration turns from the command line

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use taxis_core::planner::Planner;
use taxis_core::policy::{ApproveListed, AutoApprove, SharedApproval};
use taxis_core::prelude::*;

#[derive(Parser)]
#[command(name = "taxis")]
#[command(about = "Deterministic tool orchestration CLI", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to taxis.toml, TAXIS_CONFIG_PATH and TAXIS_* variables)
    #[arg(short, long, global = true, env = "TAXIS_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one turn
    Run {
        /// Instruction
        #[arg(required = true)]
        message: Vec<String>,

        #[command(flatten)]
        turn: TurnArgs,
    },
    /// Run one turn per line read from stdin, carrying state between turns
    Session {
        #[command(flatten)]
        turn: TurnArgs,
    },
    /// Show how an instruction would be routed
    Route {
        #[arg(required = true)]
        message: Vec<String>,
    },
    /// Show the plan for an instruction
    Plan {
        #[arg(required = true)]
        message: Vec<String>,
    },
    /// List available tools
    Tools,
    /// Print the effective configuration
    Config,
    /// Version information
    Version,
}

#[derive(clap::Args)]
struct TurnArgs {
    /// Working directory for tools
    #[arg(short, long, default_value = ".")]
    dir: PathBuf,

    /// Approve these tools when their policy requires approval
    #[arg(long = "approve", value_name = "TOOL")]
    approve: Vec<String>,

    /// Approve every tool
    #[arg(long, conflicts_with = "approve")]
    approve_all: bool,

    /// Print results as JSON
    #[arg(long)]
    json: bool,
}

impl TurnArgs {
    fn approval(&self) -> Option<SharedApproval> {
        if self.approve_all {
            Some(Arc::new(AutoApprove))
        } else if !self.approve.is_empty() {
            Some(Arc::new(ApproveListed::new(self.approve.iter().cloned())))
        } else {
            None
        }
    }

    fn context(&self) -> Result<ExecutionContext> {
        let dir = self
            .dir
            .canonicalize()
            .with_context(|| format!("Invalid working directory: {}", self.dir.display()))?;
        Ok(ExecutionContext::new().with_working_dir(dir))
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<TaxisConfig> {
    tracing::debug!(path = ?path, "Loading configuration");
    let config = match path {
        Some(path) => TaxisConfig::from_file(path),
        None => TaxisConfig::load(),
    };
    config.context("Failed to load configuration")
}

fn orchestrator(config: &TaxisConfig, turn: &TurnArgs) -> Result<Orchestrator> {
    let mut orchestrator = Orchestrator::from_config(config)?;
    if let Some(approval) = turn.approval() {
        orchestrator = orchestrator.with_approval(approval);
    }
    Ok(orchestrator)
}

fn print_result(result: &ExecutionResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    for step in &result.results {
        let status = if step.success { "ok" } else { "failed" };
        let cached = if step.cached { " (cached)" } else { "" };
        println!(
            "{} {}{} in {}ms, {} attempt(s)",
            step.tool, status, cached, step.duration_ms, step.attempts
        );
        if let Some(output) = &step.output {
            println!("{}", serde_json::to_string_pretty(output)?);
        }
        if let Some(error) = &step.error {
            println!("  error: {}", error);
        }
    }
    match &result.error {
        Some(error) => println!("turn failed: {}", error),
        None => println!("turn ok"),
    }
    if let Some(id) = &result.decision_id {
        println!("decision {} ({}ms)", id, result.execution_time_ms);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("taxis {}", env!("CARGO_PKG_VERSION"));
            println!("taxis-core {}", taxis_core::VERSION);
        }
        Commands::Config => {
            let config = load_config(cli.config.as_ref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Tools => {
            let catalog = ToolCatalog::with_builtins()?;
            for tool in catalog.summaries() {
                println!(
                    "{:<12} {:<8} {:>6}ms {:>5}MB  {}",
                    tool.name,
                    tool.risk.as_str(),
                    tool.time_budget_ms,
                    tool.memory_budget_mb,
                    tool.description
                );
            }
        }
        Commands::Route { message } => {
            let config = load_config(cli.config.as_ref())?;
            let router = Router::from_config(&config.router)?;
            let catalog = ToolCatalog::with_builtins()?;
            let decision = router.route(&message.join(" "), &catalog).await;
            println!("{}", serde_json::to_string_pretty(&decision)?);
        }
        Commands::Plan { message } => {
            let config = load_config(cli.config.as_ref())?;
            let router = Router::from_config(&config.router)?;
            let catalog = ToolCatalog::with_builtins()?;
            let message = message.join(" ");
            let decision = router.route(&message, &catalog).await;
            let tools: Vec<BoxedTool> = decision
                .candidates
                .iter()
                .take(config.router.top_k)
                .filter_map(|c| catalog.get(&c.tool).cloned())
                .collect();
            let plan = Planner::new().plan(&message, &tools)?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        Commands::Run { message, turn } => {
            let config = load_config(cli.config.as_ref())?;
            let orchestrator = orchestrator(&config, &turn)?;
            let ctx = turn.context()?;
            let (_, result) = orchestrator
                .run_turn_with(WorkingState::new(), &message.join(" "), &ctx)
                .await;
            print_result(&result, turn.json)?;
            if !result.success {
                std::process::exit(1);
            }
        }
        Commands::Session { turn } => {
            let config = load_config(cli.config.as_ref())?;
            let orchestrator = orchestrator(&config, &turn)?;
            let ctx = turn.context()?;
            let mut state = WorkingState::new();
            for line in std::io::stdin().lock().lines() {
                let line = line?;
                let message = line.trim();
                if message.is_empty() {
                    continue;
                }
                let (next, result) = orchestrator.run_turn_with(state, message, &ctx).await;
                state = next;
                print_result(&result, turn.json)?;
            }
            let report = orchestrator.observability_report().await;
            eprintln!(
                "{} turn(s), success rate {:.0}%, p95 {}ms",
                report.performance.total,
                report.performance.success_rate * 100.0,
                report.performance.p95_latency_ms
            );
        }
    }

    Ok(())
}
