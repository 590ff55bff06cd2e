use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rustlockdb::{
    Discipline, DurabilityMode, Harness, HarnessConfig, ScenarioReport, StoreConfig,
    WorkerOutcome,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rustlockdb")]
#[command(about = "Pessimistic vs optimistic locking on a shared counter")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Keep the counter in a journal file instead of memory only
    #[arg(long, global = true)]
    journal: Option<PathBuf>,

    /// sync | async | none
    #[arg(long, global = true, default_value = "async")]
    durability: DurabilityMode,

    /// Print each scenario report as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Two workers taking the write intent at BEGIN
    Pessimistic(RunArgs),
    /// Two workers racing a version-checked write
    Optimistic(RunArgs),
    /// Pessimistic run, then optimistic run
    Both(RunArgs),
}

#[derive(Args, Clone, Default)]
struct RunArgs {
    /// Delay of the first worker (t1) inside its transaction
    #[arg(long)]
    first_delay_ms: Option<u64>,

    /// Delay of the second worker (t2) inside its transaction
    #[arg(long)]
    second_delay_ms: Option<u64>,

    /// Value the counter is reset to
    #[arg(long)]
    initial_value: Option<i64>,

    /// Let optimistic workers start writing without waiting for each other's read
    #[arg(long)]
    no_rendezvous: bool,
}

impl RunArgs {
    fn config(&self, discipline: Discipline) -> HarnessConfig {
        let mut config = HarnessConfig::for_discipline(discipline);
        let first = self
            .first_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(config.workers[0].delay);
        let second = self
            .second_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(config.workers[1].delay);
        config = config.delays(first, second);
        if let Some(value) = self.initial_value {
            config = config.initial_value(value);
        }
        if self.no_rendezvous {
            config = config.read_rendezvous(false);
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let (disciplines, args) = match cli.command {
        Some(Command::Pessimistic(args)) => (vec![Discipline::Pessimistic], args),
        Some(Command::Optimistic(args)) => (vec![Discipline::Optimistic], args),
        Some(Command::Both(args)) => (
            vec![Discipline::Pessimistic, Discipline::Optimistic],
            args,
        ),
        None => (
            vec![Discipline::Pessimistic, Discipline::Optimistic],
            RunArgs::default(),
        ),
    };

    let mut store_config = StoreConfig::in_memory().durability(cli.durability);
    if let Some(path) = &cli.journal {
        store_config = store_config.journal(path);
    }
    let store = store_config
        .open()
        .await
        .with_context(|| match &cli.journal {
            Some(path) => format!("Failed to open journal '{}'", path.display()),
            None => "Failed to create store".to_string(),
        })?;
    let harness = Harness::new(store);

    for discipline in disciplines {
        let config = args.config(discipline);
        let report = harness
            .run(&config)
            .await
            .with_context(|| format!("{} scenario failed", discipline))?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_report(&report);
        }
    }
    Ok(())
}

fn print_report(report: &ScenarioReport) {
    println!("== {} locking ==", report.discipline);
    for worker in &report.workers {
        let outcome = match &worker.outcome {
            WorkerOutcome::Decremented { from, to, .. } => format!("decremented {} -> {}", from, to),
            WorkerOutcome::NoOp { value } => format!("no-op at {}", value),
            WorkerOutcome::Aborted { kind, message } => format!("aborted ({}): {}", kind, message),
        };
        println!("  {}: {}", worker.name, outcome);
    }
    match report.final_counter.version {
        Some(version) => println!(
            "  final value {} (version {})",
            report.final_counter.value, version
        ),
        None => println!("  final value {}", report.final_counter.value),
    }
}
