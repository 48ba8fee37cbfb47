mod config;
mod operations;
mod store;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use janitor_catalog::{Registry, Selection};
use janitor_engine::{EngineConfig, EngineRunner, ExecutionEvent, RunOutcome};
use janitor_resolver::{ExecutionPlan, resolve};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use config::JanitorConfig;
use operations::Services;
use store::RecordStore;

/// Janitor - resolves, orders and runs maintenance operations
#[derive(Parser)]
#[command(name = "janitor")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.janitor)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Path to the configuration file (default: <data-dir>/config.json)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Log at debug level unless RUST_LOG says otherwise
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// List the available operations
  List,

  /// Show the execution plan for a selection
  Plan {
    #[command(flatten)]
    selection: SelectionArgs,
  },

  /// Run the selected operations against a seeded in-memory store
  Run {
    #[command(flatten)]
    selection: SelectionArgs,

    /// Number of blob records to seed the store with
    #[arg(long, default_value_t = 1000)]
    records: usize,
  },
}

#[derive(Args)]
struct SelectionArgs {
  /// Select an operation in addition to the defaults
  #[arg(long = "select", value_name = "ID")]
  select: Vec<String>,

  /// Deselect an operation
  #[arg(long = "deselect", value_name = "ID")]
  deselect: Vec<String>,
}

fn main() -> Result<ExitCode> {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".janitor"),
  };
  let config = JanitorConfig::discover(cli.config.as_deref(), &data_dir)?;
  let registry = operations::registry().context("failed to build operation catalog")?;

  match cli.command {
    Some(Commands::List) => {
      list(&registry, &config);
      Ok(ExitCode::SUCCESS)
    }
    Some(Commands::Plan { selection }) => {
      let plan = plan(&registry, &config, &selection)?;
      for (index, id) in plan.iter().enumerate() {
        println!("{:>2}. {}", index + 1, id);
      }
      Ok(ExitCode::SUCCESS)
    }
    Some(Commands::Run { selection, records }) => {
      let plan = plan(&registry, &config, &selection)?;
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(run(registry, config, plan, records))
    }
    None => {
      println!("janitor - use --help to see available commands");
      Ok(ExitCode::SUCCESS)
    }
  }
}

fn init_tracing(verbose: bool) {
  let default = if verbose { "debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .init();
}

fn list(registry: &Registry<Services>, config: &JanitorConfig) {
  let selection = registry.selection(&config.environment());
  for option in selection.options() {
    let descriptor = option.descriptor();
    let marker = match (option.is_enabled(), option.is_selected()) {
      (false, _) => '-',
      (true, true) => 'x',
      (true, false) => ' ',
    };
    let conflict = if option.is_conflicted() { " (conflict)" } else { "" };
    println!(
      "[{marker}] {:<24} {:<10} {}{conflict}",
      descriptor.id().as_str(),
      descriptor.category(),
      descriptor.title()
    );
    if !option.is_enabled() {
      let missing: Vec<_> = descriptor.requires().iter().map(|c| c.name()).collect();
      println!("      requires: {}", missing.join(", "));
    }
  }
}

fn select(
  registry: &Registry<Services>,
  config: &JanitorConfig,
  args: &SelectionArgs,
) -> Result<Selection> {
  let mut selection = registry.selection(&config.environment());
  for id in &args.select {
    selection
      .set_selected(id, true)
      .with_context(|| format!("cannot select '{id}'"))?;
  }
  for id in &args.deselect {
    selection
      .set_selected(id, false)
      .with_context(|| format!("cannot deselect '{id}'"))?;
  }
  Ok(selection)
}

fn plan(
  registry: &Registry<Services>,
  config: &JanitorConfig,
  args: &SelectionArgs,
) -> Result<ExecutionPlan> {
  let selection = select(registry, config, args)?;
  resolve(selection.options()).context("failed to resolve execution plan")
}

async fn run(
  registry: Registry<Services>,
  config: JanitorConfig,
  plan: ExecutionPlan,
  records: usize,
) -> Result<ExitCode> {
  let store = Arc::new(RecordStore::seeded(records));
  let services = Services::new(store, &config);
  let runner = EngineRunner::new(Arc::new(registry), services).with_config(EngineConfig {
    max_progress_updates_per_second: config.progress.max_updates_per_second,
  });

  let mut handle = runner
    .spawn(plan, CancellationToken::new())
    .context("failed to start run")?;

  let ctrl_c = tokio::signal::ctrl_c();
  tokio::pin!(ctrl_c);
  let mut interrupted = false;

  loop {
    tokio::select! {
        result = &mut ctrl_c, if !interrupted => {
            result.context("failed to listen for ctrl-c")?;
            eprintln!("interrupted, cancelling run");
            interrupted = true;
            handle.cancel();
        }
        event = handle.next_event() => match event {
            Some(event) => render(&event),
            None => break,
        }
    }
  }

  match handle.wait().await? {
    RunOutcome::Completed(summary) => {
      println!("completed {} operations", summary.completed.len());
      Ok(ExitCode::SUCCESS)
    }
    RunOutcome::Failed(failure) => {
      println!("{} failed: {}", failure.operation_id, failure.root_cause);
      Ok(ExitCode::FAILURE)
    }
    RunOutcome::Cancelled(summary) => {
      println!("cancelled after {} operations", summary.completed.len());
      Ok(ExitCode::from(130))
    }
  }
}

fn render(event: &ExecutionEvent) {
  match event {
    ExecutionEvent::RunStarted { run_id, operations } => {
      println!("run {run_id}: {} operations", operations.len());
    }
    ExecutionEvent::OperationStarted { operation_id, .. } => println!("> {operation_id}"),
    ExecutionEvent::OperationProgress {
      operation_id,
      fraction,
      message,
      ..
    } => {
      let percent = fraction.map_or_else(|| "...".to_string(), |f| format!("{:>3.0}%", f * 100.0));
      match message {
        Some(message) => println!("  {operation_id} {percent} {message}"),
        None => println!("  {operation_id} {percent}"),
      }
    }
    ExecutionEvent::OperationCompleted { operation_id, .. } => println!("+ {operation_id}"),
    ExecutionEvent::OperationFailed {
      operation_id,
      error,
      ..
    } => println!("! {operation_id}: {error}"),
    ExecutionEvent::RunCompleted { .. }
    | ExecutionEvent::RunFailed { .. }
    | ExecutionEvent::RunCancelled { .. } => {}
  }
}
