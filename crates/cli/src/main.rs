use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cmd;
mod output;

use output::OutputFormat;

/// buildchain - check, render and run build step plans
#[derive(Parser)]
#[command(name = "buildchain")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Validate a plan and list the steps that would run
  Check {
    /// Path to the plan file
    plan: PathBuf,
  },

  /// Render the validated step graph in DOT format
  Graph {
    /// Path to the plan file
    plan: PathBuf,

    /// Write the graph to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
  },

  /// Validate and execute a plan
  Run {
    /// Path to the plan file
    plan: PathBuf,

    /// Maximum number of steps running at once
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Also write the step graph to this file
    #[arg(long)]
    graph_output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    format: OutputFormat,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match cli.command {
    Commands::Check { plan } => cmd::cmd_check(&plan, cli.verbose),
    Commands::Graph { plan, output } => cmd::cmd_graph(&plan, output.as_deref()),
    Commands::Run {
      plan,
      jobs,
      graph_output,
      format,
    } => cmd::cmd_run(&plan, jobs, graph_output, format),
  }
}
