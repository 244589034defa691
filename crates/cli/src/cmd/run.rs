//! Implementation of the `buildchain run` command.
//!
//! Validates a plan, then executes it. Configuration is read from the
//! environment and command line flags override it.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use buildchain_lib::{BuildError, ExecuteConfig};

use super::load_chain;
use crate::output::{OutputFormat, format_duration, print_error, print_json, print_success};

pub fn cmd_run(path: &Path, jobs: Option<usize>, graph_output: Option<PathBuf>, format: OutputFormat) -> Result<()> {
  let mut config = ExecuteConfig::from_env()?;
  if let Some(jobs) = jobs {
    config = config.with_parallelism(jobs);
  }
  if let Some(file) = graph_output {
    config = config.with_graph_output(file);
  }

  // Validate first so graph errors are listed one per line.
  let (plan, chain) = load_chain(path)?;
  info!(steps = chain.steps().len(), parallelism = config.parallelism, "running plan");

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let result = match rt.block_on(plan.run_chain(&chain, &config)) {
    Ok(result) => result,
    Err(BuildError::Execution(err)) => {
      print_error(&err.to_string());
      let step = err.failed_step().unwrap_or("<internal>");
      anyhow::bail!("build failed in step `{step}`");
    }
    Err(err) => return Err(err.into()),
  };

  let report = result.report();
  if format.is_json() {
    print_json(&report)?;
  } else {
    print!("{report}");
    print_success(&format!("Build succeeded in {}", format_duration(result.elapsed())));
  }

  Ok(())
}
