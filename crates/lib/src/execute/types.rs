//! Types for build execution.
//!
//! This module defines the configuration of the executor and the errors a
//! build can fail with once the graph has been validated.

use std::path::PathBuf;

use thiserror::Error;

use crate::item::{ItemId, ItemKind};
use crate::store::StoreError;

/// Environment variable overriding [`ExecuteConfig::parallelism`].
pub const PARALLELISM_ENV: &str = "BUILDCHAIN_PARALLELISM";

/// Environment variable setting [`ExecuteConfig::graph_output`].
pub const GRAPH_OUTPUT_ENV: &str = "BUILDCHAIN_GRAPH_OUTPUT";

/// Configuration for build execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteConfig {
  /// Maximum number of steps running at once. Zero is treated as one.
  pub parallelism: usize,

  /// Where [`crate::run`] and [`crate::plan::Plan::run`] write the DOT
  /// rendering of the retained graph before running it. Executing a chain
  /// through [`crate::BuildChain::execution`] ignores it.
  pub graph_output: Option<PathBuf>,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      parallelism: num_cpus(),
      graph_output: None,
    }
  }
}

impl ExecuteConfig {
  /// Defaults overridden by `BUILDCHAIN_PARALLELISM` and `BUILDCHAIN_GRAPH_OUTPUT`.
  pub fn from_env() -> Result<Self, ConfigError> {
    let mut config = Self::default();

    if let Ok(raw) = std::env::var(PARALLELISM_ENV) {
      config.parallelism = match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => n,
        _ => {
          return Err(ConfigError::InvalidParallelism { value: raw });
        }
      };
    }

    if let Some(path) = std::env::var_os(GRAPH_OUTPUT_ENV).filter(|p| !p.is_empty()) {
      config.graph_output = Some(PathBuf::from(path));
    }

    Ok(config)
  }

  pub fn with_parallelism(mut self, parallelism: usize) -> Self {
    self.parallelism = parallelism;
    self
  }

  pub fn with_graph_output(mut self, path: impl Into<PathBuf>) -> Self {
    self.graph_output = Some(path.into());
    self
  }
}

/// Get the number of CPUs for default parallelism.
fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}

/// Invalid configuration read from the environment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
  #[error("BUILDCHAIN_PARALLELISM must be a positive integer, got `{value}`")]
  InvalidParallelism { value: String },
}

/// A step action returned an error or panicked.
#[derive(Debug, Error)]
#[error("step `{step}` failed: {source:#}")]
pub struct StepExecutionError {
  pub step: String,
  #[source]
  pub source: anyhow::Error,
  /// Items the step had produced before failing. None of them reached the store.
  pub produced: Vec<String>,
}

/// The engine itself misbehaved. Never recovered from.
#[derive(Debug, Error)]
pub enum InternalInvariantError {
  #[error("store rejected output of step `{step}`: {source}")]
  Store {
    step: String,
    #[source]
    source: StoreError,
  },

  #[error("steps never became ready: {}", .steps.join(", "))]
  Unscheduled { steps: Vec<String> },

  #[error("step task failed to join: {0}")]
  Join(String),
}

/// Errors that end a build after validation succeeded.
#[derive(Debug, Error)]
pub enum ExecutionError {
  /// The first step failure, plus failures of steps that were still running.
  #[error("{first}{}", render_secondary(.secondary))]
  StepFailed {
    first: StepExecutionError,
    secondary: Vec<StepExecutionError>,
  },

  #[error("internal error: {0}")]
  Internal(#[from] InternalInvariantError),

  #[error("no value supplied for initial item `{item}`")]
  MissingInitialValue { item: ItemId },

  #[error("`{item}` is not an initial item of this chain")]
  UndeclaredInitialValue { item: ItemId },

  #[error("initial item `{item}` is declared {expected} but was given a {actual} value")]
  InitialKindMismatch {
    item: ItemId,
    expected: ItemKind,
    actual: ItemKind,
  },
}

fn render_secondary(secondary: &[StepExecutionError]) -> String {
  if secondary.is_empty() {
    return String::new();
  }
  let rest: Vec<String> = secondary.iter().map(ToString::to_string).collect();
  format!(" (+{} more: {})", secondary.len(), rest.join("; "))
}

impl ExecutionError {
  /// Name of the step that failed first, if a step failed.
  pub fn failed_step(&self) -> Option<&str> {
    match self {
      ExecutionError::StepFailed { first, .. } => Some(&first.step),
      _ => None,
    }
  }
}
