//! JSON plan files.
//!
//! Plans describe a build chain without Rust types: every item is a named
//! item carrying JSON values, and every step action sleeps, fails or emits the
//! values it declares. The CLI checks, renders and runs plans.

mod types;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::chain::{BuildChain, BuildChainBuilder, BuildError};
use crate::execute::ExecuteConfig;
use crate::graph::ChainBuildError;
use crate::item::{ItemId, ItemKind};
use crate::result::BuildResult;
use crate::step::StepDescriptor;

pub use types::{Plan, PlanConsume, PlanProduce, PlanStep};

/// Errors loading a plan file.
#[derive(Debug, Error)]
pub enum PlanError {
  #[error("failed to read plan {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid plan: {0}")]
  Parse(#[from] serde_json::Error),

  #[error("step name `{0}` is used more than once")]
  DuplicateStep(String),

  #[error("initial value of multi item `{0}` must be an array")]
  InitialNotArray(String),
}

impl Plan {
  /// Read and parse a plan file.
  pub fn load(path: &Path) -> Result<Self, PlanError> {
    let json = std::fs::read_to_string(path).map_err(|source| PlanError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    debug!(path = %path.display(), "loaded plan file");
    Self::parse(&json)
  }

  /// Parse a plan from JSON text and check it for problems serde cannot see.
  pub fn parse(json: &str) -> Result<Self, PlanError> {
    let plan: Plan = serde_json::from_str(json)?;

    let mut names = HashSet::new();
    for step in &plan.steps {
      if !names.insert(step.name.as_str()) {
        return Err(PlanError::DuplicateStep(step.name.clone()));
      }
    }

    let kinds = plan.item_kinds();
    for (name, value) in &plan.initial {
      if kinds.get(name.as_str()) == Some(&ItemKind::Multi) && !value.is_array() {
        return Err(PlanError::InitialNotArray(name.clone()));
      }
    }

    Ok(plan)
  }

  /// The identity of a named item as this plan uses it.
  pub fn item(&self, name: &str) -> ItemId {
    let kind = self.item_kinds().get(name).copied().unwrap_or(ItemKind::Single);
    ItemId::named(name, kind)
  }

  /// Register every step and chain-level item of the plan.
  pub fn chain_builder(&self) -> BuildChainBuilder {
    let kinds = self.item_kinds();
    let id = |name: &str, explicit: Option<ItemKind>| {
      let kind = explicit.or_else(|| kinds.get(name).copied()).unwrap_or(ItemKind::Single);
      ItemId::named(name, kind)
    };

    let mut builder = BuildChainBuilder::new();
    for name in self.initial.keys() {
      builder = builder.add_initial_item(id(name.as_str(), None));
    }
    for name in &self.finals {
      builder = builder.add_final_item(id(name.as_str(), None));
    }

    for step in &self.steps {
      let mut descriptor = StepDescriptor::builder(step.name.as_str());
      let mut emits: Vec<(ItemId, Vec<Value>)> = Vec::new();
      for produce in &step.produces {
        let item = ItemId::named(produce.item.as_str(), produce.kind);
        descriptor = descriptor.produces_item(item.clone(), produce.is_final, produce.overridable, produce.weak);
        let values: Vec<Value> = produce.value.iter().chain(&produce.values).cloned().collect();
        if produce.kind != ItemKind::Empty && !values.is_empty() {
          emits.push((item, values));
        }
      }
      for consume in &step.consumes {
        descriptor = descriptor.consumes_item(id(consume.item.as_str(), consume.kind), consume.mode);
      }

      let fail = step.fail.clone();
      let delay = step.delay_ms.map(Duration::from_millis);
      builder = builder.add_step(descriptor.build(move |ctx| {
        if let Some(delay) = delay {
          thread::sleep(delay);
        }
        if let Some(message) = &fail {
          anyhow::bail!("{message}");
        }
        for (item, values) in &emits {
          for value in values {
            ctx.produce_value(item, value.clone())?;
          }
        }
        Ok(())
      }));
    }

    builder
  }

  /// Build and validate the chain this plan describes.
  pub fn build_chain(&self) -> Result<BuildChain, ChainBuildError> {
    self.chain_builder().build()
  }

  /// Validate the plan and execute it once with its initial values.
  pub async fn run(&self, config: &ExecuteConfig) -> Result<BuildResult, BuildError> {
    let chain = self.build_chain()?;
    self.run_chain(&chain, config).await
  }

  /// Execute a chain already built from this plan, seeding the plan's
  /// initial values and writing `config.graph_output` first.
  pub async fn run_chain(&self, chain: &BuildChain, config: &ExecuteConfig) -> Result<BuildResult, BuildError> {
    chain.write_configured_dot(config)?;

    let mut execution = chain.execution();
    for (name, value) in &self.initial {
      let item = self.item(name);
      match (item.kind(), value) {
        (ItemKind::Multi, Value::Array(elements)) => {
          for element in elements {
            execution = execution.initial_value(&item, element.clone());
          }
        }
        _ => execution = execution.initial_value(&item, value.clone()),
      }
    }
    Ok(execution.run(config).await?)
  }

  /// Kind of every item, taken from produce declarations first, then from
  /// explicit kinds on consume declarations.
  fn item_kinds(&self) -> HashMap<&str, ItemKind> {
    let mut kinds = HashMap::new();
    for step in &self.steps {
      for produce in &step.produces {
        kinds.entry(produce.item.as_str()).or_insert(produce.kind);
      }
    }
    for step in &self.steps {
      for consume in &step.consumes {
        if let Some(kind) = consume.kind {
          kinds.entry(consume.item.as_str()).or_insert(kind);
        }
      }
    }
    kinds
  }
}
