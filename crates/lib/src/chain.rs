//! Build chain assembly.
//!
//! [`BuildChainBuilder`] collects steps and chain-level item declarations,
//! then validates them into a [`BuildChain`]. A chain can be executed any
//! number of times; each execution gets a fresh item store.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::execute::{self, ExecuteConfig, ExecutionError, InitialValues};
use crate::graph::{ChainBuildError, ChainItems, ChainStep, PrunedGraph, StepGraph, validate};
use crate::item::{BuildItem, EmptyBuildItem, ItemId, ItemKind, MultiBuildItem, Payload, SimpleBuildItem};
use crate::result::BuildResult;
use crate::step::StepDescriptor;
use crate::store::ItemValue;

/// Anything that can stop [`run`].
#[derive(Debug, Error)]
pub enum BuildError {
  #[error(transparent)]
  Graph(#[from] ChainBuildError),

  #[error(transparent)]
  Execution(#[from] ExecutionError),

  #[error("failed to write build graph to {path}: {source}")]
  GraphOutput {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// Collects steps in registration order.
#[derive(Debug, Default)]
pub struct BuildChainBuilder {
  steps: Vec<Arc<StepDescriptor>>,
  items: ChainItems,
}

impl BuildChainBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a step. Its registration index is the number of steps added before it.
  pub fn add_step(mut self, step: StepDescriptor) -> Self {
    self.steps.push(Arc::new(step));
    self
  }

  pub fn add_steps(mut self, steps: impl IntoIterator<Item = StepDescriptor>) -> Self {
    self.steps.extend(steps.into_iter().map(Arc::new));
    self
  }

  /// Declare `T` as supplied by the caller at execution time.
  pub fn add_initial<T: BuildItem>(self) -> Self {
    self.add_initial_item(ItemId::of::<T>())
  }

  pub fn add_initial_item(mut self, item: ItemId) -> Self {
    self.items.initial.insert(item);
    self
  }

  /// Declare `T` final for every producer.
  pub fn add_final<T: BuildItem>(self) -> Self {
    self.add_final_item(ItemId::of::<T>())
  }

  pub fn add_final_item(mut self, item: ItemId) -> Self {
    self.items.finals.insert(item);
    self
  }

  /// Build the step graph, prune it and validate it.
  pub fn build(self) -> Result<BuildChain, ChainBuildError> {
    info!(steps = self.steps.len(), "building build chain");
    let graph = StepGraph::build(self.steps);
    let pruned = validate(&graph, &self.items)?;
    Ok(BuildChain {
      graph: Arc::new(pruned),
    })
  }
}

/// A validated chain, ready to execute.
#[derive(Debug, Clone)]
pub struct BuildChain {
  graph: Arc<PrunedGraph>,
}

impl BuildChain {
  pub fn builder() -> BuildChainBuilder {
    BuildChainBuilder::new()
  }

  /// Retained steps in registration order.
  pub fn steps(&self) -> &[ChainStep] {
    self.graph.steps()
  }

  pub fn pruned_steps(&self) -> &[String] {
    self.graph.pruned_steps()
  }

  pub fn graph(&self) -> &PrunedGraph {
    &self.graph
  }

  pub fn to_dot(&self) -> String {
    self.graph.to_dot()
  }

  pub fn write_dot(&self, path: impl Into<PathBuf>) -> Result<(), BuildError> {
    let path = path.into();
    self
      .graph
      .write_dot(&path)
      .map_err(|source| BuildError::GraphOutput { path, source })
  }

  /// Write the graph to `config.graph_output`, if set.
  pub(crate) fn write_configured_dot(&self, config: &ExecuteConfig) -> Result<(), BuildError> {
    match &config.graph_output {
      Some(path) => self.write_dot(path.clone()),
      None => Ok(()),
    }
  }

  /// Start describing one execution of this chain. The execution does not
  /// write `config.graph_output`; use [`Self::write_dot`] for that.
  pub fn execution(&self) -> ExecutionBuilder<'_> {
    ExecutionBuilder {
      chain: self,
      initial: InitialValues::new(),
    }
  }
}

/// Initial values for one execution of a [`BuildChain`].
pub struct ExecutionBuilder<'a> {
  chain: &'a BuildChain,
  initial: InitialValues,
}

impl ExecutionBuilder<'_> {
  /// Supply the value of an initial single item.
  pub fn initial<T: SimpleBuildItem>(mut self, value: T) -> Self {
    let payload: Payload = Arc::new(value);
    self.initial.insert(ItemId::of::<T>(), ItemValue::Single(Some(payload)));
    self
  }

  /// Add one element of an initial multi item. Initial elements come before every step's.
  pub fn initial_multi<T: MultiBuildItem>(self, value: T) -> Self {
    let payload: Payload = Arc::new(value);
    self.push_multi(ItemId::of::<T>(), payload)
  }

  /// Mark an initial empty item as present.
  pub fn initial_present<T: EmptyBuildItem>(mut self) -> Self {
    self.initial.insert(ItemId::of::<T>(), ItemValue::Empty(true));
    self
  }

  /// Supply a JSON value for a named initial item. Multi items take one element per call.
  pub fn initial_value(mut self, item: &ItemId, value: Value) -> Self {
    let payload: Payload = Arc::new(value);
    match item.kind() {
      ItemKind::Single => {
        self.initial.insert(item.clone(), ItemValue::Single(Some(payload)));
        self
      }
      ItemKind::Multi => self.push_multi(item.clone(), payload),
      ItemKind::Empty => {
        self.initial.insert(item.clone(), ItemValue::Empty(true));
        self
      }
    }
  }

  fn push_multi(mut self, item: ItemId, payload: Payload) -> Self {
    let entry = self.initial.entry(item).or_insert_with(|| ItemValue::Multi(Vec::new()));
    if let ItemValue::Multi(values) = entry {
      values.push(payload);
    }
    self
  }

  pub async fn run(self, config: &ExecuteConfig) -> Result<BuildResult, ExecutionError> {
    execute::execute(self.chain.graph.clone(), self.initial, config).await
  }
}

/// Validate and execute `steps` once.
///
/// When `config.graph_output` is set the retained graph is written there as
/// DOT before any step runs.
pub async fn run(steps: Vec<StepDescriptor>, config: &ExecuteConfig) -> Result<BuildResult, BuildError> {
  let chain = BuildChainBuilder::new().add_steps(steps).build()?;
  chain.write_configured_dot(config)?;
  Ok(chain.execution().run(config).await?)
}
