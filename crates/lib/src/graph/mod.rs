//! Step dependency graph.
//!
//! [`StepGraph`] holds every registered step with producer-to-consumer edges.
//! [`validate`] prunes it and checks it, yielding a [`PrunedGraph`] the
//! executor can schedule.

mod builder;
mod dot;
mod types;
mod validate;

use std::collections::HashSet;
use std::sync::Arc;

use crate::item::ItemId;
use crate::step::StepDescriptor;

pub use builder::StepGraph;
pub use types::{ChainBuildError, ChainItems, EdgeKind, EdgeLabel, GraphError};
pub use validate::validate;

/// A retained step with its scheduling data.
#[derive(Debug, Clone)]
pub struct ChainStep {
  /// Registration index of the step.
  pub(crate) index: usize,
  pub(crate) descriptor: Arc<StepDescriptor>,
  /// Number of distinct retained steps that must finish first.
  pub(crate) predecessors: usize,
  /// Positions of dependent steps in [`PrunedGraph::steps`].
  pub(crate) successors: Vec<usize>,
  /// Overridable outputs that lost to a real producer.
  pub(crate) shadowed: HashSet<ItemId>,
}

impl ChainStep {
  pub fn name(&self) -> &str {
    self.descriptor.name()
  }

  pub fn index(&self) -> usize {
    self.index
  }

  pub fn descriptor(&self) -> &Arc<StepDescriptor> {
    &self.descriptor
  }

  pub fn predecessor_count(&self) -> usize {
    self.predecessors
  }

  pub fn successors(&self) -> &[usize] {
    &self.successors
  }
}

/// The validated, pruned step graph.
#[derive(Debug, Clone)]
pub struct PrunedGraph {
  steps: Vec<ChainStep>,
  /// `(producer position, consumer position, label)`.
  edges: Vec<(usize, usize, EdgeLabel)>,
  pruned: Vec<String>,
  items: Vec<ItemId>,
  initial: HashSet<ItemId>,
}

impl PrunedGraph {
  /// Retained steps in registration order.
  pub fn steps(&self) -> &[ChainStep] {
    &self.steps
  }

  /// Names of pruned steps in registration order.
  pub fn pruned_steps(&self) -> &[String] {
    &self.pruned
  }

  pub fn edges(&self) -> &[(usize, usize, EdgeLabel)] {
    &self.edges
  }

  /// Items referenced by retained steps plus the initial items.
  pub fn items(&self) -> &[ItemId] {
    &self.items
  }

  pub fn is_initial(&self, item: &ItemId) -> bool {
    self.initial.contains(item)
  }

  pub fn initial_items(&self) -> impl Iterator<Item = &ItemId> {
    self.initial.iter()
  }
}
