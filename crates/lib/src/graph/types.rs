//! Types shared by graph construction and validation.

use std::collections::HashSet;
use std::fmt;

use thiserror::Error;

use crate::item::{ItemId, ItemKind};

/// Why an edge exists between two steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
  /// The consumer reads the item's value (required or optional).
  Data,
  /// The consumer only runs after the item's producers (weak consumption).
  Order,
}

impl fmt::Display for EdgeKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      EdgeKind::Data => write!(f, "data"),
      EdgeKind::Order => write!(f, "order"),
    }
  }
}

/// Label of a step-to-step edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeLabel {
  pub item: ItemId,
  pub kind: EdgeKind,
}

/// Chain-level item declarations that are not tied to a single step.
#[derive(Debug, Clone, Default)]
pub struct ChainItems {
  /// Items supplied by the caller when execution starts.
  pub initial: HashSet<ItemId>,
  /// Items that must survive pruning, whoever produces them.
  pub finals: HashSet<ItemId>,
}

/// A structural problem found while validating a step graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
  #[error("multiple producers of single item `{item}`: {}", .steps.join(", "))]
  AmbiguousProducer { item: ItemId, steps: Vec<String> },

  #[error("no producer for item `{item}` required by step `{step}`")]
  MissingProducer { step: String, item: ItemId },

  #[error("dependency cycle: {}", .cycle.join(" -> "))]
  CyclicDependency { cycle: Vec<String> },

  #[error("final item `{item}` consumed by `{consumer}` is produced again downstream by `{producer}`")]
  FinalItemViolation {
    item: ItemId,
    consumer: String,
    producer: String,
  },

  #[error("initial item `{item}` cannot be produced by step `{step}`")]
  InitialItemProduced { item: ItemId, step: String },

  #[error("item `{item}` is declared {first} but step `{step}` declares it {second}")]
  KindConflict {
    item: ItemId,
    first: ItemKind,
    second: ItemKind,
    step: String,
  },
}

/// Every problem found in one validation pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid build chain ({} error(s)):{}", .errors.len(), render_errors(.errors))]
pub struct ChainBuildError {
  pub errors: Vec<GraphError>,
}

impl ChainBuildError {
  pub fn errors(&self) -> &[GraphError] {
    &self.errors
  }
}

fn render_errors(errors: &[GraphError]) -> String {
  errors.iter().map(|e| format!("\n  - {}", e)).collect()
}
