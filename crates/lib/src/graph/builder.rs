//! Step graph construction.
//!
//! Turns a list of step descriptors into a directed graph of step-to-step
//! edges. Structural problems are not reported here; the validator looks at
//! the whole graph at once so that every problem can be reported together.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::item::{ItemId, ItemKind};
use crate::step::{ConsumeMode, StepDescriptor};

use super::types::{EdgeKind, EdgeLabel, GraphError};

/// Directed graph of registered steps.
///
/// Node `i` of the underlying graph is the step with registration index `i`.
/// Edges run from producer to consumer.
#[derive(Debug)]
pub struct StepGraph {
  steps: Vec<Arc<StepDescriptor>>,
  graph: DiGraph<usize, EdgeLabel>,

  /// Effective producers per item, in registration order.
  producers: HashMap<ItemId, Vec<usize>>,

  /// Consumers per item with their consume mode, in registration order.
  consumers: HashMap<ItemId, Vec<(usize, ConsumeMode)>>,

  /// Overridable produce declarations ignored because a real producer exists.
  shadowed: HashSet<(usize, ItemId)>,

  /// Every item referenced by any step, in first-seen order.
  items: Vec<ItemId>,

  kind_conflicts: Vec<GraphError>,
}

impl StepGraph {
  /// Build the graph from steps in registration order.
  pub fn build(steps: Vec<Arc<StepDescriptor>>) -> Self {
    let mut graph = DiGraph::with_capacity(steps.len(), steps.len());
    for idx in 0..steps.len() {
      graph.add_node(idx);
    }

    let mut kinds: HashMap<ItemId, ItemKind> = HashMap::new();
    let mut items = Vec::new();
    let mut kind_conflicts = Vec::new();
    let mut declared: HashMap<ItemId, Vec<(usize, bool)>> = HashMap::new();
    let mut consumers: HashMap<ItemId, Vec<(usize, ConsumeMode)>> = HashMap::new();

    let mut note_item = |item: &ItemId, step: &StepDescriptor| match kinds.get(item) {
      Some(&first) if first != item.kind() => kind_conflicts.push(GraphError::KindConflict {
        item: item.clone(),
        first,
        second: item.kind(),
        step: step.name().to_string(),
      }),
      Some(_) => {}
      None => {
        kinds.insert(item.clone(), item.kind());
        items.push(item.clone());
      }
    };

    for (idx, step) in steps.iter().enumerate() {
      for produce in step.produces() {
        note_item(&produce.item, step);
        declared
          .entry(produce.item.clone())
          .or_default()
          .push((idx, produce.overridable));
      }
      for consume in step.consumes() {
        note_item(&consume.item, step);
        consumers
          .entry(consume.item.clone())
          .or_default()
          .push((idx, consume.mode));
      }
    }

    // Overridable producers only count when nobody produces the item for real.
    let mut producers = HashMap::new();
    let mut shadowed = HashSet::new();
    for (item, decls) in declared {
      let real: Vec<usize> = decls.iter().filter(|(_, o)| !o).map(|(idx, _)| *idx).collect();
      if real.is_empty() {
        producers.insert(item, decls.iter().map(|(idx, _)| *idx).collect());
      } else {
        for (idx, _) in decls.iter().filter(|(_, o)| *o) {
          shadowed.insert((*idx, item.clone()));
        }
        producers.insert(item, real);
      }
    }

    for item in &items {
      let (Some(item_producers), Some(item_consumers)) = (producers.get(item), consumers.get(item)) else {
        continue;
      };
      for &(consumer, mode) in item_consumers {
        let kind = match mode {
          ConsumeMode::Weak => EdgeKind::Order,
          ConsumeMode::Required | ConsumeMode::Optional => EdgeKind::Data,
        };
        for &producer in item_producers {
          graph.add_edge(
            NodeIndex::new(producer),
            NodeIndex::new(consumer),
            EdgeLabel {
              item: item.clone(),
              kind,
            },
          );
        }
      }
    }

    Self {
      steps,
      graph,
      producers,
      consumers,
      shadowed,
      items,
      kind_conflicts,
    }
  }

  pub fn steps(&self) -> &[Arc<StepDescriptor>] {
    &self.steps
  }

  pub fn step(&self, idx: usize) -> &Arc<StepDescriptor> {
    &self.steps[idx]
  }

  pub fn step_count(&self) -> usize {
    self.steps.len()
  }

  /// Effective producers of an item.
  pub fn producers_of(&self, item: &ItemId) -> &[usize] {
    self.producers.get(item).map(Vec::as_slice).unwrap_or(&[])
  }

  pub fn consumers_of(&self, item: &ItemId) -> &[(usize, ConsumeMode)] {
    self.consumers.get(item).map(Vec::as_slice).unwrap_or(&[])
  }

  /// Whether a step's overridable declaration of `item` lost to a real producer.
  pub fn is_shadowed(&self, step: usize, item: &ItemId) -> bool {
    self.shadowed.contains(&(step, item.clone()))
  }

  pub fn items(&self) -> &[ItemId] {
    &self.items
  }

  pub fn kind_conflicts(&self) -> &[GraphError] {
    &self.kind_conflicts
  }

  /// All edges as `(producer, consumer, label)`.
  pub fn edges(&self) -> impl Iterator<Item = (usize, usize, &EdgeLabel)> {
    self
      .graph
      .edge_references()
      .map(|e| (e.source().index(), e.target().index(), e.weight()))
  }

  /// Distinct steps that must complete before `idx`.
  pub fn predecessors(&self, idx: usize) -> Vec<usize> {
    self.neighbors(idx, Direction::Incoming)
  }

  /// Distinct steps waiting on `idx`.
  pub fn successors(&self, idx: usize) -> Vec<usize> {
    self.neighbors(idx, Direction::Outgoing)
  }

  fn neighbors(&self, idx: usize, direction: Direction) -> Vec<usize> {
    let mut out: Vec<usize> = self
      .graph
      .neighbors_directed(NodeIndex::new(idx), direction)
      .map(|n| n.index())
      .collect();
    out.sort_unstable();
    out.dedup();
    out
  }

  pub(crate) fn graph(&self) -> &DiGraph<usize, EdgeLabel> {
    &self.graph
  }
}
