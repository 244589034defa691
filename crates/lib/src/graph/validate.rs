//! Graph validation and dead-step elimination.
//!
//! Validation runs in a fixed order: pruning to a fixpoint, single-producer
//! uniqueness, required-producer existence, cycle detection and the final item
//! edge check. Problems are collected rather than returned on first sight.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::algo::tarjan_scc;
use petgraph::graph::NodeIndex;
use tracing::{debug, info};

use crate::item::{ItemId, ItemKind};
use crate::step::ConsumeMode;

use super::builder::StepGraph;
use super::types::{ChainBuildError, ChainItems, GraphError};
use super::{ChainStep, PrunedGraph};

/// Validate a step graph and prune steps nobody needs.
pub fn validate(graph: &StepGraph, items: &ChainItems) -> Result<PrunedGraph, ChainBuildError> {
  let retained = prune(graph, items);
  let mut errors = Vec::new();

  errors.extend(graph.kind_conflicts().iter().cloned());
  check_unique_producers(graph, &retained, &mut errors);
  check_initial_items(graph, items, &retained, &mut errors);
  check_required_producers(graph, items, &retained, &mut errors);
  check_cycles(graph, &retained, &mut errors);
  check_final_items(graph, items, &retained, &mut errors);

  if !errors.is_empty() {
    return Err(ChainBuildError { errors });
  }

  let pruned = assemble(graph, items, &retained);
  info!(
    retained = pruned.steps().len(),
    pruned = pruned.pruned_steps().len(),
    "validated build chain"
  );
  Ok(pruned)
}

/// Remove steps whose outputs nobody needs, until nothing changes.
///
/// A produced item keeps its step alive when it is final, or when a retained
/// step consumes it with a required or optional consumption. Weak consumers
/// never keep a producer alive, and neither do weak or shadowed overridable
/// outputs.
pub(crate) fn prune(graph: &StepGraph, items: &ChainItems) -> Vec<bool> {
  let mut retained = vec![true; graph.step_count()];

  loop {
    let mut changed = false;
    for idx in 0..graph.step_count() {
      if !retained[idx] {
        continue;
      }

      let needed = graph.step(idx).produces().iter().any(|produce| {
        if produce.weak || graph.is_shadowed(idx, &produce.item) {
          return false;
        }
        if produce.is_final || items.finals.contains(&produce.item) {
          return true;
        }
        graph
          .consumers_of(&produce.item)
          .iter()
          .any(|&(consumer, mode)| retained[consumer] && mode != ConsumeMode::Weak)
      });

      if !needed {
        debug!(step = graph.step(idx).name(), "pruning step with no consumers");
        retained[idx] = false;
        changed = true;
      }
    }

    if !changed {
      break;
    }
  }

  retained
}

fn retained_producers(graph: &StepGraph, item: &ItemId, retained: &[bool]) -> Vec<usize> {
  graph
    .producers_of(item)
    .iter()
    .copied()
    .filter(|&idx| retained[idx])
    .collect()
}

fn check_unique_producers(graph: &StepGraph, retained: &[bool], errors: &mut Vec<GraphError>) {
  for item in graph.items().iter().filter(|i| i.kind() == ItemKind::Single) {
    let producers = retained_producers(graph, item, retained);
    if producers.len() > 1 {
      errors.push(GraphError::AmbiguousProducer {
        item: item.clone(),
        steps: producers.iter().map(|&idx| graph.step(idx).name().to_string()).collect(),
      });
    }
  }
}

fn check_initial_items(graph: &StepGraph, items: &ChainItems, retained: &[bool], errors: &mut Vec<GraphError>) {
  for item in graph.items().iter().filter(|i| i.kind() != ItemKind::Multi) {
    if !items.initial.contains(item) {
      continue;
    }
    for idx in retained_producers(graph, item, retained) {
      errors.push(GraphError::InitialItemProduced {
        item: item.clone(),
        step: graph.step(idx).name().to_string(),
      });
    }
  }
}

fn check_required_producers(graph: &StepGraph, items: &ChainItems, retained: &[bool], errors: &mut Vec<GraphError>) {
  for idx in (0..graph.step_count()).filter(|&idx| retained[idx]) {
    let step = graph.step(idx);
    for consume in step.consumes() {
      if consume.mode != ConsumeMode::Required || items.initial.contains(&consume.item) {
        continue;
      }
      if retained_producers(graph, &consume.item, retained).is_empty() {
        errors.push(GraphError::MissingProducer {
          step: step.name().to_string(),
          item: consume.item.clone(),
        });
      }
    }
  }
}

fn check_cycles(graph: &StepGraph, retained: &[bool], errors: &mut Vec<GraphError>) {
  for cycle in find_cycles(graph, retained) {
    errors.push(GraphError::CyclicDependency {
      cycle: cycle.iter().map(|&idx| graph.step(idx).name().to_string()).collect(),
    });
  }
}

/// One concrete cycle per cyclic strongly connected component of the retained graph.
///
/// Each cycle starts and ends at the component's lowest registration index.
pub(crate) fn find_cycles(graph: &StepGraph, retained: &[bool]) -> Vec<Vec<usize>> {
  let filtered = graph
    .graph()
    .filter_map(|_, &step| retained[step].then_some(step), |_, _| Some(()));

  let mut cycles = Vec::new();
  for component in tarjan_scc(&filtered) {
    let is_cyclic = component.len() > 1 || filtered.contains_edge(component[0], component[0]);
    if !is_cyclic {
      continue;
    }

    let members: HashSet<NodeIndex> = component.iter().copied().collect();
    let Some(&start) = component.iter().min_by_key(|n| filtered[**n]) else {
      continue;
    };

    // Breadth-first search inside the component for the shortest way back to `start`.
    let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    let mut queue = VecDeque::from([start]);
    let mut closing = None;
    'search: while let Some(node) = queue.pop_front() {
      for next in filtered.neighbors(node) {
        if next == start {
          closing = Some(node);
          break 'search;
        }
        if members.contains(&next) && !parent.contains_key(&next) {
          parent.insert(next, node);
          queue.push_back(next);
        }
      }
    }

    let Some(mut node) = closing else {
      continue;
    };
    let mut path = vec![filtered[start]];
    let mut back = Vec::new();
    while node != start {
      back.push(filtered[node]);
      node = parent[&node];
    }
    path.extend(back.into_iter().rev());
    path.push(filtered[start]);
    cycles.push(path);
  }

  cycles.sort();
  cycles
}

fn check_final_items(graph: &StepGraph, items: &ChainItems, retained: &[bool], errors: &mut Vec<GraphError>) {
  let mut finals: HashSet<ItemId> = items.finals.clone();
  for idx in (0..graph.step_count()).filter(|&idx| retained[idx]) {
    for produce in graph.step(idx).produces() {
      if produce.is_final && !graph.is_shadowed(idx, &produce.item) {
        finals.insert(produce.item.clone());
      }
    }
  }
  if finals.is_empty() {
    return;
  }

  let mut reported: HashSet<(ItemId, usize, usize)> = HashSet::new();
  for (from, to, _) in graph.edges() {
    if !retained[from] || !retained[to] {
      continue;
    }
    for consume in graph.step(from).consumes() {
      if !finals.contains(&consume.item) || !graph.producers_of(&consume.item).contains(&to) {
        continue;
      }
      if reported.insert((consume.item.clone(), from, to)) {
        errors.push(GraphError::FinalItemViolation {
          item: consume.item.clone(),
          consumer: graph.step(from).name().to_string(),
          producer: graph.step(to).name().to_string(),
        });
      }
    }
  }
}

fn assemble(graph: &StepGraph, items: &ChainItems, retained: &[bool]) -> PrunedGraph {
  let mut positions = vec![None; graph.step_count()];
  let mut kept = Vec::new();
  let mut pruned = Vec::new();
  for idx in 0..graph.step_count() {
    if retained[idx] {
      positions[idx] = Some(kept.len());
      kept.push(idx);
    } else {
      pruned.push(graph.step(idx).name().to_string());
    }
  }

  let steps = kept
    .iter()
    .map(|&idx| {
      let descriptor = graph.step(idx).clone();
      let shadowed = descriptor
        .produces()
        .iter()
        .filter(|p| graph.is_shadowed(idx, &p.item))
        .map(|p| p.item.clone())
        .collect();
      ChainStep {
        index: idx,
        predecessors: graph.predecessors(idx).into_iter().filter(|&p| retained[p]).count(),
        successors: graph
          .successors(idx)
          .into_iter()
          .filter_map(|s| positions[s])
          .collect(),
        shadowed,
        descriptor,
      }
    })
    .collect();

  let edges = graph
    .edges()
    .filter_map(|(from, to, label)| Some((positions[from]?, positions[to]?, label.clone())))
    .collect();

  let mut seen = HashSet::new();
  let mut all_items = Vec::new();
  for &idx in &kept {
    let step = graph.step(idx);
    let referenced = step
      .produces()
      .iter()
      .map(|p| &p.item)
      .chain(step.consumes().iter().map(|c| &c.item));
    for item in referenced {
      if seen.insert(item.clone()) {
        all_items.push(item.clone());
      }
    }
  }
  for item in &items.initial {
    if seen.insert(item.clone()) {
      all_items.push(item.clone());
    }
  }

  PrunedGraph {
    steps,
    edges,
    pruned,
    items: all_items,
    initial: items.initial.clone(),
  }
}
