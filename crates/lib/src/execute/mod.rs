//! Build step execution.
//!
//! A single coordinator owns the remaining-predecessor counts of every step.
//! Ready steps run as blocking tasks on a [`JoinSet`], at most
//! `parallelism` at a time. When a task finishes the coordinator decrements
//! each successor's count and queues those that reach zero, so no step can
//! become ready twice. On the first failure nothing new is scheduled; running
//! steps drain and their failures are reported as secondary errors.

pub mod types;

use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::graph::PrunedGraph;
use crate::item::{ItemId, ItemKind};
use crate::result::{BuildResult, StepRecord};
use crate::step::{ConsumeMode, StepContext, StepError};
use crate::store::{ItemStore, ItemValue, Origin};

pub use types::{
  ConfigError, ExecuteConfig, ExecutionError, GRAPH_OUTPUT_ENV, InternalInvariantError, PARALLELISM_ENV,
  StepExecutionError,
};

/// Values supplied for initial items, keyed by item.
pub type InitialValues = HashMap<ItemId, ItemValue>;

/// Why a step task did not complete.
enum StepFailure {
  Action(StepExecutionError),
  Internal(InternalInvariantError),
}

/// Execute a validated graph once.
///
/// Every retained step runs exactly once, after all of its predecessors have
/// completed. Multi items are ordered by producer registration index, so the
/// result does not depend on completion order.
pub async fn execute(
  graph: Arc<PrunedGraph>,
  initial: InitialValues,
  config: &ExecuteConfig,
) -> Result<BuildResult, ExecutionError> {
  let parallelism = config.parallelism.max(1);
  info!(
    steps = graph.steps().len(),
    pruned = graph.pruned_steps().len(),
    parallelism,
    "starting build execution"
  );

  let store = Arc::new(ItemStore::new(graph.items()));
  seed_initial(&graph, &store, initial)?;

  let started = Instant::now();
  let mut remaining: Vec<usize> = graph.steps().iter().map(|s| s.predecessor_count()).collect();
  let mut ready: VecDeque<usize> = (0..remaining.len()).filter(|&pos| remaining[pos] == 0).collect();
  let mut completed = vec![false; remaining.len()];
  let mut records = Vec::with_capacity(remaining.len());
  let mut failures: Vec<StepExecutionError> = Vec::new();
  let mut internal: Option<InternalInvariantError> = None;
  let mut tasks: JoinSet<(usize, Result<StepRecord, StepFailure>)> = JoinSet::new();

  loop {
    if failures.is_empty() && internal.is_none() {
      while tasks.len() < parallelism {
        let Some(pos) = ready.pop_front() else {
          break;
        };
        let graph = graph.clone();
        let store = store.clone();
        debug!(step = graph.steps()[pos].name(), "scheduling step");
        tasks.spawn_blocking(move || (pos, run_step(&graph, pos, &store, started)));
      }
    }

    let Some(joined) = tasks.join_next().await else {
      break;
    };

    match joined {
      Ok((pos, Ok(record))) => {
        debug!(step = %record.name, duration_us = record.duration.as_micros() as u64, "step completed");
        completed[pos] = true;
        records.push(record);
        for &next in graph.steps()[pos].successors() {
          remaining[next] -= 1;
          if remaining[next] == 0 {
            ready.push_back(next);
          }
        }
      }
      Ok((_, Err(StepFailure::Action(err)))) => {
        let cause = format!("{:#}", err.source);
        error!(step = %err.step, error = %cause, "step failed");
        failures.push(err);
      }
      Ok((_, Err(StepFailure::Internal(err)))) => {
        error!(error = %err, "internal error during step execution");
        internal.get_or_insert(err);
      }
      Err(err) => {
        error!(error = %err, "step task failed to join");
        internal.get_or_insert(InternalInvariantError::Join(err.to_string()));
      }
    }
  }

  if let Some(err) = internal {
    return Err(err.into());
  }

  if !failures.is_empty() {
    let first = failures.remove(0);
    if !failures.is_empty() {
      warn!(
        step = %first.step,
        secondary = failures.len(),
        "additional steps failed while draining"
      );
    }
    return Err(ExecutionError::StepFailed {
      first,
      secondary: failures,
    });
  }

  let unscheduled: Vec<String> = graph
    .steps()
    .iter()
    .zip(&completed)
    .filter(|(_, done)| !**done)
    .map(|(step, _)| step.name().to_string())
    .collect();
  if !unscheduled.is_empty() {
    let err = InternalInvariantError::Unscheduled { steps: unscheduled };
    error!(error = %err, "build ended with unscheduled steps");
    return Err(err.into());
  }

  let elapsed = started.elapsed();
  info!(
    steps = records.len(),
    elapsed_ms = elapsed.as_millis() as u64,
    "build execution complete"
  );

  Ok(BuildResult::new(
    store.freeze(),
    records,
    graph.pruned_steps().to_vec(),
    elapsed,
  ))
}

/// Write caller-supplied initial values into the store.
fn seed_initial(graph: &PrunedGraph, store: &ItemStore, initial: InitialValues) -> Result<(), ExecutionError> {
  for item in graph.initial_items() {
    if item.kind() == ItemKind::Single && !initial.contains_key(item) {
      return Err(ExecutionError::MissingInitialValue { item: item.clone() });
    }
  }

  let internal = |source| InternalInvariantError::Store {
    step: "<initial>".to_string(),
    source,
  };

  for (item, value) in initial {
    let Some(declared) = graph.initial_items().find(|declared| **declared == item) else {
      return Err(ExecutionError::UndeclaredInitialValue { item });
    };
    if declared.kind() != value.kind() {
      return Err(ExecutionError::InitialKindMismatch {
        expected: declared.kind(),
        actual: value.kind(),
        item,
      });
    }
    match value {
      ItemValue::Single(Some(payload)) => store.write_single(&item, payload).map_err(internal)?,
      ItemValue::Single(None) => return Err(ExecutionError::MissingInitialValue { item }),
      ItemValue::Multi(payloads) => {
        for (seq, payload) in payloads.into_iter().enumerate() {
          store
            .append_multi(&item, payload, Origin::Initial, seq)
            .map_err(internal)?;
        }
      }
      ItemValue::Empty(true) => store.mark_present(&item).map_err(internal)?,
      ItemValue::Empty(false) => {}
    }
    debug!(item = %item, "seeded initial item");
  }

  Ok(())
}

/// Run one step on the current thread: gather inputs, invoke the action,
/// publish outputs.
fn run_step(graph: &PrunedGraph, pos: usize, store: &ItemStore, build_start: Instant) -> Result<StepRecord, StepFailure> {
  let step = &graph.steps()[pos];
  let descriptor = step.descriptor();
  let name = descriptor.name().to_string();
  let started = build_start.elapsed();
  let clock = Instant::now();

  let fail = |source: anyhow::Error, produced: Vec<String>| {
    StepFailure::Action(StepExecutionError {
      step: name.clone(),
      source,
      produced,
    })
  };
  let internal = |source| {
    StepFailure::Internal(InternalInvariantError::Store {
      step: name.clone(),
      source,
    })
  };

  let mut inputs = HashMap::new();
  for consume in descriptor.consumes() {
    if consume.mode == ConsumeMode::Weak {
      continue;
    }
    let value = store.read(&consume.item).map_err(internal)?;
    let must_exist = consume.mode == ConsumeMode::Required && consume.item.kind() != ItemKind::Multi;
    if must_exist && !value.is_present() {
      let absent = StepError::Absent {
        step: descriptor.shared_name(),
        item: consume.item.clone(),
      };
      return Err(fail(absent.into(), Vec::new()));
    }
    inputs.insert(consume.item.clone(), value);
  }

  debug!(step = %name, "running step");
  let mut ctx = StepContext::new(descriptor, inputs);
  let outcome = panic::catch_unwind(AssertUnwindSafe(|| (descriptor.action())(&mut ctx)));
  let outputs = ctx.into_outputs();

  let outcome = match outcome {
    Ok(result) => result,
    Err(payload) => Err(anyhow!("step panicked: {}", panic_message(payload.as_ref()))),
  };
  if let Err(source) = outcome {
    let mut produced: Vec<String> = Vec::new();
    for output in &outputs {
      let item = output.item.to_string();
      if !produced.contains(&item) {
        produced.push(item);
      }
    }
    return Err(fail(source, produced));
  }

  for output in outputs {
    if step.shadowed.contains(&output.item) {
      debug!(step = %name, item = %output.item, "dropping output overridden by another producer");
      continue;
    }
    let written = match output.item.kind() {
      ItemKind::Single => store.write_single(&output.item, output.payload),
      ItemKind::Multi => store.append_multi(&output.item, output.payload, Origin::Step(step.index()), output.seq),
      ItemKind::Empty => store.mark_present(&output.item),
    };
    written.map_err(internal)?;
  }

  for produce in descriptor.produces() {
    if produce.item.kind() == ItemKind::Empty && !step.shadowed.contains(&produce.item) {
      store.mark_present(&produce.item).map_err(internal)?;
    }
  }

  Ok(StepRecord {
    name,
    index: step.index(),
    started,
    duration: clock.elapsed(),
  })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic".to_string()
  }
}
