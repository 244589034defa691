//! The view a running step has of the build.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::item::{EmptyBuildItem, ItemId, ItemKind, MultiBuildItem, Payload, SimpleBuildItem};
use crate::store::ItemValue;

use super::StepDescriptor;

/// Misuse of the step context by a step action.
#[derive(Debug, Error)]
pub enum StepError {
  #[error("step `{step}` does not declare `{item}` as {access}")]
  Undeclared {
    step: Arc<str>,
    item: ItemId,
    access: &'static str,
  },

  #[error("item `{item}` is not available to step `{step}`")]
  Absent { step: Arc<str>, item: ItemId },

  #[error("step `{step}` already produced `{item}`")]
  AlreadyProduced { step: Arc<str>, item: ItemId },

  #[error("item `{item}` is a {actual} item, not {expected}")]
  KindMismatch {
    item: ItemId,
    expected: ItemKind,
    actual: ItemKind,
  },

  #[error("payload of `{item}` is not a {expected}")]
  TypeMismatch { item: ItemId, expected: &'static str },
}

/// A value produced by a step, ready to be written to the item store.
#[derive(Debug)]
pub(crate) struct Output {
  pub item: ItemId,
  pub payload: Payload,
  /// Emission order within the producing step.
  pub seq: usize,
}

/// Handed to a step action: reads declared inputs and collects outputs.
pub struct StepContext {
  step: Arc<str>,
  inputs: HashMap<ItemId, ItemValue>,
  produces: HashMap<ItemId, ItemKind>,
  outputs: Vec<Output>,
  produced_singles: HashSet<ItemId>,
}

impl StepContext {
  pub(crate) fn new(step: &StepDescriptor, inputs: HashMap<ItemId, ItemValue>) -> Self {
    Self {
      step: step.shared_name(),
      inputs,
      produces: step
        .produces()
        .iter()
        .map(|p| (p.item.clone(), p.item.kind()))
        .collect(),
      outputs: Vec::new(),
      produced_singles: HashSet::new(),
    }
  }

  pub fn step_name(&self) -> &str {
    &self.step
  }

  /// Read a consumed single item, failing if it is absent.
  pub fn consume<T: SimpleBuildItem>(&self) -> Result<&T, StepError> {
    let id = ItemId::of::<T>();
    self.consume_optional::<T>()?.ok_or(StepError::Absent {
      step: self.step.clone(),
      item: id,
    })
  }

  /// Read a consumed single item if some step produced it.
  pub fn consume_optional<T: SimpleBuildItem>(&self) -> Result<Option<&T>, StepError> {
    let id = ItemId::of::<T>();
    match self.single_payload(&id)? {
      Some(payload) => downcast::<T>(&id, payload).map(Some),
      None => Ok(None),
    }
  }

  /// Read every element of a consumed multi item, in producer registration order.
  pub fn consume_multi<T: MultiBuildItem>(&self) -> Result<Vec<&T>, StepError> {
    let id = ItemId::of::<T>();
    self
      .multi_payloads(&id)?
      .iter()
      .map(|payload| downcast::<T>(&id, payload))
      .collect()
  }

  /// Whether a consumed empty item has been produced.
  pub fn is_present<T: EmptyBuildItem>(&self) -> Result<bool, StepError> {
    self.marker(&ItemId::of::<T>())
  }

  /// Produce a single item. Each step may produce a given single item once.
  pub fn produce<T: SimpleBuildItem>(&mut self, value: T) -> Result<(), StepError> {
    self.produce_payload(ItemId::of::<T>(), Arc::new(value))
  }

  /// Contribute one element to a multi item.
  pub fn produce_multi<T: MultiBuildItem>(&mut self, value: T) -> Result<(), StepError> {
    self.produce_payload(ItemId::of::<T>(), Arc::new(value))
  }

  /// Read a consumed named single item.
  pub fn consume_value(&self, item: &ItemId) -> Result<Option<&Value>, StepError> {
    match self.single_payload(item)? {
      Some(payload) => downcast::<Value>(item, payload).map(Some),
      None => Ok(None),
    }
  }

  /// Read every element of a consumed named multi item.
  pub fn consume_values(&self, item: &ItemId) -> Result<Vec<&Value>, StepError> {
    self
      .multi_payloads(item)?
      .iter()
      .map(|payload| downcast::<Value>(item, payload))
      .collect()
  }

  /// Whether a consumed named empty item has been produced.
  pub fn is_present_named(&self, item: &ItemId) -> Result<bool, StepError> {
    self.marker(item)
  }

  /// Produce a named single item, or contribute one element to a named multi item.
  pub fn produce_value(&mut self, item: &ItemId, value: Value) -> Result<(), StepError> {
    self.produce_payload(item.clone(), Arc::new(value))
  }

  pub(crate) fn into_outputs(self) -> Vec<Output> {
    self.outputs
  }

  fn input(&self, item: &ItemId, access: &'static str) -> Result<&ItemValue, StepError> {
    self.inputs.get(item).ok_or_else(|| StepError::Undeclared {
      step: self.step.clone(),
      item: item.clone(),
      access,
    })
  }

  fn single_payload(&self, item: &ItemId) -> Result<Option<&Payload>, StepError> {
    match self.input(item, "consumed")? {
      ItemValue::Single(payload) => Ok(payload.as_ref()),
      other => Err(kind_mismatch(item, ItemKind::Single, other)),
    }
  }

  fn multi_payloads(&self, item: &ItemId) -> Result<&[Payload], StepError> {
    match self.input(item, "consumed")? {
      ItemValue::Multi(payloads) => Ok(payloads),
      other => Err(kind_mismatch(item, ItemKind::Multi, other)),
    }
  }

  fn marker(&self, item: &ItemId) -> Result<bool, StepError> {
    match self.input(item, "consumed")? {
      ItemValue::Empty(present) => Ok(*present),
      other => Err(kind_mismatch(item, ItemKind::Empty, other)),
    }
  }

  fn produce_payload(&mut self, item: ItemId, payload: Payload) -> Result<(), StepError> {
    let Some(&kind) = self.produces.get(&item) else {
      return Err(StepError::Undeclared {
        step: self.step.clone(),
        item,
        access: "produced",
      });
    };

    match kind {
      ItemKind::Single => {
        if !self.produced_singles.insert(item.clone()) {
          return Err(StepError::AlreadyProduced {
            step: self.step.clone(),
            item,
          });
        }
      }
      ItemKind::Multi => {}
      ItemKind::Empty => {
        return Err(StepError::KindMismatch {
          item,
          expected: ItemKind::Single,
          actual: ItemKind::Empty,
        });
      }
    }

    let seq = self.outputs.len();
    self.outputs.push(Output { item, payload, seq });
    Ok(())
  }
}

fn kind_mismatch(item: &ItemId, expected: ItemKind, value: &ItemValue) -> StepError {
  StepError::KindMismatch {
    item: item.clone(),
    expected,
    actual: value.kind(),
  }
}

fn downcast<'a, T: 'static>(item: &ItemId, payload: &'a Payload) -> Result<&'a T, StepError> {
  (**payload).downcast_ref::<T>().ok_or_else(|| StepError::TypeMismatch {
    item: item.clone(),
    expected: std::any::type_name::<T>(),
  })
}
