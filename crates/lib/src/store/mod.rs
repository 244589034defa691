//! The item store shared by running steps.
//!
//! Slots are created up front for every item of the retained graph, so the
//! map itself is never mutated during a build. Single slots are write-once
//! cells, multi slots collect contributions behind a mutex and empty slots are
//! flags. Once frozen the store rejects every write.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};

use thiserror::Error;
use tracing::trace;

use crate::item::{ItemId, ItemKind, Payload};

/// Where a multi contribution came from. Initial values sort before every step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Origin {
  Initial,
  /// Registration index of the producing step.
  Step(usize),
}

/// Errors raised by the item store. Every one of them is an engine bug or a
/// misuse of the store, never a step failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
  #[error("single item `{item}` was already written")]
  AlreadyWritten { item: ItemId },

  #[error("store is frozen; cannot write `{item}`")]
  Frozen { item: ItemId },

  #[error("item `{item}` has no slot in the store")]
  UnknownItem { item: ItemId },

  #[error("item `{item}` is stored as {actual}, not {expected}")]
  KindMismatch {
    item: ItemId,
    expected: ItemKind,
    actual: ItemKind,
  },
}

/// The value of one item as seen by a reader.
#[derive(Debug, Clone)]
pub enum ItemValue {
  Single(Option<Payload>),
  /// Elements in producer registration order, then emission order.
  Multi(Vec<Payload>),
  Empty(bool),
}

impl ItemValue {
  pub fn kind(&self) -> ItemKind {
    match self {
      ItemValue::Single(_) => ItemKind::Single,
      ItemValue::Multi(_) => ItemKind::Multi,
      ItemValue::Empty(_) => ItemKind::Empty,
    }
  }

  /// Whether a producer has written anything to the item.
  pub fn is_present(&self) -> bool {
    match self {
      ItemValue::Single(value) => value.is_some(),
      ItemValue::Multi(values) => !values.is_empty(),
      ItemValue::Empty(present) => *present,
    }
  }
}

#[derive(Debug)]
struct Contribution {
  origin: Origin,
  seq: usize,
  payload: Payload,
}

#[derive(Debug)]
enum Slot {
  Single(OnceLock<Payload>),
  Multi(Mutex<Vec<Contribution>>),
  Empty(AtomicBool),
}

impl Slot {
  fn kind(&self) -> ItemKind {
    match self {
      Slot::Single(_) => ItemKind::Single,
      Slot::Multi(_) => ItemKind::Multi,
      Slot::Empty(_) => ItemKind::Empty,
    }
  }

  fn read(&self) -> ItemValue {
    match self {
      Slot::Single(cell) => ItemValue::Single(cell.get().cloned()),
      Slot::Multi(contributions) => {
        let mut contributions: Vec<(Origin, usize, Payload)> = contributions
          .lock()
          .unwrap_or_else(|e| e.into_inner())
          .iter()
          .map(|c| (c.origin, c.seq, c.payload.clone()))
          .collect();
        contributions.sort_by_key(|(origin, seq, _)| (*origin, *seq));
        ItemValue::Multi(contributions.into_iter().map(|(_, _, payload)| payload).collect())
      }
      Slot::Empty(flag) => ItemValue::Empty(flag.load(Ordering::Acquire)),
    }
  }
}

/// Shared typed container written while a build runs.
#[derive(Debug)]
pub struct ItemStore {
  slots: HashMap<ItemId, Slot>,
  frozen: AtomicBool,
}

impl ItemStore {
  /// Create a store with one empty slot per item.
  pub fn new<'a>(items: impl IntoIterator<Item = &'a ItemId>) -> Self {
    let slots = items
      .into_iter()
      .map(|item| {
        let slot = match item.kind() {
          ItemKind::Single => Slot::Single(OnceLock::new()),
          ItemKind::Multi => Slot::Multi(Mutex::new(Vec::new())),
          ItemKind::Empty => Slot::Empty(AtomicBool::new(false)),
        };
        (item.clone(), slot)
      })
      .collect();

    Self {
      slots,
      frozen: AtomicBool::new(false),
    }
  }

  /// Write a single item. Only the first write can ever succeed.
  pub fn write_single(&self, item: &ItemId, payload: Payload) -> Result<(), StoreError> {
    let Slot::Single(cell) = self.writable_slot(item)? else {
      return Err(self.mismatch(item, ItemKind::Single));
    };
    cell
      .set(payload)
      .map_err(|_| StoreError::AlreadyWritten { item: item.clone() })?;
    trace!(item = %item, "wrote single item");
    Ok(())
  }

  /// Append one element to a multi item.
  pub fn append_multi(&self, item: &ItemId, payload: Payload, origin: Origin, seq: usize) -> Result<(), StoreError> {
    let Slot::Multi(contributions) = self.writable_slot(item)? else {
      return Err(self.mismatch(item, ItemKind::Multi));
    };
    contributions
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .push(Contribution { origin, seq, payload });
    trace!(item = %item, ?origin, seq, "appended multi item");
    Ok(())
  }

  /// Mark an empty item as produced. Marking twice is harmless.
  pub fn mark_present(&self, item: &ItemId) -> Result<(), StoreError> {
    let Slot::Empty(flag) = self.writable_slot(item)? else {
      return Err(self.mismatch(item, ItemKind::Empty));
    };
    flag.store(true, Ordering::Release);
    trace!(item = %item, "marked empty item");
    Ok(())
  }

  /// Read the current value of an item.
  pub fn read(&self, item: &ItemId) -> Result<ItemValue, StoreError> {
    self
      .slots
      .get(item)
      .map(Slot::read)
      .ok_or_else(|| StoreError::UnknownItem { item: item.clone() })
  }

  pub fn is_frozen(&self) -> bool {
    self.frozen.load(Ordering::Acquire)
  }

  /// Reject further writes and snapshot every slot.
  pub fn freeze(&self) -> FrozenItems {
    self.frozen.store(true, Ordering::Release);
    FrozenItems {
      items: self.slots.iter().map(|(id, slot)| (id.clone(), slot.read())).collect(),
    }
  }

  fn writable_slot(&self, item: &ItemId) -> Result<&Slot, StoreError> {
    if self.is_frozen() {
      return Err(StoreError::Frozen { item: item.clone() });
    }
    self
      .slots
      .get(item)
      .ok_or_else(|| StoreError::UnknownItem { item: item.clone() })
  }

  fn mismatch(&self, item: &ItemId, expected: ItemKind) -> StoreError {
    StoreError::KindMismatch {
      item: item.clone(),
      expected,
      actual: self.slots.get(item).map(Slot::kind).unwrap_or(expected),
    }
  }
}

/// Immutable snapshot of a finished store.
#[derive(Debug, Clone, Default)]
pub struct FrozenItems {
  items: HashMap<ItemId, ItemValue>,
}

impl FrozenItems {
  pub fn get(&self, item: &ItemId) -> Option<&ItemValue> {
    self.items.get(item)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&ItemId, &ItemValue)> {
    self.items.iter()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;
  use std::thread;

  use super::*;
  use crate::item::BuildItem;
  use crate::util::testutil::{Count, Finished, Report};

  fn store_for(ids: &[ItemId]) -> ItemStore {
    ItemStore::new(ids)
  }

  fn report_strings(value: ItemValue) -> Vec<String> {
    let values = match value {
      ItemValue::Multi(values) => values,
      other => panic!("expected multi value, got {:?}", other),
    };
    values
      .iter()
      .map(|p| (**p).downcast_ref::<Report>().unwrap().0.clone())
      .collect()
  }

  fn id<T: BuildItem>() -> ItemId {
    ItemId::of::<T>()
  }

  #[test]
  fn single_is_write_once() {
    let store = store_for(&[id::<Count>()]);

    store.write_single(&id::<Count>(), Arc::new(Count(5))).unwrap();
    assert_eq!(
      store.write_single(&id::<Count>(), Arc::new(Count(6))),
      Err(StoreError::AlreadyWritten { item: id::<Count>() })
    );

    let ItemValue::Single(Some(payload)) = store.read(&id::<Count>()).unwrap() else {
      panic!("count missing");
    };
    assert_eq!(payload.downcast_ref::<Count>(), Some(&Count(5)));
  }

  #[test]
  fn multi_reads_in_origin_order() {
    let store = store_for(&[id::<Report>()]);
    let report = |s: &str| -> Payload { Arc::new(Report(s.to_string())) };

    store.append_multi(&id::<Report>(), report("d"), Origin::Step(3), 0).unwrap();
    store.append_multi(&id::<Report>(), report("c2"), Origin::Step(2), 1).unwrap();
    store.append_multi(&id::<Report>(), report("c1"), Origin::Step(2), 0).unwrap();
    store.append_multi(&id::<Report>(), report("init"), Origin::Initial, 0).unwrap();

    assert_eq!(
      report_strings(store.read(&id::<Report>()).unwrap()),
      vec!["init", "c1", "c2", "d"]
    );
  }

  #[test]
  fn concurrent_multi_appends_are_all_kept() {
    let store = Arc::new(store_for(&[id::<Report>()]));

    let handles: Vec<_> = (0..8)
      .map(|step| {
        let store = store.clone();
        thread::spawn(move || {
          for seq in 0..10 {
            let payload: Payload = Arc::new(Report(format!("{step}-{seq}")));
            store.append_multi(&id::<Report>(), payload, Origin::Step(step), seq).unwrap();
          }
        })
      })
      .collect();
    for handle in handles {
      handle.join().unwrap();
    }

    let values = report_strings(store.read(&id::<Report>()).unwrap());
    assert_eq!(values.len(), 80);
    assert_eq!(values[0], "0-0");
    assert_eq!(values[79], "7-9");
  }

  #[test]
  fn empty_items_are_flags() {
    let store = store_for(&[id::<Finished>()]);
    assert!(!store.read(&id::<Finished>()).unwrap().is_present());

    store.mark_present(&id::<Finished>()).unwrap();
    store.mark_present(&id::<Finished>()).unwrap();
    assert!(store.read(&id::<Finished>()).unwrap().is_present());
  }

  #[test]
  fn frozen_store_rejects_writes() {
    let store = store_for(&[id::<Count>(), id::<Report>(), id::<Finished>()]);
    let frozen = store.freeze();
    assert_eq!(frozen.len(), 3);

    assert_eq!(
      store.write_single(&id::<Count>(), Arc::new(Count(1))),
      Err(StoreError::Frozen { item: id::<Count>() })
    );
    assert!(matches!(
      store.append_multi(&id::<Report>(), Arc::new(Report("late".into())), Origin::Step(0), 0),
      Err(StoreError::Frozen { .. })
    ));
    assert!(matches!(
      store.mark_present(&id::<Finished>()),
      Err(StoreError::Frozen { .. })
    ));
  }

  #[test]
  fn unknown_and_mismatched_items() {
    let store = store_for(&[id::<Report>()]);

    assert!(matches!(
      store.read(&id::<Count>()),
      Err(StoreError::UnknownItem { .. })
    ));
    assert_eq!(
      store.write_single(&id::<Report>(), Arc::new(Report("x".into()))),
      Err(StoreError::KindMismatch {
        item: id::<Report>(),
        expected: ItemKind::Single,
        actual: ItemKind::Multi,
      })
    );
  }
}
