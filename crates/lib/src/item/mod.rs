//! Build item identities and kinds.
//!
//! Every artifact that flows between build steps is identified by an [`ItemId`].
//! Typed items are plain Rust types implementing [`BuildItem`] and one of the
//! marker traits [`SimpleBuildItem`], [`MultiBuildItem`] or [`EmptyBuildItem`];
//! the `simple_build_item!`, `multi_build_item!` and `empty_build_item!` macros
//! implement both at once. Named items are identified by a string and carry
//! JSON payloads, which is how plan files describe graphs without Rust types.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// The cardinality of a build item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
  /// At most one producer, one value.
  Single,
  /// Any number of producers; elements are aggregated in producer registration order.
  Multi,
  /// No payload. Produced when a declaring step completes; used for ordering.
  Empty,
}

impl fmt::Display for ItemKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ItemKind::Single => write!(f, "single"),
      ItemKind::Multi => write!(f, "multi"),
      ItemKind::Empty => write!(f, "empty"),
    }
  }
}

/// A type-erased item payload as stored in the item store.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Base trait for typed build items.
///
/// Prefer the `*_build_item!` macros over implementing this by hand so the
/// kind and the marker trait always agree.
pub trait BuildItem: Any + Send + Sync + 'static {
  const KIND: ItemKind;
}

/// A build item with at most one producer.
pub trait SimpleBuildItem: BuildItem {}

/// A build item aggregated from any number of producers.
pub trait MultiBuildItem: BuildItem {}

/// A payload-free build item used to express "this happened".
pub trait EmptyBuildItem: BuildItem {}

/// Declares `$ty` as a [`SimpleBuildItem`].
#[macro_export]
macro_rules! simple_build_item {
  ($($ty:ty),+ $(,)?) => {
    $(
      impl $crate::item::BuildItem for $ty {
        const KIND: $crate::item::ItemKind = $crate::item::ItemKind::Single;
      }
      impl $crate::item::SimpleBuildItem for $ty {}
    )+
  };
}

/// Declares `$ty` as a [`MultiBuildItem`].
#[macro_export]
macro_rules! multi_build_item {
  ($($ty:ty),+ $(,)?) => {
    $(
      impl $crate::item::BuildItem for $ty {
        const KIND: $crate::item::ItemKind = $crate::item::ItemKind::Multi;
      }
      impl $crate::item::MultiBuildItem for $ty {}
    )+
  };
}

/// Declares `$ty` as an [`EmptyBuildItem`].
#[macro_export]
macro_rules! empty_build_item {
  ($($ty:ty),+ $(,)?) => {
    $(
      impl $crate::item::BuildItem for $ty {
        const KIND: $crate::item::ItemKind = $crate::item::ItemKind::Empty;
      }
      impl $crate::item::EmptyBuildItem for $ty {}
    )+
  };
}

#[derive(Debug, Clone)]
enum ItemKey {
  Type(TypeId),
  Named,
}

/// Stable identity of one kind of build item.
///
/// Equality and hashing use the Rust type for typed items and the name for
/// named items. The kind is carried along but never participates in identity.
#[derive(Clone)]
pub struct ItemId {
  key: ItemKey,
  name: Arc<str>,
  kind: ItemKind,
}

impl ItemId {
  /// The identity of the typed item `T`.
  pub fn of<T: BuildItem>() -> Self {
    Self {
      key: ItemKey::Type(TypeId::of::<T>()),
      name: Arc::from(short_type_name(std::any::type_name::<T>())),
      kind: T::KIND,
    }
  }

  /// A dynamically named item whose payload is a `serde_json::Value`.
  pub fn named(name: impl Into<Arc<str>>, kind: ItemKind) -> Self {
    Self {
      key: ItemKey::Named,
      name: name.into(),
      kind,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn kind(&self) -> ItemKind {
    self.kind
  }

  pub fn is_named(&self) -> bool {
    matches!(self.key, ItemKey::Named)
  }
}

impl PartialEq for ItemId {
  fn eq(&self, other: &Self) -> bool {
    match (&self.key, &other.key) {
      (ItemKey::Type(a), ItemKey::Type(b)) => a == b,
      (ItemKey::Named, ItemKey::Named) => self.name == other.name,
      _ => false,
    }
  }
}

impl Eq for ItemId {}

impl Hash for ItemId {
  fn hash<H: Hasher>(&self, state: &mut H) {
    match &self.key {
      ItemKey::Type(id) => {
        0u8.hash(state);
        id.hash(state);
      }
      ItemKey::Named => {
        1u8.hash(state);
        self.name.hash(state);
      }
    }
  }
}

impl fmt::Display for ItemId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.name)
  }
}

impl fmt::Debug for ItemId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}({})", self.name, self.kind)
  }
}

/// Strip module paths from a type name, keeping generic arguments readable.
///
/// `my_crate::items::Wrapper<alloc::string::String>` becomes `Wrapper<String>`.
fn short_type_name(full: &str) -> String {
  let mut out = String::with_capacity(full.len());
  let mut segment = String::new();
  for c in full.chars() {
    match c {
      '<' | '>' | ',' | ' ' | '(' | ')' | '[' | ']' | '&' | ';' => {
        out.push_str(last_path_segment(&segment));
        segment.clear();
        out.push(c);
      }
      _ => segment.push(c),
    }
  }
  out.push_str(last_path_segment(&segment));
  out
}

fn last_path_segment(path: &str) -> &str {
  path.rsplit("::").next().unwrap_or(path)
}
