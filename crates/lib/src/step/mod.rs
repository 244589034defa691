//! Build step descriptors.
//!
//! A [`StepDescriptor`] is the immutable registration record of one build step:
//! what it produces, what it consumes, and the action that does the work.
//! Descriptors are usually assembled with [`StepDescriptor::builder`]:
//!
//! ```
//! use buildchain_lib::simple_build_item;
//! use buildchain_lib::step::StepDescriptor;
//!
//! struct Count(u32);
//! struct Doubled(u32);
//! simple_build_item!(Count, Doubled);
//!
//! let step = StepDescriptor::builder("double")
//!   .consumes::<Count>()
//!   .produces::<Doubled>()
//!   .build(|ctx| {
//!     let count = ctx.consume::<Count>()?;
//!     ctx.produce(Doubled(count.0 * 2))?;
//!     Ok(())
//!   });
//! assert_eq!(step.name(), "double");
//! ```

mod context;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::item::{BuildItem, ItemId};

pub use context::{StepContext, StepError};

/// How a step consumes an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumeMode {
  /// Ordering only; no value is supplied and no producer is kept alive.
  Weak,
  /// The value is supplied when present; a missing producer is not an error.
  Optional,
  /// The step needs the item; a missing producer fails validation.
  Required,
}

impl fmt::Display for ConsumeMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ConsumeMode::Weak => write!(f, "weak"),
      ConsumeMode::Optional => write!(f, "optional"),
      ConsumeMode::Required => write!(f, "required"),
    }
  }
}

/// One produced item of a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProduceDecl {
  pub item: ItemId,
  /// Terminal artifact of the build: keeps its producer alive and may not be re-derived downstream.
  pub is_final: bool,
  /// Only counts when no non-overridable producer of the same item exists.
  pub overridable: bool,
  /// Orders the step before consumers of the item but never keeps it alive.
  pub weak: bool,
}

impl ProduceDecl {
  pub fn new(item: ItemId) -> Self {
    Self {
      item,
      is_final: false,
      overridable: false,
      weak: false,
    }
  }
}

/// One consumed item of a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeDecl {
  pub item: ItemId,
  pub mode: ConsumeMode,
}

/// The work a step performs once its inputs are available.
pub type StepAction = Arc<dyn Fn(&mut StepContext) -> anyhow::Result<()> + Send + Sync>;

/// Immutable registration record of a build step.
#[derive(Clone)]
pub struct StepDescriptor {
  name: Arc<str>,
  produces: Vec<ProduceDecl>,
  consumes: Vec<ConsumeDecl>,
  action: StepAction,
}

impl StepDescriptor {
  /// Create a descriptor from raw declarations.
  ///
  /// Repeated declarations of the same item are merged: produce flags are
  /// combined and the strongest consume mode wins.
  pub fn new<F>(name: impl Into<Arc<str>>, produces: Vec<ProduceDecl>, consumes: Vec<ConsumeDecl>, action: F) -> Self
  where
    F: Fn(&mut StepContext) -> anyhow::Result<()> + Send + Sync + 'static,
  {
    Self {
      name: name.into(),
      produces: merge_produces(produces),
      consumes: merge_consumes(consumes),
      action: Arc::new(action),
    }
  }

  pub fn builder(name: impl Into<Arc<str>>) -> StepBuilder {
    StepBuilder {
      name: name.into(),
      produces: Vec::new(),
      consumes: Vec::new(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub(crate) fn shared_name(&self) -> Arc<str> {
    self.name.clone()
  }

  pub fn produces(&self) -> &[ProduceDecl] {
    &self.produces
  }

  pub fn consumes(&self) -> &[ConsumeDecl] {
    &self.consumes
  }

  pub fn produce_decl(&self, item: &ItemId) -> Option<&ProduceDecl> {
    self.produces.iter().find(|p| &p.item == item)
  }

  pub fn consume_decl(&self, item: &ItemId) -> Option<&ConsumeDecl> {
    self.consumes.iter().find(|c| &c.item == item)
  }

  pub(crate) fn action(&self) -> &StepAction {
    &self.action
  }
}

impl fmt::Debug for StepDescriptor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StepDescriptor")
      .field("name", &self.name)
      .field("produces", &self.produces)
      .field("consumes", &self.consumes)
      .finish_non_exhaustive()
  }
}

/// Builder for [`StepDescriptor`].
#[derive(Debug)]
pub struct StepBuilder {
  name: Arc<str>,
  produces: Vec<ProduceDecl>,
  consumes: Vec<ConsumeDecl>,
}

impl StepBuilder {
  pub fn produces<T: BuildItem>(self) -> Self {
    self.produces_item(ItemId::of::<T>(), false, false, false)
  }

  pub fn produces_final<T: BuildItem>(self) -> Self {
    self.produces_item(ItemId::of::<T>(), true, false, false)
  }

  pub fn produces_overridable<T: BuildItem>(self) -> Self {
    self.produces_item(ItemId::of::<T>(), false, true, false)
  }

  /// Produce `T` without being retained for it: the step only runs if
  /// something else keeps it, and then runs before the consumers of `T`.
  pub fn produces_weak<T: BuildItem>(self) -> Self {
    self.produces_item(ItemId::of::<T>(), false, false, true)
  }

  pub fn consumes<T: BuildItem>(self) -> Self {
    self.consumes_item(ItemId::of::<T>(), ConsumeMode::Required)
  }

  pub fn consumes_optional<T: BuildItem>(self) -> Self {
    self.consumes_item(ItemId::of::<T>(), ConsumeMode::Optional)
  }

  pub fn consumes_weak<T: BuildItem>(self) -> Self {
    self.consumes_item(ItemId::of::<T>(), ConsumeMode::Weak)
  }

  /// Declare a produced item by identity, typed or named.
  pub fn produces_item(mut self, item: ItemId, is_final: bool, overridable: bool, weak: bool) -> Self {
    self.produces.push(ProduceDecl {
      item,
      is_final,
      overridable,
      weak,
    });
    self
  }

  /// Declare a consumed item by identity, typed or named.
  pub fn consumes_item(mut self, item: ItemId, mode: ConsumeMode) -> Self {
    self.consumes.push(ConsumeDecl { item, mode });
    self
  }

  /// Finish the descriptor with its action.
  pub fn build<F>(self, action: F) -> StepDescriptor
  where
    F: Fn(&mut StepContext) -> anyhow::Result<()> + Send + Sync + 'static,
  {
    StepDescriptor::new(self.name, self.produces, self.consumes, action)
  }
}

fn merge_produces(decls: Vec<ProduceDecl>) -> Vec<ProduceDecl> {
  let mut merged: Vec<ProduceDecl> = Vec::with_capacity(decls.len());
  for decl in decls {
    match merged.iter_mut().find(|p| p.item == decl.item) {
      Some(existing) => {
        existing.is_final |= decl.is_final;
        existing.overridable &= decl.overridable;
        existing.weak &= decl.weak;
      }
      None => merged.push(decl),
    }
  }
  merged
}

fn merge_consumes(decls: Vec<ConsumeDecl>) -> Vec<ConsumeDecl> {
  let mut merged: Vec<ConsumeDecl> = Vec::with_capacity(decls.len());
  for decl in decls {
    match merged.iter_mut().find(|c| c.item == decl.item) {
      Some(existing) => existing.mode = existing.mode.max(decl.mode),
      None => merged.push(decl),
    }
  }
  merged
}
