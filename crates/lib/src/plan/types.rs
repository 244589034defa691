//! Plan file types.
//!
//! A plan describes a build chain in JSON, with items identified by name and
//! payloads expressed as JSON values.
//!
//! # Example
//!
//! ```json
//! {
//!   "steps": [
//!     { "name": "a", "produces": [{ "item": "count", "kind": "single", "value": 5 }] },
//!     {
//!       "name": "c",
//!       "consumes": [{ "item": "count" }],
//!       "produces": [{ "item": "report", "kind": "multi", "final": true, "values": ["done"] }],
//!       "delay_ms": 10
//!     }
//!   ],
//!   "initial": { "port": 8080 },
//!   "final": ["report"]
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::item::ItemKind;
use crate::step::ConsumeMode;

/// A whole plan file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Plan {
  pub steps: Vec<PlanStep>,

  /// Values of initial items, keyed by item name. Multi items take an array of elements.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub initial: BTreeMap<String, Value>,

  /// Items that are final for every producer.
  #[serde(default, rename = "final", skip_serializing_if = "Vec::is_empty")]
  pub finals: Vec<String>,
}

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanStep {
  pub name: String,

  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub produces: Vec<PlanProduce>,

  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub consumes: Vec<PlanConsume>,

  /// When set the step fails with this message instead of producing anything.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub fail: Option<String>,

  /// Milliseconds the step sleeps before doing anything else.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub delay_ms: Option<u64>,
}

/// A produced item of a plan step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanProduce {
  pub item: String,
  pub kind: ItemKind,

  #[serde(default, rename = "final")]
  pub is_final: bool,

  #[serde(default)]
  pub overridable: bool,

  /// Runs before consumers of the item without being kept alive by them.
  #[serde(default)]
  pub weak: bool,

  /// Value emitted for a single item.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub value: Option<Value>,

  /// Elements emitted for a multi item, in order.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub values: Vec<Value>,
}

/// A consumed item of a plan step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanConsume {
  pub item: String,

  #[serde(default = "default_mode")]
  pub mode: ConsumeMode,

  /// Kind of the item. Defaults to the kind its producers declare, or single.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub kind: Option<ItemKind>,
}

fn default_mode() -> ConsumeMode {
  ConsumeMode::Required
}
