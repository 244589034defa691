//! The outcome of a successful build.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::item::{BuildItem, ItemId, ItemKind, MultiBuildItem, Payload, SimpleBuildItem};
use crate::store::{FrozenItems, ItemValue};

/// Timing of one executed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
  pub name: String,
  /// Registration index of the step.
  pub index: usize,
  /// Offset from the start of execution at which the action started.
  pub started: Duration,
  pub duration: Duration,
}

/// Frozen items plus the execution log of one build.
#[derive(Debug, Clone)]
pub struct BuildResult {
  items: FrozenItems,
  records: Vec<StepRecord>,
  pruned: Vec<String>,
  elapsed: Duration,
}

impl BuildResult {
  pub(crate) fn new(items: FrozenItems, records: Vec<StepRecord>, pruned: Vec<String>, elapsed: Duration) -> Self {
    Self {
      items,
      records,
      pruned,
      elapsed,
    }
  }

  /// The value of a single item, if it was produced.
  pub fn get<T: SimpleBuildItem>(&self) -> Option<&T> {
    match self.items.get(&ItemId::of::<T>()) {
      Some(ItemValue::Single(Some(payload))) => downcast(payload),
      _ => None,
    }
  }

  /// Every element of a multi item in producer registration order.
  pub fn get_all<T: MultiBuildItem>(&self) -> Vec<&T> {
    match self.items.get(&ItemId::of::<T>()) {
      Some(ItemValue::Multi(payloads)) => payloads.iter().filter_map(downcast).collect(),
      _ => Vec::new(),
    }
  }

  /// Whether any step produced `T`.
  pub fn contains<T: BuildItem>(&self) -> bool {
    self.is_present(&ItemId::of::<T>())
  }

  /// The JSON value of a named single item.
  pub fn value(&self, item: &ItemId) -> Option<&Value> {
    match self.items.get(item) {
      Some(ItemValue::Single(Some(payload))) => downcast(payload),
      _ => None,
    }
  }

  /// The JSON elements of a named multi item.
  pub fn values(&self, item: &ItemId) -> Vec<&Value> {
    match self.items.get(item) {
      Some(ItemValue::Multi(payloads)) => payloads.iter().filter_map(downcast).collect(),
      _ => Vec::new(),
    }
  }

  pub fn is_present(&self, item: &ItemId) -> bool {
    self.items.get(item).is_some_and(ItemValue::is_present)
  }

  pub fn items(&self) -> &FrozenItems {
    &self.items
  }

  /// Executed steps in completion order.
  pub fn step_records(&self) -> &[StepRecord] {
    &self.records
  }

  /// Names of executed steps in completion order.
  pub fn execution_log(&self) -> Vec<&str> {
    self.records.iter().map(|r| r.name.as_str()).collect()
  }

  pub fn step_record(&self, name: &str) -> Option<&StepRecord> {
    self.records.iter().find(|r| r.name == name)
  }

  /// Steps removed by pruning, in registration order.
  pub fn pruned_steps(&self) -> &[String] {
    &self.pruned
  }

  pub fn elapsed(&self) -> Duration {
    self.elapsed
  }

  pub fn report(&self) -> BuildReport {
    let mut items: Vec<ItemReport> = self
      .items
      .iter()
      .map(|(id, value)| ItemReport::new(id, value))
      .collect();
    items.sort_by(|a, b| a.name.cmp(&b.name));

    BuildReport {
      elapsed_us: micros(self.elapsed),
      steps: self
        .records
        .iter()
        .map(|r| StepReport {
          name: r.name.clone(),
          started_us: micros(r.started),
          duration_us: micros(r.duration),
        })
        .collect(),
      pruned: self.pruned.clone(),
      items,
    }
  }
}

fn downcast<T: 'static>(payload: &Payload) -> Option<&T> {
  (**payload).downcast_ref::<T>()
}

fn micros(duration: Duration) -> u64 {
  u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

/// Serializable summary of a build, used for text and JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
  pub elapsed_us: u64,
  pub steps: Vec<StepReport>,
  pub pruned: Vec<String>,
  pub items: Vec<ItemReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
  pub name: String,
  pub started_us: u64,
  pub duration_us: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
  pub name: String,
  pub kind: ItemKind,
  /// Values written: 0 or 1 for single and empty items, the element count for multi items.
  pub count: usize,
  /// JSON values of named items. Typed items are opaque and report none.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub values: Option<Vec<Value>>,
}

impl ItemReport {
  fn new(id: &ItemId, value: &ItemValue) -> Self {
    let (count, values) = match value {
      ItemValue::Single(payload) => (
        usize::from(payload.is_some()),
        payload.iter().filter_map(downcast::<Value>).cloned().collect::<Vec<_>>(),
      ),
      ItemValue::Multi(payloads) => (
        payloads.len(),
        payloads.iter().filter_map(downcast::<Value>).cloned().collect(),
      ),
      ItemValue::Empty(present) => (usize::from(*present), Vec::new()),
    };

    Self {
      name: id.name().to_string(),
      kind: id.kind(),
      count,
      values: (id.is_named() && id.kind() != ItemKind::Empty).then_some(values),
    }
  }
}

impl fmt::Display for BuildReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(
      f,
      "build finished in {:?} ({} step(s) run, {} pruned)",
      Duration::from_micros(self.elapsed_us),
      self.steps.len(),
      self.pruned.len()
    )?;

    if !self.steps.is_empty() {
      writeln!(f, "steps:")?;
      for step in &self.steps {
        writeln!(f, "  {} ({:?})", step.name, Duration::from_micros(step.duration_us))?;
      }
    }

    if !self.pruned.is_empty() {
      writeln!(f, "pruned: {}", self.pruned.join(", "))?;
    }

    if !self.items.is_empty() {
      writeln!(f, "items:")?;
      for item in &self.items {
        write!(f, "  {} [{}]", item.name, item.kind)?;
        match (&item.values, item.kind) {
          (Some(values), ItemKind::Single) if !values.is_empty() => write!(f, " = {}", values[0])?,
          (Some(values), ItemKind::Multi) => write!(f, " = {}", Value::Array(values.clone()))?,
          (_, ItemKind::Empty) => write!(f, " {}", if item.count > 0 { "present" } else { "absent" })?,
          _ => write!(f, " x{}", item.count)?,
        }
        writeln!(f)?;
      }
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::store::{ItemStore, Origin};
  use crate::util::testutil::{Count, Doubled, Finished, Report};

  fn sample() -> BuildResult {
    let routes = ItemId::named("routes", ItemKind::Multi);
    let ids = vec![
      ItemId::of::<Count>(),
      ItemId::of::<Doubled>(),
      ItemId::of::<Report>(),
      ItemId::of::<Finished>(),
      routes.clone(),
    ];
    let store = ItemStore::new(&ids);
    store.write_single(&ItemId::of::<Count>(), Arc::new(Count(5))).unwrap();
    store
      .append_multi(&ItemId::of::<Report>(), Arc::new(Report("done".into())), Origin::Step(2), 0)
      .unwrap();
    store
      .append_multi(&routes, Arc::new(serde_json::json!("/health")), Origin::Step(1), 0)
      .unwrap();

    BuildResult::new(
      store.freeze(),
      vec![
        StepRecord {
          name: "a".into(),
          index: 0,
          started: Duration::ZERO,
          duration: Duration::from_micros(150),
        },
        StepRecord {
          name: "c".into(),
          index: 2,
          started: Duration::from_micros(200),
          duration: Duration::from_micros(20),
        },
      ],
      vec!["unused".into()],
      Duration::from_millis(1),
    )
  }

  #[test]
  fn typed_queries() {
    let result = sample();

    assert_eq!(result.get::<Count>(), Some(&Count(5)));
    assert_eq!(result.get::<Doubled>(), None);
    assert_eq!(result.get_all::<Report>(), vec![&Report("done".into())]);
    assert!(result.contains::<Count>());
    assert!(!result.contains::<Doubled>());
    assert!(!result.contains::<Finished>());
  }

  #[test]
  fn named_queries() {
    let result = sample();
    let routes = ItemId::named("routes", ItemKind::Multi);

    assert_eq!(result.values(&routes), vec![&serde_json::json!("/health")]);
    assert!(result.value(&ItemId::named("missing", ItemKind::Single)).is_none());
  }

  #[test]
  fn execution_log_and_records() {
    let result = sample();

    assert_eq!(result.execution_log(), vec!["a", "c"]);
    assert_eq!(result.step_record("c").map(|r| r.index), Some(2));
    assert_eq!(result.pruned_steps(), &["unused".to_string()]);
    assert_eq!(result.elapsed(), Duration::from_millis(1));
  }

  #[test]
  fn report_serializes_named_values() {
    let report = sample().report();
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["elapsed_us"], 1000);
    assert_eq!(json["steps"][0]["name"], "a");
    assert_eq!(json["steps"][0]["duration_us"], 150);
    assert_eq!(json["pruned"][0], "unused");

    let routes = json["items"]
      .as_array()
      .unwrap()
      .iter()
      .find(|i| i["name"] == "routes")
      .unwrap();
    assert_eq!(routes["count"], 1);
    assert_eq!(routes["values"], serde_json::json!(["/health"]));

    let count = json["items"].as_array().unwrap().iter().find(|i| i["name"] == "Count").unwrap();
    assert!(count.get("values").is_none());
  }

  #[test]
  fn report_renders_text() {
    let text = sample().report().to_string();

    assert!(text.starts_with("build finished in 1ms (2 step(s) run, 1 pruned)"));
    assert!(text.contains("  a (150µs)"));
    assert!(text.contains("pruned: unused"));
    assert!(text.contains("  routes [multi] = [\"/health\"]"));
    assert!(text.contains("  Finished [empty] absent"));
    assert!(text.contains("  Count [single] x1"));
  }
}
