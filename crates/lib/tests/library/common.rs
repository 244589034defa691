//! Items and helpers shared by the library tests.

use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use buildchain_lib::{ExecuteConfig, empty_build_item, multi_build_item, simple_build_item};

#[derive(Debug, Clone, PartialEq)]
pub struct Count(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub struct Doubled(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub struct Summary(pub String);

#[derive(Debug, Clone, PartialEq)]
pub struct Report(pub String);

#[derive(Debug)]
pub struct Marker;

simple_build_item!(Count, Doubled, Summary);
multi_build_item!(Report);
empty_build_item!(Marker);

pub fn config(parallelism: usize) -> ExecuteConfig {
  ExecuteConfig::default().with_parallelism(parallelism)
}

/// A pseudo-random delay of up to `max_ms` milliseconds, different for every `(run, step)`.
pub fn jitter(state: &RandomState, run: usize, step: usize, max_ms: u64) -> Duration {
  Duration::from_millis(state.hash_one((run, step)) % (max_ms + 1))
}

/// Records the order in which step actions start.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
  pub fn record(&self, name: &str) {
    self.0.lock().unwrap().push(name.to_string());
  }

  pub fn entries(&self) -> Vec<String> {
    self.0.lock().unwrap().clone()
  }

  pub fn position(&self, name: &str) -> Option<usize> {
    self.entries().iter().position(|n| n == name)
  }
}
