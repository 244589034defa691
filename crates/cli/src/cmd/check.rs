//! Implementation of the `buildchain check` command.
//!
//! Validates a plan without running it. Every graph problem is printed, not
//! just the first one.

use std::path::Path;

use anyhow::Result;

use super::load_chain;
use crate::output::{print_info, print_stat, print_success, symbols};

pub fn cmd_check(path: &Path, verbose: bool) -> Result<()> {
  let (_, chain) = load_chain(path)?;

  print_success(&format!("{} is a valid build chain", path.display()));
  print_stat("Steps", &chain.steps().len().to_string());
  print_stat("Pruned", &chain.pruned_steps().len().to_string());

  if verbose {
    println!();
    for step in chain.steps() {
      println!("  {} {}", symbols::INFO, step.name());
    }
    for name in chain.pruned_steps() {
      println!("  {} {} (pruned)", symbols::MINUS, name);
    }
  } else if !chain.pruned_steps().is_empty() {
    print_info(&format!("Not needed: {}", chain.pruned_steps().join(", ")));
  }

  Ok(())
}
