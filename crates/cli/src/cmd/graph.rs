//! Implementation of the `buildchain graph` command.

use std::path::Path;

use anyhow::Result;

use super::load_chain;
use crate::output::print_success;

pub fn cmd_graph(path: &Path, output: Option<&Path>) -> Result<()> {
  let (_, chain) = load_chain(path)?;

  match output {
    Some(file) => {
      chain.write_dot(file)?;
      print_success(&format!("Wrote step graph to {}", file.display()));
    }
    None => print!("{}", chain.to_dot()),
  }

  Ok(())
}
