mod check;
mod graph;
mod run;

pub use check::cmd_check;
pub use graph::cmd_graph;
pub use run::cmd_run;

use std::path::Path;

use anyhow::{Context, Result};

use buildchain_lib::BuildChain;
use buildchain_lib::plan::Plan;

use crate::output::print_error;

/// Load a plan and validate its chain, printing every graph error on failure.
fn load_chain(path: &Path) -> Result<(Plan, BuildChain)> {
  let plan = Plan::load(path).with_context(|| format!("Failed to load plan: {}", path.display()))?;

  match plan.build_chain() {
    Ok(chain) => Ok((plan, chain)),
    Err(err) => {
      for error in err.errors() {
        print_error(&error.to_string());
      }
      anyhow::bail!("{} has {} graph error(s)", path.display(), err.errors().len())
    }
  }
}
