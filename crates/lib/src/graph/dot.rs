//! Graphviz rendering of the retained step graph.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;

use super::{EdgeKind, PrunedGraph};

impl PrunedGraph {
  /// Render the retained graph as a DOT digraph.
  ///
  /// Steps without predecessors share the first rank and steps without
  /// successors share the last. Parallel edges between two steps are merged
  /// into one edge labelled with every item; order-only edges are dashed.
  pub fn to_dot(&self) -> String {
    let mut out = String::new();
    out.push_str("digraph {\n");
    out.push_str("    node [shape=rectangle];\n");
    out.push_str("    rankdir=LR;\n\n");

    let starts: Vec<usize> = (0..self.steps.len())
      .filter(|&pos| self.steps[pos].predecessors == 0)
      .collect();
    let ends: Vec<usize> = (0..self.steps.len())
      .filter(|&pos| self.steps[pos].successors.is_empty() && !starts.contains(&pos))
      .collect();
    self.write_rank(&mut out, &starts);
    self.write_rank(&mut out, &ends);
    out.push('\n');

    let mut merged: BTreeMap<(usize, usize), (Vec<String>, bool)> = BTreeMap::new();
    for (from, to, label) in &self.edges {
      let entry = merged.entry((*from, *to)).or_insert_with(|| (Vec::new(), true));
      let name = label.item.to_string();
      if !entry.0.contains(&name) {
        entry.0.push(name);
      }
      entry.1 &= label.kind == EdgeKind::Order;
    }

    for ((from, to), (items, order_only)) in merged {
      out.push_str(&format!(
        "    {} -> {} [label={}",
        quote(self.steps[from].name()),
        quote(self.steps[to].name()),
        quote(&items.join(", "))
      ));
      if order_only {
        out.push_str(", style=dashed");
      }
      out.push_str("];\n");
    }

    out.push_str("}\n");
    out
  }

  /// Write [`Self::to_dot`] to a file.
  pub fn write_dot(&self, path: &Path) -> io::Result<()> {
    debug!(path = %path.display(), "writing build graph");
    fs::write(path, self.to_dot())
  }

  fn write_rank(&self, out: &mut String, positions: &[usize]) {
    out.push_str("    { rank = same; ");
    for &pos in positions {
      out.push_str(&quote(self.steps[pos].name()));
      out.push_str("; ");
    }
    out.push_str("};\n");
  }
}

fn quote(s: &str) -> String {
  let mut quoted = String::with_capacity(s.len() + 2);
  quoted.push('"');
  for c in s.chars() {
    match c {
      '"' => quoted.push_str("\\\""),
      '\\' => quoted.push_str("\\\\"),
      '\n' => quoted.push_str("\\n"),
      c => quoted.push(c),
    }
  }
  quoted.push('"');
  quoted
}
