//! # Trace tree reconstruction
//!
//! Rebuilds nested call trees from the flat START/END rows of one trace.
//!
//! Rows must be ordered by time. A START opens a node under whatever is open
//! on top of the stack. An END pops frames until one matches by signature or,
//! when the row carries a depth, by depth; frames popped on the way are left
//! unclosed. Input is never rejected: missing ENDs and interleaved rows still
//! produce a best-effort tree.

mod __test__;

use serde::{Deserialize, Serialize};

use crate::event::TracePosition;
use crate::utils::now_millis;

/// One persisted trace row as read back from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRow {
  pub trace_id: String,
  pub method_name: String,
  /// Epoch millis.
  pub dt: Option<i64>,
  pub app_name: String,
  pub server_ip: String,
  /// `None` for an unrecognized marker; anything but START closes a frame.
  pub position: Option<TracePosition>,
  pub depth: Option<u32>,
}

/// A reconstructed call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceNode {
  pub trace_id: String,
  pub signature: String,
  pub depth: u32,
  pub start_time: Option<i64>,
  pub end_time: Option<i64>,
  /// Milliseconds, never negative.
  pub duration: i64,
  pub app_name: String,
  pub server_ip: String,
  pub children: Vec<TraceNode>,
}

fn duration_between(start: Option<i64>, end: Option<i64>) -> i64 {
  match (start, end) {
    (Some(start), Some(end)) => (end - start).max(0),
    _ => 0,
  }
}

/// Arena entry; children refer to other entries by index.
struct Slot {
  node: TraceNode,
  closed: bool,
  children: Vec<usize>,
}

/// Build the call trees of one trace. Returns the roots ordered by start time.
pub fn build_trace_tree(rows: &[TraceRow]) -> Vec<TraceNode> {
  let mut arena: Vec<Slot> = Vec::with_capacity(rows.len() / 2 + 1);
  let mut roots: Vec<usize> = Vec::new();
  let mut stack: Vec<usize> = Vec::new();

  for row in rows {
    if row.position == Some(TracePosition::Start) {
      let depth = row
        .depth
        .or_else(|| stack.last().map(|&parent| arena[parent].node.depth + 1))
        .unwrap_or(0);
      let index = arena.len();
      arena.push(Slot {
        node: TraceNode {
          trace_id: row.trace_id.clone(),
          signature: row.method_name.clone(),
          depth,
          start_time: row.dt,
          end_time: None,
          duration: 0,
          app_name: row.app_name.clone(),
          server_ip: row.server_ip.clone(),
          children: Vec::new(),
        },
        closed: false,
        children: Vec::new(),
      });
      match stack.last() {
        Some(&parent) => arena[parent].children.push(index),
        None => roots.push(index),
      }
      stack.push(index);
    } else {
      while let Some(candidate) = stack.pop() {
        let node = &arena[candidate].node;
        let matched =
          node.signature == row.method_name || row.depth.is_some_and(|depth| node.depth == depth);
        if matched {
          let slot = &mut arena[candidate];
          slot.node.end_time = row.dt;
          slot.node.duration = duration_between(slot.node.start_time, row.dt);
          slot.closed = true;
          break;
        }
      }
    }
  }

  // Nodes never closed end where they started; a node without any start time
  // falls back to the latest time seen across the roots.
  let fallback_end = roots
    .iter()
    .filter_map(|&root| arena[root].node.end_time.or(arena[root].node.start_time))
    .max()
    .unwrap_or_else(now_millis);
  for slot in arena.iter_mut().filter(|slot| !slot.closed) {
    let end = slot.node.start_time.unwrap_or(fallback_end);
    slot.node.end_time = Some(end);
    slot.node.duration = duration_between(slot.node.start_time, Some(end));
    slot.closed = true;
  }

  let mut trees: Vec<TraceNode> = roots.iter().map(|&root| assemble(&mut arena, root)).collect();
  sort_by_start(&mut trees);
  trees
}

fn assemble(arena: &mut [Slot], index: usize) -> TraceNode {
  let child_indices = std::mem::take(&mut arena[index].children);
  let children: Vec<TraceNode> = child_indices
    .into_iter()
    .map(|child| assemble(arena, child))
    .collect();
  let mut node = std::mem::take(&mut arena[index].node);
  node.children = children;
  node
}

/// Ascending start time, missing times last. Stable, so ties keep arrival order.
fn sort_by_start(nodes: &mut [TraceNode]) {
  nodes.sort_by_key(|node| (node.start_time.is_none(), node.start_time));
  for node in nodes.iter_mut() {
    sort_by_start(&mut node.children);
  }
}
