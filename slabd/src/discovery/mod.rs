/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Node discovery: graph traversal and rooting.
//!
//! [`NodeGraph::scan`] walks the reachable node graph depth-first from a
//! root node, recording each node's parent and depth for diagnostics.
//! [`NodeGraph::root_all`] then applies the current [`CrackerKit`] to every
//! node that can be rooted.  Both run synchronously against a [`Host`] and
//! are meant to be executed inside one privileged call.
//!
//! The graph is rebuilt periodically; the control loop diffs each fresh scan
//! against the heap to find nodes that became reachable or rootable.

pub mod crack;

pub use crack::{CrackerKit, Port, PortSet};

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::host::{Host, HostError};
use crate::node::NodeState;

/// Task programs every scheduling node must carry.
pub const WORKER_PROGRAMS: [&str; 4] = [
    "worker/hack",
    "worker/grow",
    "worker/weaken",
    "worker/share",
];

// ── NodeEntry ─────────────────────────────────────────────────────────────────

/// One node as seen by the last scan.
#[derive(Debug, Clone)]
pub struct NodeEntry {
    pub state: NodeState,
    /// Node we reached this one from.  `None` for the scan root.
    pub parent: Option<String>,
    /// Hops from the scan root (root = 0).
    pub depth: u32,
}

// ── NodeGraph ─────────────────────────────────────────────────────────────────

/// Result of a traversal.  Sorted by name.
#[derive(Debug, Clone, Default)]
pub struct NodeGraph {
    entries: BTreeMap<String, NodeEntry>,
    /// Names in visit order, for tree printing.
    order: Vec<String>,
}

impl NodeGraph {
    /// Depth-first traversal from `root`.
    ///
    /// Links back to already-visited nodes are ignored, so cycles in the
    /// graph are harmless.
    pub fn scan<H: Host + ?Sized>(host: &H, root: &str) -> Result<Self, HostError> {
        let mut graph = NodeGraph::default();
        let mut stack: Vec<(String, Option<String>, u32)> = vec![(root.to_string(), None, 0)];

        while let Some((name, parent, depth)) = stack.pop() {
            if graph.entries.contains_key(&name) {
                continue;
            }
            let state = host.node_state(&name)?;
            let mut next = host.neighbors(&name)?;
            // Reverse so the first neighbour is visited first.
            next.reverse();
            for n in next {
                if !graph.entries.contains_key(&n) {
                    stack.push((n, Some(name.clone()), depth + 1));
                }
            }
            graph.order.push(name.clone());
            graph.entries.insert(
                name,
                NodeEntry {
                    state,
                    parent,
                    depth,
                },
            );
        }

        debug!(nodes = graph.entries.len(), root = %root, "scan complete");
        Ok(graph)
    }

    /// Root every node the kit can crack.  Returns the names newly rooted.
    ///
    /// Rooting is idempotent: nodes that already have root are skipped
    /// without any host call, so re-running this is free.
    pub fn root_all<H: Host + ?Sized>(
        &mut self,
        host: &H,
        kit: &CrackerKit,
    ) -> Result<Vec<String>, HostError> {
        let mut rooted = Vec::new();
        for (name, entry) in self.entries.iter_mut() {
            if entry.state.has_root || !kit.can_root(&entry.state) {
                continue;
            }
            if kit.root(host, &entry.state)? {
                entry.state = host.node_state(name)?;
                rooted.push(name.clone());
            }
        }
        if !rooted.is_empty() {
            info!(count = rooted.len(), nodes = ?rooted, "newly rooted nodes");
        }
        Ok(rooted)
    }

    pub fn get(&self, name: &str) -> Option<&NodeEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Entries sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &NodeEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Human-readable tree, one line per node, indented by depth.
    ///
    /// Purchased nodes are collapsed into a single trailing count line.
    pub fn tree_lines(&self, kit: &CrackerKit) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.order.len());
        let mut purchased = 0u32;
        for name in &self.order {
            let Some(entry) = self.entries.get(name) else {
                continue;
            };
            if entry.state.purchased {
                purchased += 1;
                continue;
            }
            let access = if entry.state.has_root {
                "root"
            } else if kit.can_root(&entry.state) {
                "rootable"
            } else {
                "locked"
            };
            lines.push(format!(
                "{}{}  ({}GB skill:{} {})",
                "  ".repeat(entry.depth as usize),
                name,
                entry.state.max_ram_gb,
                entry.state.required_skill,
                access,
            ));
        }
        if purchased > 0 {
            lines.push(format!("  purchased × {purchased}"));
        }
        lines
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
