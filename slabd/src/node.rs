/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Core node data structures for the slabd scheduler.
//!
//! Two distinct types model the two sides of the capacity pipeline:
//!
//! ```text
//! host ──(node-state query)──►  NodeState  ──(discovery)──►  CapacityNode  ──►  Heap
//!                                ↑ observation                 ↑ bookkeeping
//!                                read-only, authoritative      mutated only by the Heap
//! ```
//!
//! # Capacity units
//! RAM is carried as [`Ram`], a fixed-point count of hundredths of a GB.
//! Per-thread costs (1.70 GB, 1.75 GB) are exact in this unit, so any
//! sequence of matching allocate/release calls returns the books to exactly
//! where they started.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

use crate::discovery::PortSet;

// ── Ram ───────────────────────────────────────────────────────────────────────

/// An amount of RAM in hundredths of a GB.
///
/// No `Sub` impl: subtraction goes through [`checked_sub`](Ram::checked_sub)
/// or [`saturating_sub`](Ram::saturating_sub).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Ram(u64);

impl Ram {
    pub const ZERO: Ram = Ram(0);

    /// Build from a raw count of hundredths of a GB.
    pub const fn from_centi(centi: u64) -> Self {
        Ram(centi)
    }

    /// Build from whole GB.
    pub const fn from_whole_gb(gb: u64) -> Self {
        Ram(gb * 100)
    }

    /// Build from a fractional GB value, rounded to the nearest hundredth.
    ///
    /// Negative, zero, and non-finite inputs all map to [`Ram::ZERO`].
    pub fn from_gb(gb: f64) -> Self {
        if !gb.is_finite() || gb <= 0.0 {
            return Ram::ZERO;
        }
        Ram((gb * 100.0).round() as u64)
    }

    pub fn centi(self) -> u64 {
        self.0
    }

    pub fn as_gb(self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// `ceil(self)` in whole GB. This is the input to the slab bit-scan.
    pub fn ceil_gb(self) -> u64 {
        self.0.div_ceil(100)
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_sub(self, rhs: Ram) -> Option<Ram> {
        self.0.checked_sub(rhs.0).map(Ram)
    }

    pub fn saturating_sub(self, rhs: Ram) -> Ram {
        Ram(self.0.saturating_sub(rhs.0))
    }

    /// `self × n`, used for "threads × per-thread cost".
    pub fn times(self, n: u32) -> Ram {
        Ram(self.0.saturating_mul(u64::from(n)))
    }

    /// How many whole `unit`s fit into `self`.  Zero for a zero unit.
    pub fn units_of(self, unit: Ram) -> u32 {
        if unit.0 == 0 {
            return 0;
        }
        u32::try_from(self.0 / unit.0).unwrap_or(u32::MAX)
    }
}

impl Add for Ram {
    type Output = Ram;

    fn add(self, rhs: Ram) -> Ram {
        Ram(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Ram {
    fn add_assign(&mut self, rhs: Ram) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Sum for Ram {
    fn sum<I: Iterator<Item = Ram>>(iter: I) -> Ram {
        iter.fold(Ram::ZERO, |a, b| a + b)
    }
}

impl fmt::Display for Ram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}GB", self.0 / 100, self.0 % 100)
    }
}

// ── NodeState (observation) ───────────────────────────────────────────────────

/// Everything the node-state query reports about one node.
///
/// This is the authoritative view: whenever bookkeeping in the
/// [`Heap`](crate::heap::Heap) disagrees with it, the observation wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeState {
    pub name: String,

    // ── Capacity ──────────────────────────────────────────────────────────────
    pub max_ram_gb: f64,
    pub used_ram_gb: f64,
    pub cores: u32,

    // ── Access ────────────────────────────────────────────────────────────────
    pub has_root: bool,
    /// Bought through the purchase primitive (counts toward the node ceiling).
    pub purchased: bool,
    pub required_ports: u32,
    pub open_ports: PortSet,
    pub required_skill: u32,

    // ── Target attributes ─────────────────────────────────────────────────────
    pub security: f64,
    pub min_security: f64,
    pub base_security: f64,
    pub money: f64,
    pub max_money: f64,
    /// Growth rating (percent-like, 0 means "cannot be grown").
    pub growth: f64,
}

impl NodeState {
    pub fn max_ram(&self) -> Ram {
        Ram::from_gb(self.max_ram_gb)
    }

    pub fn used_ram(&self) -> Ram {
        Ram::from_gb(self.used_ram_gb)
    }

    /// `money / max_money`, or `1.0` for a node that holds no money at all.
    pub fn money_fraction(&self) -> f64 {
        if self.max_money <= 0.0 {
            1.0
        } else {
            (self.money / self.max_money).clamp(0.0, 1.0)
        }
    }

    /// Security above the floor.  Never negative.
    pub fn security_margin(&self) -> f64 {
        (self.security - self.min_security).max(0.0)
    }
}

// ── Usefulness ────────────────────────────────────────────────────────────────

/// Rule deciding whether a node is worth scheduling on.
#[derive(Debug, Clone)]
pub struct UsefulnessRule {
    /// Nodes smaller than this cannot hold a single thread of any task kind.
    pub min_ram: Ram,
    /// Name prefixes of node categories that are never scheduled on.
    pub exclude_prefixes: Vec<String>,
}

impl Default for UsefulnessRule {
    fn default() -> Self {
        Self {
            min_ram: Ram::from_centi(175),
            exclude_prefixes: vec!["hacknet-node-".to_string()],
        }
    }
}

impl UsefulnessRule {
    pub fn is_excluded(&self, name: &str) -> bool {
        self.exclude_prefixes.iter().any(|p| name.starts_with(p.as_str()))
    }
}

// ── CapacityNode (bookkeeping) ────────────────────────────────────────────────

/// Where a node is filed inside the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Not in any slab (not useful, or not admitted yet).
    Unfiled,
    /// The designated fallback node, kept outside the slabs.
    Home,
    /// Filed in slab `k`: free capacity in `(2^(k-1), 2^k]` GB.
    Slab(usize),
}

/// One compute node's resource state as tracked by the scheduler.
///
/// Invariant: `used <= total`.  Only the [`Heap`](crate::heap::Heap) mutates
/// `used` and `total`; everybody else gets shared references.
#[derive(Debug, Clone)]
pub struct CapacityNode {
    pub name: String,
    pub(crate) total: Ram,
    pub(crate) used: Ram,
    pub has_root: bool,
    pub purchased: bool,
    pub(crate) slot: Slot,
}

impl CapacityNode {
    pub fn new(name: impl Into<String>, total: Ram, used: Ram, has_root: bool) -> Self {
        Self {
            name: name.into(),
            total,
            used: used.min(total),
            has_root,
            purchased: false,
            slot: Slot::Unfiled,
        }
    }

    pub fn from_state(state: &NodeState) -> Self {
        let mut node = Self::new(
            state.name.clone(),
            state.max_ram(),
            state.used_ram(),
            state.has_root,
        );
        node.purchased = state.purchased;
        node
    }

    pub fn total(&self) -> Ram {
        self.total
    }

    pub fn used(&self) -> Ram {
        self.used
    }

    /// `total - used`.
    pub fn free(&self) -> Ram {
        self.total.saturating_sub(self.used)
    }

    pub fn slot(&self) -> Slot {
        self.slot
    }

    /// Rooted, big enough for one thread, and not in an excluded category.
    pub fn is_useful(&self, rule: &UsefulnessRule) -> bool {
        self.has_root && self.total >= rule.min_ram && !rule.is_excluded(&self.name)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
