//! Slab-indexed capacity allocator.
//!
//! [`Heap`] partitions every useful node into power-of-two size classes by
//! free RAM (see [`slab`]) so that "give me N GB" never scans the whole
//! fleet: the search starts at the smallest slab that could fit the request
//! and stops at the first slab that yields a fit.
//!
//! Inside a slab the tightest fit wins; across slabs the first slab with a
//! fit wins.  Home is never filed in a slab and serves as the fallback.
//!
//! # Example
//! ```rust,ignore
//! let mut heap = Heap::new("home", UsefulnessRule::default(), Ram::ZERO);
//! heap.add_node(CapacityNode::new("n00dles", Ram::from_whole_gb(4), Ram::ZERO, true))?;
//! let node = heap.allocate(Ram::from_centi(340))?; // Some("n00dles")
//! ```

pub mod error;
pub mod slab;

pub use error::HeapError;

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::node::{CapacityNode, Ram, Slot, UsefulnessRule};

use slab::{slab_index, MAX_ALLOCATION, SLAB_COUNT};

// ── Placement ─────────────────────────────────────────────────────────────────

/// One node's part of a multi-node request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub node: String,
    /// Number of unit-sized copies placed on `node`.
    pub units: u32,
    /// RAM reserved on `node` (`units × unit size`).
    pub ram: Ram,
}

// ── Heap ──────────────────────────────────────────────────────────────────────

/// The capacity allocator.
#[derive(Debug)]
pub struct Heap {
    /// Every admitted node, by name.
    nodes: BTreeMap<String, CapacityNode>,

    /// `slabs[k]` = names of the nodes whose free RAM is in `(2^(k-1), 2^k]`.
    slabs: Vec<BTreeSet<String>>,

    /// Name of the fallback node.  It also runs the scheduler itself.
    home: String,

    /// Artificial used RAM kept on home for one-off programs.
    home_reserve: Ram,

    rule: UsefulnessRule,

    total_capacity: Ram,
    total_used: Ram,
}

impl Heap {
    pub fn new(home: impl Into<String>, rule: UsefulnessRule, home_reserve: Ram) -> Self {
        Self {
            nodes: BTreeMap::new(),
            slabs: vec![BTreeSet::new(); SLAB_COUNT],
            home: home.into(),
            home_reserve,
            rule,
            total_capacity: Ram::ZERO,
            total_used: Ram::ZERO,
        }
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    pub fn home(&self) -> &str {
        &self.home
    }

    pub fn rule(&self) -> &UsefulnessRule {
        &self.rule
    }

    pub fn node(&self, name: &str) -> Option<&CapacityNode> {
        self.nodes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// All admitted nodes, sorted by name.
    pub fn nodes(&self) -> impl Iterator<Item = &CapacityNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn total_capacity(&self) -> Ram {
        self.total_capacity
    }

    pub fn total_used(&self) -> Ram {
        self.total_used
    }

    pub fn total_free(&self) -> Ram {
        self.total_capacity.saturating_sub(self.total_used)
    }

    /// Largest free block on any single node, home included.
    pub fn largest_free(&self) -> Ram {
        let filed = self
            .slabs
            .iter()
            .rev()
            .find(|s| !s.is_empty())
            .into_iter()
            .flatten()
            .filter_map(|name| self.nodes.get(name))
            .map(CapacityNode::free)
            .max()
            .unwrap_or(Ram::ZERO);
        filed.max(self.home_free())
    }

    /// Whole `unit`-sized copies that fit across every node, home included.
    /// This is the most [`allocate_spread`](Self::allocate_spread) can
    /// place, which can be far less than `total_free / unit`.
    pub fn spread_capacity(&self, unit: Ram) -> u32 {
        if !allocatable(unit) {
            return 0;
        }
        let first = slab_index(unit).unwrap_or(SLAB_COUNT);
        let filed: u64 = self
            .slabs
            .iter()
            .skip(first)
            .flatten()
            .filter_map(|name| self.nodes.get(name))
            .map(|n| u64::from(n.free().units_of(unit)))
            .sum();
        let home = u64::from(self.home_free().units_of(unit));
        u32::try_from(filed + home).unwrap_or(u32::MAX)
    }

    /// Names filed in slab `k`, sorted.
    pub fn slab_members(&self, k: usize) -> impl Iterator<Item = &str> {
        self.slabs.get(k).into_iter().flatten().map(String::as_str)
    }

    fn home_free(&self) -> Ram {
        self.nodes
            .get(&self.home)
            .map(CapacityNode::free)
            .unwrap_or(Ram::ZERO)
    }

    // ── Admission ─────────────────────────────────────────────────────────────

    /// Admit a newly discovered node, or refresh one already known.
    ///
    /// Returns `Ok(true)` when the node is tracked after the call.  A node
    /// that is not useful (no root, too small, excluded category) is not
    /// tracked; if it was tracked before, it is evicted.
    pub fn add_node(&mut self, mut node: CapacityNode) -> Result<bool, HeapError> {
        let is_home = node.name == self.home;
        if !is_home && !node.is_useful(&self.rule) {
            self.evict(&node.name);
            return Ok(false);
        }

        self.evict(&node.name);

        if is_home {
            node.used = (node.used + self.home_reserve).min(node.total);
            node.slot = Slot::Home;
        } else {
            node.slot = Slot::Unfiled;
        }

        let name = node.name.clone();
        self.total_capacity += node.total;
        self.total_used += node.used;
        debug!(
            node  = %name,
            total = %node.total,
            used  = %node.used,
            "node admitted"
        );
        self.nodes.insert(name.clone(), node);
        self.refile(&name)?;
        Ok(true)
    }

    /// Resize a node (purchase upgrade) and refile it.
    pub fn update_capacity(&mut self, name: &str, new_total: Ram) -> Result<(), HeapError> {
        let node = self
            .nodes
            .get_mut(name)
            .ok_or_else(|| HeapError::UnknownNode(name.to_string()))?;

        let old_total = node.total;
        let old_used = node.used;
        node.total = new_total;
        node.used = node.used.min(new_total);

        self.total_capacity = self.total_capacity.saturating_sub(old_total) + new_total;
        self.total_used = self.total_used.saturating_sub(old_used) + node.used;

        debug!(node = %name, from = %old_total, to = %new_total, "node resized");
        self.refile(name)
    }

    fn evict(&mut self, name: &str) {
        if let Some(old) = self.nodes.remove(name) {
            if let Slot::Slab(k) = old.slot {
                self.slabs[k].remove(name);
            }
            self.total_capacity = self.total_capacity.saturating_sub(old.total);
            self.total_used = self.total_used.saturating_sub(old.used);
        }
    }

    // ── Allocation ────────────────────────────────────────────────────────────

    /// Reserve `amount` on the node with the smallest free RAM that still
    /// fits, searching slabs upward from the smallest that could hold it.
    /// Falls back to home.
    ///
    /// `Ok(None)` means "no capacity" (including zero or oversized requests).
    pub fn allocate(&mut self, amount: Ram) -> Result<Option<String>, HeapError> {
        if !allocatable(amount) {
            return Ok(None);
        }
        let chosen = match self.find_best_fit(amount) {
            Some(name) => name,
            None => match self.home_with_room(amount) {
                Some(home) => home,
                None => return Ok(None),
            },
        };
        self.charge(&chosen, amount)?;
        Ok(Some(chosen))
    }

    /// Like [`allocate`](Self::allocate) but tries home first.
    pub fn allocate_preferred(&mut self, amount: Ram) -> Result<Option<String>, HeapError> {
        if !allocatable(amount) {
            return Ok(None);
        }
        if let Some(home) = self.home_with_room(amount) {
            self.charge(&home, amount)?;
            return Ok(Some(home));
        }
        self.allocate(amount)
    }

    /// Place `units` copies of a `unit`-sized task, packing as many copies
    /// as fit into each node before moving to the next.
    ///
    /// All or nothing: the heap is only mutated when every unit found a
    /// home; otherwise `Ok(None)` with no change at all.
    pub fn allocate_spread(
        &mut self,
        unit: Ram,
        units: u32,
    ) -> Result<Option<Vec<Placement>>, HeapError> {
        if !allocatable(unit) || units == 0 {
            return Ok(None);
        }

        let mut remaining = units;
        let mut plan: Vec<Placement> = Vec::new();

        // Anything with free >= unit sits at or above slab_index(unit).
        let first = slab_index(unit).unwrap_or(SLAB_COUNT);
        'slabs: for members in self.slabs.iter().skip(first) {
            for name in members {
                if remaining == 0 {
                    break 'slabs;
                }
                let Some(node) = self.nodes.get(name) else {
                    continue;
                };
                let fit = node.free().units_of(unit).min(remaining);
                if fit == 0 {
                    continue;
                }
                plan.push(Placement {
                    node: name.clone(),
                    units: fit,
                    ram: unit.times(fit),
                });
                remaining -= fit;
            }
        }

        if remaining > 0 {
            let fit = self.home_free().units_of(unit).min(remaining);
            if fit > 0 {
                plan.push(Placement {
                    node: self.home.clone(),
                    units: fit,
                    ram: unit.times(fit),
                });
                remaining -= fit;
            }
        }

        if remaining > 0 {
            debug!(
                unit = %unit,
                units,
                short = remaining,
                "spread allocation not satisfiable"
            );
            return Ok(None);
        }

        for p in &plan {
            self.charge(&p.node, p.ram)?;
        }
        Ok(Some(plan))
    }

    /// Place up to `units` copies of a `unit`-sized task, emptiest nodes
    /// first and home last.  Partial placement is fine; the result may be
    /// empty.  Used for long-lived reservations that should stay out of the
    /// small nodes the short tasks fit best on.
    pub fn allocate_largest_first(
        &mut self,
        unit: Ram,
        units: u32,
    ) -> Result<Vec<Placement>, HeapError> {
        if !allocatable(unit) || units == 0 {
            return Ok(Vec::new());
        }

        let first = slab_index(unit).unwrap_or(SLAB_COUNT);
        let mut candidates: Vec<(Ram, String)> = self
            .slabs
            .iter()
            .skip(first)
            .flatten()
            .filter_map(|name| self.nodes.get(name).map(|n| (n.free(), name.clone())))
            .collect();
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        if self.contains(&self.home) {
            candidates.push((self.home_free(), self.home.clone()));
        }

        let mut remaining = units;
        let mut placed = Vec::new();
        for (free, name) in candidates {
            if remaining == 0 {
                break;
            }
            let fit = free.units_of(unit).min(remaining);
            if fit == 0 {
                continue;
            }
            let ram = unit.times(fit);
            self.charge(&name, ram)?;
            placed.push(Placement { node: name, units: fit, ram });
            remaining -= fit;
        }
        if remaining > 0 {
            debug!(unit = %unit, units, short = remaining, "largest-first allocation partly placed");
        }
        Ok(placed)
    }

    /// Return `amount` to `name`.
    ///
    /// Releasing on a node the heap no longer tracks, or releasing more than
    /// is in use, is logged and otherwise ignored.
    pub fn release(&mut self, name: &str, amount: Ram) -> Result<(), HeapError> {
        let Some(node) = self.nodes.get_mut(name) else {
            warn!(node = %name, amount = %amount, "release on untracked node ignored");
            return Ok(());
        };

        let before = node.used;
        node.used = match before.checked_sub(amount) {
            Some(u) => u,
            None => {
                warn!(
                    node     = %name,
                    used     = %before,
                    released = %amount,
                    "released more than was in use, clamping to zero"
                );
                Ram::ZERO
            }
        };
        self.total_used = self.total_used.saturating_sub(before) + node.used;
        self.refile(name)
    }

    /// Overwrite the tracked used RAM of `name` with an observed value.
    ///
    /// Returns the previously tracked value when the two disagreed, `None`
    /// when they already matched.
    pub fn resync(&mut self, name: &str, observed_used: Ram) -> Result<Option<Ram>, HeapError> {
        let is_home = name == self.home;
        let reserve = self.home_reserve;
        let node = self
            .nodes
            .get_mut(name)
            .ok_or_else(|| HeapError::UnknownNode(name.to_string()))?;

        let mut target = if is_home {
            observed_used + reserve
        } else {
            observed_used
        };
        target = target.min(node.total);

        if target == node.used {
            return Ok(None);
        }

        let before = node.used;
        node.used = target;
        self.total_used = self.total_used.saturating_sub(before) + target;
        self.refile(name)?;
        Ok(Some(before))
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    /// Best fit among the first slab that has any fit.
    fn find_best_fit(&self, amount: Ram) -> Option<String> {
        let start = slab_index(amount)?;

        for members in self.slabs.iter().skip(start) {
            let mut best: Option<(&String, Ram)> = None;
            for name in members {
                let Some(node) = self.nodes.get(name) else {
                    continue;
                };
                let free = node.free();
                if free >= amount && best.map_or(true, |(_, b)| free < b) {
                    best = Some((name, free));
                }
            }
            if let Some((name, _)) = best {
                return Some(name.clone());
            }
        }
        None
    }

    fn home_with_room(&self, amount: Ram) -> Option<String> {
        (!amount.is_zero() && self.contains(&self.home) && self.home_free() >= amount)
            .then(|| self.home.clone())
    }

    fn charge(&mut self, name: &str, amount: Ram) -> Result<(), HeapError> {
        let node = self
            .nodes
            .get_mut(name)
            .ok_or_else(|| HeapError::UnknownNode(name.to_string()))?;
        node.used += amount;
        self.total_used += amount;
        self.refile(name)
    }

    /// Move `name` into the slab matching its current free RAM.
    fn refile(&mut self, name: &str) -> Result<(), HeapError> {
        let node = self
            .nodes
            .get_mut(name)
            .ok_or_else(|| HeapError::UnknownNode(name.to_string()))?;

        if node.slot == Slot::Home {
            return Ok(());
        }

        let free = node.free();
        let k = slab_index(free).ok_or_else(|| HeapError::SlabOutOfRange {
            node: name.to_string(),
            free,
        })?;

        match node.slot {
            Slot::Slab(old) if old == k => return Ok(()),
            Slot::Slab(old) => {
                self.slabs[old].remove(name);
            }
            Slot::Unfiled | Slot::Home => {}
        }
        node.slot = Slot::Slab(k);
        self.slabs[k].insert(name.to_string());
        Ok(())
    }
}

/// Non-zero and no larger than the biggest purchasable node.
fn allocatable(amount: Ram) -> bool {
    !amount.is_zero() && amount <= MAX_ALLOCATION
}

// ── Tests ─────────────────────────────────────────────────────────────────────
