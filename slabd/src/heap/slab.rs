/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Power-of-two slab indexing.
//!
//! Slab `k` holds every node whose free capacity `f` (in GB) lies in
//! `(2^(k-1), 2^k]`.  Slab 0 is the catch-all for `f <= 1`, including nodes
//! that are completely full.
//!
//! The index is `ceil(log2(f))`, computed as a bit-scan of `ceil(f)` instead
//! of a floating-point `log2`.  For integer `c = ceil(f) >= 2`,
//! `ceil(log2(c)) == 64 - (c - 1).leading_zeros()`, and because every slab
//! boundary is an integer, `ceil(log2(f)) == ceil(log2(ceil(f)))`.

use crate::node::Ram;

/// Highest valid slab.  `2^20` GB is the largest purchasable node.
pub const MAX_SLAB: usize = 20;

/// Number of slabs (`0..=MAX_SLAB`).
pub const SLAB_COUNT: usize = MAX_SLAB + 1;

/// Largest single request the heap will ever try to satisfy.
pub const MAX_ALLOCATION: Ram = Ram::from_whole_gb(1 << MAX_SLAB);

/// `ceil(log2(ceil(gb)))`, clamped to 0 for `gb <= 1`.
///
/// Unbounded: the caller decides whether a result above [`MAX_SLAB`] is a bug.
pub fn ceil_log2(gb: u64) -> usize {
    if gb <= 1 {
        0
    } else {
        (u64::BITS - (gb - 1).leading_zeros()) as usize
    }
}

/// Slab index for a free-capacity value.
///
/// Returns `None` when the value lands above [`MAX_SLAB`]; inside the heap
/// that is an invariant violation, never something to clamp.
pub fn slab_index(free: Ram) -> Option<usize> {
    let k = ceil_log2(free.ceil_gb());
    (k <= MAX_SLAB).then_some(k)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
