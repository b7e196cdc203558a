//! Per-cycle thread counts.
//!
//! The planner is a pure function of the target's observed state, the
//! formula estimate, what is already in flight and how much capacity the
//! heap could possibly hand out.  It never reserves anything itself.

use crate::formulas::{Estimate, GROW_FORTIFY, HACK_FORTIFY, WEAKEN_AMOUNT};
use crate::node::{NodeState, Ram};
use crate::workers::{Strategy, TaskKind};

/// Threads already running against the target, per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InFlight {
    pub hack: u32,
    pub grow: u32,
    pub weaken: u32,
    pub share: u32,
}

impl InFlight {
    pub fn get(&self, kind: TaskKind) -> u32 {
        match kind {
            TaskKind::Hack => self.hack,
            TaskKind::Grow => self.grow,
            TaskKind::Weaken => self.weaken,
            TaskKind::Share => self.share,
        }
    }

    pub fn add(&mut self, kind: TaskKind, threads: u32) {
        let slot = self.slot(kind);
        *slot = slot.saturating_add(threads);
    }

    pub fn remove(&mut self, kind: TaskKind, threads: u32) {
        let slot = self.slot(kind);
        *slot = slot.saturating_sub(threads);
    }

    fn slot(&mut self, kind: TaskKind) -> &mut u32 {
        match kind {
            TaskKind::Hack => &mut self.hack,
            TaskKind::Grow => &mut self.grow,
            TaskKind::Weaken => &mut self.weaken,
            TaskKind::Share => &mut self.share,
        }
    }
}

/// What the heap could hold right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Headroom {
    /// Largest free block on one node (bounds single-node kinds).
    pub largest_free: Ram,
    /// Threads of the spread kind that fit, counted node by node.
    pub spread_threads: u32,
}

impl Headroom {
    fn max_threads(&self, kind: TaskKind) -> u32 {
        match kind.strategy() {
            Strategy::Spread => self.spread_threads,
            _ => self.largest_free.units_of(kind.ram_per_thread()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PlanParams {
    pub hack_fraction: f64,
    pub money_threshold: f64,
}

/// Threads to launch this cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CyclePlan {
    pub weaken: u32,
    pub grow: u32,
    pub hack: u32,
}

impl CyclePlan {
    pub fn threads(&self, kind: TaskKind) -> u32 {
        match kind {
            TaskKind::Hack => self.hack,
            TaskKind::Grow => self.grow,
            TaskKind::Weaken => self.weaken,
            // Reserved once at startup, never planned per cycle.
            TaskKind::Share => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.weaken == 0 && self.grow == 0 && self.hack == 0
    }

    /// Kinds in launch order: weaken first so it can offset what follows.
    pub fn kinds() -> [TaskKind; 3] {
        [TaskKind::Weaken, TaskKind::Grow, TaskKind::Hack]
    }
}

pub fn plan(
    target: &NodeState,
    estimate: &Estimate,
    in_flight: InFlight,
    headroom: Headroom,
    params: PlanParams,
) -> CyclePlan {
    let mut out = CyclePlan::default();

    // ── Weaken: bring security back to the floor ──────────────────────────────
    let margin = target.security_margin()
        + HACK_FORTIFY * f64::from(in_flight.hack)
        + GROW_FORTIFY * f64::from(in_flight.grow);
    let needed = (margin / WEAKEN_AMOUNT).ceil() as u32;
    out.weaken = needed
        .saturating_sub(in_flight.weaken)
        .min(headroom.max_threads(TaskKind::Weaken));

    // ── Grow or hack ──────────────────────────────────────────────────────────
    if target.money_fraction() < params.money_threshold {
        out.grow = grow_threads(target, estimate.growth_per_thread)
            .saturating_sub(in_flight.grow)
            .min(headroom.max_threads(TaskKind::Grow));
    } else if estimate.hack_percent > 0.0 && estimate.hack_chance > 0.0 {
        let wanted = (params.hack_fraction / estimate.hack_percent).floor();
        let wanted = if wanted.is_finite() { wanted.min(f64::from(u32::MAX)) as u32 } else { 0 };
        out.hack = wanted
            .saturating_sub(in_flight.hack)
            .min(headroom.max_threads(TaskKind::Hack));
    }

    out
}

/// Threads needed to take the target from its current money to its max.
fn grow_threads(target: &NodeState, per_thread: f64) -> u32 {
    if per_thread <= 1.0 || target.max_money <= 0.0 {
        return 0;
    }
    let current = target.money.max(1.0);
    let factor = target.max_money / current;
    if factor <= 1.0 {
        return 0;
    }
    let threads = (factor.ln() / per_thread.ln()).ceil();
    if threads.is_finite() {
        threads.min(f64::from(u32::MAX)) as u32
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn estimate(hack_percent: f64, growth: f64) -> Estimate {
        Estimate {
            hack_time: Duration::from_secs(10),
            grow_time: Duration::from_secs(32),
            weaken_time: Duration::from_secs(40),
            hack_chance: 0.9,
            hack_percent,
            growth_per_thread: growth,
        }
    }

    fn target(security: f64, money: f64) -> NodeState {
        NodeState {
            name: "t".into(),
            has_root: true,
            security,
            min_security: 1.0,
            money,
            max_money: 1000.0,
            ..Default::default()
        }
    }

    const PARAMS: PlanParams = PlanParams {
        hack_fraction: 0.5,
        money_threshold: 0.75,
    };

    fn roomy() -> Headroom {
        Headroom {
            largest_free: Ram::from_whole_gb(1024),
            spread_threads: 2048,
        }
    }

    #[test]
    fn weaken_covers_the_security_margin() {
        let p = plan(&target(2.0, 1000.0), &estimate(0.01, 1.1), InFlight::default(), roomy(), PARAMS);
        assert_eq!(p.weaken, 20);
    }

    #[test]
    fn in_flight_work_is_counted() {
        let inflight = InFlight {
            hack: 50,
            grow: 0,
            weaken: 5,
            ..Default::default()
        };
        // margin 1.0 + 50 × 0.002 = 1.1 → 22 threads, 5 already running.
        let p = plan(&target(2.0, 1000.0), &estimate(0.01, 1.1), inflight, roomy(), PARAMS);
        assert_eq!(p.weaken, 17);
        // 0.5 / 0.01 = 50 hack threads wanted, all in flight.
        assert_eq!(p.hack, 0);
    }

    #[test]
    fn poor_target_is_grown_not_hacked() {
        let p = plan(&target(1.0, 100.0), &estimate(0.01, 1.1), InFlight::default(), roomy(), PARAMS);
        assert_eq!(p.weaken, 0);
        assert_eq!(p.hack, 0);
        // ln(10) / ln(1.1) = 24.16
        assert_eq!(p.grow, 25);
    }

    #[test]
    fn rich_target_is_hacked() {
        let p = plan(&target(1.0, 800.0), &estimate(0.01, 1.1), InFlight::default(), roomy(), PARAMS);
        assert_eq!(p.grow, 0);
        assert_eq!(p.hack, 50);
    }

    #[test]
    fn counts_are_clamped_to_headroom() {
        let tight = Headroom {
            largest_free: Ram::from_whole_gb(8),
            spread_threads: 5,
        };
        let p = plan(&target(5.0, 800.0), &estimate(0.001, 1.1), InFlight::default(), tight, PARAMS);
        assert_eq!(p.weaken, 5);
        assert_eq!(p.hack, 4); // 8 / 1.70
    }

    #[test]
    fn weaken_is_clamped_to_what_fragmented_nodes_hold() {
        let mut heap = crate::heap::Heap::new(
            "home",
            crate::node::UsefulnessRule::default(),
            Ram::ZERO,
        );
        for name in ["a", "b", "c"] {
            heap.add_node(crate::node::CapacityNode::new(name, Ram::from_whole_gb(3), Ram::ZERO, true))
                .unwrap();
        }
        let unit = TaskKind::Weaken.ram_per_thread();
        let headroom = Headroom {
            largest_free: heap.largest_free(),
            spread_threads: heap.spread_capacity(unit),
        };

        // Margin 4.0 wants 80 threads; three 3 GB nodes hold one each.
        let p = plan(&target(5.0, 800.0), &estimate(0.01, 1.1), InFlight::default(), headroom, PARAMS);
        assert_eq!(p.weaken, 3);
        assert!(heap.allocate_spread(unit, p.weaken).unwrap().is_some());
    }

    #[test]
    fn unhackable_target_gets_no_hack_threads() {
        let p = plan(&target(1.0, 1000.0), &estimate(0.0, 1.1), InFlight::default(), roomy(), PARAMS);
        assert!(p.is_empty());
    }

    #[test]
    fn empty_target_still_grows() {
        assert!(grow_threads(&target(1.0, 0.0), 1.5) > 0);
        assert_eq!(grow_threads(&target(1.0, 1000.0), 1.5), 0);
        assert_eq!(grow_threads(&target(1.0, 10.0), 1.0), 0);
    }
}
