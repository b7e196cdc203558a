/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Timing and yield formulas.
//!
//! The scheduler consumes these as pure functions of (target state, actor
//! stats).  [`StandardFormulas`] implements the usual model: hack time is
//! driven by target difficulty versus actor skill, grow takes 3.2× and weaken
//! 4× as long, and per-thread effects are small fixed amounts of security.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::node::NodeState;

// ── Effect constants ──────────────────────────────────────────────────────────

/// Security removed by one weaken thread.
pub const WEAKEN_AMOUNT: f64 = 0.05;

/// Security added by one hack thread.
pub const HACK_FORTIFY: f64 = 0.002;

/// Security added by one grow thread.
pub const GROW_FORTIFY: f64 = 2.0 * HACK_FORTIFY;

const BASE_GROWTH_RATE: f64 = 1.03;
const MAX_GROWTH_RATE: f64 = 1.0035;

// ── ActorStats ────────────────────────────────────────────────────────────────

/// The acting player's skill and multipliers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorStats {
    pub hacking: f64,
    pub intelligence: f64,
    pub chance_mult: f64,
    pub money_mult: f64,
    pub speed_mult: f64,
    pub grow_mult: f64,
}

impl Default for ActorStats {
    fn default() -> Self {
        Self {
            hacking: 1.0,
            intelligence: 0.0,
            chance_mult: 1.0,
            money_mult: 1.0,
            speed_mult: 1.0,
            grow_mult: 1.0,
        }
    }
}

impl ActorStats {
    fn intelligence_bonus(&self) -> f64 {
        1.0 + self.intelligence.max(0.0).powf(0.8) / 600.0
    }
}

// ── Estimate ──────────────────────────────────────────────────────────────────

/// Everything the planner needs to know about one target, in one place.
#[derive(Debug, Clone, PartialEq)]
pub struct Estimate {
    pub hack_time: Duration,
    pub grow_time: Duration,
    pub weaken_time: Duration,
    /// Probability a hack thread succeeds.
    pub hack_chance: f64,
    /// Fraction of current money one successful hack thread takes.
    pub hack_percent: f64,
    /// Money multiplier from a single grow thread (>= 1.0).
    pub growth_per_thread: f64,
}

// ── Formulas ──────────────────────────────────────────────────────────────────

/// Pure timing/yield model.
pub trait Formulas: Send + Sync {
    fn hack_chance(&self, target: &NodeState, actor: &ActorStats) -> f64;

    fn hack_percent(&self, target: &NodeState, actor: &ActorStats) -> f64;

    /// Money multiplier after `threads` grow threads.
    fn grow_multiplier(&self, target: &NodeState, threads: u32, actor: &ActorStats) -> f64;

    fn hack_time(&self, target: &NodeState, actor: &ActorStats) -> Duration;

    fn grow_time(&self, target: &NodeState, actor: &ActorStats) -> Duration {
        self.hack_time(target, actor).mul_f64(3.2)
    }

    fn weaken_time(&self, target: &NodeState, actor: &ActorStats) -> Duration {
        self.hack_time(target, actor) * 4
    }

    fn estimate(&self, target: &NodeState, actor: &ActorStats) -> Estimate {
        Estimate {
            hack_time: self.hack_time(target, actor),
            grow_time: self.grow_time(target, actor),
            weaken_time: self.weaken_time(target, actor),
            hack_chance: self.hack_chance(target, actor),
            hack_percent: self.hack_percent(target, actor),
            growth_per_thread: self.grow_multiplier(target, 1, actor),
        }
    }
}

/// The standard model.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardFormulas;

/// Ceiling for "this target can never be hacked" times.
const MAX_TASK_TIME: Duration = Duration::from_secs(24 * 60 * 60);

impl Formulas for StandardFormulas {
    fn hack_chance(&self, target: &NodeState, actor: &ActorStats) -> f64 {
        if !target.has_root || target.security >= 100.0 || actor.hacking <= 0.0 {
            return 0.0;
        }
        let difficulty = (100.0 - target.security) / 100.0;
        let skill = 1.75 * actor.hacking;
        let skill_chance = (skill - f64::from(target.required_skill)) / skill;
        let chance = skill_chance * difficulty * actor.chance_mult * actor.intelligence_bonus();
        chance.clamp(0.0, 1.0)
    }

    fn hack_percent(&self, target: &NodeState, actor: &ActorStats) -> f64 {
        if target.security >= 100.0 || actor.hacking <= 0.0 {
            return 0.0;
        }
        let difficulty = (100.0 - target.security) / 100.0;
        let skill = (actor.hacking - (f64::from(target.required_skill) - 1.0)) / actor.hacking;
        (difficulty * skill * actor.money_mult / 240.0).clamp(0.0, 1.0)
    }

    fn grow_multiplier(&self, target: &NodeState, threads: u32, actor: &ActorStats) -> f64 {
        if target.growth <= 0.0 || target.security <= 0.0 {
            return 1.0;
        }
        let rate = (1.0 + (BASE_GROWTH_RATE - 1.0) / target.security).min(MAX_GROWTH_RATE);
        let cores = f64::from(target.cores.max(1));
        let core_bonus = 1.0 + (cores - 1.0) / 16.0;
        let cycles = f64::from(threads) * (target.growth / 100.0);
        rate.powf(cycles * actor.grow_mult * core_bonus)
    }

    fn hack_time(&self, target: &NodeState, actor: &ActorStats) -> Duration {
        if target.security <= 0.0 || target.required_skill == 0 {
            return MAX_TASK_TIME;
        }
        let difficulty = f64::from(target.required_skill) * target.security;
        let skill_factor = (2.5 * difficulty + 500.0) / (actor.hacking + 50.0);
        let secs = 5.0 * skill_factor / (actor.speed_mult * actor.intelligence_bonus());
        if !secs.is_finite() || secs <= 0.0 {
            return MAX_TASK_TIME;
        }
        Duration::from_secs_f64(secs).min(MAX_TASK_TIME)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
