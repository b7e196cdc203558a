/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Task kinds and per-task records.
//!
//! ```text
//! Workers::launch ──► TaskSpec (registry entry) ──► TaskTicket (launcher)
//!        │                                               │ complete / fail / drop
//!        └──────────► PendingTask ◄── TaskResult ────────┘
//! ```

use std::fmt;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::node::Ram;

// ── TaskKind ──────────────────────────────────────────────────────────────────

/// How a kind's capacity is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// One node, smallest fit.
    BestFit,
    /// One node, home first.
    PreferHome,
    /// Many nodes, all-or-nothing.
    Spread,
    /// Many nodes, emptiest first, whatever fits.
    LargestFirst,
}

/// The fixed set of computation types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskKind {
    Hack,
    Grow,
    Weaken,
    /// Lends RAM to a shared pool until killed.  Has no target effect.
    Share,
}

impl TaskKind {
    pub const ALL: [TaskKind; 4] = [
        TaskKind::Hack,
        TaskKind::Grow,
        TaskKind::Weaken,
        TaskKind::Share,
    ];

    /// RAM one thread of this kind occupies.
    pub fn ram_per_thread(self) -> Ram {
        match self {
            TaskKind::Hack => Ram::from_centi(170),
            TaskKind::Grow | TaskKind::Weaken => Ram::from_centi(175),
            TaskKind::Share => Ram::from_whole_gb(4),
        }
    }

    pub fn strategy(self) -> Strategy {
        match self {
            TaskKind::Hack => Strategy::BestFit,
            // Grow benefits from home's extra cores and low latency.
            TaskKind::Grow => Strategy::PreferHome,
            TaskKind::Weaken => Strategy::Spread,
            TaskKind::Share => Strategy::LargestFirst,
        }
    }

    /// Program that runs this kind on a node.
    pub fn program(self) -> &'static str {
        match self {
            TaskKind::Hack => "worker/hack",
            TaskKind::Grow => "worker/grow",
            TaskKind::Weaken => "worker/weaken",
            TaskKind::Share => "worker/share",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskKind::Hack => "hack",
            TaskKind::Grow => "grow",
            TaskKind::Weaken => "weaken",
            TaskKind::Share => "share",
        };
        f.write_str(s)
    }
}

// ── Identity ──────────────────────────────────────────────────────────────────

/// Opaque task identifier handed to the launcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// What the task runtime needs to know to run a task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSpec {
    pub id: TaskId,
    pub kind: TaskKind,
    pub target: String,
    /// Node the task runs on.
    pub node: String,
    pub threads: u32,
}

// ── Results ───────────────────────────────────────────────────────────────────

/// Successful completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskOutcome {
    /// Kind-specific effect: money taken (hack), multiplier (grow),
    /// security removed (weaken).
    pub value: f64,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TaskError {
    /// The task ran and reported a failure.
    #[error("task failed: {0}")]
    Failed(String),

    /// The task was torn down before it reported anything.
    #[error("task terminated without reporting")]
    Aborted,

    /// The settlement channel closed without a result.
    #[error("task result lost")]
    Lost,
}

pub type TaskResult = Result<TaskOutcome, TaskError>;

/// Everything known about a task once it has settled.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub spec: TaskSpec,
    pub reserved: Ram,
    pub started: Instant,
    pub expected: Duration,
    pub finished: Instant,
    pub result: TaskResult,
}

impl TaskReport {
    pub fn elapsed(&self) -> Duration {
        self.finished.saturating_duration_since(self.started)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_thread_costs() {
        assert_eq!(TaskKind::Hack.ram_per_thread(), Ram::from_gb(1.7));
        assert_eq!(TaskKind::Grow.ram_per_thread(), Ram::from_gb(1.75));
        assert_eq!(TaskKind::Weaken.ram_per_thread(), Ram::from_gb(1.75));
        assert_eq!(TaskKind::Share.ram_per_thread(), Ram::from_gb(4.0));
    }

    #[test]
    fn each_kind_has_its_own_strategy() {
        assert_eq!(TaskKind::Hack.strategy(), Strategy::BestFit);
        assert_eq!(TaskKind::Grow.strategy(), Strategy::PreferHome);
        assert_eq!(TaskKind::Weaken.strategy(), Strategy::Spread);
        assert_eq!(TaskKind::Share.strategy(), Strategy::LargestFirst);
    }

    #[test]
    fn programs_match_display_names() {
        for kind in TaskKind::ALL {
            assert_eq!(kind.program(), format!("worker/{kind}"));
        }
    }
}
