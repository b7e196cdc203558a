/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! slabd – capacity-aware task scheduler
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── node        – RAM units, observed node state, capacity records
//! ├── heap/       – slab-bucketed capacity allocator
//! ├── host        – privileged host operations (trait)
//! ├── gate/       – serialised, time-bounded host calls
//! ├── discovery/  – network scan, port cracking, rooting
//! ├── formulas    – hack/grow/weaken timing and yield model
//! ├── workers/    – task registry, pending futures, dispatch
//! ├── control/    – planner, revenue ledger, autoscaler, main loop
//! ├── config/     – YAML scheduler configuration
//! └── sim/        – in-process simulated fleet (Host + TaskLauncher)
//! ```

pub mod config;
pub mod control;
pub mod discovery;
pub mod formulas;
pub mod gate;
pub mod heap;
pub mod host;
pub mod node;
pub mod sim;
pub mod workers;
