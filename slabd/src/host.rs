/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The environment the scheduler runs against.
//!
//! [`Host`] collects every synchronous, privileged query and action the
//! control loop needs: node-state queries, graph scans, cracking, provisioning,
//! revenue observation and the purchase/upgrade primitive.  None of these are
//! called directly from async code; they run inside
//! [`CallGate::call`](crate::gate::CallGate::call), which isolates each call
//! on a blocking thread with a timeout.

use thiserror::Error;

use crate::discovery::Port;
use crate::formulas::ActorStats;
use crate::node::{NodeState, Ram};

/// Failures reported by the environment itself.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HostError {
    #[error("node '{0}' does not exist")]
    UnknownNode(String),

    #[error("operation on '{node}' requires root access")]
    NotRooted { node: String },

    #[error("host refused '{op}' on '{node}': {reason}")]
    Refused {
        op: &'static str,
        node: String,
        reason: String,
    },
}

/// Synchronous environment primitives.
///
/// Implementations must make [`node_state`](Host::node_state) and
/// [`neighbors`](Host::neighbors) side-effect free.
pub trait Host: Send + Sync + 'static {
    // ── Node-state query ──────────────────────────────────────────────────────

    fn node_state(&self, name: &str) -> Result<NodeState, HostError>;

    /// Nodes directly linked to `name`.
    fn neighbors(&self, name: &str) -> Result<Vec<String>, HostError>;

    // ── Access ────────────────────────────────────────────────────────────────

    /// File names of the programs installed on home.
    fn programs(&self) -> Vec<String>;

    fn open_port(&self, name: &str, port: Port) -> Result<(), HostError>;

    /// Grant root once enough ports are open.
    fn nuke(&self, name: &str) -> Result<(), HostError>;

    /// Copy task programs onto `name`.
    fn provision(&self, name: &str, programs: &[&str]) -> Result<(), HostError>;

    /// Kill every task running on `name`.
    fn kill_all(&self, name: &str) -> Result<(), HostError>;

    // ── Actor / revenue ───────────────────────────────────────────────────────

    fn actor(&self) -> ActorStats;

    /// Currently available funds.
    fn money(&self) -> f64;

    // ── Purchase / upgrade ────────────────────────────────────────────────────

    /// Ceiling on the number of purchased nodes.
    fn purchased_node_limit(&self) -> u32;

    /// Price of one GB of purchased RAM.
    fn price_per_gb(&self) -> f64;

    /// Buy a new node called `name` with `ram`.  `Ok(false)` if refused.
    fn purchase_node(&self, name: &str, ram: Ram) -> Result<bool, HostError>;

    /// Resize purchased node `name` to `ram`.  `Ok(false)` if refused.
    fn upgrade_node(&self, name: &str, ram: Ram) -> Result<bool, HostError>;
}
