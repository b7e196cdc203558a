/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Cracking programs and port bookkeeping.
//!
//! A node can be rooted once the number of its open ports reaches
//! `required_ports`.  Each cracking program opens one kind of port; the set
//! of programs present on home decides what can be opened right now.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::host::{Host, HostError};
use crate::node::NodeState;

// ── Port ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Port {
    Ssh,
    Ftp,
    Smtp,
    Http,
    Sql,
}

impl Port {
    pub const ALL: [Port; 5] = [Port::Ssh, Port::Ftp, Port::Smtp, Port::Http, Port::Sql];

    /// File name of the program that opens this port.
    pub fn program(self) -> &'static str {
        match self {
            Port::Ssh => "BruteSSH.exe",
            Port::Ftp => "FTPCrack.exe",
            Port::Smtp => "relaySMTP.exe",
            Port::Http => "HTTPWorm.exe",
            Port::Sql => "SQLInject.exe",
        }
    }

    /// Inverse of [`program`](Self::program).  Unknown files map to `None`.
    pub fn from_program(file: &str) -> Option<Port> {
        Port::ALL.into_iter().find(|p| p.program() == file)
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Port::Ssh => "ssh",
            Port::Ftp => "ftp",
            Port::Smtp => "smtp",
            Port::Http => "http",
            Port::Sql => "sql",
        };
        f.write_str(s)
    }
}

// ── PortSet ───────────────────────────────────────────────────────────────────

/// Set of open ports, one bit per [`Port`].
///
/// Serialised as a plain list (`[ssh, ftp]`) so world files stay readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Port>", into = "Vec<Port>")]
pub struct PortSet(u8);

impl PortSet {
    pub fn contains(self, port: Port) -> bool {
        self.0 & port.bit() != 0
    }

    pub fn insert(&mut self, port: Port) {
        self.0 |= port.bit();
    }

    pub fn len(self) -> u32 {
        self.0.count_ones()
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl From<Vec<Port>> for PortSet {
    fn from(ports: Vec<Port>) -> Self {
        let mut set = PortSet::default();
        for p in ports {
            set.insert(p);
        }
        set
    }
}

impl From<PortSet> for Vec<Port> {
    fn from(set: PortSet) -> Self {
        Port::ALL.into_iter().filter(|p| set.contains(*p)).collect()
    }
}

// ── CrackerKit ────────────────────────────────────────────────────────────────

/// The cracking capabilities available right now.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrackerKit {
    openable: Vec<Port>,
}

impl CrackerKit {
    /// Build from the file names found on home.  Non-cracker files are ignored.
    pub fn from_programs<S: AsRef<str>>(files: &[S]) -> Self {
        let mut openable: Vec<Port> = files
            .iter()
            .filter_map(|f| Port::from_program(f.as_ref()))
            .collect();
        openable.sort_unstable();
        openable.dedup();
        Self { openable }
    }

    pub fn openable(&self) -> &[Port] {
        &self.openable
    }

    pub fn len(&self) -> usize {
        self.openable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.openable.is_empty()
    }

    /// Whether `state` could be rooted with this kit.
    ///
    /// Already-rooted nodes always qualify.
    pub fn can_root(&self, state: &NodeState) -> bool {
        if state.has_root {
            return true;
        }
        let closed_but_openable = self
            .openable
            .iter()
            .filter(|p| !state.open_ports.contains(**p))
            .count() as u32;
        closed_but_openable + state.open_ports.len() >= state.required_ports
    }

    /// Open every port we can on `state.name`, then nuke it.
    ///
    /// Idempotent: a node that already has root is left untouched and
    /// `Ok(false)` is returned.  Callers should check
    /// [`can_root`](Self::can_root) first; the host refuses the nuke otherwise.
    pub fn root<H: Host + ?Sized>(&self, host: &H, state: &NodeState) -> Result<bool, HostError> {
        if state.has_root {
            return Ok(false);
        }
        for port in &self.openable {
            if !state.open_ports.contains(*port) {
                debug!(node = %state.name, port = %port, "opening port");
                host.open_port(&state.name, *port)?;
            }
        }
        host.nuke(&state.name)?;
        info!(node = %state.name, "rooted");
        Ok(true)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
