/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! In-memory environment.
//!
//! [`SimFleet`] implements both [`Host`] and [`TaskLauncher`] over a
//! [`SimWorld`] description.  Launched tasks are tokio tasks that sleep for
//! the formula-derived duration (divided by `time_scale`), apply their effect
//! to the target and then complete their ticket.  Share tasks sleep until
//! killed.  Aborting a task (see [`Host::kill_all`]) drops the ticket, which
//! is the abnormal termination path of a real task process.
//!
//! The world file looks like:
//! ```yaml
//! money: 250000
//! price_per_gb: 55000
//! node_limit: 25
//! programs: [BruteSSH.exe]
//! actor: { hacking: 10 }
//! unlocks:
//!   - after_secs: 120
//!     program: FTPCrack.exe
//! nodes:
//!   home: { max_ram_gb: 32, has_root: true, cores: 2, links: [n00dles] }
//!   n00dles:
//!     max_ram_gb: 4
//!     required_skill: 1
//!     security: 1.0
//!     min_security: 1.0
//!     money: 70000
//!     max_money: 1750000
//!     growth: 3000
//! ```
//! Links are symmetric; listing a link on one side is enough.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Notify;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info};

use crate::discovery::Port;
use crate::formulas::{
    ActorStats, Formulas, StandardFormulas, GROW_FORTIFY, HACK_FORTIFY, WEAKEN_AMOUNT,
};
use crate::host::{Host, HostError};
use crate::node::{NodeState, Ram};
use crate::workers::{LaunchError, TaskKind, TaskLauncher, TaskTicket};

// ── World description ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SimNode {
    #[serde(flatten)]
    pub state: NodeState,
    #[serde(default)]
    pub links: Vec<String>,
    /// Programs present on the node.
    #[serde(default)]
    pub files: Vec<String>,
}

/// A cracking program that appears on home after some time.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Unlock {
    pub after_secs: f64,
    pub program: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimWorld {
    pub home: String,
    pub money: f64,
    pub price_per_gb: f64,
    pub node_limit: u32,
    pub programs: Vec<String>,
    pub actor: ActorStats,
    pub unlocks: Vec<Unlock>,
    pub nodes: BTreeMap<String, SimNode>,
}

impl Default for SimWorld {
    fn default() -> Self {
        Self {
            home: "home".to_string(),
            money: 0.0,
            price_per_gb: 55_000.0,
            node_limit: 25,
            programs: Vec::new(),
            actor: ActorStats::default(),
            unlocks: Vec::new(),
            nodes: BTreeMap::new(),
        }
    }
}

impl SimWorld {
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        let world: SimWorld = serde_yaml::from_str(content)?;
        Ok(world.normalised())
    }

    /// Small built-in world: home, a handful of targets at increasing depth
    /// and difficulty, and one scripted unlock.
    pub fn starter() -> Self {
        let mut world = SimWorld {
            money: 1_000_000.0,
            programs: vec![Port::Ssh.program().to_string()],
            actor: ActorStats {
                hacking: 10.0,
                ..Default::default()
            },
            unlocks: vec![Unlock {
                after_secs: 120.0,
                program: Port::Ftp.program().to_string(),
            }],
            ..Default::default()
        };

        #[rustfmt::skip]
        let mut add = |name: &str, ram: f64, skill: u32, ports: u32,
                       money: f64, sec: f64, growth: f64, links: &[&str]| {
            world.nodes.insert(
                name.to_string(),
                SimNode {
                    state: NodeState {
                        name: name.to_string(),
                        max_ram_gb: ram,
                        cores: 1,
                        required_ports: ports,
                        required_skill: skill,
                        security: sec,
                        min_security: (sec / 3.0).max(1.0),
                        base_security: sec,
                        money,
                        max_money: money * 25.0,
                        growth,
                        ..Default::default()
                    },
                    links: links.iter().map(|l| l.to_string()).collect(),
                    files: Vec::new(),
                },
            );
        };
        add("n00dles", 4.0, 1, 0, 70_000.0, 1.0, 3000.0, &["home", "nectar-net"]);
        add("foodnstuff", 16.0, 1, 0, 2_000_000.0, 10.0, 5.0, &["home"]);
        add("sigma-cosmetics", 16.0, 5, 0, 2_300_000.0, 10.0, 10.0, &["home", "zer0"]);
        add("nectar-net", 16.0, 20, 0, 2_750_000.0, 20.0, 25.0, &["n00dles"]);
        add("zer0", 32.0, 75, 1, 7_500_000.0, 25.0, 40.0, &["sigma-cosmetics"]);
        add("max-hardware", 32.0, 80, 1, 10_000_000.0, 15.0, 30.0, &["zer0"]);
        add("phantasy", 32.0, 100, 2, 24_000_000.0, 20.0, 35.0, &["nectar-net"]);
        add("hacknet-node-0", 16.0, 1, 0, 0.0, 1.0, 0.0, &["home"]);
        add("home", 32.0, 1, 0, 0.0, 1.0, 0.0, &[]);

        if let Some(home) = world.nodes.get_mut("home") {
            home.state.cores = 2;
            home.state.has_root = true;
        }
        world.normalised()
    }

    /// Fill in names from map keys and make links symmetric.
    fn normalised(mut self) -> Self {
        let mut reverse: Vec<(String, String)> = Vec::new();
        for (name, node) in self.nodes.iter_mut() {
            node.state.name = name.clone();
            for l in &node.links {
                reverse.push((l.clone(), name.clone()));
            }
        }
        for (to, from) in reverse {
            if let Some(node) = self.nodes.get_mut(&to) {
                if !node.links.contains(&from) {
                    node.links.push(from);
                }
            }
        }
        self
    }
}

// ── SimFleet ──────────────────────────────────────────────────────────────────

struct Running {
    node: String,
    ram: Ram,
    abort: AbortHandle,
}

struct FleetState {
    world: SimWorld,
    running: HashMap<u64, Running>,
}

fn lock(state: &Mutex<FleetState>) -> MutexGuard<'_, FleetState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Simulated fleet.  See the module docs.
pub struct SimFleet {
    state: Arc<Mutex<FleetState>>,
    unlocked: Arc<Notify>,
    time_scale: f64,
    next_pid: AtomicU64,
}

impl SimFleet {
    pub fn new(world: SimWorld) -> Self {
        Self::with_time_scale(world, 1.0)
    }

    /// `time_scale > 1` makes every task finish proportionally sooner.
    pub fn with_time_scale(world: SimWorld, time_scale: f64) -> Self {
        let time_scale = if time_scale.is_finite() && time_scale > 0.0 {
            time_scale
        } else {
            1.0
        };
        Self {
            state: Arc::new(Mutex::new(FleetState {
                world,
                running: HashMap::new(),
            })),
            unlocked: Arc::new(Notify::new()),
            time_scale,
            next_pid: AtomicU64::new(1),
        }
    }

    /// Fires whenever a scripted unlock adds a program to home.
    pub fn unlock_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.unlocked)
    }

    /// Play the world's scripted unlocks in the background.
    pub fn spawn_unlocks(&self) -> JoinHandle<()> {
        let mut unlocks = lock(&self.state).world.unlocks.clone();
        unlocks.sort_by(|a, b| a.after_secs.total_cmp(&b.after_secs));
        let state = Arc::clone(&self.state);
        let notify = Arc::clone(&self.unlocked);
        let scale = self.time_scale;

        tokio::spawn(async move {
            let start = tokio::time::Instant::now();
            for u in unlocks {
                let at = Duration::from_secs_f64(u.after_secs.max(0.0) / scale);
                tokio::time::sleep_until(start + at).await;
                let added = {
                    let mut st = lock(&state);
                    if st.world.programs.contains(&u.program) {
                        false
                    } else {
                        st.world.programs.push(u.program.clone());
                        true
                    }
                };
                if added {
                    info!(program = %u.program, "capability unlocked");
                    notify.notify_one();
                }
            }
        })
    }

    /// Add `program` to home immediately and raise the unlock signal.
    pub fn unlock(&self, program: &str) {
        {
            let mut st = lock(&self.state);
            if !st.world.programs.iter().any(|p| p == program) {
                st.world.programs.push(program.to_string());
            }
        }
        self.unlocked.notify_one();
    }

    /// Tasks currently running, across all nodes.
    pub fn running(&self) -> usize {
        lock(&self.state).running.len()
    }

    /// Overwrite a node's observed used RAM (simulates a foreign process).
    pub fn set_used(&self, name: &str, used: Ram) -> Result<(), HostError> {
        let mut st = lock(&self.state);
        let node = node_mut(&mut st.world, name)?;
        node.state.used_ram_gb = used.as_gb();
        Ok(())
    }

    /// `None` for kinds that run until killed.
    fn task_duration(
        &self,
        kind: TaskKind,
        target: &NodeState,
        actor: &ActorStats,
    ) -> Option<Duration> {
        let f = StandardFormulas;
        let base = match kind {
            TaskKind::Hack => f.hack_time(target, actor),
            TaskKind::Grow => f.grow_time(target, actor),
            TaskKind::Weaken => f.weaken_time(target, actor),
            TaskKind::Share => return None,
        };
        Some(base.div_f64(self.time_scale))
    }
}

fn node_mut<'a>(world: &'a mut SimWorld, name: &str) -> Result<&'a mut SimNode, HostError> {
    world
        .nodes
        .get_mut(name)
        .ok_or_else(|| HostError::UnknownNode(name.to_string()))
}

fn refused(op: &'static str, node: &str, reason: impl Into<String>) -> HostError {
    HostError::Refused {
        op,
        node: node.to_string(),
        reason: reason.into(),
    }
}

// ── Host ──────────────────────────────────────────────────────────────────────

impl Host for SimFleet {
    fn node_state(&self, name: &str) -> Result<NodeState, HostError> {
        let st = lock(&self.state);
        st.world
            .nodes
            .get(name)
            .map(|n| n.state.clone())
            .ok_or_else(|| HostError::UnknownNode(name.to_string()))
    }

    fn neighbors(&self, name: &str) -> Result<Vec<String>, HostError> {
        let st = lock(&self.state);
        st.world
            .nodes
            .get(name)
            .map(|n| n.links.clone())
            .ok_or_else(|| HostError::UnknownNode(name.to_string()))
    }

    fn programs(&self) -> Vec<String> {
        lock(&self.state).world.programs.clone()
    }

    fn open_port(&self, name: &str, port: Port) -> Result<(), HostError> {
        let mut st = lock(&self.state);
        if !st.world.programs.iter().any(|p| p == port.program()) {
            return Err(refused("open_port", name, format!("{} is not available", port.program())));
        }
        node_mut(&mut st.world, name)?.state.open_ports.insert(port);
        Ok(())
    }

    fn nuke(&self, name: &str) -> Result<(), HostError> {
        let mut st = lock(&self.state);
        let node = node_mut(&mut st.world, name)?;
        let open = node.state.open_ports.len();
        if open < node.state.required_ports {
            return Err(refused(
                "nuke",
                name,
                format!("{open} of {} required ports open", node.state.required_ports),
            ));
        }
        node.state.has_root = true;
        Ok(())
    }

    fn provision(&self, name: &str, programs: &[&str]) -> Result<(), HostError> {
        let mut st = lock(&self.state);
        let node = node_mut(&mut st.world, name)?;
        if !node.state.has_root {
            return Err(HostError::NotRooted {
                node: name.to_string(),
            });
        }
        for p in programs {
            if !node.files.iter().any(|f| f == p) {
                node.files.push(p.to_string());
            }
        }
        Ok(())
    }

    fn kill_all(&self, name: &str) -> Result<(), HostError> {
        let victims: Vec<AbortHandle> = {
            let st = lock(&self.state);
            if !st.world.nodes.contains_key(name) {
                return Err(HostError::UnknownNode(name.to_string()));
            }
            st.running
                .values()
                .filter(|r| r.node == name)
                .map(|r| r.abort.clone())
                .collect()
        };
        debug!(node = %name, killed = victims.len(), "kill_all");
        for v in victims {
            v.abort();
        }
        Ok(())
    }

    fn actor(&self) -> ActorStats {
        lock(&self.state).world.actor.clone()
    }

    fn money(&self) -> f64 {
        lock(&self.state).world.money
    }

    fn purchased_node_limit(&self) -> u32 {
        lock(&self.state).world.node_limit
    }

    fn price_per_gb(&self) -> f64 {
        lock(&self.state).world.price_per_gb
    }

    fn purchase_node(&self, name: &str, ram: Ram) -> Result<bool, HostError> {
        let mut st = lock(&self.state);
        let w = &mut st.world;
        let owned = w.nodes.values().filter(|n| n.state.purchased).count() as u32;
        let cost = w.price_per_gb * ram.as_gb();
        if w.nodes.contains_key(name) || owned >= w.node_limit || cost > w.money {
            return Ok(false);
        }
        w.money -= cost;
        let home = w.home.clone();
        w.nodes.insert(
            name.to_string(),
            SimNode {
                state: NodeState {
                    name: name.to_string(),
                    max_ram_gb: ram.as_gb(),
                    cores: 1,
                    has_root: true,
                    purchased: true,
                    ..Default::default()
                },
                links: vec![home.clone()],
                files: Vec::new(),
            },
        );
        if let Some(h) = w.nodes.get_mut(&home) {
            h.links.push(name.to_string());
        }
        Ok(true)
    }

    fn upgrade_node(&self, name: &str, ram: Ram) -> Result<bool, HostError> {
        let mut st = lock(&self.state);
        let w = &mut st.world;
        let price = w.price_per_gb;
        let money = w.money;
        let node = node_mut(w, name)?;
        let current = node.state.max_ram();
        if !node.state.purchased || ram <= current {
            return Ok(false);
        }
        let cost = price * (ram.as_gb() - current.as_gb());
        if cost > money {
            return Ok(false);
        }
        node.state.max_ram_gb = ram.as_gb();
        w.money -= cost;
        Ok(true)
    }
}

// ── TaskLauncher ──────────────────────────────────────────────────────────────

/// Returns the task's RAM to its node when the task ends, however it ends.
struct RamGuard {
    state: Arc<Mutex<FleetState>>,
    pid: u64,
}

impl Drop for RamGuard {
    fn drop(&mut self) {
        let mut st = lock(&self.state);
        if let Some(r) = st.running.remove(&self.pid) {
            if let Some(node) = st.world.nodes.get_mut(&r.node) {
                let used = node.state.used_ram().saturating_sub(r.ram);
                node.state.used_ram_gb = used.as_gb();
            }
        }
    }
}

/// A launched task.  Fields drop in declaration order, so a killed task
/// settles its ticket (and frees its heap reservation) while the node still
/// shows the RAM in use.  The node is never observed emptier than the heap.
struct SimTask {
    ticket: TaskTicket,
    ram: RamGuard,
}

impl SimTask {
    async fn run(self, state: Arc<Mutex<FleetState>>, duration: Option<Duration>) {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
        let SimTask { ticket, ram } = self;
        let spec = ticket.spec();
        let value = apply_effect(&state, spec.kind, &spec.target, spec.threads);
        match value {
            Ok(v) => ticket.complete(v),
            Err(e) => ticket.fail(e.to_string()),
        }
        drop(ram);
    }
}

impl TaskLauncher for SimFleet {
    fn launch(&self, ticket: TaskTicket) -> Result<u64, LaunchError> {
        let spec = ticket.spec().clone();
        let mut st = lock(&self.state);
        let home = st.world.home.clone();

        let target = st
            .world
            .nodes
            .get(&spec.target)
            .map(|n| n.state.clone())
            .ok_or_else(|| LaunchError::UnknownNode(spec.target.clone()))?;
        let actor = st.world.actor.clone();

        let node = st
            .world
            .nodes
            .get_mut(&spec.node)
            .ok_or_else(|| LaunchError::UnknownNode(spec.node.clone()))?;
        if !node.state.has_root {
            return Err(LaunchError::NotRooted(spec.node.clone()));
        }
        let program = spec.kind.program();
        if spec.node != home && !node.files.iter().any(|f| f == program) {
            return Err(LaunchError::MissingProgram {
                node: spec.node.clone(),
                program: program.to_string(),
            });
        }
        let required = spec.kind.ram_per_thread().times(spec.threads);
        let available = node.state.max_ram().saturating_sub(node.state.used_ram());
        if required > available {
            return Err(LaunchError::InsufficientRam {
                node: spec.node.clone(),
                required,
                available,
            });
        }
        node.state.used_ram_gb = (node.state.used_ram() + required).as_gb();

        let duration = self.task_duration(spec.kind, &target, &actor);
        let pid = self.next_pid.fetch_add(1, Ordering::Relaxed);
        let state = Arc::clone(&self.state);
        // Built outside the task so that aborting it before its first poll
        // still returns the RAM.
        let task = SimTask {
            ticket,
            ram: RamGuard {
                state: Arc::clone(&state),
                pid,
            },
        };

        // Spawned while the fleet lock is held, so the task cannot finish
        // (and look itself up) before it is recorded.
        let handle = tokio::spawn(task.run(state, duration));
        st.running.insert(
            pid,
            Running {
                node: spec.node.clone(),
                ram: required,
                abort: handle.abort_handle(),
            },
        );
        Ok(pid)
    }
}

/// Apply a finished task to its target.  Returns the task's value.
fn apply_effect(
    state: &Mutex<FleetState>,
    kind: TaskKind,
    target: &str,
    threads: u32,
) -> Result<f64, HostError> {
    let mut st = lock(state);
    let actor = st.world.actor.clone();
    let t = f64::from(threads);
    let node = node_mut(&mut st.world, target)?;
    let s = &mut node.state;
    let f = StandardFormulas;

    let value = match kind {
        TaskKind::Hack => {
            let share = (f.hack_percent(s, &actor) * t * f.hack_chance(s, &actor)).min(1.0);
            let stolen = s.money * share;
            s.money -= stolen;
            s.security += HACK_FORTIFY * t;
            stolen
        }
        TaskKind::Grow => {
            let mult = f.grow_multiplier(s, threads, &actor);
            s.money = ((s.money + t) * mult).min(s.max_money);
            s.security += GROW_FORTIFY * t;
            mult
        }
        TaskKind::Weaken => {
            let before = s.security;
            s.security = (s.security - WEAKEN_AMOUNT * t).max(s.min_security);
            before - s.security
        }
        TaskKind::Share => 0.0,
    };
    if kind == TaskKind::Hack {
        st.world.money += value;
    }
    Ok(value)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
