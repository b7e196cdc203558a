/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The control loop.
//!
//! ```text
//! startup ─► ┌─► discover (when due) ─► plan + dispatch ─► wait ─► autoscale ─► status ─┐
//!            └────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Share workers, when configured, are started once right after the first
//! successful discovery and then left alone.
//!
//! `wait` returns on whichever comes first: a task completion, the poll
//! interval, a capability-unlock signal (which forces a rescan) or shutdown.
//!
//! Every host interaction goes through the [`CallGate`].  A failed or
//! timed-out call aborts only the step it happened in; the loop logs it and
//! carries on.  Anything else ([`ControlError::is_recoverable`] false) stops
//! the loop and is returned to the caller.

pub mod autoscale;
pub mod error;
pub mod ledger;
pub mod planner;

pub use autoscale::{AutoscalePolicy, Candidate, Market, Step};
pub use error::ControlError;
pub use ledger::RevenueLedger;
pub use planner::{CyclePlan, Headroom, InFlight, PlanParams};

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{Config, SchedulerConfig};
use crate::discovery::{CrackerKit, NodeGraph, WORKER_PROGRAMS};
use crate::formulas::{Estimate, Formulas, StandardFormulas};
use crate::gate::CallGate;
use crate::heap::Heap;
use crate::host::Host;
use crate::node::{CapacityNode, NodeState};
use crate::workers::{TaskKind, TaskLauncher, TaskReport, Workers};

/// Counters reported when the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub cycles: u64,
    pub launched: u64,
    pub completed: u64,
    pub failed: u64,
    pub purchases: u32,
    pub upgrades: u32,
    /// Share threads started at startup.
    pub shared: u32,
}

#[derive(Debug)]
enum Wake {
    Completed(Result<TaskReport, JoinError>),
    Tick,
    Unlock,
    Shutdown,
}

// ── ControlLoop ───────────────────────────────────────────────────────────────

pub struct ControlLoop<H: Host, L: TaskLauncher> {
    cfg: SchedulerConfig,
    policy: AutoscalePolicy,
    gate: CallGate<H>,
    workers: Workers<L>,
    formulas: StandardFormulas,

    tasks: JoinSet<TaskReport>,
    in_flight: InFlight,
    ledger: RevenueLedger,

    kit: CrackerKit,
    graph: NodeGraph,
    last_target: Option<NodeState>,

    unlocks: Arc<Notify>,
    shutdown: watch::Receiver<bool>,

    last_scan: Option<Instant>,
    rescan_now: bool,
    share_reserved: bool,
    last_status: Instant,
    stats: LoopStats,
}

impl<H: Host, L: TaskLauncher> ControlLoop<H, L> {
    pub fn new(
        config: &Config,
        host: Arc<H>,
        launcher: Arc<L>,
        unlocks: Arc<Notify>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let cfg = config.scheduler.clone();
        let heap = Heap::new(cfg.home.clone(), cfg.usefulness(), cfg.home_reserve);
        let now = Instant::now();
        Self {
            gate: CallGate::with_timeout(host, cfg.call_timeout),
            workers: Workers::new(heap, launcher),
            policy: AutoscalePolicy::new(config.autoscale.clone()),
            formulas: StandardFormulas,
            tasks: JoinSet::new(),
            in_flight: InFlight::default(),
            ledger: RevenueLedger::new(now.into_std()),
            kit: CrackerKit::default(),
            graph: NodeGraph::default(),
            last_target: None,
            unlocks,
            shutdown,
            last_scan: None,
            rescan_now: false,
            share_reserved: false,
            last_status: now,
            stats: LoopStats::default(),
            cfg,
        }
    }

    pub fn workers(&self) -> &Workers<L> {
        &self.workers
    }

    pub fn graph(&self) -> &NodeGraph {
        &self.graph
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    // ── Main loop ─────────────────────────────────────────────────────────────

    /// Run until shutdown or a fatal error.
    pub async fn run(mut self) -> Result<LoopStats, ControlError> {
        info!(
            target = %self.cfg.target,
            home   = %self.cfg.home,
            poll   = ?self.cfg.poll_interval,
            "control loop starting"
        );

        let r = self.startup().await;
        self.absorb("startup", r)?;

        loop {
            if *self.shutdown.borrow() {
                break;
            }
            self.stats.cycles += 1;

            if self.rescan_due() {
                let r = self.discover().await;
                self.absorb("discover", r)?;
            }
            if !self.share_reserved && self.last_scan.is_some() {
                let r = self.reserve_share();
                self.absorb("share", r)?;
            }

            let r = self.dispatch().await;
            self.absorb("dispatch", r)?;

            match self.wait().await {
                Wake::Shutdown => break,
                Wake::Completed(joined) => self.harvest(joined),
                Wake::Unlock => {
                    info!("capability unlocked, rescanning");
                    self.rescan_now = true;
                }
                Wake::Tick => {}
            }

            let r = self.autoscale().await;
            self.absorb("autoscale", r)?;

            if self.last_status.elapsed() >= self.cfg.status_interval {
                self.log_status();
            }
        }

        info!(stats = ?self.stats, in_flight = self.workers.in_flight(), "control loop stopped");
        Ok(self.stats)
    }

    /// Swallow recoverable errors (with a warning), pass fatal ones through.
    fn absorb<T>(&self, step: &'static str, r: Result<T, ControlError>) -> Result<Option<T>, ControlError> {
        match r {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.is_recoverable() => {
                warn!(step, error = %e, "step aborted, retrying next cycle");
                Ok(None)
            }
            Err(e) => {
                error!(step, error = %e, "fatal error in control loop");
                Err(e)
            }
        }
    }

    fn rescan_due(&self) -> bool {
        self.rescan_now
            || self
                .last_scan
                .map_or(true, |t| t.elapsed() >= self.cfg.rescan_interval)
    }

    async fn wait(&mut self) -> Wake {
        let poll = tokio::time::sleep(self.cfg.poll_interval);
        tokio::select! {
            biased;
            _ = self.shutdown.changed() => Wake::Shutdown,
            Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => Wake::Completed(joined),
            _ = self.unlocks.notified() => Wake::Unlock,
            _ = poll => Wake::Tick,
        }
    }

    // ── Startup ───────────────────────────────────────────────────────────────

    /// Kill whatever a previous run left on rooted non-home nodes.
    pub async fn startup(&mut self) -> Result<usize, ControlError> {
        let home = self.cfg.home.clone();
        let cleaned = self
            .gate
            .call(move |h| {
                let graph = NodeGraph::scan(h, &home)?;
                let mut n = 0;
                for (name, entry) in graph.iter() {
                    if *name != home && entry.state.has_root {
                        h.kill_all(name)?;
                        n += 1;
                    }
                }
                Ok(n)
            })
            .await?;
        info!(nodes = cleaned, "stale tasks cleared");
        Ok(cleaned)
    }

    // ── Discover ──────────────────────────────────────────────────────────────

    /// Scan, root, provision and seed/refresh the heap.  Returns the number
    /// of nodes admitted for the first time.
    pub async fn discover(&mut self) -> Result<usize, ControlError> {
        let home = self.cfg.home.clone();
        let known: BTreeSet<String> = self
            .workers
            .with_heap(|h| h.nodes().map(|n| n.name.clone()).collect());

        let (graph, kit) = {
            let known = known.clone();
            self.gate
                .call(move |h| {
                    let kit = CrackerKit::from_programs(&h.programs());
                    let mut graph = NodeGraph::scan(h, &home)?;
                    graph.root_all(h, &kit)?;
                    for (name, entry) in graph.iter() {
                        if *name != home && entry.state.has_root && !known.contains(name) {
                            h.provision(name, &WORKER_PROGRAMS)?;
                            debug!(node = %name, "worker programs provisioned");
                        }
                    }
                    Ok((graph, kit))
                })
                .await?
        };

        if kit != self.kit {
            info!(ports = ?kit.openable(), "cracking kit changed");
        }
        if self.last_scan.is_none() {
            for line in graph.tree_lines(&kit) {
                info!("{line}");
            }
        }

        let mut admitted = 0;
        for (name, entry) in graph.iter() {
            if known.contains(name) {
                let observed = entry.state.max_ram();
                let tracked = self.workers.with_heap(|h| h.node(name).map(CapacityNode::total));
                if tracked.is_some_and(|t| t != observed) {
                    self.workers.resize(name, observed)?;
                }
            } else if self.workers.admit(CapacityNode::from_state(&entry.state))? {
                admitted += 1;
            }
        }
        let corrected = self.workers.reconcile(
            graph
                .iter()
                .filter(|(name, _)| known.contains(*name))
                .map(|(name, entry)| (name.as_str(), entry.state.used_ram())),
        )?;

        let (nodes, capacity) = self.workers.with_heap(|h| (h.len(), h.total_capacity()));
        info!(
            reachable = graph.len(),
            admitted,
            corrected,
            nodes,
            capacity = %capacity,
            "discovery complete"
        );

        self.graph = graph;
        self.kit = kit;
        self.last_scan = Some(Instant::now());
        self.rescan_now = false;
        Ok(admitted)
    }

    // ── Share ─────────────────────────────────────────────────────────────────

    /// Start share workers for the configured RAM.  Only the first call
    /// does anything.  Returns the number of threads placed, which may be
    /// fewer than configured when the fleet is short.
    pub fn reserve_share(&mut self) -> Result<u32, ControlError> {
        if self.share_reserved {
            return Ok(0);
        }
        self.share_reserved = true;

        let wanted = self.cfg.share_ram.units_of(TaskKind::Share.ram_per_thread());
        if wanted == 0 {
            return Ok(0);
        }
        let home = self.cfg.home.clone();
        let Some(pending) = self.workers.launch(TaskKind::Share, &home, wanted, Duration::ZERO)? else {
            warn!(wanted, "no capacity for share workers");
            return Ok(0);
        };

        let mut placed = 0;
        for p in pending {
            placed += p.spec().threads;
            self.in_flight.add(TaskKind::Share, p.spec().threads);
            self.stats.launched += 1;
            self.tasks.spawn(p);
        }
        if placed < wanted {
            warn!(wanted, placed, "share workers only partly placed");
        }
        self.stats.shared = placed;
        info!(threads = placed, ram = %TaskKind::Share.ram_per_thread().times(placed), "share workers started");
        Ok(placed)
    }

    // ── Plan + dispatch ───────────────────────────────────────────────────────

    /// Decide thread counts for this cycle and launch what fits.
    pub async fn dispatch(&mut self) -> Result<CyclePlan, ControlError> {
        let target = self.cfg.target.clone();
        let (state, actor) = self
            .gate
            .call(move |h| Ok((h.node_state(&target)?, h.actor())))
            .await?;

        if !state.has_root {
            debug!(target = %state.name, "target not rooted yet");
            self.last_target = Some(state);
            return Ok(CyclePlan::default());
        }

        let estimate = self.formulas.estimate(&state, &actor);
        let headroom = self.workers.with_heap(|h| Headroom {
            largest_free: h.largest_free(),
            spread_threads: h.spread_capacity(TaskKind::Weaken.ram_per_thread()),
        });
        let params = PlanParams {
            hack_fraction: self.cfg.hack_fraction,
            money_threshold: self.cfg.money_threshold,
        };
        let plan = planner::plan(&state, &estimate, self.in_flight, headroom, params);
        self.last_target = Some(state);

        for kind in CyclePlan::kinds() {
            let threads = plan.threads(kind);
            if threads == 0 {
                continue;
            }
            let expected = expected_duration(&estimate, kind);
            match self.workers.launch(kind, &self.cfg.target, threads, expected)? {
                Some(pending) => {
                    for p in pending {
                        self.in_flight.add(kind, p.spec().threads);
                        self.stats.launched += 1;
                        self.tasks.spawn(p);
                    }
                }
                None => debug!(kind = %kind, threads, "skipped, no capacity this cycle"),
            }
        }
        Ok(plan)
    }

    fn harvest(&mut self, joined: Result<TaskReport, JoinError>) {
        let report = match joined {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "pending task lost");
                self.stats.failed += 1;
                return;
            }
        };
        self.in_flight.remove(report.spec.kind, report.spec.threads);

        match &report.result {
            Ok(outcome) => {
                self.stats.completed += 1;
                if report.spec.kind == TaskKind::Hack {
                    self.ledger.record(report.finished, outcome.value);
                }
                debug!(
                    task    = %report.spec.id,
                    kind    = %report.spec.kind,
                    node    = %report.spec.node,
                    value   = outcome.value,
                    elapsed = ?report.elapsed(),
                    "task completed"
                );
            }
            Err(e) => {
                self.stats.failed += 1;
                warn!(
                    task  = %report.spec.id,
                    kind  = %report.spec.kind,
                    node  = %report.spec.node,
                    error = %e,
                    "task did not complete"
                );
            }
        }
    }

    // ── Autoscale ─────────────────────────────────────────────────────────────

    /// Buy/upgrade greedily while funds allow.  Returns the number of steps
    /// taken.
    pub async fn autoscale(&mut self) -> Result<u32, ControlError> {
        if !self.policy.enabled() {
            return Ok(0);
        }
        let (mut money, market) = self
            .gate
            .call(|h| {
                Ok((
                    h.money(),
                    Market {
                        price_per_gb: h.price_per_gb(),
                        node_limit: h.purchased_node_limit(),
                    },
                ))
            })
            .await?;

        let mut steps = 0;
        loop {
            let owned: Vec<_> = self.workers.with_heap(|h| {
                h.nodes()
                    .filter(|n| n.purchased)
                    .map(|n| (n.name.clone(), n.total()))
                    .collect()
            });
            let Some(Candidate { step, cost }) = self.policy.next_step(money, &owned, &market) else {
                break;
            };

            match step {
                Step::Purchase { node, ram } => {
                    let name = node.clone();
                    let bought = self
                        .gate
                        .call(move |h| {
                            if !h.purchase_node(&name, ram)? {
                                return Ok(None);
                            }
                            h.provision(&name, &WORKER_PROGRAMS)?;
                            h.node_state(&name).map(Some)
                        })
                        .await?;
                    let Some(state) = bought else {
                        return Err(ControlError::Refused {
                            action: "purchase",
                            node,
                            cost,
                            funds: money,
                        });
                    };
                    self.workers.admit(CapacityNode::from_state(&state))?;
                    self.stats.purchases += 1;
                    info!(node = %node, ram = %ram, cost, "node purchased");
                }
                Step::Upgrade { node, from, to } => {
                    let name = node.clone();
                    let ok = self.gate.call(move |h| h.upgrade_node(&name, to)).await?;
                    if !ok {
                        return Err(ControlError::Refused {
                            action: "upgrade",
                            node,
                            cost,
                            funds: money,
                        });
                    }
                    self.workers.resize(&node, to)?;
                    self.stats.upgrades += 1;
                    info!(node = %node, from = %from, to = %to, cost, "node upgraded");
                }
            }
            money -= cost;
            steps += 1;
        }
        Ok(steps)
    }

    // ── Status ────────────────────────────────────────────────────────────────

    fn log_status(&mut self) {
        let now = Instant::now();
        self.last_status = now;
        let income = self.ledger.per_second(now.into_std());
        let (total, free) = self.workers.with_heap(|h| (h.total_capacity(), h.total_free()));
        let (money, max_money, security, min_security) = self
            .last_target
            .as_ref()
            .map_or((0.0, 0.0, 0.0, 0.0), |t| (t.money, t.max_money, t.security, t.min_security));

        info!(
            target       = %self.cfg.target,
            money        = format_args!("{money:.0}/{max_money:.0}"),
            security     = format_args!("{security:.2}/{min_security:.2}"),
            income       = format_args!("{income:.1}/s"),
            earned       = format_args!("{:.0}", self.ledger.lifetime()),
            ram_total    = %total,
            ram_free     = %free,
            in_flight    = self.workers.in_flight(),
            "status"
        );
    }
}

fn expected_duration(estimate: &Estimate, kind: TaskKind) -> Duration {
    match kind {
        TaskKind::Hack => estimate.hack_time,
        TaskKind::Grow => estimate.grow_time,
        TaskKind::Weaken => estimate.weaken_time,
        TaskKind::Share => Duration::ZERO,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::Port;
    use crate::node::Ram;
    use crate::sim::{SimFleet, SimNode, SimWorld};

    type Loop = ControlLoop<SimFleet, SimFleet>;

    fn setup(world: SimWorld, cfg: Config) -> (Loop, Arc<SimFleet>, watch::Sender<bool>) {
        let fleet = Arc::new(SimFleet::with_time_scale(world, 1000.0));
        let (tx, rx) = watch::channel(false);
        let cl = ControlLoop::new(
            &cfg,
            Arc::clone(&fleet),
            Arc::clone(&fleet),
            fleet.unlock_signal(),
            rx,
        );
        (cl, fleet, tx)
    }

    fn fast_config() -> Config {
        let mut cfg = Config::default();
        cfg.scheduler.poll_interval = Duration::from_millis(20);
        cfg.scheduler.status_interval = Duration::from_millis(200);
        cfg.autoscale.enabled = false;
        cfg
    }

    // ── Discovery ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn discover_roots_provisions_and_admits() {
        let (mut cl, fleet, _tx) = setup(SimWorld::starter(), fast_config());
        let admitted = cl.discover().await.unwrap();

        assert_eq!(admitted, 7);
        cl.workers().with_heap(|h| {
            for n in ["home", "n00dles", "foodnstuff", "zer0", "max-hardware"] {
                assert!(h.contains(n), "{n} missing");
            }
            // Two ports needed, one cracker available.
            assert!(!h.contains("phantasy"));
            // Excluded category, even though rooted.
            assert!(!h.contains("hacknet-node-0"));
            assert_eq!(h.node("home").unwrap().used(), Ram::from_centi(410));
        });
        assert!(fleet.node_state("hacknet-node-0").unwrap().has_root);
        assert!(cl.graph().get("phantasy").is_some());
    }

    #[tokio::test]
    async fn rescan_is_idempotent() {
        let (mut cl, _fleet, _tx) = setup(SimWorld::starter(), fast_config());
        cl.discover().await.unwrap();
        let before = cl.workers().with_heap(|h| (h.len(), h.total_capacity(), h.total_used()));

        assert_eq!(cl.discover().await.unwrap(), 0);
        let after = cl.workers().with_heap(|h| (h.len(), h.total_capacity(), h.total_used()));
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn rescan_resyncs_divergent_bookkeeping() {
        let (mut cl, fleet, _tx) = setup(SimWorld::starter(), fast_config());
        cl.discover().await.unwrap();

        fleet.set_used("foodnstuff", Ram::from_whole_gb(3)).unwrap();
        cl.discover().await.unwrap();
        cl.workers().with_heap(|h| {
            assert_eq!(h.node("foodnstuff").unwrap().used(), Ram::from_whole_gb(3));
        });
    }

    #[tokio::test]
    async fn unlock_wakes_the_loop_and_the_rescan_roots_more() {
        let (mut cl, fleet, _tx) = setup(SimWorld::starter(), fast_config());
        cl.discover().await.unwrap();

        fleet.unlock(Port::Ftp.program());
        assert!(matches!(cl.wait().await, Wake::Unlock));

        assert_eq!(cl.discover().await.unwrap(), 1);
        cl.workers().with_heap(|h| assert!(h.contains("phantasy")));
    }

    #[tokio::test]
    async fn shutdown_wakes_the_loop() {
        let (mut cl, _fleet, tx) = setup(SimWorld::starter(), fast_config());
        tx.send(true).unwrap();
        assert!(matches!(cl.wait().await, Wake::Shutdown));
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn dispatch_launches_within_capacity() {
        let (mut cl, _fleet, _tx) = setup(SimWorld::starter(), fast_config());
        cl.discover().await.unwrap();

        let plan = cl.dispatch().await.unwrap();
        // n00dles starts poor, so the first cycle grows it.
        assert!(plan.grow > 0);
        assert_eq!(plan.hack, 0);
        assert!(cl.stats().launched > 0);
        cl.workers().with_heap(|h| assert!(h.total_used() > Ram::from_centi(410)));

        // Poll ticks come first; keep waiting until a completion arrives.
        let joined = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if let Wake::Completed(joined) = cl.wait().await {
                    break joined;
                }
            }
        })
        .await
        .unwrap();
        cl.harvest(joined);
        assert_eq!(cl.stats().completed, 1);
    }

    #[tokio::test]
    async fn unrooted_target_plans_nothing() {
        let mut cfg = fast_config();
        cfg.scheduler.target = "phantasy".into();
        let (mut cl, _fleet, _tx) = setup(SimWorld::starter(), cfg);
        cl.discover().await.unwrap();
        assert!(cl.dispatch().await.unwrap().is_empty());
    }

    // ── Share ─────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn share_is_reserved_once_on_the_roomiest_nodes() {
        let mut cfg = fast_config();
        cfg.scheduler.share_ram = Ram::from_whole_gb(10);
        let (mut cl, fleet, _tx) = setup(SimWorld::starter(), cfg);
        cl.discover().await.unwrap();
        let before = cl.workers().with_heap(|h| h.total_used());

        // 10 GB buys two whole 4 GB threads.
        assert_eq!(cl.reserve_share().unwrap(), 2);
        assert_eq!(cl.stats().shared, 2);
        cl.workers().with_heap(|h| {
            assert_eq!(h.total_used(), before + Ram::from_whole_gb(8));
            assert_eq!(h.node("home").unwrap().used(), Ram::from_centi(410));
        });
        assert_eq!(fleet.running(), 1);

        assert_eq!(cl.reserve_share().unwrap(), 0);
        assert_eq!(fleet.running(), 1);
    }

    #[tokio::test]
    async fn no_share_ram_means_no_share_workers() {
        let (mut cl, fleet, _tx) = setup(SimWorld::starter(), fast_config());
        cl.discover().await.unwrap();
        assert_eq!(cl.reserve_share().unwrap(), 0);
        assert_eq!(fleet.running(), 0);
    }

    // ── Autoscale ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn autoscale_spends_down_to_the_reserve() {
        let mut cfg = fast_config();
        cfg.autoscale.enabled = true;
        cfg.autoscale.reserve = 500_000.0;
        let (mut cl, fleet, _tx) = setup(SimWorld::starter(), cfg);

        // 1 000 000 → 890k → 780k → 670k → 560k, then 60k above reserve < 110k.
        assert_eq!(cl.autoscale().await.unwrap(), 4);
        assert_eq!(fleet.money(), 560_000.0);
        cl.workers().with_heap(|h| {
            assert_eq!(h.nodes().filter(|n| n.purchased).count(), 4);
            assert!(h.contains("bought-3"));
        });
        assert_eq!(cl.stats().purchases, 4);
    }

    #[tokio::test]
    async fn autoscale_upgrades_once_the_ceiling_is_reached() {
        let mut cfg = fast_config();
        cfg.autoscale.enabled = true;
        cfg.autoscale.node_limit = Some(1);
        let mut world = SimWorld::starter();
        world.money = 300_000.0;
        let (mut cl, _fleet, _tx) = setup(world, cfg);

        // Buy bought-0 (110k), then upgrade it 2 → 4 GB (110k); 80k left.
        assert_eq!(cl.autoscale().await.unwrap(), 2);
        cl.workers().with_heap(|h| {
            assert_eq!(h.node("bought-0").unwrap().total(), Ram::from_whole_gb(4));
        });
        assert_eq!(cl.stats().upgrades, 1);
    }

    #[tokio::test]
    async fn refused_purchase_is_fatal() {
        let mut cfg = fast_config();
        cfg.autoscale.enabled = true;
        let mut world = SimWorld::starter();
        // The host will refuse to create a node whose name is taken.
        world.nodes.insert("bought-0".into(), SimNode::default());
        let (mut cl, _fleet, _tx) = setup(world, cfg);

        let err = cl.autoscale().await.unwrap_err();
        assert!(matches!(err, ControlError::Refused { action: "purchase", .. }));
        assert!(!err.is_recoverable());
    }

    // ── Full loop ─────────────────────────────────────────────────────────────

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn runs_until_shutdown() {
        let (cl, _fleet, tx) = setup(SimWorld::starter(), fast_config());
        let handle = tokio::spawn(cl.run());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        tx.send(true).unwrap();

        let stats = handle.await.unwrap().unwrap();
        assert!(stats.cycles > 1);
        assert!(stats.launched > 0);
        assert!(stats.completed > 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn loop_starts_share_workers_after_discovery() {
        let mut cfg = fast_config();
        cfg.scheduler.share_ram = Ram::from_whole_gb(8);
        let (cl, _fleet, tx) = setup(SimWorld::starter(), cfg);
        let handle = tokio::spawn(cl.run());

        tokio::time::sleep(Duration::from_millis(300)).await;
        tx.send(true).unwrap();

        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.shared, 2);
    }
}
