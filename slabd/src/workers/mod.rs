//! Task dispatcher.
//!
//! [`Workers`] turns "run N threads of kind K against target T" into heap
//! reservations, registry entries and launched tasks, and hands back one
//! [`PendingTask`] per placement.  Capacity goes back to the heap when each
//! task settles (see [`registry`]).
//!
//! # Launch sequence
//! 1. Reserve `threads × ram_per_thread(kind)` with the kind's [`Strategy`].
//!    No capacity → `Ok(None)`, nothing registered, heap untouched.
//! 2. Register every placement, producing one ticket per placement.
//! 3. Hand each ticket to the [`TaskLauncher`].  A refusal at this point is
//!    fatal ([`DispatchError::LaunchFailed`]); tickets not yet launched are
//!    dropped, which settles them and returns their capacity.
//!
//! The heap lock and the registry lock are never held together.

pub mod error;
pub mod registry;
pub mod task;

pub use error::{DispatchError, LaunchError};
pub use registry::{PendingTask, SharedHeap, TaskRegistry, TaskTicket};
pub use task::{
    Strategy, TaskError, TaskId, TaskKind, TaskOutcome, TaskReport, TaskResult, TaskSpec,
};

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::heap::{Heap, HeapError, Placement};
use crate::node::{CapacityNode, Ram};

use registry::lock;

// ── TaskLauncher ──────────────────────────────────────────────────────────────

/// The task launch primitive.
///
/// Takes ownership of the ticket.  The runtime must eventually complete,
/// fail, or drop it; any of the three settles the task.
pub trait TaskLauncher: Send + Sync + 'static {
    /// Start the task described by `ticket.spec()`.  Returns a process id.
    fn launch(&self, ticket: TaskTicket) -> Result<u64, LaunchError>;
}

// ── Workers ───────────────────────────────────────────────────────────────────

pub struct Workers<L: TaskLauncher> {
    heap: SharedHeap,
    registry: TaskRegistry,
    launcher: Arc<L>,
}

impl<L: TaskLauncher> Workers<L> {
    pub fn new(heap: Heap, launcher: Arc<L>) -> Self {
        let heap = Arc::new(std::sync::Mutex::new(heap));
        Self {
            registry: TaskRegistry::new(Arc::clone(&heap)),
            heap,
            launcher,
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Number of tasks in flight.
    pub fn in_flight(&self) -> usize {
        self.registry.len()
    }

    /// Read-only access to the heap.
    pub fn with_heap<R>(&self, f: impl FnOnce(&Heap) -> R) -> R {
        f(&lock(&self.heap))
    }

    // ── Capacity changes ──────────────────────────────────────────────────────

    /// Admit or refresh a node.  See [`Heap::add_node`].
    pub fn admit(&self, node: CapacityNode) -> Result<bool, HeapError> {
        lock(&self.heap).add_node(node)
    }

    /// Record a node's new total after an upgrade.
    pub fn resize(&self, name: &str, total: Ram) -> Result<(), HeapError> {
        lock(&self.heap).update_capacity(name, total)
    }

    /// Overwrite tracked usage with observed usage for every listed node the
    /// heap knows.  Returns how many nodes had diverged.
    pub fn reconcile<'a, I>(&self, observed: I) -> Result<usize, HeapError>
    where
        I: IntoIterator<Item = (&'a str, Ram)>,
    {
        let mut heap = lock(&self.heap);
        let mut corrected = 0;
        for (name, used) in observed {
            if !heap.contains(name) {
                continue;
            }
            if let Some(tracked) = heap.resync(name, used)? {
                warn!(
                    node     = %name,
                    tracked  = %tracked,
                    observed = %used,
                    "capacity bookkeeping diverged, resynchronised from observation"
                );
                corrected += 1;
            }
        }
        Ok(corrected)
    }

    // ── Launch ────────────────────────────────────────────────────────────────

    /// Reserve capacity for `threads` threads of `kind` and start them.
    ///
    /// Returns `Ok(None)` when the heap cannot hold the request.  Otherwise
    /// one [`PendingTask`] per node the threads were placed on (always a
    /// single element for best-fit and home-first kinds).  Largest-first
    /// kinds may come back with fewer threads than asked for.
    pub fn launch(
        &self,
        kind: TaskKind,
        target: &str,
        threads: u32,
        expected: Duration,
    ) -> Result<Option<Vec<PendingTask>>, DispatchError> {
        if threads == 0 {
            return Ok(None);
        }
        let unit = kind.ram_per_thread();
        let amount = unit.times(threads);

        let placements = {
            let mut heap = lock(&self.heap);
            match kind.strategy() {
                Strategy::BestFit => heap
                    .allocate(amount)?
                    .map(|node| single(node, threads, amount)),
                Strategy::PreferHome => heap
                    .allocate_preferred(amount)?
                    .map(|node| single(node, threads, amount)),
                Strategy::Spread => heap.allocate_spread(unit, threads)?,
                Strategy::LargestFirst => {
                    Some(heap.allocate_largest_first(unit, threads)?).filter(|p| !p.is_empty())
                }
            }
        };
        let Some(placements) = placements else {
            debug!(kind = %kind, threads, ram = %amount, "no capacity, skipped");
            return Ok(None);
        };

        let mut tickets = Vec::with_capacity(placements.len());
        let mut pending = Vec::with_capacity(placements.len());
        for p in &placements {
            let (ticket, fut) =
                self.registry
                    .register(kind, target, &p.node, p.units, p.ram, expected);
            tickets.push(ticket);
            pending.push(fut);
        }

        for ticket in tickets {
            let spec = ticket.spec().clone();
            let pid = self
                .launcher
                .launch(ticket)
                .map_err(|source| DispatchError::LaunchFailed {
                    kind,
                    node: spec.node.clone(),
                    threads: spec.threads,
                    source,
                })?;
            info!(
                task    = %spec.id,
                kind    = %kind,
                target  = %spec.target,
                node    = %spec.node,
                threads = spec.threads,
                ram     = %unit.times(spec.threads),
                pid,
                "task launched"
            );
        }
        Ok(Some(pending))
    }
}

fn single(node: String, threads: u32, ram: Ram) -> Vec<Placement> {
    vec![Placement {
        node,
        units: threads,
        ram,
    }]
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::UsefulnessRule;
    use std::sync::Mutex;

    // ── Test launchers ────────────────────────────────────────────────────────

    /// Keeps every ticket until the test decides what happens to it.
    #[derive(Default)]
    struct Holding {
        tickets: Mutex<Vec<TaskTicket>>,
    }

    impl TaskLauncher for Holding {
        fn launch(&self, ticket: TaskTicket) -> Result<u64, LaunchError> {
            let mut t = self.tickets.lock().unwrap();
            t.push(ticket);
            Ok(t.len() as u64)
        }
    }

    /// Refuses every launch after the first `ok` ones.
    struct Refusing {
        ok: Mutex<u32>,
        kept: Mutex<Vec<TaskTicket>>,
    }

    impl TaskLauncher for Refusing {
        fn launch(&self, ticket: TaskTicket) -> Result<u64, LaunchError> {
            let mut ok = self.ok.lock().unwrap();
            if *ok == 0 {
                return Err(LaunchError::MissingProgram {
                    node: ticket.spec().node.clone(),
                    program: ticket.spec().kind.program().into(),
                });
            }
            *ok -= 1;
            self.kept.lock().unwrap().push(ticket);
            Ok(1)
        }
    }

    fn gb(n: u64) -> Ram {
        Ram::from_whole_gb(n)
    }

    fn heap(nodes: &[(&str, u64)]) -> Heap {
        let mut heap = Heap::new("home", UsefulnessRule::default(), Ram::ZERO);
        for (name, total) in nodes {
            heap.add_node(CapacityNode::new(*name, gb(*total), Ram::ZERO, true))
                .unwrap();
        }
        heap
    }

    fn workers<L: TaskLauncher>(nodes: &[(&str, u64)], launcher: L) -> (Workers<L>, Arc<L>) {
        let launcher = Arc::new(launcher);
        (Workers::new(heap(nodes), Arc::clone(&launcher)), launcher)
    }

    const SEC: Duration = Duration::from_secs(1);

    // ── Reservation ───────────────────────────────────────────────────────────

    #[test]
    fn no_capacity_registers_nothing_and_leaves_the_heap_alone() {
        let (w, launcher) = workers(&[("a", 4), ("b", 4)], Holding::default());
        let out = w.launch(TaskKind::Hack, "n00dles", 10, SEC).unwrap();

        assert!(out.is_none());
        assert_eq!(w.in_flight(), 0);
        assert!(launcher.tickets.lock().unwrap().is_empty());
        w.with_heap(|h| {
            assert_eq!(h.total_used(), Ram::ZERO);
            assert!(h.nodes().all(|n| n.used() == Ram::ZERO));
        });
    }

    #[test]
    fn zero_threads_is_not_a_launch() {
        let (w, _) = workers(&[("a", 4)], Holding::default());
        assert!(w.launch(TaskKind::Grow, "t", 0, SEC).unwrap().is_none());
        assert_eq!(w.in_flight(), 0);
    }

    #[test]
    fn hack_reserves_threads_times_cost_on_one_node() {
        let (w, launcher) = workers(&[("a", 4), ("b", 16)], Holding::default());
        let pending = w.launch(TaskKind::Hack, "t", 3, SEC).unwrap().unwrap();

        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].spec().node, "b");
        assert_eq!(pending[0].reserved(), Ram::from_centi(510));
        assert_eq!(w.in_flight(), 1);
        assert_eq!(launcher.tickets.lock().unwrap().len(), 1);
    }

    #[test]
    fn weaken_spreads_across_nodes() {
        let (w, _) = workers(&[("a", 4), ("b", 4)], Holding::default());
        let pending = w.launch(TaskKind::Weaken, "t", 4, SEC).unwrap().unwrap();

        assert_eq!(pending.len(), 2);
        assert_eq!(pending.iter().map(|p| p.spec().threads).sum::<u32>(), 4);
        assert_eq!(w.in_flight(), 2);
    }

    #[test]
    fn share_takes_what_fits_on_the_biggest_nodes() {
        let (w, _) = workers(&[("a", 4), ("b", 16), ("c", 2)], Holding::default());
        let pending = w.launch(TaskKind::Share, "", 8, SEC).unwrap().unwrap();

        let placed: Vec<_> = pending.iter().map(|p| (p.spec().node.clone(), p.spec().threads)).collect();
        assert_eq!(placed, vec![("b".to_string(), 4), ("a".to_string(), 1)]);
        w.with_heap(|h| assert_eq!(h.node("c").unwrap().used(), Ram::ZERO));

        // Nothing left that holds a share thread.
        assert!(w.launch(TaskKind::Share, "", 1, SEC).unwrap().is_none());
    }

    // ── Settlement ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn completion_releases_capacity_and_resolves() {
        let (w, launcher) = workers(&[("a", 8)], Holding::default());
        let mut pending = w.launch(TaskKind::Hack, "t", 2, SEC).unwrap().unwrap();
        w.with_heap(|h| assert_eq!(h.total_used(), Ram::from_centi(340)));

        let ticket = launcher.tickets.lock().unwrap().pop().unwrap();
        ticket.complete(42.0);
        let report = pending.pop().unwrap().await;

        assert_eq!(report.result, Ok(TaskOutcome { value: 42.0 }));
        assert_eq!(w.in_flight(), 0);
        w.with_heap(|h| assert_eq!(h.total_used(), Ram::ZERO));
    }

    #[tokio::test]
    async fn abnormal_termination_still_releases_and_settles() {
        let (w, launcher) = workers(&[("a", 8)], Holding::default());
        let mut pending = w.launch(TaskKind::Grow, "t", 2, SEC).unwrap().unwrap();

        // The runtime dies holding the ticket.
        let ticket = launcher.tickets.lock().unwrap().pop().unwrap();
        std::thread::spawn(move || {
            let _held = ticket;
            panic!("task process killed");
        })
        .join()
        .unwrap_err();

        let report = pending.pop().unwrap().await;
        assert_eq!(report.result, Err(TaskError::Aborted));
        assert_eq!(w.in_flight(), 0);
        w.with_heap(|h| assert_eq!(h.total_used(), Ram::ZERO));
    }

    #[tokio::test]
    async fn repeated_completion_settles_once() {
        let (w, launcher) = workers(&[("a", 8)], Holding::default());
        let mut pending = w.launch(TaskKind::Hack, "t", 1, SEC).unwrap().unwrap();
        let ticket = launcher.tickets.lock().unwrap().pop().unwrap();
        let id = ticket.id();

        ticket.complete(1.0);
        assert!(!w.registry().settle(id, Err(TaskError::Failed("late".into()))));

        let report = pending.pop().unwrap().await;
        assert_eq!(report.result, Ok(TaskOutcome { value: 1.0 }));
        w.with_heap(|h| assert_eq!(h.node("a").unwrap().free(), gb(8)));
    }

    // ── Fatal launch failure ──────────────────────────────────────────────────

    #[test]
    fn refused_launch_is_fatal_and_leaks_nothing() {
        let refusing = Refusing {
            ok: Mutex::new(1),
            kept: Mutex::new(Vec::new()),
        };
        let (w, launcher) = workers(&[("a", 4), ("b", 4)], refusing);
        let err = w.launch(TaskKind::Weaken, "t", 4, SEC).unwrap_err();

        assert!(matches!(
            err,
            DispatchError::LaunchFailed { kind: TaskKind::Weaken, ref node, .. } if node == "b"
        ));
        // The task that did start still holds its share; the refused one does not.
        assert_eq!(w.in_flight(), 1);
        w.with_heap(|h| {
            assert_eq!(h.node("a").unwrap().used(), Ram::from_centi(350));
            assert_eq!(h.node("b").unwrap().used(), Ram::ZERO);
        });
        drop(launcher);
    }

    // ── Reconcile ─────────────────────────────────────────────────────────────

    #[test]
    fn reconcile_trusts_the_observation() {
        let (w, _) = workers(&[("a", 16), ("b", 16)], Holding::default());
        let fixed = w
            .reconcile([("a", gb(3)), ("b", Ram::ZERO), ("ghost", gb(1))])
            .unwrap();

        assert_eq!(fixed, 1);
        w.with_heap(|h| {
            assert_eq!(h.node("a").unwrap().used(), gb(3));
            assert_eq!(h.total_used(), gb(3));
        });
    }

    #[test]
    fn resize_grows_capacity() {
        let (w, _) = workers(&[("bought-0", 2)], Holding::default());
        w.resize("bought-0", gb(4)).unwrap();
        w.with_heap(|h| assert_eq!(h.total_capacity(), gb(4)));
        assert!(w.resize("ghost", gb(4)).is_err());
    }
}
