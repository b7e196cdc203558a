/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! In-flight task registry, completion tickets and pending futures.
//!
//! The [`TaskRegistry`] is the shared context between the dispatcher and
//! the task runtime: the dispatcher writes one entry per launched task, the
//! runtime reads its own entry through [`TaskRegistry::spec`] and reports
//! back through the [`TaskTicket`] it was handed.
//!
//! # Settlement
//! [`TaskRegistry::settle`] is the completion hook.  It removes the entry,
//! returns the reserved RAM to the heap and resolves the [`PendingTask`].
//! Removing the entry is what makes it idempotent: only the first call for
//! an id finds anything to settle.
//!
//! A ticket settles itself from `Drop` if it was never completed, so a task
//! that panics, is killed, or is simply dropped by its runtime still frees
//! its capacity and still resolves its future (with [`TaskError::Aborted`]).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{debug, error};

use super::task::{TaskError, TaskId, TaskOutcome, TaskReport, TaskResult, TaskSpec};
use crate::heap::Heap;
use crate::node::Ram;

/// The heap, shared between the dispatcher and settlement.
pub type SharedHeap = Arc<Mutex<Heap>>;

/// Lock a std mutex, recovering the data if a previous holder panicked.
///
/// Every heap operation leaves the heap consistent before it can panic, so
/// the poisoned value is still safe to use.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── TaskRegistry ──────────────────────────────────────────────────────────────

struct Entry {
    spec: TaskSpec,
    reserved: Ram,
    settle: oneshot::Sender<TaskResult>,
}

struct Inner {
    heap: SharedHeap,
    entries: Mutex<HashMap<TaskId, Entry>>,
    next_id: AtomicU64,
}

/// Concurrency-safe map from task id to in-flight task.  Cheap to clone.
#[derive(Clone)]
pub struct TaskRegistry {
    inner: Arc<Inner>,
}

impl TaskRegistry {
    pub fn new(heap: SharedHeap) -> Self {
        Self {
            inner: Arc::new(Inner {
                heap,
                entries: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// The spec registered under `id`, if that task is still in flight.
    pub fn spec(&self, id: TaskId) -> Option<TaskSpec> {
        lock(&self.inner.entries).get(&id).map(|e| e.spec.clone())
    }

    pub fn contains(&self, id: TaskId) -> bool {
        lock(&self.inner.entries).contains_key(&id)
    }

    /// Number of tasks in flight.
    pub fn len(&self) -> usize {
        lock(&self.inner.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record a task whose RAM is already reserved on `node`.
    pub(crate) fn register(
        &self,
        kind: super::TaskKind,
        target: &str,
        node: &str,
        threads: u32,
        reserved: Ram,
        expected: Duration,
    ) -> (TaskTicket, PendingTask) {
        let id = TaskId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let spec = TaskSpec {
            id,
            kind,
            target: target.to_string(),
            node: node.to_string(),
            threads,
        };
        let (tx, rx) = oneshot::channel();
        lock(&self.inner.entries).insert(
            id,
            Entry {
                spec: spec.clone(),
                reserved,
                settle: tx,
            },
        );

        let ticket = TaskTicket {
            spec: spec.clone(),
            registry: self.clone(),
            settled: false,
        };
        let pending = PendingTask {
            spec,
            reserved,
            started: Instant::now(),
            expected,
            rx,
        };
        (ticket, pending)
    }

    /// Completion hook.  Returns `false` if `id` was already settled.
    pub fn settle(&self, id: TaskId, result: TaskResult) -> bool {
        let Some(entry) = lock(&self.inner.entries).remove(&id) else {
            debug!(task = %id, "settle on unknown or already-settled task ignored");
            return false;
        };

        if let Err(e) = lock(&self.inner.heap).release(&entry.spec.node, entry.reserved) {
            error!(task = %id, node = %entry.spec.node, error = %e, "heap release failed");
        }

        debug!(
            task   = %id,
            kind   = %entry.spec.kind,
            node   = %entry.spec.node,
            freed  = %entry.reserved,
            ok     = result.is_ok(),
            "task settled"
        );
        // The receiver may be gone if nobody is waiting; that is fine.
        let _ = entry.settle.send(result);
        true
    }
}

// ── TaskTicket ────────────────────────────────────────────────────────────────

/// The task runtime's handle on one in-flight task.
///
/// Consuming it with [`complete`](Self::complete) or [`fail`](Self::fail)
/// settles the task.  Dropping it unconsumed settles it as aborted.
pub struct TaskTicket {
    spec: TaskSpec,
    registry: TaskRegistry,
    settled: bool,
}

impl TaskTicket {
    pub fn id(&self) -> TaskId {
        self.spec.id
    }

    pub fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    pub fn complete(mut self, value: f64) {
        self.settled = true;
        self.registry.settle(self.spec.id, Ok(TaskOutcome { value }));
    }

    pub fn fail(mut self, reason: impl Into<String>) {
        self.settled = true;
        self.registry
            .settle(self.spec.id, Err(TaskError::Failed(reason.into())));
    }
}

impl Drop for TaskTicket {
    fn drop(&mut self) {
        if !self.settled {
            self.registry.settle(self.spec.id, Err(TaskError::Aborted));
        }
    }
}

impl std::fmt::Debug for TaskTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskTicket")
            .field("spec", &self.spec)
            .field("settled", &self.settled)
            .finish()
    }
}

// ── PendingTask ───────────────────────────────────────────────────────────────

/// Resolves with a [`TaskReport`] once the task settles.
#[derive(Debug)]
pub struct PendingTask {
    spec: TaskSpec,
    reserved: Ram,
    started: Instant,
    expected: Duration,
    rx: oneshot::Receiver<TaskResult>,
}

impl PendingTask {
    pub fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    pub fn reserved(&self) -> Ram {
        self.reserved
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn expected(&self) -> Duration {
        self.expected
    }
}

impl Future for PendingTask {
    type Output = TaskReport;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<TaskReport> {
        let this = self.get_mut();
        let result = match Pin::new(&mut this.rx).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Ok(result)) => result,
            Poll::Ready(Err(_)) => Err(TaskError::Lost),
        };
        Poll::Ready(TaskReport {
            spec: this.spec.clone(),
            reserved: this.reserved,
            started: this.started,
            expected: this.expected,
            finished: Instant::now(),
            result,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{CapacityNode, UsefulnessRule};
    use crate::workers::TaskKind;

    fn registry_with_reservation() -> (TaskRegistry, SharedHeap, TaskTicket, PendingTask) {
        let mut heap = Heap::new("home", UsefulnessRule::default(), Ram::ZERO);
        heap.add_node(CapacityNode::new("n00dles", Ram::from_whole_gb(4), Ram::ZERO, true))
            .unwrap();
        let reserved = Ram::from_centi(340);
        let node = heap.allocate(reserved).unwrap().unwrap();
        let heap = Arc::new(Mutex::new(heap));
        let registry = TaskRegistry::new(Arc::clone(&heap));
        let (ticket, pending) = registry.register(
            TaskKind::Hack,
            "n00dles",
            &node,
            2,
            reserved,
            Duration::from_secs(1),
        );
        (registry, heap, ticket, pending)
    }

    #[tokio::test]
    async fn complete_releases_and_resolves() {
        let (registry, heap, ticket, pending) = registry_with_reservation();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.spec(ticket.id()).unwrap().threads, 2);

        ticket.complete(1234.0);
        let report = pending.await;

        assert_eq!(report.result, Ok(TaskOutcome { value: 1234.0 }));
        assert!(registry.is_empty());
        assert_eq!(lock(&heap).total_used(), Ram::ZERO);
    }

    #[tokio::test]
    async fn dropped_ticket_still_settles() {
        let (registry, heap, ticket, pending) = registry_with_reservation();
        drop(ticket);
        let report = pending.await;

        assert_eq!(report.result, Err(TaskError::Aborted));
        assert!(registry.is_empty());
        assert_eq!(lock(&heap).total_used(), Ram::ZERO);
    }

    #[tokio::test]
    async fn settle_is_idempotent() {
        let (registry, heap, ticket, pending) = registry_with_reservation();
        let id = ticket.id();

        assert!(registry.settle(id, Err(TaskError::Failed("first".into()))));
        assert!(!registry.settle(id, Ok(TaskOutcome { value: 1.0 })));
        // The ticket's own drop is the third attempt; also a no-op.
        drop(ticket);

        let report = pending.await;
        assert_eq!(report.result, Err(TaskError::Failed("first".into())));
        // Released exactly once: no underflow clamp, nothing leaked.
        assert_eq!(lock(&heap).total_used(), Ram::ZERO);
        assert_eq!(lock(&heap).node("n00dles").unwrap().free(), Ram::from_whole_gb(4));
    }

    #[tokio::test]
    async fn ticket_dropped_during_a_panicking_task_settles() {
        let (registry, heap, ticket, pending) = registry_with_reservation();
        let handle = tokio::spawn(async move {
            let _ticket = ticket;
            panic!("task crashed");
        });
        assert!(handle.await.unwrap_err().is_panic());

        let report = pending.await;
        assert_eq!(report.result, Err(TaskError::Aborted));
        assert!(registry.is_empty());
        assert_eq!(lock(&heap).total_used(), Ram::ZERO);
    }

    #[test]
    fn ids_are_unique() {
        let (registry, _heap, a, _pa) = registry_with_reservation();
        let (b, _pb) = registry.register(
            TaskKind::Weaken,
            "n00dles",
            "n00dles",
            1,
            Ram::ZERO,
            Duration::ZERO,
        );
        assert_ne!(a.id(), b.id());
    }
}
