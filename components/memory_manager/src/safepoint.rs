//! Global safe-point barrier for stop-the-world collection.
//!
//! Every mutator thread registers with the [`SafepointCoordinator`] and
//! calls [`poll`](SafepointCoordinator::poll) at its safe points. When a
//! thread needs a collection it calls
//! [`stop_the_world`](SafepointCoordinator::stop_the_world), which raises the
//! request flag and waits until every other registered thread has either
//! parked at a safe point or declared itself blocked. Parked and blocked
//! threads publish their roots first, so the collector marks from the union
//! of all threads' roots. Dropping the returned [`StopTheWorld`] guard
//! releases everyone.

use crate::gc::RootSet;
use core_types::ObjectRef;
use crossbeam::atomic::AtomicCell;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
struct BarrierState {
    registered: HashSet<u64>,
    parked: usize,
    published: Vec<ObjectRef>,
    blocked: HashMap<u64, Vec<ObjectRef>>,
    collector: Option<u64>,
    epoch: u64,
}

impl BarrierState {
    fn stopped(&self, collector: u64) -> usize {
        self.parked + self.blocked.keys().filter(|id| **id != collector).count()
    }

    fn others(&self, collector: u64) -> usize {
        self.registered.len() - usize::from(self.registered.contains(&collector))
    }
}

/// Coordinates mutator threads around collections.
#[derive(Debug)]
pub struct SafepointCoordinator {
    requested: AtomicCell<bool>,
    state: Mutex<BarrierState>,
    cond: Condvar,
    check_count: AtomicU64,
}

impl SafepointCoordinator {
    /// Creates a coordinator with no registered threads.
    pub fn new() -> Self {
        Self {
            requested: AtomicCell::new(false),
            state: Mutex::new(BarrierState::default()),
            cond: Condvar::new(),
            check_count: AtomicU64::new(0),
        }
    }

    /// Registers mutator `thread`. Waits out a collection in progress.
    pub fn register(&self, thread: u64) {
        let mut state = self.state.lock();
        while state.collector.is_some() {
            self.cond.wait(&mut state);
        }
        state.registered.insert(thread);
    }

    /// Removes mutator `thread`.
    pub fn unregister(&self, thread: u64) {
        let mut state = self.state.lock();
        state.registered.remove(&thread);
        state.blocked.remove(&thread);
        self.cond.notify_all();
    }

    /// Number of registered threads.
    pub fn thread_count(&self) -> usize {
        self.state.lock().registered.len()
    }

    /// Returns true while a collection is requested.
    pub fn is_requested(&self) -> bool {
        self.requested.load()
    }

    /// Safe-point check. Parks with the roots produced by `roots` if a
    /// collection is pending; otherwise returns immediately.
    pub fn poll(&self, roots: impl FnOnce() -> Vec<ObjectRef>) {
        self.check_count.fetch_add(1, Ordering::Relaxed);
        if self.requested.load() {
            self.park(roots());
        }
    }

    /// Publishes `roots` and parks until the pending collection finishes.
    /// Returns at once if none is pending.
    pub fn park(&self, roots: Vec<ObjectRef>) {
        let mut state = self.state.lock();
        if state.collector.is_none() {
            return;
        }
        let epoch = state.epoch;
        state.published.extend(roots);
        state.parked += 1;
        self.cond.notify_all();
        while state.epoch == epoch {
            self.cond.wait(&mut state);
        }
    }

    /// Declares `thread` blocked (waiting on a lock or another thread's
    /// class initialization) with `roots` kept alive meanwhile. A blocked
    /// thread counts as parked.
    pub fn begin_blocking(&self, thread: u64, roots: Vec<ObjectRef>) {
        let mut state = self.state.lock();
        state.blocked.insert(thread, roots);
        self.cond.notify_all();
    }

    /// Ends a blocking section. Waits out a collection in progress, since
    /// the collector may be relying on this thread staying put.
    pub fn end_blocking(&self, thread: u64) {
        let mut state = self.state.lock();
        while state.collector.is_some_and(|c| c != thread) {
            self.cond.wait(&mut state);
        }
        state.blocked.remove(&thread);
    }

    /// Stops every other registered thread for a collection by `thread`.
    ///
    /// Returns `None` if another thread is already collecting; the caller
    /// should then park at its safe point and retry its allocation.
    pub fn stop_the_world(&self, thread: u64) -> Option<StopTheWorld<'_>> {
        let mut state = self.state.lock();
        if state.collector.is_some() {
            return None;
        }
        state.collector = Some(thread);
        self.requested.store(true);
        while state.stopped(thread) < state.others(thread) {
            self.cond.wait(&mut state);
        }
        let mut roots = std::mem::take(&mut state.published);
        for (id, blocked) in &state.blocked {
            if *id != thread {
                roots.extend_from_slice(blocked);
            }
        }
        log::debug!(
            "thread {} stopped {} other threads ({} published roots)",
            thread,
            state.others(thread),
            roots.len()
        );
        Some(StopTheWorld {
            coordinator: self,
            roots,
        })
    }

    /// Number of completed stop-the-world pauses.
    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    /// Number of safe-point polls performed.
    pub fn check_count(&self) -> u64 {
        self.check_count.load(Ordering::Relaxed)
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.collector = None;
        state.parked = 0;
        state.published.clear();
        state.epoch += 1;
        self.requested.store(false);
        self.cond.notify_all();
    }
}

impl Default for SafepointCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Held by the collecting thread while every other mutator is stopped.
#[derive(Debug)]
pub struct StopTheWorld<'a> {
    coordinator: &'a SafepointCoordinator,
    roots: Vec<ObjectRef>,
}

impl StopTheWorld<'_> {
    /// Roots published by the stopped threads.
    pub fn roots(&self) -> &[ObjectRef] {
        &self.roots
    }
}

impl RootSet for StopTheWorld<'_> {
    fn for_each_root(&self, f: &mut dyn FnMut(ObjectRef)) {
        self.roots.for_each_root(f);
    }
}

impl Drop for StopTheWorld<'_> {
    fn drop(&mut self) {
        self.coordinator.release();
    }
}
