#![forbid(unsafe_code)]

//! Derived values that recompute eagerly when their inputs change.
//!
//! # Design
//!
//! [`Computed<T>`] wraps a compute function, the [`Inputs`] it reads, the
//! last snapshot of those inputs and its own [`ListenerRegistry`] in shared,
//! reference-counted storage. Construction subscribes to every input,
//! snapshots them and runs the first computation without notifying anyone.
//!
//! When an input notifies, the node:
//!
//! 1. returns early if it is already queued, or if the notified value is the
//!    one already held in its snapshot (identity check);
//! 2. otherwise marks itself dirty and joins the propagation queue at its
//!    height, one above its highest input;
//! 3. once every lower node has settled, re-reads **every** input, stores
//!    the fresh snapshot and calls `compute(snapshot, Some(previous))`;
//! 4. stores the result, and notifies its own listeners only if the result
//!    is not [`DeepEq`]-equal to the previous output.
//!
//! Settling by height keeps diamonds consistent: a node reading two nodes
//! that share a source recomputes once, after both of them. In a batch the
//! queue drains only after every staged cell has committed, so each
//! dependent recomputes once and sees the complete new state.
//!
//! # Invariants
//!
//! 1. The cached value equals `compute` applied to the latest snapshot that
//!    triggered a recomputation (or the construction snapshot).
//! 2. Listeners never observe `(new, previous)` with `new.deep_eq(previous)`.
//! 3. `version` increments by 1 on each call of the compute function.
//! 4. A node recomputes after every input it reads has settled.
//! 5. After [`destroy`](Computed::destroy), reads and subscriptions fail with
//!    [`ReactiveError::Destroyed`] and no input holds a listener for the node.
//!
//! # Failure Modes
//!
//! - **Compute function panics**: the panic unwinds out of the write that
//!   triggered it. Nodes still queued are dropped from the queue. The node
//!   keeps its previous value and the snapshot taken for the failed attempt,
//!   so the next input change recomputes.
//! - **Input destroyed**: the snapshot keeps that input's last value.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::equality::DeepEq;
use crate::error::{ReactiveError, Result};
use crate::inputs::{InputSink, Inputs};
use crate::listeners::{CompactionPolicy, ListenerRegistry, NodeId, Subscription, Unsubscribe};
use crate::propagation::{self, Dirty};
use crate::readable::{Readable, attach};

// ─── Self-destroy capability ─────────────────────────────────────────────────

trait Teardown {
    fn teardown(&self);
    fn torn_down(&self) -> bool;
}

/// Capability handed to a compute function to destroy its own node.
///
/// ```
/// use ftui_reactive::{Computed, Observable};
///
/// let a = Observable::new(None::<i32>);
/// let b = Observable::new(None::<i32>);
/// let both = Computed::with_stop((a.clone(), b.clone()), |(a, b), _, stop| {
///     let pair = (*a).zip(*b);
///     if pair.is_some() {
///         stop.stop();
///     }
///     pair
/// })
/// .unwrap();
///
/// a.set(Some(1));
/// b.set(Some(2));
/// assert!(both.is_destroyed());
/// ```
pub struct Stop {
    node: Weak<dyn Teardown>,
}

impl Stop {
    /// Destroy the node. The value being computed is discarded.
    pub fn stop(&self) {
        if let Some(node) = self.node.upgrade() {
            node.teardown();
        }
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.node.upgrade().is_none_or(|node| node.torn_down())
    }
}

impl fmt::Debug for Stop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stop")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

// ─── Input wiring ────────────────────────────────────────────────────────────

type Job<T> = Box<dyn FnOnce(Option<&T>, &Stop) -> T>;

/// Type-erased inputs, snapshot, compute function and upstream handles.
trait Wiring<T> {
    /// Whether the value at `address` is already in the snapshot at `slot`.
    fn observed(&self, slot: usize, address: *const ()) -> bool;
    /// Re-read every input and prepare a computation over the result.
    fn refresh(&mut self, node: NodeId) -> Job<T>;
    /// Prepare a computation over the current snapshot.
    fn job(&self) -> Job<T>;
    /// Unsubscribe from every input.
    fn release(self: Box<Self>);
}

struct Wired<I: Inputs, F> {
    inputs: I,
    snapshot: I::Snapshot,
    compute: Rc<F>,
    upstream: Vec<Unsubscribe>,
}

impl<T, I, F> Wiring<T> for Wired<I, F>
where
    T: 'static,
    I: Inputs,
    F: Fn(I::Snapshot, Option<&T>, &Stop) -> T + 'static,
{
    fn observed(&self, slot: usize, address: *const ()) -> bool {
        I::slot_address(&self.snapshot, slot) == Some(address)
    }

    fn refresh(&mut self, node: NodeId) -> Job<T> {
        let stale = self.inputs.refresh(&mut self.snapshot);
        if stale > 0 {
            tracing::warn!(
                message = "computed.stale_inputs",
                node = node.raw(),
                stale,
                inputs = self.inputs.len()
            );
        }
        Wiring::<T>::job(self)
    }

    fn job(&self) -> Job<T> {
        let compute = Rc::clone(&self.compute);
        let snapshot = self.snapshot.clone();
        Box::new(move |previous: Option<&T>, stop: &Stop| -> T {
            compute(snapshot, previous, stop)
        })
    }

    fn release(self: Box<Self>) {
        for handle in &self.upstream {
            handle.unsubscribe();
        }
    }
}

// ─── Shared node state ───────────────────────────────────────────────────────

struct ComputedInner<T> {
    id: NodeId,
    /// One above the highest input.
    height: u32,
    /// Waiting in the propagation queue.
    queued: Cell<bool>,
    /// Cached result (None before the first computation and after destroy).
    value: RefCell<Option<Rc<T>>>,
    wiring: RefCell<Option<Box<dyn Wiring<T>>>>,
    destroyed: Cell<bool>,
    /// Monotonically increasing version, bumped on each computation.
    version: Cell<u64>,
    listeners: ListenerRegistry<T>,
}

impl<T: DeepEq + 'static> ComputedInner<T> {
    fn on_input(self: &Rc<Self>, slot: usize, address: *const ()) {
        if self.queued.get() {
            return;
        }
        {
            let wiring = self.wiring.borrow();
            let Some(wiring) = wiring.as_ref() else {
                return;
            };
            if wiring.observed(slot, address) {
                return;
            }
        }
        self.queued.set(true);
        let this: Rc<Self> = Rc::clone(self);
        let node: Rc<dyn Dirty> = this;
        propagation::propagate(|| propagation::enqueue(self.height, node));
    }

    fn run(self: &Rc<Self>, job: Job<T>) {
        let previous = self.value.borrow().clone();
        let stop = Stop {
            node: Rc::downgrade(self) as Weak<dyn Teardown>,
        };
        let next = Rc::new(job(previous.as_deref(), &stop));
        self.version.set(self.version.get() + 1);
        tracing::debug!(
            message = "computed.recompute",
            node = self.id.raw(),
            version = self.version.get()
        );
        if self.destroyed.get() {
            return;
        }
        *self.value.borrow_mut() = Some(Rc::clone(&next));
        if let Some(previous) = previous
            && !previous.deep_eq(&next)
        {
            self.listeners.notify(&next, &previous);
        }
    }

    fn current(&self) -> Result<Rc<T>> {
        if self.destroyed.get() {
            return Err(ReactiveError::destroyed(self.id));
        }
        self.value
            .borrow()
            .clone()
            .ok_or_else(|| ReactiveError::destroyed(self.id))
    }
}

impl<T: DeepEq + 'static> Dirty for ComputedInner<T> {
    fn settle(self: Rc<Self>) {
        self.queued.set(false);
        let job = {
            let mut wiring = self.wiring.borrow_mut();
            let Some(wiring) = wiring.as_mut() else {
                return;
            };
            wiring.refresh(self.id)
        };
        self.run(job);
    }

    fn discard(&self) {
        self.queued.set(false);
    }
}

impl<T: 'static> Teardown for ComputedInner<T> {
    fn teardown(&self) {
        if self.destroyed.replace(true) {
            return;
        }
        let wiring = self.wiring.borrow_mut().take();
        if let Some(wiring) = wiring {
            wiring.release();
        }
        self.listeners.clear();
        let value = self.value.borrow_mut().take();
        drop(value);
        tracing::debug!(message = "computed.destroy", node = self.id.raw());
    }

    fn torn_down(&self) -> bool {
        self.destroyed.get()
    }
}

impl<T> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        // Last handle gone: stop the inputs from calling into a dead node.
        if let Some(wiring) = self.wiring.get_mut().take() {
            wiring.release();
        }
    }
}

// ─── Public handle ───────────────────────────────────────────────────────────

/// A read-only value derived from one or more [`Readable`] inputs.
///
/// Cloning a `Computed` creates a new handle to the **same** node. The node
/// lives until it is destroyed or its last handle is dropped.
pub struct Computed<T> {
    inner: Rc<ComputedInner<T>>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.inner.id)
            .field("value", &self.inner.value.borrow())
            .field("version", &self.inner.version.get())
            .field("destroyed", &self.inner.destroyed.get())
            .finish()
    }
}

impl<T: DeepEq + 'static> Computed<T> {
    /// Derive a value from `inputs`.
    ///
    /// `compute` receives the input snapshot and the previous output (`None`
    /// for the initial computation, which runs before this returns).
    ///
    /// # Errors
    ///
    /// [`ReactiveError::Destroyed`] if any input is a destroyed node.
    pub fn new<I, F>(inputs: I, compute: F) -> Result<Self>
    where
        I: Inputs,
        F: Fn(I::Snapshot, Option<&T>) -> T + 'static,
    {
        Self::with_policy(
            inputs,
            move |snapshot, previous, _| compute(snapshot, previous),
            CompactionPolicy::default(),
        )
    }

    /// Like [`new`](Self::new), with a [`Stop`] capability as third argument.
    ///
    /// # Errors
    ///
    /// [`ReactiveError::Destroyed`] if any input is a destroyed node.
    pub fn with_stop<I, F>(inputs: I, compute: F) -> Result<Self>
    where
        I: Inputs,
        F: Fn(I::Snapshot, Option<&T>, &Stop) -> T + 'static,
    {
        Self::with_policy(inputs, compute, CompactionPolicy::default())
    }

    /// Derive a value from a single readable.
    ///
    /// # Errors
    ///
    /// [`ReactiveError::Destroyed`] if `source` is a destroyed node.
    pub fn map<R, F>(source: &R, map: F) -> Result<Self>
    where
        R: Readable,
        F: Fn(&R::Value) -> T + 'static,
    {
        Self::new((source.clone(),), move |(value,), _| map(&*value))
    }

    /// Full constructor: inputs, a compute function taking the
    /// [`Stop`] capability, and the compaction policy of the node's own
    /// listener registry.
    ///
    /// # Errors
    ///
    /// [`ReactiveError::Destroyed`] if any input is a destroyed node.
    pub fn with_policy<I, F>(inputs: I, compute: F, policy: CompactionPolicy) -> Result<Self>
    where
        I: Inputs,
        F: Fn(I::Snapshot, Option<&T>, &Stop) -> T + 'static,
    {
        let id = NodeId::next();
        let inner = Rc::new(ComputedInner {
            id,
            height: inputs.height().saturating_add(1),
            queued: Cell::new(false),
            value: RefCell::new(None),
            wiring: RefCell::new(None),
            destroyed: Cell::new(false),
            version: Cell::new(0),
            listeners: ListenerRegistry::for_node(id, policy),
        });

        let weak = Rc::downgrade(&inner);
        let sink = InputSink::new(move |slot, address| {
            if let Some(node) = weak.upgrade() {
                node.on_input(slot, address);
            }
        });
        let upstream = inputs.subscribe(&sink)?;
        let snapshot = match inputs.snapshot() {
            Ok(snapshot) => snapshot,
            Err(err) => {
                for handle in &upstream {
                    handle.unsubscribe();
                }
                return Err(err);
            }
        };
        tracing::debug!(
            message = "computed.create",
            node = id.raw(),
            inputs = inputs.len(),
            height = inner.height
        );

        let wired = Wired {
            inputs,
            snapshot,
            compute: Rc::new(compute),
            upstream,
        };
        let job = Wiring::<T>::job(&wired);
        let wiring: Box<dyn Wiring<T>> = Box::new(wired);
        *inner.wiring.borrow_mut() = Some(wiring);
        inner.run(job);

        Ok(Self { inner })
    }

    #[must_use]
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Shared handle to the current value.
    ///
    /// # Errors
    ///
    /// [`ReactiveError::Destroyed`] after [`destroy`](Self::destroy).
    pub fn read(&self) -> Result<Rc<T>> {
        self.inner.current()
    }

    /// Clone of the current value.
    ///
    /// # Errors
    ///
    /// [`ReactiveError::Destroyed`] after [`destroy`](Self::destroy).
    pub fn get(&self) -> Result<T>
    where
        T: Clone,
    {
        self.read().map(|value| T::clone(&value))
    }

    /// Access the current value by reference.
    ///
    /// # Errors
    ///
    /// [`ReactiveError::Destroyed`] after [`destroy`](Self::destroy).
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        self.read().map(|value| f(&value))
    }

    /// Register a change listener. See [`Readable::on_change`].
    ///
    /// # Errors
    ///
    /// [`ReactiveError::Destroyed`] after [`destroy`](Self::destroy).
    pub fn on_change<F>(&self, listener: F, run_immediately: bool) -> Result<Unsubscribe>
    where
        F: Fn(&T, &T, &Unsubscribe) + 'static,
    {
        let current = self.read()?;
        Ok(attach(
            &self.inner.listeners,
            run_immediately.then_some(current),
            listener,
        ))
    }

    /// Register a change listener guarded by a [`Subscription`].
    ///
    /// # Errors
    ///
    /// [`ReactiveError::Destroyed`] after [`destroy`](Self::destroy).
    pub fn subscribe<F>(&self, listener: F) -> Result<Subscription>
    where
        F: Fn(&T, &T, &Unsubscribe) + 'static,
    {
        Ok(self.on_change(listener, false)?.into_guard())
    }

    /// Stop listening to the inputs, drop all listeners and release the
    /// compute function, inputs and snapshot. Calling it again is a no-op.
    pub fn destroy(&self) {
        self.inner.teardown();
    }

    /// One above the highest input; derived nodes settle in height order.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.inner.height
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    /// Number of computations so far, including the initial one.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }
}

impl<T: DeepEq + 'static> Readable for Computed<T> {
    type Value = T;

    fn node_id(&self) -> NodeId {
        self.id()
    }

    fn height(&self) -> u32 {
        self.inner.height
    }

    fn current(&self) -> Result<Rc<T>> {
        self.inner.current()
    }

    fn on_change<F>(&self, listener: F, run_immediately: bool) -> Result<Unsubscribe>
    where
        F: Fn(&T, &T, &Unsubscribe) + 'static,
    {
        Computed::on_change(self, listener, run_immediately)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Observable;
    use std::collections::BTreeMap;

    fn counter() -> (Rc<Cell<u32>>, Rc<Cell<u32>>) {
        let count = Rc::new(Cell::new(0u32));
        (Rc::clone(&count), count)
    }

    #[test]
    fn initial_value_computed_without_notification() {
        let width = Observable::new(10);
        let height = Observable::new(20);
        let area = Computed::new((width.clone(), height.clone()), |(w, h), prev| {
            assert!(prev.is_none());
            *w * *h
        })
        .unwrap();

        assert_eq!(area.get().unwrap(), 200);
        assert_eq!(area.version(), 1);
    }

    #[test]
    fn multi_dep_recompute_and_notify() {
        let width = Observable::new(10);
        let height = Observable::new(20);
        let area = Computed::new((width.clone(), height.clone()), |(w, h), _| *w * *h).unwrap();

        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let _ = area
            .on_change(move |new, old, _| sink.borrow_mut().push((*new, *old)), false)
            .unwrap();

        width.set(5);
        assert_eq!(area.get().unwrap(), 100);
        height.set(30);
        assert_eq!(area.get().unwrap(), 150);
        assert_eq!(*log.borrow(), vec![(100, 200), (150, 100)]);
    }

    #[test]
    fn equal_output_updates_silently() {
        let a = Observable::new(3);
        let parity = Computed::map(&a, |v| v % 2).unwrap();
        let fired = Rc::new(Cell::new(0));
        let f = Rc::clone(&fired);
        let _ = parity.on_change(move |_, _, _| f.set(f.get() + 1), false).unwrap();

        a.set(5);
        assert_eq!(parity.get().unwrap(), 1);
        assert_eq!(parity.version(), 2);
        assert_eq!(fired.get(), 0);

        a.set(6);
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn previous_output_is_passed_to_compute() {
        let tick = Observable::new(0u32);
        let total = Computed::new((tick.clone(),), |(t,), prev: Option<&u32>| {
            prev.copied().unwrap_or(0) + *t
        })
        .unwrap();

        tick.set(1);
        tick.set(2);
        tick.set(3);
        assert_eq!(total.get().unwrap(), 6);
    }

    #[test]
    fn chained_computed_nodes() {
        let base = Observable::new(2);
        let doubled = Computed::map(&base, |v| v * 2).unwrap();
        let plus_one = Computed::map(&doubled, |v| v + 1).unwrap();

        base.set(10);
        assert_eq!(doubled.get().unwrap(), 20);
        assert_eq!(plus_one.get().unwrap(), 21);
    }

    #[test]
    fn diamond_dependency() {
        // A -> B, A -> C, (B, C) -> D
        let a = Observable::new(10);
        let b = Computed::map(&a, |v| v + 1).unwrap();
        let c = Computed::map(&a, |v| v * 2).unwrap();
        let d = Computed::new((b.clone(), c.clone()), |(b, c), _| *b + *c).unwrap();

        assert_eq!(d.get().unwrap(), 31);
        a.set(5);
        assert_eq!(d.get().unwrap(), 16);
    }

    #[test]
    fn diamond_never_sees_mixed_inputs() {
        let a = Observable::new(1);
        let b = Computed::map(&a, |v| v + 1).unwrap();
        let c = Computed::map(&a, |v| v * 10).unwrap();
        let (count, computes) = counter();
        let d = Computed::new((b.clone(), c.clone()), move |(b, c), _| {
            count.set(count.get() + 1);
            assert_eq!(*c, (*b - 1) * 10, "inputs out of step");
            *b + *c
        })
        .unwrap();

        a.set(2);
        a.set(3);
        assert_eq!(d.get().unwrap(), 34);
        assert_eq!(computes.get(), 3);
    }

    #[test]
    fn uneven_paths_settle_by_height() {
        // a -> b -> c -> d, and a -> d directly.
        let a = Observable::new(0);
        let b = Computed::map(&a, |v| v + 1).unwrap();
        let c = Computed::map(&b, |v| v + 1).unwrap();
        let (count, computes) = counter();
        let d = Computed::new((a.clone(), c.clone()), move |(a, c), _| {
            count.set(count.get() + 1);
            assert_eq!(*c, *a + 2, "read a stale chain");
            *a + *c
        })
        .unwrap();
        assert_eq!((b.height(), c.height(), d.height()), (1, 2, 3));

        a.set(5);
        assert_eq!(d.get().unwrap(), 12);
        assert_eq!(computes.get(), 2);
    }

    #[test]
    fn with_policy_takes_policy_last() {
        let a = Observable::with_policy(1, CompactionPolicy::disabled());
        let node = Computed::with_policy(
            (a.clone(),),
            |(v,), _, _| *v * 2,
            CompactionPolicy::disabled(),
        )
        .unwrap();
        for _ in 0..5 {
            node.on_change(|_, _, _| {}, false).unwrap().unsubscribe();
        }
        assert_eq!(node.inner.listeners.slot_count(), 5);
        assert_eq!(node.inner.listeners.policy(), CompactionPolicy::disabled());
        a.set(4);
        assert_eq!(node.get().unwrap(), 8);
    }

    #[test]
    fn vec_inputs_are_positional() {
        let cells: Vec<_> = (1..=4).map(Observable::new).collect();
        let sum = Computed::new(cells.clone(), |values, _| values.iter().map(|v| **v).sum::<i32>())
            .unwrap();
        assert_eq!(sum.get().unwrap(), 10);
        cells[2].set(30);
        assert_eq!(sum.get().unwrap(), 37);
    }

    #[test]
    fn named_inputs() {
        let first = Observable::new("John".to_string());
        let last = Observable::new("Doe".to_string());
        let inputs = BTreeMap::from([("first", first.clone()), ("last", last.clone())]);
        let full = Computed::new(inputs, |v, _| format!("{} {}", v["first"], v["last"])).unwrap();

        assert_eq!(full.get().unwrap(), "John Doe");
        last.set("Smith".to_string());
        assert_eq!(full.get().unwrap(), "John Smith");
    }

    #[test]
    fn heterogeneous_tuple_inputs() {
        let name = Observable::new("cpu".to_string());
        let load = Observable::new(0.5f64);
        let enabled = Observable::new(true);
        let label = Computed::new((name.clone(), load.clone(), enabled.clone()), |(n, l, e), _| {
            if *e { format!("{n}: {:.0}%", *l * 100.0) } else { String::new() }
        })
        .unwrap();

        assert_eq!(label.get().unwrap(), "cpu: 50%");
        enabled.set(false);
        assert_eq!(label.get().unwrap(), "");
    }

    #[test]
    fn destroy_fails_reads_and_subscriptions() {
        let source = Observable::new(1);
        let node = Computed::map(&source, |v| *v).unwrap();
        let _ = node.on_change(|_, _, _| {}, false).unwrap();
        assert_eq!(source.listener_count(), 1);

        node.destroy();
        assert!(node.is_destroyed());
        assert_eq!(source.listener_count(), 0);
        assert_eq!(node.listener_count(), 0);
        assert_eq!(node.read().unwrap_err(), ReactiveError::destroyed(node.id()));
        assert!(node.on_change(|_, _, _| {}, false).is_err());
        assert!(node.subscribe(|_, _, _| {}).is_err());

        // Idempotent.
        node.destroy();
        source.set(2);
        assert!(node.get().is_err());
    }

    #[test]
    fn building_on_destroyed_input_fails() {
        let source = Observable::new(1);
        let upstream = Computed::map(&source, |v| *v).unwrap();
        upstream.destroy();
        let err = Computed::map(&upstream, |v| *v).unwrap_err();
        assert_eq!(err.node(), upstream.id());

        // A failed build leaves no listeners behind.
        let partial = Computed::new((source.clone(), upstream.clone()), |(a, b), _| *a + *b);
        assert!(partial.is_err());
        assert_eq!(source.listener_count(), 0);
    }

    #[test]
    fn destroyed_input_keeps_last_value() {
        let a = Observable::new(1);
        let b = Observable::new(10);
        let b_view = Computed::map(&b, |v| *v).unwrap();
        let sum = Computed::new((a.clone(), b_view.clone()), |(a, b), _| *a + *b).unwrap();

        b_view.destroy();
        a.set(2);
        assert_eq!(sum.get().unwrap(), 12);
    }

    #[test]
    fn stop_from_compute_destroys_node() {
        let a = Observable::new(0);
        let seen = Rc::new(Cell::new(0));
        let s = Rc::clone(&seen);
        let node = Computed::with_stop((a.clone(),), move |(v,), _, stop| {
            s.set(*v);
            if *v >= 3 {
                stop.stop();
                assert!(stop.is_stopped());
            }
            *v
        })
        .unwrap();

        a.set(1);
        assert_eq!(node.get().unwrap(), 1);
        a.set(3);
        assert!(node.is_destroyed());
        assert_eq!(a.listener_count(), 0);
        a.set(4);
        assert_eq!(seen.get(), 3);
    }

    #[test]
    fn identity_short_circuit_skips_recompute() {
        let (count, seen) = counter();
        let a = Observable::new(1);
        let b = Observable::new(2);
        let node = Computed::new((a.clone(), b.clone()), move |(a, b), _| {
            count.set(count.get() + 1);
            *a + *b
        })
        .unwrap();
        assert_eq!(seen.get(), 1);

        a.stage_write(5);
        b.stage_write(6);
        a.commit_write();
        b.commit_write();
        assert_eq!(seen.get(), 2);
        assert_eq!(node.get().unwrap(), 11);
    }

    #[test]
    fn run_immediately_on_computed() {
        let a = Observable::new(4);
        let node = Computed::map(&a, |v| v * v).unwrap();
        let seen = Rc::new(Cell::new(0));
        let s = Rc::clone(&seen);
        let _ = node.on_change(move |new, old, _| s.set(new + old), true).unwrap();
        assert_eq!(seen.get(), 32);
    }

    #[test]
    fn dropping_last_handle_detaches_from_inputs() {
        let a = Observable::new(1);
        {
            let _node = Computed::map(&a, |v| *v).unwrap();
            assert_eq!(a.listener_count(), 1);
        }
        assert_eq!(a.listener_count(), 0);
        a.set(2);
    }

    #[test]
    fn compute_panic_propagates_and_node_recovers() {
        let a = Observable::new(1);
        let node = Computed::map(&a, |v| {
            assert!(*v != 13, "unlucky");
            *v
        })
        .unwrap();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| a.set(13)));
        assert!(result.is_err());
        assert_eq!(node.get().unwrap(), 1);

        a.set(2);
        assert_eq!(node.get().unwrap(), 2);
    }

    #[test]
    fn clone_shares_state() {
        let a = Observable::new(10);
        let c1 = Computed::map(&a, |v| v + 1).unwrap();
        let c2 = c1.clone();
        a.set(20);
        assert_eq!(c2.get().unwrap(), 21);
        c2.destroy();
        assert!(c1.is_destroyed());
    }

    #[test]
    fn debug_format() {
        let a = Observable::new(42);
        let node = Computed::map(&a, |v| *v).unwrap();
        let dbg = format!("{node:?}");
        assert!(dbg.contains("Computed"));
        assert!(dbg.contains("42"));
    }
}
