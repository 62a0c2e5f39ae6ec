#![forbid(unsafe_code)]

//! Writable source cells.
//!
//! # Design
//!
//! [`Observable<T>`] owns its value behind an `Rc<T>` so readers, listeners
//! and downstream snapshots share one allocation instead of cloning `T`. A
//! write that is [`DeepEq`]-equal to the current value is dropped; any other
//! write swaps the handle and notifies listeners before `set` returns.
//! Derived nodes reached by the notification settle before `set` returns too,
//! each once, in height order.
//!
//! Batching is supported through a staging slot. [`stage_write`] replaces the
//! value without notifying and remembers the value from before the first
//! stage; [`commit_write`] compares that remembered value with the final one
//! and notifies once if they differ. Intermediate staged values are never
//! observed by listeners.
//!
//! # Invariants
//!
//! 1. Version increments exactly once per notified change.
//! 2. Listeners see `(new, previous)` with `!new.deep_eq(previous)`.
//! 3. The staging slot is empty outside a batch.
//!
//! [`stage_write`]: Observable::stage_write
//! [`commit_write`]: Observable::commit_write

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::equality::DeepEq;
use crate::error::Result;
use crate::listeners::{CompactionPolicy, ListenerRegistry, NodeId, Subscription, Unsubscribe};
use crate::propagation::propagate;
use crate::readable::{Readable, attach};

struct ObservableInner<T> {
    id: NodeId,
    value: RefCell<Rc<T>>,
    /// Value from before the first staged write of the current batch.
    staged_from: RefCell<Option<Rc<T>>>,
    version: Cell<u64>,
    listeners: ListenerRegistry<T>,
}

/// A shared, writable value with change notification.
///
/// Cloning an `Observable` creates a new handle to the **same** value.
pub struct Observable<T> {
    inner: Rc<ObservableInner<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("id", &self.inner.id)
            .field("value", &self.inner.value.borrow())
            .field("version", &self.inner.version.get())
            .field("staged", &self.inner.staged_from.borrow().is_some())
            .finish()
    }
}

impl<T: DeepEq + 'static> Observable<T> {
    #[must_use]
    pub fn new(value: T) -> Self {
        Self::with_policy(value, CompactionPolicy::default())
    }

    /// Create an observable whose listener registry uses `policy`.
    #[must_use]
    pub fn with_policy(value: T, policy: CompactionPolicy) -> Self {
        let id = NodeId::next();
        Self {
            inner: Rc::new(ObservableInner {
                id,
                value: RefCell::new(Rc::new(value)),
                staged_from: RefCell::new(None),
                version: Cell::new(0),
                listeners: ListenerRegistry::for_node(id, policy),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Shared handle to the current value.
    #[must_use]
    pub fn read(&self) -> Rc<T> {
        Rc::clone(&self.inner.value.borrow())
    }

    /// Clone of the current value.
    #[must_use]
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        T::clone(&self.read())
    }

    /// Access the current value by reference.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.read())
    }

    /// Replace the value, notifying listeners if it changed.
    ///
    /// While the observable holds a staged value the write joins that batch
    /// instead and is reported when the batch commits.
    pub fn set(&self, value: T) {
        if self.is_staged() {
            self.stage_write(value);
            return;
        }
        let previous = self.read();
        if T::deep_eq(&previous, &value) {
            return;
        }
        let next = Rc::new(value);
        *self.inner.value.borrow_mut() = Rc::clone(&next);
        self.inner.version.set(self.inner.version.get() + 1);
        propagate(|| self.inner.listeners.notify(&next, &previous));
    }

    /// Compute a new value from the current one and [`set`](Self::set) it.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = f(&self.read());
        self.set(next);
    }

    /// Register a change listener. See [`Readable::on_change`].
    pub fn on_change<F>(&self, listener: F, run_immediately: bool) -> Unsubscribe
    where
        F: Fn(&T, &T, &Unsubscribe) + 'static,
    {
        let current = run_immediately.then(|| self.read());
        attach(&self.inner.listeners, current, listener)
    }

    /// Register a change listener guarded by a [`Subscription`].
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T, &T, &Unsubscribe) + 'static,
    {
        self.on_change(listener, false).into_guard()
    }

    /// Record `value` as pending without notifying.
    ///
    /// The value is visible to readers immediately. The first stage in a
    /// batch remembers the value it replaced; later stages only overwrite
    /// the pending value.
    pub fn stage_write(&self, value: T) {
        let current = self.read();
        {
            let mut staged_from = self.inner.staged_from.borrow_mut();
            if staged_from.is_none() {
                *staged_from = Some(current);
            }
        }
        *self.inner.value.borrow_mut() = Rc::new(value);
    }

    /// Finish a batch for this observable.
    ///
    /// Notifies once if the final value differs from the value before the
    /// batch and returns whether it did. Without a staged write this is a
    /// no-op returning `false`.
    pub fn commit_write(&self) -> bool {
        let Some(before) = self.inner.staged_from.borrow_mut().take() else {
            return false;
        };
        let after = self.read();
        if before.deep_eq(&after) {
            return false;
        }
        self.inner.version.set(self.inner.version.get() + 1);
        propagate(|| self.inner.listeners.notify(&after, &before));
        true
    }

    /// Drop the staging state without notifying. The staged value stays.
    pub(crate) fn abandon_staged(&self) {
        let before = self.inner.staged_from.borrow_mut().take();
        drop(before);
    }

    /// Whether a staged write is waiting for [`commit_write`](Self::commit_write).
    #[must_use]
    pub fn is_staged(&self) -> bool {
        self.inner.staged_from.borrow().is_some()
    }

    /// Number of notified changes so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Identity of the shared storage, for de-duplication.
    pub(crate) fn key(&self) -> *const () {
        Rc::as_ptr(&self.inner).cast()
    }

    /// Whether both handles refer to the same observable.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// A handle that can read and subscribe but not write.
    #[must_use]
    pub fn read_only(&self) -> ReadOnly<T> {
        ReadOnly {
            source: self.clone(),
        }
    }
}

impl<T: DeepEq + 'static> Readable for Observable<T> {
    type Value = T;

    fn node_id(&self) -> NodeId {
        self.id()
    }

    fn current(&self) -> Result<Rc<T>> {
        Ok(self.read())
    }

    fn on_change<F>(&self, listener: F, run_immediately: bool) -> Result<Unsubscribe>
    where
        F: Fn(&T, &T, &Unsubscribe) + 'static,
    {
        Ok(Observable::on_change(self, listener, run_immediately))
    }
}

/// Read-only view of an [`Observable`].
pub struct ReadOnly<T> {
    source: Observable<T>,
}

impl<T> Clone for ReadOnly<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ReadOnly<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReadOnly").field(&self.source).finish()
    }
}

impl<T: DeepEq + 'static> ReadOnly<T> {
    #[must_use]
    pub fn read(&self) -> Rc<T> {
        self.source.read()
    }

    #[must_use]
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.source.get()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.source.with(f)
    }

    pub fn on_change<F>(&self, listener: F, run_immediately: bool) -> Unsubscribe
    where
        F: Fn(&T, &T, &Unsubscribe) + 'static,
    {
        self.source.on_change(listener, run_immediately)
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T, &T, &Unsubscribe) + 'static,
    {
        self.source.subscribe(listener)
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.source.version()
    }
}

impl<T: DeepEq + 'static> Readable for ReadOnly<T> {
    type Value = T;

    fn node_id(&self) -> NodeId {
        self.source.id()
    }

    fn current(&self) -> Result<Rc<T>> {
        Ok(self.source.read())
    }

    fn on_change<F>(&self, listener: F, run_immediately: bool) -> Result<Unsubscribe>
    where
        F: Fn(&T, &T, &Unsubscribe) + 'static,
    {
        Ok(self.source.on_change(listener, run_immediately))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
