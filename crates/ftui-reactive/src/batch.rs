#![forbid(unsafe_code)]

//! Batched writes across several observables.
//!
//! A [`Batch`] stages every write immediately (values become readable right
//! away) and holds back all notifications. Committing walks the distinct
//! observables in the order they first appeared and lets each one notify
//! once, comparing its final value with the value from before the batch.
//!
//! Derived nodes reached while committing wait until every observable in the
//! batch has committed, then settle in height order. Each dependent, direct
//! or through other derived nodes, recomputes at most once per batch, sees
//! the complete new state, and notifies at most once with the net change.
//!
//! A batch owns the observables it staged first. Writing through a second
//! open batch (or through [`Observable::set`]) to an observable another batch
//! already staged joins the owning batch: the write is reported when that
//! batch commits.
//!
//! # Failure Modes
//!
//! - **Listener panics during commit**: the panic unwinds out of
//!   [`Batch::commit`]. Observables not yet committed keep their staged
//!   values but drop their staging state without notifying.
//! - **Compute function panics while settling**: every observable has
//!   committed by then. Derived nodes not yet settled keep their previous
//!   values and recompute on the next change of an input.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::rc::Rc;

use crate::equality::DeepEq;
use crate::observable::Observable;
use crate::propagation::propagate;

/// Type-erased staged observable.
trait Staged {
    fn commit(&self) -> bool;
    fn abandon(&self);
}

impl<T: DeepEq + 'static> Staged for Observable<T> {
    fn commit(&self) -> bool {
        self.commit_write()
    }

    fn abandon(&self) {
        self.abandon_staged();
    }
}

/// A set of writes applied as one transaction.
///
/// Dropping an uncommitted batch commits it.
///
/// ```
/// use ftui_reactive::{Batch, Computed, Observable};
///
/// let w = Observable::new(100);
/// let h = Observable::new(10);
/// let area = Computed::new((w.clone(), h.clone()), |(w, h), _| *w * *h).unwrap();
/// let _guard = area
///     .subscribe(|_, _, _| panic!("area did not change"))
///     .unwrap();
///
/// let mut batch = Batch::new();
/// batch.set(&w, 50).set(&h, 20);
/// batch.commit();
///
/// assert_eq!(area.get().unwrap(), 1000);
/// ```
#[must_use = "a batch notifies when committed or dropped"]
pub struct Batch {
    pending: VecDeque<Rc<dyn Staged>>,
    seen: HashSet<*const ()>,
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}

impl Batch {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    /// Stage `value` for `target`. Later writes to the same observable in
    /// this batch replace earlier ones.
    ///
    /// If another open batch already staged `target`, the write joins that
    /// batch and this one does not commit it.
    pub fn set<T: DeepEq + 'static>(&mut self, target: &Observable<T>, value: T) -> &mut Self {
        let key = target.key();
        let owned = self.seen.contains(&key) || !target.is_staged();
        target.stage_write(value);
        if owned && self.seen.insert(key) {
            self.pending.push_back(Rc::new(target.clone()));
        }
        self
    }

    /// Stage `f(current)` for `target`, reading the value staged so far.
    pub fn update<T: DeepEq + 'static>(
        &mut self,
        target: &Observable<T>,
        f: impl FnOnce(&T) -> T,
    ) -> &mut Self {
        let next = f(&target.read());
        self.set(target, next)
    }

    /// Number of distinct observables staged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Notify for every observable whose value changed across the batch.
    ///
    /// Returns the number of observables that notified.
    pub fn commit(mut self) -> usize {
        self.flush()
    }

    fn flush(&mut self) -> usize {
        let cells = self.pending.len();
        let changed = propagate(|| {
            let mut changed = 0;
            while let Some(staged) = self.pending.pop_front() {
                if staged.commit() {
                    changed += 1;
                }
            }
            changed
        });
        self.seen.clear();
        tracing::debug!(message = "batch.commit", cells, changed);
        changed
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        if std::thread::panicking() {
            let abandoned = self.pending.len();
            for staged in self.pending.drain(..) {
                staged.abandon();
            }
            tracing::warn!(message = "batch.abandon", cells = abandoned);
            return;
        }
        self.flush();
    }
}

impl fmt::Debug for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Apply `pairs` as one batch and commit it.
///
/// Returns the number of observables that notified.
pub fn set_many<'a, T, I>(pairs: I) -> usize
where
    T: DeepEq + 'static,
    I: IntoIterator<Item = (&'a Observable<T>, T)>,
{
    let mut batch = Batch::new();
    for (target, value) in pairs {
        batch.set(target, value);
    }
    batch.commit()
}

/// Run `f` against a fresh batch and commit it when `f` returns.
pub fn batch<R>(f: impl FnOnce(&mut Batch) -> R) -> R {
    let mut batch = Batch::new();
    let out = f(&mut batch);
    batch.commit();
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
