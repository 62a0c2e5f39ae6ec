#![forbid(unsafe_code)]

//! Reactive cells and derived values for FrankenTUI.
//!
//! This crate provides a small, synchronous propagation engine:
//!
//! - [`Observable`]: a shared, writable value with change notification.
//! - [`Computed`]: a read-only value derived from other readables, recomputed
//!   eagerly when they change and destroyable on demand.
//! - [`ListenerRegistry`]: the listener storage both of them use, with
//!   idempotent [`Unsubscribe`] handles and tombstone compaction.
//! - [`Batch`] / [`set_many`]: several writes applied as one transaction so
//!   that every dependent recomputes and notifies at most once.
//!
//! # Architecture
//!
//! Nodes use `Rc<..>` with interior mutability for single-threaded shared
//! ownership. Edges point one way only: a `Computed` holds its inputs and a
//! listener on each of them, while an input only knows the listener (which
//! refers back to the node weakly).
//!
//! Change detection uses [`DeepEq`]: a write or recomputation whose result is
//! structurally equal to the previous value notifies nobody.
//!
//! Derived nodes do not recompute inside the notification that reached them.
//! They queue by height and settle, lowest first, before the write (or the
//! batch commit) returns, so no node ever computes over a half-updated graph.
//!
//! # Invariants
//!
//! 1. Listeners fire synchronously, inside the call that made the change.
//! 2. Listeners on a node fire in registration order.
//! 3. Writing a value deep-equal to the current value is a no-op.
//! 4. A batch notifies each listener at most once, with the net change. This
//!    holds for derived nodes at any depth, not only direct dependents.
//! 5. A derived node recomputes only after every node it reads has settled.
//! 6. Reading or subscribing to a destroyed `Computed` fails with
//!    [`ReactiveError::Destroyed`].
//!
//! # Example
//!
//! ```
//! use ftui_reactive::{Computed, cell, set_many};
//!
//! let width = cell(10);
//! let height = cell(20);
//! let area = Computed::new((width.clone(), height.clone()), |(w, h), _| *w * *h).unwrap();
//! assert_eq!(area.get().unwrap(), 200);
//!
//! set_many([(&width, 5), (&height, 8)]);
//! assert_eq!(area.get().unwrap(), 40);
//! ```

pub mod batch;
pub mod computed;
pub mod equality;
pub mod error;
pub mod inputs;
pub mod listeners;
pub mod observable;
mod propagation;
pub mod readable;

pub use batch::{Batch, batch, set_many};
pub use computed::{Computed, Stop};
pub use equality::{DeepEq, deep_eq};
pub use error::{ReactiveError, Result};
pub use inputs::{InputSink, Inputs};
pub use listeners::{
    CompactionPolicy, ListenerId, ListenerRegistry, NodeId, Subscription, Unsubscribe,
};
pub use observable::{Observable, ReadOnly};
pub use readable::Readable;

/// Create an [`Observable`] holding `initial`.
#[must_use]
pub fn cell<T: DeepEq + 'static>(initial: T) -> Observable<T> {
    Observable::new(initial)
}

/// Create one [`Observable`] per initial value, in order.
#[must_use]
pub fn cells<T, I>(initials: I) -> Vec<Observable<T>>
where
    T: DeepEq + 'static,
    I: IntoIterator<Item = T>,
{
    initials.into_iter().map(Observable::new).collect()
}

/// Create a [`Computed`] over `inputs`. See [`Computed::new`].
///
/// # Errors
///
/// [`ReactiveError::Destroyed`] if any input is a destroyed node.
pub fn derived<T, I, F>(compute: F, inputs: I) -> Result<Computed<T>>
where
    T: DeepEq + 'static,
    I: Inputs,
    F: Fn(I::Snapshot, Option<&T>) -> T + 'static,
{
    Computed::new(inputs, compute)
}

/// Read-only view of `source`.
#[must_use]
pub fn read_only<T: DeepEq + 'static>(source: &Observable<T>) -> ReadOnly<T> {
    source.read_only()
}
