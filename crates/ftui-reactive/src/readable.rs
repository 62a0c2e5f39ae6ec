#![forbid(unsafe_code)]

//! The capability shared by every node a [`Computed`] can depend on.
//!
//! [`Computed`]: crate::Computed

use std::rc::Rc;

use crate::error::Result;
use crate::listeners::{ListenerRegistry, NodeId, Subscription, Unsubscribe};

/// Read access plus change subscription.
///
/// Implemented by [`Observable`], [`ReadOnly`] and [`Computed`]. Handles are
/// cheap to clone and clones refer to the same node.
///
/// [`Observable`]: crate::Observable
/// [`ReadOnly`]: crate::ReadOnly
/// [`Computed`]: crate::Computed
pub trait Readable: Clone + 'static {
    type Value: 'static;

    fn node_id(&self) -> NodeId;

    /// Longest path from a source cell to this node. Source cells are 0.
    fn height(&self) -> u32 {
        0
    }

    /// Shared handle to the current value.
    fn current(&self) -> Result<Rc<Self::Value>>;

    /// Register `listener`, called with `(new, previous, unsubscribe)` after
    /// every change. With `run_immediately` it is also called once, before
    /// this returns, with the current value in both positions.
    fn on_change<F>(&self, listener: F, run_immediately: bool) -> Result<Unsubscribe>
    where
        F: Fn(&Self::Value, &Self::Value, &Unsubscribe) + 'static;

    /// Like [`on_change`](Self::on_change) but returns a guard that
    /// unsubscribes on drop.
    fn subscribe<F>(&self, listener: F) -> Result<Subscription>
    where
        F: Fn(&Self::Value, &Self::Value, &Unsubscribe) + 'static,
    {
        Ok(self.on_change(listener, false)?.into_guard())
    }
}

/// Register on `registry`, optionally replaying `current` to the new listener.
pub(crate) fn attach<T, F>(
    registry: &ListenerRegistry<T>,
    current: Option<Rc<T>>,
    listener: F,
) -> Unsubscribe
where
    T: 'static,
    F: Fn(&T, &T, &Unsubscribe) + 'static,
{
    let Some(value) = current else {
        return registry.register(listener);
    };
    let listener = Rc::new(listener);
    let registered = Rc::clone(&listener);
    let handle = registry.register(move |new, old, unsub| registered(new, old, unsub));
    listener(&value, &value, &handle);
    handle
}
