#![forbid(unsafe_code)]

//! Settling derived nodes after a write.
//!
//! Every write that notifies runs inside a propagation scope. A [`Computed`]
//! reached during the scope is not recomputed on the spot: it marks itself
//! dirty and is queued by height (source cells sit at height 0, a derived
//! node one above its highest input). When the outermost scope closes, the
//! queue drains lowest height first, so a node recomputes only after every
//! node it reads from has settled. Nested scopes only queue.
//!
//! The scope lives in a thread-local, like the notification context of a
//! batch scope: nodes are `Rc`-based and never leave their thread.
//!
//! # Failure Modes
//!
//! - **Compute function or listener panics while draining**: the scope guard
//!   drops every node still queued without recomputing it. Those nodes keep
//!   their previous value and recompute on the next change of an input.
//!
//! [`Computed`]: crate::Computed

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// A derived node waiting for its inputs to settle.
pub(crate) trait Dirty {
    /// Recompute from fresh inputs and notify if the output changed.
    fn settle(self: Rc<Self>);
    /// Clear the queued mark without recomputing.
    fn discard(&self);
}

#[derive(Default)]
struct Scheduler {
    /// Open propagation scopes on this thread.
    depth: usize,
    seq: u64,
    /// Keyed by `(height, arrival)`.
    queue: BTreeMap<(u32, u64), Rc<dyn Dirty>>,
}

thread_local! {
    static SCHEDULER: RefCell<Scheduler> = RefCell::new(Scheduler::default());
}

/// Queue `node` for the outermost scope. Callers de-duplicate.
pub(crate) fn enqueue(height: u32, node: Rc<dyn Dirty>) {
    SCHEDULER.with_borrow_mut(|scheduler| {
        let seq = scheduler.seq;
        scheduler.seq = scheduler.seq.wrapping_add(1);
        scheduler.queue.insert((height, seq), node);
    });
}

/// Run `f` inside a propagation scope. The outermost scope settles every
/// queued node before returning.
pub(crate) fn propagate<R>(f: impl FnOnce() -> R) -> R {
    let outermost = SCHEDULER.with_borrow_mut(|scheduler| {
        scheduler.depth += 1;
        scheduler.depth == 1
    });
    let _scope = Scope;
    let out = f();
    if outermost {
        let mut settled = 0usize;
        while let Some(node) = next_dirty() {
            node.settle();
            settled += 1;
        }
        if settled > 0 {
            tracing::trace!(message = "propagation.settle", nodes = settled);
        }
    }
    out
}

fn next_dirty() -> Option<Rc<dyn Dirty>> {
    SCHEDULER.with_borrow_mut(|scheduler| scheduler.queue.pop_first().map(|(_, node)| node))
}

/// Whether the current thread is inside a propagation scope.
#[cfg(test)]
pub(crate) fn in_scope() -> bool {
    SCHEDULER.with_borrow(|scheduler| scheduler.depth > 0)
}

/// Closes a scope, even when a compute function or listener unwinds.
struct Scope;

impl Drop for Scope {
    fn drop(&mut self) {
        let abandoned = SCHEDULER.with_borrow_mut(|scheduler| {
            scheduler.depth -= 1;
            if scheduler.depth == 0 {
                std::mem::take(&mut scheduler.queue)
            } else {
                BTreeMap::new()
            }
        });
        if abandoned.is_empty() {
            return;
        }
        tracing::warn!(message = "propagation.abandon", nodes = abandoned.len());
        for node in abandoned.values() {
            node.discard();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    struct Recorder {
        name: &'static str,
        log: Rc<RefCell<Vec<&'static str>>>,
        queued: Cell<bool>,
    }

    impl Dirty for Recorder {
        fn settle(self: Rc<Self>) {
            self.queued.set(false);
            self.log.borrow_mut().push(self.name);
        }

        fn discard(&self) {
            self.queued.set(false);
        }
    }

    fn node(name: &'static str, log: &Rc<RefCell<Vec<&'static str>>>) -> Rc<Recorder> {
        Rc::new(Recorder {
            name,
            log: Rc::clone(log),
            queued: Cell::new(true),
        })
    }

    #[test]
    fn drains_lowest_height_first() {
        let log = Rc::new(RefCell::new(Vec::new()));
        propagate(|| {
            enqueue(3, node("d", &log));
            enqueue(1, node("a", &log));
            enqueue(2, node("b", &log));
            enqueue(1, node("c", &log));
        });
        assert_eq!(*log.borrow(), vec!["a", "c", "b", "d"]);
        assert!(!in_scope());
    }

    #[test]
    fn nested_scope_defers_to_outermost() {
        let log = Rc::new(RefCell::new(Vec::new()));
        propagate(|| {
            propagate(|| enqueue(1, node("inner", &log)));
            assert!(log.borrow().is_empty());
        });
        assert_eq!(*log.borrow(), vec!["inner"]);
    }

    #[test]
    fn panic_discards_queued_nodes() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let waiting = node("waiting", &log);
        let queued: Rc<dyn Dirty> = waiting.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            propagate(|| {
                enqueue(1, queued);
                panic!("write failed");
            })
        }));
        assert!(result.is_err());
        assert!(!in_scope());
        assert!(!waiting.queued.get());
        assert!(log.borrow().is_empty());

        propagate(|| {});
        assert!(log.borrow().is_empty());
    }
}
