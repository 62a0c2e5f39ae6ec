#![forbid(unsafe_code)]

//! Listener storage shared by [`Observable`] and [`Computed`].
//!
//! # Design
//!
//! Listeners live in an append-only vector of slots. Registration pushes a
//! slot tagged with a fresh [`ListenerId`]; removal replaces the callback
//! with a tombstone and never shifts other slots. Ids are strictly increasing
//! along the vector, so an [`Unsubscribe`] handle finds its slot by binary
//! search even after compaction has squeezed tombstones out.
//!
//! A notification pass walks the slots by position up to the length observed
//! when the pass started. Listeners registered during the pass land past that
//! bound and first fire on the next pass. Compaction is deferred while any
//! pass (including a re-entrant one) is in flight, so positions stay stable
//! for the whole walk.
//!
//! # Invariants
//!
//! 1. Live listeners fire in registration order.
//! 2. A slot tombstoned before the walk reaches it is skipped.
//! 3. Unsubscribing twice, or after the registry is gone, is a no-op.
//! 4. `live <= slots.len()` and every tombstone counts towards compaction.
//!
//! # Failure Modes
//!
//! - **Listener panics**: the panic unwinds to the writer. Listeners after it
//!   in the same pass do not run. The pass depth is restored by a drop guard,
//!   so the registry stays usable.
//!
//! [`Observable`]: crate::Observable
//! [`Computed`]: crate::Computed

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

// ─── Identifiers ─────────────────────────────────────────────────────────────

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a reactive node, used in logs and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u64);

impl NodeId {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub(crate) fn next() -> Self {
        Self(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Stable identity of one registration inside a [`ListenerRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

// ─── Compaction policy ───────────────────────────────────────────────────────

/// When a registry squeezes tombstones out of its slot vector.
///
/// Compaction runs once the slot count exceeds `high_water` and the share of
/// tombstones is strictly greater than `numerator / denominator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionPolicy {
    high_water: usize,
    numerator: usize,
    denominator: usize,
}

impl Default for CompactionPolicy {
    fn default() -> Self {
        Self {
            high_water: 1000,
            numerator: 3,
            denominator: 4,
        }
    }
}

impl CompactionPolicy {
    /// Never compact.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            high_water: usize::MAX,
            numerator: 1,
            denominator: 1,
        }
    }

    #[must_use]
    pub const fn with_high_water(mut self, slots: usize) -> Self {
        self.high_water = slots;
        self
    }

    /// Tombstone share that must be exceeded. A zero denominator is treated
    /// as one.
    #[must_use]
    pub const fn with_tombstone_ratio(mut self, numerator: usize, denominator: usize) -> Self {
        self.numerator = numerator;
        self.denominator = if denominator == 0 { 1 } else { denominator };
        self
    }

    #[must_use]
    pub const fn high_water(&self) -> usize {
        self.high_water
    }

    #[must_use]
    pub const fn tombstone_ratio(&self) -> (usize, usize) {
        (self.numerator, self.denominator)
    }

    fn should_compact(&self, slots: usize, live: usize) -> bool {
        let tombstones = slots - live;
        slots > self.high_water
            && tombstones.saturating_mul(self.denominator) > slots.saturating_mul(self.numerator)
    }
}

// ─── Unsubscribe handles ─────────────────────────────────────────────────────

trait Detach {
    fn detach(&self, id: ListenerId);
}

/// Handle that removes one listener. Cloneable and idempotent.
///
/// The handle holds only a weak reference, so it never keeps a node alive and
/// turns into a no-op once the registry is gone.
#[derive(Clone)]
pub struct Unsubscribe {
    target: Weak<dyn Detach>,
    id: ListenerId,
}

impl Unsubscribe {
    /// Remove the listener. Safe to call any number of times.
    pub fn unsubscribe(&self) {
        if let Some(target) = self.target.upgrade() {
            target.detach(self.id);
        }
    }

    #[must_use]
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Wrap the handle in a guard that unsubscribes on drop.
    #[must_use]
    pub fn into_guard(self) -> Subscription {
        Subscription {
            handle: self,
            armed: true,
        }
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("id", &self.id)
            .field("attached", &(self.target.strong_count() > 0))
            .finish()
    }
}

/// RAII guard that removes its listener when dropped.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    handle: Unsubscribe,
    armed: bool,
}

impl Subscription {
    /// Unsubscribe now instead of at drop.
    pub fn unsubscribe(self) {
        drop(self);
    }

    /// Give up the guard and keep the listener registered.
    #[must_use]
    pub fn into_handle(mut self) -> Unsubscribe {
        self.armed = false;
        self.handle.clone()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.armed {
            self.handle.unsubscribe();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("handle", &self.handle)
            .field("armed", &self.armed)
            .finish()
    }
}

// ─── Registry ────────────────────────────────────────────────────────────────

type Callback<T> = Rc<dyn Fn(&T, &T, &Unsubscribe)>;

struct Slot<T> {
    id: ListenerId,
    callback: Option<Callback<T>>,
}

struct State<T> {
    slots: Vec<Slot<T>>,
    live: usize,
    next_id: u64,
    /// Notification passes currently walking `slots`.
    depth: usize,
}

struct Core<T> {
    owner: NodeId,
    policy: CompactionPolicy,
    state: RefCell<State<T>>,
}

impl<T> Core<T> {
    fn position(state: &State<T>, id: ListenerId) -> Option<usize> {
        state.slots.binary_search_by_key(&id, |slot| slot.id).ok()
    }

    fn compact_if_needed(&self, state: &mut State<T>) {
        if state.depth > 0 || !self.policy.should_compact(state.slots.len(), state.live) {
            return;
        }
        let before = state.slots.len();
        state.slots.retain(|slot| slot.callback.is_some());
        tracing::debug!(
            message = "listeners.compact",
            node = self.owner.raw(),
            before,
            after = state.slots.len()
        );
    }
}

impl<T> Detach for Core<T> {
    fn detach(&self, id: ListenerId) {
        let removed = {
            let mut state = self.state.borrow_mut();
            let removed = Self::position(&state, id).and_then(|pos| state.slots[pos].callback.take());
            if removed.is_some() {
                state.live -= 1;
                self.compact_if_needed(&mut state);
            }
            removed
        };
        // Captured state may itself unsubscribe on drop; release the borrow first.
        drop(removed);
    }
}

/// Ordered set of change listeners with O(1) registration and removal.
pub struct ListenerRegistry<T> {
    core: Rc<Core<T>>,
}

impl<T: 'static> Default for ListenerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> ListenerRegistry<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_policy(CompactionPolicy::default())
    }

    #[must_use]
    pub fn with_policy(policy: CompactionPolicy) -> Self {
        Self::for_node(NodeId::next(), policy)
    }

    pub(crate) fn for_node(owner: NodeId, policy: CompactionPolicy) -> Self {
        Self {
            core: Rc::new(Core {
                owner,
                policy,
                state: RefCell::new(State {
                    slots: Vec::new(),
                    live: 0,
                    next_id: 0,
                    depth: 0,
                }),
            }),
        }
    }

    fn handle(&self, id: ListenerId) -> Unsubscribe {
        let core: Weak<Core<T>> = Rc::downgrade(&self.core);
        let target: Weak<dyn Detach> = core;
        Unsubscribe { target, id }
    }

    /// Append a listener. The returned handle removes exactly this listener.
    pub fn register(&self, callback: impl Fn(&T, &T, &Unsubscribe) + 'static) -> Unsubscribe {
        let id = {
            let mut state = self.core.state.borrow_mut();
            let id = ListenerId(state.next_id);
            state.next_id += 1;
            state.slots.push(Slot {
                id,
                callback: Some(Rc::new(callback)),
            });
            state.live += 1;
            id
        };
        self.handle(id)
    }

    /// Invoke every live listener with `(new, previous, its_unsubscribe)`.
    ///
    /// Listeners added during the pass are not invoked by it.
    pub fn notify(&self, new: &T, previous: &T) {
        let end = {
            let mut state = self.core.state.borrow_mut();
            state.depth += 1;
            state.slots.len()
        };
        let _pass = PassGuard { core: &self.core };
        tracing::trace!(
            message = "listeners.notify",
            node = self.core.owner.raw(),
            slots = end
        );

        for pos in 0..end {
            let entry = {
                let state = self.core.state.borrow();
                state
                    .slots
                    .get(pos)
                    .and_then(|slot| slot.callback.clone().map(|cb| (slot.id, cb)))
            };
            if let Some((id, callback)) = entry {
                callback(new, previous, &self.handle(id));
            }
        }
    }

    /// Drop every listener. Previously issued handles become no-ops.
    pub fn clear(&self) {
        let removed: Vec<Callback<T>> = {
            let mut state = self.core.state.borrow_mut();
            state.live = 0;
            if state.depth > 0 {
                state
                    .slots
                    .iter_mut()
                    .filter_map(|slot| slot.callback.take())
                    .collect()
            } else {
                state
                    .slots
                    .drain(..)
                    .filter_map(|slot| slot.callback)
                    .collect()
            }
        };
        drop(removed);
    }

    /// Number of live listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.core.state.borrow().live
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of slots including tombstones.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.core.state.borrow().slots.len()
    }

    #[must_use]
    pub fn policy(&self) -> CompactionPolicy {
        self.core.policy
    }
}

impl<T> fmt::Debug for ListenerRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.core.state.borrow();
        f.debug_struct("ListenerRegistry")
            .field("owner", &self.core.owner)
            .field("live", &state.live)
            .field("slots", &state.slots.len())
            .finish()
    }
}

/// Closes a notification pass, even when a listener unwinds.
struct PassGuard<'a, T> {
    core: &'a Core<T>,
}

impl<T> Drop for PassGuard<'_, T> {
    fn drop(&mut self) {
        let mut state = self.core.state.borrow_mut();
        state.depth -= 1;
        self.core.compact_if_needed(&mut state);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
