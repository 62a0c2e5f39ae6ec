#![forbid(unsafe_code)]

//! Input sets for [`Computed`] nodes.
//!
//! An [`Inputs`] value is the list of upstream [`Readable`]s a computation
//! depends on, together with the snapshot type handed to the compute
//! function. Three shapes are provided:
//!
//! - tuples of up to six readables of any value types, addressed by position;
//! - `Vec<R>` of readables sharing one value type, addressed by index;
//! - `BTreeMap<K, R>`, addressed by key.
//!
//! Snapshots hold `Rc` handles to upstream values. Each slot of a snapshot
//! has an address, and a notification whose value lives at the same address
//! is one the node has already observed.
//!
//! [`Computed`]: crate::Computed

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::error::Result;
use crate::listeners::Unsubscribe;
use crate::readable::Readable;

/// Receives upstream notifications on behalf of a computed node.
pub struct InputSink {
    forward: Rc<dyn Fn(usize, *const ())>,
}

impl InputSink {
    pub(crate) fn new(forward: impl Fn(usize, *const ()) + 'static) -> Self {
        Self {
            forward: Rc::new(forward),
        }
    }

    /// Listener to register on the upstream at `slot`.
    pub fn listener<V: 'static>(&self, slot: usize) -> impl Fn(&V, &V, &Unsubscribe) + 'static {
        let forward = Rc::clone(&self.forward);
        move |new: &V, _: &V, _: &Unsubscribe| forward(slot, address(new))
    }
}

/// Address used for identity comparison of observed values.
#[inline]
pub(crate) fn address<V>(value: &V) -> *const () {
    std::ptr::from_ref(value).cast()
}

/// A fixed set of upstream readables.
pub trait Inputs: 'static {
    /// Upstream values as passed to the compute function.
    type Snapshot: Clone + 'static;

    /// Number of upstream slots.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest [`Readable::height`] among the upstreams.
    fn height(&self) -> u32;

    /// Read every upstream. Fails if any upstream is destroyed.
    fn snapshot(&self) -> Result<Self::Snapshot>;

    /// Re-read every upstream into `snapshot`. Upstreams that can no longer
    /// be read keep their previous entry; the count of those is returned.
    fn refresh(&self, snapshot: &mut Self::Snapshot) -> usize;

    /// Address of the value held at `slot`.
    fn slot_address(snapshot: &Self::Snapshot, slot: usize) -> Option<*const ()>;

    /// Subscribe `sink` to every upstream, in slot order.
    fn subscribe(&self, sink: &InputSink) -> Result<Vec<Unsubscribe>>;
}

/// Unsubscribe everything collected so far and hand back the error.
fn rollback<T>(handles: &[Unsubscribe], err: crate::ReactiveError) -> Result<T> {
    for handle in handles {
        handle.unsubscribe();
    }
    Err(err)
}

fn subscribe_all<'a, R, I>(readables: I, sink: &InputSink) -> Result<Vec<Unsubscribe>>
where
    R: Readable,
    I: IntoIterator<Item = &'a R>,
{
    let mut handles = Vec::new();
    for (slot, readable) in readables.into_iter().enumerate() {
        match readable.on_change(sink.listener::<R::Value>(slot), false) {
            Ok(handle) => handles.push(handle),
            Err(err) => return rollback(&handles, err),
        }
    }
    Ok(handles)
}

macro_rules! tuple_inputs {
    ($(($len:expr; $($name:ident . $idx:tt),+)),+ $(,)?) => {
        $(
            impl<$($name: Readable),+> Inputs for ($($name,)+) {
                type Snapshot = ($(Rc<<$name as Readable>::Value>,)+);

                fn len(&self) -> usize {
                    $len
                }

                fn height(&self) -> u32 {
                    0u32 $(.max(self.$idx.height()))+
                }

                fn snapshot(&self) -> Result<Self::Snapshot> {
                    Ok(($(self.$idx.current()?,)+))
                }

                fn refresh(&self, snapshot: &mut Self::Snapshot) -> usize {
                    let mut stale = 0;
                    $(
                        match self.$idx.current() {
                            Ok(value) => snapshot.$idx = value,
                            Err(_) => stale += 1,
                        }
                    )+
                    stale
                }

                fn slot_address(snapshot: &Self::Snapshot, slot: usize) -> Option<*const ()> {
                    match slot {
                        $($idx => Some(address(&*snapshot.$idx)),)+
                        _ => None,
                    }
                }

                fn subscribe(&self, sink: &InputSink) -> Result<Vec<Unsubscribe>> {
                    let mut handles = Vec::with_capacity($len);
                    $(
                        match self.$idx.on_change(sink.listener::<<$name as Readable>::Value>($idx), false) {
                            Ok(handle) => handles.push(handle),
                            Err(err) => return rollback(&handles, err),
                        }
                    )+
                    Ok(handles)
                }
            }
        )+
    };
}

tuple_inputs!(
    (1; A.0),
    (2; A.0, B.1),
    (3; A.0, B.1, C.2),
    (4; A.0, B.1, C.2, D.3),
    (5; A.0, B.1, C.2, D.3, E.4),
    (6; A.0, B.1, C.2, D.3, E.4, F.5),
);

impl<R: Readable> Inputs for Vec<R> {
    type Snapshot = Vec<Rc<R::Value>>;

    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn height(&self) -> u32 {
        self.iter().map(Readable::height).max().unwrap_or(0)
    }

    fn snapshot(&self) -> Result<Self::Snapshot> {
        self.iter().map(Readable::current).collect()
    }

    fn refresh(&self, snapshot: &mut Self::Snapshot) -> usize {
        let mut stale = 0;
        for (readable, entry) in self.iter().zip(snapshot.iter_mut()) {
            match readable.current() {
                Ok(value) => *entry = value,
                Err(_) => stale += 1,
            }
        }
        stale
    }

    fn slot_address(snapshot: &Self::Snapshot, slot: usize) -> Option<*const ()> {
        snapshot.get(slot).map(|value| address(&**value))
    }

    fn subscribe(&self, sink: &InputSink) -> Result<Vec<Unsubscribe>> {
        subscribe_all(self.iter(), sink)
    }
}

impl<K, R> Inputs for BTreeMap<K, R>
where
    K: Ord + Clone + 'static,
    R: Readable,
{
    type Snapshot = BTreeMap<K, Rc<R::Value>>;

    fn len(&self) -> usize {
        BTreeMap::len(self)
    }

    fn height(&self) -> u32 {
        self.values().map(Readable::height).max().unwrap_or(0)
    }

    fn snapshot(&self) -> Result<Self::Snapshot> {
        self.iter()
            .map(|(key, readable)| Ok((key.clone(), readable.current()?)))
            .collect()
    }

    fn refresh(&self, snapshot: &mut Self::Snapshot) -> usize {
        let mut stale = 0;
        for (readable, entry) in self.values().zip(snapshot.values_mut()) {
            match readable.current() {
                Ok(value) => *entry = value,
                Err(_) => stale += 1,
            }
        }
        stale
    }

    fn slot_address(snapshot: &Self::Snapshot, slot: usize) -> Option<*const ()> {
        snapshot.values().nth(slot).map(|value| address(&**value))
    }

    fn subscribe(&self, sink: &InputSink) -> Result<Vec<Unsubscribe>> {
        subscribe_all(self.values(), sink)
    }
}
