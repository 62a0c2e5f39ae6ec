#![no_main]

use std::cell::RefCell;
use std::rc::Rc;

use arbitrary::Arbitrary;
use ftui_reactive::{CompactionPolicy, ListenerRegistry, Unsubscribe};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
enum Op {
    Register,
    /// Listener that unsubscribes the handle at the given index when it runs.
    RegisterRemover(u8),
    /// Listener that registers another listener when it runs.
    RegisterSpawner,
    Unsubscribe(u8),
    Notify,
    Clear,
}

#[derive(Arbitrary, Debug)]
struct Input {
    high_water: u8,
    ops: Vec<Op>,
}

fuzz_target!(|input: Input| {
    let policy = CompactionPolicy::default().with_high_water(usize::from(input.high_water));
    let registry = Rc::new(ListenerRegistry::<u32>::with_policy(policy));
    let handles: Rc<RefCell<Vec<Unsubscribe>>> = Rc::new(RefCell::new(Vec::new()));

    for op in input.ops.into_iter().take(512) {
        match op {
            Op::Register => {
                let handle = registry.register(|_, _, _| {});
                handles.borrow_mut().push(handle);
            }
            Op::RegisterRemover(target) => {
                let hs = Rc::clone(&handles);
                let handle = registry.register(move |_, _, _| {
                    let victim = hs.borrow().get(usize::from(target)).cloned();
                    if let Some(victim) = victim {
                        victim.unsubscribe();
                    }
                });
                handles.borrow_mut().push(handle);
            }
            Op::RegisterSpawner => {
                let weak = Rc::downgrade(&registry);
                let handle = registry.register(move |_, _, me| {
                    if let Some(registry) = weak.upgrade() {
                        let _ = registry.register(|_, _, _| {});
                    }
                    me.unsubscribe();
                });
                handles.borrow_mut().push(handle);
            }
            Op::Unsubscribe(i) => {
                let handle = handles.borrow().get(usize::from(i)).cloned();
                if let Some(handle) = handle {
                    handle.unsubscribe();
                }
            }
            Op::Notify => registry.notify(&1, &0),
            Op::Clear => registry.clear(),
        }
        assert!(registry.len() <= registry.slot_count());
    }
});
