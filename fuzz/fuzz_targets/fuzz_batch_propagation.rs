#![no_main]

use std::cell::Cell;
use std::rc::Rc;

use arbitrary::Arbitrary;
use ftui_reactive::{Batch, Computed, Observable};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
enum Op {
    Set { cell: u8, value: i8 },
    Batch(Vec<(u8, i8)>),
}

fuzz_target!(|ops: Vec<Op>| {
    let cells: Vec<_> = (0..4).map(|_| Observable::new(0i64)).collect();
    let computes = Rc::new(Cell::new(0u32));
    let c = Rc::clone(&computes);
    let sum = Computed::new(cells.clone(), move |values, _| {
        c.set(c.get() + 1);
        values.iter().map(|v| **v).sum::<i64>()
    })
    .expect("inputs are live");
    let doubled = Computed::map(&sum, |v| v * 2).expect("input is live");

    for op in ops.into_iter().take(256) {
        computes.set(0);
        match op {
            Op::Set { cell, value } => {
                cells[usize::from(cell) % cells.len()].set(i64::from(value));
                assert!(computes.get() <= 1);
            }
            Op::Batch(pairs) => {
                let mut batch = Batch::new();
                for (cell, value) in pairs.into_iter().take(32) {
                    batch.set(&cells[usize::from(cell) % cells.len()], i64::from(value));
                }
                batch.commit();
                assert!(computes.get() <= 1);
            }
        }
        let expected: i64 = cells.iter().map(Observable::get).sum();
        assert_eq!(sum.get().expect("live"), expected);
        assert_eq!(doubled.get().expect("live"), expected * 2);
        assert!(cells.iter().all(|cell| !cell.is_staged()));
    }
});
