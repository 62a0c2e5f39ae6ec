#![forbid(unsafe_code)]

//! Structural equality used to decide whether a value actually changed.
//!
//! [`DeepEq`] differs from [`PartialEq`] in one place that matters for change
//! detection: floating point `NaN` is equal to itself, so writing `NaN` over
//! `NaN` is not a change. Containers compare element-wise (lengths must
//! match), maps compare key sets and then values per key, and `None` never
//! equals `Some`.
//!
//! User types opt in either with a manual impl or with [`impl_deep_eq!`],
//! which forwards to `PartialEq`.
//!
//! [`impl_deep_eq!`]: crate::impl_deep_eq

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::hash::{BuildHasher, Hash};
use std::rc::Rc;
use std::sync::Arc;

/// Recursive structural equality with `NaN == NaN`.
pub trait DeepEq {
    fn deep_eq(&self, other: &Self) -> bool;
}

/// Free-function form of [`DeepEq::deep_eq`].
#[inline]
pub fn deep_eq<T: DeepEq + ?Sized>(a: &T, b: &T) -> bool {
    a.deep_eq(b)
}

/// Implement [`DeepEq`] for types whose `PartialEq` is already structural.
///
/// ```
/// use ftui_reactive::{DeepEq, impl_deep_eq};
///
/// #[derive(PartialEq)]
/// struct Point { x: i32, y: i32 }
/// impl_deep_eq!(Point);
///
/// assert!(Point { x: 1, y: 2 }.deep_eq(&Point { x: 1, y: 2 }));
/// ```
#[macro_export]
macro_rules! impl_deep_eq {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::DeepEq for $ty {
                #[inline]
                fn deep_eq(&self, other: &Self) -> bool {
                    ::core::cmp::PartialEq::eq(self, other)
                }
            }
        )+
    };
}

impl_deep_eq!(
    (),
    bool,
    char,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    str,
    String,
);

macro_rules! float_deep_eq {
    ($($ty:ty),+) => {
        $(
            impl DeepEq for $ty {
                #[inline]
                #[allow(clippy::float_cmp)]
                fn deep_eq(&self, other: &Self) -> bool {
                    self == other || (self.is_nan() && other.is_nan())
                }
            }
        )+
    };
}

float_deep_eq!(f32, f64);

impl<T: DeepEq + ?Sized> DeepEq for &T {
    fn deep_eq(&self, other: &Self) -> bool {
        (**self).deep_eq(*other)
    }
}

impl<T: DeepEq + ?Sized> DeepEq for Box<T> {
    fn deep_eq(&self, other: &Self) -> bool {
        (**self).deep_eq(other)
    }
}

impl<T: DeepEq + ?Sized> DeepEq for Rc<T> {
    fn deep_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(self, other) || (**self).deep_eq(other)
    }
}

impl<T: DeepEq + ?Sized> DeepEq for Arc<T> {
    fn deep_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other) || (**self).deep_eq(other)
    }
}

impl<T: DeepEq> DeepEq for Option<T> {
    fn deep_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.deep_eq(b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T: DeepEq> DeepEq for [T] {
    fn deep_eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a.deep_eq(b))
    }
}

impl<T: DeepEq, const N: usize> DeepEq for [T; N] {
    fn deep_eq(&self, other: &Self) -> bool {
        self.as_slice().deep_eq(other.as_slice())
    }
}

impl<T: DeepEq> DeepEq for Vec<T> {
    fn deep_eq(&self, other: &Self) -> bool {
        self.as_slice().deep_eq(other.as_slice())
    }
}

impl<T: DeepEq> DeepEq for VecDeque<T> {
    fn deep_eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a.deep_eq(b))
    }
}

impl<K: Ord, V: DeepEq> DeepEq for BTreeMap<K, V> {
    fn deep_eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(k, v)| other.get(k).is_some_and(|w| v.deep_eq(w)))
    }
}

impl<K: Eq + Hash, V: DeepEq, S: BuildHasher> DeepEq for HashMap<K, V, S> {
    fn deep_eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(k, v)| other.get(k).is_some_and(|w| v.deep_eq(w)))
    }
}

impl<T: Ord> DeepEq for BTreeSet<T> {
    fn deep_eq(&self, other: &Self) -> bool {
        self == other
    }
}

impl<T: Eq + Hash, S: BuildHasher> DeepEq for HashSet<T, S> {
    fn deep_eq(&self, other: &Self) -> bool {
        self == other
    }
}

macro_rules! tuple_deep_eq {
    ($(($($name:ident . $idx:tt),+)),+ $(,)?) => {
        $(
            impl<$($name: DeepEq),+> DeepEq for ($($name,)+) {
                fn deep_eq(&self, other: &Self) -> bool {
                    $(self.$idx.deep_eq(&other.$idx))&&+
                }
            }
        )+
    };
}

tuple_deep_eq!(
    (A.0),
    (A.0, B.1),
    (A.0, B.1, C.2),
    (A.0, B.1, C.2, D.3),
    (A.0, B.1, C.2, D.3, E.4),
    (A.0, B.1, C.2, D.3, E.4, F.5),
);

/// JSON documents are the dynamically typed case: arrays compare
/// element-wise, objects compare key sets and values, and any variant
/// mismatch (including `null` against a non-null value) is unequal.
impl DeepEq for serde_json::Value {
    fn deep_eq(&self, other: &Self) -> bool {
        use serde_json::Value;
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) if a.is_f64() || b.is_f64() => x.deep_eq(&y),
                _ => a == b,
            },
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a.as_slice().deep_eq(b.as_slice()),
            (Value::Object(a), Value::Object(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|w| v.deep_eq(w)))
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nan_equals_nan() {
        assert!(f64::NAN.deep_eq(&f64::NAN));
        assert!(f32::NAN.deep_eq(&f32::NAN));
        assert!(!f64::NAN.deep_eq(&1.0));
        assert!(1.5f64.deep_eq(&1.5));
    }

    #[test]
    fn sequences_require_equal_length() {
        assert!(vec![1, 2, 3].deep_eq(&vec![1, 2, 3]));
        assert!(!vec![1, 2].deep_eq(&vec![1, 2, 3]));
        assert!(!vec![1, 2, 4].deep_eq(&vec![1, 2, 3]));
        assert!(vec![f64::NAN].deep_eq(&vec![f64::NAN]));
        assert!([1u8, 2].deep_eq(&[1u8, 2]));
    }

    #[test]
    fn nested_containers_compare_recursively() {
        let a = vec![Some(vec![1.0, f64::NAN]), None];
        let b = vec![Some(vec![1.0, f64::NAN]), None];
        let c = vec![Some(vec![1.0, f64::NAN]), Some(vec![])];
        assert!(a.deep_eq(&b));
        assert!(!a.deep_eq(&c));
    }

    #[test]
    fn maps_compare_key_sets_and_values() {
        let a: BTreeMap<&str, i32> = [("a", 1), ("b", 2)].into();
        let b: BTreeMap<&str, i32> = [("b", 2), ("a", 1)].into();
        let c: BTreeMap<&str, i32> = [("a", 1), ("c", 2)].into();
        assert!(a.deep_eq(&b));
        assert!(!a.deep_eq(&c));

        let h1: HashMap<String, Vec<f32>> = [("k".to_string(), vec![f32::NAN])].into();
        let h2: HashMap<String, Vec<f32>> = [("k".to_string(), vec![f32::NAN])].into();
        assert!(h1.deep_eq(&h2));
    }

    #[test]
    fn none_is_not_some() {
        assert!(!Some(0).deep_eq(&None));
        assert!(Option::<i32>::None.deep_eq(&None));
    }

    #[test]
    fn tuples_compare_each_field() {
        assert!((1, "a", 2.0).deep_eq(&(1, "a", 2.0)));
        assert!(!(1, "a", 2.0).deep_eq(&(1, "b", 2.0)));
    }

    #[test]
    fn shared_pointers_compare_contents() {
        let a = Rc::new(vec![1, 2]);
        let b = Rc::new(vec![1, 2]);
        assert!(a.deep_eq(&b));
        assert!(a.deep_eq(&Rc::clone(&a)));
    }

    #[test]
    fn json_objects_ignore_key_order() {
        let a = json!({"w": 100, "h": [1, 2, {"x": null}]});
        let b = json!({"h": [1, 2, {"x": null}], "w": 100});
        assert!(a.deep_eq(&b));
    }

    #[test]
    fn json_type_mismatch_is_unequal() {
        assert!(!json!(null).deep_eq(&json!(0)));
        assert!(!json!([1]).deep_eq(&json!({"0": 1})));
        assert!(!json!({"a": 1}).deep_eq(&json!({"a": 1, "b": 2})));
        assert!(!json!("1").deep_eq(&json!(1)));
    }

    #[test]
    fn json_numbers_compare_by_value() {
        assert!(json!(1.5).deep_eq(&json!(1.5)));
        assert!(!json!(1).deep_eq(&json!(2)));
        assert!(json!(1.0).deep_eq(&json!(1.0)));
    }
}
