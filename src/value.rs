//! The value universe.
//!
//! Every collection element, key, and Ref value is a [`Value`]: a small
//! tagged enum over nil, scalars, strings, the persistent collections, seq
//! views, map entries, and STM refs. Collections are cheap to clone (their
//! interior is `Arc`-shared), so a `Value` is always passed and stored by
//! value.
//!
//! Three protocol-wide dispatches live here:
//!
//! - [`Value::equiv`] — structural equivalence (also exposed as `PartialEq`).
//! - [`Value::hash_value`] — Murmur3 hash with the ordered/unordered
//!   collection conventions and per-collection caching.
//! - [`Value::compare`] — the default total order used by the tree map:
//!   nil sorts below everything, numbers compare numerically across
//!   categories, strings lexicographically; anything else cannot be
//!   compared and faults.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::murmur3;
use crate::persistent::{
    MapEntry, PersistentHashMap, PersistentList, PersistentTreeMap, PersistentVector,
};
use crate::protocol::{seq_equiv, Seq};
use crate::stm::Ref;

/// A value in the shared universe.
///
/// `Int` and `Float` are distinct categories for equivalence (`1 ≠ 1.0`)
/// even though the default comparator orders them numerically.
#[derive(Clone, Debug)]
pub enum Value {
    /// The distinguished nil/absent value.
    Nil,
    /// A boolean.
    Bool(bool),
    /// A 64-bit signed integer.
    Int(i64),
    /// A 64-bit float.
    Float(f64),
    /// An immutable string.
    Str(Arc<str>),
    /// A persistent list (possibly the canonical empty list).
    List(PersistentList),
    /// A persistent vector.
    Vector(PersistentVector),
    /// A persistent hash map.
    HashMap(PersistentHashMap),
    /// A persistent sorted map.
    TreeMap(PersistentTreeMap),
    /// An immutable key/value pair.
    Entry(Arc<MapEntry>),
    /// A first-class sequence view.
    Seq(Seq),
    /// An STM ref handle.
    Ref(Ref),
}

impl Value {
    /// A string value.
    #[must_use]
    pub fn string(s: impl Into<Arc<str>>) -> Self {
        Value::Str(s.into())
    }

    /// Returns `true` for the nil value.
    #[inline]
    #[must_use]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// A seq over this value, or `None` when the collection is empty.
    ///
    /// Nil seqs to `None`; a map entry seqs as the pair `(key value)`.
    ///
    /// # Panics
    ///
    /// Panics when the value is a scalar with no sequence view.
    #[must_use]
    pub fn seq(&self) -> Option<Seq> {
        match self {
            Value::Nil => None,
            Value::List(list) => list.seq(),
            Value::Vector(vector) => vector.seq(),
            Value::HashMap(map) => map.seq(),
            Value::TreeMap(map) => map.seq(),
            Value::Entry(entry) => Some(entry.seq()),
            Value::Seq(seq) => Some(seq.clone()),
            other => panic!("value is not seqable: {other}"),
        }
    }

    /// The number of elements in a collection value.
    ///
    /// O(1) for counted collections, O(n) for seq views. Nil counts as 0.
    ///
    /// # Panics
    ///
    /// Panics when the value is a scalar that carries no count.
    #[must_use]
    pub fn count(&self) -> usize {
        match self {
            Value::Nil => 0,
            Value::List(list) => list.len(),
            Value::Vector(vector) => vector.len(),
            Value::HashMap(map) => map.len(),
            Value::TreeMap(map) => map.len(),
            Value::Entry(_) => 2,
            Value::Seq(seq) => seq.count(),
            other => panic!("count not supported on: {other}"),
        }
    }

    /// Structural equivalence.
    #[must_use]
    pub fn equiv(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Ref(a), Value::Ref(b)) => a.id() == b.id(),
            _ => {
                if self.is_map_like() && other.is_map_like() {
                    map_equiv(self, other)
                } else if self.is_sequential() && other.is_sequential() {
                    seq_equiv(self.seq(), other.seq())
                } else {
                    false
                }
            }
        }
    }

    /// The Murmur3 hash under the protocol conventions. Cached inside the
    /// collection instances; nil hashes to 0.
    #[must_use]
    pub fn hash_value(&self) -> u32 {
        match self {
            Value::Nil => 0,
            Value::Bool(b) => murmur3::hash_uint64(u64::from(*b)),
            Value::Int(i) => murmur3::hash_int64(*i),
            Value::Float(f) => murmur3::hash_uint64(f.to_bits()),
            Value::Str(s) => murmur3::hash_string(s),
            Value::List(list) => list.hash_value(),
            Value::Vector(vector) => vector.hash_value(),
            Value::HashMap(map) => map.hash_value(),
            Value::TreeMap(map) => map.hash_value(),
            Value::Entry(entry) => entry.hash_value(),
            Value::Seq(seq) => seq.hash_value(),
            Value::Ref(r) => murmur3::hash_uint64(r.id()),
        }
    }

    /// The default total order: nil below everything, numbers (booleans as
    /// 0/1) numerically across categories, strings lexicographically.
    ///
    /// # Panics
    ///
    /// Panics when the two values belong to categories that carry no
    /// ordering relative to each other (or a float comparison involves NaN).
    #[must_use]
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Nil, Value::Nil) => Ordering::Equal,
            (Value::Nil, _) => Ordering::Less,
            (_, Value::Nil) => Ordering::Greater,
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            _ => match (self.as_numeric(), other.as_numeric()) {
                (Some(a), Some(b)) => match a.partial_cmp(&b) {
                    Some(ordering) => ordering,
                    None => panic!("cannot compare {self} with {other}"),
                },
                _ => panic!("cannot compare {self} with {other}"),
            },
        }
    }

    /// The numeric view used for cross-category comparison.
    fn as_numeric(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            #[allow(clippy::cast_precision_loss)]
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    fn is_sequential(&self) -> bool {
        matches!(
            self,
            Value::List(_) | Value::Vector(_) | Value::Seq(_) | Value::Entry(_)
        )
    }

    fn is_map_like(&self) -> bool {
        matches!(self, Value::HashMap(_) | Value::TreeMap(_))
    }

    /// Map lookup shared by the two map kinds, `None` when absent.
    fn map_like_get(&self, key: &Value) -> Option<Value> {
        match self {
            Value::HashMap(map) => map.entry_at(key).map(|entry| entry.val().clone()),
            Value::TreeMap(map) => map.entry_at(key).map(|entry| entry.val().clone()),
            _ => None,
        }
    }
}

/// Map equivalence: counts match and every entry of `a` is present in `b`
/// with an equivalent value.
fn map_equiv(a: &Value, b: &Value) -> bool {
    if a.count() != b.count() {
        return false;
    }
    let mut current = a.seq();
    while let Some(seq) = current {
        let Value::Entry(entry) = seq.first() else {
            return false;
        };
        match b.map_like_get(entry.key()) {
            Some(found) if found.equiv(entry.val()) => {}
            _ => return false,
        }
        current = seq.next();
    }
    true
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.equiv(other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(formatter, "nil"),
            Value::Bool(b) => write!(formatter, "{b}"),
            Value::Int(i) => write!(formatter, "{i}"),
            Value::Float(f) => write!(formatter, "{f}"),
            Value::Str(s) => write!(formatter, "\"{s}\""),
            Value::List(_) | Value::Seq(_) => write_seq(formatter, self.seq(), "(", ")"),
            Value::Vector(_) | Value::Entry(_) => write_seq(formatter, self.seq(), "[", "]"),
            Value::HashMap(_) | Value::TreeMap(_) => {
                write!(formatter, "{{")?;
                let mut first = true;
                let mut current = self.seq();
                while let Some(seq) = current {
                    if !first {
                        write!(formatter, ", ")?;
                    }
                    first = false;
                    if let Value::Entry(entry) = seq.first() {
                        write!(formatter, "{} {}", entry.key(), entry.val())?;
                    }
                    current = seq.next();
                }
                write!(formatter, "}}")
            }
            Value::Ref(r) => write!(formatter, "#ref[{}]", r.id()),
        }
    }
}

fn write_seq(
    formatter: &mut fmt::Formatter<'_>,
    seq: Option<Seq>,
    open: &str,
    close: &str,
) -> fmt::Result {
    write!(formatter, "{open}")?;
    let mut first = true;
    let mut current = seq;
    while let Some(s) = current {
        if !first {
            write!(formatter, " ")?;
        }
        first = false;
        write!(formatter, "{}", s.first())?;
        current = s.next();
    }
    write!(formatter, "{close}")
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(Arc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(Arc::from(value))
    }
}
