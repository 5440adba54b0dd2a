//! The sequence protocol shared by every collection.
//!
//! A [`Seq`] is a non-empty, single-step-forward view over a collection:
//! `first` yields the head element, `next` the remaining view (or `None`
//! once exhausted). Seqs are first-class values — cheap to clone, shareable
//! across threads, and referentially transparent.
//!
//! Collections expose `seq()` returning `Option<Seq>`; `None` means empty.
//! The concrete implementations (list seqs, cons cells, trie node seqs,
//! tree seqs, chunked vector seqs) live next to their collections and plug
//! in through the [`SeqOps`] trait.
//!
//! This module also holds the shared comparison and hashing logic that the
//! protocol implies: element-wise seq equivalence, the ordered and unordered
//! collection hash conventions, and the atomic cached-hash cell collections
//! embed.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::murmur3;
use crate::persistent::PersistentList;
use crate::value::Value;

// =============================================================================
// SeqOps and the Seq handle
// =============================================================================

/// Behavior contract for a concrete sequence implementation.
///
/// Implementations must be non-empty: `first` always has an element to
/// return. Emptiness is expressed one level up, by `seq()` returning `None`.
pub trait SeqOps: fmt::Debug + Send + Sync {
    /// The head element.
    fn first(&self) -> Value;

    /// The view past the head, or `None` when this was the last element.
    fn next(&self) -> Option<Seq>;

    /// The length, when the implementation knows it in O(1).
    fn counted(&self) -> Option<usize> {
        None
    }

    /// The implementation's cached-hash cell, when it carries one.
    fn hash_cache(&self) -> Option<&CachedHash> {
        None
    }
}

/// A shared handle to a sequence view.
#[derive(Clone)]
pub struct Seq {
    inner: Arc<dyn SeqOps>,
}

impl Seq {
    /// Wraps a concrete sequence implementation.
    pub fn new(ops: impl SeqOps + 'static) -> Self {
        Self {
            inner: Arc::new(ops),
        }
    }

    /// The head element.
    #[must_use]
    pub fn first(&self) -> Value {
        self.inner.first()
    }

    /// The view past the head, or `None` when exhausted.
    #[must_use]
    pub fn next(&self) -> Option<Seq> {
        self.inner.next()
    }

    /// The view past the head, or the canonical empty list — never absent.
    #[must_use]
    pub fn more(&self) -> Value {
        match self.next() {
            Some(seq) => Value::Seq(seq),
            None => Value::List(PersistentList::new()),
        }
    }

    /// Prepends an element, producing a cons cell backed by this seq.
    #[must_use]
    pub fn cons(&self, element: Value) -> Seq {
        crate::persistent::Cons::new(element, Some(self.clone())).into_seq()
    }

    /// The number of elements. O(1) for counted implementations, otherwise
    /// walks the seq, short-circuiting as soon as a counted tail is reached.
    #[must_use]
    pub fn count(&self) -> usize {
        let mut walked = 0usize;
        let mut current = self.clone();
        loop {
            if let Some(known) = current.inner.counted() {
                return walked + known;
            }
            walked += 1;
            match current.next() {
                Some(rest) => current = rest,
                None => return walked,
            }
        }
    }

    /// The Murmur3 hash of this seq under the ordered convention, going
    /// through the implementation's cache when it has one.
    #[must_use]
    pub fn hash_value(&self) -> u32 {
        match self.inner.hash_cache() {
            Some(cache) => cache.get_or_compute(|| hash_ordered(Some(self.clone()))),
            None => hash_ordered(Some(self.clone())),
        }
    }

    /// An iterator over the elements, front to back.
    #[must_use]
    pub fn iter(&self) -> SeqIter {
        SeqIter {
            current: Some(self.clone()),
        }
    }
}

impl fmt::Debug for Seq {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_list().entries(self.iter()).finish()
    }
}

impl PartialEq for Seq {
    fn eq(&self, other: &Self) -> bool {
        seq_equiv(Some(self.clone()), Some(other.clone()))
    }
}

impl IntoIterator for &Seq {
    type Item = Value;
    type IntoIter = SeqIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// An iterator over the elements of a [`Seq`].
pub struct SeqIter {
    current: Option<Seq>,
}

impl Iterator for SeqIter {
    type Item = Value;

    fn next(&mut self) -> Option<Self::Item> {
        let seq = self.current.take()?;
        let element = seq.first();
        self.current = seq.next();
        Some(element)
    }
}

// =============================================================================
// Equivalence and counting over seqs
// =============================================================================

/// Returns `true` if two optional seqs are element-wise equivalent and end
/// simultaneously. Two absent seqs (both collections empty) are equivalent.
#[must_use]
pub fn seq_equiv(a: Option<Seq>, b: Option<Seq>) -> bool {
    let mut left = a;
    let mut right = b;
    loop {
        match (left, right) {
            (None, None) => return true,
            (Some(l), Some(r)) => {
                if !l.first().equiv(&r.first()) {
                    return false;
                }
                left = l.next();
                right = r.next();
            }
            _ => return false,
        }
    }
}

// =============================================================================
// Collection hash conventions
// =============================================================================

/// Ordered collection hash: `h = 31*h + hash(e)` over the elements starting
/// from 1, finalized with the element count. Seqs, lists, and vectors hash
/// this way, so equivalent sequential collections agree.
#[must_use]
pub fn hash_ordered(seq: Option<Seq>) -> u32 {
    let mut hash = 1u32;
    let mut count = 0u32;
    let mut current = seq;
    while let Some(s) = current {
        hash = hash.wrapping_mul(31).wrapping_add(s.first().hash_value());
        count += 1;
        current = s.next();
    }
    murmur3::finalize_coll_hash(hash, count)
}

/// Unordered collection hash: a plain sum of element hashes, finalized with
/// the element count. Maps hash this way over their entries.
#[must_use]
pub fn hash_unordered(seq: Option<Seq>) -> u32 {
    let mut hash = 0u32;
    let mut count = 0u32;
    let mut current = seq;
    while let Some(s) = current {
        hash = hash.wrapping_add(s.first().hash_value());
        count += 1;
        current = s.next();
    }
    murmur3::finalize_coll_hash(hash, count)
}

// =============================================================================
// Cached hashes
// =============================================================================

/// An atomically cached 32-bit hash. Zero means "not yet computed"; the
/// Murmur3 special case (zero hashes to zero, collections never finalize to
/// zero in practice) keeps the convention from pinning a legitimate hash.
///
/// Collections are shared freely between threads, so the cell is a relaxed
/// atomic: racing computations produce the same value and the second store
/// is harmless.
pub struct CachedHash(AtomicU32);

impl CachedHash {
    /// A fresh, not-yet-computed cell.
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    /// Returns the cached hash, computing and storing it on first use.
    pub fn get_or_compute(&self, compute: impl FnOnce() -> u32) -> u32 {
        let cached = self.0.load(Ordering::Relaxed);
        if cached != 0 {
            return cached;
        }
        let computed = compute();
        self.0.store(computed, Ordering::Relaxed);
        computed
    }
}

impl Default for CachedHash {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for CachedHash {
    fn clone(&self) -> Self {
        Self(AtomicU32::new(self.0.load(Ordering::Relaxed)))
    }
}

impl fmt::Debug for CachedHash {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_tuple("CachedHash")
            .field(&self.0.load(Ordering::Relaxed))
            .finish()
    }
}
