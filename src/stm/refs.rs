//! Transactional refs: versioned cells coordinated by the STM.
//!
//! A [`Ref`] holds a history of committed values ordered newest-first, each
//! stamped with the commit point that produced it. Readers that started
//! before a commit keep seeing the older entry through the history walk —
//! that is the snapshot-isolation half of the MVCC scheme; write-write
//! conflicts are resolved by the per-Ref write lock in the transaction
//! engine.
//!
//! The history is bounded by `[min_history, max_history]` (defaults 0/10).
//! It grows only when a transaction reports a *fault* — a read that found
//! no entry old enough — and otherwise recycles its oldest slot in place,
//! so an uncontended Ref stays at a single entry.

use std::collections::VecDeque;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock, RwLockReadGuard};

use crate::value::Value;

use super::idgen::IdGenerator;
use super::transaction::TxInfo;

/// Owned read guard over a Ref's history, held across `ensure`.
pub(crate) type HistoryReadGuard = ArcRwLockReadGuard<RawRwLock, History>;

/// Owned write guard over a Ref's history, held across the commit phase.
pub(crate) type HistoryWriteGuard = ArcRwLockWriteGuard<RawRwLock, History>;

/// Default upper bound on the history ring.
const DEFAULT_MAX_HISTORY: usize = 10;

static REF_IDS: IdGenerator = IdGenerator::new();

/// One committed value and the point it was committed at.
#[derive(Debug, Clone)]
pub(crate) struct TVal {
    pub(crate) val: Value,
    pub(crate) point: u64,
}

/// The lock-protected state of a Ref: the value history (newest first,
/// never empty) and the write intent of an in-progress transaction.
#[derive(Debug)]
pub(crate) struct History {
    tvals: VecDeque<TVal>,
    tinfo: Option<Arc<TxInfo>>,
}

impl History {
    fn newest(&self) -> &TVal {
        self.tvals.front().expect("ref history is never empty")
    }

    /// The most recently committed value.
    pub(crate) fn newest_val(&self) -> Value {
        self.newest().val.clone()
    }

    /// The commit point of the most recent value.
    pub(crate) fn newest_point(&self) -> u64 {
        self.newest().point
    }

    /// The newest value committed at or before `point`, walking the ring
    /// from newest to oldest.
    pub(crate) fn val_at_or_before(&self, point: u64) -> Option<Value> {
        self.tvals
            .iter()
            .find(|tval| tval.point <= point)
            .map(|tval| tval.val.clone())
    }

    /// The transaction currently intending to write this Ref, if any.
    pub(crate) fn tinfo(&self) -> Option<&Arc<TxInfo>> {
        self.tinfo.as_ref()
    }

    pub(crate) fn set_tinfo(&mut self, tinfo: Option<Arc<TxInfo>>) {
        self.tinfo = tinfo;
    }

    /// Ring entries beyond the head.
    fn hist_count(&self) -> usize {
        self.tvals.len() - 1
    }

    /// Installs a committed value: grows the ring when a fault was recorded
    /// (or the minimum demands it), otherwise recycles the oldest slot.
    pub(crate) fn set_value(
        &mut self,
        val: Value,
        point: u64,
        min_history: usize,
        max_history: usize,
        faults: &AtomicU32,
    ) {
        let hist_count = self.hist_count();
        if (faults.load(Ordering::Acquire) > 0 && hist_count < max_history)
            || hist_count < min_history
        {
            self.tvals.push_front(TVal { val, point });
            faults.store(0, Ordering::Release);
        } else if let Some(mut oldest) = self.tvals.pop_back() {
            oldest.val = val;
            oldest.point = point;
            self.tvals.push_front(oldest);
        }
    }
}

struct RefInner {
    id: u64,
    history: Arc<RwLock<History>>,
    faults: AtomicU32,
    min_history: AtomicUsize,
    max_history: AtomicUsize,
}

/// A mutable cell whose value history is versioned by commit points.
///
/// Reads outside a transaction ([`deref`](Ref::deref)) see the newest
/// committed value. All writes go through a running
/// [`Transaction`](super::Transaction). A Ref is a handle: clones refer to
/// the same cell, and equality/hashing go by the unique id, never by value.
///
/// # Examples
///
/// ```rust
/// use stemma::{run_in_transaction, Ref, Value};
///
/// let counter = Ref::new(Value::from(0));
/// run_in_transaction(|tx| {
///     let current = tx.get(&counter)?;
///     let Value::Int(i) = current else { unreachable!() };
///     tx.set(&counter, Value::from(i + 1))
/// })
/// .unwrap();
/// assert_eq!(counter.deref(), Value::from(1));
/// ```
#[derive(Clone)]
pub struct Ref {
    inner: Arc<RefInner>,
}

impl Ref {
    /// A new Ref bound to `initial` at point 0.
    #[must_use]
    pub fn new(initial: Value) -> Self {
        let mut tvals = VecDeque::with_capacity(1);
        tvals.push_front(TVal {
            val: initial,
            point: 0,
        });
        Self {
            inner: Arc::new(RefInner {
                id: REF_IDS.next(),
                history: Arc::new(RwLock::new(History { tvals, tinfo: None })),
                faults: AtomicU32::new(0),
                min_history: AtomicUsize::new(0),
                max_history: AtomicUsize::new(DEFAULT_MAX_HISTORY),
            }),
        }
    }

    /// The unique id of this cell.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The newest committed value, read outside any transaction. Inside a
    /// transaction use [`Transaction::get`](super::Transaction::get), which
    /// reads at the transaction's snapshot instead.
    #[must_use]
    pub fn deref(&self) -> Value {
        self.inner.history.read().newest_val()
    }

    /// The number of history entries beyond the newest.
    #[must_use]
    pub fn history_count(&self) -> usize {
        self.inner.history.write().hist_count()
    }

    /// The lower bound on the history ring.
    #[must_use]
    pub fn min_history(&self) -> usize {
        self.inner.min_history.load(Ordering::Acquire)
    }

    /// The upper bound on the history ring.
    #[must_use]
    pub fn max_history(&self) -> usize {
        self.inner.max_history.load(Ordering::Acquire)
    }

    /// Sets the lower bound on the history ring.
    pub fn set_min_history(&self, min_history: usize) -> &Self {
        self.inner.min_history.store(min_history, Ordering::Release);
        self
    }

    /// Sets the upper bound on the history ring.
    pub fn set_max_history(&self, max_history: usize) -> &Self {
        self.inner.max_history.store(max_history, Ordering::Release);
        self
    }

    /// Records that a transactional read found no entry old enough; the
    /// next commit grows the ring instead of recycling.
    pub fn add_fault(&self) {
        self.inner.faults.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn faults(&self) -> &AtomicU32 {
        &self.inner.faults
    }

    /// Blocking shared lock, owned guard (held across `ensure`).
    pub(crate) fn lock_read_arc(&self) -> HistoryReadGuard {
        self.inner.history.read_arc()
    }

    /// Shared lock that may be re-entered by a thread already holding a
    /// read guard for this Ref (a transaction reading a Ref it ensured).
    pub(crate) fn lock_read_recursive(&self) -> RwLockReadGuard<'_, History> {
        self.inner.history.read_recursive()
    }

    /// Bounded exclusive lock; `None` on timeout.
    pub(crate) fn try_lock_write_for(&self, timeout: Duration) -> Option<HistoryWriteGuard> {
        self.inner.history.try_write_arc_for(timeout)
    }
}

impl PartialEq for Ref {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Ref {}

impl Hash for Ref {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Ref {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Ref")
            .field("id", &self.inner.id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn test_new_ref_is_bound_at_point_zero() {
        let r = Ref::new(Value::from(12));
        assert_eq!(r.deref(), Value::from(12));
        assert_eq!(r.history_count(), 0);
    }

    #[rstest]
    fn test_refs_are_identity_not_value() {
        let a = Ref::new(Value::from(1));
        let b = Ref::new(Value::from(1));
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert_ne!(a.id(), b.id());
    }

    #[rstest]
    fn test_history_recycles_without_faults() {
        let r = Ref::new(Value::from(0));
        {
            let mut history = r.inner.history.write();
            history.set_value(Value::from(1), 1, r.min_history(), r.max_history(), r.faults());
            history.set_value(Value::from(2), 2, r.min_history(), r.max_history(), r.faults());
        }
        assert_eq!(r.deref(), Value::from(2));
        assert_eq!(r.history_count(), 0);
    }

    #[rstest]
    fn test_fault_grows_the_ring_and_resets() {
        let r = Ref::new(Value::from(0));
        r.add_fault();
        {
            let mut history = r.inner.history.write();
            history.set_value(Value::from(1), 1, r.min_history(), r.max_history(), r.faults());
        }
        assert_eq!(r.history_count(), 1);
        assert_eq!(r.faults().load(Ordering::Acquire), 0);
        let history = r.inner.history.read();
        assert_eq!(history.val_at_or_before(0), Some(Value::from(0)));
        assert_eq!(history.val_at_or_before(1), Some(Value::from(1)));
    }

    #[rstest]
    fn test_min_history_grows_without_faults() {
        let r = Ref::new(Value::from(0));
        r.set_min_history(2);
        {
            let mut history = r.inner.history.write();
            history.set_value(Value::from(1), 1, r.min_history(), r.max_history(), r.faults());
            history.set_value(Value::from(2), 2, r.min_history(), r.max_history(), r.faults());
            history.set_value(Value::from(3), 3, r.min_history(), r.max_history(), r.faults());
        }
        assert_eq!(r.history_count(), 2);
    }

    #[rstest]
    fn test_val_at_or_before_misses_when_all_entries_are_newer() {
        let r = Ref::new(Value::from(0));
        {
            let mut history = r.inner.history.write();
            history.set_value(Value::from(5), 5, 0, 10, r.faults());
        }
        let history = r.inner.history.read();
        assert_eq!(history.val_at_or_before(4), None);
    }
}
