//! The MVCC locking transaction.
//!
//! A transaction reads at its *read point* (a fresh draw from the global
//! point counter on every attempt) and publishes all of its writes at a
//! single *commit point*, so its effects become visible atomically with
//! respect to later read-point acquisitions. Conflicts never surface to the
//! caller: they raise the internal [`StmError::Retry`] sentinel, which the
//! run loop converts into another attempt, up to [`RETRY_LIMIT`].
//!
//! Conflict resolution:
//!
//! - Write-write races collapse via each Ref's write lock, acquired with a
//!   bounded wait of [`LOCK_WAIT`].
//! - A transaction that finds a *running* rival holding write intent on a
//!   Ref may **barge** it — kill it with a status CAS — but only when it is
//!   older (smaller start point) and at least [`BARGE_WAIT`] has elapsed
//!   since its own start. Otherwise it stops, waits briefly on the rival's
//!   latch (`block_and_bail`), and retries.
//! - `ensure` takes and holds a read lock so no writer can commit the Ref
//!   before this transaction does, closing the write-skew window.
//! - `commute` defers its function to the commit phase, where it is
//!   re-applied to the then-current value — cheap, contention-friendly
//!   updates for commutative operations.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::value::Value;

use super::idgen::IdGenerator;
use super::latch::CountDownLatch;
use super::refs::{HistoryReadGuard, HistoryWriteGuard, Ref};
use super::{CommuteFn, StmError};

/// Attempts before [`StmError::RetryLimitReached`] is returned.
pub const RETRY_LIMIT: usize = 10_000;

/// Bound on write-lock acquisition and on `block_and_bail` latch waits.
pub const LOCK_WAIT: Duration = Duration::from_millis(100);

/// Minimum transaction age before it may barge a rival.
pub const BARGE_WAIT: Duration = Duration::from_nanos(10);

/// The global point counter: read points and commit points draw from one
/// stream, totally ordering all transactions.
static POINT_COUNTER: IdGenerator = IdGenerator::new();

// =============================================================================
// Transaction status
// =============================================================================

/// Lifecycle states of a transaction attempt.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u32)]
pub(crate) enum TxStatus {
    Running = 0,
    Committing = 1,
    Retry = 2,
    Killed = 3,
    Committed = 4,
}

impl TxStatus {
    fn from_u32(value: u32) -> Self {
        match value {
            0 => TxStatus::Running,
            1 => TxStatus::Committing,
            2 => TxStatus::Retry,
            3 => TxStatus::Killed,
            4 => TxStatus::Committed,
            other => unreachable!("invalid transaction status: {other}"),
        }
    }

    fn is_running(self) -> bool {
        matches!(self, TxStatus::Running | TxStatus::Committing)
    }
}

/// The shared, externally visible state of one transaction attempt: its
/// status, its start point (for barge seniority), and a one-shot latch that
/// is released on any transition out of the running states.
#[derive(Debug)]
pub(crate) struct TxInfo {
    status: AtomicU32,
    start_point: u64,
    pub(crate) latch: CountDownLatch,
}

impl TxInfo {
    fn new(status: TxStatus, start_point: u64) -> Self {
        Self {
            status: AtomicU32::new(status as u32),
            start_point,
            latch: CountDownLatch::new(1),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        TxStatus::from_u32(self.status.load(Ordering::Acquire)).is_running()
    }

    fn cas_status(&self, from: TxStatus, to: TxStatus) -> bool {
        self.status
            .compare_exchange(from as u32, to as u32, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn swap_status(&self, to: TxStatus) -> TxStatus {
        TxStatus::from_u32(self.status.swap(to as u32, Ordering::AcqRel))
    }
}

/// A queued commute: the function and its extra arguments, applied in
/// order at commit time.
struct Commute {
    function: CommuteFn,
    args: Vec<Value>,
}

// =============================================================================
// Transaction
// =============================================================================

/// A running MVCC transaction, handed to the body closure by
/// [`run_in_transaction`].
///
/// All Ref access inside the body goes through this handle; the `Result`
/// returns thread conflict signals back to the run loop, so bodies
/// propagate them with `?`.
pub struct Transaction {
    info: Option<Arc<TxInfo>>,
    read_point: u64,
    start_point: u64,
    start_time: Instant,
    /// Last value this transaction produced for each Ref (sets and
    /// commutes).
    vals: HashMap<Ref, Value>,
    /// Refs written with `set`.
    sets: HashSet<Ref>,
    /// Per-Ref commute queues, in application order.
    commutes: HashMap<Ref, Vec<Commute>>,
    /// Read locks held by `ensure` until the attempt ends.
    ensures: HashMap<Ref, HistoryReadGuard>,
}

/// Runs `body` in a transaction, retrying on conflict, and returns its
/// result after a successful commit.
///
/// # Errors
///
/// [`StmError::RetryLimitReached`] after [`RETRY_LIMIT`] failed attempts;
/// [`StmError::Aborted`] when the body called
/// [`abort`](Transaction::abort); [`StmError::SetAfterCommute`] when the
/// body set a Ref it had already commuted.
pub fn run_in_transaction<F>(mut body: F) -> Result<Value, StmError>
where
    F: FnMut(&mut Transaction) -> Result<Value, StmError>,
{
    Transaction::new().run(&mut body)
}

impl Transaction {
    fn new() -> Self {
        Self {
            info: None,
            read_point: 0,
            start_point: 0,
            start_time: Instant::now(),
            vals: HashMap::new(),
            sets: HashSet::new(),
            commutes: HashMap::new(),
            ensures: HashMap::new(),
        }
    }

    fn running(&self) -> bool {
        self.info.as_ref().is_some_and(|info| info.is_running())
    }

    /// The read point of the current attempt; all reads observe the world
    /// as of this point.
    #[must_use]
    pub fn read_point(&self) -> u64 {
        self.read_point
    }

    // -------------------------------------------------------------------------
    // Run loop
    // -------------------------------------------------------------------------

    fn run(
        &mut self,
        body: &mut dyn FnMut(&mut Transaction) -> Result<Value, StmError>,
    ) -> Result<Value, StmError> {
        for attempt in 0..RETRY_LIMIT {
            self.read_point = POINT_COUNTER.next();
            if attempt == 0 {
                self.start_point = self.read_point;
                self.start_time = Instant::now();
            }
            self.info = Some(Arc::new(TxInfo::new(TxStatus::Running, self.start_point)));

            let result = body(self).and_then(|ret| self.commit().map(|()| ret));
            // Release ensure read locks before stopping, in all outcomes.
            self.ensures.clear();
            match result {
                Ok(ret) => {
                    self.stop(TxStatus::Committed);
                    return Ok(ret);
                }
                Err(StmError::Retry) => {
                    self.stop(TxStatus::Retry);
                    trace!(attempt, "transaction conflict, retrying");
                }
                Err(error) => {
                    self.stop(TxStatus::Retry);
                    return Err(error);
                }
            }
        }
        Err(StmError::RetryLimitReached)
    }

    /// Ends the current attempt: publishes the final status, releases the
    /// latch exactly once, and drops the attempt's bookkeeping.
    fn stop(&mut self, status: TxStatus) {
        if let Some(info) = self.info.take() {
            let previous = info.swap_status(status);
            if previous.is_running() {
                info.latch.count_down();
            }
            self.vals.clear();
            self.sets.clear();
            self.commutes.clear();
        }
    }

    /// Kills the transaction; every Ref it touched is left unchanged.
    ///
    /// # Errors
    ///
    /// Always returns [`StmError::Aborted`], for the body to propagate.
    pub fn abort(&mut self) -> Result<Value, StmError> {
        self.stop(TxStatus::Killed);
        Err(StmError::Aborted)
    }

    // -------------------------------------------------------------------------
    // Ref operations
    // -------------------------------------------------------------------------

    /// The value of `r` at this transaction's snapshot, or the last value
    /// this transaction wrote to it.
    ///
    /// # Errors
    ///
    /// [`StmError::Retry`] when the snapshot is no longer available (the
    /// Ref's history has no entry at or before the read point) or the
    /// transaction is no longer running.
    pub fn get(&mut self, r: &Ref) -> Result<Value, StmError> {
        if !self.running() {
            return Err(StmError::Retry);
        }
        if let Some(val) = self.vals.get(r) {
            return Ok(val.clone());
        }
        {
            let history = r.lock_read_recursive();
            if let Some(val) = history.val_at_or_before(self.read_point) {
                return Ok(val);
            }
        }
        // No version old enough: record the fault so the next commit grows
        // the history ring, and retry with a fresh read point.
        r.add_fault();
        Err(StmError::Retry)
    }

    /// Sets `r` to `val` within this transaction.
    ///
    /// # Errors
    ///
    /// [`StmError::SetAfterCommute`] when `r` was already commuted in this
    /// transaction; [`StmError::Retry`] on conflict.
    pub fn set(&mut self, r: &Ref, val: Value) -> Result<Value, StmError> {
        if !self.running() {
            return Err(StmError::Retry);
        }
        if self.commutes.contains_key(r) {
            return Err(StmError::SetAfterCommute);
        }
        if !self.sets.contains(r) {
            self.sets.insert(r.clone());
            self.lock_ref(r)?;
        }
        self.vals.insert(r.clone(), val.clone());
        Ok(val)
    }

    /// Sets `r` to `function(get(r), args)`.
    ///
    /// # Errors
    ///
    /// As [`get`](Self::get) and [`set`](Self::set).
    pub fn alter(&mut self, r: &Ref, function: &CommuteFn, args: &[Value]) -> Result<Value, StmError> {
        let current = self.get(r)?;
        self.set(r, function(&current, args))
    }

    /// Queues `function` to be re-applied to `r`'s then-current value at
    /// commit time, and applies it to the in-transaction value now.
    ///
    /// # Errors
    ///
    /// [`StmError::Retry`] when the transaction is no longer running.
    pub fn commute(
        &mut self,
        r: &Ref,
        function: CommuteFn,
        args: &[Value],
    ) -> Result<Value, StmError> {
        if !self.running() {
            return Err(StmError::Retry);
        }
        if !self.vals.contains_key(r) {
            // Lockless best-effort pre-read of the current value.
            let val = {
                let history = r.lock_read_recursive();
                history.newest_val()
            };
            self.vals.insert(r.clone(), val);
        }
        self.commutes.entry(r.clone()).or_default().push(Commute {
            function: function.clone(),
            args: args.to_vec(),
        });
        let current = self
            .vals
            .get(r)
            .cloned()
            .unwrap_or(Value::Nil);
        let ret = function(&current, args);
        self.vals.insert(r.clone(), ret.clone());
        Ok(ret)
    }

    /// Declares that `r` must not be written by others before this
    /// transaction commits, by holding its read lock.
    ///
    /// # Errors
    ///
    /// [`StmError::Retry`] when someone already committed past our read
    /// point or a rival writer holds the Ref.
    pub fn ensure(&mut self, r: &Ref) -> Result<(), StmError> {
        if !self.running() {
            return Err(StmError::Retry);
        }
        if self.ensures.contains_key(r) {
            return Ok(());
        }
        let guard = r.lock_read_arc();

        // Someone completed a write after our snapshot.
        if guard.newest_point() > self.read_point {
            drop(guard);
            return Err(StmError::Retry);
        }

        if let Some(refinfo) = guard.tinfo().cloned() {
            if refinfo.is_running() {
                drop(guard);
                if !self.is_our_info(&refinfo) {
                    // A rival writer exists: this ensure is doomed.
                    return Err(self.block_and_bail(&refinfo));
                }
                return Ok(());
            }
        }
        self.ensures.insert(r.clone(), guard);
        Ok(())
    }

    fn is_our_info(&self, other: &Arc<TxInfo>) -> bool {
        self.info
            .as_ref()
            .is_some_and(|info| Arc::ptr_eq(info, other))
    }

    // -------------------------------------------------------------------------
    // Locking and barging
    // -------------------------------------------------------------------------

    /// Acquires `r`'s write lock briefly to stamp this transaction's write
    /// intent, resolving any rival by barging or bailing. Returns the
    /// newest committed value.
    fn lock_ref(&mut self, r: &Ref) -> Result<Value, StmError> {
        // A read lock cannot be upgraded, so release any ensure first.
        self.ensures.remove(r);

        let info = self.info.clone().ok_or(StmError::Retry)?;
        let mut guard = r.try_lock_write_for(LOCK_WAIT).ok_or(StmError::Retry)?;

        if guard.newest_point() > self.read_point {
            // Someone committed past our snapshot.
            return Err(StmError::Retry);
        }

        if let Some(refinfo) = guard.tinfo().cloned() {
            if refinfo.is_running() && !Arc::ptr_eq(&refinfo, &info) {
                if !self.barge(&refinfo) {
                    drop(guard);
                    return Err(self.block_and_bail(&refinfo));
                }
            }
        }
        guard.set_tinfo(Some(info));
        Ok(guard.newest_val())
    }

    /// Tries to kill a rival transaction: only an older transaction that
    /// has itself been running for at least [`BARGE_WAIT`] may do so, and
    /// only while the rival is still `Running`.
    fn barge(&self, rival: &Arc<TxInfo>) -> bool {
        if self.start_time.elapsed() < BARGE_WAIT || self.start_point >= rival.start_point {
            return false;
        }
        let barged = rival.cas_status(TxStatus::Running, TxStatus::Killed);
        if barged {
            debug!(
                rival_start_point = rival.start_point,
                start_point = self.start_point,
                "barged rival transaction"
            );
            rival.latch.count_down();
        }
        barged
    }

    /// Stops this attempt, waits briefly for the rival to finish, and
    /// signals a retry.
    fn block_and_bail(&mut self, rival: &Arc<TxInfo>) -> StmError {
        self.stop(TxStatus::Retry);
        trace!("blocking on rival transaction before retry");
        let _ = rival.latch.wait_zero(LOCK_WAIT);
        StmError::Retry
    }

    // -------------------------------------------------------------------------
    // Commit
    // -------------------------------------------------------------------------

    /// The commit phase: re-applies commutes under their write locks, locks
    /// every set Ref, then stamps all values with a single fresh commit
    /// point. Locks are released in reverse acquisition order whatever the
    /// outcome.
    fn commit(&mut self) -> Result<(), StmError> {
        let info = self.info.clone().ok_or(StmError::Retry)?;

        // Make sure no one has killed us before this point, and can't from
        // now on.
        if !info.cas_status(TxStatus::Running, TxStatus::Committing) {
            return Err(StmError::Retry);
        }

        let mut locked: SmallVec<[(Ref, HistoryWriteGuard); 8]> = SmallVec::new();
        let result = self.lock_and_write(&info, &mut locked);
        while let Some((_, guard)) = locked.pop() {
            drop(guard);
        }
        result
    }

    fn lock_and_write(
        &mut self,
        info: &Arc<TxInfo>,
        locked: &mut SmallVec<[(Ref, HistoryWriteGuard); 8]>,
    ) -> Result<(), StmError> {
        let commutes = std::mem::take(&mut self.commutes);
        for (r, queue) in &commutes {
            if self.sets.contains(r) {
                continue;
            }
            let was_ensured = self.ensures.remove(r).is_some();
            let guard = r.try_lock_write_for(LOCK_WAIT).ok_or(StmError::Retry)?;

            if was_ensured && guard.newest_point() > self.read_point {
                return Err(StmError::Retry);
            }
            if let Some(refinfo) = guard.tinfo().cloned() {
                if refinfo.is_running() && !Arc::ptr_eq(&refinfo, info) && !self.barge(&refinfo) {
                    return Err(StmError::Retry);
                }
            }
            let mut val = guard.newest_val();
            for commute in queue {
                val = (commute.function)(&val, &commute.args);
            }
            self.vals.insert(r.clone(), val);
            locked.push((r.clone(), guard));
        }

        let sets: Vec<Ref> = self.sets.iter().cloned().collect();
        for r in sets {
            let guard = r.try_lock_write_for(LOCK_WAIT).ok_or(StmError::Retry)?;
            locked.push((r, guard));
        }

        // At this point every value is computed and every written Ref is
        // locked; stamp them all with one commit point.
        let commit_point = POINT_COUNTER.next();
        for (r, guard) in locked.iter_mut() {
            if let Some(val) = self.vals.get(r) {
                guard.set_value(
                    val.clone(),
                    commit_point,
                    r.min_history(),
                    r.max_history(),
                    r.faults(),
                );
            }
        }
        trace!(
            commit_point,
            refs = self.vals.len(),
            "transaction committed"
        );
        Ok(())
    }
}
