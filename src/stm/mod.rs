//! Software transactional memory.
//!
//! An MVCC engine in the Clojure mold: mutable [`Ref`]s hold versioned
//! histories of immutable values, and [`run_in_transaction`] coordinates
//! atomic multi-Ref updates with snapshot reads, per-Ref write locks,
//! deadlock avoidance by barging, and bounded retry.
//!
//! ```rust
//! use stemma::{run_in_transaction, Ref, Value};
//!
//! let checking = Ref::new(Value::from(100));
//! let savings = Ref::new(Value::from(0));
//!
//! // Transfer atomically: no observer ever sees the money in both places.
//! run_in_transaction(|tx| {
//!     let Value::Int(balance) = tx.get(&checking)? else { unreachable!() };
//!     tx.set(&checking, Value::from(balance - 40))?;
//!     let Value::Int(saved) = tx.get(&savings)? else { unreachable!() };
//!     tx.set(&savings, Value::from(saved + 40))
//! })
//! .unwrap();
//!
//! assert_eq!(checking.deref(), Value::from(60));
//! assert_eq!(savings.deref(), Value::from(40));
//! ```

use std::sync::Arc;

use thiserror::Error;

use crate::value::Value;

mod idgen;
mod latch;
mod refs;
mod transaction;

pub use idgen::IdGenerator;
pub use latch::CountDownLatch;
pub use refs::Ref;
pub use transaction::{run_in_transaction, Transaction, BARGE_WAIT, LOCK_WAIT, RETRY_LIMIT};

/// A function applied to a Ref's value: `(current, args) -> new`.
///
/// Used by [`Transaction::commute`] (re-applied at commit time) and
/// [`Transaction::alter`].
pub type CommuteFn = Arc<dyn Fn(&Value, &[Value]) -> Value + Send + Sync>;

/// Errors surfaced by the STM.
///
/// [`Retry`](StmError::Retry) is an internal control-flow sentinel: Ref
/// operations return it on conflict, transaction bodies propagate it with
/// `?`, and the run loop converts it into another attempt. It never escapes
/// [`run_in_transaction`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StmError {
    /// Internal conflict sentinel; consumed by the run loop.
    #[error("transaction retry")]
    Retry,

    /// The body called [`Transaction::abort`].
    #[error("transaction aborted")]
    Aborted,

    /// The body set a Ref it had already commuted.
    #[error("can't set after commute")]
    SetAfterCommute,

    /// Every attempt conflicted.
    #[error("Transaction failed after reaching retry limit")]
    RetryLimitReached,
}
