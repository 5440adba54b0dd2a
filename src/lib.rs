//! # stemma
//!
//! Clojure-style persistent data structures and a software transactional
//! memory for Rust.
//!
//! ## Overview
//!
//! Two tightly coupled subsystems:
//!
//! - **Persistent collections**: immutable, structurally shared list,
//!   vector (32-way bitmapped trie with a tail buffer), hash map (hash
//!   array mapped trie), and sorted map (red-black tree), bound together by
//!   a shared sequence protocol with Murmur3-based structural hashing.
//! - **STM**: an MVCC locking-transaction engine coordinating atomic
//!   updates of mutable [`Ref`]s whose values are such immutable
//!   collections — snapshot reads, per-Ref write locks, barging, and
//!   bounded retry.
//!
//! Collections are lock-free by construction: every operation returns a new
//! value sharing structure with its predecessor, so concurrent readers need
//! no coordination and publishing a new root through a [`Ref`] is the only
//! synchronization point.
//!
//! ## Example
//!
//! ```rust
//! use stemma::{run_in_transaction, PersistentHashMap, Ref, Value};
//!
//! let accounts = Ref::new(Value::HashMap(PersistentHashMap::from_items(&[
//!     Value::from("alice"),
//!     Value::from(100),
//! ])));
//!
//! run_in_transaction(|tx| {
//!     let Value::HashMap(map) = tx.get(&accounts)? else { unreachable!() };
//!     let updated = map.assoc(Value::from("bob"), Value::from(50));
//!     tx.set(&accounts, Value::HashMap(updated))
//! })
//! .unwrap();
//!
//! let Value::HashMap(map) = accounts.deref() else { unreachable!() };
//! assert_eq!(map.val_at(&Value::from("bob")), Value::from(50));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod murmur3;
pub mod persistent;
pub mod protocol;
pub mod stm;
pub mod value;

pub use persistent::{
    ArrayChunk, ChunkedSeq, CompareFn, Cons, MapEntry, Meta, PersistentHashMap, PersistentList,
    PersistentTreeMap, PersistentVector,
};
pub use protocol::{Seq, SeqOps};
pub use stm::{
    run_in_transaction, CommuteFn, CountDownLatch, IdGenerator, Ref, StmError, Transaction,
};
pub use value::Value;

/// Prelude module for convenient imports.
///
/// ```rust
/// use stemma::prelude::*;
/// ```
pub mod prelude {
    pub use crate::persistent::*;
    pub use crate::protocol::{Seq, SeqOps};
    pub use crate::stm::{
        run_in_transaction, CommuteFn, CountDownLatch, Ref, StmError, Transaction,
    };
    pub use crate::value::Value;
}

#[cfg(test)]
mod tests {
    #[test]
    fn library_compiles() {
        // Basic smoke test to ensure the library compiles
    }
}
