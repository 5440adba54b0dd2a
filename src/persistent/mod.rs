//! Persistent (immutable) data structures.
//!
//! Every structure here is a value: operations return new instances that
//! share untouched structure with their predecessors and never mutate
//! shared state. Concurrent readers need no coordination — publishing a new
//! root through an [STM ref](crate::stm::Ref) is the only synchronization
//! point.
//!
//! - [`PersistentList`]: counted singly-linked list (also the canonical
//!   empty sequence)
//! - [`Cons`]: the single prepend cell behind seq `cons`
//! - [`PersistentVector`]: 32-way bitmapped trie with a tail buffer
//! - [`PersistentHashMap`]: hash array mapped trie
//! - [`PersistentTreeMap`]: red-black tree ordered by a comparator
//! - [`MapEntry`]: the immutable pair yielded by map seqs
//!
//! # Examples
//!
//! ```rust
//! use stemma::{PersistentHashMap, Value};
//!
//! let map = PersistentHashMap::new()
//!     .assoc(Value::from("one"), Value::from(1))
//!     .assoc(Value::from("two"), Value::from(2));
//!
//! // Structural sharing: the original map is preserved
//! let updated = map.assoc(Value::from("one"), Value::from(100));
//! assert_eq!(map.val_at(&Value::from("one")), Value::from(1));
//! assert_eq!(updated.val_at(&Value::from("one")), Value::from(100));
//! ```

use std::sync::Arc;

/// Optional collection metadata: a shared map, orthogonal to value
/// semantics (it never affects equivalence or hashing).
pub type Meta = Option<Arc<PersistentHashMap>>;

mod hashmap;
mod list;
mod map_entry;
mod treemap;
mod vector;

pub use hashmap::PersistentHashMap;
pub use hashmap::PersistentHashMapIterator;
pub use list::Cons;
pub use list::PersistentList;
pub use list::PersistentListIterator;
pub use map_entry::MapEntry;
pub use treemap::CompareFn;
pub use treemap::PersistentTreeMap;
pub use treemap::PersistentTreeMapIterator;
pub use vector::ArrayChunk;
pub use vector::ChunkedSeq;
pub use vector::PersistentVector;
pub use vector::PersistentVectorIterator;
