//! Persistent sorted map — a red-black tree with path copying.
//!
//! Mutation is node recreation along the search path: insertion is the
//! Okasaki rebalancing scheme (red-red violations collapse into one red
//! with two black children on the way back up), deletion is the Kahrs
//! balance-preserving variant (`append_nodes` splices the two subtrees of
//! the removed node, the `balance_*_del` helpers push the double-black
//! deficit up the spine). The root is blackened after every mutation.
//!
//! Keys are ordered by a pluggable comparator; the default is
//! [`Value::compare`], under which nil sorts below every other key. The
//! balancing helpers check the red-black invariants as they go and panic on
//! violation — that is a bug in this module, never a caller error.
//!
//! # Examples
//!
//! ```rust
//! use stemma::{PersistentTreeMap, Value};
//!
//! let map = PersistentTreeMap::from_items(&[
//!     Value::from(3), Value::from("three"),
//!     Value::from(1), Value::from("one"),
//!     Value::from(2), Value::from("two"),
//! ]);
//!
//! // Entries are always in comparator order
//! let keys: Vec<Value> = map.seq().unwrap().iter()
//!     .map(|e| match e {
//!         Value::Entry(entry) => entry.key().clone(),
//!         _ => unreachable!(),
//!     })
//!     .collect();
//! assert_eq!(keys, vec![Value::from(1), Value::from(2), Value::from(3)]);
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::iter::FromIterator;
use std::sync::Arc;

use crate::protocol::{hash_unordered, CachedHash, Seq, SeqOps};
use crate::value::Value;

use super::hashmap::map_conj;
use super::map_entry::MapEntry;
use super::Meta;

/// A key ordering for the tree map.
pub type CompareFn = Arc<dyn Fn(&Value, &Value) -> Ordering + Send + Sync>;

const INVARIANT_VIOLATION: &str = "red-black invariant violation";

// =============================================================================
// Nodes
// =============================================================================

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Color {
    Red,
    Black,
}

#[derive(Debug)]
struct TreeNode {
    color: Color,
    key: Value,
    value: Value,
    left: Option<Arc<TreeNode>>,
    right: Option<Arc<TreeNode>>,
}

type NodeRef = Option<Arc<TreeNode>>;

fn red(key: Value, value: Value, left: NodeRef, right: NodeRef) -> Arc<TreeNode> {
    Arc::new(TreeNode {
        color: Color::Red,
        key,
        value,
        left,
        right,
    })
}

fn black(key: Value, value: Value, left: NodeRef, right: NodeRef) -> Arc<TreeNode> {
    Arc::new(TreeNode {
        color: Color::Black,
        key,
        value,
        left,
        right,
    })
}

fn is_red(node: Option<&Arc<TreeNode>>) -> bool {
    node.is_some_and(|n| n.color == Color::Red)
}

fn is_black(node: Option<&Arc<TreeNode>>) -> bool {
    node.is_some_and(|n| n.color == Color::Black)
}

fn blacken(node: &Arc<TreeNode>) -> Arc<TreeNode> {
    match node.color {
        Color::Black => node.clone(),
        Color::Red => black(
            node.key.clone(),
            node.value.clone(),
            node.left.clone(),
            node.right.clone(),
        ),
    }
}

/// Reddening a red node would stack two reds; the balancers only redden
/// provably black nodes.
fn redden(node: &Arc<TreeNode>) -> Arc<TreeNode> {
    match node.color {
        Color::Red => panic!("{INVARIANT_VIOLATION}"),
        Color::Black => red(
            node.key.clone(),
            node.value.clone(),
            node.left.clone(),
            node.right.clone(),
        ),
    }
}

// =============================================================================
// Insertion
// =============================================================================

enum AddResult {
    /// A fresh red leaf was attached; the rebalanced subtree is returned.
    Added(Arc<TreeNode>),
    /// The key already exists at this node.
    Found(Arc<TreeNode>),
}

fn add_left(node: &TreeNode, ins: Arc<TreeNode>) -> Arc<TreeNode> {
    match node.color {
        Color::Red => red(
            node.key.clone(),
            node.value.clone(),
            Some(ins),
            node.right.clone(),
        ),
        Color::Black => balance_left_add(&ins, node),
    }
}

fn add_right(node: &TreeNode, ins: Arc<TreeNode>) -> Arc<TreeNode> {
    match node.color {
        Color::Red => red(
            node.key.clone(),
            node.value.clone(),
            node.left.clone(),
            Some(ins),
        ),
        Color::Black => balance_right_add(&ins, node),
    }
}

/// Collapses a red-red violation below a black parent's left side.
fn balance_left_add(ins: &Arc<TreeNode>, parent: &TreeNode) -> Arc<TreeNode> {
    if ins.color == Color::Red {
        if let Some(left) = &ins.left {
            if left.color == Color::Red {
                return red(
                    ins.key.clone(),
                    ins.value.clone(),
                    Some(blacken(left)),
                    Some(black(
                        parent.key.clone(),
                        parent.value.clone(),
                        ins.right.clone(),
                        parent.right.clone(),
                    )),
                );
            }
        }
        if let Some(right) = &ins.right {
            if right.color == Color::Red {
                return red(
                    right.key.clone(),
                    right.value.clone(),
                    Some(black(
                        ins.key.clone(),
                        ins.value.clone(),
                        ins.left.clone(),
                        right.left.clone(),
                    )),
                    Some(black(
                        parent.key.clone(),
                        parent.value.clone(),
                        right.right.clone(),
                        parent.right.clone(),
                    )),
                );
            }
        }
    }
    black(
        parent.key.clone(),
        parent.value.clone(),
        Some(ins.clone()),
        parent.right.clone(),
    )
}

/// Mirror image of [`balance_left_add`].
fn balance_right_add(ins: &Arc<TreeNode>, parent: &TreeNode) -> Arc<TreeNode> {
    if ins.color == Color::Red {
        if let Some(right) = &ins.right {
            if right.color == Color::Red {
                return red(
                    ins.key.clone(),
                    ins.value.clone(),
                    Some(black(
                        parent.key.clone(),
                        parent.value.clone(),
                        parent.left.clone(),
                        ins.left.clone(),
                    )),
                    Some(blacken(right)),
                );
            }
        }
        if let Some(left) = &ins.left {
            if left.color == Color::Red {
                return red(
                    left.key.clone(),
                    left.value.clone(),
                    Some(black(
                        parent.key.clone(),
                        parent.value.clone(),
                        parent.left.clone(),
                        left.left.clone(),
                    )),
                    Some(black(
                        ins.key.clone(),
                        ins.value.clone(),
                        left.right.clone(),
                        ins.right.clone(),
                    )),
                );
            }
        }
    }
    black(
        parent.key.clone(),
        parent.value.clone(),
        parent.left.clone(),
        Some(ins.clone()),
    )
}

// =============================================================================
// Deletion
// =============================================================================

/// Splices two subtrees of a removed node, preserving the black-depth of
/// both sides.
fn append_nodes(left: NodeRef, right: NodeRef) -> NodeRef {
    match (left, right) {
        (None, right) => right,
        (left, None) => left,
        (Some(left), Some(right)) => Some(match (left.color, right.color) {
            (Color::Red, Color::Red) => {
                let app = append_nodes(left.right.clone(), right.left.clone());
                if is_red(app.as_ref()) {
                    let app = app.unwrap_or_else(|| panic!("{INVARIANT_VIOLATION}"));
                    red(
                        app.key.clone(),
                        app.value.clone(),
                        Some(red(
                            left.key.clone(),
                            left.value.clone(),
                            left.left.clone(),
                            app.left.clone(),
                        )),
                        Some(red(
                            right.key.clone(),
                            right.value.clone(),
                            app.right.clone(),
                            right.right.clone(),
                        )),
                    )
                } else {
                    red(
                        left.key.clone(),
                        left.value.clone(),
                        left.left.clone(),
                        Some(red(
                            right.key.clone(),
                            right.value.clone(),
                            app,
                            right.right.clone(),
                        )),
                    )
                }
            }
            (Color::Red, Color::Black) => red(
                left.key.clone(),
                left.value.clone(),
                left.left.clone(),
                append_nodes(left.right.clone(), Some(right)),
            ),
            (Color::Black, Color::Red) => red(
                right.key.clone(),
                right.value.clone(),
                append_nodes(Some(left), right.left.clone()),
                right.right.clone(),
            ),
            (Color::Black, Color::Black) => {
                let app = append_nodes(left.right.clone(), right.left.clone());
                if is_red(app.as_ref()) {
                    let app = app.unwrap_or_else(|| panic!("{INVARIANT_VIOLATION}"));
                    red(
                        app.key.clone(),
                        app.value.clone(),
                        Some(black(
                            left.key.clone(),
                            left.value.clone(),
                            left.left.clone(),
                            app.left.clone(),
                        )),
                        Some(black(
                            right.key.clone(),
                            right.value.clone(),
                            app.right.clone(),
                            right.right.clone(),
                        )),
                    )
                } else {
                    balance_left_del(
                        &left.key,
                        &left.value,
                        left.left.clone(),
                        Some(black(
                            right.key.clone(),
                            right.value.clone(),
                            app,
                            right.right.clone(),
                        )),
                    )
                }
            }
        }),
    }
}

/// Rebalances after a deletion shortened the left spine.
fn balance_left_del(key: &Value, value: &Value, del: NodeRef, right: NodeRef) -> Arc<TreeNode> {
    if is_red(del.as_ref()) {
        let del = del.unwrap_or_else(|| panic!("{INVARIANT_VIOLATION}"));
        return red(key.clone(), value.clone(), Some(blacken(&del)), right);
    }
    if is_black(right.as_ref()) {
        let right = right.unwrap_or_else(|| panic!("{INVARIANT_VIOLATION}"));
        return balance_right_add(&redden(&right), &probe(key, value, del, None));
    }
    if let Some(right) = right.as_ref() {
        if right.color == Color::Red && is_black(right.left.as_ref()) {
            let right_left = right.left.clone().unwrap_or_else(|| panic!("{INVARIANT_VIOLATION}"));
            let rebalanced_right = balance_right_add(
                &redden(right.right.as_ref().unwrap_or_else(|| panic!("{INVARIANT_VIOLATION}"))),
                &probe(&right.key, &right.value, right_left.right.clone(), None),
            );
            return red(
                right_left.key.clone(),
                right_left.value.clone(),
                Some(black(
                    key.clone(),
                    value.clone(),
                    del,
                    right_left.left.clone(),
                )),
                Some(rebalanced_right),
            );
        }
    }
    panic!("{INVARIANT_VIOLATION}");
}

/// Rebalances after a deletion shortened the right spine.
fn balance_right_del(key: &Value, value: &Value, left: NodeRef, del: NodeRef) -> Arc<TreeNode> {
    if is_red(del.as_ref()) {
        let del = del.unwrap_or_else(|| panic!("{INVARIANT_VIOLATION}"));
        return red(key.clone(), value.clone(), left, Some(blacken(&del)));
    }
    if is_black(left.as_ref()) {
        let left = left.unwrap_or_else(|| panic!("{INVARIANT_VIOLATION}"));
        return balance_left_add(&redden(&left), &probe(key, value, None, del));
    }
    if let Some(left) = left.as_ref() {
        if left.color == Color::Red && is_black(left.right.as_ref()) {
            let left_right = left.right.clone().unwrap_or_else(|| panic!("{INVARIANT_VIOLATION}"));
            let rebalanced_left = balance_left_add(
                &redden(left.left.as_ref().unwrap_or_else(|| panic!("{INVARIANT_VIOLATION}"))),
                &probe(&left.key, &left.value, None, left_right.left.clone()),
            );
            return red(
                left_right.key.clone(),
                left_right.value.clone(),
                Some(rebalanced_left),
                Some(black(
                    key.clone(),
                    value.clone(),
                    left_right.right.clone(),
                    del,
                )),
            );
        }
    }
    panic!("{INVARIANT_VIOLATION}");
}

/// A black stand-in parent used to route the delete balancers through the
/// shared insert balancers, which only read the parent's payload and the
/// sibling on the opposite side.
fn probe(key: &Value, value: &Value, left: NodeRef, right: NodeRef) -> TreeNode {
    TreeNode {
        color: Color::Black,
        key: key.clone(),
        value: value.clone(),
        left,
        right,
    }
}

// =============================================================================
// PersistentTreeMap
// =============================================================================

/// A persistent sorted map keyed by a comparator over [`Value`]s.
///
/// # Time Complexity
///
/// | Operation      | Complexity   |
/// |----------------|--------------|
/// | `assoc`        | O(log N)     |
/// | `without`      | O(log N)     |
/// | `val_at`       | O(log N)     |
/// | `seq_from`     | O(log N)     |
/// | `len`          | O(1)         |
#[derive(Clone)]
pub struct PersistentTreeMap {
    comparator: Option<CompareFn>,
    root: NodeRef,
    count: usize,
    meta: Meta,
    hash: CachedHash,
}

impl PersistentTreeMap {
    /// The empty map under the default [`Value::compare`] ordering.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            comparator: None,
            root: None,
            count: 0,
            meta: None,
            hash: CachedHash::new(),
        }
    }

    /// The empty map under a caller-supplied ordering.
    #[must_use]
    pub fn with_comparator(comparator: CompareFn) -> Self {
        Self {
            comparator: Some(comparator),
            root: None,
            count: 0,
            meta: None,
            hash: CachedHash::new(),
        }
    }

    /// Builds a map from alternating keys and values under the default
    /// ordering; later duplicates win.
    ///
    /// # Panics
    ///
    /// Panics when the slice has odd length.
    #[must_use]
    pub fn from_items(items: &[Value]) -> Self {
        Self::from_items_with(Self::new(), items)
    }

    /// Builds a map from alternating keys and values under a caller-supplied
    /// ordering.
    ///
    /// # Panics
    ///
    /// Panics when the slice has odd length.
    #[must_use]
    pub fn from_items_by(comparator: CompareFn, items: &[Value]) -> Self {
        Self::from_items_with(Self::with_comparator(comparator), items)
    }

    fn from_items_with(mut map: Self, items: &[Value]) -> Self {
        let mut i = 0;
        while i < items.len() {
            assert!(
                i + 1 < items.len(),
                "No value supplied for key: {}",
                items[i]
            );
            map = map.assoc(items[i].clone(), items[i + 1].clone());
            i += 2;
        }
        map
    }

    /// Builds a map from a seq of alternating keys and values.
    ///
    /// # Panics
    ///
    /// Panics when the seq has odd length.
    #[must_use]
    pub fn from_seq(items: Option<Seq>) -> Self {
        let mut map = Self::new();
        let mut current = items;
        while let Some(key_seq) = current {
            let key = key_seq.first();
            let Some(val_seq) = key_seq.next() else {
                panic!("No value supplied for key: {key}");
            };
            map = map.assoc(key, val_seq.first());
            current = val_seq.next();
        }
        map
    }

    /// The number of entries.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    /// Returns `true` if the map has no entries.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The ordering this map sorts by.
    #[must_use]
    pub fn comparator(&self) -> CompareFn {
        match &self.comparator {
            Some(comparator) => comparator.clone(),
            None => Arc::new(|a: &Value, b: &Value| a.compare(b)),
        }
    }

    /// The key of an entry-shaped value.
    ///
    /// # Panics
    ///
    /// Panics when the value is not a map entry.
    #[must_use]
    pub fn entry_key(entry: &Value) -> Value {
        match entry {
            Value::Entry(e) => e.key().clone(),
            other => panic!("expected a map entry, got: {other}"),
        }
    }

    fn do_compare(&self, a: &Value, b: &Value) -> Ordering {
        match &self.comparator {
            Some(comparator) => comparator(a, b),
            None => a.compare(b),
        }
    }

    fn node_at(&self, key: &Value) -> Option<&Arc<TreeNode>> {
        let mut current = self.root.as_ref();
        while let Some(node) = current {
            current = match self.do_compare(key, &node.key) {
                Ordering::Equal => return Some(node),
                Ordering::Less => node.left.as_ref(),
                Ordering::Greater => node.right.as_ref(),
            };
        }
        None
    }

    /// Returns `true` if the map contains `key`.
    #[must_use]
    pub fn contains_key(&self, key: &Value) -> bool {
        self.node_at(key).is_some()
    }

    /// The entry for `key`, or `None` when absent.
    #[must_use]
    pub fn entry_at(&self, key: &Value) -> Option<MapEntry> {
        self.node_at(key)
            .map(|node| MapEntry::new(node.key.clone(), node.value.clone()))
    }

    /// The value for `key`, or nil when absent.
    #[must_use]
    pub fn val_at(&self, key: &Value) -> Value {
        self.val_at_or(key, Value::Nil)
    }

    /// The value for `key`, or `not_found` when absent.
    #[must_use]
    pub fn val_at_or(&self, key: &Value, not_found: Value) -> Value {
        match self.node_at(key) {
            Some(node) => node.value.clone(),
            None => not_found,
        }
    }

    /// A new map with `key` associated to `val`. Associating an already
    /// equivalent value returns the map unchanged.
    #[must_use]
    pub fn assoc(&self, key: Value, val: Value) -> Self {
        match self.tree_add(self.root.as_ref(), &key, &val) {
            AddResult::Found(existing) => {
                if existing.value.equiv(&val) {
                    return self.clone();
                }
                Self {
                    comparator: self.comparator.clone(),
                    root: self.root.as_ref().map(|root| self.replace(root, &key, &val)),
                    count: self.count,
                    meta: self.meta.clone(),
                    hash: CachedHash::new(),
                }
            }
            AddResult::Added(tree) => Self {
                comparator: self.comparator.clone(),
                root: Some(blacken(&tree)),
                count: self.count + 1,
                meta: self.meta.clone(),
                hash: CachedHash::new(),
            },
        }
    }

    fn tree_add(&self, node: Option<&Arc<TreeNode>>, key: &Value, val: &Value) -> AddResult {
        let Some(node) = node else {
            return AddResult::Added(red(key.clone(), val.clone(), None, None));
        };
        match self.do_compare(key, &node.key) {
            Ordering::Equal => AddResult::Found(node.clone()),
            Ordering::Less => match self.tree_add(node.left.as_ref(), key, val) {
                AddResult::Found(existing) => AddResult::Found(existing),
                AddResult::Added(ins) => AddResult::Added(add_left(node, ins)),
            },
            Ordering::Greater => match self.tree_add(node.right.as_ref(), key, val) {
                AddResult::Found(existing) => AddResult::Found(existing),
                AddResult::Added(ins) => AddResult::Added(add_right(node, ins)),
            },
        }
    }

    /// Rewrites the path to an existing key with a new value, preserving
    /// every node color.
    fn replace(&self, node: &Arc<TreeNode>, key: &Value, val: &Value) -> Arc<TreeNode> {
        let comparison = self.do_compare(key, &node.key);
        let value = if comparison == Ordering::Equal {
            val.clone()
        } else {
            node.value.clone()
        };
        let left = if comparison == Ordering::Less {
            node.left.as_ref().map(|left| self.replace(left, key, val))
        } else {
            node.left.clone()
        };
        let right = if comparison == Ordering::Greater {
            node.right.as_ref().map(|right| self.replace(right, key, val))
        } else {
            node.right.clone()
        };
        Arc::new(TreeNode {
            color: node.color,
            key: node.key.clone(),
            value,
            left,
            right,
        })
    }

    /// A new map without `key`. Removing an absent key returns the map
    /// unchanged.
    #[must_use]
    pub fn without(&self, key: &Value) -> Self {
        match self.tree_remove(self.root.as_ref(), key) {
            RemoveResult::NotFound => self.clone(),
            RemoveResult::Removed(tree) => Self {
                comparator: self.comparator.clone(),
                root: tree.as_ref().map(blacken),
                count: self.count - 1,
                meta: self.meta.clone(),
                hash: CachedHash::new(),
            },
        }
    }

    fn tree_remove(&self, node: Option<&Arc<TreeNode>>, key: &Value) -> RemoveResult {
        let Some(node) = node else {
            return RemoveResult::NotFound;
        };
        let comparison = self.do_compare(key, &node.key);
        if comparison == Ordering::Equal {
            return RemoveResult::Removed(append_nodes(node.left.clone(), node.right.clone()));
        }
        let child = if comparison == Ordering::Less {
            node.left.as_ref()
        } else {
            node.right.as_ref()
        };
        match self.tree_remove(child, key) {
            RemoveResult::NotFound => RemoveResult::NotFound,
            RemoveResult::Removed(del) => {
                let tree = if comparison == Ordering::Less {
                    if is_black(node.left.as_ref()) {
                        Some(balance_left_del(&node.key, &node.value, del, node.right.clone()))
                    } else {
                        Some(red(node.key.clone(), node.value.clone(), del, node.right.clone()))
                    }
                } else if is_black(node.right.as_ref()) {
                    Some(balance_right_del(&node.key, &node.value, node.left.clone(), del))
                } else {
                    Some(red(node.key.clone(), node.value.clone(), node.left.clone(), del))
                };
                RemoveResult::Removed(tree)
            }
        }
    }

    /// Conjoins an entry-shaped value, as [`PersistentHashMap::conj`]
    /// does.
    ///
    /// # Panics
    ///
    /// Panics on a vector that is not a pair or a seq element that is not a
    /// map entry.
    ///
    /// [`PersistentHashMap::conj`]: super::PersistentHashMap::conj
    #[must_use]
    pub fn conj(&self, entry: &Value) -> Self {
        map_conj(self.clone(), entry, Self::assoc)
    }

    /// The ascending in-order seq of entries, or `None` for the empty map.
    #[must_use]
    pub fn seq(&self) -> Option<Seq> {
        self.seq_a(true)
    }

    /// The descending in-order seq of entries.
    #[must_use]
    pub fn rseq(&self) -> Option<Seq> {
        self.seq_a(false)
    }

    /// The in-order seq of entries in the requested direction.
    #[must_use]
    pub fn seq_a(&self, ascending: bool) -> Option<Seq> {
        if self.count == 0 {
            return None;
        }
        let stack = push_seq_stack(self.root.clone(), Vec::new(), ascending);
        TreeSeq::create(stack, ascending, Some(self.count))
    }

    /// The in-order seq starting at `key` (inclusive, or at the nearest key
    /// in the traversal direction) in the requested direction.
    #[must_use]
    pub fn seq_from(&self, key: &Value, ascending: bool) -> Option<Seq> {
        if self.count == 0 {
            return None;
        }
        let mut stack: Vec<Arc<TreeNode>> = Vec::new();
        let mut current = self.root.clone();
        while let Some(node) = current {
            match self.do_compare(key, &node.key) {
                Ordering::Equal => {
                    stack.push(node);
                    return TreeSeq::create(stack, ascending, None);
                }
                Ordering::Less if ascending => {
                    current = node.left.clone();
                    stack.push(node);
                }
                Ordering::Greater if !ascending => {
                    current = node.right.clone();
                    stack.push(node);
                }
                _ => {
                    current = if ascending {
                        node.right.clone()
                    } else {
                        node.left.clone()
                    };
                }
            }
        }
        TreeSeq::create(stack, ascending, None)
    }

    /// An iterator over `(key, value)` pairs in ascending order.
    #[must_use]
    pub fn iter(&self) -> PersistentTreeMapIterator {
        PersistentTreeMapIterator {
            stack: push_seq_stack(self.root.clone(), Vec::new(), true),
        }
    }

    /// An iterator over the keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = Value> {
        self.iter().map(|(k, _)| k)
    }

    /// An iterator over the values in ascending key order.
    pub fn values(&self) -> impl Iterator<Item = Value> {
        self.iter().map(|(_, v)| v)
    }

    /// An empty map preserving this map's comparator and metadata.
    #[must_use]
    pub fn empty(&self) -> Self {
        Self {
            comparator: self.comparator.clone(),
            root: None,
            count: 0,
            meta: self.meta.clone(),
            hash: CachedHash::new(),
        }
    }

    /// The metadata map, if any.
    #[must_use]
    pub fn meta(&self) -> Meta {
        self.meta.clone()
    }

    /// A structurally shared copy with different metadata.
    #[must_use]
    pub fn with_meta(&self, meta: Meta) -> Self {
        Self {
            comparator: self.comparator.clone(),
            root: self.root.clone(),
            count: self.count,
            meta,
            hash: self.hash.clone(),
        }
    }

    /// The cached unordered Murmur3 hash over the entries.
    #[must_use]
    pub fn hash_value(&self) -> u32 {
        self.hash.get_or_compute(|| hash_unordered(self.seq()))
    }
}

enum RemoveResult {
    NotFound,
    Removed(NodeRef),
}

impl Default for PersistentTreeMap {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<(Value, Value)> for PersistentTreeMap {
    fn from_iter<I: IntoIterator<Item = (Value, Value)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (key, val) in iter {
            map = map.assoc(key, val);
        }
        map
    }
}

impl PartialEq for PersistentTreeMap {
    fn eq(&self, other: &Self) -> bool {
        if self.count != other.count {
            return false;
        }
        self.iter()
            .all(|(k, v)| other.contains_key(&k) && other.val_at(&k).equiv(&v))
    }
}

impl fmt::Debug for PersistentTreeMap {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_map().entries(self.iter()).finish()
    }
}

/// An iterator over the entries of a [`PersistentTreeMap`].
pub struct PersistentTreeMapIterator {
    stack: Vec<Arc<TreeNode>>,
}

impl Iterator for PersistentTreeMapIterator {
    type Item = (Value, Value);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack = push_seq_stack(node.right.clone(), std::mem::take(&mut self.stack), true);
        Some((node.key.clone(), node.value.clone()))
    }
}

// =============================================================================
// Tree seqs
// =============================================================================

/// Pushes the spine of `node` toward the traversal direction onto the
/// ancestor stack; the top of the stack is the next in-order node.
fn push_seq_stack(node: NodeRef, mut stack: Vec<Arc<TreeNode>>, ascending: bool) -> Vec<Arc<TreeNode>> {
    let mut current = node;
    while let Some(n) = current {
        current = if ascending {
            n.left.clone()
        } else {
            n.right.clone()
        };
        stack.push(n);
    }
    stack
}

/// In-order traversal backed by an ancestor stack.
#[derive(Debug)]
struct TreeSeq {
    stack: Vec<Arc<TreeNode>>,
    ascending: bool,
    count: Option<usize>,
}

impl TreeSeq {
    fn create(stack: Vec<Arc<TreeNode>>, ascending: bool, count: Option<usize>) -> Option<Seq> {
        if stack.is_empty() {
            None
        } else {
            Some(Seq::new(TreeSeq {
                stack,
                ascending,
                count,
            }))
        }
    }
}

impl SeqOps for TreeSeq {
    fn first(&self) -> Value {
        let node = self.stack.last().expect("tree seq is never empty");
        Value::Entry(Arc::new(MapEntry::new(node.key.clone(), node.value.clone())))
    }

    fn next(&self) -> Option<Seq> {
        let mut stack = self.stack.clone();
        let node = stack.pop().expect("tree seq is never empty");
        let descend = if self.ascending {
            node.right.clone()
        } else {
            node.left.clone()
        };
        let stack = push_seq_stack(descend, stack, self.ascending);
        TreeSeq::create(stack, self.ascending, self.count.map(|c| c - 1))
    }

    fn counted(&self) -> Option<usize> {
        self.count
    }
}
