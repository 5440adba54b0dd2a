//! Persistent hash map — a hash array mapped trie with path copying.
//!
//! The trie branches 32 ways on successive 5-bit slices of the key's 32-bit
//! Murmur3 hash. Three node kinds carry the structure:
//!
//! - **Bitmap-indexed nodes** compress sparse levels: a 32-bit bitmap marks
//!   occupied slots, and the packed entry array holds either an inline
//!   key/value pair or a child node per set bit. The slot for a bit is the
//!   population count of the lower bits.
//! - **Array nodes** store all 32 children densely; a bitmap node is
//!   promoted once it overflows past 16 entries, and an array node packs
//!   back down when its population falls to 8.
//! - **Collision nodes** terminate traversal for keys sharing a full 32-bit
//!   hash, scanning their pairs by equivalence.
//!
//! The nil key is stored beside the trie (`has_nil`/`nil_value`): nil hashes
//! to 0, and keeping it out of the trie avoids a permanently hot slot.
//!
//! All operations are path-copying: they return a new map that shares every
//! untouched node with its predecessor.
//!
//! # Examples
//!
//! ```rust
//! use stemma::{PersistentHashMap, Value};
//!
//! let map = PersistentHashMap::from_items(&[Value::from("abc"), Value::from("def")]);
//! assert!(map.contains_key(&Value::from("abc")));
//! assert_eq!(map.val_at(&Value::from("abc")), Value::from("def"));
//!
//! // Structural sharing: the original map is preserved
//! let updated = map.assoc(Value::from("abc"), Value::from(1));
//! assert_eq!(map.val_at(&Value::from("abc")), Value::from("def"));
//! assert_eq!(updated.val_at(&Value::from("abc")), Value::from(1));
//! ```

use std::fmt;
use std::iter::FromIterator;
use std::sync::Arc;

use crate::protocol::{hash_unordered, CachedHash, Seq, SeqOps};
use crate::value::Value;

use super::list::Cons;
use super::map_entry::MapEntry;
use super::Meta;

// =============================================================================
// Constants
// =============================================================================

/// Branching factor (2^5 = 32).
const BRANCHING_FACTOR: usize = 32;

/// Bits consumed per trie level.
const BITS_PER_LEVEL: u32 = 5;

/// A bitmap node overflowing past this many entries becomes an array node.
const PROMOTE_THRESHOLD: u32 = 16;

/// An array node at or below this population packs back to a bitmap node.
const PACK_THRESHOLD: usize = 8;

#[inline]
const fn mask(hash: u32, shift: u32) -> u32 {
    (hash >> shift) & 0x1f
}

#[inline]
const fn bitpos(hash: u32, shift: u32) -> u32 {
    1 << mask(hash, shift)
}

// =============================================================================
// Node definitions
// =============================================================================

/// A trie node.
#[derive(Debug)]
enum HamtNode {
    Bitmap(BitmapNode),
    Array(ArrayNode),
    Collision(CollisionNode),
}

/// A slot of a bitmap-indexed node: an inline pair or a child node.
#[derive(Clone, Debug)]
enum BitmapEntry {
    Pair(Value, Value),
    Child(Arc<HamtNode>),
}

#[derive(Debug)]
struct BitmapNode {
    bitmap: u32,
    entries: Arc<[BitmapEntry]>,
}

#[derive(Debug)]
struct ArrayNode {
    count: usize,
    children: Arc<[Option<Arc<HamtNode>>; BRANCHING_FACTOR]>,
}

#[derive(Debug)]
struct CollisionNode {
    hash: u32,
    entries: Arc<[(Value, Value)]>,
}

/// Result of a delete below a node.
enum Removal {
    /// The key was not present; the node is unchanged.
    Unchanged,
    /// The key was removed; `None` means the node emptied out.
    Removed(Option<Arc<HamtNode>>),
}

impl BitmapNode {
    fn index(&self, bit: u32) -> usize {
        (self.bitmap & (bit - 1)).count_ones() as usize
    }
}

fn empty_bitmap_node() -> Arc<HamtNode> {
    Arc::new(HamtNode::Bitmap(BitmapNode {
        bitmap: 0,
        entries: Arc::from(Vec::new()),
    }))
}

/// A one-pair bitmap node at the given shift.
fn single_pair_node(shift: u32, hash: u32, key: Value, val: Value) -> Arc<HamtNode> {
    Arc::new(HamtNode::Bitmap(BitmapNode {
        bitmap: bitpos(hash, shift),
        entries: Arc::from(vec![BitmapEntry::Pair(key, val)]),
    }))
}

/// Combines two colliding pairs below `shift`: a collision leaf when the
/// full hashes agree, otherwise a nested bitmap subtree.
fn create_node(shift: u32, key1: Value, val1: Value, hash2: u32, key2: Value, val2: Value) -> Arc<HamtNode> {
    let hash1 = key1.hash_value();
    if hash1 == hash2 {
        return Arc::new(HamtNode::Collision(CollisionNode {
            hash: hash1,
            entries: Arc::from(vec![(key1, val1), (key2, val2)]),
        }));
    }
    let (node, _) = node_assoc(&empty_bitmap_node(), shift, hash1, &key1, &val1);
    let (node, _) = node_assoc(&node, shift, hash2, &key2, &val2);
    node
}

fn clone_entries_with(entries: &Arc<[BitmapEntry]>, index: usize, entry: BitmapEntry) -> Arc<[BitmapEntry]> {
    let mut cloned = entries.to_vec();
    cloned[index] = entry;
    Arc::from(cloned)
}

fn clone_children_with(
    children: &Arc<[Option<Arc<HamtNode>>; BRANCHING_FACTOR]>,
    index: usize,
    child: Option<Arc<HamtNode>>,
) -> Arc<[Option<Arc<HamtNode>>; BRANCHING_FACTOR]> {
    let mut cloned = (**children).clone();
    cloned[index] = child;
    Arc::new(cloned)
}

// =============================================================================
// Write path
// =============================================================================

/// Associates `key` with `val` below `node`, returning the (possibly shared)
/// replacement node and whether a new leaf was added.
fn node_assoc(node: &Arc<HamtNode>, shift: u32, hash: u32, key: &Value, val: &Value) -> (Arc<HamtNode>, bool) {
    match node.as_ref() {
        HamtNode::Bitmap(bitmap_node) => bitmap_assoc(node, bitmap_node, shift, hash, key, val),
        HamtNode::Array(array_node) => {
            let idx = mask(hash, shift) as usize;
            match &array_node.children[idx] {
                None => {
                    let child = single_pair_node(shift + BITS_PER_LEVEL, hash, key.clone(), val.clone());
                    let children = clone_children_with(&array_node.children, idx, Some(child));
                    (
                        Arc::new(HamtNode::Array(ArrayNode {
                            count: array_node.count + 1,
                            children,
                        })),
                        true,
                    )
                }
                Some(child) => {
                    let (new_child, added) = node_assoc(child, shift + BITS_PER_LEVEL, hash, key, val);
                    if Arc::ptr_eq(&new_child, child) {
                        return (node.clone(), added);
                    }
                    let children = clone_children_with(&array_node.children, idx, Some(new_child));
                    (
                        Arc::new(HamtNode::Array(ArrayNode {
                            count: array_node.count,
                            children,
                        })),
                        added,
                    )
                }
            }
        }
        HamtNode::Collision(collision) => {
            if collision.hash == hash {
                if let Some(idx) = collision_index(collision, key) {
                    if collision.entries[idx].1.equiv(val) {
                        return (node.clone(), false);
                    }
                    let mut entries = collision.entries.to_vec();
                    entries[idx].1 = val.clone();
                    return (
                        Arc::new(HamtNode::Collision(CollisionNode {
                            hash: collision.hash,
                            entries: Arc::from(entries),
                        })),
                        false,
                    );
                }
                let mut entries = collision.entries.to_vec();
                entries.push((key.clone(), val.clone()));
                return (
                    Arc::new(HamtNode::Collision(CollisionNode {
                        hash: collision.hash,
                        entries: Arc::from(entries),
                    })),
                    true,
                );
            }
            // Different hash at this level: nest the leaf under a bitmap node
            // and retry the insert one level in.
            let wrapper = Arc::new(HamtNode::Bitmap(BitmapNode {
                bitmap: bitpos(collision.hash, shift),
                entries: Arc::from(vec![BitmapEntry::Child(node.clone())]),
            }));
            node_assoc(&wrapper, shift, hash, key, val)
        }
    }
}

fn bitmap_assoc(
    node: &Arc<HamtNode>,
    bitmap_node: &BitmapNode,
    shift: u32,
    hash: u32,
    key: &Value,
    val: &Value,
) -> (Arc<HamtNode>, bool) {
    let bit = bitpos(hash, shift);
    let idx = bitmap_node.index(bit);

    if bitmap_node.bitmap & bit != 0 {
        return match &bitmap_node.entries[idx] {
            BitmapEntry::Child(child) => {
                let (new_child, added) = node_assoc(child, shift + BITS_PER_LEVEL, hash, key, val);
                if Arc::ptr_eq(&new_child, child) {
                    return (node.clone(), false);
                }
                let entries = clone_entries_with(&bitmap_node.entries, idx, BitmapEntry::Child(new_child));
                (
                    Arc::new(HamtNode::Bitmap(BitmapNode {
                        bitmap: bitmap_node.bitmap,
                        entries,
                    })),
                    added,
                )
            }
            BitmapEntry::Pair(existing_key, existing_val) => {
                if key.equiv(existing_key) {
                    if val.equiv(existing_val) {
                        return (node.clone(), false);
                    }
                    let entries = clone_entries_with(
                        &bitmap_node.entries,
                        idx,
                        BitmapEntry::Pair(existing_key.clone(), val.clone()),
                    );
                    return (
                        Arc::new(HamtNode::Bitmap(BitmapNode {
                            bitmap: bitmap_node.bitmap,
                            entries,
                        })),
                        false,
                    );
                }
                let subtree = create_node(
                    shift + BITS_PER_LEVEL,
                    existing_key.clone(),
                    existing_val.clone(),
                    hash,
                    key.clone(),
                    val.clone(),
                );
                let entries = clone_entries_with(&bitmap_node.entries, idx, BitmapEntry::Child(subtree));
                (
                    Arc::new(HamtNode::Bitmap(BitmapNode {
                        bitmap: bitmap_node.bitmap,
                        entries,
                    })),
                    true,
                )
            }
        };
    }

    let occupied = bitmap_node.bitmap.count_ones();
    if occupied >= PROMOTE_THRESHOLD {
        // Redistribute into a dense 32-slot array node, each inline pair
        // becoming a one-pair bitmap node one level down.
        let mut children: [Option<Arc<HamtNode>>; BRANCHING_FACTOR] = std::array::from_fn(|_| None);
        let jdx = mask(hash, shift) as usize;
        children[jdx] = Some(single_pair_node(shift + BITS_PER_LEVEL, hash, key.clone(), val.clone()));
        let mut slot = 0usize;
        for i in 0..BRANCHING_FACTOR {
            if (bitmap_node.bitmap >> i) & 1 != 0 {
                children[i] = Some(match &bitmap_node.entries[slot] {
                    BitmapEntry::Child(child) => child.clone(),
                    BitmapEntry::Pair(k, v) => {
                        single_pair_node(shift + BITS_PER_LEVEL, k.hash_value(), k.clone(), v.clone())
                    }
                });
                slot += 1;
            }
        }
        return (
            Arc::new(HamtNode::Array(ArrayNode {
                count: occupied as usize + 1,
                children: Arc::new(children),
            })),
            true,
        );
    }

    let mut entries = bitmap_node.entries.to_vec();
    entries.insert(idx, BitmapEntry::Pair(key.clone(), val.clone()));
    (
        Arc::new(HamtNode::Bitmap(BitmapNode {
            bitmap: bitmap_node.bitmap | bit,
            entries: Arc::from(entries),
        })),
        true,
    )
}

// =============================================================================
// Delete path
// =============================================================================

fn node_without(node: &Arc<HamtNode>, shift: u32, hash: u32, key: &Value) -> Removal {
    match node.as_ref() {
        HamtNode::Bitmap(bitmap_node) => {
            let bit = bitpos(hash, shift);
            if bitmap_node.bitmap & bit == 0 {
                return Removal::Unchanged;
            }
            let idx = bitmap_node.index(bit);
            match &bitmap_node.entries[idx] {
                BitmapEntry::Pair(existing_key, _) => {
                    if !key.equiv(existing_key) {
                        return Removal::Unchanged;
                    }
                    if bitmap_node.bitmap == bit {
                        return Removal::Removed(None);
                    }
                    let mut entries = bitmap_node.entries.to_vec();
                    entries.remove(idx);
                    Removal::Removed(Some(Arc::new(HamtNode::Bitmap(BitmapNode {
                        bitmap: bitmap_node.bitmap ^ bit,
                        entries: Arc::from(entries),
                    }))))
                }
                BitmapEntry::Child(child) => match node_without(child, shift + BITS_PER_LEVEL, hash, key) {
                    Removal::Unchanged => Removal::Unchanged,
                    Removal::Removed(Some(new_child)) => {
                        let entries =
                            clone_entries_with(&bitmap_node.entries, idx, BitmapEntry::Child(new_child));
                        Removal::Removed(Some(Arc::new(HamtNode::Bitmap(BitmapNode {
                            bitmap: bitmap_node.bitmap,
                            entries,
                        }))))
                    }
                    Removal::Removed(None) => {
                        if bitmap_node.bitmap == bit {
                            return Removal::Removed(None);
                        }
                        let mut entries = bitmap_node.entries.to_vec();
                        entries.remove(idx);
                        Removal::Removed(Some(Arc::new(HamtNode::Bitmap(BitmapNode {
                            bitmap: bitmap_node.bitmap ^ bit,
                            entries: Arc::from(entries),
                        }))))
                    }
                },
            }
        }
        HamtNode::Array(array_node) => {
            let idx = mask(hash, shift) as usize;
            let Some(child) = &array_node.children[idx] else {
                return Removal::Unchanged;
            };
            match node_without(child, shift + BITS_PER_LEVEL, hash, key) {
                Removal::Unchanged => Removal::Unchanged,
                Removal::Removed(Some(new_child)) => {
                    let children = clone_children_with(&array_node.children, idx, Some(new_child));
                    Removal::Removed(Some(Arc::new(HamtNode::Array(ArrayNode {
                        count: array_node.count,
                        children,
                    }))))
                }
                Removal::Removed(None) => {
                    if array_node.count <= PACK_THRESHOLD {
                        return Removal::Removed(Some(pack_array_node(array_node, idx)));
                    }
                    let children = clone_children_with(&array_node.children, idx, None);
                    Removal::Removed(Some(Arc::new(HamtNode::Array(ArrayNode {
                        count: array_node.count - 1,
                        children,
                    }))))
                }
            }
        }
        HamtNode::Collision(collision) => {
            let Some(idx) = collision_index(collision, key) else {
                return Removal::Unchanged;
            };
            if collision.entries.len() == 1 {
                return Removal::Removed(None);
            }
            let mut entries = collision.entries.to_vec();
            entries.remove(idx);
            Removal::Removed(Some(Arc::new(HamtNode::Collision(CollisionNode {
                hash: collision.hash,
                entries: Arc::from(entries),
            }))))
        }
    }
}

/// Packs the surviving children of an array node back into a bitmap node,
/// skipping the slot being removed.
fn pack_array_node(array_node: &ArrayNode, removed_idx: usize) -> Arc<HamtNode> {
    let mut entries = Vec::with_capacity(array_node.count - 1);
    let mut bitmap = 0u32;
    for (i, child) in array_node.children.iter().enumerate() {
        if i == removed_idx {
            continue;
        }
        if let Some(child) = child {
            entries.push(BitmapEntry::Child(child.clone()));
            bitmap |= 1 << i;
        }
    }
    Arc::new(HamtNode::Bitmap(BitmapNode {
        bitmap,
        entries: Arc::from(entries),
    }))
}

// =============================================================================
// Read path
// =============================================================================

fn node_find<'a>(node: &'a HamtNode, shift: u32, hash: u32, key: &Value) -> Option<(&'a Value, &'a Value)> {
    match node {
        HamtNode::Bitmap(bitmap_node) => {
            let bit = bitpos(hash, shift);
            if bitmap_node.bitmap & bit == 0 {
                return None;
            }
            match &bitmap_node.entries[bitmap_node.index(bit)] {
                BitmapEntry::Child(child) => node_find(child, shift + BITS_PER_LEVEL, hash, key),
                BitmapEntry::Pair(k, v) => {
                    if key.equiv(k) {
                        Some((k, v))
                    } else {
                        None
                    }
                }
            }
        }
        HamtNode::Array(array_node) => {
            let child = array_node.children[mask(hash, shift) as usize].as_ref()?;
            node_find(child, shift + BITS_PER_LEVEL, hash, key)
        }
        HamtNode::Collision(collision) => {
            let idx = collision_index(collision, key)?;
            let (k, v) = &collision.entries[idx];
            Some((k, v))
        }
    }
}

fn collision_index(collision: &CollisionNode, key: &Value) -> Option<usize> {
    collision.entries.iter().position(|(k, _)| key.equiv(k))
}

// =============================================================================
// Node seqs
// =============================================================================

fn node_seq(node: &Arc<HamtNode>) -> Option<Seq> {
    match node.as_ref() {
        HamtNode::Bitmap(bitmap_node) => bitmap_seq(bitmap_node.entries.clone(), 0, None),
        HamtNode::Array(array_node) => array_seq(array_node.children.clone(), 0, None),
        HamtNode::Collision(collision) => {
            if collision.entries.is_empty() {
                None
            } else {
                Some(Seq::new(CollisionSeq {
                    entries: collision.entries.clone(),
                    index: 0,
                }))
            }
        }
    }
}

/// Walks a bitmap node's packed entries, descending into children.
#[derive(Debug)]
struct BitmapSeq {
    entries: Arc<[BitmapEntry]>,
    index: usize,
    child: Option<Seq>,
}

fn bitmap_seq(entries: Arc<[BitmapEntry]>, from: usize, child: Option<Seq>) -> Option<Seq> {
    if child.is_some() {
        return Some(Seq::new(BitmapSeq {
            entries,
            index: from,
            child,
        }));
    }
    for i in from..entries.len() {
        match &entries[i] {
            BitmapEntry::Pair(_, _) => {
                return Some(Seq::new(BitmapSeq {
                    entries: entries.clone(),
                    index: i,
                    child: None,
                }))
            }
            BitmapEntry::Child(node) => {
                if let Some(seq) = node_seq(node) {
                    return Some(Seq::new(BitmapSeq {
                        entries: entries.clone(),
                        index: i + 1,
                        child: Some(seq),
                    }));
                }
            }
        }
    }
    None
}

impl SeqOps for BitmapSeq {
    fn first(&self) -> Value {
        match &self.child {
            Some(child) => child.first(),
            None => match &self.entries[self.index] {
                BitmapEntry::Pair(k, v) => {
                    Value::Entry(Arc::new(MapEntry::new(k.clone(), v.clone())))
                }
                // A child slot is never current without an active child seq.
                BitmapEntry::Child(_) => unreachable!("bitmap seq positioned on a child slot"),
            },
        }
    }

    fn next(&self) -> Option<Seq> {
        match &self.child {
            Some(child) => bitmap_seq(self.entries.clone(), self.index, child.next()),
            None => bitmap_seq(self.entries.clone(), self.index + 1, None),
        }
    }
}

/// Walks an array node's dense children, skipping absent slots.
#[derive(Debug)]
struct ArraySeq {
    children: Arc<[Option<Arc<HamtNode>>; BRANCHING_FACTOR]>,
    index: usize,
    seq: Seq,
}

fn array_seq(
    children: Arc<[Option<Arc<HamtNode>>; BRANCHING_FACTOR]>,
    from: usize,
    seq: Option<Seq>,
) -> Option<Seq> {
    if let Some(seq) = seq {
        return Some(Seq::new(ArraySeq {
            children,
            index: from,
            seq,
        }));
    }
    for j in from..BRANCHING_FACTOR {
        if let Some(node) = &children[j] {
            if let Some(node_seq) = node_seq(node) {
                return Some(Seq::new(ArraySeq {
                    children: children.clone(),
                    index: j + 1,
                    seq: node_seq,
                }));
            }
        }
    }
    None
}

impl SeqOps for ArraySeq {
    fn first(&self) -> Value {
        self.seq.first()
    }

    fn next(&self) -> Option<Seq> {
        array_seq(self.children.clone(), self.index, self.seq.next())
    }
}

/// Walks a collision node's pairs.
#[derive(Debug)]
struct CollisionSeq {
    entries: Arc<[(Value, Value)]>,
    index: usize,
}

impl SeqOps for CollisionSeq {
    fn first(&self) -> Value {
        let (k, v) = &self.entries[self.index];
        Value::Entry(Arc::new(MapEntry::new(k.clone(), v.clone())))
    }

    fn next(&self) -> Option<Seq> {
        if self.index + 1 < self.entries.len() {
            Some(Seq::new(CollisionSeq {
                entries: self.entries.clone(),
                index: self.index + 1,
            }))
        } else {
            None
        }
    }
}

// =============================================================================
// PersistentHashMap
// =============================================================================

/// A persistent hash array mapped trie keyed by [`Value`] equivalence.
///
/// # Time Complexity
///
/// | Operation      | Complexity |
/// |----------------|------------|
/// | `assoc`        | O(log32 N) |
/// | `without`      | O(log32 N) |
/// | `val_at`       | O(log32 N) |
/// | `contains_key` | O(log32 N) |
/// | `len`          | O(1)       |
#[derive(Clone)]
pub struct PersistentHashMap {
    count: usize,
    root: Option<Arc<HamtNode>>,
    has_nil: bool,
    nil_value: Arc<Value>,
    meta: Meta,
    hash: CachedHash,
}

impl PersistentHashMap {
    /// The empty map.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            count: 0,
            root: None,
            has_nil: false,
            nil_value: Arc::new(Value::Nil),
            meta: None,
            hash: CachedHash::new(),
        }
    }

    /// Builds a map from alternating keys and values; later duplicates win.
    ///
    /// # Panics
    ///
    /// Panics when the slice has odd length.
    #[must_use]
    pub fn from_items(items: &[Value]) -> Self {
        let mut map = Self::new();
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

    /// Returns `true` if the map contains `key`.
    #[must_use]
    pub fn contains_key(&self, key: &Value) -> bool {
        if key.is_nil() {
            return self.has_nil;
        }
        match &self.root {
            None => false,
            Some(root) => node_find(root, 0, key.hash_value(), key).is_some(),
        }
    }

    /// The entry for `key`, or `None` when absent.
    #[must_use]
    pub fn entry_at(&self, key: &Value) -> Option<MapEntry> {
        if key.is_nil() {
            return self
                .has_nil
                .then(|| MapEntry::new(Value::Nil, (*self.nil_value).clone()));
        }
        let root = self.root.as_ref()?;
        node_find(root, 0, key.hash_value(), key).map(|(k, v)| MapEntry::new(k.clone(), v.clone()))
    }

    /// The value for `key`, or nil when absent.
    #[must_use]
    pub fn val_at(&self, key: &Value) -> Value {
        self.val_at_or(key, Value::Nil)
    }

    /// The value for `key`, or `not_found` when absent.
    #[must_use]
    pub fn val_at_or(&self, key: &Value, not_found: Value) -> Value {
        if key.is_nil() {
            return if self.has_nil {
                (*self.nil_value).clone()
            } else {
                not_found
            };
        }
        match &self.root {
            None => not_found,
            Some(root) => match node_find(root, 0, key.hash_value(), key) {
                Some((_, v)) => v.clone(),
                None => not_found,
            },
        }
    }

    /// A new map with `key` associated to `val`. Associating an already
    /// equivalent value returns the map unchanged.
    #[must_use]
    pub fn assoc(&self, key: Value, val: Value) -> Self {
        if key.is_nil() {
            if self.has_nil && val.equiv(&self.nil_value) {
                return self.clone();
            }
            return Self {
                count: if self.has_nil { self.count } else { self.count + 1 },
                root: self.root.clone(),
                has_nil: true,
                nil_value: Arc::new(val),
                meta: self.meta.clone(),
                hash: CachedHash::new(),
            };
        }
        let root = self.root.clone().unwrap_or_else(empty_bitmap_node);
        let (new_root, added) = node_assoc(&root, 0, key.hash_value(), &key, &val);
        if self.root.as_ref().is_some_and(|old| Arc::ptr_eq(old, &new_root)) {
            return self.clone();
        }
        Self {
            count: if added { self.count + 1 } else { self.count },
            root: Some(new_root),
            has_nil: self.has_nil,
            nil_value: self.nil_value.clone(),
            meta: self.meta.clone(),
            hash: CachedHash::new(),
        }
    }

    /// A new map without `key`. Removing an absent key returns the map
    /// unchanged.
    #[must_use]
    pub fn without(&self, key: &Value) -> Self {
        if key.is_nil() {
            if !self.has_nil {
                return self.clone();
            }
            return Self {
                count: self.count - 1,
                root: self.root.clone(),
                has_nil: false,
                nil_value: Arc::new(Value::Nil),
                meta: self.meta.clone(),
                hash: CachedHash::new(),
            };
        }
        let Some(root) = &self.root else {
            return self.clone();
        };
        match node_without(root, 0, key.hash_value(), key) {
            Removal::Unchanged => self.clone(),
            Removal::Removed(new_root) => Self {
                count: self.count - 1,
                root: new_root,
                has_nil: self.has_nil,
                nil_value: self.nil_value.clone(),
                meta: self.meta.clone(),
                hash: CachedHash::new(),
            },
        }
    }

    /// Conjoins an entry-shaped value: a map entry, a two-element vector,
    /// or a seqable of map entries.
    ///
    /// # Panics
    ///
    /// Panics on a vector that is not a pair or a seq element that is not a
    /// map entry.
    #[must_use]
    pub fn conj(&self, entry: &Value) -> Self {
        map_conj(self.clone(), entry, Self::assoc)
    }

    /// A seq of the entries, or `None` for the empty map. The nil-key entry,
    /// when present, leads.
    #[must_use]
    pub fn seq(&self) -> Option<Seq> {
        let trie_seq = self.root.as_ref().and_then(node_seq);
        if self.has_nil {
            let nil_entry = Value::Entry(Arc::new(MapEntry::new(Value::Nil, (*self.nil_value).clone())));
            Some(Cons::new(nil_entry, trie_seq).into_seq())
        } else {
            trie_seq
        }
    }

    /// An iterator over `(key, value)` pairs.
    #[must_use]
    pub fn iter(&self) -> PersistentHashMapIterator {
        let mut entries = Vec::with_capacity(self.count);
        if self.has_nil {
            entries.push((Value::Nil, (*self.nil_value).clone()));
        }
        if let Some(root) = &self.root {
            collect_entries(root, &mut entries);
        }
        PersistentHashMapIterator { entries, index: 0 }
    }

    /// An iterator over the keys.
    pub fn keys(&self) -> impl Iterator<Item = Value> {
        self.iter().map(|(k, _)| k)
    }

    /// An iterator over the values.
    pub fn values(&self) -> impl Iterator<Item = Value> {
        self.iter().map(|(_, v)| v)
    }

    /// An empty map carrying this map's metadata.
    #[must_use]
    pub fn empty(&self) -> Self {
        Self {
            count: 0,
            root: None,
            has_nil: false,
            nil_value: Arc::new(Value::Nil),
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
            count: self.count,
            root: self.root.clone(),
            has_nil: self.has_nil,
            nil_value: self.nil_value.clone(),
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

/// Shared map-cons logic for both map kinds.
pub(crate) fn map_conj<M: Clone>(map: M, entry: &Value, assoc: impl Fn(&M, Value, Value) -> M) -> M {
    match entry {
        Value::Entry(e) => assoc(&map, e.key().clone(), e.val().clone()),
        Value::Vector(v) => {
            assert!(v.len() == 2, "vector arg to map conj must be a pair");
            assoc(&map, v.nth(0), v.nth(1))
        }
        other => {
            let mut result = map;
            let mut current = other.seq();
            while let Some(seq) = current {
                let Value::Entry(e) = seq.first() else {
                    panic!("cannot conj {} onto a map", seq.first());
                };
                result = assoc(&result, e.key().clone(), e.val().clone());
                current = seq.next();
            }
            result
        }
    }
}

fn collect_entries(node: &HamtNode, entries: &mut Vec<(Value, Value)>) {
    match node {
        HamtNode::Bitmap(bitmap_node) => {
            for entry in bitmap_node.entries.iter() {
                match entry {
                    BitmapEntry::Pair(k, v) => entries.push((k.clone(), v.clone())),
                    BitmapEntry::Child(child) => collect_entries(child, entries),
                }
            }
        }
        HamtNode::Array(array_node) => {
            for child in array_node.children.iter().flatten() {
                collect_entries(child, entries);
            }
        }
        HamtNode::Collision(collision) => {
            entries.extend(collision.entries.iter().cloned());
        }
    }
}

impl Default for PersistentHashMap {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<(Value, Value)> for PersistentHashMap {
    fn from_iter<I: IntoIterator<Item = (Value, Value)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (key, val) in iter {
            map = map.assoc(key, val);
        }
        map
    }
}

impl PartialEq for PersistentHashMap {
    fn eq(&self, other: &Self) -> bool {
        if self.count != other.count {
            return false;
        }
        self.iter()
            .all(|(k, v)| other.val_at_or(&k, Value::Nil).equiv(&v) && other.contains_key(&k))
    }
}

impl fmt::Debug for PersistentHashMap {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_map().entries(self.iter()).finish()
    }
}

/// An iterator over the entries of a [`PersistentHashMap`].
pub struct PersistentHashMapIterator {
    entries: Vec<(Value, Value)>,
    index: usize,
}

impl Iterator for PersistentHashMapIterator {
    type Item = (Value, Value);

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.entries.get(self.index)?.clone();
        self.index += 1;
        Some(entry)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.entries.len().saturating_sub(self.index);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for PersistentHashMapIterator {}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn v(i: i64) -> Value {
        Value::from(i)
    }

    #[rstest]
    fn test_new_is_empty() {
        let map = PersistentHashMap::new();
        assert!(map.is_empty());
        assert!(map.seq().is_none());
    }

    #[rstest]
    fn test_from_items_and_lookup() {
        let map = PersistentHashMap::from_items(&[Value::from("abc"), Value::from("def")]);
        assert_eq!(map.len(), 1);
        assert!(map.contains_key(&Value::from("abc")));
        assert_eq!(map.val_at(&Value::from("abc")), Value::from("def"));
        assert_eq!(map.val_at_or(&Value::from("zzz"), v(-1)), v(-1));
    }

    #[rstest]
    #[should_panic(expected = "No value supplied for key")]
    fn test_odd_constructor_input_faults() {
        let _ = PersistentHashMap::from_items(&[v(1), v(2), v(3)]);
    }

    #[rstest]
    fn test_duplicate_keys_last_write_wins() {
        let map = PersistentHashMap::from_items(&[v(1), v(10), v(1), v(20)]);
        assert_eq!(map.len(), 1);
        assert_eq!(map.val_at(&v(1)), v(20));
    }

    #[rstest]
    fn test_assoc_preserves_the_original() {
        let map = PersistentHashMap::new().assoc(v(1), v(10));
        let updated = map.assoc(v(1), v(20));
        assert_eq!(map.val_at(&v(1)), v(10));
        assert_eq!(updated.val_at(&v(1)), v(20));
    }

    #[rstest]
    fn test_assoc_of_equivalent_value_is_a_no_op() {
        let map = PersistentHashMap::new().assoc(v(1), v(10)).assoc(v(2), v(20));
        let same = map.assoc(v(1), map.val_at(&v(1)));
        assert_eq!(same.len(), map.len());
        assert!(same
            .root
            .as_ref()
            .zip(map.root.as_ref())
            .is_some_and(|(a, b)| Arc::ptr_eq(a, b)));
    }

    #[rstest]
    fn test_without_absent_key_is_a_no_op() {
        let map = PersistentHashMap::new().assoc(v(1), v(10));
        let same = map.without(&v(99));
        assert_eq!(same.len(), 1);
        assert!(same
            .root
            .as_ref()
            .zip(map.root.as_ref())
            .is_some_and(|(a, b)| Arc::ptr_eq(a, b)));
    }

    #[rstest]
    fn test_nil_key_lives_beside_the_trie() {
        let map = PersistentHashMap::new().assoc(Value::Nil, v(6));
        assert_eq!(map.len(), 1);
        assert!(map.contains_key(&Value::Nil));
        assert_eq!(map.val_at(&Value::Nil), v(6));

        let updated = map.assoc(Value::Nil, v(12));
        assert_eq!(updated.len(), 1);
        assert_eq!(updated.val_at(&Value::Nil), v(12));

        let removed = updated.without(&Value::Nil);
        assert!(!removed.contains_key(&Value::Nil));
        assert!(removed.is_empty());
    }

    #[rstest]
    fn test_seq_prepends_the_nil_entry() {
        let map = PersistentHashMap::new().assoc(v(1), v(10)).assoc(Value::Nil, v(0));
        let first = map.seq().unwrap().first();
        let Value::Entry(entry) = first else {
            panic!("expected an entry");
        };
        assert!(entry.key().is_nil());
    }

    #[rstest]
    fn test_grows_past_bitmap_promotion() {
        let mut map = PersistentHashMap::new();
        for i in 0..100 {
            map = map.assoc(v(i), v(i * 2));
        }
        assert_eq!(map.len(), 100);
        for i in 0..100 {
            assert_eq!(map.val_at(&v(i)), v(i * 2), "key {i}");
        }
        let mut shrunk = map.clone();
        for i in 0..100 {
            shrunk = shrunk.without(&v(i));
        }
        assert!(shrunk.is_empty());
    }

    #[rstest]
    fn test_seq_visits_every_entry_once() {
        let mut map = PersistentHashMap::new();
        for i in 0..64 {
            map = map.assoc(v(i), v(i));
        }
        let visited: Vec<Value> = map
            .seq()
            .unwrap()
            .iter()
            .map(|e| match e {
                Value::Entry(entry) => entry.key().clone(),
                other => panic!("expected an entry, got {other}"),
            })
            .collect();
        assert_eq!(visited.len(), 64);
        for i in 0..64 {
            assert!(visited.iter().any(|k| k.equiv(&v(i))), "missing key {i}");
        }
    }

    #[rstest]
    fn test_equality_is_order_independent() {
        let a = PersistentHashMap::from_items(&[v(1), v(10), v(2), v(20)]);
        let b = PersistentHashMap::from_items(&[v(2), v(20), v(1), v(10)]);
        assert_eq!(a, b);
        assert_eq!(a.hash_value(), b.hash_value());
    }

    #[rstest]
    fn test_conj_accepts_entry_shapes() {
        let base = PersistentHashMap::new();
        let entry = Value::Entry(Arc::new(MapEntry::new(v(1), v(10))));
        assert_eq!(base.conj(&entry).val_at(&v(1)), v(10));

        let pair = Value::Vector(crate::persistent::PersistentVector::from_items(&[v(2), v(20)]));
        assert_eq!(base.conj(&pair).val_at(&v(2)), v(20));

        let other = PersistentHashMap::from_items(&[v(3), v(30)]);
        let merged = base.conj(&Value::HashMap(other));
        assert_eq!(merged.val_at(&v(3)), v(30));
    }
}
