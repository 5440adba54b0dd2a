//! Property-based laws of the shared sequence protocol.
//!
//! These exercise the contracts that hold across every collection kind:
//! counting, seq/indexed agreement, structural equivalence, and hash
//! agreement between equivalent collections.

use proptest::prelude::*;
use stemma::{PersistentHashMap, PersistentList, PersistentTreeMap, PersistentVector, Value};

fn arbitrary_values() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(any::<i64>(), 0..80)
}

fn values_of(items: &[i64]) -> Vec<Value> {
    items.iter().map(|i| Value::from(*i)).collect()
}

// =============================================================================
// Count law: n conses over any empty collection count n
// =============================================================================

proptest! {
    #[test]
    fn prop_count_law_for_lists(items in arbitrary_values()) {
        let mut list = PersistentList::new();
        for item in &items {
            list = list.cons(Value::from(*item));
        }
        prop_assert_eq!(list.len(), items.len());
    }

    #[test]
    fn prop_count_law_for_vectors(items in arbitrary_values()) {
        let mut vector = PersistentVector::new();
        for item in &items {
            vector = vector.push(Value::from(*item));
        }
        prop_assert_eq!(vector.len(), items.len());
        prop_assert_eq!(vector.seq().map_or(0, |s| s.count()), items.len());
    }
}

// =============================================================================
// Seq / indexed agreement
// =============================================================================

proptest! {
    #[test]
    fn prop_vector_seq_matches_indexed_traversal(items in arbitrary_values()) {
        let vector = PersistentVector::from_items(&values_of(&items));
        let walked: Vec<Value> = vector.seq().map_or_else(Vec::new, |s| s.iter().collect());
        let indexed: Vec<Value> = (0..vector.len()).map(|i| vector.nth(i)).collect();
        prop_assert_eq!(walked, indexed);
    }

    #[test]
    fn prop_list_seq_matches_construction_order(items in arbitrary_values()) {
        let list = PersistentList::from_items(&values_of(&items));
        let walked: Vec<Value> = list.seq().map_or_else(Vec::new, |s| s.iter().collect());
        prop_assert_eq!(walked, values_of(&items));
    }
}

// =============================================================================
// Cross-collection equivalence and hash agreement
// =============================================================================

proptest! {
    #[test]
    fn prop_list_and_vector_equivalence(items in arbitrary_values()) {
        let list = Value::List(PersistentList::from_items(&values_of(&items)));
        let vector = Value::Vector(PersistentVector::from_items(&values_of(&items)));
        prop_assert!(list.equiv(&vector));
        prop_assert!(vector.equiv(&list));
        prop_assert_eq!(list.hash_value(), vector.hash_value());
    }

    #[test]
    fn prop_equivalence_is_reflexive_and_symmetric(items in arbitrary_values()) {
        let vector = Value::Vector(PersistentVector::from_items(&values_of(&items)));
        prop_assert!(vector.equiv(&vector));
        let other = Value::Vector(PersistentVector::from_items(&values_of(&items)));
        prop_assert_eq!(vector.equiv(&other), other.equiv(&vector));
    }

    #[test]
    fn prop_map_kinds_agree(entries in prop::collection::vec((any::<i32>(), any::<i64>()), 0..60)) {
        let hash_map: PersistentHashMap = entries
            .iter()
            .map(|(k, value)| (Value::from(*k), Value::from(*value)))
            .collect();
        let tree_map: PersistentTreeMap = entries
            .iter()
            .map(|(k, value)| (Value::from(*k), Value::from(*value)))
            .collect();
        let a = Value::HashMap(hash_map);
        let b = Value::TreeMap(tree_map);
        prop_assert!(a.equiv(&b));
        prop_assert!(b.equiv(&a));
        prop_assert_eq!(a.hash_value(), b.hash_value());
    }
}

// =============================================================================
// Seq prepend
// =============================================================================

proptest! {
    #[test]
    fn prop_cons_prepends_one_element(items in prop::collection::vec(any::<i64>(), 1..40), extra in any::<i64>()) {
        let vector = PersistentVector::from_items(&values_of(&items));
        let seq = vector.seq().expect("non-empty");
        let consed = seq.cons(Value::from(extra));
        prop_assert_eq!(consed.count(), items.len() + 1);
        prop_assert!(consed.first().equiv(&Value::from(extra)));
        prop_assert!(consed.next().expect("tail").first().equiv(&Value::from(items[0])));
    }
}
