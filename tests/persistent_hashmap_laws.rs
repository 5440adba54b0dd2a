//! Property-based laws for `PersistentHashMap`.

use proptest::prelude::*;
use stemma::{PersistentHashMap, Value};

fn arbitrary_key() -> impl Strategy<Value = String> {
    "[a-z]{1,8}"
}

fn arbitrary_entries() -> impl Strategy<Value = Vec<(String, i64)>> {
    prop::collection::vec((arbitrary_key(), any::<i64>()), 0..60)
}

fn build(entries: &[(String, i64)]) -> PersistentHashMap {
    entries
        .iter()
        .map(|(k, v)| (Value::from(k.clone()), Value::from(*v)))
        .collect()
}

// =============================================================================
// Lookup-after-assoc law
// =============================================================================

proptest! {
    #[test]
    fn prop_assoc_then_val_at(entries in arbitrary_entries(), key in arbitrary_key(), val in any::<i64>()) {
        let map = build(&entries).assoc(Value::from(key.clone()), Value::from(val));
        prop_assert!(map.contains_key(&Value::from(key.clone())));
        prop_assert_eq!(map.val_at(&Value::from(key)), Value::from(val));
    }

    #[test]
    fn prop_assoc_does_not_disturb_other_keys(entries in arbitrary_entries(), key in arbitrary_key(), val in any::<i64>()) {
        let map = build(&entries);
        let updated = map.assoc(Value::from(key.clone()), Value::from(val));
        for (other, _) in &entries {
            if *other != key {
                prop_assert_eq!(
                    updated.val_at(&Value::from(other.clone())),
                    map.val_at(&Value::from(other.clone()))
                );
            }
        }
    }
}

// =============================================================================
// Last-write-wins over duplicate keys
// =============================================================================

proptest! {
    #[test]
    fn prop_duplicates_last_write_wins(entries in arbitrary_entries()) {
        let map = build(&entries);
        let mut expected = std::collections::HashMap::new();
        for (k, v) in &entries {
            expected.insert(k.clone(), *v);
        }
        prop_assert_eq!(map.len(), expected.len());
        for (k, v) in expected {
            prop_assert_eq!(map.val_at(&Value::from(k)), Value::from(v));
        }
    }
}

// =============================================================================
// Removal laws
// =============================================================================

proptest! {
    #[test]
    fn prop_without_removes_exactly_one_key(entries in arbitrary_entries(), key in arbitrary_key()) {
        let map = build(&entries);
        let removed = map.without(&Value::from(key.clone()));
        prop_assert!(!removed.contains_key(&Value::from(key.clone())));
        for (other, _) in &entries {
            if *other != key {
                prop_assert!(removed.contains_key(&Value::from(other.clone())));
            }
        }
    }

    #[test]
    fn prop_without_absent_key_is_identity(entries in arbitrary_entries(), key in arbitrary_key()) {
        let map = build(&entries);
        if !map.contains_key(&Value::from(key.clone())) {
            let removed = map.without(&Value::from(key));
            prop_assert_eq!(removed.len(), map.len());
            prop_assert_eq!(removed, map);
        }
    }
}

// =============================================================================
// Identity-preserving no-op assoc
// =============================================================================

proptest! {
    #[test]
    fn prop_assoc_of_current_value_is_identity(entries in arbitrary_entries()) {
        let map = build(&entries);
        for (k, _) in &entries {
            let key = Value::from(k.clone());
            let same = map.assoc(key.clone(), map.val_at(&key));
            prop_assert_eq!(same.len(), map.len());
            prop_assert_eq!(&same, &map);
        }
    }
}

// =============================================================================
// Equivalence and hashing
// =============================================================================

proptest! {
    #[test]
    fn prop_insertion_order_is_irrelevant(entries in arbitrary_entries()) {
        let forward = build(&entries);
        // Reversing changes which duplicate wins; keep only the winners.
        let mut seen = std::collections::HashSet::new();
        let deduped: Vec<(String, i64)> = entries
            .iter()
            .rev()
            .filter(|(k, _)| seen.insert(k.clone()))
            .cloned()
            .collect();
        let backward = build(&deduped);
        prop_assert_eq!(&forward, &backward);
        prop_assert_eq!(forward.hash_value(), backward.hash_value());
    }
}
