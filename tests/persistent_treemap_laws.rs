//! Property-based laws for `PersistentTreeMap`.

use std::cmp::Ordering;

use proptest::prelude::*;
use stemma::{PersistentTreeMap, Value};

fn arbitrary_entries() -> impl Strategy<Value = Vec<(i64, i64)>> {
    prop::collection::vec((any::<i64>(), any::<i64>()), 0..60)
}

fn build(entries: &[(i64, i64)]) -> PersistentTreeMap {
    entries
        .iter()
        .map(|(k, v)| (Value::from(*k), Value::from(*v)))
        .collect()
}

proptest! {
    #[test]
    fn prop_lookup_after_build(entries in arbitrary_entries()) {
        let map = build(&entries);
        let mut expected = std::collections::HashMap::new();
        for (k, v) in &entries {
            expected.insert(*k, *v);
        }
        prop_assert_eq!(map.len(), expected.len());
        for (k, v) in expected {
            prop_assert!(map.contains_key(&Value::from(k)));
            prop_assert_eq!(map.val_at(&Value::from(k)), Value::from(v));
        }
    }

    #[test]
    fn prop_ascending_seq_is_sorted(entries in arbitrary_entries()) {
        let map = build(&entries);
        let keys: Vec<Value> = map.keys().collect();
        for pair in keys.windows(2) {
            prop_assert_eq!(pair[0].compare(&pair[1]), Ordering::Less);
        }
    }

    #[test]
    fn prop_descending_seq_reverses_ascending(entries in arbitrary_entries()) {
        let map = build(&entries);
        let ascending: Vec<Value> = map
            .seq_a(true)
            .map_or_else(Vec::new, |s| s.iter().map(|e| PersistentTreeMap::entry_key(&e)).collect());
        let mut descending: Vec<Value> = map
            .seq_a(false)
            .map_or_else(Vec::new, |s| s.iter().map(|e| PersistentTreeMap::entry_key(&e)).collect());
        descending.reverse();
        prop_assert_eq!(ascending, descending);
    }

    #[test]
    fn prop_seq_from_yields_keys_at_or_past(entries in arbitrary_entries(), from in any::<i64>()) {
        let map = build(&entries);
        let keys: Vec<Value> = map
            .seq_from(&Value::from(from), true)
            .map_or_else(Vec::new, |s| s.iter().map(|e| PersistentTreeMap::entry_key(&e)).collect());
        let expected: Vec<Value> = map
            .keys()
            .filter(|k| k.compare(&Value::from(from)) != Ordering::Less)
            .collect();
        prop_assert_eq!(keys, expected);
    }

    #[test]
    fn prop_assoc_of_current_value_is_identity(entries in arbitrary_entries()) {
        let map = build(&entries);
        for (k, _) in &entries {
            let key = Value::from(*k);
            let same = map.assoc(key.clone(), map.val_at(&key));
            prop_assert_eq!(same.len(), map.len());
            prop_assert_eq!(&same, &map);
        }
    }

    #[test]
    fn prop_remove_everything_in_random_order(entries in arbitrary_entries()) {
        let mut map = build(&entries);
        let mut keys: Vec<i64> = entries.iter().map(|(k, _)| *k).collect();
        keys.sort_unstable_by_key(|k| k.wrapping_mul(0x9e37_79b9_7f4a_7c15u64 as i64));
        for k in keys {
            map = map.without(&Value::from(k));
            prop_assert!(!map.contains_key(&Value::from(k)));
        }
        prop_assert!(map.is_empty());
    }
}
