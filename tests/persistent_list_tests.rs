//! Integration tests for `PersistentList` and the seq protocol around it.

use stemma::{Cons, PersistentList, PersistentVector, Value};

fn v(i: i64) -> Value {
    Value::from(i)
}

#[test]
fn stack_discipline() {
    let mut list = PersistentList::new();
    for i in 0..1_000 {
        list = list.cons(v(i));
    }
    assert_eq!(list.len(), 1_000);
    for i in (0..1_000).rev() {
        assert_eq!(list.peek(), v(i));
        list = list.pop();
    }
    assert!(list.is_empty());
    // Popping past empty stays empty rather than faulting.
    assert!(list.pop().is_empty());
    assert_eq!(list.peek(), Value::Nil);
}

#[test]
fn seq_more_chain_terminates_in_the_empty_list() {
    let list = PersistentList::from_items(&[v(1), v(2)]);
    let seq = list.seq().unwrap();
    let after_one = seq.more();
    let Value::Seq(rest) = after_one else {
        panic!("expected a seq");
    };
    assert_eq!(rest.first(), v(2));
    match rest.more() {
        Value::List(empty) => assert!(empty.is_empty()),
        other => panic!("expected the canonical empty list, got {other}"),
    }
}

#[test]
fn cons_chain_over_mixed_backing() {
    // A cons cell prepended onto a vector seq behaves like any other seq.
    let vector: PersistentVector = (1..4).map(v).collect();
    let chain = Cons::new(v(0), vector.seq()).into_seq();
    assert_eq!(chain.count(), 4);
    let collected: Vec<Value> = chain.iter().collect();
    assert_eq!(collected, vec![v(0), v(1), v(2), v(3)]);
}

#[test]
fn list_and_vector_with_same_elements_are_equivalent() {
    let list = PersistentList::from_items(&[v(1), v(2), v(3)]);
    let vector = PersistentVector::from_items(&[v(1), v(2), v(3)]);
    assert!(Value::List(list.clone()).equiv(&Value::Vector(vector.clone())));
    assert!(Value::Vector(vector.clone()).equiv(&Value::List(list.clone())));
    assert_eq!(
        Value::List(list).hash_value(),
        Value::Vector(vector).hash_value()
    );
}

#[test]
fn empty_collections_of_sequential_kinds_are_equivalent() {
    let empty_list = Value::List(PersistentList::new());
    let empty_vector = Value::Vector(PersistentVector::new());
    assert!(empty_list.equiv(&empty_vector));
    assert_eq!(empty_list.hash_value(), empty_vector.hash_value());
}
