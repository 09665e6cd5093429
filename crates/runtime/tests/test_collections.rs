//! Array and Hash payload semantics: growth, insertion order, key
//! equality, and the iteration mutation guard.

use garnet_runtime::{Env, Value, array, boot, exception, hash, intern, string};
use serial_test::serial;

#[test]
#[serial]
fn array_push_and_iteration_guard() {
    boot();
    let mut env = Env::new();
    let a = array::new_array(vec![Value::integer(1), Value::integer(2)]);
    array::array_push(&mut env, a, Value::integer(3)).unwrap();
    assert_eq!(a.object().array().len(), 3);

    // Mutation mid-iteration raises.
    let err = array::array_each(&mut env, a, |env, _item| {
        array::array_push(env, a, Value::integer(4)).map(|_| ())
    })
    .unwrap_err();
    assert!(err.0.is_a(exception::exception_class("RuntimeError")));

    // The guard resets; mutation works again afterwards.
    array::array_push(&mut env, a, Value::integer(4)).unwrap();
    assert_eq!(a.object().array().len(), 4);
}

#[test]
#[serial]
fn hash_insertion_order_and_updates() {
    boot();
    let mut env = Env::new();
    let h = hash::new_hash();
    hash::hash_set(&mut env, h, intern("a"), Value::integer(1)).unwrap();
    hash::hash_set(&mut env, h, intern("b"), Value::integer(2)).unwrap();
    hash::hash_set(&mut env, h, intern("c"), Value::integer(3)).unwrap();
    // Updating keeps position.
    hash::hash_set(&mut env, h, intern("a"), Value::integer(10)).unwrap();

    assert_eq!(h.object().hash().keys(), vec![intern("a"), intern("b"), intern("c")]);
    assert_eq!(hash::hash_get(&mut env, h, intern("a")).unwrap(), Value::integer(10));

    hash::hash_delete(&mut env, h, intern("b")).unwrap();
    assert_eq!(h.object().hash().keys(), vec![intern("a"), intern("c")]);
    assert_eq!(h.object().hash().len(), 2);
}

#[test]
#[serial]
fn string_keys_hash_structurally() {
    boot();
    let mut env = Env::new();
    let h = hash::new_hash();
    let k1 = string::new_string("key");
    let k2 = string::new_string("key");
    assert_ne!(k1, k2);

    hash::hash_set(&mut env, h, k1, Value::integer(1)).unwrap();
    // A distinct but equal string cell finds the same slot.
    assert_eq!(hash::hash_get(&mut env, h, k2).unwrap(), Value::integer(1));
    hash::hash_set(&mut env, h, k2, Value::integer(2)).unwrap();
    assert_eq!(h.object().hash().len(), 1);
}

#[test]
#[serial]
fn fixnum_and_bignum_keys_are_eql() {
    boot();
    let mut env = Env::new();
    let h = hash::new_hash();
    let small = Value::integer(7);
    hash::hash_set(&mut env, h, small, intern("hit")).unwrap();

    // The same mathematical integer boxed still finds the entry.
    let boxed = garnet_runtime::integer::boxed_from_i64(7);
    assert!(!boxed.is_integer());
    assert_eq!(hash::hash_get(&mut env, h, boxed).unwrap(), intern("hit"));
}

#[test]
#[serial]
fn hash_mutation_during_iteration_raises() {
    boot();
    let mut env = Env::new();
    let h = hash::new_hash();
    hash::hash_set(&mut env, h, intern("k"), Value::integer(1)).unwrap();

    let err = hash::hash_each(&mut env, h, |env, _k, _v| {
        hash::hash_set(env, h, intern("fresh"), Value::integer(2)).map(|_| ())
    })
    .unwrap_err();
    assert!(err.0.is_a(exception::exception_class("RuntimeError")));
    assert!(exception::message_of(err.0).contains("during iteration"));
}
