//! Marshal-equivalent dump/load round-trips.

use garnet_runtime::{Env, Value, boot, exception, hash, intern, rational, serialize, string};
use serial_test::serial;

#[test]
#[serial]
fn rational_round_trips() {
    boot();
    let mut env = Env::new();
    let original = rational::new_rational(&mut env, 6, -8).unwrap();
    assert_eq!(rational::rational_parts(original), (-3, 4));

    let bytes = serialize::dump(&mut env, original).unwrap();
    let loaded = serialize::load(&mut env, &bytes).unwrap();

    assert_eq!(rational::rational_parts(loaded), rational::rational_parts(original));
    assert!(loaded.is_frozen());
}

#[test]
#[serial]
fn core_values_round_trip() {
    boot();
    let mut env = Env::new();

    let array = garnet_runtime::array::new_array(vec![
        Value::integer(1),
        intern("sym"),
        string::new_string("text"),
        garnet_runtime::GlobalEnv::the().nil_obj(),
    ]);

    let bytes = serialize::dump(&mut env, array).unwrap();
    let loaded = serialize::load(&mut env, &bytes).unwrap();

    let items = loaded.object().array().to_vec();
    assert_eq!(items.len(), 4);
    assert_eq!(items[0], Value::integer(1));
    assert_eq!(items[1], intern("sym"));
    assert_eq!(items[2].object().string().to_rust_string(), "text");
    assert!(items[3].is_nil());
}

#[test]
#[serial]
fn hashes_keep_insertion_order() {
    boot();
    let mut env = Env::new();
    let h = hash::new_hash();
    hash::hash_set(&mut env, h, intern("first"), Value::integer(1)).unwrap();
    hash::hash_set(&mut env, h, intern("second"), Value::integer(2)).unwrap();
    hash::hash_set(&mut env, h, intern("third"), Value::integer(3)).unwrap();

    let bytes = serialize::dump(&mut env, h).unwrap();
    let loaded = serialize::load(&mut env, &bytes).unwrap();

    let keys = loaded.object().hash().keys();
    assert_eq!(keys, vec![intern("first"), intern("second"), intern("third")]);
}

#[test]
#[serial]
fn big_integers_round_trip() {
    boot();
    let mut env = Env::new();
    let big = garnet_runtime::integer::add(
        &mut env,
        Value::integer((1 << 62) - 1),
        Value::integer((1 << 62) - 1),
    )
    .unwrap();
    assert!(!big.is_integer());

    let bytes = serialize::dump(&mut env, big).unwrap();
    let loaded = serialize::load(&mut env, &bytes).unwrap();
    assert!(garnet_runtime::integer::eq(&mut env, big, loaded).unwrap());
}

#[test]
#[serial]
fn identity_bearing_objects_do_not_dump() {
    boot();
    let mut env = Env::new();
    let (reader, writer) = garnet_runtime::io::create_pipe(&mut env).unwrap();

    let err = serialize::dump(&mut env, reader).unwrap_err();
    assert!(err.0.is_a(exception::exception_class("TypeError")));

    garnet_runtime::io::io_close(&mut env, reader).unwrap();
    garnet_runtime::io::io_close(&mut env, writer).unwrap();
}
