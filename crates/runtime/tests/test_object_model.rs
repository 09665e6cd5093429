//! Object model and dispatch: subclassing, singleton classes, module
//! inclusion order, visibility, aliasing, constants, and class variables.

use garnet_runtime::object::ObjectType;
use garnet_runtime::{
    Args, Block, Env, GlobalEnv, Value, boot, dispatch, exception, intern, kernel, klass,
};
use serial_test::serial;

fn returns_a(_env: &mut Env, _self: Value, _args: Args, _block: Option<&Block>) -> garnet_runtime::Result {
    Ok(intern("a"))
}

fn returns_b(_env: &mut Env, _self: Value, _args: Args, _block: Option<&Block>) -> garnet_runtime::Result {
    Ok(intern("b"))
}

fn returns_m1(_env: &mut Env, _self: Value, _args: Args, _block: Option<&Block>) -> garnet_runtime::Result {
    Ok(intern("m1"))
}

fn returns_m2(_env: &mut Env, _self: Value, _args: Args, _block: Option<&Block>) -> garnet_runtime::Result {
    Ok(intern("m2"))
}

fn new_class(env: &mut Env, name: &str) -> Value {
    let object = GlobalEnv::the().object_class();
    klass::subclass(env, object, Some(name), ObjectType::Object).unwrap()
}

#[test]
#[serial]
fn class_is_self_typed_and_basic_object_is_root() {
    let genv = boot();
    assert_eq!(genv.class_class().klass(), genv.class_class());
    assert!(genv.basic_object_class().object().module().superclass.is_null());
    let ancestors = klass::ancestors(genv.object_class());
    assert_eq!(ancestors.last().copied().unwrap(), genv.basic_object_class());
}

#[test]
#[serial]
fn subclass_instances_get_the_right_payload() {
    boot();
    let mut env = Env::new();
    let genv = GlobalEnv::the();
    let my_array = klass::subclass(&mut env, genv.array_class(), Some("MyArray"), ObjectType::Object).unwrap();
    let instance = kernel::obj_new(&mut env, my_array, &[], None).unwrap();
    assert_eq!(instance.object_type(), ObjectType::Array);
    assert_eq!(instance.klass(), my_array);
}

#[test]
#[serial]
fn singleton_method_shadows_class_method() {
    boot();
    let mut env = Env::new();
    let a = new_class(&mut env, "SingletonShadowA");
    klass::define_method(&mut env, a, intern("f"), returns_a, 0).unwrap();

    let obj = kernel::obj_new(&mut env, a, &[], None).unwrap();
    klass::define_singleton_method(&mut env, obj, intern("f"), returns_b, 0).unwrap();

    let fresh = kernel::obj_new(&mut env, a, &[], None).unwrap();
    assert_eq!(fresh.send(&mut env, intern("f"), &[], None).unwrap(), intern("a"));
    assert_eq!(obj.send(&mut env, intern("f"), &[], None).unwrap(), intern("b"));
}

#[test]
#[serial]
fn include_order_most_recent_wins() {
    boot();
    let mut env = Env::new();
    let m1 = klass::new_module(Some("IncOrderM1"));
    klass::define_method(&mut env, m1, intern("g"), returns_m1, 0).unwrap();
    let m2 = klass::new_module(Some("IncOrderM2"));
    klass::define_method(&mut env, m2, intern("g"), returns_m2, 0).unwrap();

    let c = new_class(&mut env, "IncOrderC");
    klass::include_once(&mut env, c, m1).unwrap();
    klass::include_once(&mut env, c, m2).unwrap();

    let obj = kernel::obj_new(&mut env, c, &[], None).unwrap();
    assert_eq!(obj.send(&mut env, intern("g"), &[], None).unwrap(), intern("m2"));
}

#[test]
#[serial]
fn include_is_idempotent() {
    boot();
    let mut env = Env::new();
    let m = klass::new_module(Some("IdemM"));
    let c = new_class(&mut env, "IdemC");
    klass::include_once(&mut env, c, m).unwrap();
    let before = klass::ancestors(c);
    klass::include_once(&mut env, c, m).unwrap();
    assert_eq!(before, klass::ancestors(c));
}

#[test]
#[serial]
fn prepend_comes_before_the_class() {
    boot();
    let mut env = Env::new();
    let c = new_class(&mut env, "PrependC");
    klass::define_method(&mut env, c, intern("g"), returns_a, 0).unwrap();
    let m = klass::new_module(Some("PrependM"));
    klass::define_method(&mut env, m, intern("g"), returns_m1, 0).unwrap();
    klass::prepend_once(&mut env, c, m).unwrap();

    let obj = kernel::obj_new(&mut env, c, &[], None).unwrap();
    assert_eq!(obj.send(&mut env, intern("g"), &[], None).unwrap(), intern("m1"));
    assert_eq!(klass::ancestors(c)[0], m);
}

#[test]
#[serial]
fn resolution_matches_ancestors_walk() {
    boot();
    let mut env = Env::new();
    let m = klass::new_module(Some("WalkM"));
    klass::define_method(&mut env, m, intern("walk"), returns_m1, 0).unwrap();
    let parent = new_class(&mut env, "WalkParent");
    klass::define_method(&mut env, parent, intern("walk"), returns_a, 0).unwrap();
    let child = klass::subclass(&mut env, parent, Some("WalkChild"), ObjectType::Object).unwrap();
    klass::include_once(&mut env, child, m).unwrap();

    let obj = kernel::obj_new(&mut env, child, &[], None).unwrap();

    // The dispatch answer must agree with a manual first-defined walk.
    let expected_owner = klass::ancestors(child)
        .into_iter()
        .find(|module| module.object().module().methods.contains_key(&intern("walk").symbol_id()))
        .unwrap();
    match dispatch::find_method(obj, intern("walk").symbol_id()) {
        dispatch::Lookup::Found(info) => assert_eq!(info.owner, expected_owner),
        _ => panic!("walk not found"),
    }
    assert_eq!(obj.send(&mut env, intern("walk"), &[], None).unwrap(), intern("m1"));
}

#[test]
#[serial]
fn undef_method_terminates_lookup() {
    boot();
    let mut env = Env::new();
    let parent = new_class(&mut env, "UndefParent");
    klass::define_method(&mut env, parent, intern("h"), returns_a, 0).unwrap();
    let child = klass::subclass(&mut env, parent, Some("UndefChild"), ObjectType::Object).unwrap();
    klass::undefine_method(&mut env, child, intern("h")).unwrap();

    let obj = kernel::obj_new(&mut env, child, &[], None).unwrap();
    let err = obj.send(&mut env, intern("h"), &[], None).unwrap_err();
    assert!(err.0.is_a(exception::exception_class("NoMethodError")));

    // The parent still answers.
    let parent_obj = kernel::obj_new(&mut env, parent, &[], None).unwrap();
    assert_eq!(parent_obj.send(&mut env, intern("h"), &[], None).unwrap(), intern("a"));
}

#[test]
#[serial]
fn method_missing_is_the_fallback() {
    boot();
    let mut env = Env::new();
    let c = new_class(&mut env, "MissingC");

    fn missing(_env: &mut Env, _self: Value, args: Args, _block: Option<&Block>) -> garnet_runtime::Result {
        // method_missing receives the name first.
        Ok(args.at_or_nil(0))
    }
    klass::define_method(&mut env, c, intern("method_missing"), missing, -1).unwrap();

    let obj = kernel::obj_new(&mut env, c, &[], None).unwrap();
    let got = obj.send(&mut env, intern("no_such"), &[Value::integer(5)], None).unwrap();
    assert_eq!(got, intern("no_such"));
}

#[test]
#[serial]
fn missing_method_raises_no_method_error() {
    boot();
    let mut env = Env::new();
    let obj = kernel::obj_new(&mut env, GlobalEnv::the().object_class(), &[], None).unwrap();
    let err = obj.send(&mut env, intern("definitely_absent"), &[], None).unwrap_err();
    assert!(err.0.is_a(exception::exception_class("NoMethodError")));
    assert!(exception::message_of(err.0).contains("definitely_absent"));
}

#[test]
#[serial]
fn private_methods_need_an_implicit_receiver() {
    boot();
    let mut env = Env::new();
    let c = new_class(&mut env, "PrivC");
    klass::define_method(&mut env, c, intern("secret"), returns_a, 0).unwrap();
    klass::set_method_visibility(&mut env, c, intern("secret"), garnet_runtime::Visibility::Private)
        .unwrap();

    let obj = kernel::obj_new(&mut env, c, &[], None).unwrap();
    // Implicit (send) works; public_send refuses.
    assert_eq!(obj.send(&mut env, intern("secret"), &[], None).unwrap(), intern("a"));
    let err = obj.public_send(&mut env, intern("secret"), &[], None).unwrap_err();
    assert!(err.0.is_a(exception::exception_class("NoMethodError")));
    assert!(!obj.respond_to(intern("secret")));
}

#[test]
#[serial]
fn alias_method_shares_behavior() {
    boot();
    let mut env = Env::new();
    let c = new_class(&mut env, "AliasC");
    klass::define_method(&mut env, c, intern("original"), returns_a, 0).unwrap();
    klass::alias_method(&mut env, c, intern("aka"), intern("original")).unwrap();

    let obj = kernel::obj_new(&mut env, c, &[], None).unwrap();
    let via_original = obj.send(&mut env, intern("original"), &[], None).unwrap();
    let via_alias = obj.send(&mut env, intern("aka"), &[], None).unwrap();
    assert_eq!(via_original, via_alias);

    // The alias keeps the original name on record.
    match dispatch::find_method(obj, intern("aka").symbol_id()) {
        dispatch::Lookup::Found(info) => {
            assert_eq!(info.method.name(), "aka");
            assert_eq!(info.method.original_name(), "original");
        }
        _ => panic!("alias not found"),
    }
}

#[test]
#[serial]
fn attr_accessor_reads_and_writes_ivars() {
    boot();
    let mut env = Env::new();
    let c = new_class(&mut env, "AttrC");
    klass::attr_accessor(&mut env, c, &[intern("name")]).unwrap();

    let obj = kernel::obj_new(&mut env, c, &[], None).unwrap();
    assert!(obj.send(&mut env, intern("name"), &[], None).unwrap().is_nil());
    obj.send(&mut env, intern("name="), &[Value::integer(7)], None).unwrap();
    assert_eq!(obj.send(&mut env, intern("name"), &[], None).unwrap(), Value::integer(7));
    assert_eq!(
        obj.object().ivar_get(intern("@name").symbol_id()),
        Some(Value::integer(7))
    );
}

#[test]
#[serial]
fn constants_and_privacy() {
    boot();
    let mut env = Env::new();
    let c = new_class(&mut env, "ConstHolder");
    klass::const_set(&mut env, c, intern("WIDTH"), Value::integer(80)).unwrap();
    let found = klass::const_find(
        &mut env,
        c,
        intern("WIDTH"),
        klass::ConstLookupSearchMode::NotStrict,
        klass::ConstLookupFailureMode::Raise,
    )
    .unwrap();
    assert_eq!(found, Some(Value::integer(80)));

    klass::set_constant_private(c, intern("WIDTH"), true);
    // Still readable from the defining class itself.
    assert!(
        klass::const_find(
            &mut env,
            c,
            intern("WIDTH"),
            klass::ConstLookupSearchMode::NotStrict,
            klass::ConstLookupFailureMode::Raise,
        )
        .is_ok()
    );
    // Unreadable from outside: a subclass finds it on its ancestor and is
    // rejected.
    let sub = klass::subclass(&mut env, c, Some("ConstHolderSub"), ObjectType::Object).unwrap();
    let err = klass::const_find(
        &mut env,
        sub,
        intern("WIDTH"),
        klass::ConstLookupSearchMode::NotStrict,
        klass::ConstLookupFailureMode::Raise,
    );
    assert!(err.is_err());

    // Missing constants honor the failure mode.
    let none = klass::const_find(
        &mut env,
        c,
        intern("ABSENT"),
        klass::ConstLookupSearchMode::NotStrict,
        klass::ConstLookupFailureMode::None,
    )
    .unwrap();
    assert_eq!(none, None);
}

#[test]
#[serial]
fn class_variables_walk_the_superclass_chain() {
    boot();
    let mut env = Env::new();
    let parent = new_class(&mut env, "CvarParent");
    let child = klass::subclass(&mut env, parent, Some("CvarChild"), ObjectType::Object).unwrap();

    klass::cvar_set(parent, intern("@@count").symbol_id(), Value::integer(1));
    assert_eq!(klass::cvar_get(child, intern("@@count").symbol_id()), Some(Value::integer(1)));

    // Assignment through the child rebinds the ancestor's slot.
    klass::cvar_set(child, intern("@@count").symbol_id(), Value::integer(2));
    assert_eq!(klass::cvar_get(parent, intern("@@count").symbol_id()), Some(Value::integer(2)));
}

#[test]
#[serial]
fn freeze_is_idempotent_and_enforced() {
    boot();
    let mut env = Env::new();
    let obj = kernel::obj_new(&mut env, GlobalEnv::the().object_class(), &[], None).unwrap();
    assert!(!obj.is_frozen());
    obj.freeze();
    assert!(obj.is_frozen());
    obj.freeze();
    assert!(obj.is_frozen());

    let err = obj
        .send(&mut env, intern("instance_variable_set"), &[intern("@x"), Value::integer(1)], None)
        .unwrap_err();
    assert!(err.0.is_a(exception::exception_class("FrozenError")));
}

#[test]
#[serial]
fn extend_adds_singleton_behavior() {
    boot();
    let mut env = Env::new();
    let m = klass::new_module(Some("ExtendM"));
    klass::define_method(&mut env, m, intern("special"), returns_m1, 0).unwrap();

    let obj = kernel::obj_new(&mut env, GlobalEnv::the().object_class(), &[], None).unwrap();
    klass::extend_once(&mut env, obj, m).unwrap();
    assert_eq!(obj.send(&mut env, intern("special"), &[], None).unwrap(), intern("m1"));

    // Twice is once.
    klass::extend_once(&mut env, obj, m).unwrap();
    let singleton = obj.object().singleton_class();
    assert_eq!(singleton.object().module().included.len(), 1);
}

#[test]
#[serial]
fn block_arity_is_loose_but_lambda_arity_is_strict() {
    boot();
    let mut env = Env::new();

    fn argc(_env: &mut Env, _self: Value, args: Args, _block: Option<&Block>) -> garnet_runtime::Result {
        Ok(Value::integer(args.len() as i64))
    }

    let proc_block = Block::new(&env, Value::NULL, 2, argc);
    // Fewer actuals than formals: padded with nil.
    assert_eq!(proc_block.run(&mut env, &[Value::integer(1)], None).unwrap(), Value::integer(2));
    // Excess actuals: dropped.
    let many = [Value::integer(1), Value::integer(2), Value::integer(3)];
    assert_eq!(proc_block.run(&mut env, &many, None).unwrap(), Value::integer(2));
    // A single array actual auto-splats across multiple formals.
    let packed = garnet_runtime::array::new_array(vec![Value::integer(1), Value::integer(2)]);
    assert_eq!(proc_block.run(&mut env, &[packed], None).unwrap(), Value::integer(2));

    let lambda = Block::lambda(&env, Value::NULL, 2, argc);
    let err = lambda.run(&mut env, &[Value::integer(1)], None).unwrap_err();
    assert!(err.0.is_a(exception::exception_class("ArgumentError")));
    assert_eq!(lambda.run(&mut env, &[Value::integer(1), Value::integer(2)], None).unwrap(), Value::integer(2));
}

#[test]
#[serial]
fn method_reflection_returns_bound_records() {
    boot();
    let mut env = Env::new();
    let c = new_class(&mut env, "ReflectC");
    klass::define_method(&mut env, c, intern("f"), returns_a, 0).unwrap();
    let obj = kernel::obj_new(&mut env, c, &[], None).unwrap();

    let bound = obj.send(&mut env, intern("method"), &[intern("f")], None).unwrap();
    assert_eq!(bound.object_type(), ObjectType::Method);
    assert_eq!(bound.send(&mut env, intern("call"), &[], None).unwrap(), intern("a"));
    assert_eq!(bound.send(&mut env, intern("owner"), &[], None).unwrap(), c);

    let unbound = c.send(&mut env, intern("instance_method"), &[intern("f")], None).unwrap();
    assert_eq!(unbound.object_type(), ObjectType::UnboundMethod);
    assert_eq!(unbound.send(&mut env, intern("arity"), &[], None).unwrap(), Value::integer(0));
}

#[test]
#[serial]
fn define_method_with_block_captures_scope() {
    boot();
    let mut env = Env::new();
    let c = new_class(&mut env, "ClosureC");

    let mut captured = Env::new();
    captured.init_vars(1);
    captured.var_set(0, 0, Value::integer(99));

    fn body(env: &mut Env, _self: Value, _args: Args, _block: Option<&Block>) -> garnet_runtime::Result {
        Ok(env.var_get(1, 0))
    }
    let block = Block::new(&captured, Value::NULL, 0, body);
    klass::define_method_with_block(&mut env, c, intern("captured"), &block).unwrap();

    let obj = kernel::obj_new(&mut env, c, &[], None).unwrap();
    assert_eq!(obj.send(&mut env, intern("captured"), &[], None).unwrap(), Value::integer(99));

    // The captured slots are shared, not copied.
    captured.var_set(0, 0, Value::integer(100));
    assert_eq!(obj.send(&mut env, intern("captured"), &[], None).unwrap(), Value::integer(100));
}
