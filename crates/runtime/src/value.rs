//! The Value handle
//!
//! A `Value` is one 64-bit tagged word: an immediate integer (low bit set)
//! or a pointer to a heap [`Object`]. Everything the language manipulates
//! is a `Value`; copying one is copying a word.
//!
//! Equality on `Value` is identity: fixnums compare by encoded value, cells
//! by address. Anything richer goes through dispatch.

use crate::block::Block;
use crate::dispatch;
use crate::env::Env;
use crate::global_env::GlobalEnv;
use crate::integer;
use crate::kernel;
use crate::method::Visibility;
use crate::object::{ObjRef, Object, ObjectType};
use crate::symbol::SymbolId;
use crate::{Result, Unwind};
use garnet_core::tagged::Tagged;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Value(Tagged);

impl Value {
    /// The null handle. Internal-only: payload slots use it for "absent",
    /// and bootstrap uses it for not-yet-patched class pointers. It never
    /// escapes into language-visible storage.
    pub const NULL: Value = Value(Tagged::NULL);

    /// Build an integer value: an immediate when it fits, a boxed big
    /// integer cell otherwise.
    pub fn integer(n: i64) -> Value {
        if Tagged::fits_fixnum(n) {
            Value(Tagged::fixnum(n))
        } else {
            integer::boxed_from_i64(n)
        }
    }

    /// Build an immediate integer. Panics if `n` does not fit; use
    /// [`Value::integer`] when the magnitude is not statically known.
    pub fn fixnum(n: i64) -> Value {
        assert!(Tagged::fits_fixnum(n), "fixnum out of immediate range: {n}");
        Value(Tagged::fixnum(n))
    }

    pub(crate) fn from_obj_ptr(ptr: *mut Object) -> Value {
        Value(Tagged::pointer(ptr))
    }

    pub const fn from_raw(raw: u64) -> Value {
        Value(Tagged::from_raw(raw))
    }

    pub const fn raw(self) -> u64 {
        self.0.raw()
    }

    #[inline]
    pub fn is_integer(self) -> bool {
        self.0.is_fixnum()
    }

    #[inline]
    pub fn is_pointer(self) -> bool {
        self.0.is_pointer() && !self.0.is_null()
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.0.is_null()
    }

    /// The immediate integer payload. Panics on pointer handles; callers
    /// check [`is_integer`](Self::is_integer) first.
    #[inline]
    pub fn integer_value(self) -> i64 {
        assert!(self.0.is_fixnum(), "integer_value called on a pointer handle");
        self.0.to_fixnum()
    }

    /// The heap object behind this handle. Immediate integers are boxed on
    /// demand; a null handle is a programmer error.
    pub fn object(self) -> ObjRef {
        if self.is_integer() {
            return integer::boxed_from_i64(self.integer_value()).object();
        }
        assert!(!self.is_null(), "dereferenced a null value handle");
        ObjRef::from_ptr(self.0.to_pointer::<Object>())
    }

    /// The heap object, or `None` for immediates and null.
    pub fn object_if_cell(self) -> Option<ObjRef> {
        if self.is_pointer() { Some(ObjRef::from_ptr(self.0.to_pointer::<Object>())) } else { None }
    }

    pub fn object_type(self) -> ObjectType {
        if self.is_integer() { ObjectType::Integer } else { self.object().object_type() }
    }

    /// The direct class of this value. Fixnums report the Integer class.
    pub fn klass(self) -> Value {
        if self.is_integer() {
            GlobalEnv::the().integer_class()
        } else {
            self.object().klass()
        }
    }

    /// Only the canonical `nil` and `false` are falsey. Integer zero is
    /// truthy like everything else.
    #[inline]
    pub fn is_truthy(self) -> bool {
        !self.is_falsey()
    }

    pub fn is_falsey(self) -> bool {
        if self.is_integer() {
            return false;
        }
        matches!(self.object().object_type(), ObjectType::Nil | ObjectType::False)
    }

    pub fn is_nil(self) -> bool {
        !self.is_integer() && self.object().object_type() == ObjectType::Nil
    }

    pub fn nil() -> Value {
        GlobalEnv::the().nil_obj()
    }

    pub fn from_bool(b: bool) -> Value {
        let genv = GlobalEnv::the();
        if b { genv.true_obj() } else { genv.false_obj() }
    }

    /// A stable identifier: a function of the integer for immediates, the
    /// cell address for heap objects.
    pub fn object_id(self) -> i64 {
        self.0.raw() as i64
    }

    /// Identity comparison (`equal?` semantics).
    pub fn is_identical_to(self, other: Value) -> bool {
        self == other
    }

    /// Dispatch `name` on this receiver with implicit-receiver visibility
    /// (private methods are callable).
    pub fn send(
        self,
        env: &mut Env,
        name: Value,
        args: &[Value],
        block: Option<&Block>,
    ) -> Result {
        dispatch::send(env, self, name, args, block, Visibility::Private, None)
    }

    /// Dispatch with an explicit visibility filter and sender, the full
    /// form the evaluator uses.
    pub fn send_with(
        self,
        env: &mut Env,
        name: Value,
        args: &[Value],
        block: Option<&Block>,
        visibility: Visibility,
        sent_from: Option<Value>,
    ) -> Result {
        dispatch::send(env, self, name, args, block, visibility, sent_from)
    }

    /// Dispatch restricted to public methods.
    pub fn public_send(
        self,
        env: &mut Env,
        name: Value,
        args: &[Value],
        block: Option<&Block>,
    ) -> Result {
        dispatch::send(env, self, name, args, block, Visibility::Public, None)
    }

    /// True if resolution finds a public or protected method.
    pub fn respond_to(self, name: Value) -> bool {
        dispatch::respond_to(self, name)
    }

    /// Ancestry test: true if `module` appears in the receiver's class
    /// ancestor chain. Backs `is_a?`, `rescue` matching, and `===`.
    pub fn is_a(self, module: Value) -> bool {
        let klass = self.klass();
        crate::klass::ancestors(klass).contains(&module)
    }

    pub fn is_frozen(self) -> bool {
        if self.is_integer() {
            return true;
        }
        self.object().is_frozen()
    }

    /// Freeze the cell. Idempotent; immediates are frozen by nature.
    pub fn freeze(self) {
        if let Some(mut obj) = self.object_if_cell() {
            obj.freeze();
        }
    }

    pub fn assert_not_frozen(self, env: &mut Env) -> Result<()> {
        if self.is_frozen() {
            let desc = kernel::inspect(env, self);
            return Err(env.raise("FrozenError", format!("can't modify frozen {}: {}", kernel::class_name(self.klass()), desc)));
        }
        Ok(())
    }

    /// Debug rendering used by exception messages and diagnostics.
    pub fn inspected(self, env: &mut Env) -> String {
        kernel::inspect(env, self)
    }

    // Cheap tag predicates used all over the runtime.

    pub fn is_symbol(self) -> bool {
        self.is_pointer() && self.object().object_type() == ObjectType::Symbol
    }

    pub fn is_string(self) -> bool {
        self.is_pointer() && self.object().object_type() == ObjectType::String
    }

    pub fn is_class(self) -> bool {
        self.is_pointer() && self.object().object_type() == ObjectType::Class
    }

    pub fn is_module(self) -> bool {
        self.is_pointer()
            && matches!(self.object().object_type(), ObjectType::Class | ObjectType::Module)
    }

    pub fn is_exception(self) -> bool {
        self.is_pointer() && self.object().object_type() == ObjectType::Exception
    }

    /// The interning key of a symbol value. Panics on non-symbols.
    pub fn symbol_id(self) -> SymbolId {
        assert!(self.is_symbol(), "symbol_id on a non-symbol value");
        SymbolId::from_value(self)
    }

    /// Expect a symbol argument, raising `TypeError` otherwise.
    pub fn expect_symbol(self, env: &mut Env) -> Result<SymbolId, Unwind> {
        if self.is_symbol() {
            Ok(self.symbol_id())
        } else {
            Err(env.raise(
                "TypeError",
                format!("wrong argument type {} (expected Symbol)", kernel::class_name(self.klass())),
            ))
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_integer() {
            write!(f, "Integer({})", self.integer_value())
        } else if self.is_null() {
            write!(f, "Value(null)")
        } else {
            write!(f, "{:?}@{:#x}", self.object().object_type(), self.raw())
        }
    }
}
