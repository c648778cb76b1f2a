//! Runtime value representation
//!
//! A [`Variant`] is a closed tagged union over every runtime value. It is
//! `Copy`: copying the Rust value moves bits around without touching any
//! reference count. Ownership is tracked by the protocol on [`Context`]:
//! a live variant holding an `Object` or `Alias` owns exactly one strong
//! reference, taken with `retain`/`copy` and given back with
//! `release`/`clear`.
//!
//! Every comparison, hash or type check first resolves alias indirection.

use std::cmp::Ordering;
use std::fmt;

use crate::context::Context;
use crate::error::{ErrorKind, Result};
use crate::gc::{AliasRef, ObjectRef};
use crate::runtime::ClassRef;
use crate::util::fold_u64;

/// Hash of `true`
pub const TRUE_HASH: u32 = 7;
/// Hash of `false`
pub const FALSE_HASH: u32 = 11;

/// A runtime value
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Variant {
    #[default]
    Null,
    True,
    False,
    Number(f64),
    Object(ObjectRef),
    Alias(AliasRef),
    Class(ClassRef),
}

impl Variant {
    #[inline]
    pub const fn boolean(b: bool) -> Self {
        if b { Variant::True } else { Variant::False }
    }

    #[inline]
    pub const fn number(n: f64) -> Self {
        Variant::Number(n)
    }

    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Variant::Null)
    }

    #[inline]
    pub const fn is_bool(&self) -> bool {
        matches!(self, Variant::True | Variant::False)
    }

    #[inline]
    pub const fn is_number(&self) -> bool {
        matches!(self, Variant::Number(_))
    }

    #[inline]
    pub const fn is_object(&self) -> bool {
        matches!(self, Variant::Object(_))
    }

    #[inline]
    pub const fn is_alias(&self) -> bool {
        matches!(self, Variant::Alias(_))
    }

    /// Whether the variant owns a reference
    #[inline]
    pub const fn is_reference(&self) -> bool {
        matches!(self, Variant::Object(_) | Variant::Alias(_))
    }

    #[inline]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Variant::True => Some(true),
            Variant::False => Some(false),
            _ => None,
        }
    }

    #[inline]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Variant::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[inline]
    pub const fn as_object(&self) -> Option<ObjectRef> {
        match self {
            Variant::Object(obj) => Some(*obj),
            _ => None,
        }
    }

    #[inline]
    pub const fn as_alias(&self) -> Option<AliasRef> {
        match self {
            Variant::Alias(alias) => Some(*alias),
            _ => None,
        }
    }

    /// Exchange two values; ownership moves with them
    #[inline]
    pub fn swap(&mut self, other: &mut Variant) {
        std::mem::swap(self, other);
    }

    /// Take the value out, leaving `Null`; ownership moves to the caller
    #[inline]
    pub fn take(&mut self) -> Variant {
        std::mem::take(self)
    }
}

impl From<bool> for Variant {
    fn from(b: bool) -> Self {
        Variant::boolean(b)
    }
}

impl From<f64> for Variant {
    fn from(n: f64) -> Self {
        Variant::Number(n)
    }
}

impl From<i32> for Variant {
    fn from(n: i32) -> Self {
        Variant::Number(n as f64)
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Null => write!(f, "null"),
            Variant::True => write!(f, "true"),
            Variant::False => write!(f, "false"),
            Variant::Number(n) => write!(f, "{}", n),
            Variant::Object(obj) => write!(f, "[object #{}]", obj.index()),
            Variant::Alias(alias) => {
                write!(f, "[alias {}:{}]", alias.slot().page(), alias.slot().index())
            }
            Variant::Class(class) => write!(f, "[class #{}]", class.index()),
        }
    }
}

/// Epsilon equality scaled to the magnitude of the operands
#[inline]
pub fn numbers_equal(x: f64, y: f64) -> bool {
    if x == y {
        return true;
    }
    let scale = 1f64.max(x.abs()).max(y.abs());
    (x - y).abs() <= f64::EPSILON * scale
}

/// Three-way comparison using [`numbers_equal`] for ties
#[inline]
pub fn compare_numbers(x: f64, y: f64) -> Ordering {
    if numbers_equal(x, y) {
        Ordering::Equal
    } else if x - y < 0.0 {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}

/// Hash of the canonical bit pattern of a number
///
/// Both zeros hash alike, as do all NaNs. Numbers that are equal only
/// within epsilon usually hash differently.
#[inline]
pub fn hash_number(x: f64) -> u32 {
    let canonical = if x == 0.0 {
        0.0
    } else if x.is_nan() {
        f64::NAN
    } else {
        x
    };
    fold_u64(canonical.to_bits())
}

impl Context {
    /// Follow alias indirection down to a non-alias value
    pub fn resolve(&self, value: Variant) -> Result<Variant> {
        let mut current = value;
        let mut depth = 0;
        while let Variant::Alias(alias) = current {
            if depth == self.config.max_alias_depth {
                return Err(self.throw(
                    ErrorKind::Internal,
                    format!("alias chain longer than {} links", depth),
                ));
            }
            current = self.alias_get(alias)?;
            depth += 1;
        }
        Ok(current)
    }

    /// Take a strong reference to the payload, if any
    pub fn retain(&mut self, value: Variant) -> Result<()> {
        match value {
            Variant::Object(obj) => self.retain_object(obj),
            Variant::Alias(alias) => self.retain_alias(alias),
            _ => Ok(()),
        }
    }

    /// Give back the reference held by `value`, if any
    pub fn release(&mut self, value: Variant) -> Result<()> {
        match value {
            Variant::Object(obj) => self.release_object(obj),
            Variant::Alias(alias) => self.release_alias(alias),
            _ => Ok(()),
        }
    }

    /// Assign `src` to `dst`, sharing the payload
    ///
    /// The new payload is retained before the old one is released, so
    /// copying a variant onto a holder of the same payload is safe.
    pub fn copy(&mut self, dst: &mut Variant, src: Variant) -> Result<()> {
        self.retain(src)?;
        let old = std::mem::replace(dst, src);
        self.release(old)
    }

    /// Move `src` into `dst`, leaving `src` null
    pub fn move_variant(&mut self, dst: &mut Variant, src: &mut Variant) -> Result<()> {
        let old = std::mem::replace(dst, src.take());
        self.release(old)
    }

    /// Exchange two values without reference count traffic
    #[inline]
    pub fn swap(&self, a: &mut Variant, b: &mut Variant) {
        a.swap(b);
    }

    /// Release the payload and reset to null
    pub fn clear(&mut self, value: &mut Variant) -> Result<()> {
        let old = value.take();
        self.release(old)
    }

    /// Store a boolean, releasing the previous value
    pub fn set_bool(&mut self, value: &mut Variant, b: bool) -> Result<()> {
        let old = std::mem::replace(value, Variant::boolean(b));
        self.release(old)
    }

    /// Store a number, releasing the previous value
    pub fn set_num(&mut self, value: &mut Variant, n: f64) -> Result<()> {
        let old = std::mem::replace(value, Variant::Number(n));
        self.release(old)
    }

    /// Store a reference to `obj`, releasing the previous value
    pub fn set_object(&mut self, value: &mut Variant, obj: ObjectRef) -> Result<()> {
        self.copy(value, Variant::Object(obj))
    }

    /// New variant holding a reference to `obj`
    pub fn init_object(&mut self, obj: ObjectRef) -> Result<Variant> {
        self.retain_object(obj)?;
        Ok(Variant::Object(obj))
    }

    /// Dynamic type name of a value
    pub fn class_name(&self, value: Variant) -> &str {
        let Ok(resolved) = self.resolve_quiet(value) else {
            return "unknown";
        };
        match resolved {
            Variant::Null => "null",
            Variant::True | Variant::False => "bool",
            Variant::Number(_) => "num",
            Variant::Class(_) => "class",
            Variant::Object(obj) => self
                .heap
                .get(obj)
                .and_then(|object| self.classes.get(object.class()))
                .map_or("unknown", |class| class.name()),
            Variant::Alias(_) => "unknown",
        }
    }

    /// Resolve without reporting failures to the error handler
    fn resolve_quiet(&self, value: Variant) -> std::result::Result<Variant, ()> {
        let mut current = value;
        for _ in 0..=self.config.max_alias_depth {
            match current {
                Variant::Alias(alias) => {
                    current = self
                        .collector
                        .arena
                        .live_slot(alias.id())
                        .map(|slot| slot.value)
                        .ok_or(())?;
                }
                other => return Ok(other),
            }
        }
        Err(())
    }

    /// Whether `value` resolves to a boolean
    pub fn check_bool(&self, value: Variant) -> bool {
        self.resolve_quiet(value).is_ok_and(|v| v.is_bool())
    }

    /// Whether `value` resolves to a number
    pub fn check_num(&self, value: Variant) -> bool {
        self.resolve_quiet(value).is_ok_and(|v| v.is_number())
    }

    /// Whether `value` is an object of `class` or of a class inheriting it
    pub fn check_object(&self, value: Variant, class: ClassRef) -> bool {
        match self.resolve_quiet(value) {
            Ok(Variant::Object(obj)) => self
                .heap
                .get(obj)
                .is_some_and(|object| self.classes.inherits(object.class(), class)),
            _ => false,
        }
    }

    /// Whether `value` resolves to a string
    pub fn check_string(&self, value: Variant) -> bool {
        self.check_object(value, self.builtins().string)
    }

    /// Whether `value` resolves to a list
    pub fn check_list(&self, value: Variant) -> bool {
        self.check_object(value, self.builtins().list)
    }

    /// Whether `value` resolves to a table
    pub fn check_table(&self, value: Variant) -> bool {
        self.check_object(value, self.builtins().table)
    }

    pub fn get_bool(&self, value: Variant) -> Result<bool> {
        match self.resolve(value)? {
            Variant::True => Ok(true),
            Variant::False => Ok(false),
            _ => Err(self.type_mismatch("bool", value)),
        }
    }

    pub fn get_num(&self, value: Variant) -> Result<f64> {
        match self.resolve(value)? {
            Variant::Number(n) => Ok(n),
            _ => Err(self.type_mismatch("num", value)),
        }
    }

    /// Object of `class` held by `value`
    pub fn get_object(&self, value: Variant, class: ClassRef) -> Result<ObjectRef> {
        if let Variant::Object(obj) = self.resolve(value)? {
            if self.classes.inherits(self.object(obj)?.class(), class) {
                return Ok(obj);
            }
        }
        Err(self.type_mismatch(self.class(class)?.name(), value))
    }

    pub fn get_string(&self, value: Variant) -> Result<ObjectRef> {
        self.get_object(value, self.builtins().string)
    }

    pub fn get_list(&self, value: Variant) -> Result<ObjectRef> {
        self.get_object(value, self.builtins().list)
    }

    pub fn get_table(&self, value: Variant) -> Result<ObjectRef> {
        self.get_object(value, self.builtins().table)
    }

    pub(crate) fn type_mismatch(&self, expected: &str, value: Variant) -> crate::error::Error {
        self.throw(
            ErrorKind::Type,
            format!("expected a {}, not a {}", expected, self.class_name(value)),
        )
    }

    /// Value equality
    ///
    /// Values of different types are never equal. Objects of the same class
    /// use the class `equal` method, or `compare` when there is none.
    pub fn equal(&self, a: Variant, b: Variant) -> Result<bool> {
        let a = self.resolve(a)?;
        let b = self.resolve(b)?;
        match (a, b) {
            (Variant::Null, Variant::Null)
            | (Variant::True, Variant::True)
            | (Variant::False, Variant::False) => Ok(true),
            (Variant::Number(x), Variant::Number(y)) => Ok(numbers_equal(x, y)),
            (Variant::Class(x), Variant::Class(y)) => Ok(x == y),
            (Variant::Object(x), Variant::Object(y)) => self.objects_equal(x, y),
            _ => Ok(false),
        }
    }

    fn objects_equal(&self, x: ObjectRef, y: ObjectRef) -> Result<bool> {
        let class = self.object(x)?.class();
        if self.object(y)?.class() != class {
            return Ok(false);
        }
        if let Some(equal) = self.lookup(class, &|m| m.equal) {
            return equal(self, x, y);
        }
        if let Some(compare) = self.lookup(class, &|m| m.compare) {
            return Ok(compare(self, x, y)? == Ordering::Equal);
        }
        Err(self.throw(
            ErrorKind::Runtime,
            format!(
                "Type {} does not support equality (implement equal or compare)",
                self.class(class)?.name()
            ),
        ))
    }

    /// Three-way ordering
    pub fn compare(&self, a: Variant, b: Variant) -> Result<Ordering> {
        let ra = self.resolve(a)?;
        let rb = self.resolve(b)?;
        match (ra, rb) {
            (Variant::Null, Variant::Null) => Ok(Ordering::Equal),
            (Variant::Number(x), Variant::Number(y)) => Ok(compare_numbers(x, y)),
            (Variant::Object(x), Variant::Object(y))
                if self.object(x)?.class() == self.object(y)?.class() =>
            {
                let class = self.object(x)?.class();
                match self.lookup(class, &|m| m.compare) {
                    Some(compare) => compare(self, x, y),
                    None => Err(self.throw(
                        ErrorKind::Runtime,
                        format!(
                            "Type {} is not comparable (implement compare)",
                            self.class(class)?.name()
                        ),
                    )),
                }
            }
            (x, y) => match (x.as_bool(), y.as_bool()) {
                (Some(p), Some(q)) => Ok(p.cmp(&q)),
                _ => Err(self.throw(
                    ErrorKind::Type,
                    format!(
                        "Cannot compare values of type {} and {}",
                        self.class_name(a),
                        self.class_name(b)
                    ),
                )),
            },
        }
    }

    /// Hash consistent with [`Context::equal`]
    pub fn hash(&self, value: Variant) -> Result<u32> {
        match self.resolve(value)? {
            Variant::True => Ok(TRUE_HASH),
            Variant::False => Ok(FALSE_HASH),
            Variant::Number(n) => Ok(hash_number(n)),
            Variant::Class(class) => Ok(class.index()),
            Variant::Object(obj) => {
                let class = self.object(obj)?.class();
                match self.lookup(class, &|m| m.hash) {
                    Some(hash) => hash(self, obj),
                    None => Err(self.throw(
                        ErrorKind::Runtime,
                        format!(
                            "Type {} is not hashable (implement hash)",
                            self.class(class)?.name()
                        ),
                    )),
                }
            }
            Variant::Null | Variant::Alias(_) => Err(self.throw(
                ErrorKind::Runtime,
                format!("Type {} is not hashable", self.class_name(value)),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::recording_context;

    #[test]
    fn test_constructors() {
        assert_eq!(Variant::from(true), Variant::True);
        assert_eq!(Variant::from(false), Variant::False);
        assert_eq!(Variant::from(3), Variant::Number(3.0));
        assert_eq!(Variant::default(), Variant::Null);
        assert_eq!(Variant::Number(2.5).as_number(), Some(2.5));
        assert_eq!(Variant::True.as_bool(), Some(true));
        assert!(Variant::Null.as_bool().is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(Variant::Null.to_string(), "null");
        assert_eq!(Variant::True.to_string(), "true");
        assert_eq!(Variant::Number(1.5).to_string(), "1.5");
    }

    #[test]
    fn test_swap_and_take() {
        let mut a = Variant::Number(1.0);
        let mut b = Variant::True;
        a.swap(&mut b);
        assert_eq!(a, Variant::True);
        assert_eq!(b, Variant::Number(1.0));

        let taken = a.take();
        assert_eq!(taken, Variant::True);
        assert!(a.is_null());
    }

    #[test]
    fn test_number_equality() {
        assert!(numbers_equal(0.1 + 0.2, 0.3));
        assert!(numbers_equal(1e20, 1e20 + 1.0));
        assert!(!numbers_equal(1.0, 1.0001));
        assert!(numbers_equal(f64::INFINITY, f64::INFINITY));
        assert!(!numbers_equal(f64::NAN, f64::NAN));
        assert_eq!(compare_numbers(0.1 + 0.2, 0.3), Ordering::Equal);
        assert_eq!(compare_numbers(1.0, 2.0), Ordering::Less);
        assert_eq!(compare_numbers(2.0, 1.0), Ordering::Greater);
    }

    #[test]
    fn test_number_hash_canonical() {
        assert_eq!(hash_number(0.0), hash_number(-0.0));
        assert_eq!(hash_number(f64::NAN), hash_number(-f64::NAN));
        assert_ne!(hash_number(1.0), hash_number(2.0));
    }

    #[test]
    fn test_scalar_equal_and_compare() {
        let (ctx, _errors) = recording_context();
        assert!(ctx.equal(Variant::Null, Variant::Null).unwrap());
        assert!(ctx.equal(Variant::True, Variant::True).unwrap());
        assert!(!ctx.equal(Variant::True, Variant::False).unwrap());
        assert!(!ctx.equal(Variant::Number(1.0), Variant::True).unwrap());
        assert!(!ctx.equal(Variant::Null, Variant::Number(0.0)).unwrap());

        assert_eq!(
            ctx.compare(Variant::False, Variant::True).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            ctx.compare(Variant::Number(3.0), Variant::Number(2.0)).unwrap(),
            Ordering::Greater
        );
    }

    #[test]
    fn test_compare_mismatch_is_type_error() {
        let (ctx, errors) = recording_context();
        let err = ctx.compare(Variant::True, Variant::Number(1.0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Type);
        assert_eq!(err.message, "Cannot compare values of type bool and num");
        assert_eq!(errors.borrow().len(), 1);
    }

    #[test]
    fn test_hash_scalars() {
        let (ctx, _errors) = recording_context();
        assert_eq!(ctx.hash(Variant::True).unwrap(), TRUE_HASH);
        assert_eq!(ctx.hash(Variant::False).unwrap(), FALSE_HASH);
        assert_eq!(
            ctx.hash(Variant::Number(42.0)).unwrap(),
            hash_number(42.0)
        );
        let err = ctx.hash(Variant::Null).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Runtime);
    }

    #[test]
    fn test_object_without_methods() {
        let (mut ctx, _errors) = recording_context();
        let class = ctx.new_class("opaque", 8, &[]).unwrap();
        let a = ctx.new_object(class, false, 0).unwrap();
        let b = ctx.new_object(class, false, 0).unwrap();
        let va = ctx.init_object(a).unwrap();
        let vb = ctx.init_object(b).unwrap();

        let err = ctx.equal(va, vb).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Runtime);
        assert!(err.message.contains("implement equal or compare"));

        let err = ctx.compare(va, vb).unwrap_err();
        assert!(err.message.contains("implement compare"));

        let err = ctx.hash(va).unwrap_err();
        assert_eq!(
            err.message,
            "Type opaque is not hashable (implement hash)"
        );
    }

    #[test]
    fn test_equal_falls_back_to_compare() {
        fn always_equal(_: &Context, _: ObjectRef, _: ObjectRef) -> Result<Ordering> {
            Ok(Ordering::Equal)
        }

        let (mut ctx, _errors) = recording_context();
        let class = ctx.new_class("flat", 0, &[]).unwrap();
        ctx.methods_mut(class).unwrap().compare = Some(always_equal);
        let a = ctx.new_object(class, false, 0).unwrap();
        let b = ctx.new_object(class, false, 0).unwrap();

        assert!(ctx.equal(Variant::Object(a), Variant::Object(b)).unwrap());

        // Different classes are never equal
        let other = ctx.new_class("other", 0, &[]).unwrap();
        let c = ctx.new_object(other, false, 0).unwrap();
        assert!(!ctx.equal(Variant::Object(a), Variant::Object(c)).unwrap());
    }

    #[test]
    fn test_get_accessors() {
        let (mut ctx, _errors) = recording_context();
        assert_eq!(ctx.get_num(Variant::Number(42.0)).unwrap(), 42.0);
        assert!(ctx.get_bool(Variant::True).unwrap());

        let err = ctx.get_num(Variant::True).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Type);
        assert_eq!(err.message, "expected a num, not a bool");

        let s = ctx.string_new("hi").unwrap();
        let v = ctx.init_object(s).unwrap();
        assert_eq!(ctx.get_string(v).unwrap(), s);
        assert!(ctx.check_string(v));
        assert!(!ctx.check_list(v));

        let err = ctx.get_list(v).unwrap_err();
        assert_eq!(err.message, "expected a list, not a string");
    }

    #[test]
    fn test_class_names() {
        let (mut ctx, _errors) = recording_context();
        assert_eq!(ctx.class_name(Variant::Null), "null");
        assert_eq!(ctx.class_name(Variant::False), "bool");
        assert_eq!(ctx.class_name(Variant::Number(0.0)), "num");

        let list = ctx.list_new(0).unwrap();
        let mut v = ctx.init_object(list).unwrap();
        ctx.make_alias(&mut v).unwrap();
        assert_eq!(ctx.class_name(v), "list");
    }

    #[test]
    fn test_copy_same_payload() {
        let (mut ctx, _errors) = recording_context();
        let list = ctx.list_new(0).unwrap();
        let mut v = ctx.init_object(list).unwrap();

        // Copying a holder onto itself must not free the object
        let same = v;
        ctx.copy(&mut v, same).unwrap();
        assert_eq!(ctx.ref_count(list).unwrap(), 1);
        assert!(ctx.object(list).is_ok());
    }

    #[test]
    fn test_move_transfers_ownership() {
        let (mut ctx, _errors) = recording_context();
        let list = ctx.list_new(0).unwrap();
        let mut src = ctx.init_object(list).unwrap();
        let mut dst = Variant::Number(1.0);

        ctx.move_variant(&mut dst, &mut src).unwrap();
        assert!(src.is_null());
        assert_eq!(dst, Variant::Object(list));
        assert_eq!(ctx.ref_count(list).unwrap(), 1);

        ctx.set_num(&mut dst, 5.0).unwrap();
        assert!(ctx.object(list).is_err());
        assert_eq!(dst, Variant::Number(5.0));
    }

    #[test]
    fn test_resolve_depth_bound() {
        let (mut ctx, _errors) = recording_context();
        ctx.config.max_alias_depth = 2;

        // c -> b -> a -> 1.0
        let mut va = Variant::Number(1.0);
        ctx.make_alias(&mut va).unwrap();
        let mut vb = Variant::Null;
        let b = ctx.make_alias(&mut vb).unwrap();
        ctx.alias_set(b, va).unwrap();
        let mut vc = Variant::Null;
        let c = ctx.make_alias(&mut vc).unwrap();
        ctx.alias_set(c, vb).unwrap();

        assert_eq!(ctx.resolve(Variant::Alias(b)).unwrap(), Variant::Number(1.0));
        let err = ctx.resolve(Variant::Alias(c)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
    }
}
