//! Class descriptors
//!
//! A class gives objects their name, instance size and polymorphic
//! behavior. Behavior lives in a table of plain function pointers
//! ([`ClassMethods`]); a class may list up to [`MAX_BASE_COUNT`] base classes
//! to inherit methods from. Lookup checks the class itself, then each base
//! in order, depth first: with several bases defining the same method, the
//! lowest index wins.
//!
//! Bases must be registered before the classes that name them, so the base
//! graph cannot contain a cycle.

use std::cmp::Ordering;

use crate::config::MAX_BASE_COUNT;
use crate::context::Context;
use crate::error::{ErrorKind, Result};
use crate::gc::{ObjectRef, Tracer};
use crate::variant::Variant;

/// Handle to a registered class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassRef(u32);

impl ClassRef {
    #[inline]
    pub(crate) const fn from_index(index: u32) -> Self {
        ClassRef(index)
    }

    /// Position in the context's class table
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// Release what the object owns. Must not free the object itself.
pub type FinalizeFn = fn(ctx: &mut Context, obj: ObjectRef) -> Result<()>;

/// Deep copy, returning a new object with a reference count of 0
pub type CloneFn = fn(ctx: &mut Context, obj: ObjectRef) -> Result<ObjectRef>;

/// Report every object and alias the object holds a reference to
pub type TraverseFn = fn(ctx: &Context, obj: ObjectRef, tracer: &mut Tracer);

pub type CompareFn = fn(ctx: &Context, a: ObjectRef, b: ObjectRef) -> Result<Ordering>;

pub type EqualFn = fn(ctx: &Context, a: ObjectRef, b: ObjectRef) -> Result<bool>;

pub type HashFn = fn(ctx: &Context, obj: ObjectRef) -> Result<u32>;

/// Advance `state` and store the next item in `result`; `false` at the end
pub type IterateFn = fn(
    ctx: &mut Context,
    obj: ObjectRef,
    state: &mut Variant,
    result: &mut Variant,
) -> Result<bool>;

/// Method table of a class
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassMethods {
    pub finalize: Option<FinalizeFn>,
    pub clone: Option<CloneFn>,
    pub traverse: Option<TraverseFn>,
    pub compare: Option<CompareFn>,
    pub equal: Option<EqualFn>,
    pub hash: Option<HashFn>,
    pub iterate: Option<IterateFn>,
}

/// A class descriptor
#[derive(Debug)]
pub struct Class {
    name: String,
    instance_size: usize,
    bases: Vec<ClassRef>,
    pub methods: ClassMethods,
}

impl Class {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bytes reserved for each instance, before any extra payload
    #[inline]
    pub fn instance_size(&self) -> usize {
        self.instance_size
    }

    #[inline]
    pub fn bases(&self) -> &[ClassRef] {
        &self.bases
    }
}

/// All classes of a context
#[derive(Debug, Default)]
pub struct ClassTable {
    classes: Vec<Class>,
}

impl ClassTable {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    #[inline]
    pub fn get(&self, class: ClassRef) -> Option<&Class> {
        self.classes.get(class.0 as usize)
    }

    #[inline]
    pub fn get_mut(&mut self, class: ClassRef) -> Option<&mut Class> {
        self.classes.get_mut(class.0 as usize)
    }

    /// Add a class; callers validate the bases
    pub(crate) fn push(
        &mut self,
        name: &str,
        instance_size: usize,
        bases: &[ClassRef],
        methods: ClassMethods,
    ) -> ClassRef {
        self.classes.push(Class {
            name: name.to_string(),
            instance_size,
            bases: bases.to_vec(),
            methods,
        });
        ClassRef::from_index((self.classes.len() - 1) as u32)
    }

    /// Find a method on `class` or its bases
    pub fn lookup<T>(
        &self,
        class: ClassRef,
        select: &dyn Fn(&ClassMethods) -> Option<T>,
    ) -> Option<T> {
        let descriptor = self.get(class)?;
        if let Some(method) = select(&descriptor.methods) {
            return Some(method);
        }
        descriptor
            .bases
            .iter()
            .find_map(|&base| self.lookup(base, select))
    }

    /// Whether `class` is `ancestor` or inherits from it
    pub fn inherits(&self, class: ClassRef, ancestor: ClassRef) -> bool {
        if class == ancestor {
            return true;
        }
        self.get(class).is_some_and(|descriptor| {
            descriptor
                .bases
                .iter()
                .any(|&base| self.inherits(base, ancestor))
        })
    }
}

impl Context {
    /// Register a new class
    ///
    /// At most [`MAX_BASE_COUNT`] bases may be listed, all of them already
    /// registered. Methods are attached afterwards with [`Context::methods_mut`].
    pub fn new_class(
        &mut self,
        name: &str,
        instance_size: usize,
        bases: &[ClassRef],
    ) -> Result<ClassRef> {
        if bases.len() > MAX_BASE_COUNT {
            return Err(self.throw(
                ErrorKind::Index,
                format!(
                    "class {} lists {} bases, at most {} are allowed",
                    name,
                    bases.len(),
                    MAX_BASE_COUNT
                ),
            ));
        }
        if let Some(base) = bases.iter().find(|&&b| self.classes.get(b).is_none()) {
            return Err(self.throw(
                ErrorKind::Internal,
                format!("class {} names unknown base #{}", name, base.index()),
            ));
        }

        Ok(self
            .classes
            .push(name, instance_size, bases, ClassMethods::default()))
    }

    /// Get a class descriptor
    pub fn class(&self, class: ClassRef) -> Result<&Class> {
        self.classes.get(class).ok_or_else(|| {
            self.throw(
                ErrorKind::Internal,
                format!("invalid class reference #{}", class.index()),
            )
        })
    }

    /// Method table of a class, for attaching methods
    pub fn methods_mut(&mut self, class: ClassRef) -> Result<&mut ClassMethods> {
        let handler = self.error_handler.as_ref();
        match self.classes.get_mut(class) {
            Some(descriptor) => Ok(&mut descriptor.methods),
            None => Err(crate::error::raise(
                handler,
                ErrorKind::Internal,
                format!("invalid class reference #{}", class.index()),
            )),
        }
    }

    /// Resolve a method through the class and its bases
    #[inline]
    pub fn lookup<T>(
        &self,
        class: ClassRef,
        select: &dyn Fn(&ClassMethods) -> Option<T>,
    ) -> Option<T> {
        self.classes.lookup(class, select)
    }

    /// Get the class table
    pub fn class_table(&self) -> &ClassTable {
        &self.classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::recording_context;

    fn compare_a(_: &Context, _: ObjectRef, _: ObjectRef) -> Result<Ordering> {
        Ok(Ordering::Less)
    }

    fn compare_b(_: &Context, _: ObjectRef, _: ObjectRef) -> Result<Ordering> {
        Ok(Ordering::Greater)
    }

    fn hash_b(_: &Context, _: ObjectRef) -> Result<u32> {
        Ok(99)
    }

    #[test]
    fn test_lowest_base_wins() {
        let (mut ctx, _errors) = recording_context();
        let a = ctx.new_class("A", 0, &[]).unwrap();
        let b = ctx.new_class("B", 0, &[]).unwrap();
        ctx.methods_mut(a).unwrap().compare = Some(compare_a);
        ctx.methods_mut(b).unwrap().compare = Some(compare_b);
        ctx.methods_mut(b).unwrap().hash = Some(hash_b);
        let c = ctx.new_class("C", 0, &[a, b]).unwrap();
        let obj = ctx.new_object(c, true, 0).unwrap();

        let compare = ctx.lookup(c, &|m| m.compare).unwrap();
        assert_eq!(compare(&ctx, obj, obj).unwrap(), Ordering::Less);

        // Only B has a hash
        let hash = ctx.lookup(c, &|m| m.hash).unwrap();
        assert_eq!(hash(&ctx, obj).unwrap(), 99);
        assert!(ctx.lookup(c, &|m| m.iterate).is_none());
    }

    #[test]
    fn test_own_method_overrides_base() {
        let (mut ctx, _errors) = recording_context();
        let a = ctx.new_class("A", 0, &[]).unwrap();
        ctx.methods_mut(a).unwrap().compare = Some(compare_a);
        let c = ctx.new_class("C", 0, &[a]).unwrap();
        ctx.methods_mut(c).unwrap().compare = Some(compare_b);
        let obj = ctx.new_object(c, false, 0).unwrap();

        let compare = ctx.lookup(c, &|m| m.compare).unwrap();
        assert_eq!(compare(&ctx, obj, obj).unwrap(), Ordering::Greater);
    }

    #[test]
    fn test_inherits() {
        let (mut ctx, _errors) = recording_context();
        let a = ctx.new_class("A", 0, &[]).unwrap();
        let b = ctx.new_class("B", 0, &[a]).unwrap();
        let c = ctx.new_class("C", 0, &[b]).unwrap();
        assert!(ctx.class_table().inherits(c, a));
        assert!(!ctx.class_table().inherits(a, c));
    }

    #[test]
    fn test_too_many_bases() {
        let (mut ctx, errors) = recording_context();
        let base = ctx.new_class("base", 0, &[]).unwrap();
        let bases = vec![base; MAX_BASE_COUNT + 1];
        let err = ctx.new_class("wide", 0, &bases).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Index);
        assert_eq!(errors.borrow()[0].0, ErrorKind::Index);

        assert!(ctx.new_class("ok", 0, &bases[..MAX_BASE_COUNT]).is_ok());
    }

    #[test]
    fn test_class_descriptor() {
        let (mut ctx, _errors) = recording_context();
        let point = ctx.new_class("Point", 16, &[]).unwrap();
        let descriptor = ctx.class(point).unwrap();
        assert_eq!(descriptor.name(), "Point");
        assert_eq!(descriptor.instance_size(), 16);
        assert!(descriptor.bases().is_empty());
    }
}
