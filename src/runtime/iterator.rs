//! Iterator objects
//!
//! An iterator binds to its target through an alias and holds a reference to
//! that alias only. Every step resolves the alias again, so the iterator walks
//! whatever the alias currently holds: mutation through the target happens in
//! place, and rebinding the alias is visible. Stepping is delegated to the
//! class `iterate` method, which keeps its position in an opaque state
//! variant.
//!
//! Iterators are collectable, as an iterator stored inside the collection it
//! walks closes a cycle through its alias.

use crate::context::Context;
use crate::error::{ErrorKind, Result};
use crate::gc::{AliasRef, ObjectRef, Tracer};
use crate::runtime::ClassMethods;
use crate::variant::Variant;

/// Iterator payload
#[derive(Debug)]
pub struct IteratorData {
    alias: AliasRef,
    state: Variant,
}

impl IteratorData {
    /// Alias bound to the iterated target
    #[inline]
    pub fn alias(&self) -> AliasRef {
        self.alias
    }

    #[inline]
    pub fn state(&self) -> Variant {
        self.state
    }
}

pub(crate) fn methods() -> ClassMethods {
    ClassMethods {
        finalize: Some(finalize),
        traverse: Some(traverse),
        ..ClassMethods::default()
    }
}

fn finalize(ctx: &mut Context, obj: ObjectRef) -> Result<()> {
    let data = ctx.data_mut::<IteratorData>(obj)?;
    let (alias, state) = (data.alias, data.state.take());
    ctx.release(state)?;
    ctx.release_alias(alias)
}

fn traverse(ctx: &Context, obj: ObjectRef, tracer: &mut Tracer) {
    if let Some(data) = ctx.heap.get(obj).and_then(|o| o.data::<IteratorData>()) {
        tracer.visit_alias(data.alias);
        tracer.visit(data.state);
    }
}

impl Context {
    /// Create an iterator over the object held by `target`
    ///
    /// `target` is turned into an alias holder if it is not one already. The
    /// iterator keeps that alias, and through it the target, alive.
    pub fn iterator_new(&mut self, target: &mut Variant) -> Result<ObjectRef> {
        let alias = self.make_alias(target)?;

        let resolved = self.resolve(Variant::Alias(alias))?;
        if !resolved.is_object() {
            return Err(self.not_iterable_value(resolved));
        }

        self.retain_alias(alias)?;
        let class = self.builtins().iterator;
        let data = IteratorData {
            alias,
            state: Variant::Null,
        };
        match self.new_object_with(class, true, 0, data) {
            Ok(iter) => Ok(iter),
            Err(err) => {
                self.release_alias(alias)?;
                Err(err)
            }
        }
    }

    /// Advance the iterator, storing the next item in `result`
    ///
    /// Returns `false` once the target is exhausted.
    pub fn iterator_next(&mut self, iter: ObjectRef, result: &mut Variant) -> Result<bool> {
        let data = self.data_mut::<IteratorData>(iter)?;
        let alias = data.alias;
        let mut state = data.state.take();

        let outcome = self.step(alias, &mut state, result);
        match self.data_mut::<IteratorData>(iter) {
            Ok(data) => data.state = state,
            Err(err) => {
                self.release(state)?;
                return Err(err);
            }
        }
        outcome
    }

    fn step(
        &mut self,
        alias: AliasRef,
        state: &mut Variant,
        result: &mut Variant,
    ) -> Result<bool> {
        let object = match self.resolve(Variant::Alias(alias))? {
            Variant::Object(object) => object,
            other => return Err(self.not_iterable_value(other)),
        };

        let class = self.class_of(object)?;
        let Some(iterate) = self.lookup(class, &|m| m.iterate) else {
            return Err(self.throw(
                ErrorKind::Runtime,
                format!(
                    "Type {} is not iterable (implement iterate)",
                    self.class(class)?.name()
                ),
            ));
        };
        iterate(self, object, state, result)
    }

    fn not_iterable_value(&self, value: Variant) -> crate::error::Error {
        self.throw(
            ErrorKind::Type,
            format!("expected an iterable object, not a {}", self.class_name(value)),
        )
    }
}
