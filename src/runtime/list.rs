//! Built-in list type
//!
//! A list owns one reference per item. Lists are collectable: a list holding
//! itself, directly or through an alias, forms a cycle that only the cycle
//! collector can reclaim.

use std::cmp::Ordering;
use std::mem::size_of;

use crate::context::Context;
use crate::error::{ErrorKind, Result};
use crate::gc::{ObjectRef, Tracer};
use crate::runtime::ClassMethods;
use crate::variant::Variant;

/// Bytes reserved per item
const ITEM_SIZE: usize = size_of::<Variant>();

/// List payload
#[derive(Debug, Default)]
pub struct ElveaList {
    items: Vec<Variant>,
}

impl ElveaList {
    pub fn with_capacity(capacity: usize) -> Self {
        ElveaList {
            items: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<Variant> {
        self.items.get(index).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = Variant> + '_ {
        self.items.iter().copied()
    }
}

pub(crate) fn methods() -> ClassMethods {
    ClassMethods {
        finalize: Some(finalize),
        clone: Some(clone),
        traverse: Some(traverse),
        equal: Some(equal),
        compare: Some(compare),
        iterate: Some(iterate),
        ..ClassMethods::default()
    }
}

fn finalize(ctx: &mut Context, obj: ObjectRef) -> Result<()> {
    let items = std::mem::take(&mut ctx.data_mut::<ElveaList>(obj)?.items);
    for item in items {
        ctx.release(item)?;
    }
    Ok(())
}

fn traverse(ctx: &Context, obj: ObjectRef, tracer: &mut Tracer) {
    if let Some(list) = ctx.heap.get(obj).and_then(|o| o.data::<ElveaList>()) {
        for item in list.iter() {
            tracer.visit(item);
        }
    }
}

/// Shallow copy: the new list shares every item
fn clone(ctx: &mut Context, obj: ObjectRef) -> Result<ObjectRef> {
    let items = ctx.data::<ElveaList>(obj)?.items.clone();
    let copy = ctx.list_new(items.len())?;
    ctx.resize_object(copy, ctx.object(copy)?.size() + items.len() * ITEM_SIZE)?;
    for &item in &items {
        ctx.retain(item)?;
    }
    ctx.data_mut::<ElveaList>(copy)?.items = items;
    Ok(copy)
}

fn equal(ctx: &Context, a: ObjectRef, b: ObjectRef) -> Result<bool> {
    let a = ctx.data::<ElveaList>(a)?;
    let b = ctx.data::<ElveaList>(b)?;
    if a.len() != b.len() {
        return Ok(false);
    }
    for (x, y) in a.iter().zip(b.iter()) {
        if !ctx.equal(x, y)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn compare(ctx: &Context, a: ObjectRef, b: ObjectRef) -> Result<Ordering> {
    let a = ctx.data::<ElveaList>(a)?;
    let b = ctx.data::<ElveaList>(b)?;
    for (x, y) in a.iter().zip(b.iter()) {
        match ctx.compare(x, y)? {
            Ordering::Equal => continue,
            unequal => return Ok(unequal),
        }
    }
    Ok(a.len().cmp(&b.len()))
}

/// Yields the items in order; the state is the next index
fn iterate(
    ctx: &mut Context,
    obj: ObjectRef,
    state: &mut Variant,
    result: &mut Variant,
) -> Result<bool> {
    let index = match *state {
        Variant::Number(n) => n as usize,
        _ => 0,
    };
    let Some(item) = ctx.data::<ElveaList>(obj)?.get(index) else {
        return Ok(false);
    };
    ctx.copy(result, item)?;
    ctx.set_num(state, (index + 1) as f64)?;
    Ok(true)
}

impl Context {
    /// Create an empty list with a reference count of 0
    pub fn list_new(&mut self, capacity: usize) -> Result<ObjectRef> {
        let class = self.builtins().list;
        self.new_object_with(class, true, 0, ElveaList::with_capacity(capacity))
    }

    pub fn list_len(&self, list: Variant) -> Result<usize> {
        let obj = self.get_list(list)?;
        Ok(self.data::<ElveaList>(obj)?.len())
    }

    /// Item at `index`, borrowed from the list
    pub fn list_get(&self, list: Variant, index: usize) -> Result<Variant> {
        let obj = self.get_list(list)?;
        let items = self.data::<ElveaList>(obj)?;
        items
            .get(index)
            .ok_or_else(|| self.index_error(index, items.len()))
    }

    /// Append `item`, sharing its payload
    pub fn list_push(&mut self, target: &mut Variant, item: Variant) -> Result<()> {
        let class = self.builtins().list;
        let obj = self.unshare(target, class)?;
        self.resize_object(obj, self.object(obj)?.size() + ITEM_SIZE)?;
        self.retain(item)?;
        self.data_mut::<ElveaList>(obj)?.items.push(item);
        Ok(())
    }

    /// Replace the item at `index`
    pub fn list_set(&mut self, target: &mut Variant, index: usize, item: Variant) -> Result<()> {
        let len = self.list_len(*target)?;
        if index >= len {
            return Err(self.index_error(index, len));
        }

        let class = self.builtins().list;
        let obj = self.unshare(target, class)?;
        self.retain(item)?;
        let old = std::mem::replace(&mut self.data_mut::<ElveaList>(obj)?.items[index], item);
        self.release(old)
    }

    /// Remove the last item; the caller owns its reference
    pub fn list_pop(&mut self, target: &mut Variant) -> Result<Variant> {
        if self.list_len(*target)? == 0 {
            return Err(self.throw(ErrorKind::Index, "pop from empty list"));
        }

        let class = self.builtins().list;
        let obj = self.unshare(target, class)?;
        let item = self
            .data_mut::<ElveaList>(obj)?
            .items
            .pop()
            .unwrap_or_default();
        self.resize_object(obj, self.object(obj)?.size().saturating_sub(ITEM_SIZE))?;
        Ok(item)
    }

    fn index_error(&self, index: usize, len: usize) -> crate::error::Error {
        self.throw(
            ErrorKind::Index,
            format!("list index {} out of range (length {})", index, len),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::recording_context;

    fn numbers(ctx: &mut Context, values: &[f64]) -> Variant {
        let list = ctx.list_new(values.len()).unwrap();
        let mut v = ctx.init_object(list).unwrap();
        for &n in values {
            ctx.list_push(&mut v, Variant::Number(n)).unwrap();
        }
        v
    }

    #[test]
    fn test_push_get_pop() {
        let (mut ctx, _errors) = recording_context();
        let mut v = numbers(&mut ctx, &[1.0, 2.0, 3.0]);
        assert_eq!(ctx.list_len(v).unwrap(), 3);
        assert_eq!(ctx.list_get(v, 1).unwrap(), Variant::Number(2.0));

        assert_eq!(ctx.list_pop(&mut v).unwrap(), Variant::Number(3.0));
        assert_eq!(ctx.list_len(v).unwrap(), 2);

        ctx.list_set(&mut v, 0, Variant::True).unwrap();
        assert_eq!(ctx.list_get(v, 0).unwrap(), Variant::True);
        ctx.clear(&mut v).unwrap();
        assert_eq!(ctx.memory_stats().bytes_allocated, 0);
    }

    #[test]
    fn test_index_errors() {
        let (mut ctx, errors) = recording_context();
        let mut v = numbers(&mut ctx, &[1.0]);

        let err = ctx.list_get(v, 5).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Index);
        assert_eq!(err.message, "list index 5 out of range (length 1)");
        assert!(ctx.list_set(&mut v, 1, Variant::Null).is_err());

        ctx.list_pop(&mut v).unwrap();
        let err = ctx.list_pop(&mut v).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Index);
        assert_eq!(errors.borrow().len(), 3);
    }

    #[test]
    fn test_items_are_retained() {
        let (mut ctx, _errors) = recording_context();
        let s = ctx.string_new("item").unwrap();
        let item = ctx.init_object(s).unwrap();
        let mut v = numbers(&mut ctx, &[]);

        ctx.list_push(&mut v, item).unwrap();
        assert_eq!(ctx.ref_count(s).unwrap(), 2);
        ctx.release(item).unwrap();

        // Finalizing the list gives the last reference back
        ctx.clear(&mut v).unwrap();
        assert!(ctx.object(s).is_err());
    }

    #[test]
    fn test_copy_on_write() {
        let (mut ctx, _errors) = recording_context();
        let mut a = numbers(&mut ctx, &[1.0, 2.0]);
        let mut b = Variant::Null;
        ctx.copy(&mut b, a).unwrap();

        ctx.list_push(&mut b, Variant::Number(3.0)).unwrap();
        assert_ne!(a, b);
        assert_eq!(ctx.list_len(a).unwrap(), 2);
        assert_eq!(ctx.list_len(b).unwrap(), 3);

        ctx.clear(&mut a).unwrap();
        ctx.clear(&mut b).unwrap();
        assert_eq!(ctx.memory_stats().objects, 0);
    }

    #[test]
    fn test_mutation_through_alias_is_shared() {
        let (mut ctx, _errors) = recording_context();
        let mut a = numbers(&mut ctx, &[1.0]);
        ctx.make_alias(&mut a).unwrap();
        let mut b = Variant::Null;
        ctx.copy(&mut b, a).unwrap();

        ctx.list_push(&mut b, Variant::Number(2.0)).unwrap();
        assert_eq!(ctx.list_len(a).unwrap(), 2);
    }

    #[test]
    fn test_equal_and_compare() {
        let (mut ctx, _errors) = recording_context();
        let a = numbers(&mut ctx, &[1.0, 2.0]);
        let b = numbers(&mut ctx, &[1.0, 2.0]);
        let c = numbers(&mut ctx, &[1.0, 3.0]);
        let d = numbers(&mut ctx, &[1.0]);

        assert!(ctx.equal(a, b).unwrap());
        assert!(!ctx.equal(a, c).unwrap());
        assert_eq!(ctx.compare(a, c).unwrap(), Ordering::Less);
        assert_eq!(ctx.compare(d, a).unwrap(), Ordering::Less);
        assert_eq!(ctx.compare(a, b).unwrap(), Ordering::Equal);
    }

    #[test]
    fn test_clone_shares_items() {
        let (mut ctx, _errors) = recording_context();
        let s = ctx.string_new("shared").unwrap();
        let item = ctx.init_object(s).unwrap();
        let mut v = numbers(&mut ctx, &[]);
        ctx.list_push(&mut v, item).unwrap();

        let copy = ctx.clone_object(v.as_object().unwrap()).unwrap();
        assert_eq!(ctx.ref_count(copy).unwrap(), 0);
        assert_eq!(ctx.ref_count(s).unwrap(), 3);
        assert!(ctx.equal(v, Variant::Object(copy)).unwrap());
        ctx.delete_object(copy).unwrap();
        assert_eq!(ctx.ref_count(s).unwrap(), 2);
    }
}
