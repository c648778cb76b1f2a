//! Built-in string type
//!
//! Strings are immutable from the outside and never take part in cycles, so
//! they are created GREEN. Appending goes through copy-on-write: a string
//! shared by several holders is cloned before it is modified.

use std::cell::Cell;
use std::cmp::Ordering;

use crate::context::Context;
use crate::error::Result;
use crate::gc::ObjectRef;
use crate::runtime::ClassMethods;
use crate::util::murmur_hash32;
use crate::variant::Variant;

/// String payload
#[derive(Debug, Default)]
pub struct ElveaString {
    text: String,
    /// Seeded murmur hash, computed on first use
    hash: Cell<Option<u32>>,
}

impl ElveaString {
    pub fn new(text: impl Into<String>) -> Self {
        ElveaString {
            text: text.into(),
            hash: Cell::new(None),
        }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.text.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn hash(&self, seed: u32) -> u32 {
        if let Some(hash) = self.hash.get() {
            return hash;
        }
        let hash = murmur_hash32(self.text.as_bytes(), seed);
        self.hash.set(Some(hash));
        hash
    }

    fn push_str(&mut self, s: &str) {
        self.text.push_str(s);
        self.hash.set(None);
    }
}

pub(crate) fn methods() -> ClassMethods {
    ClassMethods {
        clone: Some(clone),
        equal: Some(equal),
        compare: Some(compare),
        hash: Some(hash),
        iterate: Some(iterate),
        ..ClassMethods::default()
    }
}

fn clone(ctx: &mut Context, obj: ObjectRef) -> Result<ObjectRef> {
    let text = ctx.data::<ElveaString>(obj)?.as_str().to_string();
    ctx.string_new(&text)
}

fn equal(ctx: &Context, a: ObjectRef, b: ObjectRef) -> Result<bool> {
    Ok(ctx.string_as_str(a)? == ctx.string_as_str(b)?)
}

fn compare(ctx: &Context, a: ObjectRef, b: ObjectRef) -> Result<Ordering> {
    Ok(ctx
        .string_as_str(a)?
        .as_bytes()
        .cmp(ctx.string_as_str(b)?.as_bytes()))
}

fn hash(ctx: &Context, obj: ObjectRef) -> Result<u32> {
    Ok(ctx.data::<ElveaString>(obj)?.hash(ctx.seed()))
}

/// Yields one-character strings; the state is the byte offset
fn iterate(
    ctx: &mut Context,
    obj: ObjectRef,
    state: &mut Variant,
    result: &mut Variant,
) -> Result<bool> {
    let offset = match *state {
        Variant::Number(n) => n as usize,
        _ => 0,
    };
    let text = ctx.string_as_str(obj)?;
    let Some(ch) = text.get(offset..).and_then(|rest| rest.chars().next()) else {
        return Ok(false);
    };

    let mut buf = [0u8; 4];
    let piece = ctx.string_new(ch.encode_utf8(&mut buf))?;
    ctx.set_object(result, piece)?;
    ctx.set_num(state, (offset + ch.len_utf8()) as f64)?;
    Ok(true)
}

impl Context {
    /// Create a string object with a reference count of 0
    pub fn string_new(&mut self, text: &str) -> Result<ObjectRef> {
        let class = self.builtins().string;
        self.new_object_with(class, false, text.len(), ElveaString::new(text))
    }

    pub fn string_as_str(&self, obj: ObjectRef) -> Result<&str> {
        Ok(self.data::<ElveaString>(obj)?.as_str())
    }

    /// Length in bytes
    pub fn string_len(&self, obj: ObjectRef) -> Result<usize> {
        Ok(self.data::<ElveaString>(obj)?.len())
    }

    /// Append to the string held by `target`
    ///
    /// If the string is shared it is cloned first, and `target` (or the
    /// alias it points to) is updated to hold the copy.
    pub fn string_append(&mut self, target: &mut Variant, s: &str) -> Result<()> {
        let class = self.builtins().string;
        let obj = self.unshare(target, class)?;
        let new_size = self.object(obj)?.size() + s.len();
        self.resize_object(obj, new_size)?;
        self.data_mut::<ElveaString>(obj)?.push_str(s);
        Ok(())
    }
}
