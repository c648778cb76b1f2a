//! Object lifecycle
//!
//! Objects are created by [`Context::new_object`] (zeroed byte payload) or
//! [`Context::new_object_with`] (typed payload), start with a reference
//! count of 0 and are deleted as soon as their last reference is released.

use std::any::{Any, type_name};

use crate::context::Context;
use crate::error::{Error, ErrorHandler, ErrorKind, Result, raise};
use crate::gc::{Allocator, ChainLink, GcColor, Node, Object, ObjectRef};
use crate::runtime::ClassRef;
use crate::variant::Variant;

impl Context {
    /// Create an object with `instance_size + extra` zeroed bytes of payload
    pub fn new_object(
        &mut self,
        class: ClassRef,
        collectable: bool,
        extra: usize,
    ) -> Result<ObjectRef> {
        let size = self.class(class)?.instance_size() + extra;
        let payload = vec![0u8; size].into_boxed_slice();
        self.new_object_with(class, collectable, extra, payload)
    }

    /// Create an object holding `data`
    ///
    /// The reservation covers the class instance size, `extra` bytes and,
    /// for collectable objects, the chain links. A collection may run first
    /// if enough cycle candidates are buffered.
    pub fn new_object_with<T: Any>(
        &mut self,
        class: ClassRef,
        collectable: bool,
        extra: usize,
        data: T,
    ) -> Result<ObjectRef> {
        let mut size = self.class(class)?.instance_size() + extra;
        if collectable {
            size += std::mem::size_of::<ChainLink>();
        }

        self.maybe_collect()?;
        self.reserve(0, size)?;

        let obj = self
            .heap
            .insert(Object::new(class, collectable, size, Box::new(data)));
        if collectable {
            self.collector.chain.link(&mut self.heap, obj);
        }
        Ok(obj)
    }

    /// Free an object regardless of its reference count
    ///
    /// The object leaves the candidate buffer and the chain, is finalized
    /// unless that already happened, and its bytes go back to the allocator.
    pub fn delete_object(&mut self, obj: ObjectRef) -> Result<()> {
        let handler = self.error_handler.as_ref();
        let Some(object) = self.heap.get_mut(obj) else {
            return Err(invalid_object(handler, obj));
        };

        if object.meta.is_buffered() {
            object.meta.set_buffered(false);
            self.collector.unbuffer(Node::Object(obj));
        }
        if object.is_collectable() {
            self.collector.chain.unlink(&mut self.heap, obj);
        }

        let result = self.finalize_object(obj);

        if let Some(object) = self.heap.remove(obj) {
            self.allocator.realloc(object.size, 0);
            log::trace!(
                "object #{} (class #{}, {} bytes) deleted",
                obj.index(),
                object.class().index(),
                object.size
            );
        }
        result
    }

    /// Run the class finalizer once
    pub(crate) fn finalize_object(&mut self, obj: ObjectRef) -> Result<()> {
        let object = self.object_mut(obj)?;
        if object.meta.is_finalized() {
            return Ok(());
        }
        object.meta.set_finalized(true);
        let class = object.class();

        match self.classes.lookup(class, &|m| m.finalize) {
            Some(finalize) => finalize(self, obj),
            None => Ok(()),
        }
    }

    /// Take one more reference to the object
    pub fn retain_object(&mut self, obj: ObjectRef) -> Result<()> {
        let object = self.object_mut(obj)?;
        object.meta.ref_count += 1;
        if !matches!(object.meta.color(), GcColor::Green | GcColor::White) {
            object.meta.set_color(GcColor::Black);
        }
        Ok(())
    }

    /// Drop one reference, deleting the object at zero
    pub fn release_object(&mut self, obj: ObjectRef) -> Result<()> {
        let handler = self.error_handler.as_ref();
        let Some(object) = self.heap.get_mut(obj) else {
            return Err(invalid_object(handler, obj));
        };
        if object.meta.ref_count == 0 {
            return Err(raise(
                handler,
                ErrorKind::Internal,
                format!("object #{} released with no references", obj.index()),
            ));
        }

        object.meta.ref_count -= 1;
        if object.meta.ref_count == 0 {
            return self.delete_object(obj);
        }
        if object.is_collectable() {
            self.possible_root(Node::Object(obj));
        }
        Ok(())
    }

    /// Get the object behind a handle
    pub fn object(&self, obj: ObjectRef) -> Result<&Object> {
        self.heap
            .get(obj)
            .ok_or_else(|| invalid_object(self.error_handler.as_ref(), obj))
    }

    /// Get the object behind a handle, mutably
    pub fn object_mut(&mut self, obj: ObjectRef) -> Result<&mut Object> {
        let handler = self.error_handler.as_ref();
        self.heap
            .get_mut(obj)
            .ok_or_else(|| invalid_object(handler, obj))
    }

    /// Typed view of an object's payload
    pub fn data<T: Any>(&self, obj: ObjectRef) -> Result<&T> {
        let object = self.object(obj)?;
        object
            .data::<T>()
            .ok_or_else(|| self.payload_mismatch::<T>(object))
    }

    pub fn data_mut<T: Any>(&mut self, obj: ObjectRef) -> Result<&mut T> {
        let object = self.object(obj)?;
        if object.data::<T>().is_none() {
            return Err(self.payload_mismatch::<T>(object));
        }
        let handler = self.error_handler.as_ref();
        self.heap
            .get_mut(obj)
            .and_then(|object| object.data_mut::<T>())
            .ok_or_else(|| invalid_object(handler, obj))
    }

    /// Get the class of an object
    #[inline]
    pub fn class_of(&self, obj: ObjectRef) -> Result<ClassRef> {
        Ok(self.object(obj)?.class())
    }

    /// Get the reference count of an object
    #[inline]
    pub fn ref_count(&self, obj: ObjectRef) -> Result<u32> {
        Ok(self.object(obj)?.ref_count())
    }

    /// Whether `obj` is an instance of `class` or of a class inheriting it
    pub fn is_instance(&self, obj: ObjectRef, class: ClassRef) -> bool {
        self.heap
            .get(obj)
            .is_some_and(|object| self.classes.inherits(object.class(), class))
    }

    /// Deep copy through the class `clone` method
    pub fn clone_object(&mut self, obj: ObjectRef) -> Result<ObjectRef> {
        let class = self.class_of(obj)?;
        match self.classes.lookup(class, &|m| m.clone) {
            Some(clone) => clone(self, obj),
            None => Err(self.throw(
                ErrorKind::Runtime,
                format!(
                    "Type {} is not clonable (implement clone)",
                    self.class(class)?.name()
                ),
            )),
        }
    }

    /// Move the object's reservation to `new_size` bytes
    pub(crate) fn resize_object(&mut self, obj: ObjectRef, new_size: usize) -> Result<()> {
        let old_size = self.object(obj)?.size;
        if old_size == new_size {
            return Ok(());
        }
        self.reserve(old_size, new_size)?;
        self.object_mut(obj)?.size = new_size;
        Ok(())
    }

    /// Object of `class` held by `target`, made exclusive to its holder
    ///
    /// Aliases are followed to the cell that holds the object, so the write
    /// stays visible to every holder of the alias. A shared object is cloned
    /// and the clone replaces it in that holder.
    pub(crate) fn unshare(&mut self, target: &mut Variant, class: ClassRef) -> Result<ObjectRef> {
        let mut holder = None;
        let mut current = *target;
        let mut depth = 0;
        while let Variant::Alias(alias) = current {
            if depth == self.config.max_alias_depth {
                return Err(self.throw(
                    ErrorKind::Internal,
                    format!("alias chain longer than {} links", depth),
                ));
            }
            holder = Some(alias);
            current = self.alias_get(alias)?;
            depth += 1;
        }

        let obj = self.get_object(current, class)?;
        if !self.object(obj)?.meta().is_shared() {
            return Ok(obj);
        }

        let copy = self.clone_object(obj)?;
        let fresh = Variant::Object(copy);
        match holder {
            Some(alias) => self.alias_set(alias, fresh)?,
            None => self.copy(target, fresh)?,
        }
        Ok(copy)
    }

    fn payload_mismatch<T: Any>(&self, object: &Object) -> Error {
        let name = self
            .classes
            .get(object.class())
            .map_or("unknown", |class| class.name());
        self.throw(
            ErrorKind::Type,
            format!(
                "object of class {} does not hold a {}",
                name,
                type_name::<T>()
            ),
        )
    }
}

fn invalid_object(handler: Option<&ErrorHandler>, obj: ObjectRef) -> Error {
    raise(
        handler,
        ErrorKind::Internal,
        format!("invalid object reference #{}", obj.index()),
    )
}
