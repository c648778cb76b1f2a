//! Object heap and collector chain
//!
//! Objects live in a generational slot table and are addressed by
//! [`ObjectRef`]. A handle whose object has been deleted no longer resolves,
//! even after the slot is reused.
//!
//! Collectable objects are also threaded on a doubly-linked chain whose links
//! sit in the object entries, so an object can detach itself in O(1).

use std::any::Any;

use crate::gc::header::Metadata;
use crate::runtime::ClassRef;

/// Handle to a heap object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    index: u32,
    generation: u32,
}

impl ObjectRef {
    /// Slot index in the object table
    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ChainLink {
    prev: Option<ObjectRef>,
    next: Option<ObjectRef>,
}

/// A heap object: header, class and typed payload
pub struct Object {
    pub(crate) meta: Metadata,
    class: ClassRef,
    pub(crate) chain: Option<ChainLink>,
    /// Bytes reserved from the allocator for this object
    pub(crate) size: usize,
    pub(crate) data: Box<dyn Any>,
}

impl Object {
    pub(crate) fn new(
        class: ClassRef,
        collectable: bool,
        size: usize,
        data: Box<dyn Any>,
    ) -> Self {
        Object {
            meta: Metadata::new(collectable),
            class,
            chain: collectable.then(ChainLink::default),
            size,
            data,
        }
    }

    #[inline]
    pub fn meta(&self) -> &Metadata {
        &self.meta
    }

    #[inline]
    pub fn class(&self) -> ClassRef {
        self.class
    }

    #[inline]
    pub fn ref_count(&self) -> u32 {
        self.meta.ref_count
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the object is tracked by the cycle collector
    #[inline]
    pub fn is_collectable(&self) -> bool {
        self.chain.is_some()
    }

    /// Typed view of the payload
    #[inline]
    pub fn data<T: Any>(&self) -> Option<&T> {
        self.data.downcast_ref()
    }

    #[inline]
    pub fn data_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.data.downcast_mut()
    }
}

struct Entry {
    generation: u32,
    object: Option<Object>,
}

/// Generational slot table of objects
#[derive(Default)]
pub struct ObjectHeap {
    entries: Vec<Entry>,
    free: Vec<u32>,
    live: usize,
}

impl ObjectHeap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live objects
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub(crate) fn insert(&mut self, object: Object) -> ObjectRef {
        self.live += 1;
        match self.free.pop() {
            Some(index) => {
                let entry = &mut self.entries[index as usize];
                entry.object = Some(object);
                ObjectRef {
                    index,
                    generation: entry.generation,
                }
            }
            None => {
                self.entries.push(Entry {
                    generation: 0,
                    object: Some(object),
                });
                ObjectRef {
                    index: (self.entries.len() - 1) as u32,
                    generation: 0,
                }
            }
        }
    }

    pub(crate) fn remove(&mut self, obj: ObjectRef) -> Option<Object> {
        let entry = self.entries.get_mut(obj.index as usize)?;
        if entry.generation != obj.generation {
            return None;
        }
        let object = entry.object.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(obj.index);
        self.live -= 1;
        Some(object)
    }

    #[inline]
    pub fn get(&self, obj: ObjectRef) -> Option<&Object> {
        let entry = self.entries.get(obj.index as usize)?;
        if entry.generation != obj.generation {
            return None;
        }
        entry.object.as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, obj: ObjectRef) -> Option<&mut Object> {
        let entry = self.entries.get_mut(obj.index as usize)?;
        if entry.generation != obj.generation {
            return None;
        }
        entry.object.as_mut()
    }

    #[inline]
    pub fn contains(&self, obj: ObjectRef) -> bool {
        self.get(obj).is_some()
    }

    /// Iterate over all live objects
    pub fn iter(&self) -> impl Iterator<Item = (ObjectRef, &Object)> + '_ {
        self.entries.iter().enumerate().filter_map(|(index, entry)| {
            entry.object.as_ref().map(|object| {
                (
                    ObjectRef {
                        index: index as u32,
                        generation: entry.generation,
                    },
                    object,
                )
            })
        })
    }
}

/// Doubly-linked chain of collectable objects
#[derive(Debug, Default)]
pub struct Chain {
    root: Option<ObjectRef>,
    len: usize,
}

impl Chain {
    #[inline]
    pub fn root(&self) -> Option<ObjectRef> {
        self.root
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert `obj` at the root of the chain
    pub(crate) fn link(&mut self, heap: &mut ObjectHeap, obj: ObjectRef) {
        let old_root = self.root;
        if let Some(link) = heap.get_mut(obj).and_then(|o| o.chain.as_mut()) {
            link.prev = None;
            link.next = old_root;
        } else {
            return;
        }
        if let Some(link) = old_root.and_then(|r| heap.get_mut(r)).and_then(|o| o.chain.as_mut()) {
            link.prev = Some(obj);
        }
        self.root = Some(obj);
        self.len += 1;
    }

    /// Detach `obj`, fixing up its neighbours and the root
    pub(crate) fn unlink(&mut self, heap: &mut ObjectHeap, obj: ObjectRef) {
        let Some(link) = heap.get_mut(obj).and_then(|o| o.chain.as_mut()) else {
            return;
        };
        let ChainLink { prev, next } = std::mem::take(link);

        match prev {
            Some(prev) => {
                if let Some(link) = heap.get_mut(prev).and_then(|o| o.chain.as_mut()) {
                    link.next = next;
                }
            }
            None => self.root = next,
        }
        if let Some(link) = next.and_then(|n| heap.get_mut(n)).and_then(|o| o.chain.as_mut()) {
            link.prev = prev;
        }
        self.len -= 1;
    }

    /// Walk the chain from its root
    pub fn iter<'a>(&self, heap: &'a ObjectHeap) -> ChainIter<'a> {
        ChainIter {
            heap,
            cursor: self.root,
        }
    }
}

/// Iterator over the collector chain
pub struct ChainIter<'a> {
    heap: &'a ObjectHeap,
    cursor: Option<ObjectRef>,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = (ObjectRef, &'a Object);

    fn next(&mut self) -> Option<Self::Item> {
        let obj = self.cursor?;
        let object = self.heap.get(obj)?;
        self.cursor = object.chain.and_then(|link| link.next);
        Some((obj, object))
    }
}
