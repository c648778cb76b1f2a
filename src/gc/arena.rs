//! Slab arena for alias and variant cells
//!
//! Cells are handed out from fixed-size pages through a free list threaded
//! through the unused slots. Pages are created lazily when the free list runs
//! dry and are only given back by [`Arena::compact`].
//!
//! ```text
//!   pages[0]  [ live | free | live | free | ... ]
//!   pages[1]  [ free | free | free | free | ... ]
//!                  |      ^
//!   free_list -----+      |
//!              next ------+
//! ```
//!
//! A slot does not know whether it holds an alias or a plain variant. The
//! handle type that allocated it ([`AliasRef`] or [`VariantRef`]) is the only
//! record of that, so a cell must be recycled through the same kind of handle.

use crate::error::AllocError;
use crate::gc::Allocator;
use crate::gc::header::Metadata;
use crate::variant::Variant;

/// Address of one arena slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId {
    page: u32,
    index: u32,
}

impl SlotId {
    #[inline]
    pub const fn page(self) -> u32 {
        self.page
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }
}

/// Address of a handed-out cell, checked against the slot generation
///
/// A slot's generation moves on every time it is recycled, so a handle kept
/// past the end of its cell no longer matches a later tenant of the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellId {
    slot: SlotId,
    generation: u32,
}

impl CellId {
    #[inline]
    pub const fn slot(self) -> SlotId {
        self.slot
    }

    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

/// Handle to an alias cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AliasRef(pub(crate) CellId);

impl AliasRef {
    /// Arena address of the cell
    #[inline]
    pub const fn slot(self) -> SlotId {
        self.0.slot
    }

    #[inline]
    pub const fn id(self) -> CellId {
        self.0
    }
}

/// Handle to a heap-allocated variant cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VariantRef(pub(crate) CellId);

impl VariantRef {
    /// Arena address of the cell
    #[inline]
    pub const fn slot(self) -> SlotId {
        self.0.slot
    }

    #[inline]
    pub const fn id(self) -> CellId {
        self.0
    }
}

/// One arena cell
#[derive(Debug, Clone, Copy)]
pub(crate) struct Slot {
    pub meta: Metadata,
    pub value: Variant,
    generation: u32,
    next: Option<SlotId>,
}

impl Slot {
    const EMPTY: Slot = Slot {
        meta: Metadata::new(false),
        value: Variant::Null,
        generation: 0,
        next: None,
    };
}

struct Page {
    slots: Box<[Slot]>,
}

impl Page {
    fn is_unused(&self) -> bool {
        self.slots.iter().all(|slot| !slot.meta.in_arena())
    }
}

/// Free-list slab allocator
pub struct Arena {
    pages: Vec<Option<Page>>,
    /// Page numbers released by `compact` with the first generation their
    /// slots may hand out, reused before growing `pages`
    vacant: Vec<(u32, u32)>,
    free_list: Option<SlotId>,
    page_size: usize,
    live: usize,
}

impl Arena {
    pub fn new(page_size: usize) -> Self {
        Arena {
            pages: Vec::new(),
            vacant: Vec::new(),
            free_list: None,
            page_size: page_size.max(1),
            live: 0,
        }
    }

    /// Bytes reserved from the allocator for one page
    #[inline]
    pub fn page_bytes(&self) -> usize {
        self.page_size * std::mem::size_of::<Slot>()
    }

    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of pages currently held
    pub fn page_count(&self) -> usize {
        self.pages.len() - self.vacant.len()
    }

    /// Number of cells currently handed out
    #[inline]
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Allocate an alias cell
    pub fn alloc_alias(&mut self, allocator: &mut dyn Allocator) -> Result<AliasRef, AllocError> {
        self.alloc_slot(allocator).map(AliasRef)
    }

    /// Allocate a variant cell
    pub fn alloc_variant(
        &mut self,
        allocator: &mut dyn Allocator,
    ) -> Result<VariantRef, AllocError> {
        self.alloc_slot(allocator).map(VariantRef)
    }

    /// Return an alias cell to the free list
    pub fn recycle_alias(&mut self, alias: AliasRef) {
        self.recycle_slot(alias.0);
    }

    /// Return a variant cell to the free list
    pub fn recycle_variant(&mut self, cell: VariantRef) {
        self.recycle_slot(cell.0);
    }

    /// Whether the slot is currently handed out, to any handle
    pub fn is_live(&self, id: SlotId) -> bool {
        self.slot(id).is_some_and(|slot| slot.meta.in_arena())
    }

    /// Whether `id` still names the cell it was handed out for
    pub fn contains(&self, id: CellId) -> bool {
        self.live_slot(id).is_some()
    }

    /// Walk the free list from its head
    pub fn free_list(&self) -> FreeList<'_> {
        FreeList {
            arena: self,
            cursor: self.free_list,
        }
    }

    /// Release every page with no live slot
    ///
    /// The slots of those pages are unlinked from the free list before the
    /// pages are dropped. Returns the number of pages released.
    pub fn compact(&mut self, allocator: &mut dyn Allocator) -> usize {
        let unused: Vec<bool> = self
            .pages
            .iter()
            .map(|page| page.as_ref().is_some_and(Page::is_unused))
            .collect();
        if !unused.contains(&true) {
            return 0;
        }

        let mut previous: Option<SlotId> = None;
        let mut cursor = self.free_list;
        while let Some(id) = cursor {
            let next = self.slot(id).and_then(|slot| slot.next);
            if unused[id.page as usize] {
                match previous {
                    None => self.free_list = next,
                    Some(prev) => {
                        if let Some(slot) = self.slot_mut(prev) {
                            slot.next = next;
                        }
                    }
                }
            } else {
                previous = Some(id);
            }
            cursor = next;
        }

        let page_bytes = self.page_bytes();
        let mut released = 0;
        for (number, is_unused) in unused.into_iter().enumerate() {
            if is_unused {
                // Handles into this page must not match its next incarnation
                let generation = self.pages[number]
                    .as_ref()
                    .and_then(|page| page.slots.iter().map(|slot| slot.generation).max())
                    .unwrap_or(0);
                self.pages[number] = None;
                self.vacant.push((number as u32, generation));
                allocator.realloc(page_bytes, 0);
                released += 1;
            }
        }

        log::debug!(
            "arena compacted: {} page(s) released, {} remaining",
            released,
            self.page_count()
        );
        released
    }

    #[inline]
    pub(crate) fn slot(&self, id: SlotId) -> Option<&Slot> {
        self.pages
            .get(id.page as usize)?
            .as_ref()?
            .slots
            .get(id.index as usize)
    }

    #[inline]
    pub(crate) fn slot_mut(&mut self, id: SlotId) -> Option<&mut Slot> {
        self.pages
            .get_mut(id.page as usize)?
            .as_mut()?
            .slots
            .get_mut(id.index as usize)
    }

    /// Live slot lookup, `None` for recycled or stale handles
    #[inline]
    pub(crate) fn live_slot(&self, id: CellId) -> Option<&Slot> {
        self.slot(id.slot)
            .filter(|slot| slot.meta.in_arena() && slot.generation == id.generation)
    }

    #[inline]
    pub(crate) fn live_slot_mut(&mut self, id: CellId) -> Option<&mut Slot> {
        self.slot_mut(id.slot)
            .filter(|slot| slot.meta.in_arena() && slot.generation == id.generation)
    }

    fn alloc_slot(&mut self, allocator: &mut dyn Allocator) -> Result<CellId, AllocError> {
        if self.free_list.is_none() {
            self.add_page(allocator)?;
        }

        let id = self.free_list.ok_or(AllocError {
            requested: self.page_bytes(),
        })?;
        let slot = self.slot_mut(id).ok_or(AllocError { requested: 0 })?;
        let next = slot.next;
        let generation = slot.generation;
        *slot = Slot {
            generation,
            ..Slot::EMPTY
        };
        slot.meta.set_in_arena(true);

        self.free_list = next;
        self.live += 1;
        Ok(CellId {
            slot: id,
            generation,
        })
    }

    fn recycle_slot(&mut self, id: CellId) {
        let head = self.free_list;
        let Some(slot) = self.slot_mut(id.slot) else {
            log::warn!("recycling unknown arena slot {:?}", id.slot);
            return;
        };
        if !slot.meta.in_arena() || slot.generation != id.generation {
            debug_assert!(false, "arena slot {:?} recycled twice", id.slot);
            log::warn!("arena slot {:?} recycled twice", id.slot);
            return;
        }

        slot.meta.set_in_arena(false);
        slot.value = Variant::Null;
        slot.generation = slot.generation.wrapping_add(1);
        slot.next = head;
        self.free_list = Some(id.slot);
        self.live -= 1;
    }

    fn add_page(&mut self, allocator: &mut dyn Allocator) -> Result<(), AllocError> {
        let page_bytes = self.page_bytes();
        if !allocator.realloc(0, page_bytes) {
            return Err(AllocError {
                requested: page_bytes,
            });
        }

        let (number, generation) = match self.vacant.pop() {
            Some(reused) => reused,
            None => {
                self.pages.push(None);
                ((self.pages.len() - 1) as u32, 0)
            }
        };

        let mut slots = vec![Slot::EMPTY; self.page_size].into_boxed_slice();
        let last = self.page_size - 1;
        for (index, slot) in slots.iter_mut().enumerate() {
            slot.generation = generation;
            slot.next = if index < last {
                Some(SlotId {
                    page: number,
                    index: (index + 1) as u32,
                })
            } else {
                self.free_list
            };
        }

        self.pages[number as usize] = Some(Page { slots });
        self.free_list = Some(SlotId {
            page: number,
            index: 0,
        });

        log::trace!("arena page {} allocated ({} slots)", number, self.page_size);
        Ok(())
    }
}

/// Iterator over the free list
pub struct FreeList<'a> {
    arena: &'a Arena,
    cursor: Option<SlotId>,
}

impl Iterator for FreeList<'_> {
    type Item = SlotId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        self.cursor = self.arena.slot(id).and_then(|slot| slot.next);
        Some(id)
    }
}
