//! Alias and variant cells
//!
//! An alias is a reference-counted arena cell wrapping one variant. Every
//! holder of `Variant::Alias` sees the same wrapped value, which is how
//! mutation through shared bindings is expressed. Aliases are nodes of the
//! cycle collector: an alias wrapping a collectable object (or another
//! alias) can close a cycle.
//!
//! Variant cells are plain heap slots for a single variant. They carry no
//! reference count of their own.

use crate::context::Context;
use crate::error::{AllocError, Error, ErrorHandler, ErrorKind, Result, raise};
use crate::gc::{AliasRef, Allocator, Arena, GcColor, Metadata, Node, VariantRef};
use crate::variant::Variant;

impl Context {
    /// Turn `value` into an alias holder
    ///
    /// An existing alias is returned as is. Otherwise the value moves into a
    /// fresh cell whose single reference is held by `value`.
    pub fn make_alias(&mut self, value: &mut Variant) -> Result<AliasRef> {
        if let Variant::Alias(alias) = *value {
            return Ok(alias);
        }

        let alias = self.alloc_cell(|arena, allocator| arena.alloc_alias(allocator))?;
        let handler = self.error_handler.as_ref();
        let Some(slot) = self.collector.arena.live_slot_mut(alias.id()) else {
            return Err(raise(handler, ErrorKind::Internal, "alias cell vanished"));
        };
        slot.meta = Metadata::new(true);
        slot.meta.set_in_arena(true);
        slot.meta.ref_count = 1;
        slot.value = value.take();

        *value = Variant::Alias(alias);
        Ok(alias)
    }

    /// Take one more reference to the alias
    pub fn retain_alias(&mut self, alias: AliasRef) -> Result<()> {
        let handler = self.error_handler.as_ref();
        match self.collector.arena.live_slot_mut(alias.id()) {
            Some(slot) => {
                slot.meta.ref_count += 1;
                if !matches!(slot.meta.color(), GcColor::Green | GcColor::White) {
                    slot.meta.set_color(GcColor::Black);
                }
                Ok(())
            }
            None => Err(invalid_alias(handler, alias)),
        }
    }

    /// Drop one reference; the last one frees the cell
    pub fn release_alias(&mut self, alias: AliasRef) -> Result<()> {
        let handler = self.error_handler.as_ref();
        let Some(slot) = self.collector.arena.live_slot_mut(alias.id()) else {
            return Err(invalid_alias(handler, alias));
        };
        if slot.meta.ref_count == 0 {
            return Err(raise(
                handler,
                ErrorKind::Internal,
                format!(
                    "alias {}:{} released with no references",
                    alias.slot().page(),
                    alias.slot().index()
                ),
            ));
        }

        slot.meta.ref_count -= 1;
        if slot.meta.ref_count == 0 {
            return self.free_alias(alias);
        }

        let wrapped = slot.value;
        let closes_cycle = Node::of(wrapped)
            .and_then(|node| self.node_meta(node))
            .is_some_and(Metadata::is_collectable);
        if closes_cycle {
            self.possible_root(Node::Alias(alias));
        }
        Ok(())
    }

    /// Release the wrapped value and recycle the cell
    pub(crate) fn free_alias(&mut self, alias: AliasRef) -> Result<()> {
        let Some(slot) = self.collector.arena.live_slot_mut(alias.id()) else {
            return Ok(());
        };
        let buffered = slot.meta.is_buffered();
        let value = slot.value.take();

        if buffered {
            self.collector.unbuffer(Node::Alias(alias));
        }
        self.collector.arena.recycle_alias(alias);
        self.release(value)
    }

    /// Wrapped value, without taking a reference
    pub fn alias_get(&self, alias: AliasRef) -> Result<Variant> {
        self.collector
            .arena
            .live_slot(alias.id())
            .map(|slot| slot.value)
            .ok_or_else(|| invalid_alias(self.error_handler.as_ref(), alias))
    }

    /// Store `value` in the alias, sharing its payload
    pub fn alias_set(&mut self, alias: AliasRef, value: Variant) -> Result<()> {
        if !self.collector.arena.contains(alias.id()) {
            return Err(invalid_alias(self.error_handler.as_ref(), alias));
        }
        self.retain(value)?;
        let old = match self.collector.arena.live_slot_mut(alias.id()) {
            Some(slot) => std::mem::replace(&mut slot.value, value),
            None => Variant::Null,
        };
        self.release(old)
    }

    /// Get the reference count of an alias
    pub fn alias_ref_count(&self, alias: AliasRef) -> Result<u32> {
        self.collector
            .arena
            .live_slot(alias.id())
            .map(|slot| slot.meta.ref_count)
            .ok_or_else(|| invalid_alias(self.error_handler.as_ref(), alias))
    }

    /// Allocate an empty variant cell
    pub fn alloc_variant_cell(&mut self) -> Result<VariantRef> {
        self.alloc_cell(|arena, allocator| arena.alloc_variant(allocator))
    }

    /// Get the value stored in a variant cell
    pub fn variant_cell(&self, cell: VariantRef) -> Result<Variant> {
        self.collector
            .arena
            .live_slot(cell.id())
            .map(|slot| slot.value)
            .ok_or_else(|| invalid_cell(self.error_handler.as_ref(), cell))
    }

    /// Store `value` in the cell with copy semantics
    pub fn variant_cell_set(&mut self, cell: VariantRef, value: Variant) -> Result<()> {
        if !self.collector.arena.contains(cell.id()) {
            return Err(invalid_cell(self.error_handler.as_ref(), cell));
        }
        self.retain(value)?;
        let old = match self.collector.arena.live_slot_mut(cell.id()) {
            Some(slot) => std::mem::replace(&mut slot.value, value),
            None => Variant::Null,
        };
        self.release(old)
    }

    /// Release the cell contents and give the cell back to the arena
    pub fn recycle_variant_cell(&mut self, cell: VariantRef) -> Result<()> {
        let value = match self.collector.arena.live_slot_mut(cell.id()) {
            Some(slot) => slot.value.take(),
            None => return Err(invalid_cell(self.error_handler.as_ref(), cell)),
        };
        self.collector.arena.recycle_variant(cell);
        self.release(value)
    }

    /// Give wholly unused arena pages back to the allocator
    pub fn compact_arena(&mut self) -> usize {
        self.collector.arena.compact(&mut self.allocator)
    }

    fn alloc_cell<T>(
        &mut self,
        alloc: impl FnOnce(&mut Arena, &mut dyn Allocator) -> std::result::Result<T, AllocError>,
    ) -> Result<T> {
        let Context {
            collector,
            allocator,
            error_handler,
            ..
        } = self;
        let allocator: &mut dyn Allocator = allocator;
        alloc(&mut collector.arena, allocator).map_err(|err| {
            log::debug!("arena allocation refused: {}", err);
            raise(
                error_handler.as_ref(),
                ErrorKind::Memory,
                "memory allocation failed",
            )
        })
    }
}

fn invalid_alias(handler: Option<&ErrorHandler>, alias: AliasRef) -> Error {
    raise(
        handler,
        ErrorKind::Internal,
        format!(
            "invalid alias reference {}:{}",
            alias.slot().page(),
            alias.slot().index()
        ),
    )
}

fn invalid_cell(handler: Option<&ErrorHandler>, cell: VariantRef) -> Error {
    raise(
        handler,
        ErrorKind::Internal,
        format!(
            "invalid variant cell {}:{}",
            cell.slot().page(),
            cell.slot().index()
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::gc::LimitedAllocator;
    use crate::test_support::recording_context;

    #[test]
    fn test_alias_lifecycle() {
        let (mut ctx, _errors) = recording_context();
        let mut x = Variant::Number(42.0);
        let alias = ctx.make_alias(&mut x).unwrap();
        assert_eq!(x, Variant::Alias(alias));
        assert_eq!(ctx.alias_ref_count(alias).unwrap(), 1);
        assert_eq!(ctx.alias_get(alias).unwrap(), Variant::Number(42.0));

        let mut y = Variant::Null;
        let mut z = Variant::Null;
        ctx.copy(&mut y, x).unwrap();
        ctx.copy(&mut z, x).unwrap();
        assert_eq!(ctx.alias_ref_count(alias).unwrap(), 3);

        ctx.clear(&mut y).unwrap();
        assert_eq!(ctx.alias_ref_count(alias).unwrap(), 2);

        ctx.clear(&mut z).unwrap();
        ctx.clear(&mut x).unwrap();
        assert!(!ctx.collector().arena().is_live(alias.slot()));

        // The freed cell is handed out again
        let mut w = Variant::True;
        let again = ctx.make_alias(&mut w).unwrap();
        assert_eq!(again.slot(), alias.slot());
    }

    #[test]
    fn test_make_alias_is_idempotent() {
        let (mut ctx, _errors) = recording_context();
        let mut x = Variant::True;
        let first = ctx.make_alias(&mut x).unwrap();
        let second = ctx.make_alias(&mut x).unwrap();
        assert_eq!(first, second);
        assert_eq!(ctx.alias_ref_count(first).unwrap(), 1);
    }

    #[test]
    fn test_writes_visible_through_every_holder() {
        let (mut ctx, _errors) = recording_context();
        let mut x = Variant::Number(1.0);
        let alias = ctx.make_alias(&mut x).unwrap();
        let mut y = Variant::Null;
        ctx.copy(&mut y, x).unwrap();

        ctx.alias_set(alias, Variant::Number(2.0)).unwrap();
        assert_eq!(ctx.get_num(y).unwrap(), 2.0);
        assert!(ctx.equal(x, y).unwrap());
    }

    #[test]
    fn test_alias_keeps_object_alive() {
        let (mut ctx, _errors) = recording_context();
        let s = ctx.string_new("kept").unwrap();
        let mut x = ctx.init_object(s).unwrap();
        ctx.make_alias(&mut x).unwrap();
        assert_eq!(ctx.ref_count(s).unwrap(), 1);

        ctx.clear(&mut x).unwrap();
        assert!(ctx.object(s).is_err());
    }

    #[test]
    fn test_release_dead_alias_is_internal_error() {
        let (mut ctx, errors) = recording_context();
        let mut x = Variant::Null;
        let alias = ctx.make_alias(&mut x).unwrap();
        ctx.clear(&mut x).unwrap();

        let err = ctx.release_alias(alias).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
        assert_eq!(errors.borrow().len(), 1);
    }

    #[test]
    fn test_stale_alias_does_not_reach_new_tenant() {
        let (mut ctx, errors) = recording_context();
        let mut x = Variant::Number(1.0);
        let stale = ctx.make_alias(&mut x).unwrap();
        ctx.clear(&mut x).unwrap();

        let mut y = Variant::Number(2.0);
        let fresh = ctx.make_alias(&mut y).unwrap();
        assert_eq!(fresh.slot(), stale.slot());

        let err = ctx.alias_set(stale, Variant::Number(3.0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
        assert!(ctx.alias_get(stale).is_err());
        assert_eq!(errors.borrow().len(), 2);

        assert_eq!(ctx.alias_get(fresh).unwrap(), Variant::Number(2.0));
        assert_eq!(ctx.alias_ref_count(fresh).unwrap(), 1);
    }

    #[test]
    fn test_variant_cells() {
        let (mut ctx, _errors) = recording_context();
        let cell = ctx.alloc_variant_cell().unwrap();
        assert_eq!(ctx.variant_cell(cell).unwrap(), Variant::Null);

        let s = ctx.string_new("cell").unwrap();
        let v = ctx.init_object(s).unwrap();
        ctx.variant_cell_set(cell, v).unwrap();
        assert_eq!(ctx.ref_count(s).unwrap(), 2);

        ctx.release(v).unwrap();
        ctx.recycle_variant_cell(cell).unwrap();
        assert!(ctx.object(s).is_err());
        assert!(ctx.variant_cell(cell).is_err());
    }

    #[test]
    fn test_compact_after_release() {
        let (mut ctx, _errors) = recording_context();
        let page_size = ctx.collector().arena().page_size();

        let mut holders: Vec<Variant> = (0..page_size * 2).map(|i| Variant::from(i as i32)).collect();
        for holder in holders.iter_mut() {
            ctx.make_alias(holder).unwrap();
        }
        assert_eq!(ctx.collector().arena().page_count(), 2);
        let before = ctx.memory_stats().bytes_allocated;

        for holder in holders.iter_mut() {
            ctx.clear(holder).unwrap();
        }
        assert_eq!(ctx.compact_arena(), 2);
        assert_eq!(ctx.collector().arena().page_count(), 0);
        assert!(ctx.memory_stats().bytes_allocated < before);
    }

    #[test]
    fn test_arena_out_of_memory() {
        let errors = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let sink = errors.clone();
        let mut ctx = Context::with_allocator(
            RuntimeConfig::builder().seed(1).build(),
            Box::new(LimitedAllocator::new(16)),
        );
        ctx.set_error_handler(move |kind, msg| sink.borrow_mut().push((kind, msg.to_string())));

        let mut x = Variant::True;
        let err = ctx.make_alias(&mut x).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Memory);
        assert_eq!(err.message, "memory allocation failed");
        assert_eq!(x, Variant::True);
        assert_eq!(errors.borrow()[0].0, ErrorKind::Memory);
    }
}
