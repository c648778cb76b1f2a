//! Memory management
//!
//! Elvea combines deterministic reference counting with a backup cycle
//! collector:
//! - Objects are freed as soon as their reference count drops to zero
//! - Collectable objects and aliases whose count drops but stays positive
//!   are buffered as possible cycle roots
//! - `Context::collect_cycles` runs Bacon-Rajan trial deletion over the
//!   buffered roots and frees garbage cycles
//!
//! Aliases and heap variant cells come from a slab arena; objects live in a
//! generational table. Every reservation goes through the context's
//! [`Allocator`].

mod allocator;
mod arena;
mod collector;
mod header;
mod heap;

pub use allocator::{Allocator, LimitedAllocator, SystemAllocator};
pub(crate) use allocator::Tracked;
pub use arena::{AliasRef, Arena, CellId, FreeList, SlotId, VariantRef};
pub use collector::{CollectStats, Collector, CollectorStats, Node, Tracer};
pub use header::{GcColor, Metadata};
pub use heap::{Chain, ChainIter, Object, ObjectHeap, ObjectRef};
pub(crate) use heap::ChainLink;
