//! Allocator hook
//!
//! Storage for objects and arena pages is owned by Rust containers, but every
//! byte the core reserves is first requested through an [`Allocator`]. This
//! keeps the injectable, realloc-shaped contract of the runtime:
//!
//! ```text
//! realloc(old_size, new_size)
//!   old_size == 0             allocate new_size bytes
//!   new_size == 0             free old_size bytes
//!   otherwise                 resize a block
//!   returns false             request refused (out of memory)
//! ```
//!
//! Freeing never fails.

/// Realloc-shaped memory hook
pub trait Allocator {
    /// Resize a reservation from `old_size` to `new_size` bytes
    ///
    /// Returns `false` if the request cannot be satisfied. A `new_size` of 0
    /// frees the reservation and must return `true`.
    fn realloc(&mut self, old_size: usize, new_size: usize) -> bool;

    /// Bytes currently reserved, if the allocator tracks them
    fn allocated(&self) -> Option<usize> {
        None
    }
}

impl<F> Allocator for F
where
    F: FnMut(usize, usize) -> bool,
{
    fn realloc(&mut self, old_size: usize, new_size: usize) -> bool {
        self(old_size, new_size)
    }
}

/// Default allocator: never refuses, counts reserved bytes
#[derive(Debug, Default)]
pub struct SystemAllocator {
    allocated: usize,
}

impl SystemAllocator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Allocator for SystemAllocator {
    fn realloc(&mut self, old_size: usize, new_size: usize) -> bool {
        self.allocated = self.allocated.saturating_sub(old_size) + new_size;
        true
    }

    fn allocated(&self) -> Option<usize> {
        Some(self.allocated)
    }
}

/// Allocator with a fixed byte budget
///
/// Useful to bound the memory of a context and to exercise out-of-memory
/// paths.
#[derive(Debug)]
pub struct LimitedAllocator {
    /// Total budget in bytes
    pub total_size: usize,
    used: usize,
}

impl LimitedAllocator {
    pub fn new(total_size: usize) -> Self {
        LimitedAllocator {
            total_size,
            used: 0,
        }
    }

    /// Bytes still available
    #[inline]
    pub fn free_space(&self) -> usize {
        self.total_size - self.used
    }
}

impl Allocator for LimitedAllocator {
    fn realloc(&mut self, old_size: usize, new_size: usize) -> bool {
        let released = self.used.saturating_sub(old_size);
        if new_size > self.total_size - released {
            return false;
        }
        self.used = released + new_size;
        true
    }

    fn allocated(&self) -> Option<usize> {
        Some(self.used)
    }
}

/// Wrapper that counts what the inner allocator granted
pub(crate) struct Tracked {
    inner: Box<dyn Allocator>,
    reserved: usize,
}

impl Tracked {
    pub fn new(inner: Box<dyn Allocator>) -> Self {
        Tracked { inner, reserved: 0 }
    }

    #[inline]
    pub fn reserved(&self) -> usize {
        self.reserved
    }
}

impl Allocator for Tracked {
    fn realloc(&mut self, old_size: usize, new_size: usize) -> bool {
        if !self.inner.realloc(old_size, new_size) {
            return false;
        }
        self.reserved = self.reserved.saturating_sub(old_size) + new_size;
        true
    }

    fn allocated(&self) -> Option<usize> {
        Some(self.reserved)
    }
}
