//! Object metadata
//!
//! Every heap object and every alias cell starts with a [`Metadata`] block:
//! the reference count plus a packed word of collector bits.
//!
//! Layout of `bits`:
//! - Bits 0-2: GC color
//! - Bit 3: slot is live in the arena
//! - Bit 4: node sits in the collector's candidate buffer
//! - Bit 5: finalizer already ran
//!
//! `flags` is left entirely to the object's class.

/// Bacon-Rajan cycle collector colors
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GcColor {
    /// Acyclic by construction, never scanned
    Green = 0,
    /// In use or free
    Black = 1,
    /// Possible member of a garbage cycle
    Grey = 2,
    /// Member of a garbage cycle
    White = 3,
    /// Possible root of a garbage cycle
    Purple = 4,
}

impl GcColor {
    #[inline]
    const fn from_bits(bits: u16) -> Self {
        match bits & COLOR_MASK {
            0 => GcColor::Green,
            1 => GcColor::Black,
            2 => GcColor::Grey,
            3 => GcColor::White,
            _ => GcColor::Purple,
        }
    }
}

const COLOR_MASK: u16 = 0b111;
const ARENA_BIT: u16 = 1 << 3;
const BUFFERED_BIT: u16 = 1 << 4;
const FINALIZED_BIT: u16 = 1 << 5;

/// Header shared by objects and aliases
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Metadata {
    pub ref_count: u32,
    bits: u16,
    /// Free for use by the object's class
    pub flags: u16,
}

impl Metadata {
    /// Fresh header for a new object
    #[inline]
    pub const fn new(collectable: bool) -> Self {
        let color = if collectable {
            GcColor::Black
        } else {
            GcColor::Green
        };
        Metadata {
            ref_count: 0,
            bits: color as u16,
            flags: 0,
        }
    }

    #[inline]
    pub const fn color(&self) -> GcColor {
        GcColor::from_bits(self.bits)
    }

    #[inline]
    pub fn set_color(&mut self, color: GcColor) {
        self.bits = (self.bits & !COLOR_MASK) | color as u16;
    }

    /// Whether the cycle collector tracks this node
    #[inline]
    pub const fn is_collectable(&self) -> bool {
        !matches!(self.color(), GcColor::Green)
    }

    /// Reference count above one
    #[inline]
    pub const fn is_shared(&self) -> bool {
        self.ref_count > 1
    }

    #[inline]
    pub const fn in_arena(&self) -> bool {
        (self.bits & ARENA_BIT) != 0
    }

    #[inline]
    pub fn set_in_arena(&mut self, live: bool) {
        self.set_bit(ARENA_BIT, live);
    }

    #[inline]
    pub const fn is_buffered(&self) -> bool {
        (self.bits & BUFFERED_BIT) != 0
    }

    #[inline]
    pub fn set_buffered(&mut self, buffered: bool) {
        self.set_bit(BUFFERED_BIT, buffered);
    }

    #[inline]
    pub const fn is_finalized(&self) -> bool {
        (self.bits & FINALIZED_BIT) != 0
    }

    #[inline]
    pub fn set_finalized(&mut self, finalized: bool) {
        self.set_bit(FINALIZED_BIT, finalized);
    }

    #[inline]
    fn set_bit(&mut self, bit: u16, on: bool) {
        if on {
            self.bits |= bit;
        } else {
            self.bits &= !bit;
        }
    }
}
