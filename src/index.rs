//! The 3-bit channel address shared by every multiplexed line.

use crate::driver::MuxError;

/// Number of channels behind one 3-line multiplexer.
pub const CHANNEL_COUNT: usize = 8;

/// A channel address in `0..=7`.
///
/// The integer value is the only stored state; the per-line levels are
/// derived from it. Line C carries bit 0, B bit 1 and A bit 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SelectorIndex(u8);

impl SelectorIndex {
    pub const FIRST: Self = Self(0);
    pub const LAST: Self = Self(7);

    /// Returns `None` for values above 7.
    pub const fn new(value: u8) -> Option<Self> {
        if value < CHANNEL_COUNT as u8 {
            Some(Self(value))
        } else {
            None
        }
    }

    pub const fn value(self) -> u8 {
        self.0
    }

    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Level of select line A (most significant bit).
    pub const fn bit_a(self) -> bool {
        self.0 & 0b100 != 0
    }

    /// Level of select line B.
    pub const fn bit_b(self) -> bool {
        self.0 & 0b010 != 0
    }

    /// Level of select line C (least significant bit).
    pub const fn bit_c(self) -> bool {
        self.0 & 0b001 != 0
    }

    /// Line levels in `[A, B, C]` order.
    pub const fn levels(self) -> [bool; 3] {
        [self.bit_a(), self.bit_b(), self.bit_c()]
    }

    /// Next index in scan order, wrapping 7 -> 0.
    pub const fn next(self) -> Self {
        Self((self.0 + 1) % CHANNEL_COUNT as u8)
    }

    /// Mask selecting this channel's bit in an 8-bit flag byte.
    pub const fn mask(self) -> u8 {
        1 << self.0
    }

    /// All eight indices in scan order.
    pub fn all() -> impl Iterator<Item = SelectorIndex> {
        (0..CHANNEL_COUNT as u8).map(SelectorIndex)
    }
}

impl TryFrom<u8> for SelectorIndex {
    type Error = MuxError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(MuxError::IndexOutOfRange(value))
    }
}

impl From<SelectorIndex> for u8 {
    fn from(index: SelectorIndex) -> Self {
        index.0
    }
}
