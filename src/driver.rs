//! Low-level driver that directly owns the three select pins.

use core::fmt;

use embedded_hal::digital::{Error as HalError, ErrorKind, OutputPin};

use crate::index::SelectorIndex;

/// Possible errors from the multiplexer layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxError {
    /// Underlying pin error from the HAL pin.
    PinError,
    /// A channel index outside `0..=7`.
    IndexOutOfRange(u8),
}

impl HalError for MuxError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

impl fmt::Display for MuxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MuxError::PinError => f.write_str("multiplexer pin access failed"),
            MuxError::IndexOutOfRange(index) => {
                write!(f, "channel index {index} is outside 0..=7")
            }
        }
    }
}

impl std::error::Error for MuxError {}

/// The three address lines A, B and C of the multiplexer.
pub struct SelectLines<A, B, C>
where
    A: OutputPin,
    B: OutputPin,
    C: OutputPin,
{
    pub(crate) a: A,
    pub(crate) b: B,
    pub(crate) c: C,
    pub(crate) current: SelectorIndex,
}

impl<A, B, C> SelectLines<A, B, C>
where
    A: OutputPin,
    B: OutputPin,
    C: OutputPin,
{
    /// Take ownership of the lines and address channel 0.
    pub fn new(mut a: A, mut b: B, mut c: C) -> Result<Self, MuxError> {
        a.set_low().map_err(|_| MuxError::PinError)?;
        b.set_low().map_err(|_| MuxError::PinError)?;
        c.set_low().map_err(|_| MuxError::PinError)?;

        Ok(Self {
            a,
            b,
            c,
            current: SelectorIndex::FIRST,
        })
    }

    /// Drive all three lines to address `index`.
    ///
    /// Every line is written even when its level does not change, so a
    /// glitched line recovers on the next tick.
    pub fn select(&mut self, index: SelectorIndex) -> Result<(), MuxError> {
        write_level(&mut self.a, index.bit_a())?;
        write_level(&mut self.b, index.bit_b())?;
        write_level(&mut self.c, index.bit_c())?;
        self.current = index;
        Ok(())
    }

    /// The index most recently written with [`select`](Self::select).
    pub fn current(&self) -> SelectorIndex {
        self.current
    }

    /// Give the pins back.
    pub fn release(self) -> (A, B, C) {
        (self.a, self.b, self.c)
    }
}

fn write_level<P: OutputPin>(pin: &mut P, high: bool) -> Result<(), MuxError> {
    if high {
        pin.set_high().map_err(|_| MuxError::PinError)
    } else {
        pin.set_low().map_err(|_| MuxError::PinError)
    }
}
