//! A fake multiplexer bus for threaded tests.
//!
//! The three select pins write bits of a shared address; the common input
//! line reports the level of whichever channel is addressed. Pressed
//! channels read low (pull-up wiring).

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use embedded_hal::digital::{ErrorType, InputPin, OutputPin};

#[derive(Clone, Default)]
pub(crate) struct FakeBus {
    address: Arc<AtomicU8>,
    pressed: Arc<AtomicU8>,
    writes: Arc<AtomicUsize>,
}

impl FakeBus {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Select pins for lines A, B, C.
    pub(crate) fn select_pins(&self) -> (BusPin, BusPin, BusPin) {
        (self.pin(0b100), self.pin(0b010), self.pin(0b001))
    }

    fn pin(&self, bit: u8) -> BusPin {
        BusPin {
            bus: self.clone(),
            bit,
        }
    }

    pub(crate) fn input(&self) -> BusInput {
        BusInput { bus: self.clone() }
    }

    pub(crate) fn set_pressed(&self, mask: u8) {
        self.pressed.store(mask, Ordering::SeqCst);
    }

    pub(crate) fn address(&self) -> u8 {
        self.address.load(Ordering::SeqCst)
    }

    pub(crate) fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

pub(crate) struct BusPin {
    bus: FakeBus,
    bit: u8,
}

impl ErrorType for BusPin {
    type Error = Infallible;
}

impl OutputPin for BusPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.bus.address.fetch_and(!self.bit, Ordering::SeqCst);
        self.bus.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.bus.address.fetch_or(self.bit, Ordering::SeqCst);
        self.bus.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub(crate) struct BusInput {
    bus: FakeBus,
}

impl ErrorType for BusInput {
    type Error = Infallible;
}

impl InputPin for BusInput {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        self.is_low().map(|low| !low)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        let address = self.bus.address.load(Ordering::SeqCst);
        Ok(self.bus.pressed.load(Ordering::SeqCst) & (1 << address) != 0)
    }
}

/// An output line that records its level per selected address.
#[derive(Clone, Default)]
pub(crate) struct LevelRecorder {
    bus: FakeBus,
    high: Arc<AtomicU8>,
}

impl LevelRecorder {
    pub(crate) fn new(bus: &FakeBus) -> Self {
        Self {
            bus: bus.clone(),
            high: Arc::default(),
        }
    }

    /// Bit `n` is set if the line was last driven high while channel `n` was addressed.
    pub(crate) fn levels(&self) -> u8 {
        self.high.load(Ordering::SeqCst)
    }
}

impl ErrorType for LevelRecorder {
    type Error = Infallible;
}

impl OutputPin for LevelRecorder {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        let mask = 1 << self.bus.address();
        self.high.fetch_and(!mask, Ordering::SeqCst);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        let mask = 1 << self.bus.address();
        self.high.fetch_or(mask, Ordering::SeqCst);
        Ok(())
    }
}
