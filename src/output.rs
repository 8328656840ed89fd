//! Eight output flags replicated onto one multiplexed output line.

use core::convert::Infallible;
use std::sync::{Arc, Mutex};

use embedded_hal::digital::{Error as HalError, ErrorType, OutputPin, StatefulOutputPin};
use log::{debug, warn};

use crate::ChannelObserver;
use crate::index::SelectorIndex;
use crate::mutex::PortMutex;
use crate::registry::{ObserverHandle, ObserverRegistry};
use crate::selector::Selector;

struct OutputLine<O> {
    pin: O,
    failing: bool,
}

struct OutputShared<O, M> {
    line: Mutex<OutputLine<O>>,
    flags: M,
}

impl<O, M> ChannelObserver for OutputShared<O, M>
where
    O: OutputPin + Send,
    M: PortMutex<Port = u8> + Send + Sync,
{
    fn on_channel(&self, index: SelectorIndex) {
        let high = self.flags.with_lock(|flags| *flags & index.mask() != 0);
        self.line.with_lock(|line| {
            let written = if high {
                line.pin.set_high()
            } else {
                line.pin.set_low()
            };
            match written {
                Ok(()) if line.failing => {
                    debug!("output line recovered");
                    line.failing = false;
                }
                Ok(()) => {}
                Err(err) if !line.failing => {
                    warn!(
                        "output write failed on channel {}: {:?}",
                        index.value(),
                        err.kind()
                    );
                    line.failing = true;
                }
                Err(_) => {}
            }
        });
    }
}

/// Drives one output line from an 8-bit flag mask, bit `n` while channel
/// `n` is selected.
///
/// The mask may be changed from any thread; the scan thread reads it once
/// per tick. `M` is the lock around the mask.
pub struct OutputDemux<O, M = Mutex<u8>>
where
    O: OutputPin + Send + 'static,
    M: PortMutex<Port = u8> + Send + Sync + 'static,
{
    shared: Arc<OutputShared<O, M>>,
    registry: ObserverRegistry,
    registration: Option<ObserverHandle>,
}

impl<O> OutputDemux<O>
where
    O: OutputPin + Send + 'static,
{
    /// Attach to `selector` with all flags cleared.
    pub fn new<A, B, C>(output: O, selector: &Selector<A, B, C>) -> Self
    where
        A: OutputPin + Send + 'static,
        B: OutputPin + Send + 'static,
        C: OutputPin + Send + 'static,
    {
        Self::with_flags(output, selector, 0)
    }
}

impl<O, M> OutputDemux<O, M>
where
    O: OutputPin + Send + 'static,
    M: PortMutex<Port = u8> + Send + Sync + 'static,
{
    pub fn with_flags<A, B, C>(output: O, selector: &Selector<A, B, C>, flags: u8) -> Self
    where
        A: OutputPin + Send + 'static,
        B: OutputPin + Send + 'static,
        C: OutputPin + Send + 'static,
    {
        Self {
            shared: Arc::new(OutputShared {
                line: Mutex::new(OutputLine {
                    pin: output,
                    failing: false,
                }),
                flags: M::create(flags),
            }),
            registry: selector.registry().clone(),
            registration: None,
        }
    }

    pub fn set_flags(&self, flags: u8) {
        self.shared.flags.with_lock(|current| *current = flags);
    }

    pub fn flags(&self) -> u8 {
        self.shared.flags.with_lock(|flags| *flags)
    }

    /// Set or clear one flag. Indices above 7 are ignored.
    pub fn set_flag(&self, value: bool, index: u8) {
        if let Some(index) = SelectorIndex::new(index) {
            write_flag(&self.shared.flags, index, value);
        }
    }

    /// Returns `false` for indices above 7.
    pub fn flag(&self, index: u8) -> bool {
        SelectorIndex::new(index).is_some_and(|index| read_flag(&self.shared.flags, index))
    }

    pub fn is_started(&self) -> bool {
        self.registration.is_some()
    }

    /// Begin replicating flags on every scan tick. Repeated calls are harmless.
    pub fn start(&mut self) -> bool {
        if self.registration.is_none() {
            let observer: Arc<dyn ChannelObserver> = self.shared.clone();
            self.registration = Some(self.registry.register(observer));
        }
        true
    }

    /// Stop replicating flags. Repeated calls are harmless.
    ///
    /// A tick already in flight on the selector may still drive the line
    /// once after this returns.
    pub fn stop(&mut self) -> bool {
        if let Some(handle) = self.registration.take() {
            self.registry.unregister(handle);
        }
        true
    }

    /// Split into eight output pins (Y0..Y7), one per flag.
    pub fn split(&self) -> Parts<'_, M> {
        let flags = &self.shared.flags;
        Parts {
            y0: FlagPin::new(flags, 0),
            y1: FlagPin::new(flags, 1),
            y2: FlagPin::new(flags, 2),
            y3: FlagPin::new(flags, 3),
            y4: FlagPin::new(flags, 4),
            y5: FlagPin::new(flags, 5),
            y6: FlagPin::new(flags, 6),
            y7: FlagPin::new(flags, 7),
        }
    }
}

impl<O, M> Drop for OutputDemux<O, M>
where
    O: OutputPin + Send + 'static,
    M: PortMutex<Port = u8> + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.stop();
    }
}

fn write_flag<M: PortMutex<Port = u8>>(flags: &M, index: SelectorIndex, value: bool) {
    flags.with_lock(|flags| {
        if value {
            *flags |= index.mask();
        } else {
            *flags &= !index.mask();
        }
    });
}

fn read_flag<M: PortMutex<Port = u8>>(flags: &M, index: SelectorIndex) -> bool {
    flags.with_lock(|flags| *flags & index.mask() != 0)
}

/// Holds the 8 flag pins after splitting.
pub struct Parts<'a, M>
where
    M: PortMutex<Port = u8> + 'a,
{
    pub y0: FlagPin<'a, M>,
    pub y1: FlagPin<'a, M>,
    pub y2: FlagPin<'a, M>,
    pub y3: FlagPin<'a, M>,
    pub y4: FlagPin<'a, M>,
    pub y5: FlagPin<'a, M>,
    pub y6: FlagPin<'a, M>,
    pub y7: FlagPin<'a, M>,
}

/// A proxy implementing `embedded_hal::digital::OutputPin` for one flag.
pub struct FlagPin<'a, M>
where
    M: PortMutex<Port = u8> + 'a,
{
    flags: &'a M,
    index: SelectorIndex,
}

impl<'a, M> FlagPin<'a, M>
where
    M: PortMutex<Port = u8>,
{
    pub(crate) fn new(flags: &'a M, index: u8) -> Self {
        Self {
            flags,
            index: SelectorIndex::new(index & 0b111).unwrap_or_default(),
        }
    }

    pub fn index(&self) -> SelectorIndex {
        self.index
    }
}

impl<M> ErrorType for FlagPin<'_, M>
where
    M: PortMutex<Port = u8>,
{
    type Error = Infallible;
}

impl<M> OutputPin for FlagPin<'_, M>
where
    M: PortMutex<Port = u8>,
{
    fn set_low(&mut self) -> Result<(), Self::Error> {
        write_flag(self.flags, self.index, false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        write_flag(self.flags, self.index, true);
        Ok(())
    }
}

impl<M> StatefulOutputPin for FlagPin<'_, M>
where
    M: PortMutex<Port = u8>,
{
    fn is_set_high(&mut self) -> Result<bool, Self::Error> {
        Ok(read_flag(self.flags, self.index))
    }

    fn is_set_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!read_flag(self.flags, self.index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::SelectorConfig;
    use crate::testing::{BusPin, FakeBus, LevelRecorder};
    use embedded_hal_mock::eh1::digital::{Mock, State, Transaction};
    use std::thread;
    use std::time::{Duration, Instant};

    fn fast_selector(bus: &FakeBus) -> Selector<BusPin, BusPin, BusPin> {
        let (a, b, c) = bus.select_pins();
        let config = SelectorConfig::new().with_scan_interval(Duration::from_micros(50));
        Selector::with_config(a, b, c, config).unwrap()
    }

    fn wait_for(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_flags_byte_and_bits_agree() {
        let bus = FakeBus::new();
        let selector = fast_selector(&bus);
        let outputs = OutputDemux::new(LevelRecorder::new(&bus), &selector);

        outputs.set_flags(0b1010_0110);
        assert_eq!(outputs.flags(), 0b1010_0110);
        for bit in 0..8u8 {
            assert_eq!(outputs.flag(bit), 0b1010_0110 & (1 << bit) != 0);
        }

        outputs.set_flag(true, 0);
        outputs.set_flag(false, 7);
        assert_eq!(outputs.flags(), 0b0010_0111);

        // out of range: ignored on write, false on read
        outputs.set_flag(true, 9);
        assert_eq!(outputs.flags(), 0b0010_0111);
        assert!(!outputs.flag(9));
    }

    #[test]
    fn test_tick_drives_line_from_flag() {
        let bus = FakeBus::new();
        let selector = fast_selector(&bus);
        let pin = Mock::new(&[
            Transaction::set(State::High),
            Transaction::set(State::Low),
            Transaction::set(State::High),
        ]);
        let outputs: OutputDemux<_> = OutputDemux::with_flags(pin.clone(), &selector, 0b0000_0101);

        for value in 0..3 {
            outputs.shared.on_channel(SelectorIndex::new(value).unwrap());
        }

        let mut pin = pin;
        pin.done();
    }

    #[test]
    fn test_scan_replicates_flags() {
        let bus = FakeBus::new();
        let mut selector = fast_selector(&bus);
        let line = LevelRecorder::new(&bus);
        let mut outputs: OutputDemux<_> =
            OutputDemux::with_flags(line.clone(), &selector, 0b1001_0010);

        assert!(outputs.start());
        assert!(outputs.start());
        assert!(selector.start());
        assert!(wait_for(|| line.levels() == 0b1001_0010));

        outputs.set_flag(false, 4);
        outputs.set_flag(true, 0);
        assert!(wait_for(|| line.levels() == 0b1000_0011));

        assert!(outputs.stop());
        assert!(outputs.stop());
        assert!(selector.stop());
    }

    #[test]
    fn test_split_pins_set_flags() {
        let bus = FakeBus::new();
        let selector = fast_selector(&bus);
        let outputs = OutputDemux::new(LevelRecorder::new(&bus), &selector);

        let mut parts = outputs.split();
        parts.y3.set_high().unwrap();
        parts.y6.set_high().unwrap();
        parts.y3.toggle().unwrap();
        assert!(parts.y6.is_set_high().unwrap());
        assert!(parts.y3.is_set_low().unwrap());
        assert_eq!(parts.y6.index().value(), 6);
        assert_eq!(outputs.flags(), 0b0100_0000);
    }

    #[cfg(feature = "critical-section")]
    #[test]
    fn test_critical_section_flags() {
        use core::cell::RefCell;

        let bus = FakeBus::new();
        let selector = fast_selector(&bus);
        let outputs: OutputDemux<_, critical_section::Mutex<RefCell<u8>>> =
            OutputDemux::with_flags(LevelRecorder::new(&bus), &selector, 0b1);
        outputs.set_flag(true, 2);
        assert_eq!(outputs.flags(), 0b101);
    }
}
