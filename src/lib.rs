//! Scan eight channels behind a 3-line multiplexer.
//!
//! A [`Selector`] owns the three select lines and walks the channel index
//! `0..=7` on a background thread. For every index it notifies each
//! registered [`ChannelObserver`] once, sleeps for the scan interval, then
//! moves on.
//!
//! Two observers are provided:
//!
//! - [`ButtonDemux`] reads one input line and turns the per-channel levels
//!   into debounced `Pressed` and `Held` events.
//! - [`OutputDemux`] drives one output line from an 8-bit flag mask.
//!
//! Observers run synchronously on the scan thread. Handlers registered on a
//! [`ButtonDemux`] therefore delay the scan while they execute; keep them
//! short or use [`ButtonDemux::event_queue`].

pub mod button;
pub mod debounce;
pub mod driver;
pub mod index;
pub mod mutex;
pub mod output;
pub mod registry;
pub mod selector;

#[cfg(test)]
pub(crate) mod testing;

pub use button::ButtonDemux;
pub use debounce::{ActiveLevel, ButtonConfig, ButtonEvent};
pub use driver::{MuxError, SelectLines};
pub use index::{CHANNEL_COUNT, SelectorIndex};
pub use output::OutputDemux;
pub use registry::{ObserverHandle, ObserverRegistry};
pub use selector::{Selector, SelectorConfig};

/// Something that reacts to the multiplexer selecting a channel.
///
/// Called on the scan thread right after the select lines have been
/// written for `index`.
pub trait ChannelObserver: Send + Sync {
    fn on_channel(&self, index: SelectorIndex);
}

impl<F> ChannelObserver for F
where
    F: Fn(SelectorIndex) + Send + Sync,
{
    fn on_channel(&self, index: SelectorIndex) {
        self(index)
    }
}
