//! Debounce and hold classification for the eight channels of one input line.
//!
//! The tracker is fed one sample per scan tick, for whichever channel the
//! selector is currently addressing, and reports at most one event per
//! sample:
//!
//! - `Held` while a channel has stayed active for `min_hold_duration`.
//! - `Pressed` when an active channel is released after at least
//!   `min_trigger_duration`. After a `Held`, the duration counts from the
//!   moment the hold was reported.
//!
//! Channels are sampled round-robin, so a channel's quiet time would keep
//! growing while the other seven are visited. Every sample therefore also
//! restarts the timer of each other channel that is currently released.

use std::time::{Duration, Instant};

use crate::index::{CHANNEL_COUNT, SelectorIndex};

/// Shortest activity that counts as a press.
pub const DEFAULT_MIN_TRIGGER_DURATION: Duration = Duration::from_millis(2);

/// Activity after which a channel is reported as held.
pub const DEFAULT_MIN_HOLD_DURATION: Duration = Duration::from_millis(750);

/// Input level that means "pressed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActiveLevel {
    /// Pull-up wiring: a pressed button pulls the line low.
    #[default]
    Low,
    High,
}

impl ActiveLevel {
    pub const fn is_active(self, line_high: bool) -> bool {
        match self {
            ActiveLevel::Low => !line_high,
            ActiveLevel::High => line_high,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonConfig {
    pub min_trigger_duration: Duration,
    pub min_hold_duration: Duration,
    pub active_level: ActiveLevel,
}

impl ButtonConfig {
    pub const fn new() -> Self {
        Self {
            min_trigger_duration: DEFAULT_MIN_TRIGGER_DURATION,
            min_hold_duration: DEFAULT_MIN_HOLD_DURATION,
            active_level: ActiveLevel::Low,
        }
    }

    pub const fn with_min_trigger_duration(mut self, duration: Duration) -> Self {
        self.min_trigger_duration = duration;
        self
    }

    pub const fn with_min_hold_duration(mut self, duration: Duration) -> Self {
        self.min_hold_duration = duration;
        self
    }

    pub const fn with_active_level(mut self, level: ActiveLevel) -> Self {
        self.active_level = level;
        self
    }
}

impl Default for ButtonConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    /// Released after being active for at least the trigger duration.
    Pressed { index: u8, duration: Duration },
    /// Still active after the hold duration.
    Held { index: u8, duration: Duration },
}

impl ButtonEvent {
    pub fn index(&self) -> u8 {
        match *self {
            ButtonEvent::Pressed { index, .. } | ButtonEvent::Held { index, .. } => index,
        }
    }

    pub fn duration(&self) -> Duration {
        match *self {
            ButtonEvent::Pressed { duration, .. } | ButtonEvent::Held { duration, .. } => duration,
        }
    }
}

/// Bookkeeping for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelState {
    /// Start of the interval the next event's duration is measured from.
    pub last_transition: Instant,
    /// Active level seen at the previous visit.
    pub last_level: bool,
    /// Active and not yet reported as held.
    pub held_candidate: bool,
}

impl ChannelState {
    fn idle(now: Instant) -> Self {
        Self {
            last_transition: now,
            last_level: false,
            held_candidate: false,
        }
    }
}

pub struct ButtonTracker {
    config: ButtonConfig,
    channels: [ChannelState; CHANNEL_COUNT],
}

impl ButtonTracker {
    pub fn new(config: ButtonConfig, now: Instant) -> Self {
        Self {
            config,
            channels: [ChannelState::idle(now); CHANNEL_COUNT],
        }
    }

    pub fn config(&self) -> &ButtonConfig {
        &self.config
    }

    pub fn channel(&self, index: SelectorIndex) -> &ChannelState {
        &self.channels[index.as_usize()]
    }

    /// Forget all channel history, as if every channel had been released at `now`.
    pub fn reset(&mut self, now: Instant) {
        self.channels = [ChannelState::idle(now); CHANNEL_COUNT];
    }

    /// Feed the sample taken while `index` was selected.
    ///
    /// `active` must already be resolved against the configured
    /// [`ActiveLevel`].
    pub fn update(
        &mut self,
        index: SelectorIndex,
        active: bool,
        now: Instant,
    ) -> Option<ButtonEvent> {
        let current = index.as_usize();

        for (other, state) in self.channels.iter_mut().enumerate() {
            if other != current && !state.last_level {
                state.last_transition = now;
            }
        }

        let min_trigger = self.config.min_trigger_duration;
        let min_hold = self.config.min_hold_duration;
        let state = &mut self.channels[current];
        let mut event = None;

        if !active && state.last_level {
            let elapsed = now.saturating_duration_since(state.last_transition);
            if elapsed >= min_trigger {
                state.last_transition = now;
                event = Some(ButtonEvent::Pressed {
                    index: index.value(),
                    duration: elapsed,
                });
            }
        }

        if state.last_level != active {
            state.last_transition = now;
            state.last_level = active;
            state.held_candidate = active;
        }

        if state.held_candidate {
            let elapsed = now.saturating_duration_since(state.last_transition);
            if elapsed >= min_hold {
                state.held_candidate = false;
                state.last_transition = now;
                event = Some(ButtonEvent::Held {
                    index: index.value(),
                    duration: elapsed,
                });
            }
        }

        event
    }
}
