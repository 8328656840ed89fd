//! Eight push buttons read through one multiplexed input line.

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use embedded_hal::digital::{Error as HalError, InputPin, OutputPin};
use log::{debug, warn};

use crate::ChannelObserver;
use crate::debounce::{ActiveLevel, ButtonConfig, ButtonEvent, ButtonTracker, ChannelState};
use crate::index::SelectorIndex;
use crate::mutex::PortMutex;
use crate::registry::{ObserverHandle, ObserverRegistry};
use crate::selector::{Scanner, Selector};

type Handler = Arc<dyn Fn(u8, Duration) + Send + Sync>;

#[derive(Default)]
struct Handlers {
    pressed: Option<Handler>,
    held: Option<Handler>,
    queue: Option<SyncSender<ButtonEvent>>,
}

struct Channels<I> {
    input: I,
    tracker: ButtonTracker,
    read_failing: bool,
}

struct ButtonShared<I> {
    channels: Mutex<Channels<I>>,
    handlers: Mutex<Handlers>,
    active_level: ActiveLevel,
}

impl<I> ButtonShared<I>
where
    I: InputPin,
{
    /// A failed read leaves the tracker untouched, so the channel keeps the
    /// state of its last good sample.
    fn sample(&self, index: SelectorIndex) -> Option<ButtonEvent> {
        let active_level = self.active_level;
        self.channels.with_lock(|channels| {
            let active = match channels.input.is_high() {
                Ok(high) => {
                    if channels.read_failing {
                        debug!("button input recovered on channel {}", index.value());
                        channels.read_failing = false;
                    }
                    active_level.is_active(high)
                }
                Err(err) => {
                    if !channels.read_failing {
                        warn!(
                            "button input read failed on channel {}: {:?}",
                            index.value(),
                            err.kind()
                        );
                        channels.read_failing = true;
                    }
                    return None;
                }
            };
            channels.tracker.update(index, active, Instant::now())
        })
    }

    fn dispatch(&self, event: ButtonEvent) {
        let (handler, queue) = self.handlers.with_lock(|handlers| {
            let handler = match event {
                ButtonEvent::Pressed { .. } => handlers.pressed.clone(),
                ButtonEvent::Held { .. } => handlers.held.clone(),
            };
            (handler, handlers.queue.clone())
        });

        if let Some(handler) = handler {
            handler(event.index(), event.duration());
        }

        if let Some(queue) = queue {
            match queue.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    warn!("button event queue full, dropping {:?}", event);
                }
                Err(TrySendError::Disconnected(_)) => {
                    debug!("button event receiver dropped");
                    self.handlers.with_lock(|handlers| handlers.queue = None);
                }
            }
        }
    }
}

impl<I> ChannelObserver for ButtonShared<I>
where
    I: InputPin + Send,
{
    fn on_channel(&self, index: SelectorIndex) {
        if let Some(event) = self.sample(index) {
            self.dispatch(event);
        }
    }
}

/// Debounced press/hold detection for the eight buttons behind one input
/// line.
///
/// Handlers run on the scan thread and delay the scan while they execute.
/// With a shared selector, a tick already in flight when the demux is
/// stopped or dropped may still run a handler once afterwards.
pub struct ButtonDemux<I>
where
    I: InputPin + Send + 'static,
{
    shared: Arc<ButtonShared<I>>,
    registry: ObserverRegistry,
    scanner: Option<Box<dyn Scanner>>,
    registration: Option<ObserverHandle>,
    config: ButtonConfig,
}

impl<I> ButtonDemux<I>
where
    I: InputPin + Send + 'static,
{
    /// Attach to a selector that other demuxes may share.
    ///
    /// The selector is started and stopped by its owner. Repeated
    /// [`start`](Self::start) or [`stop`](Self::stop) calls are harmless.
    pub fn new<A, B, C>(input: I, selector: &Selector<A, B, C>, config: ButtonConfig) -> Self
    where
        A: OutputPin + Send + 'static,
        B: OutputPin + Send + 'static,
        C: OutputPin + Send + 'static,
    {
        Self::build(input, selector.registry().clone(), None, config)
    }

    /// Take ownership of a selector and scan it only for these buttons.
    ///
    /// [`start`](Self::start) and [`stop`](Self::stop) also start and stop the
    /// scan, and return `false` when repeated.
    pub fn with_private_selector<A, B, C>(
        input: I,
        selector: Selector<A, B, C>,
        config: ButtonConfig,
    ) -> Self
    where
        A: OutputPin + Send + 'static,
        B: OutputPin + Send + 'static,
        C: OutputPin + Send + 'static,
    {
        let registry = selector.registry().clone();
        Self::build(input, registry, Some(Box::new(selector)), config)
    }

    fn build(
        input: I,
        registry: ObserverRegistry,
        scanner: Option<Box<dyn Scanner>>,
        config: ButtonConfig,
    ) -> Self {
        let shared = ButtonShared {
            channels: Mutex::new(Channels {
                input,
                tracker: ButtonTracker::new(config, Instant::now()),
                read_failing: false,
            }),
            handlers: Mutex::new(Handlers::default()),
            active_level: config.active_level,
        };

        Self {
            shared: Arc::new(shared),
            registry,
            scanner,
            registration: None,
            config,
        }
    }

    pub fn config(&self) -> &ButtonConfig {
        &self.config
    }

    pub fn is_started(&self) -> bool {
        self.registration.is_some()
    }

    /// Copy of the bookkeeping for one channel.
    pub fn channel_state(&self, index: SelectorIndex) -> ChannelState {
        self.shared
            .channels
            .with_lock(|channels| *channels.tracker.channel(index))
    }

    /// Call `handler(index, duration)` for every `Pressed` event.
    pub fn on_pressed<F>(&self, handler: F)
    where
        F: Fn(u8, Duration) + Send + Sync + 'static,
    {
        self.shared
            .handlers
            .with_lock(|handlers| handlers.pressed = Some(Arc::new(handler)));
    }

    /// Call `handler(index, duration)` for every `Held` event.
    pub fn on_held<F>(&self, handler: F)
    where
        F: Fn(u8, Duration) + Send + Sync + 'static,
    {
        self.shared
            .handlers
            .with_lock(|handlers| handlers.held = Some(Arc::new(handler)));
    }

    pub fn clear_handlers(&self) {
        self.shared.handlers.with_lock(|handlers| {
            handlers.pressed = None;
            handlers.held = None;
        });
    }

    /// Deliver events through a bounded queue instead of running work on
    /// the scan thread.
    ///
    /// Events that arrive while the queue holds `capacity` unread entries
    /// are dropped. Replaces any previous queue.
    pub fn event_queue(&self, capacity: usize) -> Receiver<ButtonEvent> {
        let (tx, rx) = mpsc::sync_channel(capacity);
        self.shared
            .handlers
            .with_lock(|handlers| handlers.queue = Some(tx));
        rx
    }

    /// Begin receiving scan ticks.
    ///
    /// Channel history is cleared, so a button still held from before a
    /// [`stop`](Self::stop) counts as a new press.
    pub fn start(&mut self) -> bool {
        if self.registration.is_some() {
            return self.scanner.is_none();
        }

        self.shared
            .channels
            .with_lock(|channels| channels.tracker.reset(Instant::now()));
        let observer: Arc<dyn ChannelObserver> = self.shared.clone();
        let handle = self.registry.register(observer);

        if let Some(scanner) = self.scanner.as_mut() {
            if !scanner.start() {
                self.registry.unregister(handle);
                return false;
            }
        }

        self.registration = Some(handle);
        true
    }

    /// Stop receiving scan ticks.
    ///
    /// With a private selector this joins the scan thread, and no handler
    /// runs after it returns. With a shared selector it only unregisters:
    /// a tick already in flight keeps its own reference to this demux and
    /// may still run a handler or queue an event once after `stop` returns.
    pub fn stop(&mut self) -> bool {
        let Some(handle) = self.registration.take() else {
            return self.scanner.is_none();
        };

        if let Some(scanner) = self.scanner.as_mut() {
            scanner.stop();
        }
        self.registry.unregister(handle);
        true
    }
}

/// Stops the demux as [`ButtonDemux::stop`] does. With a shared selector a
/// handler may run once more after the drop returns.
impl<I> Drop for ButtonDemux<I>
where
    I: InputPin + Send + 'static,
{
    fn drop(&mut self) {
        self.stop();
    }
}
