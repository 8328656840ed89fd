//! The scan loop: walks the select lines through all eight channels and
//! notifies observers for each one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use embedded_hal::digital::OutputPin;
use log::{debug, error, warn};

use crate::ChannelObserver;
use crate::driver::{MuxError, SelectLines};
use crate::index::SelectorIndex;
use crate::mutex::PortMutex;
use crate::registry::ObserverRegistry;

/// Time the select lines stay on one channel.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_micros(125);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectorConfig {
    /// Sleep after notifying observers, before advancing to the next channel.
    pub scan_interval: Duration,
}

impl SelectorConfig {
    pub const fn new() -> Self {
        Self {
            scan_interval: DEFAULT_SCAN_INTERVAL,
        }
    }

    pub const fn with_scan_interval(mut self, scan_interval: Duration) -> Self {
        self.scan_interval = scan_interval;
        self
    }
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Start/stop control over a scan loop, erased over the pin types.
pub(crate) trait Scanner: Send {
    fn start(&mut self) -> bool;
    fn stop(&mut self) -> bool;
}

struct Worker {
    terminate: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Owns the select lines and the background scan thread.
///
/// Dropping a running selector stops it.
pub struct Selector<A, B, C>
where
    A: OutputPin + Send + 'static,
    B: OutputPin + Send + 'static,
    C: OutputPin + Send + 'static,
{
    lines: Arc<Mutex<SelectLines<A, B, C>>>,
    registry: ObserverRegistry,
    config: SelectorConfig,
    worker: Option<Worker>,
}

impl<A, B, C> Selector<A, B, C>
where
    A: OutputPin + Send + 'static,
    B: OutputPin + Send + 'static,
    C: OutputPin + Send + 'static,
{
    pub fn new(a: A, b: B, c: C) -> Result<Self, MuxError> {
        Self::with_config(a, b, c, SelectorConfig::default())
    }

    pub fn with_config(a: A, b: B, c: C, config: SelectorConfig) -> Result<Self, MuxError> {
        Ok(Self::from_lines(SelectLines::new(a, b, c)?, config))
    }

    pub fn from_lines(lines: SelectLines<A, B, C>, config: SelectorConfig) -> Self {
        Self {
            lines: Arc::new(Mutex::new(lines)),
            registry: ObserverRegistry::new(),
            config,
            worker: None,
        }
    }

    /// Registry that demuxes attach to. Clones share the same list.
    pub fn registry(&self) -> &ObserverRegistry {
        &self.registry
    }

    pub fn config(&self) -> SelectorConfig {
        self.config
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Begin scanning on a background thread.
    ///
    /// Returns `false` if the scan is already running or the thread could
    /// not be spawned.
    pub fn start(&mut self) -> bool {
        if self.worker.is_some() {
            return false;
        }

        let terminate = Arc::new(AtomicBool::new(false));
        let lines = Arc::clone(&self.lines);
        let registry = self.registry.clone();
        let interval = self.config.scan_interval;
        let flag = Arc::clone(&terminate);

        let spawned = thread::Builder::new()
            .name("demux-scan".into())
            .spawn(move || scan_loop(&lines, &registry, &flag, interval));

        match spawned {
            Ok(handle) => {
                debug!("scan started, interval {:?}", interval);
                self.worker = Some(Worker { terminate, handle });
                true
            }
            Err(err) => {
                error!("failed to spawn scan thread: {}", err);
                false
            }
        }
    }

    /// Stop scanning and wait for the in-flight tick to finish.
    ///
    /// Blocks for up to one scan interval plus the run time of any observer
    /// currently executing. Returns `false` if the scan was not running.
    pub fn stop(&mut self) -> bool {
        let Some(worker) = self.worker.take() else {
            return false;
        };

        worker.terminate.store(true, Ordering::Release);
        if worker.handle.join().is_err() {
            error!("scan thread panicked");
        }
        debug!("scan stopped");
        true
    }

    /// Stop the scan and hand back the select pins.
    pub fn release(mut self) -> Option<(A, B, C)> {
        self.stop();
        let lines = Arc::clone(&self.lines);
        drop(self);
        Arc::try_unwrap(lines).ok().map(|lines| {
            lines
                .into_inner()
                .unwrap_or_else(PoisonError::into_inner)
                .release()
        })
    }
}

impl<A, B, C> Scanner for Selector<A, B, C>
where
    A: OutputPin + Send + 'static,
    B: OutputPin + Send + 'static,
    C: OutputPin + Send + 'static,
{
    fn start(&mut self) -> bool {
        Selector::start(self)
    }

    fn stop(&mut self) -> bool {
        Selector::stop(self)
    }
}

impl<A, B, C> Drop for Selector<A, B, C>
where
    A: OutputPin + Send + 'static,
    B: OutputPin + Send + 'static,
    C: OutputPin + Send + 'static,
{
    fn drop(&mut self) {
        self.stop();
    }
}

fn scan_loop<A, B, C>(
    lines: &Mutex<SelectLines<A, B, C>>,
    registry: &ObserverRegistry,
    terminate: &AtomicBool,
    interval: Duration,
) where
    A: OutputPin,
    B: OutputPin,
    C: OutputPin,
{
    let mut index = SelectorIndex::FIRST;
    let mut observers: Vec<Arc<dyn ChannelObserver>> = Vec::new();
    let mut failing = false;

    while !terminate.load(Ordering::Acquire) {
        match lines.with_lock(|lines| lines.select(index)) {
            Ok(()) if failing => {
                debug!("select lines recovered");
                failing = false;
            }
            Ok(()) => {}
            Err(err) if !failing => {
                warn!("failed to select channel {}: {}", index.value(), err);
                failing = true;
            }
            Err(_) => {}
        }

        registry.snapshot(&mut observers);
        for observer in &observers {
            observer.on_channel(index);
        }
        observers.clear();

        thread::sleep(interval);

        index = index.next();
        if index == SelectorIndex::FIRST {
            let removed = registry.compact();
            if removed > 0 {
                debug!("dropped {} unregistered observers", removed);
            }
        }
    }
}
