//! A generic "mutex" trait for state shared with the scan thread.

use std::sync::{Mutex, PoisonError};

/// Common interface for mutex-like wrappers.
///
/// Locks are scoped to the closure so no guard can outlive a scan tick.
pub trait PortMutex {
    type Port;

    fn create(port: Self::Port) -> Self;

    fn with_lock<R, F: FnOnce(&mut Self::Port) -> R>(&self, f: F) -> R;
}

/// Standard library mutex.
///
/// A panic inside a user handler poisons the lock; the protected state is
/// still consistent at that point, so the poison is ignored.
impl<T> PortMutex for Mutex<T> {
    type Port = T;

    fn create(port: Self::Port) -> Self {
        Mutex::new(port)
    }

    fn with_lock<R, F: FnOnce(&mut Self::Port) -> R>(&self, f: F) -> R {
        let mut guard = self.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

/// Global critical section around a `RefCell`.
///
/// Suitable for the flag byte of an output demux, which is read once per
/// tick and written rarely.
#[cfg(feature = "critical-section")]
impl<T> PortMutex for critical_section::Mutex<core::cell::RefCell<T>> {
    type Port = T;

    fn create(port: Self::Port) -> Self {
        critical_section::Mutex::new(core::cell::RefCell::new(port))
    }

    fn with_lock<R, F: FnOnce(&mut Self::Port) -> R>(&self, f: F) -> R {
        critical_section::with(|cs| f(&mut self.borrow_ref_mut(cs)))
    }
}
