//! Locks used by the message layer.
//!
//! [`Mutex`] guards state that belongs to one core but is reachable from
//! shared handles, such as the core's inbox. It blocks on a parking_lot
//! mutex with the `std` feature and spins on a `spin::Mutex` without it.
//! [`SpinLock`] serialises the senders of a queue that more than one core
//! writes to.

pub use std::sync::Arc;

#[cfg(feature = "std")]
pub type MutexGuard<'a, T> = parking_lot::MutexGuard<'a, T>;
#[cfg(not(feature = "std"))]
pub type MutexGuard<'a, T> = spin::MutexGuard<'a, T>;

/// Mutex that does not poison: a core thread that panics while holding it
/// leaves the data as it was.
pub struct Mutex<T> {
    #[cfg(feature = "std")]
    inner: parking_lot::Mutex<T>,
    #[cfg(not(feature = "std"))]
    inner: spin::Mutex<T>,
}

impl<T> Mutex<T> {
    pub fn new(value: T) -> Self {
        Self {
            #[cfg(feature = "std")]
            inner: parking_lot::Mutex::new(value),
            #[cfg(not(feature = "std"))]
            inner: spin::Mutex::new(value),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock()
    }
}

/// Busy-waiting lock without data, taken around a queue write.
#[derive(Default)]
pub struct SpinLock {
    inner: spin::Mutex<()>,
}

impl SpinLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> spin::MutexGuard<'_, ()> {
        self.inner.lock()
    }
}
