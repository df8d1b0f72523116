//! Per-port bus locks
//!
//! A logical transaction can span several [`transfer`](crate::i2c::I2c::transfer)
//! calls (for example a write without STOP followed by a read with STOP), so the
//! lock is taken by the caller around the whole sequence, not by the driver.
//! The driver only takes locks itself for SMBus block reads and around a core
//! clock change.

use core::cell::Cell;

use critical_section::Mutex;

/// Advisory lock, one per port. Not reentrant.
pub trait PortLock {
    fn lock(&self, port: u8);
    fn unlock(&self, port: u8);
}

impl<T: PortLock + ?Sized> PortLock for &T {
    fn lock(&self, port: u8) {
        T::lock(self, port)
    }

    fn unlock(&self, port: u8) {
        T::unlock(self, port)
    }
}

/// Spin locks for ports `0..N`, guarded by a critical section.
///
/// Ports outside `0..N` are not tracked: locking them always succeeds.
pub struct PortLocks<const N: usize> {
    held: Mutex<Cell<[bool; N]>>,
}

impl<const N: usize> PortLocks<N> {
    pub const fn new() -> Self {
        Self {
            held: Mutex::new(Cell::new([false; N])),
        }
    }

    /// Take the lock for `port` if nobody holds it.
    pub fn try_lock(&self, port: u8) -> bool {
        critical_section::with(|cs| {
            let cell = self.held.borrow(cs);
            let mut held = cell.get();
            let Some(slot) = held.get_mut(usize::from(port)) else {
                return true;
            };
            if *slot {
                return false;
            }
            *slot = true;
            cell.set(held);
            true
        })
    }

    pub fn is_locked(&self, port: u8) -> bool {
        critical_section::with(|cs| {
            self.held
                .borrow(cs)
                .get()
                .get(usize::from(port))
                .copied()
                .unwrap_or(false)
        })
    }
}

impl<const N: usize> Default for PortLocks<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> PortLock for PortLocks<N> {
    fn lock(&self, port: u8) {
        while !self.try_lock(port) {
            core::hint::spin_loop();
        }
    }

    fn unlock(&self, port: u8) {
        critical_section::with(|cs| {
            let cell = self.held.borrow(cs);
            let mut held = cell.get();
            if let Some(slot) = held.get_mut(usize::from(port)) {
                *slot = false;
                cell.set(held);
            }
        })
    }
}
