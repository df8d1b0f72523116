//! Delays and the time source used while polling the peripheral

use embedded_hal::delay::DelayNs;

/// Time source for the driver.
///
/// [`DelayNs`] provides the busy delays used for bit-banging and bus settling;
/// those must not give up the CPU. [`Clock::sleep_micros`] is only used between
/// status polls, where letting other work run is fine.
pub trait Clock: DelayNs {
    /// Monotonic time in microseconds since an arbitrary epoch.
    fn now_micros(&self) -> u64;

    /// Yield for roughly `us` microseconds.
    fn sleep_micros(&mut self, us: u32);
}

/// A [`Clock`] backed by `embassy-time`.
///
/// Blocking code has nothing to yield to, so sleeping is a busy wait on the
/// embassy time driver.
#[cfg(feature = "embassy")]
pub struct EmbassyClock;

#[cfg(feature = "embassy")]
impl DelayNs for EmbassyClock {
    fn delay_ns(&mut self, ns: u32) {
        embassy_time::block_for(embassy_time::Duration::from_nanos(ns as u64))
    }

    fn delay_us(&mut self, us: u32) {
        embassy_time::block_for(embassy_time::Duration::from_micros(us as u64))
    }

    fn delay_ms(&mut self, ms: u32) {
        embassy_time::block_for(embassy_time::Duration::from_millis(ms as u64))
    }
}

#[cfg(feature = "embassy")]
impl Clock for EmbassyClock {
    fn now_micros(&self) -> u64 {
        embassy_time::Instant::now().as_micros()
    }

    fn sleep_micros(&mut self, us: u32) {
        embassy_time::block_for(embassy_time::Duration::from_micros(us as u64))
    }
}
