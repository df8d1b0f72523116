use super::{Error, Fault, Port};
use crate::delay::Clock;
use crate::gpio::BusPin;
use crate::peripheral::{Cr1, Registers, Sr1};

/// How long any single status wait may take.
///
/// A slave may legitimately stretch the clock for a while, but a host that
/// resets mid-read would otherwise hang us forever.
const TX_TIMEOUT_US: u64 = 10_000;

/// I2C is slow; let other things run between status polls.
const POLL_INTERVAL_US: u32 = 100;

impl<R: Registers, P: BusPin> Port<R, P> {
    /// Wait until SR1 contains all of `mask`.
    ///
    /// An error flag seen on the same poll wins over running out of time.
    pub(crate) fn wait_sr1<C: Clock>(&mut self, clock: &mut C, mask: Sr1) -> Result<(), Error> {
        let deadline = clock.now_micros() + TX_TIMEOUT_US;

        while clock.now_micros() < deadline {
            let sr1 = self.regs.read_sr1();

            if sr1.contains(mask) {
                return Ok(());
            }

            if let Some(fault) = Fault::from_sr1(sr1) {
                trace!("i2c{}: wait for {:x} failed, SR1={:x}", self.id(), mask.bits(), sr1.bits());
                return Err(Error::Hardware(fault));
            }

            clock.sleep_micros(POLL_INTERVAL_US);
        }

        trace!("i2c{}: wait for {:x} timed out", self.id(), mask.bits());
        Err(Error::Timeout)
    }

    /// Send a start condition followed by the address byte (7-bit address
    /// already shifted, R/W in bit 0).
    pub(crate) fn send_start<C: Clock>(&mut self, clock: &mut C, addr_byte: u8) -> Result<(), Error> {
        self.regs.modify_cr1(|w| w.insert(Cr1::START));
        if self.wait_sr1(clock, Sr1::SB).is_err() {
            return Err(Error::StartFailed);
        }

        self.regs.write_dr(addr_byte);
        self.wait_sr1(clock, Sr1::ADDR)?;

        // Reading SR2 after SR1 clears ADDR
        let _ = self.regs.read_sr2();

        Ok(())
    }
}
