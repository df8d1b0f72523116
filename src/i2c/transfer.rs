use super::{Error, Port, TransferFlags};
use crate::delay::Clock;
use crate::gpio::BusPin;
use crate::peripheral::{Cr1, Registers, Sr1, Sr2};

/// BUSY is polled this many times after a stop, 10 us apart.
const STOP_POLLS: usize = 10;
const STOP_POLL_US: u32 = 10;

/// One 100 kHz clock period of idle bus, so slaves see the stop before the next start.
const BUS_IDLE_US: u32 = 10;

impl<R: Registers, P: BusPin> Port<R, P> {
    /// Run one transfer; see [`I2c::transfer`](super::I2c::transfer).
    ///
    /// Any error queues a stop condition. If the start condition failed,
    /// `on_start_failed` runs right after that stop. Whenever a stop is queued
    /// this waits for the bus to go idle before returning, so the idle time
    /// also covers whatever `on_start_failed` put on the bus.
    pub(crate) fn xfer<C: Clock>(
        &mut self,
        clock: &mut C,
        address: u8,
        out: &[u8],
        inp: &mut [u8],
        mut flags: TransferFlags,
        on_start_failed: impl FnOnce(&mut Self, &mut C),
    ) -> Result<(), Error> {
        // Leftover status from an earlier transfer is cleared blindly, not inspected.
        self.regs.write_sr1(Sr1::empty());

        // Known state for the control bits.
        self.regs
            .modify_cr1(|w| w.remove(Cr1::START | Cr1::STOP | Cr1::POS | Cr1::ACK));

        let result = self.xfer_phases(clock, address, out, inp, flags);

        if let Err(e) = result {
            debug!("i2c{}: transfer to {:x} failed: {:?}", self.id(), address, e);
            flags |= TransferFlags::STOP;
            self.queue_stop();

            if e == Error::StartFailed {
                on_start_failed(self, clock);
            }
        }

        if flags.contains(TransferFlags::STOP) {
            self.wait_bus_idle(clock);
        }

        result
    }

    fn xfer_phases<C: Clock>(
        &mut self,
        clock: &mut C,
        address: u8,
        out: &[u8],
        inp: &mut [u8],
        flags: TransferFlags,
    ) -> Result<(), Error> {
        let mut started = !flags.contains(TransferFlags::START);
        let stop = flags.contains(TransferFlags::STOP);

        // No out bytes and no in bytes means just check for active
        if !out.is_empty() || inp.is_empty() {
            if !started {
                self.send_start(clock, address << 1)?;
            }

            for &byte in out {
                self.regs.write_dr(byte);
                self.wait_sr1(clock, Sr1::BTF)?;
            }

            // Reading needs a repeated start
            started = false;

            if inp.is_empty() && stop {
                self.queue_stop();
            }
        }

        if inp.is_empty() {
            return Ok(());
        }

        // ACK/POS must be set up before the address goes out.
        match inp.len() {
            1 => {}
            2 => self.regs.modify_cr1(|w| w.insert(Cr1::POS)),
            _ => self.regs.modify_cr1(|w| w.insert(Cr1::ACK)),
        }

        if !started {
            self.send_start(clock, (address << 1) | 1)?;
        }

        self.read_tail(clock, inp, stop)
    }

    /// Receive `inp.len()` bytes, placing NACK and STOP where the peripheral
    /// needs them: one or two bytes ahead of the shift register.
    fn read_tail<C: Clock>(&mut self, clock: &mut C, inp: &mut [u8], stop: bool) -> Result<(), Error> {
        let n = inp.len();

        if n == 1 {
            // STOP goes in before the only byte even arrives.
            if stop {
                self.queue_stop();
            }

            self.wait_sr1(clock, Sr1::RXNE)?;
            inp[0] = self.regs.read_dr();
        } else if n == 2 {
            // Both bytes latched: first in DR, second in the shift register.
            self.wait_sr1(clock, Sr1::BTF)?;

            if stop {
                self.queue_stop();
            }

            inp[0] = self.regs.read_dr();
            inp[1] = self.regs.read_dr();
        } else {
            for byte in inp[..n - 3].iter_mut() {
                self.wait_sr1(clock, Sr1::RXNE)?;
                *byte = self.regs.read_dr();
            }

            // N-3 in DR, N-2 in the shift register
            self.wait_sr1(clock, Sr1::BTF)?;

            // No more acking
            self.regs.modify_cr1(|w| w.remove(Cr1::ACK));
            inp[n - 3] = self.regs.read_dr();

            // N-2 in DR, N-1 in the shift register
            self.wait_sr1(clock, Sr1::BTF)?;

            if stop {
                self.queue_stop();
            }

            inp[n - 2] = self.regs.read_dr();
            inp[n - 1] = self.regs.read_dr();
        }

        Ok(())
    }

    #[inline]
    fn queue_stop(&mut self) {
        self.regs.modify_cr1(|w| w.insert(Cr1::STOP));
    }

    /// Give the stop up to 100 us to take effect, then hold the bus idle.
    fn wait_bus_idle<C: Clock>(&mut self, clock: &mut C) {
        for _ in 0..STOP_POLLS {
            if !self.regs.read_sr2().contains(Sr2::BUSY) {
                break;
            }
            clock.delay_us(STOP_POLL_US);
        }

        clock.delay_us(BUS_IDLE_US);
    }
}
