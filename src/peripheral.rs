//! Register-level access to one I2C v1 peripheral instance.
//!
//! The driver never touches memory-mapped registers directly. A board crate
//! implements [`Registers`] for each port (usually on top of its PAC), and the
//! unit tests implement it on a simulated register file.

use bitflags::bitflags;

bitflags! {
    /// Control register 1.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Cr1: u16 {
        /// Peripheral enable
        const PE = 1 << 0;
        /// Start generation
        const START = 1 << 8;
        /// Stop generation
        const STOP = 1 << 9;
        /// Acknowledge enable
        const ACK = 1 << 10;
        /// ACK/PEC position: the ACK bit applies to the next byte in the shift register
        const POS = 1 << 11;
        /// Software reset
        const SWRST = 1 << 15;

        const _ = !0;
    }
}

bitflags! {
    /// Status register 1.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Sr1: u16 {
        /// Start condition generated
        const SB = 1 << 0;
        /// Address sent and acknowledged
        const ADDR = 1 << 1;
        /// Byte transfer finished
        const BTF = 1 << 2;
        /// Data register not empty (receiver)
        const RXNE = 1 << 6;
        /// Data register empty (transmitter)
        const TXE = 1 << 7;
        /// Bus error
        const BERR = 1 << 8;
        /// Arbitration lost
        const ARLO = 1 << 9;
        /// Acknowledge failure
        const AF = 1 << 10;

        const _ = !0;
    }
}

impl Sr1 {
    /// Flags that abort any wait on the status register.
    pub const ERRORS: Self = Self::BERR.union(Self::ARLO).union(Self::AF);
}

bitflags! {
    /// Status register 2.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Sr2: u16 {
        /// Master mode
        const MSL = 1 << 0;
        /// Bus busy
        const BUSY = 1 << 1;

        const _ = !0;
    }
}

/// Clock gating for a peripheral, as found in the RCC.
pub trait RccPeripheral {
    fn is_enabled(&self) -> bool;
    fn enable(&mut self);
}

/// Register file of one I2C port.
///
/// Reads take `&mut self` because several of them have side effects on the
/// hardware: reading SR2 after SR1 clears ADDR, and reading DR pops received data.
pub trait Registers: RccPeripheral {
    fn read_cr1(&mut self) -> Cr1;
    fn write_cr1(&mut self, value: Cr1);

    /// CR2 holds the peripheral input clock in MHz.
    fn read_cr2(&mut self) -> u16;
    fn write_cr2(&mut self, value: u16);

    fn read_sr1(&mut self) -> Sr1;
    /// Error flags in SR1 are rc_w0: writing zero clears them.
    fn write_sr1(&mut self, value: Sr1);

    fn read_sr2(&mut self) -> Sr2;

    fn read_dr(&mut self) -> u8;
    fn write_dr(&mut self, value: u8);

    /// Clock control: SCL half-period in peripheral clock cycles.
    fn write_ccr(&mut self, value: u16);

    /// Maximum rise time in peripheral clock cycles, plus one.
    fn write_trise(&mut self, value: u16);

    #[inline]
    fn modify_cr1(&mut self, f: impl FnOnce(&mut Cr1)) {
        let mut value = self.read_cr1();
        f(&mut value);
        self.write_cr1(value);
    }
}
