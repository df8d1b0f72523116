//! Inter-Integrated-Circuit (I2C), master mode
//!
//! Blocking master driver for the I2C v1 peripheral (SR1/SR2 status, ACK/POS
//! control) found on STM32F1/L1 and the CH32 parts. Every configured port is
//! owned by one [`I2c`] table, which also owns the time source and the port
//! locks. A transfer that cannot even get a start condition onto the bus
//! triggers a forced bus recovery and re-initialization of that port.

mod recovery;
mod smbus;
mod status;
mod timing;
mod transfer;

use bitflags::bitflags;
use embedded_hal::i2c::{Operation, SevenBitAddress};

pub use self::recovery::Recovery;
pub use self::smbus::SMBUS_MAX_BLOCK;
pub use self::timing::Timing;
use crate::delay::Clock;
use crate::gpio::{BusPin, Level};
use crate::lock::PortLock;
use crate::peripheral::{Cr1, Registers, Sr1};
use crate::time::Hertz;

/// Hardware condition that aborted a wait on the status register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Fault {
    /// ACK not received, either to the address or to a data byte (AF)
    Nack,
    /// Arbitration lost (ARLO)
    Arbitration,
    /// Misplaced start or stop condition (BERR)
    Bus,
}

impl Fault {
    fn from_sr1(sr1: Sr1) -> Option<Self> {
        if sr1.contains(Sr1::AF) {
            Some(Self::Nack)
        } else if sr1.contains(Sr1::ARLO) {
            Some(Self::Arbitration)
        } else if sr1.contains(Sr1::BERR) {
            Some(Self::Bus)
        } else {
            None
        }
    }
}

/// I2C error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// A status wait ran out of time without an error flag showing up.
    Timeout,
    /// The peripheral flagged an error during a status wait.
    Hardware(Fault),
    /// The start condition was never confirmed. The port has been reset.
    StartFailed,
    /// Unknown port, out-of-range address or bad buffer length.
    InvalidArgument,
}

impl embedded_hal::i2c::Error for Error {
    fn kind(&self) -> embedded_hal::i2c::ErrorKind {
        use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};

        match *self {
            Self::Hardware(Fault::Nack) => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Unknown),
            Self::Hardware(Fault::Arbitration) => ErrorKind::ArbitrationLoss,
            Self::Hardware(Fault::Bus) => ErrorKind::Bus,
            Self::Timeout | Self::StartFailed | Self::InvalidArgument => ErrorKind::Other,
        }
    }
}

bitflags! {
    /// Framing of one [`I2c::transfer`] call.
    ///
    /// A call without `START` continues whatever the previous call on the port
    /// left open; a call without `STOP` leaves the bus claimed for the next one.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TransferFlags: u8 {
        /// Begin with a start condition and the slave address.
        const START = 1 << 0;
        /// End with a stop condition.
        const STOP = 1 << 1;
        /// A complete transaction in one call.
        const SINGLE = Self::START.bits() | Self::STOP.bits();
    }
}

bitflags! {
    /// Instantaneous levels of the two bus lines.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LineLevels: u8 {
        const SCL_HIGH = 1 << 0;
        const SDA_HIGH = 1 << 1;
    }
}

impl LineLevels {
    /// Both lines idle high, so nothing is holding the bus.
    pub fn is_idle(self) -> bool {
        self.contains(Self::SCL_HIGH | Self::SDA_HIGH)
    }
}

/// Static description of one physical bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PortDescriptor {
    id: u8,
    kbps: u32,
}

impl PortDescriptor {
    /// Port `id` clocked at `kbps` kbit/s.
    pub const fn new(id: u8, kbps: u32) -> Self {
        assert!(kbps > 0, "I2C bus speed must be non-zero");
        Self { id, kbps }
    }

    pub const fn id(&self) -> u8 {
        self.id
    }

    pub const fn kbps(&self) -> u32 {
        self.kbps
    }
}

/// Raw register snapshot, for diagnostics.
///
/// Reading SR2 right after SR1 clears a pending ADDR flag, like it does on hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RegisterDump {
    pub cr1: u16,
    pub cr2: u16,
    pub sr1: u16,
    pub sr2: u16,
}

/// One I2C port: its descriptor, register file and the two bus pins.
pub struct Port<R, P> {
    desc: PortDescriptor,
    regs: R,
    scl: P,
    sda: P,
}

impl<R: Registers, P: BusPin> Port<R, P> {
    pub fn new(desc: PortDescriptor, regs: R, scl: P, sda: P) -> Self {
        Self { desc, regs, scl, sda }
    }

    pub fn descriptor(&self) -> &PortDescriptor {
        &self.desc
    }

    #[inline]
    fn id(&self) -> u8 {
        self.desc.id
    }

    /// Bring the port up: unwedge the bus, ungate the peripheral clock, mux the
    /// pins to the peripheral and program the bus timing.
    fn init<C: Clock>(&mut self, clock: &mut C, core_freq: Hertz, force_unwedge: bool) {
        let _ = self.try_unwedge(clock, force_unwedge);

        if !self.regs.is_enabled() {
            self.regs.enable();
        }

        self.scl.set_as_peripheral();
        self.sda.set_as_peripheral();

        self.set_freq(core_freq);
        debug!("i2c{}: up at {} kbps", self.id(), self.desc.kbps);
    }

    fn line_levels(&mut self) -> LineLevels {
        let mut levels = LineLevels::empty();
        if self.scl.get_level() == Level::High {
            levels |= LineLevels::SCL_HIGH;
        }
        if self.sda.get_level() == Level::High {
            levels |= LineLevels::SDA_HIGH;
        }
        levels
    }

    fn dump(&mut self) -> RegisterDump {
        RegisterDump {
            cr1: self.regs.read_cr1().bits(),
            cr2: self.regs.read_cr2(),
            sr1: self.regs.read_sr1().bits(),
            sr2: self.regs.read_sr2().bits(),
        }
    }

    fn disable(&mut self) {
        self.regs.modify_cr1(|w| w.remove(Cr1::PE));
    }
}

/// I2C driver for a fixed table of ports.
///
/// `C` is the time source, `L` the per-port lock shared with callers that
/// build multi-call transactions.
pub struct I2c<R, P, C, L, const N: usize> {
    ports: [Port<R, P>; N],
    clock: C,
    locks: L,
    core_freq: Hertz,
}

impl<R, P, C, L, const N: usize> I2c<R, P, C, L, N>
where
    R: Registers,
    P: BusPin,
    C: Clock,
    L: PortLock,
{
    /// Take ownership of the port table. Nothing is touched until [`I2c::init`].
    pub fn new(ports: [Port<R, P>; N], clock: C, locks: L) -> Self {
        Self {
            ports,
            clock,
            locks,
            core_freq: Hertz(0),
        }
    }

    /// One-time bring-up of every port, unwedging only buses that look stuck.
    pub fn init(&mut self, core_freq: Hertz) {
        self.core_freq = core_freq;
        for port in self.ports.iter_mut() {
            port.init(&mut self.clock, core_freq, false);
        }
    }

    pub fn locks(&self) -> &L {
        &self.locks
    }

    fn index_of(&self, port: u8) -> Result<usize, Error> {
        self.ports
            .iter()
            .position(|p| p.id() == port)
            .ok_or(Error::InvalidArgument)
    }

    /// Run one transfer on `port` with the 7-bit slave `address`.
    ///
    /// Writes `write` (if any), then reads `read.len()` bytes (if any) after a
    /// repeated start. With both empty, only the address is sent, which probes
    /// for the device. The caller must hold the port lock.
    ///
    /// If the start condition fails, the port is forcibly unwedged and
    /// re-initialized before [`Error::StartFailed`] is returned, and the bus is
    /// left idle for the usual settle time after the recovery. The transfer
    /// itself is not retried. After any error the content of `read` is undefined.
    pub fn transfer(
        &mut self,
        port: u8,
        address: u8,
        write: &[u8],
        read: &mut [u8],
        flags: TransferFlags,
    ) -> Result<(), Error> {
        if address > 0x7f {
            return Err(Error::InvalidArgument);
        }
        let index = self.index_of(port)?;
        let core_freq = self.core_freq;
        let Self { ports, clock, .. } = self;
        let port = &mut ports[index];

        port.xfer(clock, address, write, read, flags, |port, clock| {
            warn!("i2c{}: start failed; resetting port to unwedge", port.id());
            port.init(clock, core_freq, true);
            debug!("i2c{}: reset done", port.id());
        })
    }

    /// Levels of SCL and SDA as seen by the pins right now.
    pub fn get_line_levels(&mut self, port: u8) -> Result<LineLevels, Error> {
        let index = self.index_of(port)?;
        Ok(self.ports[index].line_levels())
    }

    pub fn dump_registers(&mut self, port: u8) -> Result<RegisterDump, Error> {
        let index = self.index_of(port)?;
        Ok(self.ports[index].dump())
    }

    /// First half of a core clock change: lock every port so no transfer is
    /// in flight while the dividers are wrong.
    pub fn pre_freq_change(&mut self) {
        for port in self.ports.iter() {
            self.locks.lock(port.id());
        }
    }

    /// Second half of a core clock change: reprogram every port for
    /// `core_freq`, then release the locks taken by [`I2c::pre_freq_change`].
    pub fn post_freq_change(&mut self, core_freq: Hertz) {
        self.core_freq = core_freq;
        for port in self.ports.iter_mut() {
            port.set_freq(core_freq);
        }
        for port in self.ports.iter() {
            self.locks.unlock(port.id());
        }
    }

    /// Borrow one port as an [`embedded_hal::i2c::I2c`] bus.
    pub fn bus(&mut self, port: u8) -> Result<Bus<'_, R, P, C, L, N>, Error> {
        self.index_of(port)?;
        Ok(Bus { i2c: self, port })
    }

    /// Disable every peripheral and hand back the parts.
    pub fn release(mut self) -> ([Port<R, P>; N], C, L) {
        for port in self.ports.iter_mut() {
            port.disable();
        }
        (self.ports, self.clock, self.locks)
    }
}

/// One port of an [`I2c`] table, usable through `embedded-hal`.
///
/// Each operation becomes one [`I2c::transfer`] call. A start condition goes
/// out whenever the direction changes, the stop condition after the last
/// operation. The port lock is held for the whole transaction.
///
/// Back-to-back reads cannot be merged: the driver NACKs the last byte of every
/// read call, so such transactions are rejected with [`Error::InvalidArgument`].
pub struct Bus<'a, R, P, C, L, const N: usize> {
    i2c: &'a mut I2c<R, P, C, L, N>,
    port: u8,
}

impl<'a, R, P, C, L, const N: usize> Bus<'a, R, P, C, L, N>
where
    R: Registers,
    P: BusPin,
    C: Clock,
    L: PortLock,
{
    fn run(&mut self, address: u8, operations: &mut [Operation<'_>]) -> Result<(), Error> {
        let mut previous_read = None;
        let last = operations.len().saturating_sub(1);

        for (i, op) in operations.iter_mut().enumerate() {
            let is_read = matches!(op, Operation::Read(_));

            let mut flags = TransferFlags::empty();
            if previous_read != Some(is_read) {
                flags |= TransferFlags::START;
            }
            if i == last {
                flags |= TransferFlags::STOP;
            }

            match op {
                Operation::Read(buf) => self.i2c.transfer(self.port, address, &[], &mut buf[..], flags)?,
                Operation::Write(bytes) => self.i2c.transfer(self.port, address, &bytes[..], &mut [], flags)?,
            }
            previous_read = Some(is_read);
        }

        Ok(())
    }
}

impl<'a, R, P, C, L, const N: usize> embedded_hal::i2c::ErrorType for Bus<'a, R, P, C, L, N> {
    type Error = Error;
}

/// Differs from the `embedded-hal` contract in one way: two
/// [`Operation::Read`]s in a row, or an empty read, make the whole transaction
/// fail with [`Error::InvalidArgument`] before anything goes out on the bus.
/// Every read call NACKs its last byte, so adjacent reads cannot share one
/// bus read. Concatenate them into a single buffer instead.
impl<'a, R, P, C, L, const N: usize> embedded_hal::i2c::I2c<SevenBitAddress> for Bus<'a, R, P, C, L, N>
where
    R: Registers,
    P: BusPin,
    C: Clock,
    L: PortLock,
{
    /// See the restriction on adjacent and empty reads above.
    fn transaction(&mut self, address: u8, operations: &mut [Operation<'_>]) -> Result<(), Self::Error> {
        let consecutive_reads = operations
            .windows(2)
            .any(|pair| matches!(pair, [Operation::Read(_), Operation::Read(_)]));
        let empty_read = operations
            .iter()
            .any(|op| matches!(op, Operation::Read(buf) if buf.is_empty()));
        if consecutive_reads || empty_read {
            return Err(Error::InvalidArgument);
        }
        if operations.is_empty() {
            return Ok(());
        }

        self.i2c.locks.lock(self.port);
        let result = self.run(address, operations);
        self.i2c.locks.unlock(self.port);
        result
    }
}
