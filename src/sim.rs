//! Simulated I2C v1 peripheral, bus lines and time source for unit tests.
//!
//! The peripheral model is lazy: received bytes are only clocked in when SR1
//! is read, at most two ahead of the reader (DR plus the shift register), and
//! each byte is ACKed or NACKed according to CR1 at the moment it is clocked.

use core::cell::{Cell, RefCell};
use core::convert::Infallible;
use std::collections::VecDeque;
use std::rc::Rc;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType, InputPin, OutputPin};

use crate::delay::Clock;
use crate::gpio::{BusPin, Level};
use crate::i2c::{I2c, Port, PortDescriptor};
use crate::lock::PortLock;
use crate::peripheral::{Cr1, RccPeripheral, Registers, Sr1, Sr2};

/// Something observable happened on a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Lock(u8),
    Unlock(u8),
    /// Software reset of the peripheral
    Reset(u8),
    /// CCR written
    Divider(u8, u16),
    Start(u8),
    /// Address byte, R/W bit included
    Address(u8, u8),
    Write(u8, u8),
    Read(u8, u8),
    Stop(u8),
}

type Log = Rc<RefCell<Vec<Event>>>;

/// Simulated microsecond clock. Clones share the same time.
#[derive(Clone, Default)]
pub struct SimClock(Rc<Cell<u64>>);

impl SimClock {
    pub fn now(&self) -> u64 {
        self.0.get()
    }

    fn advance(&self, us: u64) {
        self.0.set(self.0.get() + us);
    }
}

impl DelayNs for SimClock {
    fn delay_ns(&mut self, ns: u32) {
        self.advance(u64::from(ns.div_ceil(1000)));
    }

    fn delay_us(&mut self, us: u32) {
        self.advance(u64::from(us));
    }

    fn delay_ms(&mut self, ms: u32) {
        self.advance(u64::from(ms) * 1000);
    }
}

impl Clock for SimClock {
    fn now_micros(&self) -> u64 {
        self.now()
    }

    fn sleep_micros(&mut self, us: u32) {
        self.advance(u64::from(us));
    }
}

/// Slave device on the simulated bus.
pub struct Slave {
    pub address: u8,
    /// Bytes returned to the master, 0xff once exhausted
    pub tx: VecDeque<u8>,
    pub received: Vec<u8>,
    /// Index of the written data byte that gets NACKed
    pub nack_at: Option<usize>,
    /// Index of the written data byte during which an error flag shows up
    pub fault_at: Option<(usize, Sr1)>,
    /// Stretch the clock forever once addressed for reading
    pub stall: bool,
}

impl Slave {
    pub fn respond(&mut self, bytes: &[u8]) {
        self.tx = bytes.iter().copied().collect();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Address,
    Transmit,
    Receive,
}

pub struct Periph {
    id: u8,
    clock: SimClock,
    log: Log,

    gated: bool,
    pub cr1: Cr1,
    pub cr2: u16,
    pub ccr: u16,
    pub trise: u16,
    sr1: Sr1,
    busy: bool,
    msl: bool,

    phase: Phase,
    read_dir: bool,
    rx: VecDeque<u8>,
    clocking: bool,
    clocked: usize,
    pending_stop: bool,
    linger: u32,

    pub slave: Slave,
    /// ACK (true) or NACK sent for every byte of the last read
    pub acks: Vec<bool>,
    /// The start condition is never generated.
    pub start_stuck: bool,
    /// SR2 polls for which BUSY outlives a stop condition
    pub busy_after_stop: u32,
    pub stop_at: Option<u64>,
}

impl Periph {
    fn new(id: u8, clock: SimClock, log: Log) -> Self {
        Self {
            id,
            clock,
            log,
            gated: false,
            cr1: Cr1::empty(),
            cr2: 0,
            ccr: 0,
            trise: 0,
            sr1: Sr1::empty(),
            busy: false,
            msl: false,
            phase: Phase::Idle,
            read_dir: false,
            rx: VecDeque::new(),
            clocking: false,
            clocked: 0,
            pending_stop: false,
            linger: 0,
            slave: Slave {
                address: 0x50,
                tx: VecDeque::new(),
                received: Vec::new(),
                nack_at: None,
                fault_at: None,
                stall: false,
            },
            acks: Vec::new(),
            start_stuck: false,
            busy_after_stop: 0,
            stop_at: None,
        }
    }

    fn emit(&self, event: Event) {
        self.log.borrow_mut().push(event);
    }

    /// Set status flags as if the hardware had.
    pub fn raise(&mut self, flags: Sr1) {
        self.sr1.insert(flags);
    }

    /// SR1 without the side effects of a register read.
    pub fn peek_sr1(&self) -> Sr1 {
        self.sr1
    }

    pub fn busy(&self) -> bool {
        self.busy
    }

    fn reset(&mut self) {
        self.cr2 = 0;
        self.ccr = 0;
        self.trise = 0;
        self.sr1 = Sr1::empty();
        self.busy = false;
        self.msl = false;
        self.phase = Phase::Idle;
        self.rx.clear();
        self.clocking = false;
        self.pending_stop = false;
        self.linger = 0;
        self.emit(Event::Reset(self.id));
    }

    fn start(&mut self) {
        self.emit(Event::Start(self.id));
        self.cr1.remove(Cr1::START);
        self.sr1.remove(Sr1::ADDR | Sr1::BTF | Sr1::TXE | Sr1::RXNE);
        self.sr1.insert(Sr1::SB);
        self.busy = true;
        self.msl = true;
        self.linger = 0;
        self.rx.clear();
        self.phase = Phase::Address;
    }

    fn stop(&mut self) {
        self.emit(Event::Stop(self.id));
        self.stop_at = Some(self.clock.now());
        self.cr1.remove(Cr1::STOP);
        self.sr1.remove(Sr1::SB | Sr1::ADDR | Sr1::BTF | Sr1::TXE);
        self.phase = Phase::Idle;
        self.msl = false;
        self.clocking = false;
        self.pending_stop = false;
        if self.busy_after_stop > 0 {
            self.linger = self.busy_after_stop;
        } else {
            self.busy = false;
        }
    }

    fn clock_in(&mut self) {
        while self.clocking && !self.slave.stall && self.rx.len() < 2 {
            let byte = self.slave.tx.pop_front().unwrap_or(0xff);
            let ack = self.cr1.contains(Cr1::ACK) || (self.cr1.contains(Cr1::POS) && self.clocked == 0);
            self.acks.push(ack);
            self.clocked += 1;
            self.rx.push_back(byte);

            if !ack {
                self.clocking = false;
                if self.pending_stop {
                    self.stop();
                }
            }
        }
        self.refresh_rx_flags();
    }

    fn refresh_rx_flags(&mut self) {
        self.sr1.remove(Sr1::RXNE | Sr1::BTF);
        if !self.rx.is_empty() {
            self.sr1.insert(Sr1::RXNE);
        }
        if self.rx.len() == 2 {
            self.sr1.insert(Sr1::BTF);
        }
    }

    fn write_cr1(&mut self, value: Cr1) {
        let old = self.cr1;
        self.cr1 = value;

        if value.contains(Cr1::SWRST) {
            if !old.contains(Cr1::SWRST) {
                self.reset();
            }
            return;
        }

        let rising = value.difference(old);
        if rising.contains(Cr1::START) && value.contains(Cr1::PE) && !self.start_stuck {
            self.start();
        }
        if rising.contains(Cr1::STOP) {
            if self.phase == Phase::Receive && self.clocking && !self.slave.stall {
                self.pending_stop = true;
            } else {
                self.stop();
            }
        }
    }

    fn read_sr1(&mut self) -> Sr1 {
        if self.phase == Phase::Receive {
            self.clock_in();
        }
        self.sr1
    }

    fn write_sr1(&mut self, value: Sr1) {
        self.sr1.remove(Sr1::ERRORS.difference(value));
    }

    fn read_sr2(&mut self) -> Sr2 {
        let mut value = Sr2::empty();
        if self.busy {
            value |= Sr2::BUSY;
        }
        if self.msl {
            value |= Sr2::MSL;
        }

        if self.sr1.contains(Sr1::ADDR) {
            self.sr1.remove(Sr1::ADDR);
            if self.read_dir {
                self.phase = Phase::Receive;
                self.clocking = true;
                self.clocked = 0;
                self.acks.clear();
            } else {
                self.phase = Phase::Transmit;
                self.sr1.insert(Sr1::TXE);
            }
        }

        if self.phase == Phase::Idle && self.linger > 0 {
            self.linger -= 1;
            if self.linger == 0 {
                self.busy = false;
            }
        }

        value
    }

    fn read_dr(&mut self) -> u8 {
        let byte = self.rx.pop_front().unwrap_or(0);
        self.emit(Event::Read(self.id, byte));
        self.refresh_rx_flags();
        byte
    }

    fn write_dr(&mut self, byte: u8) {
        match self.phase {
            Phase::Address => {
                self.emit(Event::Address(self.id, byte));
                self.sr1.remove(Sr1::SB);
                if byte >> 1 == self.slave.address {
                    self.read_dir = byte & 1 == 1;
                    self.sr1.insert(Sr1::ADDR);
                } else {
                    self.sr1.insert(Sr1::AF);
                }
            }
            Phase::Transmit => {
                self.emit(Event::Write(self.id, byte));
                self.sr1.remove(Sr1::BTF | Sr1::TXE);
                let index = self.slave.received.len();
                self.slave.received.push(byte);
                if self.slave.nack_at == Some(index) {
                    self.sr1.insert(Sr1::AF);
                } else if let Some((_, flags)) = self.slave.fault_at.filter(|&(at, _)| at == index) {
                    self.sr1.insert(flags);
                } else {
                    self.sr1.insert(Sr1::BTF | Sr1::TXE);
                }
            }
            Phase::Idle | Phase::Receive => {}
        }
    }
}

pub struct SimRegs(Rc<RefCell<Periph>>);

impl RccPeripheral for SimRegs {
    fn is_enabled(&self) -> bool {
        self.0.borrow().gated
    }

    fn enable(&mut self) {
        self.0.borrow_mut().gated = true;
    }
}

impl Registers for SimRegs {
    fn read_cr1(&mut self) -> Cr1 {
        self.0.borrow().cr1
    }

    fn write_cr1(&mut self, value: Cr1) {
        self.0.borrow_mut().write_cr1(value)
    }

    fn read_cr2(&mut self) -> u16 {
        self.0.borrow().cr2
    }

    fn write_cr2(&mut self, value: u16) {
        self.0.borrow_mut().cr2 = value;
    }

    fn read_sr1(&mut self) -> Sr1 {
        self.0.borrow_mut().read_sr1()
    }

    fn write_sr1(&mut self, value: Sr1) {
        self.0.borrow_mut().write_sr1(value)
    }

    fn read_sr2(&mut self) -> Sr2 {
        self.0.borrow_mut().read_sr2()
    }

    fn read_dr(&mut self) -> u8 {
        self.0.borrow_mut().read_dr()
    }

    fn write_dr(&mut self, value: u8) {
        self.0.borrow_mut().write_dr(value)
    }

    fn write_ccr(&mut self, value: u16) {
        let mut periph = self.0.borrow_mut();
        periph.ccr = value;
        periph.emit(Event::Divider(periph.id, value));
    }

    fn write_trise(&mut self, value: u16) {
        self.0.borrow_mut().trise = value;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line {
    Scl,
    Sda,
}

/// Mode change or level change requested on a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinOp {
    OpenDrain(Line, Level),
    Peripheral(Line),
    Set(Line, Level),
}

#[derive(Clone, Copy)]
struct Drive {
    gpio: bool,
    out: Level,
}

/// Both lines of one bus, with a misbehaving slave attached.
pub struct Lines {
    clock: SimClock,
    scl: Drive,
    sda: Drive,
    pub ops: Vec<PinOp>,
    /// SDA is held low for this many more SCL falling edges.
    pub sda_held_clocks: u32,
    /// SCL is held low until this time.
    pub scl_held_until: u64,
    /// Time of the last level or mode the master drove onto a line as GPIO.
    pub driven_at: Option<u64>,
}

impl Lines {
    fn new(clock: SimClock) -> Self {
        let released = Drive {
            gpio: false,
            out: Level::High,
        };
        Self {
            clock,
            scl: released,
            sda: released,
            ops: Vec::new(),
            sda_held_clocks: 0,
            scl_held_until: 0,
            driven_at: None,
        }
    }

    fn drive(&mut self, line: Line) -> &mut Drive {
        match line {
            Line::Scl => &mut self.scl,
            Line::Sda => &mut self.sda,
        }
    }

    fn level(&self, line: Line) -> Level {
        let (drive, held) = match line {
            Line::Scl => (self.scl, self.clock.now() < self.scl_held_until),
            Line::Sda => (self.sda, self.sda_held_clocks > 0),
        };
        if held || (drive.gpio && drive.out == Level::Low) {
            Level::Low
        } else {
            Level::High
        }
    }

    fn set(&mut self, line: Line, level: Level) {
        self.ops.push(PinOp::Set(line, level));
        self.driven_at = Some(self.clock.now());
        let drive = self.drive(line);
        let falling = drive.gpio && drive.out == Level::High && level == Level::Low;
        drive.out = level;

        if line == Line::Scl && falling && self.sda_held_clocks > 0 {
            self.sda_held_clocks -= 1;
        }
    }
}

pub struct SimPin {
    line: Line,
    lines: Rc<RefCell<Lines>>,
}

impl ErrorType for SimPin {
    type Error = Infallible;
}

impl InputPin for SimPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.lines.borrow().level(self.line) == Level::High)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(self.lines.borrow().level(self.line) == Level::Low)
    }
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.lines.borrow_mut().set(self.line, Level::Low);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.lines.borrow_mut().set(self.line, Level::High);
        Ok(())
    }
}

impl BusPin for SimPin {
    fn set_as_open_drain_output(&mut self, level: Level) {
        let mut lines = self.lines.borrow_mut();
        lines.ops.push(PinOp::OpenDrain(self.line, level));
        lines.driven_at = Some(lines.clock.now());
        *lines.drive(self.line) = Drive { gpio: true, out: level };
    }

    fn set_as_peripheral(&mut self) {
        let mut lines = self.lines.borrow_mut();
        lines.ops.push(PinOp::Peripheral(self.line));
        lines.drive(self.line).gpio = false;
    }
}

/// Port lock that records every lock and unlock, and panics on reentry.
pub struct RecordingLock {
    log: Log,
    held: RefCell<Vec<u8>>,
}

impl PortLock for RecordingLock {
    fn lock(&self, port: u8) {
        let mut held = self.held.borrow_mut();
        assert!(!held.contains(&port), "port {port} locked twice");
        held.push(port);
        self.log.borrow_mut().push(Event::Lock(port));
    }

    fn unlock(&self, port: u8) {
        self.held.borrow_mut().retain(|&p| p != port);
        self.log.borrow_mut().push(Event::Unlock(port));
    }
}

/// Test-side view of one simulated port.
pub struct Handle {
    pub periph: Rc<RefCell<Periph>>,
    pub lines: Rc<RefCell<Lines>>,
    pub clock: SimClock,
}

/// Shared clock and event log for a set of simulated ports.
#[derive(Default)]
pub struct Bench {
    pub clock: SimClock,
    log: Log,
}

impl Bench {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn port(&self, id: u8, kbps: u32) -> (Port<SimRegs, SimPin>, Handle) {
        let periph = Rc::new(RefCell::new(Periph::new(id, self.clock.clone(), self.log.clone())));
        let lines = Rc::new(RefCell::new(Lines::new(self.clock.clone())));

        let pin = |line| SimPin {
            line,
            lines: lines.clone(),
        };
        let port = Port::new(
            PortDescriptor::new(id, kbps),
            SimRegs(periph.clone()),
            pin(Line::Scl),
            pin(Line::Sda),
        );

        let handle = Handle {
            periph,
            lines,
            clock: self.clock.clone(),
        };
        (port, handle)
    }

    pub fn driver<const N: usize>(
        &self,
        ports: [Port<SimRegs, SimPin>; N],
    ) -> I2c<SimRegs, SimPin, SimClock, RecordingLock, N> {
        let locks = RecordingLock {
            log: self.log.clone(),
            held: RefCell::new(Vec::new()),
        };
        I2c::new(ports, self.clock.clone(), locks)
    }

    pub fn events(&self) -> Vec<Event> {
        self.log.borrow().clone()
    }

    pub fn clear_events(&self) {
        self.log.borrow_mut().clear();
    }
}
