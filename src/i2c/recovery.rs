use super::Port;
use crate::delay::Clock;
use crate::gpio::{BusPin, Level};
use crate::peripheral::Registers;

/// Half an SCL period while bit-banging, 100 kHz.
const HALF_CYCLE_US: u32 = 5;

/// Tries at releasing SCL before giving up on a slave stretching the clock.
const SCL_PULL_UP_TRIES: usize = 3;

/// A slave can be at most one byte plus its ACK into a transfer.
const UNWEDGE_CLOCKS: usize = 9;

/// Outcome of a bus recovery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Recovery {
    /// Both lines were high and recovery was not forced.
    NotWedged,
    /// Clocks and a stop condition went out, and SDA was released.
    Recovered,
    /// Something keeps holding SCL low. Recovery was abandoned.
    ClockStuck,
    /// The stop condition went out but SDA is still low.
    DataStuck,
}

impl<R: Registers, P: BusPin> Port<R, P> {
    /// Release SCL, giving a stretching slave a few half cycles to let go.
    fn pull_up_scl<C: Clock>(&mut self, clock: &mut C) -> bool {
        for _ in 0..SCL_PULL_UP_TRIES {
            self.scl.set_level(Level::High);
            if self.scl.get_level() == Level::High {
                return true;
            }
            clock.delay_us(HALF_CYCLE_US);
        }

        warn!("i2c{}: clock stretched too long?", self.id());
        false
    }

    /// Try to get a slave that is stuck mid-byte off the bus.
    ///
    /// The lines are taken over as open-drain GPIOs and SCL is pulsed, with SDA
    /// released, until the slave lets go of SDA (at most nine times). A stop
    /// condition finishes the slave's transaction. A slave that was writing
    /// sees a NACK on one of those clocks, one that was reading just finishes.
    ///
    /// Unless `force` is set nothing happens while both lines read high. The
    /// pins are left in GPIO mode.
    pub(crate) fn try_unwedge<C: Clock>(&mut self, clock: &mut C, force: bool) -> Recovery {
        if !force {
            if self.scl.get_level() == Level::High && self.sda.get_level() == Level::High {
                return Recovery::NotWedged;
            }
            warn!("i2c{}: wedge detected; fixing", self.id());
        }

        self.scl.set_as_open_drain_output(Level::High);
        self.sda.set_as_open_drain_output(Level::High);

        if self.scl.get_level() == Level::Low && !self.pull_up_scl(clock) {
            return Recovery::ClockStuck;
        }

        clock.delay_us(HALF_CYCLE_US);
        for _ in 0..UNWEDGE_CLOCKS {
            if !self.pull_up_scl(clock) {
                return Recovery::ClockStuck;
            }
            clock.delay_us(HALF_CYCLE_US);
            self.scl.set_level(Level::Low);
            clock.delay_us(HALF_CYCLE_US);

            if self.sda.get_level() == Level::High {
                break;
            }
        }

        // Stop: SDA rises while SCL is high
        self.sda.set_level(Level::Low);
        clock.delay_us(HALF_CYCLE_US);
        if !self.pull_up_scl(clock) {
            return Recovery::ClockStuck;
        }
        clock.delay_us(HALF_CYCLE_US);
        self.sda.set_level(Level::High);

        let outcome = if self.sda.get_level() == Level::Low {
            warn!("i2c{}: sda is still low", self.id());
            Recovery::DataStuck
        } else {
            Recovery::Recovered
        };
        clock.delay_us(HALF_CYCLE_US);

        outcome
    }
}
