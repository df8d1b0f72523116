//! GPIO
//!
//! The two bus lines of a port are ordinary pins that can be muxed either to
//! the I2C peripheral or to the GPIO block. Bus recovery needs the latter.

use embedded_hal::digital::{InputPin, OutputPin};

/// Digital input or output level.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Level {
    Low,
    High,
}

impl From<bool> for Level {
    fn from(val: bool) -> Self {
        match val {
            true => Self::High,
            false => Self::Low,
        }
    }
}

impl From<Level> for bool {
    fn from(level: Level) -> bool {
        match level {
            Level::Low => false,
            Level::High => true,
        }
    }
}

/// SCL or SDA pin of an I2C port.
///
/// Pin errors are not interesting to the bus driver: a pin that cannot be read
/// is treated as low, and a failed write is ignored.
pub trait BusPin: InputPin + OutputPin {
    /// Hand the pin to the GPIO block as an open-drain output.
    ///
    /// `level` is applied before the output is enabled, so the line does not glitch.
    fn set_as_open_drain_output(&mut self, level: Level);

    /// Hand the pin back to the I2C peripheral (alternate function, open drain).
    fn set_as_peripheral(&mut self);

    #[inline]
    fn get_level(&mut self) -> Level {
        self.is_high().unwrap_or(false).into()
    }

    #[inline]
    fn set_level(&mut self, level: Level) {
        let _ = match level {
            Level::Low => self.set_low(),
            Level::High => self.set_high(),
        };
    }
}
