use super::Port;
use crate::gpio::BusPin;
use crate::peripheral::{Cr1, Registers};
use crate::time::Hertz;

/// Divider values for one bus speed at one core clock (standard mode, 50% duty).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Timing {
    /// SCL half-period in core clock cycles
    pub ccr: u16,
    /// Peripheral input clock in MHz
    pub freq_mhz: u16,
    /// Maximum SCL rise time (1 us) in core clock cycles, plus one
    pub trise: u16,
}

/// CCR is a 12-bit field.
const CCR_MAX: u32 = 0xfff;

impl Timing {
    /// Dividers for `kbps` at `core_freq`. A bus slower than the divider can
    /// reach is clamped to the slowest clock the peripheral can generate.
    pub fn new(core_freq: Hertz, kbps: u32) -> Self {
        let ccr = core_freq / Hertz::khz(2 * kbps);
        let freq_mhz = core_freq / Hertz::mhz(1);

        if ccr > CCR_MAX {
            warn!("i2c: {} kbps is too slow for a {} Hz core clock", kbps, core_freq.to_hz());
        }

        Self {
            ccr: ccr.min(CCR_MAX) as u16,
            freq_mhz: freq_mhz as u16,
            trise: (freq_mhz + 1) as u16,
        }
    }
}

impl<R: Registers, P: BusPin> Port<R, P> {
    /// Reset the peripheral and program its dividers for `core_freq`.
    ///
    /// The dividers only take effect while the peripheral is disabled, so
    /// this goes through a full reset and must not race with a transfer.
    pub(crate) fn set_freq(&mut self, core_freq: Hertz) {
        let timing = Timing::new(core_freq, self.desc.kbps);

        self.regs.write_cr1(Cr1::SWRST);
        self.regs.write_cr1(Cr1::empty());

        self.regs.write_ccr(timing.ccr);
        self.regs.write_cr2(timing.freq_mhz);
        self.regs.write_trise(timing.trise);

        self.regs.modify_cr1(|w| w.insert(Cr1::PE));

        debug!(
            "i2c{}: ccr={} freq={}MHz trise={}",
            self.id(),
            timing.ccr,
            timing.freq_mhz,
            timing.trise
        );
    }
}
