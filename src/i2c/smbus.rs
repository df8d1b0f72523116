use super::{Error, I2c, TransferFlags};
use crate::delay::Clock;
use crate::gpio::BusPin;
use crate::lock::PortLock;
use crate::peripheral::Registers;

/// Longest SMBus block, count byte included.
pub const SMBUS_MAX_BLOCK: usize = 32;

impl<R, P, C, L, const N: usize> I2c<R, P, C, L, N>
where
    R: Registers,
    P: BusPin,
    C: Clock,
    L: PortLock,
{
    /// Read an SMBus block from register `offset` as a NUL-terminated string.
    ///
    /// `data.len()` bytes are read (1 to [`SMBUS_MAX_BLOCK`]). The first one is
    /// the block length the slave declares; it is clamped to fit, the block is
    /// moved to the front of `data` and a 0 is written after it. The port lock
    /// is taken for the transaction, so the caller must not already hold it.
    pub fn read_string(&mut self, port: u8, address: u8, offset: u8, data: &mut [u8]) -> Result<(), Error> {
        if data.is_empty() || data.len() > SMBUS_MAX_BLOCK {
            return Err(Error::InvalidArgument);
        }
        self.index_of(port)?;

        self.locks.lock(port);

        let result = self.transfer(port, address, &[offset], data, TransferFlags::SINGLE);
        if result.is_ok() {
            let block_len = usize::from(data[0]).min(data.len() - 1);
            data.copy_within(1..=block_len, 0);
            data[block_len] = 0;
        }

        self.locks.unlock(port);
        result
    }
}
