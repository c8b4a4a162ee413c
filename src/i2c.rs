//! `RegisterIo` over a blocking `embedded-hal` I2C bus.

use crate::io::RegisterIo;
use crate::registers::{addr, DeviceCntl0, AUTO_INCREMENT, DEFAULT_I2C_ADDRESS};

/// I2C transport for the PCA9482 register file.
pub struct I2cRegisterIo<I2C> {
    i2c: I2C,
    address: u8,
}

impl<I2C> I2cRegisterIo<I2C> {
    /// Create a transport with the default I2C address (0x57).
    pub fn new(i2c: I2C) -> Self {
        Self {
            i2c,
            address: DEFAULT_I2C_ADDRESS,
        }
    }

    /// Create a transport with a custom I2C address.
    pub fn with_address(i2c: I2C, address: u8) -> Self {
        Self { i2c, address }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Release the bus.
    pub fn free(self) -> I2C {
        self.i2c
    }
}

impl<I2C> RegisterIo for I2cRegisterIo<I2C>
where
    I2C: embedded_hal::i2c::I2c,
{
    type Error = I2C::Error;

    fn read(&mut self, reg: u8) -> Result<u8, Self::Error> {
        let mut buf = [0u8; 1];
        self.i2c.write_read(self.address, &[reg], &mut buf)?;
        Ok(buf[0])
    }

    fn write(&mut self, reg: u8, value: u8) -> Result<(), Self::Error> {
        self.i2c.write(self.address, &[reg, value])
    }

    fn bulk_read(&mut self, reg: u8, buf: &mut [u8]) -> Result<(), Self::Error> {
        self.i2c.write_read(self.address, &[reg | AUTO_INCREMENT], buf)
    }

    fn soft_reset(&mut self) -> Result<(), Self::Error> {
        // Self-clearing.
        self.write(addr::DEVICE_CNTL_0, DeviceCntl0::SOFT_RESET.bits())
    }
}
