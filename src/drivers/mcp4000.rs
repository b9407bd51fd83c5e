//! MCP4xxx Digital Potentiometer Driver
//!
//! The stimulus amplitude is set by a dual-wiper MCP4251 (any MCP41xx/42xx part with the
//! same register map works). Both wipers always carry the same code so the two
//! stimulation channels see the same gain.
//!
//! # Wire format
//!
//! Every write is two bytes: `[address << 4 | command << 2 | d9:d8, d7:d0]`. Only the
//! write command (0b00) and 8-bit codes are used, so the first byte is just
//! `address << 4`.

use embedded_hal::spi::SpiDevice;

use crate::hal::GainDriver;

/// Volatile wiper 0 register.
const REG_WIPER0: u8 = 0x00;

/// Volatile wiper 1 register.
const REG_WIPER1: u8 = 0x01;

/// Terminal control register.
const REG_TCON: u8 = 0x04;

/// TCON: every terminal of both resistor networks connected, hardware shutdown pin
/// ignored.
const TCON_CONNECTED: u8 = 0xFF;

/// TCON: every terminal disconnected.
const TCON_DISCONNECTED: u8 = 0x00;

/// MCP4xxx driver using embedded-hal SPI traits.
pub struct Mcp4000<SPI> {
    spi: SPI,
    code: u8,
}

impl<SPI, E> Mcp4000<SPI>
where
    SPI: SpiDevice<u8, Error = E>,
{
    /// Create the driver and connect the resistor networks.
    pub fn new(spi: SPI) -> Result<Self, E> {
        let mut pot = Self { spi, code: 0 };
        pot.write_register(REG_TCON, TCON_CONNECTED)?;
        Ok(pot)
    }

    /// Write one register.
    pub fn write_register(&mut self, register: u8, value: u8) -> Result<(), E> {
        self.spi.write(&[register << 4, value])
    }

    /// Set both wipers to `code` (0 = terminal B, 255 = near terminal A).
    pub fn set_wipers(&mut self, code: u8) -> Result<(), E> {
        self.write_register(REG_WIPER0, code)?;
        self.write_register(REG_WIPER1, code)?;
        self.code = code;
        Ok(())
    }

    /// Last code written to the wipers.
    pub fn code(&self) -> u8 {
        self.code
    }

    /// Release the SPI device.
    pub fn release(self) -> SPI {
        self.spi
    }
}

impl<SPI, E> GainDriver for Mcp4000<SPI>
where
    SPI: SpiDevice<u8, Error = E>,
    E: core::fmt::Debug,
{
    type Error = E;

    fn set_code(&mut self, code: u8) -> Result<(), E> {
        self.set_wipers(code)
    }

    fn shutdown(&mut self) -> Result<(), E> {
        self.write_register(REG_TCON, TCON_DISCONNECTED)
    }

    /// Reconnect the networks and restore the last wiper code.
    fn wake(&mut self) -> Result<(), E> {
        self.write_register(REG_TCON, TCON_CONNECTED)?;
        self.set_wipers(self.code)
    }
}
