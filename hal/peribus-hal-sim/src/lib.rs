//! Simulated drivers for the Peribus engine
//!
//! This crate implements every `peribus-hal` transport trait against
//! in-memory peripherals so the engine can be exercised on a host:
//!
//! - [`i2c::SimI2cBus`] - I2C bus with scripted slave responses
//! - [`spi::SimSpiBus`] - SPI bus with a loopback or scripted slave
//! - [`uart::SimSerial`] - Serial ports with an event stream and modem lines
//!
//! Every simulated bus keeps a record of the native calls it saw, which
//! tests compare against the expected bus traffic.
//!
//! # Features
//!
//! None. The crate requires `std`.

pub mod error;
pub mod i2c;
pub mod spi;
pub mod uart;

pub use error::SimError;
pub use i2c::{I2cRecord, SimI2c, SimI2cBus};
pub use spi::{SimSpi, SimSpiBus, SpiRecord};
pub use uart::{SimEvents, SimSerial, SimUart, SimUartPort};
