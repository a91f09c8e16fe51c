//! Peribus transfer engine
//!
//! Turns the native driver traits of `peribus-hal` into device handles
//! applications program against:
//!
//! - I2C slaves with sub-addressed transfers and combined messages
//! - SPI slaves with composite messages and explicit transactions
//! - UARTs with blocking I/O, event listeners and double-buffered rounds
//! - A [`DeviceManager`] tying handle identity, security checks and the
//!   serial port table together
//! - TOML peripheral configuration
//! - `embedded-hal` and `embedded-io` trait implementations
//!
//! Every transfer moves bytes between the bus and a [`Buffer`], whose
//! position advances by the number of bytes actually transferred.

#![deny(unsafe_code)]

#[macro_use]
mod fmt;

mod adapters;
mod handle;
mod listener;

pub mod buffer;
pub mod config;
pub mod error;
pub mod i2c;
pub mod manager;
pub mod power;
pub mod security;
pub mod spi;
pub mod uart;

pub use buffer::{encode_subaddress, Buffer};
pub use config::PeripheralsConfig;
pub use error::{Error, Result, Unavailable};
pub use handle::HandleId;
pub use i2c::{CombinedMessage, I2cBus, I2cDevice};
pub use manager::DeviceManager;
pub use power::{PowerGate, PowerState};
pub use security::{AllowAll, BusKind, SecurityPolicy};
pub use spi::{CompositeMessage, SpiDevice, TransactionId};
pub use uart::Uart;

pub use peribus_hal;
