//! Peribus Hardware Abstraction Layer
//!
//! This crate defines the capability traits a native peripheral driver
//! implements so the Peribus engine can drive it. The engine never talks
//! to registers itself: every bus access ends in one of these traits,
//! which lets the same engine run against real drivers or the simulated
//! driver in `peribus-hal-sim`.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  Application (sensor drivers, etc.)     │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  peribus-core (transfer engine)         │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  peribus-hal (this crate - traits)      │
//! └─────────────────────────────────────────┘
//!                     │
//!         ┌───────────┴───────────┐
//!         ▼                       ▼
//! ┌───────────────┐       ┌───────────────┐
//! │ native driver │       │ peribus-hal-  │
//! │   bindings    │       │     sim       │
//! └───────────────┘       └───────────────┘
//! ```
//!
//! # Traits
//!
//! - [`Transport`] - Common handle operations (advisory lock, close)
//! - [`i2c::I2cTransport`], [`i2c::I2cDriver`] - I2C transfers with combined-message framing
//! - [`spi::SpiTransport`], [`spi::SpiDriver`] - Full-duplex SPI with transaction demarcation
//! - [`uart::UartTransport`], [`uart::UartDriver`] - UART I/O with a native event stream
//! - [`modem::ModemControl`] - Modem control lines on UARTs that have them

#![no_std]
#![deny(unsafe_code)]

pub mod error;
pub mod i2c;
pub mod modem;
pub mod spi;
pub mod transport;
pub mod uart;

// Re-export key traits at crate root for convenience
pub use error::{Error, ErrorKind, ErrorType};
pub use i2c::{I2cConfig, I2cDriver, I2cTransport};
pub use modem::ModemControl;
pub use spi::{SpiConfig, SpiDriver, SpiTransport};
pub use transport::{AccessMode, Transport};
pub use uart::{EventSource, NativeEvent, UartConfig, UartDriver, UartTransport};
