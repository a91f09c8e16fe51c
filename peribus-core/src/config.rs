//! Peripheral configuration loading
//!
//! Parses a TOML document describing the comm port table and the
//! devices an application intends to open:
//!
//! ```toml
//! [manager]
//! comm_ports = ["ttyS0", "ttyUSB0"]
//!
//! [[i2c]]
//! name = "thermometer"
//! controller = 1
//! address = 0x48
//! frequency = 400000
//!
//! [[spi]]
//! name = "flash"
//! address = 0
//! mode = "mode3"
//!
//! [[uart]]
//! name = "console"
//! baudrate = 9600
//! ```
//!
//! Device entries are not opened here; the application looks them up
//! and hands the configuration to [`DeviceManager`](crate::DeviceManager).

use peribus_hal::i2c::I2cConfig;
use peribus_hal::spi::SpiConfig;
use peribus_hal::uart::UartConfig;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Whole configuration document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeripheralsConfig {
    pub manager: ManagerConfig,
    pub i2c: Vec<I2cEntry>,
    pub spi: Vec<SpiEntry>,
    pub uart: Vec<UartEntry>,
}

/// Device manager settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Serial port names; index 0 is the default UART
    pub comm_ports: Vec<String>,
}

/// Named I2C device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct I2cEntry {
    pub name: String,
    #[serde(flatten)]
    pub config: I2cConfig,
}

/// Named SPI device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpiEntry {
    pub name: String,
    #[serde(flatten)]
    pub config: SpiConfig,
}

/// Named serial port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UartEntry {
    pub name: String,
    #[serde(flatten)]
    pub config: UartConfig,
}

impl PeripheralsConfig {
    /// Parse and validate a TOML document
    pub fn parse(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every entry
    pub fn validate(&self) -> Result<()> {
        for entry in &self.i2c {
            if !entry.config.address_is_valid() {
                return Err(Error::InvalidConfig(format!(
                    "i2c {}: address {:#x} exceeds {:?} addressing",
                    entry.name, entry.config.address, entry.config.address_size
                )));
            }
        }
        for entry in &self.spi {
            if !(1..=32).contains(&entry.config.word_length) {
                return Err(Error::InvalidConfig(format!(
                    "spi {}: word length {} outside 1-32",
                    entry.name, entry.config.word_length
                )));
            }
        }
        for entry in &self.uart {
            if entry.config.baudrate == 0 {
                return Err(Error::InvalidConfig(format!(
                    "uart {}: baud rate must be positive",
                    entry.name
                )));
            }
        }

        let mut names: Vec<&str> = self
            .i2c
            .iter()
            .map(|e| e.name.as_str())
            .chain(self.spi.iter().map(|e| e.name.as_str()))
            .chain(self.uart.iter().map(|e| e.name.as_str()))
            .collect();
        names.sort_unstable();
        if let Some(dup) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(Error::InvalidConfig(format!("duplicate device name {}", dup[0])));
        }
        Ok(())
    }

    pub fn i2c(&self, name: &str) -> Option<&I2cConfig> {
        self.i2c.iter().find(|e| e.name == name).map(|e| &e.config)
    }

    pub fn spi(&self, name: &str) -> Option<&SpiConfig> {
        self.spi.iter().find(|e| e.name == name).map(|e| &e.config)
    }

    pub fn uart(&self, name: &str) -> Option<&UartConfig> {
        self.uart.iter().find(|e| e.name == name).map(|e| &e.config)
    }
}
