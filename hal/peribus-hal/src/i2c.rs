//! I2C bus abstractions
//!
//! Provides the native transfer primitive the engine uses for single
//! transfers and combined messages.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::transport::{AccessMode, Transport};

/// Position of one native transfer within a bus sequence
///
/// `Start`, `Body` and `End` keep the bus held between transfers
/// (repeated start instead of stop).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Frame {
    /// Stand-alone transfer: start condition, data, stop condition
    Regular,
    /// First transfer of a combined message
    Start,
    /// Transfer in the middle of a combined message
    Body,
    /// Last transfer of a combined message
    End,
}

impl Frame {
    /// Frame for step `index` of a message with `len` steps
    pub const fn for_step(index: usize, len: usize) -> Self {
        if len <= 1 {
            Frame::Regular
        } else if index == 0 {
            Frame::Start
        } else if index + 1 == len {
            Frame::End
        } else {
            Frame::Body
        }
    }
}

/// Direction and data of one native transfer
#[derive(Debug)]
pub enum I2cOp<'a> {
    /// Receive into the slice
    Read(&'a mut [u8]),
    /// Send the slice
    Write(&'a [u8]),
}

impl I2cOp<'_> {
    /// Number of bytes requested
    pub fn len(&self) -> usize {
        match self {
            I2cOp::Read(buf) => buf.len(),
            I2cOp::Write(data) => data.len(),
        }
    }

    /// True if no bytes are requested
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Open native handle to one I2C slave
pub trait I2cTransport: Transport {
    /// Perform one transfer with the slave the handle was opened for
    ///
    /// Returns the number of bytes actually transferred, which may be
    /// less than requested (the slave ended the read early or NACKed
    /// part of a write).
    fn transfer(&mut self, frame: Frame, op: I2cOp<'_>) -> Result<usize, Self::Error>;
}

/// Factory for I2C handles
pub trait I2cDriver {
    /// Handle type produced by this driver
    type Transport: I2cTransport;

    /// Open a handle for the configured slave
    fn open(
        &self,
        config: &I2cConfig,
    ) -> Result<Self::Transport, <Self::Transport as crate::ErrorType>::Error>;
}

/// Slave address width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum AddressSize {
    /// 7-bit addressing
    #[default]
    Seven,
    /// 10-bit addressing
    Ten,
}

impl AddressSize {
    /// Largest address representable with this width
    pub const fn max_address(self) -> u16 {
        match self {
            AddressSize::Seven => 0x7F,
            AddressSize::Ten => 0x3FF,
        }
    }
}

/// I2C configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct I2cConfig {
    /// Bus controller number, `None` for the platform default
    pub controller: Option<u32>,
    /// Slave address
    pub address: u16,
    /// Slave address width
    pub address_size: AddressSize,
    /// Clock frequency in Hz
    pub frequency: u32,
    /// Access mode
    pub access: AccessMode,
}

impl Default for I2cConfig {
    fn default() -> Self {
        Self::new(0)
    }
}

impl I2cConfig {
    /// Standard mode (100 kHz)
    pub const STANDARD: u32 = 100_000;

    /// Fast mode (400 kHz)
    pub const FAST: u32 = 400_000;

    /// Fast mode plus (1 MHz)
    pub const FAST_PLUS: u32 = 1_000_000;

    /// Exclusive standard-mode configuration for a 7-bit slave on the
    /// default controller
    pub const fn new(address: u16) -> Self {
        Self {
            controller: None,
            address,
            address_size: AddressSize::Seven,
            frequency: Self::STANDARD,
            access: AccessMode::Exclusive,
        }
    }

    /// Same configuration with a different clock frequency
    pub const fn with_frequency(mut self, frequency: u32) -> Self {
        self.frequency = frequency;
        self
    }

    /// Same configuration on a specific controller
    pub const fn with_controller(mut self, controller: u32) -> Self {
        self.controller = Some(controller);
        self
    }

    /// Same configuration opened in shared mode
    pub const fn shared(mut self) -> Self {
        self.access = AccessMode::Shared;
        self
    }

    /// True if the address fits the configured width
    pub const fn address_is_valid(&self) -> bool {
        self.address <= self.address_size.max_address()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_for_step() {
        assert_eq!(Frame::for_step(0, 1), Frame::Regular);
        assert_eq!(Frame::for_step(0, 3), Frame::Start);
        assert_eq!(Frame::for_step(1, 3), Frame::Body);
        assert_eq!(Frame::for_step(2, 3), Frame::End);
        assert_eq!(Frame::for_step(1, 2), Frame::End);
    }

    #[test]
    fn test_address_validation() {
        assert!(I2cConfig::new(0x7F).address_is_valid());
        assert!(!I2cConfig::new(0x80).address_is_valid());

        let mut config = I2cConfig::new(0x2A0);
        config.address_size = AddressSize::Ten;
        assert!(config.address_is_valid());
    }
}
