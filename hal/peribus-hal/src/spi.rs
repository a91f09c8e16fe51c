//! SPI bus abstractions
//!
//! Provides the full-duplex exchange primitive and transaction
//! demarcation the engine builds composite messages on.

use core::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::transport::{AccessMode, Transport};

/// Open native handle to one SPI slave
pub trait SpiTransport: Transport {
    /// Transfer word length in bits (1-32 for usable devices)
    fn word_length(&self) -> u8;

    /// Keep chip select asserted until [`end`](Self::end)
    fn begin(&mut self) -> Result<(), Self::Error>;

    /// Release chip select
    ///
    /// Drivers with write-behind semantics complete deferred exchanges
    /// here; received data is final only after this returns.
    fn end(&mut self) -> Result<(), Self::Error>;

    /// Clock `tx` out while capturing into `rx`
    ///
    /// When `rx` is given it has the same length as `tx`. Returns the
    /// number of bytes exchanged.
    fn exchange(&mut self, tx: &[u8], rx: Option<&mut [u8]>) -> Result<usize, Self::Error>;

    /// Hold the bus idle for `duration` inside a transaction
    fn delay(&mut self, duration: Duration) -> Result<(), Self::Error>;
}

/// Factory for SPI handles
pub trait SpiDriver {
    /// Handle type produced by this driver
    type Transport: SpiTransport;

    /// Open a handle for the configured slave
    fn open(
        &self,
        config: &SpiConfig,
    ) -> Result<Self::Transport, <Self::Transport as crate::ErrorType>::Error>;
}

/// SPI configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SpiConfig {
    /// Bus controller number, `None` for the platform default
    pub controller: Option<u32>,
    /// Chip select address, `None` for the platform default
    pub address: Option<u32>,
    /// Chip select level while the slave is addressed
    pub cs_active: CsActive,
    /// Clock frequency in Hz
    pub frequency: u32,
    /// Clock mode
    pub mode: Mode,
    /// Transfer word length in bits
    pub word_length: u8,
    /// Bit order on the wire
    pub bit_order: BitOrder,
    /// Access mode
    pub access: AccessMode,
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            controller: None,
            address: None,
            cs_active: CsActive::Low,
            frequency: 1_000_000, // 1 MHz
            mode: Mode::Mode0,
            word_length: 8,
            bit_order: BitOrder::MsbFirst,
            access: AccessMode::Exclusive,
        }
    }
}

impl SpiConfig {
    /// Clock polarity and phase of the configured mode
    pub fn polarity_phase(&self) -> (Polarity, Phase) {
        self.mode.into()
    }
}

/// Chip select signalling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CsActive {
    /// Active low
    #[default]
    Low,
    /// Active high
    High,
    /// Chip select is driven by the application
    NotControlled,
}

/// Bit order on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum BitOrder {
    /// Most significant bit first
    #[default]
    MsbFirst,
    /// Least significant bit first
    LsbFirst,
}

/// SPI clock polarity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Polarity {
    /// Clock idles low (CPOL=0)
    IdleLow,
    /// Clock idles high (CPOL=1)
    IdleHigh,
}

/// SPI clock phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    /// Data captured on first clock transition (CPHA=0)
    CaptureOnFirstTransition,
    /// Data captured on second clock transition (CPHA=1)
    CaptureOnSecondTransition,
}

/// SPI mode (combined polarity and phase)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Mode {
    /// Mode 0: CPOL=0, CPHA=0
    #[default]
    Mode0,
    /// Mode 1: CPOL=0, CPHA=1
    Mode1,
    /// Mode 2: CPOL=1, CPHA=0
    Mode2,
    /// Mode 3: CPOL=1, CPHA=1
    Mode3,
}

impl From<Mode> for (Polarity, Phase) {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Mode0 => (Polarity::IdleLow, Phase::CaptureOnFirstTransition),
            Mode::Mode1 => (Polarity::IdleLow, Phase::CaptureOnSecondTransition),
            Mode::Mode2 => (Polarity::IdleHigh, Phase::CaptureOnFirstTransition),
            Mode::Mode3 => (Polarity::IdleHigh, Phase::CaptureOnSecondTransition),
        }
    }
}
