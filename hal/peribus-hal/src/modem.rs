//! Modem control lines
//!
//! Implemented by UART handles wired to a modem (DTR, RTS outputs and
//! CTS, DCD, DSR, RI inputs). Level changes of watched inputs arrive
//! as [`NativeEvent::SignalChanged`](crate::NativeEvent::SignalChanged).

use crate::transport::Transport;

/// One modem control line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ModemSignal {
    /// Data Terminal Ready (output)
    Dtr,
    /// Request To Send (output)
    Rts,
    /// Clear To Send (input)
    Cts,
    /// Data Carrier Detect (input)
    Dcd,
    /// Data Set Ready (input)
    Dsr,
    /// Ring Indicator (input)
    Ri,
}

impl ModemSignal {
    /// Bit of this line in a [`SignalSet`]
    pub const fn bit(self) -> u8 {
        match self {
            ModemSignal::Dtr => 0x01,
            ModemSignal::Rts => 0x02,
            ModemSignal::Cts => 0x04,
            ModemSignal::Dcd => 0x08,
            ModemSignal::Dsr => 0x10,
            ModemSignal::Ri => 0x20,
        }
    }

    /// True for lines driven by this side
    pub const fn is_output(self) -> bool {
        matches!(self, ModemSignal::Dtr | ModemSignal::Rts)
    }
}

/// Set of modem lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SignalSet(u8);

impl SignalSet {
    /// No lines
    pub const EMPTY: Self = Self(0);

    /// Every input line
    pub const INPUTS: Self = Self(0x04 | 0x08 | 0x10 | 0x20);

    /// Set containing one line
    pub const fn of(signal: ModemSignal) -> Self {
        Self(signal.bit())
    }

    /// Union with another line
    pub const fn with(self, signal: ModemSignal) -> Self {
        Self(self.0 | signal.bit())
    }

    /// True if `signal` is in the set
    pub const fn contains(self, signal: ModemSignal) -> bool {
        self.0 & signal.bit() != 0
    }

    /// True if no line is in the set
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if every line in the set is also in `other`
    pub const fn is_subset_of(self, other: Self) -> bool {
        self.0 & !other.0 == 0
    }

    /// Raw bit mask
    pub const fn bits(self) -> u8 {
        self.0
    }
}

/// Modem control line access
pub trait ModemControl: Transport {
    /// Drive an output line
    fn set_signal(&mut self, signal: ModemSignal, level: bool) -> Result<(), Self::Error>;

    /// Sample an input line
    fn signal(&mut self, signal: ModemSignal) -> Result<bool, Self::Error>;

    /// Report level changes of the lines in `signals`
    fn watch_signals(&mut self, signals: SignalSet) -> Result<(), Self::Error>;

    /// Stop reporting level changes
    fn unwatch_signals(&mut self);
}
