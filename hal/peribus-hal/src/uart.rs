//! UART serial communication abstractions
//!
//! A UART handle performs data transfer and line configuration
//! directly, and reports asynchronous conditions (data arrived, output
//! drained, line errors) through an [`EventSource`] the engine drains on
//! its own dispatch thread.

use core::time::Duration;

use heapless::String;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::modem::ModemSignal;
use crate::transport::{AccessMode, Transport};

/// Maximum length of a UART controller name
pub const CONTROLLER_NAME_LEN: usize = 16;

/// Condition reported by the native driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NativeEvent {
    /// Received data is waiting in the driver's input buffer
    ///
    /// `flush` asks the engine to complete the current read round even
    /// if its buffer is not full (idle line detected).
    DataAvailable { flush: bool },
    /// Input buffer overrun
    InputOverrun,
    /// An asynchronous write started with
    /// [`UartTransport::start_write`] has finished
    OutputEmpty { written: usize },
    /// Break condition on the line
    Break,
    /// Parity error
    ParityError,
    /// Framing error
    FramingError,
    /// A watched modem input line changed level
    SignalChanged { signal: ModemSignal, level: bool },
}

impl NativeEvent {
    /// Application-level event kind, `None` for modem notifications
    pub const fn kind(&self) -> Option<EventKind> {
        match self {
            NativeEvent::DataAvailable { .. } => Some(EventKind::InputDataAvailable),
            NativeEvent::InputOverrun => Some(EventKind::InputBufferOverrun),
            NativeEvent::OutputEmpty { .. } => Some(EventKind::OutputBufferEmpty),
            NativeEvent::Break => Some(EventKind::BreakInterrupt),
            NativeEvent::ParityError => Some(EventKind::ParityError),
            NativeEvent::FramingError => Some(EventKind::FramingError),
            NativeEvent::SignalChanged { .. } => None,
        }
    }
}

/// Event kinds an application can listen for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EventKind {
    /// Input data available
    InputDataAvailable,
    /// Input buffer overrun
    InputBufferOverrun,
    /// Output buffer empty
    OutputBufferEmpty,
    /// Break interrupt
    BreakInterrupt,
    /// Parity error
    ParityError,
    /// Framing error
    FramingError,
}

impl EventKind {
    /// Number of event kinds
    pub const COUNT: usize = 6;

    /// All event kinds, in index order
    pub const ALL: [EventKind; Self::COUNT] = [
        EventKind::InputDataAvailable,
        EventKind::InputBufferOverrun,
        EventKind::OutputBufferEmpty,
        EventKind::BreakInterrupt,
        EventKind::ParityError,
        EventKind::FramingError,
    ];

    /// Dense index for per-kind tables
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Stream of native events for one open UART
pub trait EventSource: Send {
    /// Block until the next event
    ///
    /// Returns `None` once the handle has been closed.
    fn next_event(&mut self) -> Option<NativeEvent>;
}

/// Open native handle to one UART
pub trait UartTransport: Transport {
    /// Event stream type
    type Events: EventSource + 'static;

    /// Take the event stream; only the first call returns it
    fn take_events(&mut self) -> Option<Self::Events>;

    /// Copy already received data into `buf` without blocking
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Write `data`, blocking until the driver accepted it
    ///
    /// Returns the number of bytes written.
    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error>;

    /// Start writing `data` in the background
    ///
    /// Completion is reported with [`NativeEvent::OutputEmpty`].
    fn start_write(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Abort a background write
    fn stop_writing(&mut self);

    /// Enable delivery of `kind` events
    ///
    /// Subscribing to [`EventKind::InputDataAvailable`] while data is
    /// already buffered reports it immediately.
    fn subscribe(&mut self, kind: EventKind) -> Result<(), Self::Error>;

    /// Disable delivery of `kind` events
    fn unsubscribe(&mut self, kind: EventKind);

    /// Current baud rate
    fn baud_rate(&mut self) -> Result<u32, Self::Error>;

    /// Set the baud rate
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), Self::Error>;

    /// Current data bits per character
    fn data_bits(&mut self) -> Result<DataBits, Self::Error>;

    /// Set the data bits per character
    fn set_data_bits(&mut self, data_bits: DataBits) -> Result<(), Self::Error>;

    /// Current parity
    fn parity(&mut self) -> Result<Parity, Self::Error>;

    /// Set the parity
    fn set_parity(&mut self, parity: Parity) -> Result<(), Self::Error>;

    /// Current stop bits
    fn stop_bits(&mut self) -> Result<StopBits, Self::Error>;

    /// Set the stop bits
    fn set_stop_bits(&mut self, stop_bits: StopBits) -> Result<(), Self::Error>;

    /// Current flow control mode
    fn flow_control(&mut self) -> Result<FlowControl, Self::Error>;

    /// Set the flow control mode
    fn set_flow_control(&mut self, flow_control: FlowControl) -> Result<(), Self::Error>;

    /// Hold the line in break state for `duration`
    ///
    /// Drivers without break support return an error of kind
    /// [`ErrorKind::Unsupported`](crate::ErrorKind::Unsupported).
    fn send_break(&mut self, duration: Duration) -> Result<(), Self::Error>;
}

/// Factory for UART handles
pub trait UartDriver {
    /// Handle type produced by this driver
    type Transport: UartTransport;

    /// Open the named serial port
    fn open(
        &self,
        port: &str,
        config: &UartConfig,
    ) -> Result<Self::Transport, <Self::Transport as crate::ErrorType>::Error>;
}

/// UART configuration
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct UartConfig {
    /// Index into the comm port list, `None` for the first port
    pub controller: Option<u32>,
    /// Explicit port name, overrides `controller`
    pub controller_name: Option<String<CONTROLLER_NAME_LEN>>,
    /// Baud rate in bits per second
    pub baudrate: u32,
    /// Number of data bits
    pub data_bits: DataBits,
    /// Parity mode
    pub parity: Parity,
    /// Number of stop bits
    pub stop_bits: StopBits,
    /// Flow control mode
    pub flow_control: FlowControl,
    /// Access mode
    pub access: AccessMode,
}

impl Default for UartConfig {
    fn default() -> Self {
        Self {
            controller: None,
            controller_name: None,
            baudrate: 115200,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            access: AccessMode::Exclusive,
        }
    }
}

/// Number of data bits per frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DataBits {
    Five,
    Six,
    Seven,
    #[default]
    Eight,
    Nine,
}

/// Parity mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
    Mark,
    Space,
}

/// Number of stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum StopBits {
    #[default]
    One,
    OnePointFive,
    Two,
}

/// Flow control mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FlowControl {
    #[default]
    None,
    /// Hardware handshake on RTS/CTS
    RtsCts,
    /// Software handshake
    XonXoff,
}
