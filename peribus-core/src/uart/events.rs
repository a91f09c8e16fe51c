//! UART event and signal listeners

use std::time::Instant;

use peribus_hal::modem::ModemSignal;
use peribus_hal::uart::EventKind;

/// Event delivered to a [`UartEventListener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UartEvent {
    pub kind: EventKind,
    /// When the dispatcher picked the event up
    pub timestamp: Instant,
}

/// Receives events of one kind
///
/// Runs on the dispatch thread, before any round bookkeeping the event
/// triggers.
pub trait UartEventListener: Send + Sync {
    fn event_dispatched(&self, event: &UartEvent);
}

impl<F> UartEventListener for F
where
    F: Fn(&UartEvent) + Send + Sync,
{
    fn event_dispatched(&self, event: &UartEvent) {
        self(event)
    }
}

/// Level change of a modem input line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalChange {
    pub signal: ModemSignal,
    pub level: bool,
    pub timestamp: Instant,
}

/// Receives modem line changes
pub trait SignalChangeListener: Send + Sync {
    fn signal_changed(&self, change: &SignalChange);
}

impl<F> SignalChangeListener for F
where
    F: Fn(&SignalChange) + Send + Sync,
{
    fn signal_changed(&self, change: &SignalChange) {
        self(change)
    }
}
