//! Modem control lines of a UART

use std::sync::Arc;

use peribus_hal::modem::{ModemControl, ModemSignal, SignalSet};
use peribus_hal::uart::UartTransport;

use super::{SignalChangeListener, SignalWatch, Uart};
use crate::error::{Error, Result};

fn unwatch<T: ModemControl>(transport: &mut T) {
    transport.unwatch_signals();
}

impl<T: UartTransport + ModemControl> Uart<T> {
    /// Drive DTR or RTS
    pub fn set_signal_state(&self, signal: ModemSignal, level: bool) -> Result<()> {
        if !signal.is_output() {
            return Err(Error::InvalidArgument("only DTR and RTS can be driven"));
        }
        let mut core = self.shared.handle.acquire()?;
        core.native
            .transport()
            .set_signal(signal, level)
            .map_err(Error::native)
    }

    /// Level of CTS, DCD, DSR or RI
    pub fn signal_state(&self, signal: ModemSignal) -> Result<bool> {
        if signal.is_output() {
            return Err(Error::InvalidArgument("only input lines can be sampled"));
        }
        let mut core = self.shared.handle.acquire()?;
        core.native.transport().signal(signal).map_err(Error::native)
    }

    /// Watch `signals` for level changes
    ///
    /// One listener per port; clear the current one first.
    pub fn set_signal_change_listener<L>(&self, signals: SignalSet, listener: L) -> Result<()>
    where
        L: SignalChangeListener + 'static,
    {
        if signals.is_empty() || !signals.is_subset_of(SignalSet::INPUTS) {
            return Err(Error::InvalidArgument("signals must be modem inputs"));
        }
        let mut guard = self.shared.handle.acquire_open()?;
        let core = &mut *guard;
        if core.signals.is_some() {
            return Err(Error::InvalidState("signal listener already registered"));
        }
        core.native
            .transport()
            .watch_signals(signals)
            .map_err(Error::native)?;
        core.signals = Some(SignalWatch {
            listener: Arc::new(listener),
            signals,
            unwatch: unwatch::<T>,
        });
        Ok(())
    }

    pub fn clear_signal_change_listener(&self) -> Result<()> {
        let mut guard = self.shared.handle.acquire_open()?;
        let core = &mut *guard;
        if core.signals.take().is_some() {
            core.native.transport().unwatch_signals();
        }
        Ok(())
    }
}
