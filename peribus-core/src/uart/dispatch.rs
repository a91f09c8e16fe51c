//! Event dispatch thread
//!
//! The thread holds only a weak reference to the device, so dropping the
//! last [`Uart`](super::Uart) closes the port, which ends the event
//! stream and the thread with it.

use std::mem;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use peribus_hal::modem::ModemSignal;
use peribus_hal::uart::{EventSource, NativeEvent, UartTransport};
use peribus_hal::ErrorKind;

use super::rounds::{InputTarget, RoundCompletion};
use super::{OutputRoundListener, SignalChange, UartEvent, UartShared};
use crate::error::{Error, Result};
use crate::listener::guarded;

pub(crate) fn spawn<T>(shared: &Arc<UartShared<T>>, events: T::Events) -> Result<JoinHandle<()>>
where
    T: UartTransport + 'static,
{
    let weak = Arc::downgrade(shared);
    thread::Builder::new()
        .name(format!("uart-{}", shared.port))
        .spawn(move || run(weak, events))
        .map_err(|_| Error::Io(ErrorKind::Other))
}

fn run<T>(weak: Weak<UartShared<T>>, mut events: T::Events)
where
    T: UartTransport + 'static,
{
    debug!("uart: dispatcher running");

    while let Some(event) = events.next_event() {
        let Some(shared) = weak.upgrade() else {
            break;
        };
        shared.dispatch(event);
    }
    debug!("uart: dispatcher stopped");
}

impl<T: UartTransport> UartShared<T> {
    pub(crate) fn dispatch(&self, event: NativeEvent) {
        if let Some(kind) = event.kind() {
            let listener = match self.handle.acquire_open() {
                Ok(core) => core.listeners[kind.index()].clone(),
                Err(_) => return,
            };
            if let Some(listener) = listener {
                let event = UartEvent {
                    kind,
                    timestamp: Instant::now(),
                };
                guarded("uart event", || listener.event_dispatched(&event));
            }
        }

        match event {
            NativeEvent::DataAvailable { flush } => self.input_ready(flush),
            NativeEvent::InputOverrun => {
                if let Ok(mut core) = self.handle.acquire_open() {
                    if let Some(session) = core.reading.as_mut() {
                        session.overrun = true;
                    }
                }
            }
            NativeEvent::OutputEmpty { written } => self.output_done(written),
            NativeEvent::SignalChanged { signal, level } => self.signal_changed(signal, level),
            NativeEvent::Break | NativeEvent::ParityError | NativeEvent::FramingError => {}
        }
    }

    /// Pull received data into the read session
    ///
    /// Keeps reading while a round fills its buffer completely: the
    /// driver may hold more than one buffer's worth.
    fn input_ready(&self, mut flush: bool) {
        loop {
            let mut guard = match self.handle.acquire_open() {
                Ok(guard) => guard,
                Err(_) => return,
            };
            let core = &mut *guard;
            let trigger = core.trigger_level;
            let Some(session) = core.reading.as_mut() else {
                return;
            };

            let buffer = session.rounds.current().clone();
            let (start, remaining) = buffer.cursor();
            let mut scratch = vec![0u8; remaining];
            let n = match core.native.transport().read(&mut scratch) {
                Ok(n) => n.min(remaining),
                Err(err) => {
                    let err = Error::native(err);
                    warn!("uart: read failed: {}", err.label());
                    let listener = match &mut session.target {
                        InputTarget::Listener(listener) => listener.clone(),
                        InputTarget::Waiter { done } => {
                            // The blocked reader returns what it has
                            *done = true;
                            self.wake.notify_all();
                            return;
                        }
                    };
                    drop(guard);
                    guarded("input round", || listener.failed(&err));
                    return;
                }
            };
            buffer.commit(start, &scratch[..n]);

            let round = session.rounds.round_len();
            let complete = !buffer.has_remaining() || (trigger != 0 && round >= trigger) || flush;
            flush = false;
            if !complete {
                return;
            }

            let completion = RoundCompletion {
                buffer,
                count: round,
                fault: mem::take(&mut session.overrun),
            };
            match &mut session.target {
                InputTarget::Waiter { done } => {
                    *done = true;
                    self.wake.notify_all();
                    return;
                }
                InputTarget::Listener(listener) => {
                    let listener = listener.clone();
                    let id = session.id;
                    let double = session.rounds.is_double();
                    let mut more = false;
                    if double {
                        // Reception continues into the other buffer
                        session.rounds.switch();
                        more = session.rounds.current().has_remaining();
                    }
                    drop(guard);

                    guarded("input round", || listener.input_round_completed(&completion));

                    if !double {
                        let Ok(mut core) = self.handle.acquire_open() else {
                            return;
                        };
                        match core.reading.as_mut() {
                            Some(session) if session.id == id => {
                                session.rounds.restart();
                                more = session.rounds.current().has_remaining();
                            }
                            _ => return,
                        }
                    }

                    // A buffer left full is reported on the next event, not again now
                    if !more {
                        return;
                    }
                }
            }

            if n == 0 || n < remaining {
                return;
            }
        }
    }

    /// Account for a finished background write and start the next one
    fn output_done(&self, written: usize) {
        let mut guard = match self.handle.acquire_open() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        let core = &mut *guard;
        let Some(session) = core.writing.as_mut() else {
            return;
        };

        let buffer = session.rounds.current().clone();
        if let Some(start) = session.in_flight.take() {
            buffer.advance_from(start, written);
        }
        if buffer.has_remaining() {
            let (start, data) = buffer.window();
            let result = core.native.transport().start_write(&data);
            match result {
                Ok(()) => session.in_flight = Some(start),
                Err(err) => {
                    let listener = session.listener.clone();
                    drop(guard);
                    notify_write_failure(&listener, Error::native(err));
                }
            }
            return;
        }

        let count = session.rounds.round_len();
        let completion = RoundCompletion {
            buffer,
            count,
            fault: mem::take(&mut session.underrun),
        };
        let listener = session.listener.clone();
        let id = session.id;
        drop(guard);

        guarded("output round", || listener.output_round_completed(&completion));

        let mut guard = match self.handle.acquire_open() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        let core = &mut *guard;
        let Some(session) = core.writing.as_mut().filter(|s| s.id == id) else {
            return;
        };
        session.rounds.switch();

        let next = session.rounds.current().clone();
        let (start, data) = next.window();
        if data.is_empty() {
            session.underrun = true;
            if count == 0 {
                // Two empty rounds in a row: idle until stopped
                debug!("uart: write session idle");
                return;
            }
            // An empty write makes the driver report completion again,
            // giving the listener one more round to supply data
        }
        if let Err(err) = core.native.transport().start_write(&data) {
            drop(guard);
            notify_write_failure(&listener, Error::native(err));
            return;
        }
        session.in_flight = Some(start);
    }

    fn signal_changed(&self, signal: ModemSignal, level: bool) {
        let listener = match self.handle.acquire_open() {
            Ok(core) => core
                .signals
                .as_ref()
                .filter(|watch| watch.signals.contains(signal))
                .map(|watch| watch.listener.clone()),
            Err(_) => return,
        };
        if let Some(listener) = listener {
            let change = SignalChange {
                signal,
                level,
                timestamp: Instant::now(),
            };
            guarded("signal change", || listener.signal_changed(&change));
        }
    }
}

fn notify_write_failure(listener: &Arc<dyn OutputRoundListener>, err: Error) {
    warn!("uart: background write failed: {}", err.label());
    guarded("output round", || listener.failed(&err));
}
