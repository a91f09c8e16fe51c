//! UART engine
//!
//! Each open port gets a dispatch thread that drains the native event
//! stream. Event listeners run first, then the event drives the read or
//! write session: a round completes when its buffer fills (read), drains
//! (write), reaches the receive trigger level or the driver reports an
//! idle line. With two buffers, a read session switches before notifying
//! so reception continues into the other buffer; a write session
//! notifies first and switches afterwards, so the just-sent buffer can be
//! refilled by the listener.
//!
//! The blocking [`Uart::read`] runs as an internal read session the
//! caller waits on, so it shares the round rules with asynchronous
//! reads.

mod device;
mod dispatch;
mod events;
mod modem;
mod rounds;

pub use device::Uart;
pub use events::{SignalChange, SignalChangeListener, UartEvent, UartEventListener};
pub use rounds::{InputRoundListener, OutputRoundListener, RoundCompletion};

use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use peribus_hal::modem::SignalSet;
use peribus_hal::uart::{EventKind, UartConfig, UartTransport};

use crate::error::{Error, Result};
use crate::handle::{Handle, HandleId, Native};
use rounds::{ReadSession, WriteSession};

/// Watched modem lines and how to stop watching them
pub(crate) struct SignalWatch<T> {
    pub listener: Arc<dyn SignalChangeListener>,
    pub signals: SignalSet,
    pub unwatch: fn(&mut T),
}

/// State behind the handle lock
pub(crate) struct UartCore<T: UartTransport> {
    pub native: Native<T>,
    pub reading: Option<ReadSession>,
    pub writing: Option<WriteSession>,
    pub listeners: [Option<Arc<dyn UartEventListener>>; EventKind::COUNT],
    /// Users of each native subscription: listener and sessions
    subscriptions: [u32; EventKind::COUNT],
    pub trigger_level: usize,
    pub receive_timeout: Option<Duration>,
    pub signals: Option<SignalWatch<T>>,
    next_session: u64,
}

impl<T: UartTransport> UartCore<T> {
    fn new(native: Native<T>) -> Self {
        Self {
            native,
            reading: None,
            writing: None,
            listeners: Default::default(),
            subscriptions: [0; EventKind::COUNT],
            trigger_level: 0,
            receive_timeout: None,
            signals: None,
            next_session: 0,
        }
    }

    pub fn next_session_id(&mut self) -> u64 {
        self.next_session += 1;
        self.next_session
    }

    /// Enable native delivery of `kind` for one more user
    ///
    /// The native subscribe is repeated for every user so a driver with
    /// buffered input reports it to the newcomer.
    pub fn subscribe(&mut self, kind: EventKind) -> Result<()> {
        self.native
            .transport()
            .subscribe(kind)
            .map_err(Error::native)?;
        self.subscriptions[kind.index()] += 1;
        Ok(())
    }

    /// Drop one user of `kind`; the last one disables native delivery
    pub fn unsubscribe(&mut self, kind: EventKind) {
        let users = &mut self.subscriptions[kind.index()];
        if *users == 0 {
            return;
        }
        *users -= 1;
        if *users == 0 {
            self.native.transport().unsubscribe(kind);
        }
    }

    pub fn stop_read_session(&mut self) {
        if self.reading.take().is_some() {
            self.unsubscribe(EventKind::InputDataAvailable);
        }
    }

    pub fn stop_write_session(&mut self) {
        if self.writing.take().is_some() {
            self.native.transport().stop_writing();
            self.unsubscribe(EventKind::OutputBufferEmpty);
        }
    }
}

pub(crate) struct UartShared<T: UartTransport> {
    pub handle: Handle<UartCore<T>>,
    /// Signalled when a blocking read's round completes or the port closes
    pub wake: Condvar,
    pub port: String,
    pub config: UartConfig,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    dispatch_thread: OnceLock<ThreadId>,
}

impl<T: UartTransport> UartShared<T> {
    fn new(id: HandleId, transport: T, config: UartConfig, port: String) -> Self {
        let native = Native::new(transport, config.access);
        Self {
            handle: Handle::new(id, UartCore::new(native)),
            wake: Condvar::new(),
            port,
            config,
            dispatcher: Mutex::new(None),
            dispatch_thread: OnceLock::new(),
        }
    }

    pub fn on_dispatch_thread(&self) -> bool {
        self.dispatch_thread.get() == Some(&thread::current().id())
    }

    /// Stop sessions, drop listeners, release the port, then wait for
    /// the dispatcher to drain
    ///
    /// Called from a listener, the dispatcher is left to exit on its own.
    fn close(&self) {
        if let Some(mut guard) = self.handle.begin_close() {
            let core = &mut *guard;
            core.stop_read_session();
            core.stop_write_session();
            core.listeners = Default::default();
            if let Some(watch) = core.signals.take() {
                (watch.unwatch)(core.native.transport());
            }
            core.native.close();
            self.wake.notify_all();
            info!("uart: closed {}", self.port.as_str());
        }

        if self.on_dispatch_thread() {
            return;
        }
        if let Some(dispatcher) = self.dispatcher.lock().take() {
            if dispatcher.join().is_err() {
                warn!("uart: dispatcher of {} panicked", self.port.as_str());
            }
        }
    }
}

impl<T: UartTransport> Drop for UartShared<T> {
    fn drop(&mut self) {
        self.close();
    }
}
