use std::sync::Arc;
use std::time::{Duration, Instant};

use peribus_hal::uart::{
    DataBits, EventKind, FlowControl, Parity, StopBits, UartConfig, UartTransport,
};

use super::rounds::{InputTarget, ReadSession, RoundBuffers, WriteSession};
use super::{dispatch, InputRoundListener, OutputRoundListener, UartEventListener, UartShared};
use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::handle::HandleId;
use crate::power::PowerGate;

/// Open serial port
///
/// Cloning yields another handle to the same port. The port closes on
/// [`close`](Self::close) or when the last handle is dropped.
pub struct Uart<T: UartTransport> {
    pub(crate) shared: Arc<UartShared<T>>,
}

impl<T: UartTransport> Clone for Uart<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: UartTransport + 'static> Uart<T> {
    pub(crate) fn open(id: HandleId, mut transport: T, config: UartConfig, port: String) -> Result<Self> {
        let Some(events) = transport.take_events() else {
            transport.close();
            return Err(Error::Unsupported("driver without event stream"));
        };

        let shared = Arc::new(UartShared::new(id, transport, config, port));
        let dispatcher = dispatch::spawn(&shared, events)?;
        // Set before any subscription exists, so before the first event
        let _ = shared.dispatch_thread.set(dispatcher.thread().id());
        *shared.dispatcher.lock() = Some(dispatcher);
        info!("uart: opened {}", shared.port.as_str());
        Ok(Self { shared })
    }
}

impl<T: UartTransport> Uart<T> {
    /// Handle identity
    pub fn id(&self) -> HandleId {
        self.shared.handle.id()
    }

    /// Native port name the handle was opened on
    pub fn port_name(&self) -> &str {
        &self.shared.port
    }

    /// Configuration the port was opened with
    pub fn config(&self) -> &UartConfig {
        &self.shared.config
    }

    pub fn power(&self) -> &Arc<PowerGate> {
        self.shared.handle.power()
    }

    pub fn is_open(&self) -> bool {
        self.shared.handle.is_open()
    }

    /// Stop all sessions, drop listeners and release the port
    ///
    /// A blocking [`read`](Self::read) in progress fails with
    /// [`Error::Closed`]. Closing twice is a no-op.
    pub fn close(&self) {
        self.shared.close();
    }

    pub fn baud_rate(&self) -> Result<u32> {
        let mut core = self.shared.handle.acquire()?;
        core.native.transport().baud_rate().map_err(Error::native)
    }

    pub fn set_baud_rate(&self, baud_rate: u32) -> Result<()> {
        if baud_rate == 0 {
            return Err(Error::InvalidArgument("baud rate must be positive"));
        }
        let mut core = self.shared.handle.acquire()?;
        core.native
            .transport()
            .set_baud_rate(baud_rate)
            .map_err(Error::native)
    }

    pub fn data_bits(&self) -> Result<DataBits> {
        let mut core = self.shared.handle.acquire()?;
        core.native.transport().data_bits().map_err(Error::native)
    }

    pub fn set_data_bits(&self, data_bits: DataBits) -> Result<()> {
        let mut core = self.shared.handle.acquire()?;
        core.native
            .transport()
            .set_data_bits(data_bits)
            .map_err(Error::native)
    }

    pub fn parity(&self) -> Result<Parity> {
        let mut core = self.shared.handle.acquire()?;
        core.native.transport().parity().map_err(Error::native)
    }

    pub fn set_parity(&self, parity: Parity) -> Result<()> {
        let mut core = self.shared.handle.acquire()?;
        core.native
            .transport()
            .set_parity(parity)
            .map_err(Error::native)
    }

    pub fn stop_bits(&self) -> Result<StopBits> {
        let mut core = self.shared.handle.acquire()?;
        core.native.transport().stop_bits().map_err(Error::native)
    }

    pub fn set_stop_bits(&self, stop_bits: StopBits) -> Result<()> {
        let mut core = self.shared.handle.acquire()?;
        core.native
            .transport()
            .set_stop_bits(stop_bits)
            .map_err(Error::native)
    }

    pub fn flow_control(&self) -> Result<FlowControl> {
        let mut core = self.shared.handle.acquire()?;
        core.native.transport().flow_control().map_err(Error::native)
    }

    pub fn set_flow_control(&self, flow_control: FlowControl) -> Result<()> {
        let mut core = self.shared.handle.acquire()?;
        core.native
            .transport()
            .set_flow_control(flow_control)
            .map_err(Error::native)
    }

    /// Bytes after which a read round completes early, `0` to disable
    pub fn receive_trigger_level(&self) -> Result<usize> {
        Ok(self.shared.handle.acquire_open()?.trigger_level)
    }

    pub fn set_receive_trigger_level(&self, level: usize) -> Result<()> {
        self.shared.handle.acquire_open()?.trigger_level = level;
        Ok(())
    }

    /// How long a blocking read waits; `None` waits forever
    pub fn receive_timeout(&self) -> Result<Option<Duration>> {
        Ok(self.shared.handle.acquire_open()?.receive_timeout)
    }

    pub fn set_receive_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.shared.handle.acquire_open()?.receive_timeout = timeout;
        Ok(())
    }

    /// Hold the line in break state for `duration`
    pub fn generate_break(&self, duration: Duration) -> Result<()> {
        if duration.is_zero() {
            return Err(Error::InvalidArgument("break duration must be positive"));
        }
        let mut core = self.shared.handle.acquire()?;
        core.native
            .transport()
            .send_break(duration)
            .map_err(Error::native)
    }

    /// Register the listener for `kind`
    ///
    /// Only one listener per kind; clear the current one first.
    pub fn set_event_listener<L>(&self, kind: EventKind, listener: L) -> Result<()>
    where
        L: UartEventListener + 'static,
    {
        let mut core = self.shared.handle.acquire_open()?;
        if core.listeners[kind.index()].is_some() {
            return Err(Error::InvalidState("event listener already registered"));
        }
        core.subscribe(kind)?;
        core.listeners[kind.index()] = Some(Arc::new(listener));
        Ok(())
    }

    pub fn clear_event_listener(&self, kind: EventKind) -> Result<()> {
        let mut core = self.shared.handle.acquire_open()?;
        if core.listeners[kind.index()].take().is_some() {
            core.unsubscribe(kind);
        }
        Ok(())
    }

    fn reject_dispatch_thread(&self) -> Result<()> {
        if self.shared.on_dispatch_thread() {
            return Err(Error::InvalidState("blocking transfer from a listener"));
        }
        Ok(())
    }

    /// Read into `dst`, blocking until its round completes
    ///
    /// Buffered input is taken first. The call then waits until `dst` is
    /// full, the receive trigger level is reached, the driver reports an
    /// idle line or the receive timeout expires. Returns the bytes read.
    pub fn read(&self, dst: &Buffer) -> Result<usize> {
        self.reject_dispatch_thread()?;
        let mut guard = self.shared.handle.acquire()?;
        if guard.reading.is_some() {
            return Err(Error::InvalidState("asynchronous read in progress"));
        }

        let initial = dst.position();
        let (start, remaining) = dst.cursor();
        if remaining == 0 {
            return Ok(0);
        }
        let mut scratch = vec![0u8; remaining];
        let n = guard
            .native
            .transport()
            .read(&mut scratch)
            .map_err(Error::native)?
            .min(remaining);
        dst.commit(start, &scratch[..n]);

        let timeout = guard.receive_timeout;
        let trigger = guard.trigger_level;
        if !dst.has_remaining() || (trigger != 0 && n >= trigger) || timeout == Some(Duration::ZERO) {
            return Ok(n);
        }

        let id = guard.next_session_id();
        guard.reading = Some(ReadSession::new(
            id,
            RoundBuffers::single(dst),
            InputTarget::Waiter { done: false },
        ));
        if let Err(err) = guard.subscribe(EventKind::InputDataAvailable) {
            guard.reading = None;
            return Err(err);
        }

        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        loop {
            if !self.shared.handle.is_open() {
                return Err(Error::Closed);
            }
            match guard.reading.as_ref() {
                Some(session) if session.id == id => {
                    if session.is_done() {
                        break;
                    }
                }
                // Stopped by stop_reading
                _ => break,
            }
            match deadline {
                Some(deadline) => {
                    if self.shared.wake.wait_until(&mut guard, deadline).timed_out() {
                        break;
                    }
                }
                None => self.shared.wake.wait(&mut guard),
            }
        }

        if guard.reading.as_ref().is_some_and(|s| s.id == id) {
            guard.stop_read_session();
        }
        Ok(dst.position().saturating_sub(initial))
    }

    /// Write the remaining bytes of `src`, blocking
    ///
    /// Returns the bytes the driver accepted; `src` advances by that much.
    pub fn write(&self, src: &Buffer) -> Result<usize> {
        self.reject_dispatch_thread()?;
        let mut guard = self.shared.handle.acquire()?;
        if guard.writing.is_some() {
            return Err(Error::InvalidState("asynchronous write in progress"));
        }

        let (start, data) = src.window();
        if data.is_empty() {
            return Ok(0);
        }
        let n = guard
            .native
            .transport()
            .write(&data)
            .map_err(Error::native)?
            .min(data.len());
        src.advance_from(start, n);
        Ok(n)
    }

    /// Receive into `buffer` in rounds until stopped
    pub fn start_reading<L>(&self, buffer: &Buffer, listener: L) -> Result<()>
    where
        L: InputRoundListener + 'static,
    {
        self.begin_reading(RoundBuffers::single(buffer), Arc::new(listener))
    }

    /// Receive into `first` and `second` alternately until stopped
    pub fn start_reading_double<L>(&self, first: &Buffer, second: &Buffer, listener: L) -> Result<()>
    where
        L: InputRoundListener + 'static,
    {
        if Buffer::ptr_eq(first, second) {
            return Err(Error::BufferReused);
        }
        self.begin_reading(RoundBuffers::double(first, second), Arc::new(listener))
    }

    fn begin_reading(&self, rounds: RoundBuffers, listener: Arc<dyn InputRoundListener>) -> Result<()> {
        let mut guard = self.shared.handle.acquire()?;
        if guard.reading.is_some() {
            return Err(Error::InvalidState("read session already running"));
        }
        let id = guard.next_session_id();
        guard.reading = Some(ReadSession::new(id, rounds, InputTarget::Listener(listener)));
        if let Err(err) = guard.subscribe(EventKind::InputDataAvailable) {
            guard.reading = None;
            return Err(err);
        }
        debug!("uart: read session {} started", id);
        Ok(())
    }

    /// Stop the read session; no-op if none runs
    pub fn stop_reading(&self) -> Result<()> {
        let mut guard = self.shared.handle.acquire_open()?;
        guard.stop_read_session();
        self.shared.wake.notify_all();
        Ok(())
    }

    /// Send `buffer` in rounds until stopped
    ///
    /// The listener refills the buffer between rounds.
    pub fn start_writing<L>(&self, buffer: &Buffer, listener: L) -> Result<()>
    where
        L: OutputRoundListener + 'static,
    {
        self.begin_writing(RoundBuffers::single(buffer), Arc::new(listener))
    }

    /// Send `first` and `second` alternately until stopped
    pub fn start_writing_double<L>(&self, first: &Buffer, second: &Buffer, listener: L) -> Result<()>
    where
        L: OutputRoundListener + 'static,
    {
        if Buffer::ptr_eq(first, second) {
            return Err(Error::BufferReused);
        }
        self.begin_writing(RoundBuffers::double(first, second), Arc::new(listener))
    }

    fn begin_writing(&self, rounds: RoundBuffers, listener: Arc<dyn OutputRoundListener>) -> Result<()> {
        let mut guard = self.shared.handle.acquire()?;
        let core = &mut *guard;
        if core.writing.is_some() {
            return Err(Error::InvalidState("write session already running"));
        }
        core.subscribe(EventKind::OutputBufferEmpty)?;

        let (start, data) = rounds.current().window();
        if let Err(err) = core.native.transport().start_write(&data) {
            core.unsubscribe(EventKind::OutputBufferEmpty);
            return Err(Error::native(err));
        }
        let id = core.next_session_id();
        let mut session = WriteSession::new(id, rounds, listener);
        session.in_flight = Some(start);
        core.writing = Some(session);
        debug!("uart: write session {} started", id);
        Ok(())
    }

    /// Stop the write session, aborting the pending native write
    pub fn stop_writing(&self) -> Result<()> {
        self.shared.handle.acquire_open()?.stop_write_session();
        Ok(())
    }
}
