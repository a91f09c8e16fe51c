//! Simulated serial ports
//!
//! A [`SimSerial`] owns named ports. Opening one hands the engine a
//! [`SimUart`]; the test keeps a [`SimUartPort`] to play the remote end:
//! inject received bytes, raise line conditions and inspect what was
//! sent. Events are delivered only for subscribed kinds, as a real
//! driver would.

use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use peribus_hal::modem::{ModemControl, ModemSignal, SignalSet};
use peribus_hal::uart::{
    DataBits, EventKind, EventSource, FlowControl, NativeEvent, Parity, StopBits, UartConfig,
    UartDriver, UartTransport,
};
use peribus_hal::{ErrorKind, ErrorType, Transport};

use crate::error::SimError;

#[derive(Debug)]
struct PortState {
    open: bool,
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    async_tx: Vec<u8>,
    subscribed: [bool; EventKind::COUNT],
    events: Option<Sender<NativeEvent>>,
    write_chunk: Option<usize>,
    auto_complete: bool,
    pending_write: Option<usize>,
    baud_rate: u32,
    data_bits: DataBits,
    parity: Parity,
    stop_bits: StopBits,
    flow_control: FlowControl,
    supports_break: bool,
    breaks: Vec<Duration>,
    levels: u8,
    watched: SignalSet,
    fail_next: Option<ErrorKind>,
}

impl PortState {
    fn new() -> Self {
        Self {
            open: false,
            rx: VecDeque::new(),
            tx: Vec::new(),
            async_tx: Vec::new(),
            subscribed: [false; EventKind::COUNT],
            events: None,
            write_chunk: None,
            auto_complete: true,
            pending_write: None,
            baud_rate: 115200,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            supports_break: true,
            breaks: Vec::new(),
            levels: 0,
            watched: SignalSet::EMPTY,
            fail_next: None,
        }
    }

    fn emit(&self, event: NativeEvent) {
        let deliver = match event.kind() {
            Some(kind) => self.subscribed[kind.index()],
            None => true,
        };
        if deliver {
            if let Some(events) = &self.events {
                let _ = events.send(event);
            }
        }
    }

    fn check(&mut self) -> Result<(), SimError> {
        if !self.open {
            return Err(SimError::Closed);
        }
        match self.fail_next.take() {
            Some(kind) => Err(SimError::Injected(kind)),
            None => Ok(()),
        }
    }
}

type SharedPort = Arc<Mutex<PortState>>;

/// Collection of simulated serial ports, usable as a [`UartDriver`]
#[derive(Debug, Clone, Default)]
pub struct SimSerial {
    ports: Arc<Mutex<HashMap<String, SharedPort>>>,
}

impl SimSerial {
    /// No ports
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the port `name` and return its remote end
    pub fn add_port(&self, name: &str) -> SimUartPort {
        let state = Arc::new(Mutex::new(PortState::new()));
        self.ports.lock().insert(name.to_string(), state.clone());
        SimUartPort { state }
    }
}

impl UartDriver for SimSerial {
    type Transport = SimUart;

    fn open(&self, port: &str, config: &UartConfig) -> Result<SimUart, SimError> {
        let state = self
            .ports
            .lock()
            .get(port)
            .cloned()
            .ok_or(SimError::NoSuchPort)?;

        let (sender, receiver) = mpsc::channel();
        {
            let mut s = state.lock();
            if s.open {
                return Err(SimError::Locked);
            }
            s.open = true;
            s.events = Some(sender);
            s.subscribed = [false; EventKind::COUNT];
            s.baud_rate = config.baudrate;
            s.data_bits = config.data_bits;
            s.parity = config.parity;
            s.stop_bits = config.stop_bits;
            s.flow_control = config.flow_control;
        }
        log::debug!("sim uart: open {}", port);

        Ok(SimUart {
            state,
            events: Some(SimEvents { receiver }),
        })
    }
}

/// Event stream of a simulated port
#[derive(Debug)]
pub struct SimEvents {
    receiver: Receiver<NativeEvent>,
}

impl EventSource for SimEvents {
    fn next_event(&mut self) -> Option<NativeEvent> {
        self.receiver.recv().ok()
    }
}

/// Open handle to a simulated port
#[derive(Debug)]
pub struct SimUart {
    state: SharedPort,
    events: Option<SimEvents>,
}

impl ErrorType for SimUart {
    type Error = SimError;
}

impl Transport for SimUart {
    fn close(&mut self) {
        let mut state = self.state.lock();
        state.open = false;
        state.pending_write = None;
        state.watched = SignalSet::EMPTY;
        // Dropping the sender ends the event stream
        state.events = None;
    }
}

impl UartTransport for SimUart {
    type Events = SimEvents;

    fn take_events(&mut self) -> Option<SimEvents> {
        self.events.take()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SimError> {
        let mut state = self.state.lock();
        state.check()?;
        let n = buf.len().min(state.rx.len());
        for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, SimError> {
        let mut state = self.state.lock();
        state.check()?;
        let n = data.len().min(state.write_chunk.unwrap_or(usize::MAX));
        state.tx.extend_from_slice(&data[..n]);
        Ok(n)
    }

    fn start_write(&mut self, data: &[u8]) -> Result<(), SimError> {
        let mut state = self.state.lock();
        state.check()?;
        let n = data.len().min(state.write_chunk.unwrap_or(usize::MAX));
        state.tx.extend_from_slice(&data[..n]);
        state.async_tx.extend_from_slice(&data[..n]);
        if state.auto_complete {
            state.emit(NativeEvent::OutputEmpty { written: n });
        } else {
            state.pending_write = Some(n);
        }
        Ok(())
    }

    fn stop_writing(&mut self) {
        self.state.lock().pending_write = None;
    }

    fn subscribe(&mut self, kind: EventKind) -> Result<(), SimError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(SimError::Closed);
        }
        state.subscribed[kind.index()] = true;
        if kind == EventKind::InputDataAvailable && !state.rx.is_empty() {
            state.emit(NativeEvent::DataAvailable { flush: false });
        }
        Ok(())
    }

    fn unsubscribe(&mut self, kind: EventKind) {
        self.state.lock().subscribed[kind.index()] = false;
    }

    fn baud_rate(&mut self) -> Result<u32, SimError> {
        let mut state = self.state.lock();
        state.check()?;
        Ok(state.baud_rate)
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), SimError> {
        let mut state = self.state.lock();
        state.check()?;
        state.baud_rate = baud_rate;
        Ok(())
    }

    fn data_bits(&mut self) -> Result<DataBits, SimError> {
        let mut state = self.state.lock();
        state.check()?;
        Ok(state.data_bits)
    }

    fn set_data_bits(&mut self, data_bits: DataBits) -> Result<(), SimError> {
        let mut state = self.state.lock();
        state.check()?;
        state.data_bits = data_bits;
        Ok(())
    }

    fn parity(&mut self) -> Result<Parity, SimError> {
        let mut state = self.state.lock();
        state.check()?;
        Ok(state.parity)
    }

    fn set_parity(&mut self, parity: Parity) -> Result<(), SimError> {
        let mut state = self.state.lock();
        state.check()?;
        state.parity = parity;
        Ok(())
    }

    fn stop_bits(&mut self) -> Result<StopBits, SimError> {
        let mut state = self.state.lock();
        state.check()?;
        Ok(state.stop_bits)
    }

    fn set_stop_bits(&mut self, stop_bits: StopBits) -> Result<(), SimError> {
        let mut state = self.state.lock();
        state.check()?;
        state.stop_bits = stop_bits;
        Ok(())
    }

    fn flow_control(&mut self) -> Result<FlowControl, SimError> {
        let mut state = self.state.lock();
        state.check()?;
        Ok(state.flow_control)
    }

    fn set_flow_control(&mut self, flow_control: FlowControl) -> Result<(), SimError> {
        let mut state = self.state.lock();
        state.check()?;
        state.flow_control = flow_control;
        Ok(())
    }

    fn send_break(&mut self, duration: Duration) -> Result<(), SimError> {
        let mut state = self.state.lock();
        state.check()?;
        if !state.supports_break {
            return Err(SimError::NotSupported);
        }
        state.breaks.push(duration);
        Ok(())
    }
}

impl ModemControl for SimUart {
    fn set_signal(&mut self, signal: ModemSignal, level: bool) -> Result<(), SimError> {
        let mut state = self.state.lock();
        state.check()?;
        if level {
            state.levels |= signal.bit();
        } else {
            state.levels &= !signal.bit();
        }
        Ok(())
    }

    fn signal(&mut self, signal: ModemSignal) -> Result<bool, SimError> {
        let mut state = self.state.lock();
        state.check()?;
        Ok(state.levels & signal.bit() != 0)
    }

    fn watch_signals(&mut self, signals: SignalSet) -> Result<(), SimError> {
        let mut state = self.state.lock();
        state.check()?;
        state.watched = signals;
        Ok(())
    }

    fn unwatch_signals(&mut self) {
        self.state.lock().watched = SignalSet::EMPTY;
    }
}

/// Remote end of a simulated port
#[derive(Debug, Clone)]
pub struct SimUartPort {
    state: SharedPort,
}

impl SimUartPort {
    /// Deliver bytes as if received on the line
    pub fn inject(&self, bytes: &[u8]) {
        let mut state = self.state.lock();
        state.rx.extend(bytes.iter().copied());
        state.emit(NativeEvent::DataAvailable { flush: false });
    }

    /// Report an idle line, completing the current read round
    pub fn idle(&self) {
        self.state
            .lock()
            .emit(NativeEvent::DataAvailable { flush: true });
    }

    /// Raise an arbitrary native event
    pub fn raise(&self, event: NativeEvent) {
        self.state.lock().emit(event);
    }

    /// Bytes received but not yet read by the engine
    pub fn pending_input(&self) -> usize {
        self.state.lock().rx.len()
    }

    /// Everything written to the port
    pub fn written(&self) -> Vec<u8> {
        self.state.lock().tx.clone()
    }

    /// Bytes written through background writes only
    pub fn written_async(&self) -> Vec<u8> {
        self.state.lock().async_tx.clone()
    }

    /// Accept at most `len` bytes per native write call
    pub fn set_write_chunk(&self, len: usize) {
        self.state.lock().write_chunk = Some(len);
    }

    /// Hold background writes until [`complete_write`](Self::complete_write)
    pub fn set_manual_completion(&self, manual: bool) {
        self.state.lock().auto_complete = !manual;
    }

    /// Finish the pending background write
    pub fn complete_write(&self) -> bool {
        let mut state = self.state.lock();
        match state.pending_write.take() {
            Some(written) => {
                state.emit(NativeEvent::OutputEmpty { written });
                true
            }
            None => false,
        }
    }

    /// True while a background write waits for completion
    pub fn write_pending(&self) -> bool {
        self.state.lock().pending_write.is_some()
    }

    /// True if events of `kind` are enabled
    pub fn is_subscribed(&self, kind: EventKind) -> bool {
        self.state.lock().subscribed[kind.index()]
    }

    /// True while the engine holds the port open
    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Current baud rate of the port
    pub fn baud_rate(&self) -> u32 {
        self.state.lock().baud_rate
    }

    /// Disable break generation
    pub fn disable_break(&self) {
        self.state.lock().supports_break = false;
    }

    /// Breaks sent so far
    pub fn breaks(&self) -> Vec<Duration> {
        self.state.lock().breaks.clone()
    }

    /// Fail the next native call with `kind`
    pub fn fail_next(&self, kind: ErrorKind) {
        self.state.lock().fail_next = Some(kind);
    }

    /// Level of a modem line
    pub fn level(&self, signal: ModemSignal) -> bool {
        self.state.lock().levels & signal.bit() != 0
    }

    /// Drive a modem input line from the remote end
    pub fn set_level(&self, signal: ModemSignal, level: bool) {
        let mut state = self.state.lock();
        let before = state.levels & signal.bit() != 0;
        if level {
            state.levels |= signal.bit();
        } else {
            state.levels &= !signal.bit();
        }
        if before != level && state.watched.contains(signal) {
            state.emit(NativeEvent::SignalChanged { signal, level });
        }
    }

    /// Lines currently watched by the engine
    pub fn watched(&self) -> SignalSet {
        self.state.lock().watched
    }
}
