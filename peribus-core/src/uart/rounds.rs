//! Asynchronous read and write rounds
//!
//! A session cycles through one or two buffers. A round ends when its
//! buffer is full (read) or drained (write); the listener is then told
//! how many bytes the round moved.

use std::sync::Arc;

use crate::buffer::Buffer;
use crate::error::Error;

/// End of one round
#[derive(Debug, Clone)]
pub struct RoundCompletion {
    /// Buffer the round worked on
    pub buffer: Buffer,
    /// Bytes moved during the round
    pub count: usize,
    /// Input overrun (read rounds) or output underrun (write rounds)
    /// occurred since the previous completion
    pub fault: bool,
}

/// Receives the completed rounds of an asynchronous read
///
/// Called on the dispatch thread of the device. Implementations must
/// not block and must not call the blocking `read`/`write` of the same
/// device.
pub trait InputRoundListener: Send + Sync {
    /// A read round ended
    fn input_round_completed(&self, completion: &RoundCompletion);

    /// The session hit a native error
    fn failed(&self, _error: &Error) {}
}

impl<F> InputRoundListener for F
where
    F: Fn(&RoundCompletion) + Send + Sync,
{
    fn input_round_completed(&self, completion: &RoundCompletion) {
        self(completion)
    }
}

/// Receives the completed rounds of an asynchronous write
///
/// Same threading rules as [`InputRoundListener`].
pub trait OutputRoundListener: Send + Sync {
    /// A write round ended
    fn output_round_completed(&self, completion: &RoundCompletion);

    /// The session hit a native error
    fn failed(&self, _error: &Error) {}
}

impl<F> OutputRoundListener for F
where
    F: Fn(&RoundCompletion) + Send + Sync,
{
    fn output_round_completed(&self, completion: &RoundCompletion) {
        self(completion)
    }
}

/// One or two buffers used in turn
#[derive(Debug)]
pub(crate) struct RoundBuffers {
    buffers: Vec<Buffer>,
    current: usize,
    round_start: [usize; 2],
}

impl RoundBuffers {
    pub fn single(buffer: &Buffer) -> Self {
        Self {
            round_start: [buffer.position(), 0],
            buffers: vec![buffer.clone()],
            current: 0,
        }
    }

    pub fn double(first: &Buffer, second: &Buffer) -> Self {
        Self {
            round_start: [first.position(), second.position()],
            buffers: vec![first.clone(), second.clone()],
            current: 0,
        }
    }

    pub fn is_double(&self) -> bool {
        self.buffers.len() == 2
    }

    pub fn current(&self) -> &Buffer {
        &self.buffers[self.current]
    }

    /// Bytes moved in the current buffer since its round began
    pub fn round_len(&self) -> usize {
        self.current()
            .position()
            .saturating_sub(self.round_start[self.current])
    }

    /// Start a new round on the same buffer, from where it stands now
    pub fn restart(&mut self) {
        self.round_start[self.current] = self.current().position();
    }

    /// Move to the other buffer and start its round
    pub fn switch(&mut self) {
        if self.is_double() {
            self.current = 1 - self.current;
        }
        self.restart();
    }
}

pub(crate) enum InputTarget {
    Listener(Arc<dyn InputRoundListener>),
    /// A blocking read waits for the round
    Waiter { done: bool },
}

pub(crate) struct ReadSession {
    pub id: u64,
    pub rounds: RoundBuffers,
    pub target: InputTarget,
    pub overrun: bool,
}

impl ReadSession {
    pub fn new(id: u64, rounds: RoundBuffers, target: InputTarget) -> Self {
        Self {
            id,
            rounds,
            target,
            overrun: false,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self.target, InputTarget::Waiter { done: true })
    }
}

pub(crate) struct WriteSession {
    pub id: u64,
    pub rounds: RoundBuffers,
    pub listener: Arc<dyn OutputRoundListener>,
    pub underrun: bool,
    /// Position the pending native write started from
    pub in_flight: Option<usize>,
}

impl WriteSession {
    pub fn new(id: u64, rounds: RoundBuffers, listener: Arc<dyn OutputRoundListener>) -> Self {
        Self {
            id,
            rounds,
            listener,
            underrun: false,
            in_flight: None,
        }
    }
}
