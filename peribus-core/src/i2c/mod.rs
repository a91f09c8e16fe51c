//! I2C engine
//!
//! Every I2C operation, single transfer or not, runs as a sequence of
//! steps under the handle lock of each participating device. A sequence
//! with one step is a plain transfer; longer sequences are combined
//! messages framed `Start`, `Body`..., `End` so the bus is never released
//! in between.

mod combined;
mod device;

pub use combined::CombinedMessage;
pub use device::{I2cBus, I2cDevice};

use std::sync::Arc;

use parking_lot::MutexGuard;
use peribus_hal::i2c::{Frame, I2cConfig, I2cOp, I2cTransport};

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::handle::{Handle, Native};

pub(crate) struct I2cShared<T: I2cTransport> {
    pub handle: Handle<Native<T>>,
    pub config: I2cConfig,
}

impl<T: I2cTransport> I2cShared<T> {
    fn close(&self) {
        if let Some(mut native) = self.handle.begin_close() {
            native.close();
            info!("i2c: closed slave {}", self.config.address);
        }
    }
}

impl<T: I2cTransport> Drop for I2cShared<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// One step of a sequence
#[derive(Debug, Clone)]
pub(crate) enum Step {
    Read { buffer: Buffer, skip: usize },
    Write { buffer: Buffer },
}

impl Step {
    fn buffer(&self) -> &Buffer {
        match self {
            Step::Read { buffer, .. } | Step::Write { buffer } => buffer,
        }
    }

    fn is_read(&self) -> bool {
        matches!(self, Step::Read { .. })
    }
}

fn run_step<T: I2cTransport>(transport: &mut T, frame: Frame, step: &Step) -> Result<usize> {
    match step {
        Step::Read { buffer, skip } => {
            let (start, remaining) = buffer.cursor();
            if remaining == 0 {
                return Ok(0);
            }
            let mut scratch = vec![0u8; remaining + skip];
            let n = transport
                .transfer(frame, I2cOp::Read(&mut scratch))
                .map_err(Error::native)?
                .min(scratch.len());
            // Bytes up to `skip` are discarded
            let stored = n.saturating_sub(*skip);
            if stored > 0 {
                buffer.commit(start, &scratch[*skip..*skip + stored]);
            }
            Ok(stored)
        }
        Step::Write { buffer } => {
            let (start, data) = buffer.window();
            if data.is_empty() {
                return Ok(0);
            }
            let n = transport
                .transfer(frame, I2cOp::Write(&data))
                .map_err(Error::native)?
                .min(data.len());
            buffer.advance_from(start, n);
            Ok(n)
        }
    }
}

/// Run `steps` against `targets` as one bus sequence
///
/// `steps` pairs a target index with a step. Returns the byte count of
/// every step, writes included.
pub(crate) fn execute<T: I2cTransport>(
    targets: &[Arc<I2cShared<T>>],
    steps: &[(usize, Step)],
) -> Result<Vec<usize>> {
    if steps.is_empty() {
        return Ok(Vec::new());
    }

    // Lock every handle in id order
    let mut order: Vec<usize> = (0..targets.len()).collect();
    order.sort_by_key(|&i| targets[i].handle.id());
    let mut guards: Vec<Option<MutexGuard<'_, Native<T>>>> =
        targets.iter().map(|_| None).collect();
    for &i in &order {
        guards[i] = Some(targets[i].handle.acquire()?);
    }

    // Sequences of several steps hold the bus across applications
    let transactional = steps.len() > 1;
    let mut advisory = vec![false; targets.len()];
    if transactional {
        for &i in &order {
            let native = guards[i]
                .as_mut()
                .ok_or(Error::InvalidState("target not locked"))?;
            match native.lock_advisory() {
                Ok(took) => advisory[i] = took,
                Err(err) => {
                    release(&mut guards, &advisory);
                    return Err(err);
                }
            }
        }
        trace!("i2c: combined message of {} steps", steps.len());
    }

    let mut counts = Vec::with_capacity(steps.len());
    let mut outcome = Ok(());
    for (index, (target, step)) in steps.iter().enumerate() {
        let frame = Frame::for_step(index, steps.len());
        let result = match guards.get_mut(*target).and_then(Option::as_mut) {
            Some(native) => run_step(native.transport(), frame, step),
            None => Err(Error::InvalidState("target not locked")),
        };
        match result {
            Ok(n) => counts.push(n),
            Err(err) => {
                outcome = Err(err);
                break;
            }
        }
    }

    release(&mut guards, &advisory);
    outcome.map(|()| counts)
}

fn release<T: I2cTransport>(guards: &mut [Option<MutexGuard<'_, Native<T>>>], taken: &[bool]) {
    for (guard, &took) in guards.iter_mut().zip(taken) {
        if took {
            if let Some(native) = guard.as_mut() {
                native.unlock_advisory();
            }
        }
    }
}
