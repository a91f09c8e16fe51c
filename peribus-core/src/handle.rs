//! Per-device handle and lock discipline
//!
//! Every open device owns one [`Handle`]: a mutex around the native
//! transport and the bus-specific engine state. All transfers run with
//! that mutex held, so at most one native call is in flight per device.
//! The inter-application advisory lock sits on top and is only taken
//! around transactional sequences.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use peribus_hal::{AccessMode, Transport};
use portable_atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};
use crate::power::PowerGate;

/// Identity of an open handle, unique per device manager
///
/// Also the lock order when one operation needs several handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HandleId(pub(crate) u32);

impl HandleId {
    /// Raw value
    pub fn get(self) -> u32 {
        self.0
    }
}

/// Mutex-guarded device state
pub(crate) struct Handle<S> {
    id: HandleId,
    open: AtomicBool,
    power: Arc<PowerGate>,
    slot: Mutex<S>,
}

impl<S> Handle<S> {
    pub fn new(id: HandleId, state: S) -> Self {
        Self {
            id,
            open: AtomicBool::new(true),
            power: Arc::new(PowerGate::new()),
            slot: Mutex::new(state),
        }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn power(&self) -> &Arc<PowerGate> {
        &self.power
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Fail fast if closed or suspended, without locking
    pub fn check(&self) -> Result<()> {
        if !self.is_open() {
            return Err(Error::Closed);
        }
        self.power.check()
    }

    /// Lock for a transfer
    pub fn acquire(&self) -> Result<MutexGuard<'_, S>> {
        self.check()?;
        let guard = self.slot.lock();
        // Closed while we waited
        if !self.is_open() {
            return Err(Error::Closed);
        }
        Ok(guard)
    }

    /// Lock for state queries that are allowed while suspended
    pub fn acquire_open(&self) -> Result<MutexGuard<'_, S>> {
        let guard = self.slot.lock();
        if !self.is_open() {
            return Err(Error::Closed);
        }
        Ok(guard)
    }

    /// Lock for teardown; `None` if already closed
    ///
    /// The open flag is cleared while the lock is held, so an in-flight
    /// transfer finishes before teardown runs.
    pub fn begin_close(&self) -> Option<MutexGuard<'_, S>> {
        let guard = self.slot.lock();
        if self.open.swap(false, Ordering::AcqRel) {
            Some(guard)
        } else {
            None
        }
    }
}

/// Native transport plus advisory lock bookkeeping
pub(crate) struct Native<T> {
    transport: T,
    access: AccessMode,
    advisory_held: bool,
}

impl<T: Transport> Native<T> {
    pub fn new(transport: T, access: AccessMode) -> Self {
        Self {
            transport,
            access,
            advisory_held: false,
        }
    }

    pub fn transport(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Take the advisory lock for a shared device
    ///
    /// Returns `true` if this call took it; nested calls and exclusive
    /// devices return `false` and must not unlock.
    pub fn lock_advisory(&mut self) -> Result<bool> {
        if self.access == AccessMode::Exclusive || self.advisory_held {
            return Ok(false);
        }
        self.transport.try_lock().map_err(Error::native)?;
        self.advisory_held = true;
        Ok(true)
    }

    /// Release the advisory lock if held
    pub fn unlock_advisory(&mut self) {
        if self.advisory_held {
            self.transport.unlock();
            self.advisory_held = false;
        }
    }

    /// Release the native resource
    pub fn close(&mut self) {
        self.unlock_advisory();
        self.transport.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peribus_hal::i2c::{I2cConfig, I2cDriver};
    use peribus_hal_sim::{I2cRecord, SimI2cBus};

    #[test]
    fn test_acquire_after_close() {
        let handle = Handle::new(HandleId(1), ());
        assert!(handle.acquire().is_ok());
        assert!(handle.begin_close().is_some());
        assert!(handle.begin_close().is_none());
        assert!(matches!(handle.acquire(), Err(Error::Closed)));
    }

    #[test]
    fn test_suspended_handle_refuses_transfers() {
        let handle = Handle::new(HandleId(1), ());
        handle.power().suspend();
        assert!(handle.acquire().is_err());
        assert!(handle.acquire_open().is_ok());
    }

    #[test]
    fn test_advisory_lock_only_when_shared() {
        let bus = SimI2cBus::new();
        let t = bus.open(&I2cConfig::new(0x10)).unwrap();
        let mut exclusive = Native::new(t, AccessMode::Exclusive);
        assert!(!exclusive.lock_advisory().unwrap());
        assert!(bus.records().is_empty());

        let t = bus.open(&I2cConfig::new(0x11)).unwrap();
        let mut shared = Native::new(t, AccessMode::Shared);
        assert!(shared.lock_advisory().unwrap());
        // Nested acquisition is a no-op
        assert!(!shared.lock_advisory().unwrap());
        shared.unlock_advisory();
        shared.unlock_advisory();
        assert_eq!(
            bus.records(),
            vec![
                I2cRecord::Lock { address: 0x11 },
                I2cRecord::Unlock { address: 0x11 }
            ]
        );
    }

    #[test]
    fn test_advisory_lock_held_elsewhere() {
        let bus = SimI2cBus::new();
        bus.set_locked_by_other(true);
        let t = bus.open(&I2cConfig::new(0x10)).unwrap();
        let mut shared = Native::new(t, AccessMode::Shared);
        assert!(matches!(
            shared.lock_advisory(),
            Err(Error::Unavailable(_))
        ));
    }
}
