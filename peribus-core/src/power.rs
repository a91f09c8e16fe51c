//! Power state gate
//!
//! The power manager itself lives outside the engine; devices only ask
//! whether they may touch the bus right now.

use portable_atomic::{AtomicU8, Ordering};

use crate::error::{Error, Result, Unavailable};

/// Device power state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerState {
    /// Normal operation
    Active,
    /// Transfers refused until resumed
    Suspended,
}

/// Pass/fail gate consulted before every transfer
#[derive(Debug)]
pub struct PowerGate {
    state: AtomicU8,
}

impl Default for PowerGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PowerGate {
    const ACTIVE: u8 = 0;
    const SUSPENDED: u8 = 1;

    /// Gate in the active state
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(Self::ACTIVE),
        }
    }

    /// Current state
    pub fn state(&self) -> PowerState {
        match self.state.load(Ordering::Acquire) {
            Self::SUSPENDED => PowerState::Suspended,
            _ => PowerState::Active,
        }
    }

    /// Refuse transfers until [`resume`](Self::resume)
    pub fn suspend(&self) {
        self.state.store(Self::SUSPENDED, Ordering::Release);
    }

    /// Allow transfers again
    pub fn resume(&self) {
        self.state.store(Self::ACTIVE, Ordering::Release);
    }

    /// Fail with `Unavailable(PowerSuspended)` while suspended
    pub fn check(&self) -> Result<()> {
        match self.state() {
            PowerState::Active => Ok(()),
            PowerState::Suspended => Err(Error::Unavailable(Unavailable::PowerSuspended)),
        }
    }
}
