//! Operations shared by every native handle

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ErrorType;

/// How a device is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum AccessMode {
    /// This application is the only user of the peripheral
    #[default]
    Exclusive,
    /// Other applications may open the same peripheral; transfers
    /// take the driver's advisory lock
    Shared,
}

/// One open native handle
pub trait Transport: ErrorType + Send {
    /// Try to take the inter-application advisory lock
    ///
    /// Returns an error of kind [`ErrorKind::Locked`](crate::ErrorKind::Locked)
    /// if another application holds it. Drivers without such a lock
    /// keep the default.
    fn try_lock(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Release the inter-application advisory lock
    fn unlock(&mut self) {}

    /// Release the native resource
    ///
    /// Called exactly once by the engine. Any event stream handed out
    /// by the handle must end after this call.
    fn close(&mut self);
}
