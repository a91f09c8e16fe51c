//! Native driver error classification
//!
//! Drivers keep their own error types; the engine only needs to know
//! which class of failure occurred.

/// Class of a native driver failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorKind {
    /// Bus error (misplaced start/stop condition, electrical fault)
    Bus,
    /// Arbitration lost to another master
    ArbitrationLost,
    /// Slave did not acknowledge
    Nack,
    /// Hardware-level timeout
    Timeout,
    /// Data arrived faster than it could be consumed
    Overrun,
    /// Handle is held by another application or cannot be probed
    Locked,
    /// Operation not supported by this driver
    Unsupported,
    /// Other driver fault
    Other,
}

/// Native driver error
///
/// Mirrors the `embedded-hal` error pattern: a driver error can be
/// anything as long as it can be classified.
pub trait Error: core::fmt::Debug {
    /// Classify this error
    fn kind(&self) -> ErrorKind;
}

impl Error for ErrorKind {
    fn kind(&self) -> ErrorKind {
        *self
    }
}

/// Associates an error type with a driver handle
pub trait ErrorType {
    /// Error type for all operations on this handle
    type Error: Error;
}

impl<T: ErrorType + ?Sized> ErrorType for &mut T {
    type Error = T::Error;
}
