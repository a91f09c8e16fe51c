//! Simulated driver errors

use peribus_hal::{Error, ErrorKind};

/// Error from a simulated driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimError {
    /// Failure injected by the test
    Injected(ErrorKind),
    /// Advisory lock or port held by another application
    Locked,
    /// Handle already closed
    Closed,
    /// No such port
    NoSuchPort,
    /// Feature disabled on this simulated peripheral
    NotSupported,
}

impl Error for SimError {
    fn kind(&self) -> ErrorKind {
        match self {
            SimError::Injected(kind) => *kind,
            SimError::Locked => ErrorKind::Locked,
            SimError::Closed | SimError::NoSuchPort => ErrorKind::Other,
            SimError::NotSupported => ErrorKind::Unsupported,
        }
    }
}
