//! Error types for the Peribus engine

use peribus_hal::ErrorKind;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Why a device cannot be used right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Unavailable {
    /// Another application holds the peripheral or its advisory lock
    LockedByOtherApplication,
    /// The device is power-suspended
    PowerSuspended,
}

/// Peribus error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Argument out of range
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Operation not allowed in the current state
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    /// Buffer length does not fit the SPI word length
    #[error("Buffer length {len} is not a positive multiple of {word_bytes} byte words")]
    InvalidWordLength {
        /// Remaining bytes of the offending buffer
        len: usize,
        /// Bytes per word
        word_bytes: usize,
    },

    /// Same buffer appended twice to one message
    #[error("Buffer already used in this message")]
    BufferReused,

    /// Device temporarily unusable
    #[error("Device unavailable: {0:?}")]
    Unavailable(Unavailable),

    /// Device has been closed
    #[error("Device closed")]
    Closed,

    /// Native transfer failure
    #[error("I/O error: {0:?}")]
    Io(ErrorKind),

    /// Open refused by the security policy
    #[error("Permission denied for {0}")]
    PermissionDenied(String),

    /// Named peripheral does not exist
    #[error("Device not found: {0}")]
    NotFound(String),

    /// Configuration rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation not supported by this device
    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),

    /// Configuration document could not be parsed
    #[error("Configuration parse error: {0}")]
    Config(#[from] toml::de::Error),
}

impl Error {
    /// Convert a native driver error
    pub fn native<E: peribus_hal::Error>(err: E) -> Self {
        Self::from_kind(err.kind())
    }

    /// Convert a native error class
    pub fn from_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Locked => Error::Unavailable(Unavailable::LockedByOtherApplication),
            ErrorKind::Unsupported => Error::Unsupported("native driver"),
            kind => Error::Io(kind),
        }
    }

    /// True for errors a caller may retry later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Unavailable(_))
    }

    /// Short label, safe for every log backend
    pub fn label(&self) -> &'static str {
        match self {
            Error::InvalidArgument(_) => "invalid argument",
            Error::InvalidState(_) => "invalid state",
            Error::InvalidWordLength { .. } => "invalid word length",
            Error::BufferReused => "buffer reused",
            Error::Unavailable(_) => "unavailable",
            Error::Closed => "closed",
            Error::Io(_) => "i/o",
            Error::PermissionDenied(_) => "permission denied",
            Error::NotFound(_) => "not found",
            Error::InvalidConfig(_) => "invalid config",
            Error::Unsupported(_) => "unsupported",
            Error::Config(_) => "config parse",
        }
    }
}
