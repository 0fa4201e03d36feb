//! Error types for Linux I2C operations

use bpmcu_core::BusError;
use thiserror::Error;

/// Linux i2c-dev specific errors
#[derive(Debug, Error)]
pub enum LinuxI2cError {
    /// Failed to open the bus device
    #[error("Failed to open {path}: {source}")]
    OpenFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// I2C_SLAVE was rejected
    #[error("Failed to select target address 0x{addr:02x}: {source}")]
    SetAddressFailed {
        addr: u8,
        #[source]
        source: std::io::Error,
    },

    /// I2C_PEC was rejected
    #[error("Failed to enable packet error checking: {0}")]
    SetPecFailed(#[source] std::io::Error),

    /// Target address outside the 7-bit range
    #[error("Invalid I2C address: {0} (must be 0x01-0x7f)")]
    InvalidAddress(String),

    /// Bus not specified
    #[error("No I2C bus specified. Use /dev/i2c-N or a bus number")]
    NoDevice,
}

impl LinuxI2cError {
    fn io_source(&self) -> Option<&std::io::Error> {
        match self {
            Self::OpenFailed { source, .. } | Self::SetAddressFailed { source, .. } => Some(source),
            Self::SetPecFailed(source) => Some(source),
            Self::InvalidAddress(_) | Self::NoDevice => None,
        }
    }
}

impl From<LinuxI2cError> for BusError {
    fn from(err: LinuxI2cError) -> Self {
        match err.io_source().and_then(|e| e.raw_os_error()) {
            Some(errno) => BusError::Os(errno),
            None => BusError::Os(libc::EINVAL),
        }
    }
}

/// Result type for Linux I2C operations
pub type Result<T> = std::result::Result<T, LinuxI2cError>;
