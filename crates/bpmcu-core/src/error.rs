//! Error types for bpmcu-core
//!
//! Errors are layered the same way the stack is:
//!
//! - [`BusError`] is what a single transport transaction returns once its
//!   local retry budget is spent. It is a plain value, cheap to copy, and the
//!   protocol drivers decide whether it is fatal.
//! - [`Error`] is the protocol, factory and flasher taxonomy. Every variant
//!   maps onto a [`FailureClass`] so the CLI can turn it into an exit code.
//! - [`ImageError`] covers the memory-mapped firmware image reader.

use std::path::PathBuf;

use thiserror::Error;

use crate::mcu::ProtocolVersion;

/// `ENODEV`, reported for operations on a non-operational handle
const ENODEV: i32 = 19;
/// `EINVAL`, reported for requests the bus cannot express
const EINVAL: i32 = 22;
/// `EIO`, used when the OS gave no error number
const EIO: i32 = 5;

/// Failure of a single bus transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BusError {
    /// The OS rejected the transaction (positive errno)
    #[error("bus transaction failed: {}", describe_errno(.0))]
    Os(i32),

    /// The handle failed its capability check and never touches the bus
    #[error("bus handle is not operational")]
    NotOperational,

    /// Block transfers are limited to the SMBus block size
    #[error("transfer of {0} bytes exceeds the SMBus block limit")]
    BlockTooLong(usize),
}

impl BusError {
    /// Negative status code, in the style of the kernel SMBus helpers
    pub fn code(&self) -> i32 {
        match self {
            Self::Os(errno) => -errno,
            Self::NotOperational => -ENODEV,
            Self::BlockTooLong(_) => -EINVAL,
        }
    }
}

impl From<std::io::Error> for BusError {
    fn from(err: std::io::Error) -> Self {
        Self::Os(err.raw_os_error().unwrap_or(EIO))
    }
}

/// Failure to map a firmware image into memory
#[derive(Debug, Error)]
pub enum ImageError {
    /// open(2) failed
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file size could not be determined
    #[error("failed to determine size of {path}: {source}")]
    Size {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// mmap(2) failed
    #[error("failed to map {path}: {source}")]
    Map {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ImageError {
    /// The underlying OS error number, if any
    pub fn os_code(&self) -> Option<i32> {
        match self {
            Self::Open { source, .. } | Self::Size { source, .. } | Self::Map { source, .. } => {
                source.raw_os_error()
            }
        }
    }
}

/// Protocol, factory and flasher errors
#[derive(Debug, Error)]
pub enum Error {
    /// The transport failed its capability check or could not be opened
    #[error("MCU init failed: {device} is not operational")]
    NotOperational { device: String },

    /// No known protocol answered the identification read
    #[error("MCU init failed: no supported MCU at {device}{}", ident_suffix(.ident))]
    DeviceAbsent { device: String, ident: Option<u8> },

    /// An operation without a safe default hit a transport error
    #[error("failed to communicate with MCU {device} ({op}): {source}")]
    Communication {
        device: String,
        op: &'static str,
        #[source]
        source: BusError,
    },

    /// Flash readback differs from what was written
    #[error("MCU flash verify failed on {device} at offset 0x{offset:05X}")]
    VerifyFailed { device: String, offset: u32 },

    /// The operation has no encoding in this protocol generation
    #[error("{op} is not supported by MCU protocol {protocol}")]
    Unsupported {
        op: &'static str,
        protocol: ProtocolVersion,
    },

    /// Channel index outside 0..8
    #[error("invalid drive channel index {0}")]
    InvalidChannel(usize),

    /// Flash chunk length outside 1..=128
    #[error("invalid flash chunk length {0}")]
    InvalidChunk(usize),

    /// Firmware image outside the accepted size window
    #[error("incorrect firmware image size: {0} bytes")]
    InvalidImageSize(usize),

    /// The firmware image could not be mapped
    #[error(transparent)]
    Image(#[from] ImageError),

    /// The MCU never answered a ping after the post-flash reboot
    #[error("device did not come back after rebooting ({0} ping attempts)")]
    DeviceDidNotReturn(u32),

    /// Post-flash version or board type read back empty
    #[error("unable to read device information after update")]
    DeviceInfoUnavailable,

    /// Post-flash version differs from the one the caller expected
    #[error("firmware version mismatch: expected '{expected}', read '{actual}'")]
    VersionMismatch { expected: String, actual: String },
}

fn describe_errno(errno: &i32) -> std::io::Error {
    std::io::Error::from_raw_os_error(*errno)
}

fn ident_suffix(ident: &Option<u8>) -> String {
    match ident {
        Some(id) => format!(" (ident 0x{:02X})", id),
        None => String::new(),
    }
}

/// Coarse failure classes, one per distinguishable outcome for tooling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// No MCU answered at the address
    McuAbsent,
    /// Writing or verifying flash failed
    FlashWriteFailed,
    /// Some other MCU operation could not complete
    Communication,
    /// The MCU did not come back after reboot
    DeviceDidNotReturn,
    /// The MCU came back but its identity could not be read
    DeviceInfoUnavailable,
    /// The MCU came back running an unexpected version
    VersionMismatch,
    /// The firmware image is unusable
    InvalidImage,
    /// The protocol cannot express the request
    Unsupported,
    /// The caller passed an invalid argument
    Usage,
}

impl Error {
    /// Classify this error
    pub fn class(&self) -> FailureClass {
        match self {
            Self::NotOperational { .. } | Self::DeviceAbsent { .. } => FailureClass::McuAbsent,
            Self::VerifyFailed { .. } | Self::InvalidChunk(_) => FailureClass::FlashWriteFailed,
            Self::Communication { .. } => FailureClass::Communication,
            Self::Unsupported { .. } => FailureClass::Unsupported,
            Self::InvalidChannel(_) => FailureClass::Usage,
            Self::InvalidImageSize(_) | Self::Image(_) => FailureClass::InvalidImage,
            Self::DeviceDidNotReturn(_) => FailureClass::DeviceDidNotReturn,
            Self::DeviceInfoUnavailable => FailureClass::DeviceInfoUnavailable,
            Self::VersionMismatch { .. } => FailureClass::VersionMismatch,
        }
    }

    /// True when the factory found nothing to talk to
    pub fn is_device_absent(&self) -> bool {
        self.class() == FailureClass::McuAbsent
    }
}

/// Result type alias using the core Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_error_code() {
        assert_eq!(BusError::Os(6).code(), -6);
        assert_eq!(BusError::NotOperational.code(), -19);
        assert_eq!(BusError::BlockTooLong(33).code(), -22);
    }

    #[test]
    fn test_bus_error_from_io() {
        let err = std::io::Error::from_raw_os_error(121);
        assert_eq!(BusError::from(err), BusError::Os(121));
    }

    #[test]
    fn test_device_absent_message() {
        let err = Error::DeviceAbsent {
            device: "/dev/i2c-3, 0x2a".into(),
            ident: Some(0x11),
        };
        assert_eq!(
            err.to_string(),
            "MCU init failed: no supported MCU at /dev/i2c-3, 0x2a (ident 0x11)"
        );
        assert!(err.is_device_absent());
    }

    #[test]
    fn test_classes_are_distinct() {
        let verify = Error::VerifyFailed {
            device: String::new(),
            offset: 0x280,
        };
        assert_eq!(verify.class(), FailureClass::FlashWriteFailed);
        assert_eq!(
            Error::DeviceDidNotReturn(20).class(),
            FailureClass::DeviceDidNotReturn
        );
        assert_eq!(
            Error::VersionMismatch {
                expected: "2".into(),
                actual: "1".into()
            }
            .class(),
            FailureClass::VersionMismatch
        );
    }
}
