//! CLI error type and exit codes

use std::path::PathBuf;

use bpmcu_core::FailureClass;
use thiserror::Error;

/// Exit code for a failed firmware update
pub const EXIT_UPDATE_FAILED: u8 = 10;
/// Exit code when no MCU answered
pub const EXIT_MCU_ABSENT: u8 = 11;
/// Exit code when the MCU did not come back after the reboot
pub const EXIT_NO_RETURN: u8 = 12;
/// Exit code when the MCU came back with an unexpected version
pub const EXIT_VERSION_MISMATCH: u8 = 13;

#[derive(Debug, Error)]
pub enum CliError {
    /// A management command failed
    #[error(transparent)]
    Mcu(#[from] bpmcu_core::Error),

    /// A firmware update failed
    #[error("firmware update failed: {0}")]
    Update(#[source] bpmcu_core::Error),

    /// Bad arguments
    #[error("{0}")]
    Usage(String),

    #[error("failed to read config {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// At least one scanned device could not be updated
    #[error("{failed} of {total} device(s) failed")]
    ScanFailed { failed: usize, total: usize },
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Mcu(e) if e.is_device_absent() => EXIT_MCU_ABSENT,
            CliError::Mcu(_) => 1,
            CliError::Update(e) => update_exit_code(e.class()),
            CliError::ScanFailed { .. } => EXIT_UPDATE_FAILED,
            CliError::Usage(_) | CliError::Config { .. } | CliError::ConfigParse { .. } => 1,
        }
    }
}

fn update_exit_code(class: FailureClass) -> u8 {
    match class {
        FailureClass::McuAbsent => EXIT_MCU_ABSENT,
        FailureClass::DeviceDidNotReturn => EXIT_NO_RETURN,
        FailureClass::VersionMismatch => EXIT_VERSION_MISMATCH,
        FailureClass::FlashWriteFailed
        | FailureClass::Communication
        | FailureClass::InvalidImage
        | FailureClass::DeviceInfoUnavailable => EXIT_UPDATE_FAILED,
        FailureClass::Unsupported | FailureClass::Usage => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bpmcu_core::{BusError, Error};

    fn absent() -> Error {
        Error::DeviceAbsent {
            device: "/dev/i2c-3, 0x2a".into(),
            ident: None,
        }
    }

    #[test]
    fn test_update_exit_codes() {
        let cases = [
            (
                Error::VerifyFailed {
                    device: String::new(),
                    offset: 0,
                },
                10,
            ),
            (
                Error::Communication {
                    device: String::new(),
                    op: "write flash",
                    source: BusError::Os(6),
                },
                10,
            ),
            (Error::InvalidImageSize(12), 10),
            (Error::DeviceInfoUnavailable, 10),
            (absent(), 11),
            (Error::DeviceDidNotReturn(20), 12),
            (
                Error::VersionMismatch {
                    expected: "2".into(),
                    actual: "1".into(),
                },
                13,
            ),
        ];
        for (err, code) in cases {
            assert_eq!(CliError::Update(err).exit_code(), code);
        }
    }

    #[test]
    fn test_management_exit_codes() {
        assert_eq!(CliError::Mcu(absent()).exit_code(), 11);
        assert_eq!(CliError::Mcu(Error::InvalidChannel(9)).exit_code(), 1);
        assert_eq!(CliError::Usage("bad bus".into()).exit_code(), 1);
        assert_eq!(
            CliError::ScanFailed {
                failed: 1,
                total: 3
            }
            .exit_code(),
            10
        );
    }
}
