// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use std::fmt;
use std::process::ExitCode;

/// CLI-specific error type with exit code mapping
#[derive(Debug)]
pub enum CliError {
    /// Invalid command-line arguments
    InvalidArgs(String),
    /// VSP device node or entity not found or inaccessible
    DeviceNotFound(String),
    /// The kernel refused a request
    DeviceRejected(String),
    /// The hardware did not finish a frame in time
    Timeout(String),
    /// Pixel format or format pair the VSP cannot handle
    UnsupportedFormat(String),
    /// General error from the VSP filter library
    General(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::InvalidArgs(msg) => write!(f, "Invalid arguments: {}", msg),
            CliError::DeviceNotFound(msg) => write!(f, "Device not found: {}", msg),
            CliError::DeviceRejected(msg) => write!(f, "Device rejected request: {}", msg),
            CliError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            CliError::UnsupportedFormat(msg) => write!(f, "Unsupported format: {}", msg),
            CliError::General(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for CliError {}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> ExitCode {
        match self {
            CliError::InvalidArgs(_) => ExitCode::from(2),
            CliError::DeviceNotFound(_) => ExitCode::from(3),
            CliError::DeviceRejected(_) => ExitCode::from(4),
            CliError::Timeout(_) => ExitCode::from(6),
            CliError::UnsupportedFormat(_) => ExitCode::from(7),
            CliError::General(_) => ExitCode::from(1),
        }
    }
}

/// Map vspfilter::Error to CliError with appropriate exit codes
impl From<vspfilter::Error> for CliError {
    fn from(err: vspfilter::Error) -> Self {
        use vspfilter::Error;

        if err.is_device_missing() {
            return CliError::DeviceNotFound(err.to_string());
        }

        match err {
            Error::DeviceRejected { .. } => CliError::DeviceRejected(err.to_string()),
            Error::DeviceTimeout(_) => CliError::Timeout(err.to_string()),
            Error::UnsupportedFormat(_) | Error::FormatMismatch(_) => {
                CliError::UnsupportedFormat(err.to_string())
            }
            // A configured path naming the wrong node
            Error::ConfigInvalid(_) => CliError::DeviceNotFound(err.to_string()),
            _ => CliError::General(err.to_string()),
        }
    }
}

/// Helper function to convert result to exit code
pub fn result_to_exit_code<T>(result: Result<T, CliError>) -> ExitCode {
    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            e.exit_code()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            CliError::InvalidArgs("test".into()).exit_code(),
            ExitCode::from(2)
        );
        assert_eq!(
            CliError::DeviceNotFound("test".into()).exit_code(),
            ExitCode::from(3)
        );
        assert_eq!(
            CliError::DeviceRejected("test".into()).exit_code(),
            ExitCode::from(4)
        );
        assert_eq!(
            CliError::Timeout("test".into()).exit_code(),
            ExitCode::from(6)
        );
        assert_eq!(
            CliError::UnsupportedFormat("test".into()).exit_code(),
            ExitCode::from(7)
        );
        assert_eq!(
            CliError::General("test".into()).exit_code(),
            ExitCode::from(1)
        );
    }

    #[test]
    fn test_library_mapping() {
        let err = CliError::from(vspfilter::Error::DeviceTimeout(Duration::from_secs(2)));
        assert!(matches!(err, CliError::Timeout(_)));

        let err = CliError::from(vspfilter::Error::UnsupportedFormat("H264".into()));
        assert!(matches!(err, CliError::UnsupportedFormat(_)));

        let err = CliError::from(vspfilter::Error::EntityNotFound("vsp uds.0".into()));
        assert!(matches!(err, CliError::DeviceNotFound(_)));

        let io = std::io::Error::from(std::io::ErrorKind::NotFound);
        let err = CliError::from(vspfilter::Error::from(io));
        assert!(matches!(err, CliError::DeviceNotFound(_)));

        let err = CliError::from(vspfilter::Error::NotNegotiated);
        assert!(matches!(err, CliError::General(_)));
    }

    #[test]
    fn test_error_display() {
        let err = CliError::DeviceNotFound("/dev/video0".to_string());
        assert_eq!(format!("{}", err), "Device not found: /dev/video0");
    }
}
