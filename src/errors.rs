use log::error;
use snafu::Snafu;

pub use crate::errors::Error::*;

/// Errors surfaced to callers of the client API.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// No board found: no serial port answered with arduino_instance_id {instance_id}
    NoBoard { instance_id: u8 },
    /// Firmware version mismatch: expected a "{expected}" prefix, found "{found}"
    VersionMismatch {
        expected: &'static str,
        found: String,
    },
    /// '{operation}' received no reply within the query timeout
    Timeout { operation: &'static str },
    /// Transport is closed or the connection to the board was lost
    Disconnected,
    /// Invalid argument: {context}
    InvalidArgument { context: String },
    /// I/O failure: {info}
    IoException { info: String },
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        error!("std::io error {:?}", error);
        match error.kind() {
            std::io::ErrorKind::NotFound => Self::IoException {
                info: String::from("Board not found or already in use"),
            },
            std::io::ErrorKind::PermissionDenied
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted => Self::Disconnected,
            _ => Self::IoException {
                info: error.to_string(),
            },
        }
    }
}

impl From<serialport::Error> for Error {
    fn from(error: serialport::Error) -> Self {
        std::io::Error::from(error).into()
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn test_error_display() {
        let no_board = NoBoard { instance_id: 1 };
        assert_eq!(
            format!("{}", no_board),
            "No board found: no serial port answered with arduino_instance_id 1"
        );

        let mismatch = VersionMismatch {
            expected: "1.2",
            found: String::from("2.5 StandardFirmata.ino"),
        };
        assert_eq!(
            format!("{}", mismatch),
            "Firmware version mismatch: expected a \"1.2\" prefix, found \"2.5 StandardFirmata.ino\""
        );

        let timeout = Timeout {
            operation: "get_firmware_version",
        };
        assert_eq!(
            format!("{}", timeout),
            "'get_firmware_version' received no reply within the query timeout"
        );

        let invalid = InvalidArgument {
            context: String::from("unknown digital pin 66"),
        };
        assert_eq!(
            format!("{}", invalid),
            "Invalid argument: unknown digital pin 66"
        );
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: Error = io_error.into();
        assert_eq!(
            format!("{}", error),
            "I/O failure: Board not found or already in use"
        );

        let io_error = io::Error::new(io::ErrorKind::BrokenPipe, "gone");
        let error: Error = io_error.into();
        assert!(matches!(error, Disconnected));
    }

    #[test]
    fn test_from_serial_error() {
        let serial_error = serialport::Error {
            kind: serialport::ErrorKind::Unknown,
            description: String::from("test error"),
        };
        let error: Error = serial_error.into();
        assert_eq!(format!("{}", error), "I/O failure: test error");

        let serial_error = serialport::Error {
            kind: serialport::ErrorKind::Io(io::ErrorKind::NotFound),
            description: String::from("IO error"),
        };
        let error: Error = serial_error.into();
        assert_eq!(
            format!("{}", error),
            "I/O failure: Board not found or already in use"
        );
    }
}
