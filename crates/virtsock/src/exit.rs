use std::fmt;
use std::io;

use virtsock_shutdown::ShutdownError;
use virtsock_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
/// The peer's close cut off data that was already in flight.
pub const DATA_LOST: i32 = 61;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => TRANSPORT_ERROR,
        io::ErrorKind::UnexpectedEof => DATA_LOST,
        io::ErrorKind::InvalidData => DATA_INVALID,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::InvalidAddress(_) | TransportError::PathTooLong { .. } => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn shutdown_error(context: &str, err: ShutdownError) -> CliError {
    match err {
        ShutdownError::Io(source) => io_error(context, source),
        ShutdownError::Transport(err) => transport_error(context, err),
        ShutdownError::TruncatedPayload { .. } => {
            CliError::new(DATA_LOST, format!("{context}: {err}"))
        }
        ShutdownError::FrameSizeMismatch { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_counts_as_data_loss() {
        let err = shutdown_error("receive", ShutdownError::TruncatedPayload { missing: 3 });
        assert_eq!(err.code, DATA_LOST);

        let eof = io_error("receive", io::Error::from(io::ErrorKind::UnexpectedEof));
        assert_eq!(eof.code, DATA_LOST);
    }

    #[test]
    fn unreachable_peer_is_a_transport_error() {
        let err = transport_error(
            "dial failed",
            TransportError::Connect {
                addr: "/tmp/missing.sock".to_string(),
                source: io::Error::from(io::ErrorKind::NotFound),
            },
        );
        assert_eq!(err.code, TRANSPORT_ERROR);
        assert!(err.message.starts_with("dial failed: "));
    }

    #[test]
    fn closed_write_side_is_a_plain_failure() {
        let err = shutdown_error("send", ShutdownError::WriteClosed);
        assert_eq!(err.code, FAILURE);
        assert_eq!(err.to_string(), "send: write side already closed");
    }
}
