use std::io;

use virtsock_transport::TransportError;

use crate::message::Message;

/// Errors surfaced by a half-close connection.
#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    /// The read side was already shut down.
    #[error("read side already closed")]
    ReadClosed,

    /// The write side was already shut down, locally or by the peer.
    #[error("write side already closed")]
    WriteClosed,

    /// The transport ended partway through a frame header.
    #[error("frame header truncated: expected {expected} bytes, got {actual}")]
    FrameSizeMismatch { expected: usize, actual: usize },

    /// The transport ended partway through a data payload.
    #[error("payload truncated: {missing} bytes still expected")]
    TruncatedPayload { missing: usize },

    /// A control frame could not be delivered.
    #[error("failed to send {message} frame: {source}")]
    ControlSend {
        message: Message,
        #[source]
        source: io::Error,
    },

    /// The transport accepted fewer bytes than a frame needed.
    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { expected: usize, written: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, ShutdownError>;

impl ShutdownError {
    /// The closest [`io::ErrorKind`] for this error.
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            ShutdownError::ReadClosed => io::ErrorKind::NotConnected,
            ShutdownError::WriteClosed => io::ErrorKind::BrokenPipe,
            ShutdownError::FrameSizeMismatch { .. } => io::ErrorKind::InvalidData,
            ShutdownError::TruncatedPayload { .. } => io::ErrorKind::UnexpectedEof,
            ShutdownError::ControlSend { source, .. } => source.kind(),
            ShutdownError::ShortWrite { .. } => io::ErrorKind::WriteZero,
            ShutdownError::Io(err) | ShutdownError::Transport(TransportError::Io(err)) => {
                err.kind()
            }
            ShutdownError::Transport(_) => io::ErrorKind::Other,
        }
    }
}

impl From<ShutdownError> for io::Error {
    fn from(err: ShutdownError) -> Self {
        match err {
            ShutdownError::Io(inner) | ShutdownError::Transport(TransportError::Io(inner)) => inner,
            other => io::Error::new(other.kind(), other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_pass_through_unwrapped() {
        let err = ShutdownError::Io(io::Error::new(io::ErrorKind::TimedOut, "deadline"));
        let io_err: io::Error = err.into();
        assert_eq!(io_err.kind(), io::ErrorKind::TimedOut);
        assert_eq!(io_err.to_string(), "deadline");
    }

    #[test]
    fn closed_sides_map_to_distinct_kinds() {
        assert_eq!(
            io::Error::from(ShutdownError::ReadClosed).kind(),
            io::ErrorKind::NotConnected
        );
        assert_eq!(
            io::Error::from(ShutdownError::WriteClosed).kind(),
            io::ErrorKind::BrokenPipe
        );
    }

    #[test]
    fn control_send_keeps_source_kind() {
        let err = ShutdownError::ControlSend {
            message: Message::ShutdownWrite,
            source: io::Error::from(io::ErrorKind::ConnectionReset),
        };
        assert!(err.to_string().starts_with("failed to send shutdown-write frame"));
        assert_eq!(io::Error::from(err).kind(), io::ErrorKind::ConnectionReset);
    }
}
