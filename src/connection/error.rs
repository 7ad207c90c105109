use crate::commands::CommandError;
use crate::protocol::ParseError;
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Errors a caller of `send()` / `start()` can see.
///
/// `Clone` so that one causal error can fail every pending callback when the
/// connection goes down.
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    /// The caller stopped waiting. The connection is unaffected.
    #[error("request timed out")]
    Timeout,

    #[error("connect timed out")]
    ConnectTimeout,

    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    /// The peer closed its end of the socket
    #[error("server closed the connection")]
    ServerClosed,

    /// A response arrived with no request waiting for it
    #[error("response stream desynchronized: no request in flight")]
    Desynchronized,

    #[error("protocol error: {0}")]
    Protocol(#[from] ParseError),

    /// The server answered `ERROR`
    #[error("server did not understand request: {0:?}")]
    IncomprehensibleRequest(String),

    #[error("client error: {0}")]
    ClientError(String),

    #[error("server error: {0}")]
    ServerError(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The socket kept reporting readiness it could not honour
    #[error("socket readiness invalid {0} times in a row")]
    InvalidReadiness(u32),

    /// Blocking mode: no complete response within the read timeout
    #[error("read timed out")]
    ReadTimeout,

    #[error("connection not started")]
    NotStarted,

    #[error("connection closed")]
    Closed,

    #[error("invalid command: {0}")]
    Command(#[from] CommandError),
}

impl From<io::Error> for ConnectionError {
    fn from(err: io::Error) -> Self {
        ConnectionError::Io(Arc::new(err))
    }
}

impl ConnectionError {
    /// Returns true if this error, raised on the I/O side, means the
    /// connection must be torn down.
    pub fn is_fatal(&self) -> bool {
        match self {
            ConnectionError::Io(_)
            | ConnectionError::ServerClosed
            | ConnectionError::Desynchronized
            | ConnectionError::InvalidReadiness(_)
            | ConnectionError::ReadTimeout
            | ConnectionError::Closed => true,
            ConnectionError::Protocol(err) => err.is_fatal(),
            _ => false,
        }
    }

    /// Returns true for socket-level failures.
    pub fn is_io(&self) -> bool {
        matches!(self, ConnectionError::Io(_) | ConnectionError::ServerClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(!ConnectionError::Timeout.is_fatal());
        assert!(!ConnectionError::ClientError("bad".into()).is_fatal());
        assert!(!ConnectionError::IncomprehensibleRequest("bogus".into()).is_fatal());
        assert!(ConnectionError::ServerClosed.is_fatal());
        assert!(ConnectionError::Desynchronized.is_fatal());
        assert!(ConnectionError::Protocol(ParseError::MissingTerminator).is_fatal());
        assert!(!ConnectionError::Protocol(ParseError::UnknownFlag('q')).is_fatal());
    }

    #[test]
    fn test_io_errors_are_cloneable() {
        let err = ConnectionError::from(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        let copy = err.clone();
        assert!(copy.is_io());
        assert!(copy.to_string().contains("reset"));
    }
}
