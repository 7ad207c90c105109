//! Command Encoding Seam
//!
//! The connection layer never interprets what a command means. It asks a
//! [`Command`] for its wire bytes once, at `send()` time, and transports them.
//! The verb-specific encoders of a full client live outside this crate and
//! plug in through the [`Command`] and [`KeyTranslator`] traits.
//!
//! The few commands the connection itself must issue are defined here:
//!
//! - [`NoopCommand`] - the meta no-op used as a keepalive probe (`mn`)
//! - [`AuthenticationCommand`] - the text-protocol credential `set`
//! - [`RawCommand`] - already-encoded bytes, handy for tools and tests

use crate::connection::Authentication;
use crate::protocol::types::CRLF;
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Longest key memcached accepts
pub const MAX_KEY_LENGTH: usize = 250;

/// Errors raised while encoding a command.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("key is empty")]
    EmptyKey,

    #[error("key too long: {length} bytes (max: {max})")]
    KeyTooLong { length: usize, max: usize },

    #[error("key contains whitespace or control characters: {0:?}")]
    InvalidKey(String),
}

/// Maps caller keys onto keys the server will accept.
pub trait KeyTranslator: Send + Sync {
    fn encode(&self, key: &str) -> Result<String, CommandError>;
}

/// Passes keys through unchanged after checking memcached's key rules.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultKeyTranslator;

impl KeyTranslator for DefaultKeyTranslator {
    fn encode(&self, key: &str) -> Result<String, CommandError> {
        if key.is_empty() {
            return Err(CommandError::EmptyKey);
        }
        if key.len() > MAX_KEY_LENGTH {
            return Err(CommandError::KeyTooLong {
                length: key.len(),
                max: MAX_KEY_LENGTH,
            });
        }
        if key.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(CommandError::InvalidKey(key.to_string()));
        }
        Ok(key.to_string())
    }
}

/// A request that can be written to a memcached connection.
pub trait Command: Send + Sync {
    /// Produces the complete wire bytes for this command, CRLFs included.
    fn construct(&self, translator: &dyn KeyTranslator) -> Result<Bytes, CommandError>;
}

/// Meta no-op. The server answers `MN` once everything before it is answered.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCommand;

impl Command for NoopCommand {
    fn construct(&self, _translator: &dyn KeyTranslator) -> Result<Bytes, CommandError> {
        Ok(Bytes::from_static(b"mn\r\n"))
    }
}

/// Sends credentials the way memcached's text protocol expects them: a `set`
/// whose data block is `<username> <password>`. Success is `STORED`.
#[derive(Debug, Clone)]
pub struct AuthenticationCommand {
    authentication: Authentication,
}

impl AuthenticationCommand {
    pub fn new(authentication: Authentication) -> Self {
        Self { authentication }
    }
}

impl Command for AuthenticationCommand {
    fn construct(&self, _translator: &dyn KeyTranslator) -> Result<Bytes, CommandError> {
        let credentials = format!(
            "{} {}",
            self.authentication.username(),
            self.authentication.password()
        );
        let header = format!("set auth 0 0 {}\r\n", credentials.len());

        let mut buf = BytesMut::with_capacity(header.len() + credentials.len() + CRLF.len());
        buf.put_slice(header.as_bytes());
        buf.put_slice(credentials.as_bytes());
        buf.put_slice(CRLF);
        Ok(buf.freeze())
    }
}

/// Bytes that are already encoded.
#[derive(Debug, Clone)]
pub struct RawCommand {
    bytes: Bytes,
}

impl RawCommand {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// A single text line; CRLF is appended.
    pub fn line(line: &str) -> Self {
        let mut buf = BytesMut::with_capacity(line.len() + CRLF.len());
        buf.put_slice(line.as_bytes());
        buf.put_slice(CRLF);
        Self { bytes: buf.freeze() }
    }
}

impl Command for RawCommand {
    fn construct(&self, _translator: &dyn KeyTranslator) -> Result<Bytes, CommandError> {
        Ok(self.bytes.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_translator_accepts_plain_keys() {
        assert_eq!(DefaultKeyTranslator.encode("user:101").unwrap(), "user:101");
    }

    #[test]
    fn test_default_translator_rejects_bad_keys() {
        assert_eq!(DefaultKeyTranslator.encode(""), Err(CommandError::EmptyKey));
        assert!(matches!(
            DefaultKeyTranslator.encode("has space"),
            Err(CommandError::InvalidKey(_))
        ));
        assert!(matches!(
            DefaultKeyTranslator.encode(&"k".repeat(MAX_KEY_LENGTH + 1)),
            Err(CommandError::KeyTooLong { .. })
        ));
    }

    #[test]
    fn test_noop_bytes() {
        let bytes = NoopCommand.construct(&DefaultKeyTranslator).unwrap();
        assert_eq!(&bytes[..], b"mn\r\n");
    }

    #[test]
    fn test_authentication_bytes() {
        let command = AuthenticationCommand::new(Authentication::new("alice", "secret"));
        let bytes = command.construct(&DefaultKeyTranslator).unwrap();
        assert_eq!(&bytes[..], b"set auth 0 0 12\r\nalice secret\r\n");
    }

    #[test]
    fn test_raw_line() {
        let bytes = RawCommand::line("get foo")
            .construct(&DefaultKeyTranslator)
            .unwrap();
        assert_eq!(&bytes[..], b"get foo\r\n");
    }
}
