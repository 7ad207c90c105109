//! Memcached Response Protocol
//!
//! This module understands everything that comes back over a memcached
//! text-protocol connection.
//!
//! ## Overview
//!
//! A response is a CRLF-terminated header line, optionally followed by a
//! binary value of declared length and its own CRLF. Both the meta protocol
//! (`HD`, `VA`, `EN`, `MN`, ...) and the classic protocol (`STORED`,
//! `VALUE ... END`, ...) are recognised.
//!
//! ## Modules
//!
//! - `types`: Defines `Response`, `ResponseCode` and classic `Item`s
//! - `parser`: Stateless header line parser and `ParseError`
//! - `reader`: Resumable `ResponseReader` state machine fed from the socket
//!
//! ## Example
//!
//! ```
//! use memlink::protocol::{ResponseCode, ResponseReader};
//! use bytes::BytesMut;
//!
//! let mut reader = ResponseReader::new();
//! let mut buffer = BytesMut::from(&b"STORED\r\nHD c12\r\n"[..]);
//!
//! let first = reader.next(&mut buffer).unwrap().unwrap();
//! assert_eq!(first.code(), ResponseCode::Stored);
//!
//! let second = reader.next(&mut buffer).unwrap().unwrap();
//! assert_eq!(second.cas(), Some(12));
//! ```

pub mod parser;
pub mod reader;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{parse_header, Header, ParseError, ParseResult};
pub use reader::ResponseReader;
pub use types::{Item, Response, ResponseCode};
