//! Memcached Response Types
//!
//! This module defines the parsed form of everything a memcached server can
//! send back on a text-protocol connection.
//!
//! ## Protocol Format
//!
//! Every response starts with a header line terminated by CRLF (`\r\n`).
//! Some headers declare a binary value of known length, which follows the
//! header and is itself terminated by CRLF.
//!
//! Two families of headers are understood:
//!
//! - **Meta protocol**: a two-letter code followed by flag tokens
//!   (`HD c42 Oabc\r\n`, `VA 3 f0\r\nbar\r\n`, `EN\r\n`, `MN\r\n`)
//! - **Classic protocol**: a word followed by positional arguments
//!   (`STORED\r\n`, `VALUE foo 0 3\r\nbar\r\nEND\r\n`, `VERSION 1.6.21\r\n`)
//!
//! Error lines (`ERROR`, `CLIENT_ERROR <msg>`, `SERVER_ERROR <msg>`) parse into
//! ordinary responses; turning them into caller-visible failures is the
//! connection's job.

use bytes::Bytes;
use std::fmt;

/// The CRLF terminator used by every memcached response line
pub const CRLF: &[u8] = b"\r\n";

/// The status of a parsed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    /// `HD` - success with no value
    Hd,
    /// `VA` - success carrying a value
    Va,
    /// `EN` - miss
    En,
    /// `NF` - not found
    Nf,
    /// `NS` - not stored
    Ns,
    /// `EX` - cas mismatch
    Ex,
    /// `MN` - meta no-op
    Mn,

    Stored,
    NotStored,
    Exists,
    NotFound,
    Deleted,
    Touched,
    Ok,
    /// `END` with no preceding `VALUE` block (classic miss)
    End,
    /// One or more `VALUE` blocks terminated by `END`
    Value,
    /// Bare decimal line answering `incr`/`decr`
    Numeric,
    Version,

    /// `ERROR` - the server did not understand the request
    Error,
    /// `CLIENT_ERROR <message>`
    ClientError,
    /// `SERVER_ERROR <message>`
    ServerError,
}

impl ResponseCode {
    /// Returns true for the three error line kinds.
    pub fn is_error(self) -> bool {
        matches!(
            self,
            ResponseCode::Error | ResponseCode::ClientError | ResponseCode::ServerError
        )
    }

    /// Returns true if this code belongs to the meta protocol.
    pub fn is_meta(self) -> bool {
        matches!(
            self,
            ResponseCode::Hd
                | ResponseCode::Va
                | ResponseCode::En
                | ResponseCode::Nf
                | ResponseCode::Ns
                | ResponseCode::Ex
                | ResponseCode::Mn
        )
    }

    /// Returns true if the code is one of the given codes.
    pub fn is_in(self, codes: &[ResponseCode]) -> bool {
        codes.contains(&self)
    }

    /// The wire spelling of this code.
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseCode::Hd => "HD",
            ResponseCode::Va => "VA",
            ResponseCode::En => "EN",
            ResponseCode::Nf => "NF",
            ResponseCode::Ns => "NS",
            ResponseCode::Ex => "EX",
            ResponseCode::Mn => "MN",
            ResponseCode::Stored => "STORED",
            ResponseCode::NotStored => "NOT_STORED",
            ResponseCode::Exists => "EXISTS",
            ResponseCode::NotFound => "NOT_FOUND",
            ResponseCode::Deleted => "DELETED",
            ResponseCode::Touched => "TOUCHED",
            ResponseCode::Ok => "OK",
            ResponseCode::End => "END",
            ResponseCode::Value => "VALUE",
            ResponseCode::Numeric => "NUMERIC",
            ResponseCode::Version => "VERSION",
            ResponseCode::Error => "ERROR",
            ResponseCode::ClientError => "CLIENT_ERROR",
            ResponseCode::ServerError => "SERVER_ERROR",
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single item from a classic `VALUE` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub key: String,
    pub flags: u32,
    /// CAS unique, present when the request was a `gets`/`gats`.
    pub cas: Option<u64>,
    pub data: Bytes,
}

/// A fully parsed memcached response.
///
/// Header fields that the server did not send are `None`/`false`. The value
/// payload is present only when the header declared one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    code: ResponseCode,
    token: Option<String>,
    key: Option<String>,
    cas: Option<u64>,
    size: Option<u32>,
    client_flags: Option<u32>,
    ttl: Option<i64>,
    won: bool,
    also_won: bool,
    stale: bool,
    hit_before: Option<bool>,
    last_access: Option<u32>,
    base64_key: bool,
    number: Option<u64>,
    message: Option<String>,
    value: Option<Bytes>,
    items: Vec<Item>,
}

impl Response {
    /// Creates a response with the given code and no other fields.
    pub fn new(code: ResponseCode) -> Self {
        Self {
            code,
            token: None,
            key: None,
            cas: None,
            size: None,
            client_flags: None,
            ttl: None,
            won: false,
            also_won: false,
            stale: false,
            hit_before: None,
            last_access: None,
            base64_key: false,
            number: None,
            message: None,
            value: None,
            items: Vec::new(),
        }
    }

    /// Creates an error-line response carrying the server's message.
    pub fn error(code: ResponseCode, message: impl Into<String>) -> Self {
        let mut response = Response::new(code);
        response.message = Some(message.into());
        response
    }

    /// Creates a classic `incr`/`decr` response.
    pub fn numeric(number: u64) -> Self {
        let mut response = Response::new(ResponseCode::Numeric);
        response.number = Some(number);
        response
    }

    pub fn code(&self) -> ResponseCode {
        self.code
    }

    /// Opaque token echoed back by a meta command (`O` flag).
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn cas(&self) -> Option<u64> {
        self.cas
    }

    pub fn size(&self) -> Option<u32> {
        self.size
    }

    pub fn client_flags(&self) -> Option<u32> {
        self.client_flags
    }

    pub fn ttl(&self) -> Option<i64> {
        self.ttl
    }

    /// `W` flag: this client won the right to recache.
    pub fn won(&self) -> bool {
        self.won
    }

    /// `Z` flag: a win token was already handed out.
    pub fn also_won(&self) -> bool {
        self.also_won
    }

    /// `X` flag: the item is stale.
    pub fn stale(&self) -> bool {
        self.stale
    }

    /// `h` flag: whether the item had been fetched before this request.
    pub fn hit_before(&self) -> Option<bool> {
        self.hit_before
    }

    /// `l` flag: seconds since the item was last accessed.
    pub fn last_access(&self) -> Option<u32> {
        self.last_access
    }

    /// `b` flag: the returned key is base64 encoded.
    pub fn base64_key(&self) -> bool {
        self.base64_key
    }

    pub fn number(&self) -> Option<u64> {
        self.number
    }

    /// Message text of an error line, or the version string.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// The value payload. For classic retrievals this is the first item's data.
    pub fn value(&self) -> Option<&Bytes> {
        self.value.as_ref()
    }

    /// All items of a classic retrieval, in the order the server sent them.
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Returns true if the response is one of the error lines.
    pub fn is_error(&self) -> bool {
        self.code.is_error()
    }

    /// Returns true if the response reports a miss.
    pub fn is_miss(&self) -> bool {
        matches!(
            self.code,
            ResponseCode::En | ResponseCode::Nf | ResponseCode::NotFound | ResponseCode::End
        )
    }

    pub(crate) fn set_token(&mut self, token: String) {
        self.token = Some(token);
    }

    pub(crate) fn set_key(&mut self, key: String) {
        self.key = Some(key);
    }

    pub(crate) fn set_cas(&mut self, cas: u64) {
        self.cas = Some(cas);
    }

    pub(crate) fn set_size(&mut self, size: u32) {
        self.size = Some(size);
    }

    pub(crate) fn set_client_flags(&mut self, flags: u32) {
        self.client_flags = Some(flags);
    }

    pub(crate) fn set_ttl(&mut self, ttl: i64) {
        self.ttl = Some(ttl);
    }

    pub(crate) fn set_won(&mut self) {
        self.won = true;
    }

    pub(crate) fn set_also_won(&mut self) {
        self.also_won = true;
    }

    pub(crate) fn set_stale(&mut self) {
        self.stale = true;
    }

    pub(crate) fn set_hit_before(&mut self, hit: bool) {
        self.hit_before = Some(hit);
    }

    pub(crate) fn set_last_access(&mut self, seconds: u32) {
        self.last_access = Some(seconds);
    }

    pub(crate) fn set_base64_key(&mut self) {
        self.base64_key = true;
    }

    pub(crate) fn set_message(&mut self, message: String) {
        self.message = Some(message);
    }

    pub(crate) fn set_value(&mut self, value: Bytes) {
        self.value = Some(value);
    }

    /// Appends a classic item; the first one also becomes the response's
    /// key, flags, cas and value.
    pub(crate) fn push_item(&mut self, item: Item) {
        if self.items.is_empty() {
            self.key = Some(item.key.clone());
            self.client_flags = Some(item.flags);
            self.cas = item.cas;
            self.value = Some(item.data.clone());
        }
        self.items.push(item);
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)?;
        if let Some(number) = self.number {
            write!(f, " {}", number)?;
        }
        if let Some(message) = &self.message {
            write!(f, " {}", message)?;
        }
        if let Some(cas) = self.cas {
            write!(f, " cas={}", cas)?;
        }
        if let Some(token) = &self.token {
            write!(f, " opaque={}", token)?;
        }
        if self.items.len() > 1 {
            for item in &self.items {
                write!(f, "\n  {} ", item.key)?;
                write_value(f, &item.data)?;
            }
        } else if let Some(value) = &self.value {
            f.write_str(" ")?;
            write_value(f, value)?;
        }
        Ok(())
    }
}

fn write_value(f: &mut fmt::Formatter<'_>, value: &Bytes) -> fmt::Result {
    match std::str::from_utf8(value) {
        Ok(s) => write!(f, "\"{}\"", s),
        Err(_) => write!(f, "(binary data, {} bytes)", value.len()),
    }
}
