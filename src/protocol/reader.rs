//! Resumable Response Reader
//!
//! The socket hands us bytes in whatever chunks the kernel felt like
//! delivering. A response may arrive split across many reads, and one read
//! may carry several responses. [`ResponseReader`] is the state machine that
//! bridges the two: every call to [`ResponseReader::next`] consumes bytes from
//! the front of the caller's buffer and either yields one complete response
//! or keeps its partial progress for the next call.
//!
//! ## States
//!
//! ```text
//!            ┌───────────────────────────┐
//!            │    ReadingHeaderLine      │◄──────────────┐
//!            │  (accumulate until CRLF)  │               │
//!            └─────────────┬─────────────┘               │
//!                          │ header parsed               │
//!          ┌───────────────┼────────────────┐            │
//!          ▼               ▼                ▼            │
//!   no value declared   VA <len>     VALUE k f <len>     │
//!   emit response          │                │            │
//!                          ▼                ▼            │
//!            ┌───────────────────────────┐               │
//!            │     ReadingValueBody      │───────────────┘
//!            │  (copy len + 2 bytes)     │  VA: emit / VALUE: wait for END
//!            └───────────────────────────┘
//! ```
//!
//! A lone `\r` not followed by `\n` is kept as literal line data.
//!
//! A value header whose length parses but whose flags do not still has its
//! body consumed, so exactly one error comes out for that one response and
//! the reader stays aligned with the stream.

use crate::protocol::parser::{parse_header, Header, ParseError, ParseResult, MAX_LINE_LENGTH};
use crate::protocol::types::{Item, Response, ResponseCode, CRLF};
use bytes::{Buf, BytesMut};

/// Upper bound on how much value buffer is reserved before bytes arrive
const MAX_VALUE_PREALLOCATION: usize = 64 * 1024;

/// Where a value body goes once it is complete.
#[derive(Debug)]
enum BodyTarget {
    /// Meta `VA` response; emitted as soon as the body completes.
    Meta(Response),
    /// Classic `VALUE` item; collected until `END`.
    Item {
        key: String,
        flags: u32,
        cas: Option<u64>,
    },
    /// Body of a rejected header; skipped, then `error` is reported.
    Discard { error: ParseError, item: bool },
}

#[derive(Debug)]
enum ReadState {
    ReadingHeaderLine {
        line: Vec<u8>,
        carriage_return: bool,
    },
    ReadingValueBody {
        target: BodyTarget,
        value: BytesMut,
        /// Total bytes the body occupies on the wire, terminator included
        needed: usize,
    },
}

impl ReadState {
    fn header() -> Self {
        ReadState::ReadingHeaderLine {
            line: Vec::new(),
            carriage_return: false,
        }
    }
}

/// Incremental parser for the memcached response stream.
///
/// # Example
///
/// ```
/// use memlink::protocol::{ResponseReader, ResponseCode};
/// use bytes::BytesMut;
///
/// let mut reader = ResponseReader::new();
/// let mut buffer = BytesMut::from(&b"VALUE foo 0 3\r\nb"[..]);
/// assert!(reader.next(&mut buffer).unwrap().is_none());
///
/// buffer.extend_from_slice(b"ar\r\nEND\r\n");
/// let response = reader.next(&mut buffer).unwrap().unwrap();
/// assert_eq!(response.code(), ResponseCode::Value);
/// assert_eq!(&response.value().unwrap()[..], b"bar");
/// ```
#[derive(Debug)]
pub struct ResponseReader {
    state: ReadState,
    /// Classic retrieval being assembled between `VALUE` blocks and `END`
    retrieval: Option<Response>,
    /// First rejected item of the current retrieval, reported at `END`
    retrieval_error: Option<ParseError>,
}

impl Default for ResponseReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseReader {
    pub fn new() -> Self {
        Self {
            state: ReadState::header(),
            retrieval: None,
            retrieval_error: None,
        }
    }

    /// Returns true if no partial response is held.
    pub(crate) fn is_idle(&self) -> bool {
        self.retrieval.is_none()
            && matches!(
                &self.state,
                ReadState::ReadingHeaderLine { line, carriage_return } if line.is_empty() && !carriage_return
            )
    }

    /// Discards any partial state.
    pub fn reset(&mut self) {
        self.state = ReadState::header();
        self.retrieval = None;
        self.retrieval_error = None;
    }

    /// Drops a classic retrieval in progress. Returns true if there was one.
    fn abandon_retrieval(&mut self) -> bool {
        self.retrieval_error = None;
        self.retrieval.take().is_some()
    }

    /// Consumes bytes from the front of `input` until one response completes
    /// or the input runs dry.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(response))` - a response completed; `input` may still hold more
    /// - `Ok(None)` - `input` is exhausted, partial progress is retained
    /// - `Err(e)` - the bytes could not be interpreted; see [`ParseError::is_fatal`]
    pub fn next(&mut self, input: &mut BytesMut) -> ParseResult<Option<Response>> {
        loop {
            if input.is_empty() {
                return Ok(None);
            }

            let outcome = match &mut self.state {
                ReadState::ReadingHeaderLine {
                    line,
                    carriage_return,
                } => match scan_line(line, carriage_return, input) {
                    Some(complete) => {
                        self.state = ReadState::header();
                        self.on_header(&complete)?
                    }
                    None => {
                        if line.len() > MAX_LINE_LENGTH {
                            let length = line.len();
                            self.reset();
                            return Err(ParseError::LineTooLong {
                                length,
                                max: MAX_LINE_LENGTH,
                            });
                        }
                        return Ok(None);
                    }
                },
                ReadState::ReadingValueBody { value, needed, .. } => {
                    let take = (*needed - value.len()).min(input.len());
                    value.extend_from_slice(&input[..take]);
                    input.advance(take);

                    if value.len() < *needed {
                        return Ok(None);
                    }
                    self.on_body()?
                }
            };

            if outcome.is_some() {
                return Ok(outcome);
            }
        }
    }

    fn on_header(&mut self, line: &[u8]) -> ParseResult<Option<Response>> {
        let header = match parse_header(line) {
            Ok(header) => header,
            Err(err) => {
                if self.abandon_retrieval() {
                    return Err(ParseError::UnterminatedRetrieval(
                        String::from_utf8_lossy(line).into_owned(),
                    ));
                }
                return Err(err);
            }
        };

        match header {
            Header::Complete(response) => {
                if self.abandon_retrieval() {
                    return Err(ParseError::UnterminatedRetrieval(
                        response.code().to_string(),
                    ));
                }
                Ok(Some(response))
            }
            Header::Value { response, length } => {
                if self.abandon_retrieval() {
                    return Err(ParseError::UnterminatedRetrieval(
                        ResponseCode::Va.to_string(),
                    ));
                }
                self.begin_body(BodyTarget::Meta(response), length);
                Ok(None)
            }
            Header::Item {
                key,
                flags,
                cas,
                length,
            } => {
                self.begin_body(BodyTarget::Item { key, flags, cas }, length);
                Ok(None)
            }
            Header::Skip {
                length,
                item,
                error,
            } => {
                if !item && self.abandon_retrieval() {
                    return Err(ParseError::UnterminatedRetrieval(
                        ResponseCode::Va.to_string(),
                    ));
                }
                self.begin_body(BodyTarget::Discard { error, item }, length);
                Ok(None)
            }
            Header::End => {
                if let Some(error) = self.retrieval_error.take() {
                    self.retrieval = None;
                    return Err(error);
                }
                Ok(Some(
                    self.retrieval
                        .take()
                        .unwrap_or_else(|| Response::new(ResponseCode::End)),
                ))
            }
        }
    }

    fn begin_body(&mut self, target: BodyTarget, length: usize) {
        let needed = length + CRLF.len();
        self.state = ReadState::ReadingValueBody {
            target,
            value: BytesMut::with_capacity(needed.min(MAX_VALUE_PREALLOCATION)),
            needed,
        };
    }

    fn on_body(&mut self) -> ParseResult<Option<Response>> {
        let (target, mut value) = match std::mem::replace(&mut self.state, ReadState::header()) {
            ReadState::ReadingValueBody { target, value, .. } => (target, value),
            ReadState::ReadingHeaderLine { .. } => return Ok(None),
        };

        if !value.ends_with(CRLF) {
            self.abandon_retrieval();
            return Err(ParseError::MissingTerminator);
        }
        value.truncate(value.len() - CRLF.len());

        match target {
            BodyTarget::Meta(mut response) => {
                response.set_value(value.freeze());
                Ok(Some(response))
            }
            BodyTarget::Item { key, flags, cas } => {
                self.retrieval
                    .get_or_insert_with(|| Response::new(ResponseCode::Value))
                    .push_item(Item {
                        key,
                        flags,
                        cas,
                        data: value.freeze(),
                    });
                Ok(None)
            }
            BodyTarget::Discard { error, item: false } => Err(error),
            BodyTarget::Discard { error, item: true } => {
                if self.retrieval.is_none() {
                    self.retrieval = Some(Response::new(ResponseCode::Value));
                }
                if self.retrieval_error.is_none() {
                    self.retrieval_error = Some(error);
                }
                Ok(None)
            }
        }
    }
}

/// Moves bytes from `input` into `line` until a bare CRLF closes it.
///
/// Returns the completed line (without CRLF) and leaves whatever followed it
/// in `input`. Returns `None` once `input` is exhausted.
fn scan_line(line: &mut Vec<u8>, carriage_return: &mut bool, input: &mut BytesMut) -> Option<Vec<u8>> {
    for index in 0..input.len() {
        let byte = input[index];

        if *carriage_return {
            if byte == b'\n' {
                *carriage_return = false;
                input.advance(index + 1);
                return Some(std::mem::take(line));
            }
            line.push(b'\r');
            if byte != b'\r' {
                line.push(byte);
                *carriage_return = false;
            }
        } else if byte == b'\r' {
            *carriage_return = true;
        } else {
            line.push(byte);
        }
    }

    input.clear();
    None
}
