//! Memcached Header Line Parser
//!
//! This module turns one complete header line (without its CRLF) into a
//! [`Header`], telling the reader whether the response is already complete or
//! whether a value body follows.
//!
//! ## What a header can announce
//!
//! - `Complete` - the response is the header alone (`STORED`, `HD c5`, `MN`)
//! - `Value` - a meta `VA <len>` header; `len` data bytes plus CRLF follow
//! - `Item` - a classic `VALUE <key> <flags> <len> [<cas>]` block header
//! - `End` - the classic `END` terminator of a retrieval
//! - `Skip` - a value header whose length is readable but whose other fields
//!   are not; the body is skipped and the error belongs to that one response
//!
//! The parser is deliberately stateless. Everything that spans calls lives in
//! [`ResponseReader`](crate::protocol::ResponseReader).

use crate::protocol::types::{Response, ResponseCode};
use thiserror::Error;

/// Errors that can occur while parsing the response stream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A header line grew past the allowed length without a CRLF
    #[error("header line too long: {length} bytes (max: {max})")]
    LineTooLong { length: usize, max: usize },

    /// The line is structurally broken
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The first token is not a response this client understands
    #[error("unknown response: {0}")]
    UnknownResponse(String),

    /// A numeric field did not parse
    #[error("invalid number: {0}")]
    InvalidNumber(String),

    /// A meta flag this client does not understand
    #[error("unknown meta flag: {0}")]
    UnknownFlag(char),

    /// A header that announces a value, but its length cannot be read
    #[error("unreadable value length in: {0}")]
    UnreadableLength(String),

    /// A declared value length exceeds the allowed maximum
    #[error("value too large: {size} bytes (max: {max})")]
    ValueTooLarge { size: usize, max: usize },

    /// The bytes following a value body were not CRLF
    #[error("value is not terminated by CRLF")]
    MissingTerminator,

    /// A classic retrieval was interrupted by something other than VALUE or END
    #[error("retrieval interrupted by {0} before END")]
    UnterminatedRetrieval(String),
}

impl ParseError {
    /// Returns true if the reader's position in the stream can no longer be
    /// trusted after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ParseError::LineTooLong { .. }
                | ParseError::UnreadableLength(_)
                | ParseError::ValueTooLarge { .. }
                | ParseError::MissingTerminator
                | ParseError::UnterminatedRetrieval(_)
        )
    }
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum length of a single header line (excluding CRLF)
pub const MAX_LINE_LENGTH: usize = 8 * 1024;

/// Maximum declared value size (memcached's own item size ceiling)
pub const MAX_VALUE_SIZE: usize = 1024 * 1024 * 1024;

/// What a parsed header line tells the reader to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Header {
    /// The response is complete.
    Complete(Response),
    /// A meta value of `length` bytes follows.
    Value { response: Response, length: usize },
    /// A classic item of `length` bytes follows.
    Item {
        key: String,
        flags: u32,
        cas: Option<u64>,
        length: usize,
    },
    /// Classic `END`.
    End,
    /// A value of `length` bytes follows but the rest of its header is bad.
    /// `item` tells whether it belongs to a classic retrieval.
    Skip {
        length: usize,
        item: bool,
        error: ParseError,
    },
}

/// Parses one header line. `line` must not include the trailing CRLF.
pub fn parse_header(line: &[u8]) -> ParseResult<Header> {
    if line.len() > MAX_LINE_LENGTH {
        return Err(ParseError::LineTooLong {
            length: line.len(),
            max: MAX_LINE_LENGTH,
        });
    }

    let text = std::str::from_utf8(line)
        .map_err(|_| ParseError::Malformed(String::from_utf8_lossy(line).into_owned()))?;

    if text.is_empty() {
        return Err(ParseError::Malformed("empty header line".to_string()));
    }

    let (word, rest) = match text.split_once(' ') {
        Some((word, rest)) => (word, rest),
        None => (text, ""),
    };

    let header = match word {
        "ERROR" => Header::Complete(error_line(ResponseCode::Error, rest)),
        "CLIENT_ERROR" => Header::Complete(error_line(ResponseCode::ClientError, rest)),
        "SERVER_ERROR" => Header::Complete(error_line(ResponseCode::ServerError, rest)),

        "HD" => Header::Complete(parse_meta(ResponseCode::Hd, rest)?),
        "EN" => Header::Complete(parse_meta(ResponseCode::En, rest)?),
        "NF" => Header::Complete(parse_meta(ResponseCode::Nf, rest)?),
        "NS" => Header::Complete(parse_meta(ResponseCode::Ns, rest)?),
        "EX" => Header::Complete(parse_meta(ResponseCode::Ex, rest)?),
        "MN" => Header::Complete(parse_meta(ResponseCode::Mn, rest)?),
        "VA" => {
            let (length, flags) = match rest.split_once(' ') {
                Some((length, flags)) => (length, flags),
                None => (rest, ""),
            };
            let length = parse_length(text, length)?;
            match parse_meta(ResponseCode::Va, flags) {
                Ok(response) => Header::Value { response, length },
                Err(error) => Header::Skip {
                    length,
                    item: false,
                    error,
                },
            }
        }

        "STORED" => Header::Complete(Response::new(ResponseCode::Stored)),
        "NOT_STORED" => Header::Complete(Response::new(ResponseCode::NotStored)),
        "EXISTS" => Header::Complete(Response::new(ResponseCode::Exists)),
        "NOT_FOUND" => Header::Complete(Response::new(ResponseCode::NotFound)),
        "DELETED" => Header::Complete(Response::new(ResponseCode::Deleted)),
        "TOUCHED" => Header::Complete(Response::new(ResponseCode::Touched)),
        "OK" => Header::Complete(Response::new(ResponseCode::Ok)),
        "END" => Header::End,
        "VERSION" => {
            let mut response = Response::new(ResponseCode::Version);
            response.set_message(rest.to_string());
            Header::Complete(response)
        }
        "VALUE" => parse_item(text, rest)?,

        _ if !word.is_empty() && word.bytes().all(|b| b.is_ascii_digit()) && rest.is_empty() => {
            Header::Complete(Response::numeric(parse_u64(word)?))
        }
        _ => return Err(ParseError::UnknownResponse(text.to_string())),
    };

    Ok(header)
}

fn error_line(code: ResponseCode, rest: &str) -> Response {
    if rest.is_empty() {
        Response::new(code)
    } else {
        Response::error(code, rest)
    }
}

/// Parses the flag tokens that follow a meta response code.
fn parse_meta(code: ResponseCode, flags: &str) -> ParseResult<Response> {
    let mut response = Response::new(code);

    for token in flags.split_ascii_whitespace() {
        let mut chars = token.chars();
        let flag = match chars.next() {
            Some(flag) => flag,
            None => continue,
        };
        let argument = chars.as_str();

        match flag {
            'O' => response.set_token(argument.to_string()),
            'k' => response.set_key(argument.to_string()),
            'c' => response.set_cas(parse_u64(argument)?),
            's' => response.set_size(parse_u32(argument)?),
            'f' => response.set_client_flags(parse_u32(argument)?),
            't' => response.set_ttl(
                argument
                    .parse()
                    .map_err(|_| ParseError::InvalidNumber(argument.to_string()))?,
            ),
            'W' => response.set_won(),
            'Z' => response.set_also_won(),
            'X' => response.set_stale(),
            'h' => match argument {
                "0" => response.set_hit_before(false),
                "1" => response.set_hit_before(true),
                _ => return Err(ParseError::InvalidNumber(argument.to_string())),
            },
            'l' => response.set_last_access(parse_u32(argument)?),
            'b' => response.set_base64_key(),
            other => return Err(ParseError::UnknownFlag(other)),
        }
    }

    Ok(response)
}

/// Parses `VALUE <key> <flags> <bytes> [<cas>]`.
///
/// Without a readable `<bytes>` the stream position is lost, so that is
/// fatal. Anything else wrong with the line only spoils this item.
fn parse_item(line: &str, rest: &str) -> ParseResult<Header> {
    let tokens: Vec<&str> = rest.split_ascii_whitespace().collect();

    let length = match tokens.get(2) {
        Some(length) => parse_length(line, length)?,
        None => return Err(ParseError::UnreadableLength(line.to_string())),
    };

    let fields = if tokens.len() > 4 {
        Err(ParseError::Malformed(line.to_string()))
    } else {
        parse_u32(tokens[1]).and_then(|flags| match tokens.get(3) {
            Some(cas) => parse_u64(cas).map(|cas| (flags, Some(cas))),
            None => Ok((flags, None)),
        })
    };

    Ok(match fields {
        Ok((flags, cas)) => Header::Item {
            key: tokens[0].to_string(),
            flags,
            cas,
            length,
        },
        Err(error) => Header::Skip {
            length,
            item: true,
            error,
        },
    })
}

fn parse_length(line: &str, token: &str) -> ParseResult<usize> {
    let length: usize = token
        .parse()
        .map_err(|_| ParseError::UnreadableLength(line.to_string()))?;

    if length > MAX_VALUE_SIZE {
        return Err(ParseError::ValueTooLarge {
            size: length,
            max: MAX_VALUE_SIZE,
        });
    }

    Ok(length)
}

fn parse_u64(token: &str) -> ParseResult<u64> {
    token
        .parse()
        .map_err(|_| ParseError::InvalidNumber(token.to_string()))
}

fn parse_u32(token: &str) -> ParseResult<u32> {
    token
        .parse()
        .map_err(|_| ParseError::InvalidNumber(token.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(line: &[u8]) -> Response {
        match parse_header(line).unwrap() {
            Header::Complete(response) => response,
            other => panic!("expected a complete response, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_stored() {
        assert_eq!(complete(b"STORED").code(), ResponseCode::Stored);
    }

    #[test]
    fn test_parse_classic_words() {
        assert_eq!(complete(b"NOT_STORED").code(), ResponseCode::NotStored);
        assert_eq!(complete(b"EXISTS").code(), ResponseCode::Exists);
        assert_eq!(complete(b"NOT_FOUND").code(), ResponseCode::NotFound);
        assert_eq!(complete(b"DELETED").code(), ResponseCode::Deleted);
        assert_eq!(complete(b"TOUCHED").code(), ResponseCode::Touched);
        assert_eq!(complete(b"OK").code(), ResponseCode::Ok);
    }

    #[test]
    fn test_parse_end() {
        assert_eq!(parse_header(b"END").unwrap(), Header::End);
    }

    #[test]
    fn test_parse_numeric() {
        let response = complete(b"42");
        assert_eq!(response.code(), ResponseCode::Numeric);
        assert_eq!(response.number(), Some(42));

        assert_eq!(complete(b"5").number(), Some(5));
    }

    #[test]
    fn test_parse_version() {
        let response = complete(b"VERSION 1.6.21");
        assert_eq!(response.code(), ResponseCode::Version);
        assert_eq!(response.message(), Some("1.6.21"));
    }

    #[test]
    fn test_parse_error_lines() {
        assert_eq!(complete(b"ERROR").code(), ResponseCode::Error);

        let response = complete(b"CLIENT_ERROR bad data chunk");
        assert_eq!(response.code(), ResponseCode::ClientError);
        assert_eq!(response.message(), Some("bad data chunk"));

        let response = complete(b"SERVER_ERROR out of memory storing object");
        assert_eq!(response.code(), ResponseCode::ServerError);
        assert_eq!(response.message(), Some("out of memory storing object"));
    }

    #[test]
    fn test_parse_meta_flags() {
        let response = complete(b"HD c1234 Oopaque s10 f3 kfoo t-1 W Z X");
        assert_eq!(response.code(), ResponseCode::Hd);
        assert_eq!(response.cas(), Some(1234));
        assert_eq!(response.token(), Some("opaque"));
        assert_eq!(response.size(), Some(10));
        assert_eq!(response.client_flags(), Some(3));
        assert_eq!(response.key(), Some("foo"));
        assert_eq!(response.ttl(), Some(-1));
        assert!(response.won());
        assert!(response.also_won());
        assert!(response.stale());
    }

    #[test]
    fn test_parse_meta_noop() {
        assert_eq!(complete(b"MN").code(), ResponseCode::Mn);
        assert_eq!(complete(b"EN").code(), ResponseCode::En);
    }

    #[test]
    fn test_parse_meta_value() {
        match parse_header(b"VA 3 c7 Otok").unwrap() {
            Header::Value { response, length } => {
                assert_eq!(length, 3);
                assert_eq!(response.code(), ResponseCode::Va);
                assert_eq!(response.cas(), Some(7));
                assert_eq!(response.token(), Some("tok"));
            }
            other => panic!("expected a value header, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_meta_value_without_flags() {
        match parse_header(b"VA 0").unwrap() {
            Header::Value { length, .. } => assert_eq!(length, 0),
            other => panic!("expected a value header, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_return_flags() {
        let response = complete(b"HD h1 l42 b kZm9v");
        assert_eq!(response.hit_before(), Some(true));
        assert_eq!(response.last_access(), Some(42));
        assert!(response.base64_key());
        assert_eq!(response.key(), Some("Zm9v"));

        assert_eq!(complete(b"HD h0").hit_before(), Some(false));
    }

    #[test]
    fn test_bad_flags_on_a_value_header_skip_the_body() {
        assert_eq!(
            parse_header(b"VA 3 q9").unwrap(),
            Header::Skip {
                length: 3,
                item: false,
                error: ParseError::UnknownFlag('q'),
            }
        );
        assert_eq!(
            parse_header(b"VALUE foo x 3").unwrap(),
            Header::Skip {
                length: 3,
                item: true,
                error: ParseError::InvalidNumber("x".to_string()),
            }
        );
    }

    #[test]
    fn test_unreadable_value_length_is_fatal() {
        let lines: [&[u8]; 5] = [b"VA", b"VA x", b"VA -1 f0", b"VALUE foo", b"VALUE foo 0 many"];
        for line in lines {
            let err = parse_header(line).unwrap_err();
            assert!(matches!(err, ParseError::UnreadableLength(_)), "{:?}", err);
            assert!(err.is_fatal());
        }
    }

    #[test]
    fn test_parse_classic_item() {
        assert_eq!(
            parse_header(b"VALUE foo 5 3").unwrap(),
            Header::Item {
                key: "foo".to_string(),
                flags: 5,
                cas: None,
                length: 3,
            }
        );
        assert_eq!(
            parse_header(b"VALUE foo 0 3 88").unwrap(),
            Header::Item {
                key: "foo".to_string(),
                flags: 0,
                cas: Some(88),
                length: 3,
            }
        );
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(parse_header(b""), Err(ParseError::Malformed(_))));
        assert!(matches!(
            parse_header(b"H"),
            Err(ParseError::UnknownResponse(_))
        ));
        assert!(matches!(
            parse_header(b"HD q1"),
            Err(ParseError::UnknownFlag('q'))
        ));
        assert!(matches!(
            parse_header(b"WHATEVER"),
            Err(ParseError::UnknownResponse(_))
        ));
    }

    #[test]
    fn test_malformed_lines_are_recoverable() {
        let err = parse_header(b"WHATEVER").unwrap_err();
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_value_too_large() {
        let line = format!("VA {}", MAX_VALUE_SIZE + 1);
        let err = parse_header(line.as_bytes()).unwrap_err();
        assert!(matches!(err, ParseError::ValueTooLarge { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_line_too_long() {
        let line = vec![b'A'; MAX_LINE_LENGTH + 1];
        assert!(parse_header(&line).unwrap_err().is_fatal());
    }
}
