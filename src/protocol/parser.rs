//! RESP Request Decoder
//!
//! Clients send requests in one of two shapes:
//!
//! 1. **Framed**: `*<N>\r\n` followed by N bulk strings, each `$<len>\r\n<bytes>\r\n`.
//!    This is what every real client library sends. Elements are binary-safe.
//! 2. **Inline**: anything not starting with `*`. A single line terminated by `\n`
//!    (a preceding `\r` is tolerated), split on whitespace. This is what you get
//!    from `telnet` or `nc`.
//!
//! ## How the Parser Works
//!
//! The parser looks at an accumulating buffer and returns either:
//! - `Ok(Some((request, consumed)))` - a complete request, `consumed` bytes were used
//! - `Ok(None)` - the request is incomplete, wait for more data
//! - `Err(ParseError)` - the bytes can never become a valid request
//!
//! On error the caller cannot know where the next request starts, so it must
//! reply with a protocol error and drop its buffer.

use crate::protocol::types::{prefix, Request, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur while decoding a request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A count or length line did not hold a valid integer
    #[error("invalid length: {0:?}")]
    InvalidLength(String),

    /// Array count is negative
    #[error("invalid multibulk length: {0}")]
    InvalidArrayLength(i64),

    /// Bulk string length is negative
    #[error("invalid bulk length: {0}")]
    InvalidBulkLength(i64),

    /// Expected a specific type prefix and found something else
    #[error("expected '{expected}', got {found:?}")]
    UnexpectedByte { expected: char, found: char },

    /// The bytes after a bulk string's declared length were not CRLF
    #[error("bulk string does not match declared length {declared}")]
    LengthMismatch { declared: usize },

    /// A bulk string exceeds the maximum allowed size
    #[error("bulk string too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// A framed request declares too many elements
    #[error("too many elements: {count} (max: {max})")]
    TooManyElements { count: usize, max: usize },

    /// A header or inline line grew past its limit without a terminator
    #[error("line too long (max: {max} bytes)")]
    LineTooLong { max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum number of elements in a framed request
pub const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// Maximum length of an inline request line
pub const MAX_INLINE_SIZE: usize = 64 * 1024;

/// `*`/`$` header lines are short; anything longer is garbage.
const MAX_HEADER_LINE: usize = 32;

/// A request decoder with configurable limits.
///
/// # Example
///
/// ```
/// use pebblekv::protocol::{RespParser, Request};
/// use bytes::Bytes;
///
/// let parser = RespParser::new();
/// let buf = b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n";
///
/// let (request, consumed) = parser.parse(buf).unwrap().unwrap();
/// assert_eq!(consumed, buf.len());
/// assert_eq!(request, Request::Framed(vec![Bytes::from("GET"), Bytes::from("foo")]));
/// ```
#[derive(Debug, Clone)]
pub struct RespParser {
    max_bulk_size: usize,
    max_array_len: usize,
    max_inline_size: usize,
}

impl Default for RespParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RespParser {
    /// Creates a parser with the default limits.
    pub fn new() -> Self {
        Self {
            max_bulk_size: MAX_BULK_SIZE,
            max_array_len: MAX_ARRAY_LEN,
            max_inline_size: MAX_INLINE_SIZE,
        }
    }

    /// Overrides the maximum bulk string size.
    pub fn with_max_bulk_size(mut self, max: usize) -> Self {
        self.max_bulk_size = max;
        self
    }

    /// Attempts to decode one request from the front of `buf`.
    pub fn parse(&self, buf: &[u8]) -> ParseResult<Option<(Request, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }

        if buf[0] == prefix::ARRAY {
            self.parse_framed(buf)
        } else {
            self.parse_inline(buf)
        }
    }

    /// Parses `*<N>\r\n` followed by N bulk strings.
    fn parse_framed(&self, buf: &[u8]) -> ParseResult<Option<(Request, usize)>> {
        let (count, mut pos) = match read_header(buf, 0, prefix::ARRAY)? {
            Some(header) => header,
            None => return Ok(None),
        };

        if count < 0 {
            return Err(ParseError::InvalidArrayLength(count));
        }
        let count = count as usize;
        if count > self.max_array_len {
            return Err(ParseError::TooManyElements {
                count,
                max: self.max_array_len,
            });
        }

        // Don't trust the declared count for the allocation size
        let mut args = Vec::with_capacity(count.min(64));

        for _ in 0..count {
            let (len, data_start) = match read_header(buf, pos, prefix::BULK_STRING)? {
                Some(header) => header,
                None => return Ok(None),
            };

            if len < 0 {
                return Err(ParseError::InvalidBulkLength(len));
            }
            let len = len as usize;
            if len > self.max_bulk_size {
                return Err(ParseError::MessageTooLarge {
                    size: len,
                    max: self.max_bulk_size,
                });
            }

            let data_end = data_start + len;
            if buf.len() < data_end + CRLF.len() {
                return Ok(None);
            }
            if &buf[data_end..data_end + CRLF.len()] != CRLF {
                return Err(ParseError::LengthMismatch { declared: len });
            }

            args.push(Bytes::copy_from_slice(&buf[data_start..data_end]));
            pos = data_end + CRLF.len();
        }

        Ok(Some((Request::Framed(args), pos)))
    }

    /// Parses a whitespace-separated line.
    ///
    /// Blank lines are consumed without producing a command: when nothing
    /// but blank lines can be taken off the front of the buffer, the result is
    /// an empty inline request covering them (see [`Request::is_blank`]).
    fn parse_inline(&self, buf: &[u8]) -> ParseResult<Option<(Request, usize)>> {
        let mut start = 0;

        loop {
            let rest = &buf[start..];
            if rest.first() == Some(&prefix::ARRAY) {
                // Blank lines followed by a framed request
                return Ok(Some(match self.parse_framed(rest)? {
                    Some((request, consumed)) => (request, start + consumed),
                    None => (Request::Inline(vec![]), start),
                }));
            }

            let newline = match rest.iter().position(|&b| b == b'\n') {
                Some(pos) => pos,
                None if start > 0 => return Ok(Some((Request::Inline(vec![]), start))),
                None if rest.len() > self.max_inline_size => {
                    return Err(ParseError::LineTooLong {
                        max: self.max_inline_size,
                    })
                }
                None => return Ok(None),
            };
            if newline > self.max_inline_size {
                return Err(ParseError::LineTooLong {
                    max: self.max_inline_size,
                });
            }

            let line = &rest[..newline];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            start += newline + 1;

            let args: Vec<Bytes> = line
                .split(|b| b.is_ascii_whitespace())
                .filter(|word| !word.is_empty())
                .map(Bytes::copy_from_slice)
                .collect();

            if !args.is_empty() {
                return Ok(Some((Request::Inline(args), start)));
            }
            if start == buf.len() {
                return Ok(Some((Request::Inline(vec![]), start)));
            }
        }
    }
}

/// Reads a `<prefix><integer>\r\n` header starting at `pos`.
///
/// Returns the integer and the position just past the CRLF.
fn read_header(buf: &[u8], pos: usize, expected: u8) -> ParseResult<Option<(i64, usize)>> {
    let Some(&found) = buf.get(pos) else {
        return Ok(None);
    };
    if found != expected {
        return Err(ParseError::UnexpectedByte {
            expected: char::from(expected),
            found: char::from(found),
        });
    }

    let body_start = pos + 1;
    let Some(line_len) = find_crlf(&buf[body_start..]) else {
        if buf.len() - body_start > MAX_HEADER_LINE {
            return Err(ParseError::LineTooLong {
                max: MAX_HEADER_LINE,
            });
        }
        return Ok(None);
    };

    let digits = &buf[body_start..body_start + line_len];
    let n = std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| ParseError::InvalidLength(String::from_utf8_lossy(digits).into_owned()))?;

    Ok(Some((n, body_start + line_len + CRLF.len())))
}

/// Finds the position of CRLF in the buffer.
///
/// Returns the position of `\r` if found, or None if CRLF is not present.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// Decodes one request with the default limits.
pub fn parse_request(buf: &[u8]) -> ParseResult<Option<(Request, usize)>> {
    RespParser::new().parse(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed(args: &[&str]) -> Request {
        Request::Framed(args.iter().map(|s| Bytes::from(s.to_string())).collect())
    }

    #[test]
    fn test_parse_framed_get() {
        let input = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
        let (request, consumed) = parse_request(input).unwrap().unwrap();
        assert_eq!(request, framed(&["GET", "name"]));
        assert_eq!(consumed, 23);
    }

    #[test]
    fn test_parse_framed_set_px() {
        let input = b"*5\r\n$3\r\nSET\r\n$5\r\nhello\r\n$5\r\nworld\r\n$2\r\nPX\r\n$3\r\n500\r\n";
        let (request, consumed) = parse_request(input).unwrap().unwrap();
        assert_eq!(request, framed(&["SET", "hello", "world", "PX", "500"]));
        assert_eq!(consumed, input.len());
    }

    #[test]
    fn test_parse_empty_bulk() {
        let input = b"*2\r\n$4\r\nECHO\r\n$0\r\n\r\n";
        let (request, _) = parse_request(input).unwrap().unwrap();
        assert_eq!(request, framed(&["ECHO", ""]));
    }

    #[test]
    fn test_binary_safe_bulk() {
        let input = b"*2\r\n$4\r\nECHO\r\n$5\r\na\r\n\x00b\r\n";
        let (request, _) = parse_request(input).unwrap().unwrap();
        assert_eq!(request.args()[1], Bytes::from_static(b"a\r\n\x00b"));
    }

    #[test]
    fn test_incomplete_at_every_split() {
        let input = b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n";
        for cut in 1..input.len() {
            assert_eq!(
                parse_request(&input[..cut]).unwrap(),
                None,
                "prefix of {} bytes should be incomplete",
                cut
            );
        }
        assert!(parse_request(input).unwrap().is_some());
    }

    #[test]
    fn test_pipelined_requests() {
        let input = b"*1\r\n$4\r\nPING\r\n*2\r\n$3\r\nGET\r\n$1\r\nk\r\n";
        let (first, consumed) = parse_request(input).unwrap().unwrap();
        assert_eq!(first, framed(&["PING"]));

        let (second, rest) = parse_request(&input[consumed..]).unwrap().unwrap();
        assert_eq!(second, framed(&["GET", "k"]));
        assert_eq!(consumed + rest, input.len());
    }

    #[test]
    fn test_length_mismatch_is_malformed() {
        let input = b"*2\r\n$3\r\nGET\r\n$2\r\nfoo\r\n";
        assert_eq!(
            parse_request(input),
            Err(ParseError::LengthMismatch { declared: 2 })
        );
    }

    #[test]
    fn test_short_element_followed_by_more_data_is_malformed() {
        let input = b"*3\r\n$3\r\nSET\r\n$5\r\nabc\r\n$1\r\nx\r\n";
        assert!(matches!(
            parse_request(input),
            Err(ParseError::LengthMismatch { declared: 5 })
        ));
    }

    #[test]
    fn test_non_numeric_count() {
        assert!(matches!(
            parse_request(b"*x\r\n"),
            Err(ParseError::InvalidLength(_))
        ));
        assert!(matches!(
            parse_request(b"*1\r\n$abc\r\n"),
            Err(ParseError::InvalidLength(_))
        ));
    }

    #[test]
    fn test_negative_lengths() {
        assert_eq!(
            parse_request(b"*-1\r\n"),
            Err(ParseError::InvalidArrayLength(-1))
        );
        assert_eq!(
            parse_request(b"*1\r\n$-1\r\n"),
            Err(ParseError::InvalidBulkLength(-1))
        );
    }

    #[test]
    fn test_element_without_bulk_prefix() {
        assert_eq!(
            parse_request(b"*1\r\n:5\r\n"),
            Err(ParseError::UnexpectedByte {
                expected: '$',
                found: ':'
            })
        );
    }

    #[test]
    fn test_bulk_too_large() {
        let parser = RespParser::new().with_max_bulk_size(4);
        assert!(matches!(
            parser.parse(b"*1\r\n$5\r\nhello\r\n"),
            Err(ParseError::MessageTooLarge { size: 5, max: 4 })
        ));
    }

    #[test]
    fn test_header_without_terminator_is_bounded() {
        let mut input = b"*".to_vec();
        input.extend(std::iter::repeat(b'1').take(64));
        assert!(matches!(
            parse_request(&input),
            Err(ParseError::LineTooLong { .. })
        ));
    }

    #[test]
    fn test_parse_inline_ping() {
        let (request, consumed) = parse_request(b"PING\r\n").unwrap().unwrap();
        assert_eq!(request, Request::Inline(vec![Bytes::from("PING")]));
        assert_eq!(consumed, 6);
    }

    #[test]
    fn test_parse_inline_bare_newline() {
        let (request, consumed) = parse_request(b"ping\n").unwrap().unwrap();
        assert_eq!(request, Request::Inline(vec![Bytes::from("ping")]));
        assert_eq!(consumed, 5);
    }

    #[test]
    fn test_parse_inline_multiple_words() {
        let (request, _) = parse_request(b"  SET  a   b \r\n").unwrap().unwrap();
        assert_eq!(
            request,
            Request::Inline(vec![Bytes::from("SET"), Bytes::from("a"), Bytes::from("b")])
        );
    }

    #[test]
    fn test_parse_inline_incomplete() {
        assert_eq!(parse_request(b"PIN").unwrap(), None);
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let (request, consumed) = parse_request(b"\r\n\nPING\r\n").unwrap().unwrap();
        assert_eq!(request, Request::Inline(vec![Bytes::from("PING")]));
        assert_eq!(consumed, 9);

        let (request, consumed) = parse_request(b"\r\n*1\r\n$4\r\nPING\r\n").unwrap().unwrap();
        assert_eq!(request, framed(&["PING"]));
        assert_eq!(consumed, 16);
    }

    #[test]
    fn test_blank_only_input_is_consumed() {
        let input = b"\r\n".repeat(100_000);
        let (request, consumed) = parse_request(&input).unwrap().unwrap();
        assert!(request.is_blank());
        assert_eq!(consumed, input.len());

        let (request, consumed) = parse_request(b"\n\r\n").unwrap().unwrap();
        assert!(request.is_blank());
        assert_eq!(consumed, 3);
    }

    #[test]
    fn test_blank_lines_before_partial_request_are_consumed() {
        let (request, consumed) = parse_request(b"\r\n\r\nPI").unwrap().unwrap();
        assert!(request.is_blank());
        assert_eq!(consumed, 4);
        assert_eq!(parse_request(b"PI").unwrap(), None);

        let (request, consumed) = parse_request(b"\r\n*1\r\n$4\r\nPI").unwrap().unwrap();
        assert!(request.is_blank());
        assert_eq!(consumed, 2);
    }

    #[test]
    fn test_inline_too_long() {
        let input = vec![b'a'; MAX_INLINE_SIZE + 1];
        assert!(matches!(
            parse_request(&input),
            Err(ParseError::LineTooLong { .. })
        ));
    }

    #[test]
    fn test_empty_framed_request() {
        let (request, consumed) = parse_request(b"*0\r\n").unwrap().unwrap();
        assert_eq!(request, Request::Framed(vec![]));
        assert_eq!(consumed, 4);
    }
}
