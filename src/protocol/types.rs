//! RESP Data Types
//!
//! Two halves of the wire protocol live here:
//!
//! - [`Request`]: what the decoder hands to the dispatcher.
//! - [`Reply`]: what the dispatcher hands back to be encoded.
//!
//! ## Reply Format
//!
//! Every reply starts with a type prefix byte and every line ends in CRLF:
//!
//! Status: `+OK\r\n`
//! Error: `-ERR unknown command\r\n`
//! Integer: `:1\r\n`
//! Bulk String: `$5\r\nhello\r\n`
//! Null Bulk String: `$-1\r\n`
//! Array: `*2\r\n$3\r\ndir\r\n$1\r\n.\r\n`

use bytes::Bytes;
use std::fmt;

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP protocol type prefixes
pub mod prefix {
    pub const STATUS: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A fully decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// `*<N>\r\n` followed by N bulk strings. The first element is the command name.
    Framed(Vec<Bytes>),

    /// A bare line that did not start with `*`, split on whitespace.
    Inline(Vec<Bytes>),
}

impl Request {
    /// Returns the arguments of the request, command name included.
    pub fn args(&self) -> &[Bytes] {
        match self {
            Request::Framed(args) | Request::Inline(args) => args,
        }
    }

    /// Returns true if the request arrived in inline form.
    pub fn is_inline(&self) -> bool {
        matches!(self, Request::Inline(_))
    }

    /// True for the empty inline request that stands for skipped blank lines.
    /// It carries no command and gets no reply.
    pub fn is_blank(&self) -> bool {
        matches!(self, Request::Inline(args) if args.is_empty())
    }
}

/// A reply to be sent back to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Status line, must not contain CR or LF.
    /// Format: `+<text>\r\n`
    Status(String),

    /// Error line.
    /// Format: `-<text>\r\n`
    Error(String),

    /// Format: `:<integer>\r\n`
    Integer(i64),

    /// Binary-safe string.
    /// Format: `$<length>\r\n<data>\r\n`
    Bulk(Bytes),

    /// Null bulk string.
    /// Format: `$-1\r\n`
    Null,

    /// Format: `*<count>\r\n<element1><element2>...`
    Array(Vec<Reply>),
}

impl Reply {
    pub fn status(s: impl Into<String>) -> Self {
        Reply::Status(s.into())
    }

    /// Creates a new error reply.
    ///
    /// # Example
    /// ```
    /// use pebblekv::protocol::Reply;
    /// let err = Reply::error("ERR unknown command");
    /// assert_eq!(err.encode(), b"-ERR unknown command\r\n");
    /// ```
    pub fn error(s: impl Into<String>) -> Self {
        Reply::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        Reply::Integer(n)
    }

    /// Creates a new bulk string reply.
    ///
    /// # Example
    /// ```
    /// use pebblekv::protocol::Reply;
    /// use bytes::Bytes;
    /// let bulk = Reply::bulk(Bytes::from("bar"));
    /// assert_eq!(bulk.encode(), b"$3\r\nbar\r\n");
    /// ```
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Reply::Bulk(data.into())
    }

    pub fn null() -> Self {
        Reply::Null
    }

    /// Creates an array of bulk strings.
    pub fn bulk_array<I, B>(items: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Reply::Array(items.into_iter().map(|b| Reply::Bulk(b.into())).collect())
    }

    /// `+OK`
    pub fn ok() -> Self {
        Self::status("OK")
    }

    /// `+PONG`
    pub fn pong() -> Self {
        Self::status("PONG")
    }

    /// Encodes the reply into its exact wire representation.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf);
        buf
    }

    /// Encodes the reply into an existing buffer.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Reply::Status(s) => write_line(buf, prefix::STATUS, s.as_bytes()),
            Reply::Error(s) => write_line(buf, prefix::ERROR, s.as_bytes()),
            Reply::Integer(n) => write_line(buf, prefix::INTEGER, n.to_string().as_bytes()),
            Reply::Bulk(data) => {
                write_line(buf, prefix::BULK_STRING, data.len().to_string().as_bytes());
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            Reply::Null => write_line(buf, prefix::BULK_STRING, b"-1"),
            Reply::Array(items) => {
                write_line(buf, prefix::ARRAY, items.len().to_string().as_bytes());
                for item in items {
                    item.encode_into(buf);
                }
            }
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }
}

#[inline]
fn write_line(buf: &mut Vec<u8>, prefix: u8, body: &[u8]) {
    buf.push(prefix);
    buf.extend_from_slice(body);
    buf.extend_from_slice(CRLF);
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Status(s) => write!(f, "{}", s),
            Reply::Error(s) => write!(f, "(error) {}", s),
            Reply::Integer(n) => write!(f, "(integer) {}", n),
            Reply::Bulk(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "(binary data, {} bytes)", data.len()),
            },
            Reply::Null => write!(f, "(nil)"),
            Reply::Array(items) if items.is_empty() => write!(f, "(empty array)"),
            Reply::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}) {}", i + 1, item)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_encode() {
        assert_eq!(Reply::ok().encode(), b"+OK\r\n");
        assert_eq!(Reply::pong().encode(), b"+PONG\r\n");
    }

    #[test]
    fn test_error_encode() {
        let reply = Reply::error("ERR unknown command");
        assert_eq!(reply.encode(), b"-ERR unknown command\r\n");
        assert!(reply.is_error());
    }

    #[test]
    fn test_integer_encode() {
        assert_eq!(Reply::integer(1).encode(), b":1\r\n");
        assert_eq!(Reply::integer(0).encode(), b":0\r\n");
        assert_eq!(Reply::integer(-42).encode(), b":-42\r\n");
    }

    #[test]
    fn test_bulk_encode() {
        assert_eq!(Reply::bulk(Bytes::from("world")).encode(), b"$5\r\nworld\r\n");
        assert_eq!(Reply::bulk(Bytes::new()).encode(), b"$0\r\n\r\n");
    }

    #[test]
    fn test_binary_bulk_encode() {
        let reply = Reply::bulk(Bytes::from_static(b"a\r\nb\x00"));
        assert_eq!(reply.encode(), b"$5\r\na\r\nb\x00\r\n");
    }

    #[test]
    fn test_null_encode() {
        assert_eq!(Reply::null().encode(), b"$-1\r\n");
    }

    #[test]
    fn test_bulk_array_encode() {
        let reply = Reply::bulk_array([Bytes::from("dir"), Bytes::from("/data")]);
        assert_eq!(reply.encode(), b"*2\r\n$3\r\ndir\r\n$5\r\n/data\r\n");
    }

    #[test]
    fn test_empty_array_encode() {
        assert_eq!(Reply::Array(vec![]).encode(), b"*0\r\n");
    }

    #[test]
    fn test_request_args() {
        let framed = Request::Framed(vec![Bytes::from("GET"), Bytes::from("k")]);
        assert_eq!(framed.args().len(), 2);
        assert!(!framed.is_inline());

        let inline = Request::Inline(vec![Bytes::from("PING")]);
        assert!(inline.is_inline());
        assert!(!inline.is_blank());
        assert!(Request::Inline(vec![]).is_blank());
        assert!(!Request::Framed(vec![]).is_blank());
    }

    #[test]
    fn test_display() {
        assert_eq!(Reply::Null.to_string(), "(nil)");
        assert_eq!(Reply::integer(3).to_string(), "(integer) 3");
        assert_eq!(Reply::Array(vec![]).to_string(), "(empty array)");
    }
}
