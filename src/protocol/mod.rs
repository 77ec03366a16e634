//! RESP Protocol Implementation
//!
//! The wire codec for PebbleKV: a decoder for client requests and an encoder
//! for server replies. Only the subset of RESP that clients actually send and
//! that our commands reply with is implemented.
//!
//! ## Modules
//!
//! - `types`: `Request` and `Reply`, plus reply encoding
//! - `parser`: incremental request decoder
//!
//! ## Example
//!
//! ```
//! use pebblekv::protocol::{parse_request, Reply, Request};
//! use bytes::Bytes;
//!
//! let data = b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n";
//! let (request, consumed) = parse_request(data).unwrap().unwrap();
//! assert_eq!(consumed, data.len());
//! assert!(!request.is_inline());
//!
//! let reply = Reply::bulk(Bytes::from("bar"));
//! assert_eq!(reply.encode(), b"$3\r\nbar\r\n");
//! ```

pub mod parser;
pub mod types;

pub use parser::{parse_request, ParseError, ParseResult, RespParser, MAX_BULK_SIZE};
pub use types::{Reply, Request};
