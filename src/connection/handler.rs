//! Connection Handler Module
//!
//! Each client gets its own handler task that runs in a loop, reading
//! requests and sending replies.
//!
//! ## Lifecycle
//!
//! A connection lives until the peer closes the socket or an I/O error
//! occurs. Buffered input is capped at `MAX_BUFFER_SIZE`. Each pass of the loop
//! drains every complete request already buffered before flushing, so a
//! pipelined batch costs one write.
//!
//! ## Buffer Management
//!
//! Incoming data accumulates in a `BytesMut`. TCP is a stream, so a read may
//! carry half a request or several pipelined ones. Replies go out in request
//! order.
//!
//! A malformed request does not close the connection: the client gets a
//! protocol error, the buffered bytes are discarded, and reading resumes.

use crate::commands::CommandHandler;
use crate::protocol::{ParseError, Reply, Request, RespParser, MAX_BULK_SIZE};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, error, info, trace, warn};

/// Upper bound on buffered input: the largest bulk string plus its framing.
const MAX_BUFFER_SIZE: usize = MAX_BULK_SIZE + 64 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total requests executed
    pub commands_processed: AtomicU64,
    /// Malformed requests answered with a protocol error
    pub protocol_errors: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Outcome of trying to pull one request off the buffer.
enum Parsed {
    Request(Request),
    Malformed(ParseError),
    Incomplete,
}

/// Handles a single client connection.
pub struct ConnectionHandler {
    /// The TCP stream for this connection
    stream: BufWriter<TcpStream>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Buffer for incoming data
    buffer: BytesMut,

    /// Replies waiting to be flushed
    out: Vec<u8>,

    /// The command handler (shared across connections)
    command_handler: CommandHandler,

    parser: RespParser,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            out: Vec::with_capacity(INITIAL_BUFFER_SIZE),
            command_handler,
            parser: RespParser::new(),
            stats,
        }
    }

    /// Runs the connection until the client disconnects or an I/O error
    /// occurs.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected gracefully"),
            Err(ConnectionError::ClientDisconnected) => {
                info!(client = %self.addr, "Client disconnected")
            }
            Err(ConnectionError::IoError(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        self.stats.connection_closed();
        result
    }

    /// The main read-execute-respond loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            self.process_buffered();
            self.flush_replies().await?;

            match self.read_more_data().await {
                Err(ConnectionError::UnexpectedEof) if self.ends_with_inline_line() => {
                    // `printf PING | nc ...` closes its side without a newline
                    self.buffer.extend_from_slice(b"\n");
                    self.process_buffered();
                    self.flush_replies().await?;
                    return Err(ConnectionError::ClientDisconnected);
                }
                result => result?,
            }
        }
    }

    /// Executes every complete request in the buffer and queues the replies.
    fn process_buffered(&mut self) {
        loop {
            match self.try_parse_request() {
                Parsed::Request(request) if request.is_blank() => {}
                Parsed::Request(request) => {
                    let reply = self.command_handler.execute(&request);
                    self.stats.command_processed();
                    trace!(client = %self.addr, reply = %reply, "Executed request");
                    reply.encode_into(&mut self.out);
                }
                Parsed::Malformed(e) => {
                    warn!(client = %self.addr, error = %e, "Malformed request, discarding buffered input");
                    self.stats.protocol_error();
                    Reply::error(format!("ERR Protocol error: {}", e)).encode_into(&mut self.out);
                    self.buffer.clear();
                    return;
                }
                Parsed::Incomplete => return,
            }
        }
    }

    /// True when the leftover input is an unterminated inline line.
    fn ends_with_inline_line(&self) -> bool {
        self.buffer.first().is_some_and(|&b| b != b'*')
            && self.buffer.iter().any(|b| !b.is_ascii_whitespace())
    }

    /// Attempts to parse one request from the front of the buffer.
    fn try_parse_request(&mut self) -> Parsed {
        if self.buffer.is_empty() {
            return Parsed::Incomplete;
        }

        match self.parser.parse(&self.buffer) {
            Ok(Some((request, consumed))) => {
                let _ = self.buffer.split_to(consumed);
                trace!(
                    client = %self.addr,
                    consumed = consumed,
                    remaining = self.buffer.len(),
                    "Parsed request"
                );
                Parsed::Request(request)
            }
            Ok(None) => {
                trace!(
                    client = %self.addr,
                    buffered = self.buffer.len(),
                    "Incomplete request, need more data"
                );
                Parsed::Incomplete
            }
            Err(e) => Parsed::Malformed(e),
        }
    }

    /// Reads more data from the socket into the buffer.
    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            error!(
                client = %self.addr,
                size = self.buffer.len(),
                "Buffer size limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(4096);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;

        if n == 0 {
            if self.buffer.is_empty() {
                return Err(ConnectionError::ClientDisconnected);
            } else {
                // Partial request in buffer
                return Err(ConnectionError::UnexpectedEof);
            }
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");

        Ok(())
    }

    /// Writes every queued reply in one go.
    async fn flush_replies(&mut self) -> Result<(), ConnectionError> {
        if self.out.is_empty() {
            return Ok(());
        }

        self.stream.write_all(&self.out).await?;
        self.stream.flush().await?;
        self.stats.bytes_written(self.out.len());
        trace!(client = %self.addr, bytes = self.out.len(), "Sent replies");
        self.out.clear();
        Ok(())
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Client disconnected normally
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Unexpected end of stream (partial request)
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// Buffer size limit exceeded
    #[error("Buffer size limit exceeded")]
    BufferFull,
}

/// Serves a client connection to completion.
///
/// Errors are logged, never propagated: one client's failure must not
/// affect the accept loop or other clients.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
) {
    let handler = ConnectionHandler::new(stream, addr, command_handler, stats);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected => {}
            ConnectionError::IoError(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "Connection ended with error");
            }
        }
    }
}
