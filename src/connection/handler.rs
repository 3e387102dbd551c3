//! Connection Handler Module
//!
//! This module handles individual client connections. Each client gets its
//! own handler task that runs in a loop, reading commands and sending
//! responses. The same loop serves connections opened by real clients and
//! connections opened by another cluster node's relay pool — a relay always
//! primes the stream with `SELECT <db>` before its real command, and that is
//! ordinary traffic as far as this handler is concerned.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects (TCP handshake)
//!        │
//!        ▼
//! 2. ConnectionHandler spawned
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │      Main Loop               │
//!    │                              │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Read bytes from socket  │ │
//!    │  └───────────┬─────────────┘ │
//!    │              │               │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Parse RESP command      │ │
//!    │  └───────────┬─────────────┘ │
//!    │              │               │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ SELECT? update db_index │ │
//!    │  │ else: dispatch          │ │
//!    │  └───────────┬─────────────┘ │
//!    │              │               │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Send response           │ │
//!    │  └───────────┬─────────────┘ │
//!    │              │               │
//!    │              ▼               │
//!    │         [Loop back]          │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 4. Client disconnects / error
//!        │
//!        ▼
//! 5. Pending writes drain (bounded) / handler task ends
//! ```
//!
//! ## Buffer Management
//!
//! We use a BytesMut buffer to accumulate incoming data. This is important
//! because TCP is a stream protocol - we might receive partial commands,
//! or multiple commands in a single read. A parse error does not end the
//! connection: we reply with a protocol error and resynchronize at the
//! next newline, since one malformed frame shouldn't take down an
//! otherwise healthy connection.

use crate::cluster::ClusterRouter;
use crate::commands::CommandHandler;
use crate::protocol::{ParseError, RespParser, RespValue};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tracing::{debug, error, info, trace, warn};

/// Maximum size for the read buffer (64 KB)
const MAX_BUFFER_SIZE: usize = 64 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// How long a connection's close waits for in-flight writes to drain.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
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

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Serializes outbound writes on a connection and tracks how many are
/// in flight, so close can wait for them to drain instead of yanking the
/// socket out from under a write in progress.
struct WriteGate {
    lock: tokio::sync::Mutex<()>,
    pending: AtomicU64,
    drained: Notify,
}

impl WriteGate {
    fn new() -> Self {
        Self { lock: tokio::sync::Mutex::new(()), pending: AtomicU64::new(0), drained: Notify::new() }
    }

    async fn send(&self, stream: &mut BufWriter<TcpStream>, bytes: &[u8]) -> std::io::Result<()> {
        let _permit = self.lock.lock().await;
        self.pending.fetch_add(1, Ordering::SeqCst);
        let result = async {
            stream.write_all(bytes).await?;
            stream.flush().await
        }
        .await;
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
        result
    }

    async fn wait_drained(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, async {
            while self.pending.load(Ordering::SeqCst) > 0 {
                self.drained.notified().await;
            }
        })
        .await;
    }
}

/// Handles a single client connection.
///
/// This struct manages the read buffer, parsing, and response sending
/// for one connected client.
pub struct ConnectionHandler {
    /// The TCP stream for this connection
    stream: BufWriter<TcpStream>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Buffer for incoming data
    buffer: BytesMut,

    /// The command handler (shared across connections)
    command_handler: CommandHandler,

    /// Cluster router, present only when this node runs in cluster mode.
    router: Option<Arc<ClusterRouter>>,

    /// RESP parser
    parser: RespParser,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,

    /// This connection's currently selected database. `SELECT` mutates
    /// this directly and is never forwarded to `command_handler`/`router`.
    db_index: usize,

    write_gate: WriteGate,
}

impl ConnectionHandler {
    /// Creates a new connection handler.
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        command_handler: CommandHandler,
        router: Option<Arc<ClusterRouter>>,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            command_handler,
            router,
            parser: RespParser::new(),
            stats,
            db_index: 0,
            write_gate: WriteGate::new(),
        }
    }

    /// Runs the main connection loop.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected gracefully"),
            Err(e) => match e {
                ConnectionError::ClientDisconnected => {
                    debug!(client = %self.addr, "Client disconnected")
                }
                ConnectionError::IoError(io_err)
                    if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
                {
                    debug!(client = %self.addr, "Connection reset by client")
                }
                _ => warn!(client = %self.addr, error = %e, "Connection error"),
            },
        }

        self.write_gate.wait_drained(DRAIN_TIMEOUT).await;
        self.stats.connection_closed();
        result
    }

    /// The main read-execute-respond loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            loop {
                match self.parser.parse(&self.buffer) {
                    Ok(Some((value, consumed))) => {
                        let _ = self.buffer.split_to(consumed);
                        trace!(client = %self.addr, consumed, remaining = self.buffer.len(), "Parsed command");
                        self.handle_command(value).await?;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(client = %self.addr, error = %e, "Parse error; resynchronizing");
                        self.send_response(&RespValue::error(format!("PROTOCOL ERROR: {e}"))).await?;
                        self.resync_after_parse_error();
                    }
                }
            }

            self.read_more_data().await?;
        }
    }

    /// Dispatches one parsed command, unless it is `SELECT`, which is
    /// handled here directly since only the connection owns `db_index`.
    async fn handle_command(&mut self, command: RespValue) -> Result<(), ConnectionError> {
        self.stats.command_processed();

        if let Some(reply) = self.try_handle_select(&command) {
            self.send_response(&reply).await?;
            return Ok(());
        }

        let is_quit = command_name(&command).as_deref() == Some("QUIT");

        let response = match &self.router {
            Some(router) => router.dispatch(self.db_index, command).await,
            None => Self::execute_local(&self.command_handler, self.db_index, command),
        };
        self.send_response(&response).await?;

        if is_quit {
            return Err(ConnectionError::ClientDisconnected);
        }
        Ok(())
    }

    /// Runs a command against the local handler with the same panic
    /// guard the cluster router applies around its own local dispatch: a
    /// panicking command must degrade to an error reply, not take the
    /// connection down.
    fn execute_local(command_handler: &CommandHandler, db_index: usize, command: RespValue) -> RespValue {
        match std::panic::catch_unwind(AssertUnwindSafe(|| command_handler.execute(db_index, command))) {
            Ok(reply) => reply,
            Err(_) => {
                error!("panic caught while dispatching a command locally");
                RespValue::error("ERR unknown")
            }
        }
    }

    fn try_handle_select(&mut self, command: &RespValue) -> Option<RespValue> {
        let args = command.as_array()?;
        let name = args.first()?.as_str()?;
        if !name.eq_ignore_ascii_case("SELECT") {
            return None;
        }
        if args.len() != 2 {
            return Some(RespValue::error("ERR wrong number of arguments for 'select' command"));
        }
        let Some(index) = args[1].as_str().and_then(|s| s.parse::<usize>().ok()) else {
            return Some(RespValue::error("ERR value is not an integer or out of range"));
        };
        if index >= self.command_handler.num_databases() {
            return Some(RespValue::error("ERR DB index is out of range"));
        }
        self.db_index = index;
        Some(RespValue::ok())
    }

    /// Drops buffered bytes up to and including the next newline, so a
    /// malformed frame doesn't permanently desync the parser from the
    /// client's subsequent, well-formed ones.
    fn resync_after_parse_error(&mut self) {
        match self.buffer.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                let _ = self.buffer.split_to(pos + 1);
            }
            None => self.buffer.clear(),
        }
    }

    /// Reads more data from the socket into the buffer.
    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            error!(client = %self.addr, size = self.buffer.len(), "Buffer size limit exceeded");
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
                return Err(ConnectionError::UnexpectedEof);
            }
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");

        Ok(())
    }

    /// Sends a response to the client.
    async fn send_response(&mut self, response: &RespValue) -> Result<(), ConnectionError> {
        let bytes = response.serialize();
        let len = bytes.len();
        self.write_gate.send(&mut self.stream, &bytes).await?;
        self.stats.bytes_written(len);
        trace!(client = %self.addr, bytes = len, "Sent response");
        Ok(())
    }
}

fn command_name(command: &RespValue) -> Option<String> {
    let args = command.as_array()?;
    Some(args.first()?.as_str()?.to_ascii_uppercase())
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// RESP parse error
    #[error("Parse error: {0}")]
    ParseError(#[from] ParseError),

    /// Client disconnected normally
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Unexpected end of stream (partial command)
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// Buffer size limit exceeded
    #[error("Buffer size limit exceeded")]
    BufferFull,
}

/// Handles a client connection.
///
/// This is a convenience function that creates a ConnectionHandler
/// and runs it to completion.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    command_handler: CommandHandler,
    router: Option<Arc<ClusterRouter>>,
    stats: Arc<ConnectionStats>,
) {
    let handler = ConnectionHandler::new(stream, addr, command_handler, router, stats);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StorageEngine;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn create_test_server() -> (SocketAddr, Arc<StorageEngine>, Arc<ConnectionStats>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let storage = Arc::new(StorageEngine::new(16));
        let stats = Arc::new(ConnectionStats::new());

        let storage_clone = Arc::clone(&storage);
        let stats_clone = Arc::clone(&stats);

        tokio::spawn(async move {
            while let Ok((stream, client_addr)) = listener.accept().await {
                let handler = CommandHandler::new(Arc::clone(&storage_clone), None);
                let stats = Arc::clone(&stats_clone);
                tokio::spawn(handle_connection(stream, client_addr, handler, None, stats));
            }
        });

        (addr, storage, stats)
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let (addr, _, _) = create_test_server().await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();

        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();

        assert_eq!(&buf[..n], b"+PONG\r\n");
    }

    #[tokio::test]
    async fn test_set_get() {
        let (addr, _, _) = create_test_server().await;

        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$4\r\nname\r\n$4\r\nAriz\r\n")
            .await
            .unwrap();

        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"+OK\r\n");

        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n")
            .await
            .unwrap();

        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"$4\r\nAriz\r\n");
    }

    #[tokio::test]
    async fn test_select_isolates_databases() {
        let (addr, _, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 64];

        client.write_all(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$5\r\nindb0\r\n").await.unwrap();
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"+OK\r\n");

        client.write_all(b"*2\r\n$6\r\nSELECT\r\n$1\r\n1\r\n").await.unwrap();
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"+OK\r\n");

        client.write_all(b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n").await.unwrap();
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"$-1\r\n");
    }

    #[tokio::test]
    async fn test_parse_error_does_not_close_connection() {
        let (addr, _, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 128];

        client.write_all(b"not-a-resp-frame\r\n").await.unwrap();
        let n = client.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("-PROTOCOL ERROR"));

        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"+PONG\r\n");
    }

    #[tokio::test]
    async fn test_multiple_commands() {
        let (addr, _, _) = create_test_server().await;

        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$2\r\nk1\r\n$2\r\nv1\r\n*3\r\n$3\r\nSET\r\n$2\r\nk2\r\n$2\r\nv2\r\n*2\r\n$3\r\nGET\r\n$2\r\nk1\r\n*2\r\n$3\r\nGET\r\n$2\r\nk2\r\n")
            .await
            .unwrap();

        let mut buf = vec![0u8; 256];
        let mut total = 0;

        let timeout = tokio::time::Duration::from_secs(2);
        let deadline = tokio::time::Instant::now() + timeout;

        while total < 30 && tokio::time::Instant::now() < deadline {
            match tokio::time::timeout(
                tokio::time::Duration::from_millis(100),
                client.read(&mut buf[total..]),
            )
            .await
            {
                Ok(Ok(n)) if n > 0 => total += n,
                _ => break,
            }
        }

        let response = String::from_utf8_lossy(&buf[..total]);
        assert!(response.contains("+OK"));
        assert!(response.contains("v1"));
        assert!(response.contains("v2"));
    }

    #[tokio::test]
    async fn test_connection_stats() {
        let (addr, _, stats) = create_test_server().await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);

        let mut client = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 1);

        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        let mut buf = [0u8; 64];
        let _ = client.read(&mut buf).await.unwrap();

        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        assert!(stats.commands_processed.load(Ordering::Relaxed) >= 1);
        assert!(stats.bytes_read.load(Ordering::Relaxed) > 0);
        assert!(stats.bytes_written.load(Ordering::Relaxed) > 0);

        drop(client);

        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }
}
