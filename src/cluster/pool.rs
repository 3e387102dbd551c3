//! Pooled RESP connections to peer nodes.
//!
//! Mirrors the accumulate-then-parse loop in `connection::handler`
//! (`BytesMut` buffer, `read_buf`, feed the parser until a full frame
//! comes back) but from the client side: write a request, then read
//! frames off the wire until one parses. Connections are borrowed out of
//! an idle pool and returned on success; a connection that errors mid-use
//! is dropped rather than returned, since its buffered state is unknown.

use crate::protocol::{RespParser, RespValue};
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::io;
use std::sync::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const INITIAL_BUFFER_SIZE: usize = 4096;

struct PeerConnection {
    stream: TcpStream,
    buffer: BytesMut,
    parser: RespParser,
}

impl PeerConnection {
    async fn connect(addr: &str) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            stream,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            parser: RespParser::new(),
        })
    }

    async fn send_command(&mut self, args: &[RespValue]) -> io::Result<RespValue> {
        let frame = RespValue::Array(args.to_vec()).serialize();
        self.stream.write_all(&frame).await?;

        loop {
            match self.parser.parse(&self.buffer) {
                Ok(Some((value, consumed))) => {
                    let _ = self.buffer.split_to(consumed);
                    return Ok(value);
                }
                Ok(None) => {}
                Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e.to_string())),
            }

            let n = self.stream.read_buf(&mut self.buffer).await?;
            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed connection"));
            }
        }
    }
}

struct PeerPool {
    addr: String,
    idle: Mutex<Vec<PeerConnection>>,
}

impl PeerPool {
    fn new(addr: String) -> Self {
        Self { addr, idle: Mutex::new(Vec::new()) }
    }

    fn take_idle(&self) -> Option<PeerConnection> {
        self.idle.lock().unwrap().pop()
    }

    fn give_back(&self, conn: PeerConnection) {
        self.idle.lock().unwrap().push(conn);
    }
}

/// One pool per peer address, each lazily dialing and reusing connections.
pub struct ConnectionPool {
    peers: HashMap<String, PeerPool>,
}

impl ConnectionPool {
    pub fn new(addresses: impl IntoIterator<Item = String>) -> Self {
        let peers = addresses.into_iter().map(|a| (a.clone(), PeerPool::new(a))).collect();
        Self { peers }
    }

    /// Sends `SELECT db_index` followed by `args` to `peer`, returning the
    /// reply to `args`. The connection is returned to the pool only if both
    /// round trips succeed.
    pub async fn relay(&self, peer: &str, db_index: usize, args: &[RespValue]) -> io::Result<RespValue> {
        let pool = self
            .peers
            .get(peer)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("unknown cluster peer '{peer}'")))?;

        let mut conn = match pool.take_idle() {
            Some(c) => c,
            None => PeerConnection::connect(&pool.addr).await?,
        };

        let select = [
            RespValue::bulk_string(Bytes::from_static(b"SELECT")),
            RespValue::bulk_string(Bytes::from(db_index.to_string())),
        ];

        let result = async {
            conn.send_command(&select).await?;
            conn.send_command(args).await
        }
        .await;

        match result {
            Ok(reply) => {
                pool.give_back(conn);
                Ok(reply)
            }
            Err(e) => Err(e),
        }
    }

    pub fn peer_addresses(&self) -> impl Iterator<Item = &str> {
        self.peers.keys().map(|s| s.as_str())
    }
}
