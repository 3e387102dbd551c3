//! # NimbusKV - A Redis-compatible in-memory key-value server
//!
//! NimbusKV is a Redis-compatible, in-memory key-value database written in
//! Rust. It demonstrates systems programming concepts like concurrent data
//! structures, network programming, protocol parsing, write-ahead logging,
//! and consistent-hash cluster routing.
//!
//! ## Features
//!
//! - **Redis-compatible**: RESP wire protocol and the common string, list,
//!   hash, set, and sorted-set command families.
//! - **Adaptive value encodings**: small collections use compact
//!   representations that upgrade to general-purpose ones past a threshold.
//! - **High performance**: sharded storage with per-key read/write locks for
//!   concurrent access.
//! - **AOF persistence**: an append-only command log replayed at startup.
//! - **Cluster routing**: a consistent-hash ring maps keys to nodes, with
//!   per-command relay strategies for multi-key operations.
//! - **Async I/O**: built on Tokio for handling thousands of concurrent
//!   connections.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              NimbusKV                                   │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐   ┌───────────┐ │
//! │  │ TCP Server  │───>│ Connection  │───>│  Cluster    │──>│ Command   │ │
//! │  │ (Listener)  │    │  Handler    │    │  Router     │   │ Handler   │ │
//! │  └─────────────┘    └─────────────┘    └─────────────┘   └─────┬─────┘ │
//! │                                                                │       │
//! │                                                                ▼       │
//! │  ┌─────────────┐    ┌──────────────────────────────────────────────┐  │
//! │  │   RESP      │    │                StorageEngine                 │  │
//! │  │   Parser    │    │  ┌────────┐ ┌────────┐ ┌────────┐ ┌────────┐ │  │
//! │  │             │    │  │Shard 0 │ │Shard 1 │ │Shard 2 │ │...N    │ │  │
//! │  └─────────────┘    │  │RwLock  │ │RwLock  │ │RwLock  │ │shards  │ │  │
//! │                     │  └────────┘ └────────┘ └────────┘ └────────┘ │  │
//! │                     └──────────────────────┬───────────────────────┘  │
//! │                                            │                          │
//! │                     ┌──────────────────────┴───────────────────────┐  │
//! │                     │               AOF Writer                     │  │
//! │                     │            (Background Thread)               │  │
//! │                     └───────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use nimbuskv::store::StorageEngine;
//! use nimbuskv::commands::CommandHandler;
//! use nimbuskv::connection::{handle_connection, ConnectionStats};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() {
//!     let storage = Arc::new(StorageEngine::new(16));
//!     let handler = Arc::new(CommandHandler::new(Arc::clone(&storage), None));
//!     let stats = Arc::new(ConnectionStats::new());
//!
//!     let listener = TcpListener::bind("127.0.0.1:6379").await.unwrap();
//!
//!     loop {
//!         let (stream, addr) = listener.accept().await.unwrap();
//!         let handler = (*handler).clone();
//!         let stats = Arc::clone(&stats);
//!
//!         tokio::spawn(handle_connection(stream, addr, handler, None, stats));
//!     }
//! }
//! ```
//!
//! ## Supported Commands
//!
//! ### Keyspace
//! - `DEL`, `EXISTS`, `TYPE`, `RENAME`, `RENAMENX`, `KEYS`, `FLUSHDB`
//!
//! ### Strings
//! - `GET`, `SET`, `SETNX`, `GETSET`, `STRLEN`, `APPEND`
//! - `INCR`, `INCRBY`, `DECR`, `DECRBY`, `GETDEL`
//! - `MSET`, `MGET`
//!
//! ### Lists
//! - `LPUSH`, `RPUSH`, `LPOP`, `RPOP`, `LRANGE`, `LLEN`, `LINDEX`, `LSET`
//!
//! ### Hashes
//! - `HSET`, `HMSET`, `HSETNX`, `HGET`, `HEXISTS`, `HDEL`, `HLEN`
//! - `HGETALL`, `HKEYS`, `HVALS`, `HMGET`
//!
//! ### Sets
//! - `SADD`, `SCARD`, `SISMEMBER`, `SMEMBERS`, `SREM`, `SPOP`, `SRANDMEMBER`
//! - `SUNION`, `SINTER`, `SDIFF`, `SUNIONSTORE`, `SINTERSTORE`, `SDIFFSTORE`
//!
//! ### Sorted sets
//! - `ZADD`, `ZSCORE`, `ZCARD`, `ZRANGE`, `ZREM`, `ZCOUNT`, `ZRANK`
//!
//! ### Server
//! - `PING`, `ECHO`, `INFO`, `DBSIZE`, `COMMAND`, `CONFIG`, `TIME`, `QUIT`,
//!   `SELECT` (handled at the connection layer)
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP protocol parser and types
//! - [`store`]: sharded, per-key-locked storage engine with adaptive value encodings
//! - [`aof`]: append-only write-behind command log
//! - [`cluster`]: consistent-hash ring, peer connection pool, and command router
//! - [`commands`]: command dispatch for all supported commands
//! - [`connection`]: client connection management
//! - [`config`]: server configuration
//!
//! ## Design Highlights
//!
//! ### Thread safety
//!
//! The storage engine uses a sharded design with 64 independent RwLocks,
//! layered under a per-key lock manager for operations that need to hold a
//! lock across an iteration of a collection's interior. Different keys
//! proceed fully in parallel; the same key serializes through its own lock.
//!
//! ### Zero-copy parsing
//!
//! The RESP parser uses `bytes::Bytes` to avoid copying data when possible,
//! which matters most for large bulk strings.
//!
//! ### Durability without a snapshot format
//!
//! Every successful write command is appended to an AOF file by a single
//! background thread; replay on startup reconstructs the keyspace by
//! re-executing that log before the server accepts new connections.

pub mod aof;
pub mod cluster;
pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod store;

// Re-export commonly used types for convenience
pub use aof::{Aof, AofHandle};
pub use cluster::ClusterRouter;
pub use commands::CommandHandler;
pub use config::Config;
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{ParseError, RespParser, RespValue};
pub use store::{Database, StorageEngine};

/// The default port NimbusKV listens on (same as Redis).
pub const DEFAULT_PORT: u16 = 6379;

/// The default address NimbusKV binds to.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of NimbusKV.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
