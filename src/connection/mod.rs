//! Connection Handler Module
//!
//! This module manages individual client connections to NimbusKV.
//! Each client connection is handled by its own async task, allowing
//! the server to handle thousands of concurrent clients efficiently.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TCP Listener                            │
//! │                    (main.rs)                                │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │
//!                        │ accept()
//!                        ▼
//!           ┌────────────────────────┐
//!           │   For each client...   │
//!           └────────────┬───────────┘
//!                        │
//!                        │ spawn task
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler                           │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │ Read bytes  │───>│ Parse RESP  │───>│ Execute cmd │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! │                                               │             │
//! │                                               ▼             │
//! │                                      ┌─────────────┐        │
//! │                                      │ Send resp   │        │
//! │                                      └─────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Async I/O**: Uses Tokio for non-blocking network operations
//! - **Buffer Management**: Efficient BytesMut buffer for incoming data
//! - **Pipelining**: Supports multiple commands in a single TCP packet
//! - **Statistics**: Tracks connection and command metrics
//! - **Per-connection `SELECT`**: each connection tracks its own selected
//!   database index; `SELECT` never reaches `CommandHandler`/`ClusterRouter`.
//! - **Parse-error recovery**: a malformed frame gets a `-PROTOCOL ERROR`
//!   reply and the parser resynchronizes at the next newline instead of the
//!   connection closing.
//! - **Bounded graceful close**: writes drain for up to 10 seconds before a
//!   connection's socket is torn down.
//!
//! ## Example
//!
//! ```ignore
//! use nimbuskv::connection::{handle_connection, ConnectionStats};
//! use nimbuskv::commands::CommandHandler;
//! use nimbuskv::store::StorageEngine;
//! use std::sync::Arc;
//!
//! let storage = Arc::new(StorageEngine::new(16));
//! let stats = Arc::new(ConnectionStats::new());
//! let handler = CommandHandler::new(storage, None);
//!
//! // For each accepted connection...
//! let (stream, addr) = listener.accept().await?;
//! tokio::spawn(handle_connection(stream, addr, handler, None, stats));
//! ```

pub mod handler;

// Re-export commonly used types
pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
