//! Command dispatch layer.
//!
//! Receives a parsed RESP command plus the connection's currently selected
//! database index, executes it against `store::StorageEngine`, and appends
//! successful writes to the AOF.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  RESP Parser    │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │                 │
//! │  - Dispatch     │
//! │  - Validate     │
//! │  - Execute      │
//! │  - AOF append   │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ StorageEngine   │  (store module)
//! └─────────────────┘
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
//! - `PING`, `ECHO`, `INFO`, `DBSIZE`, `COMMAND`, `CONFIG`, `TIME`, `QUIT`
//!
//! `SELECT` is intercepted by the connection layer and never reaches
//! dispatch: only the connection owns the mutable "currently selected db"
//! state that `SELECT` mutates.

pub mod handler;

// Re-export the main command handler
pub use handler::CommandHandler;
