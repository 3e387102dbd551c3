//! Command dispatch.
//!
//! Parses a RESP array into a command name plus arguments and dispatches
//! to one handler per command, following the teacher's
//! uppercase-name-match dispatch table and `get_bytes`/`get_string`/
//! `get_integer` extraction helpers. Generalized from the teacher's single
//! scalar `StorageEngine` to the multi-database, multi-type
//! `store::StorageEngine`, and extended with the hash/set/sorted-set
//! command families and the AOF append hook.

use crate::aof::AofHandle;
use crate::protocol::RespValue;
use crate::store::{Database, StorageEngine, StoreError, StoreResult};
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Handles commands by dispatching them to the appropriate storage calls.
#[derive(Clone)]
pub struct CommandHandler {
    storage: Arc<StorageEngine>,
    aof: Option<AofHandle>,
    start_time: std::time::Instant,
}

impl CommandHandler {
    pub fn new(storage: Arc<StorageEngine>, aof: Option<AofHandle>) -> Self {
        Self { storage, aof, start_time: std::time::Instant::now() }
    }

    pub fn num_databases(&self) -> usize {
        self.storage.num_databases()
    }

    /// Executes one parsed command against database `db_index` and returns
    /// the RESP reply. `SELECT` is not handled here: the connection layer
    /// intercepts it before a command ever reaches dispatch, since only the
    /// connection owns the mutable "currently selected db" state.
    pub fn execute(&self, db_index: usize, command: RespValue) -> RespValue {
        let args = match command {
            RespValue::Array(args) => args,
            _ => return RespValue::error("ERR invalid command format"),
        };
        if args.is_empty() {
            return RespValue::error("ERR empty command");
        }

        let name = match Self::get_string(&args[0]) {
            Some(s) => s.to_uppercase(),
            None => return RespValue::error("ERR invalid command name"),
        };

        let Some(db) = self.storage_db(db_index) else {
            return RespValue::error("ERR DB index is out of range");
        };
        let reply = self.dispatch(db, &name, &args[1..]);

        if !reply.is_error() && is_write_command(&name) {
            if let Some(aof) = &self.aof {
                aof.append(db_index, &args);
            }
        }
        reply
    }

    fn storage_db(&self, index: usize) -> Option<&Database> {
        if index < self.storage.num_databases() {
            Some(self.storage.db(index))
        } else {
            None
        }
    }

    fn dispatch(&self, db: &Database, cmd: &str, args: &[RespValue]) -> RespValue {
        match cmd {
            // Keyspace
            "DEL" => self.cmd_del(db, args),
            "EXISTS" => self.cmd_exists(db, args),
            "TYPE" => self.cmd_type(db, args),
            "RENAME" => self.cmd_rename(db, args),
            "RENAMENX" => self.cmd_renamenx(db, args),
            "KEYS" => self.cmd_keys(db, args),
            "FLUSHDB" => self.cmd_flushdb(db, args),

            // Strings
            "GET" => self.cmd_get(db, args),
            "SET" => self.cmd_set(db, args),
            "SETNX" => self.cmd_setnx(db, args),
            "GETSET" => self.cmd_getset(db, args),
            "STRLEN" => self.cmd_strlen(db, args),
            "APPEND" => self.cmd_append(db, args),
            "INCR" => self.cmd_incr(db, args),
            "INCRBY" => self.cmd_incrby(db, args),
            "DECR" => self.cmd_decr(db, args),
            "DECRBY" => self.cmd_decrby(db, args),
            "GETDEL" => self.cmd_getdel(db, args),
            "MSET" => self.cmd_mset(db, args),
            "MGET" => self.cmd_mget(db, args),

            // Lists
            "LPUSH" => self.cmd_lpush(db, args),
            "RPUSH" => self.cmd_rpush(db, args),
            "LPOP" => self.cmd_lpop(db, args),
            "RPOP" => self.cmd_rpop(db, args),
            "LRANGE" => self.cmd_lrange(db, args),
            "LLEN" => self.cmd_llen(db, args),
            "LINDEX" => self.cmd_lindex(db, args),
            "LSET" => self.cmd_lset(db, args),

            // Hashes
            "HSET" => self.cmd_hset(db, args),
            "HMSET" => self.cmd_hmset(db, args),
            "HSETNX" => self.cmd_hsetnx(db, args),
            "HGET" => self.cmd_hget(db, args),
            "HEXISTS" => self.cmd_hexists(db, args),
            "HDEL" => self.cmd_hdel(db, args),
            "HLEN" => self.cmd_hlen(db, args),
            "HGETALL" => self.cmd_hgetall(db, args),
            "HKEYS" => self.cmd_hkeys(db, args),
            "HVALS" => self.cmd_hvals(db, args),
            "HMGET" => self.cmd_hmget(db, args),

            // Sets
            "SADD" => self.cmd_sadd(db, args),
            "SCARD" => self.cmd_scard(db, args),
            "SISMEMBER" => self.cmd_sismember(db, args),
            "SMEMBERS" => self.cmd_smembers(db, args),
            "SREM" => self.cmd_srem(db, args),
            "SPOP" => self.cmd_spop(db, args),
            "SRANDMEMBER" => self.cmd_srandmember(db, args),
            "SUNION" => self.cmd_set_algebra(db, args, Database::sunion),
            "SINTER" => self.cmd_set_algebra(db, args, Database::sinter),
            "SDIFF" => self.cmd_set_algebra(db, args, Database::sdiff),
            "SUNIONSTORE" => self.cmd_set_algebra_store(db, args, Database::sunion),
            "SINTERSTORE" => self.cmd_set_algebra_store(db, args, Database::sinter),
            "SDIFFSTORE" => self.cmd_set_algebra_store(db, args, Database::sdiff),

            // Sorted sets
            "ZADD" => self.cmd_zadd(db, args),
            "ZSCORE" => self.cmd_zscore(db, args),
            "ZCARD" => self.cmd_zcard(db, args),
            "ZRANGE" => self.cmd_zrange(db, args),
            "ZREM" => self.cmd_zrem(db, args),
            "ZCOUNT" => self.cmd_zcount(db, args),
            "ZRANK" => self.cmd_zrank(db, args),

            // System
            "PING" => self.cmd_ping(args),
            "ECHO" => self.cmd_echo(args),
            "DBSIZE" => self.cmd_dbsize(db, args),
            "COMMAND" => self.cmd_command(args),
            "CONFIG" => self.cmd_config(args),
            "TIME" => self.cmd_time(args),
            "INFO" => self.cmd_info(db, args),
            "QUIT" => RespValue::ok(),

            _ => RespValue::error(format!("ERR unknown command '{}'", cmd.to_lowercase())),
        }
    }

    // ---- argument extraction -------------------------------------------

    fn get_bytes(value: &RespValue) -> Option<Bytes> {
        match value {
            RespValue::BulkString(b) => Some(b.clone()),
            RespValue::SimpleString(s) => Some(Bytes::from(s.clone())),
            _ => None,
        }
    }

    fn get_string(value: &RespValue) -> Option<String> {
        match value {
            RespValue::BulkString(b) => std::str::from_utf8(b).ok().map(|s| s.to_string()),
            RespValue::SimpleString(s) => Some(s.clone()),
            _ => None,
        }
    }

    fn get_integer(value: &RespValue) -> Option<i64> {
        match value {
            RespValue::Integer(n) => Some(*n),
            RespValue::BulkString(b) => std::str::from_utf8(b).ok().and_then(|s| s.parse().ok()),
            RespValue::SimpleString(s) => s.parse().ok(),
            _ => None,
        }
    }

    fn get_float(value: &RespValue) -> Option<f64> {
        match value {
            RespValue::Integer(n) => Some(*n as f64),
            RespValue::BulkString(b) => std::str::from_utf8(b).ok().and_then(|s| s.parse().ok()),
            RespValue::SimpleString(s) => s.parse().ok(),
            _ => None,
        }
    }

    fn from_store<T>(result: StoreResult<T>, ok: impl FnOnce(T) -> RespValue) -> RespValue {
        match result {
            Ok(v) => ok(v),
            Err(e) => RespValue::error(e.to_string()),
        }
    }

    // ------------------------------------------------------------ keyspace

    fn cmd_del(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.is_empty() {
            return RespValue::error("ERR wrong number of arguments for 'del' command");
        }
        let keys: Vec<Bytes> = args.iter().filter_map(Self::get_bytes).collect();
        RespValue::integer(db.del(&keys) as i64)
    }

    fn cmd_exists(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.is_empty() {
            return RespValue::error("ERR wrong number of arguments for 'exists' command");
        }
        let count = args.iter().filter_map(Self::get_bytes).filter(|k| db.exists(k)).count();
        RespValue::integer(count as i64)
    }

    fn cmd_type(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() != 1 {
            return RespValue::error("ERR wrong number of arguments for 'type' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        RespValue::simple_string(db.type_name(&key))
    }

    fn cmd_rename(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() != 2 {
            return RespValue::error("ERR wrong number of arguments for 'rename' command");
        }
        let (Some(src), Some(dst)) = (Self::get_bytes(&args[0]), Self::get_bytes(&args[1])) else {
            return RespValue::error("ERR syntax error");
        };
        Self::from_store(db.rename(&src, &dst), |_| RespValue::ok())
    }

    fn cmd_renamenx(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() != 2 {
            return RespValue::error("ERR wrong number of arguments for 'renamenx' command");
        }
        let (Some(src), Some(dst)) = (Self::get_bytes(&args[0]), Self::get_bytes(&args[1])) else {
            return RespValue::error("ERR syntax error");
        };
        Self::from_store(db.renamenx(&src, &dst), |did| RespValue::integer(did as i64))
    }

    fn cmd_keys(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() != 1 {
            return RespValue::error("ERR wrong number of arguments for 'keys' command");
        }
        let Some(pattern) = Self::get_string(&args[0]) else { return RespValue::error("ERR syntax error") };
        RespValue::array(db.keys(&pattern).into_iter().map(RespValue::bulk_string).collect())
    }

    fn cmd_flushdb(&self, db: &Database, _args: &[RespValue]) -> RespValue {
        db.flush();
        RespValue::ok()
    }

    // ------------------------------------------------------------- strings

    fn cmd_get(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() != 1 {
            return RespValue::error("ERR wrong number of arguments for 'get' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        Self::from_store(db.get(&key), |v| v.map(RespValue::bulk_string).unwrap_or(RespValue::Null))
    }

    fn cmd_set(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() < 2 {
            return RespValue::error("ERR wrong number of arguments for 'set' command");
        }
        let (Some(key), Some(value)) = (Self::get_bytes(&args[0]), Self::get_bytes(&args[1])) else {
            return RespValue::error("ERR syntax error");
        };
        db.set(key, value);
        RespValue::ok()
    }

    fn cmd_setnx(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() != 2 {
            return RespValue::error("ERR wrong number of arguments for 'setnx' command");
        }
        let (Some(key), Some(value)) = (Self::get_bytes(&args[0]), Self::get_bytes(&args[1])) else {
            return RespValue::error("ERR syntax error");
        };
        RespValue::integer(db.setnx(key, value) as i64)
    }

    fn cmd_getset(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() != 2 {
            return RespValue::error("ERR wrong number of arguments for 'getset' command");
        }
        let (Some(key), Some(value)) = (Self::get_bytes(&args[0]), Self::get_bytes(&args[1])) else {
            return RespValue::error("ERR syntax error");
        };
        Self::from_store(db.getset(key, value), |v| v.map(RespValue::bulk_string).unwrap_or(RespValue::Null))
    }

    fn cmd_strlen(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() != 1 {
            return RespValue::error("ERR wrong number of arguments for 'strlen' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        Self::from_store(db.strlen(&key), |n| RespValue::integer(n as i64))
    }

    fn cmd_append(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() != 2 {
            return RespValue::error("ERR wrong number of arguments for 'append' command");
        }
        let (Some(key), Some(value)) = (Self::get_bytes(&args[0]), Self::get_bytes(&args[1])) else {
            return RespValue::error("ERR syntax error");
        };
        Self::from_store(db.append(&key, &value), |n| RespValue::integer(n as i64))
    }

    fn cmd_incr(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() != 1 {
            return RespValue::error("ERR wrong number of arguments for 'incr' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        Self::from_store(db.incr_by(&key, 1), RespValue::integer)
    }

    fn cmd_incrby(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() != 2 {
            return RespValue::error("ERR wrong number of arguments for 'incrby' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        let Some(delta) = Self::get_integer(&args[1]) else {
            return RespValue::error(StoreError::NotAnInteger.to_string());
        };
        Self::from_store(db.incr_by(&key, delta), RespValue::integer)
    }

    fn cmd_decr(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() != 1 {
            return RespValue::error("ERR wrong number of arguments for 'decr' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        Self::from_store(db.incr_by(&key, -1), RespValue::integer)
    }

    fn cmd_decrby(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() != 2 {
            return RespValue::error("ERR wrong number of arguments for 'decrby' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        let Some(delta) = Self::get_integer(&args[1]) else {
            return RespValue::error(StoreError::NotAnInteger.to_string());
        };
        Self::from_store(db.incr_by(&key, -delta), RespValue::integer)
    }

    fn cmd_getdel(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() != 1 {
            return RespValue::error("ERR wrong number of arguments for 'getdel' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        Self::from_store(db.getdel(&key), |v| v.map(RespValue::bulk_string).unwrap_or(RespValue::Null))
    }

    fn cmd_mset(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.is_empty() || args.len() % 2 != 0 {
            return RespValue::error("ERR wrong number of arguments for 'mset' command");
        }
        for pair in args.chunks(2) {
            let (Some(key), Some(value)) = (Self::get_bytes(&pair[0]), Self::get_bytes(&pair[1])) else {
                return RespValue::error("ERR syntax error");
            };
            db.set(key, value);
        }
        RespValue::ok()
    }

    fn cmd_mget(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.is_empty() {
            return RespValue::error("ERR wrong number of arguments for 'mget' command");
        }
        let values = args
            .iter()
            .map(|a| match Self::get_bytes(a) {
                Some(key) => db.get(&key).ok().flatten().map(RespValue::bulk_string).unwrap_or(RespValue::Null),
                None => RespValue::Null,
            })
            .collect();
        RespValue::array(values)
    }

    // --------------------------------------------------------------- lists

    fn cmd_lpush(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() < 2 {
            return RespValue::error("ERR wrong number of arguments for 'lpush' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        let values: Vec<Bytes> = args[1..].iter().filter_map(Self::get_bytes).collect();
        if values.len() != args.len() - 1 {
            return RespValue::error("ERR syntax error");
        }
        Self::from_store(db.lpush(&key, values), |n| RespValue::integer(n as i64))
    }

    fn cmd_rpush(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() < 2 {
            return RespValue::error("ERR wrong number of arguments for 'rpush' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        let values: Vec<Bytes> = args[1..].iter().filter_map(Self::get_bytes).collect();
        if values.len() != args.len() - 1 {
            return RespValue::error("ERR syntax error");
        }
        Self::from_store(db.rpush(&key, values), |n| RespValue::integer(n as i64))
    }

    fn cmd_lpop(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() != 1 {
            return RespValue::error("ERR wrong number of arguments for 'lpop' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        Self::from_store(db.lpop(&key), |v| v.map(RespValue::bulk_string).unwrap_or(RespValue::Null))
    }

    fn cmd_rpop(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() != 1 {
            return RespValue::error("ERR wrong number of arguments for 'rpop' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        Self::from_store(db.rpop(&key), |v| v.map(RespValue::bulk_string).unwrap_or(RespValue::Null))
    }

    fn cmd_lrange(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() != 3 {
            return RespValue::error("ERR wrong number of arguments for 'lrange' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        let (Some(start), Some(stop)) = (Self::get_integer(&args[1]), Self::get_integer(&args[2])) else {
            return RespValue::error(StoreError::NotAnInteger.to_string());
        };
        Self::from_store(db.lrange(&key, start, stop), |items| {
            RespValue::array(items.into_iter().map(RespValue::bulk_string).collect())
        })
    }

    fn cmd_llen(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() != 1 {
            return RespValue::error("ERR wrong number of arguments for 'llen' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        Self::from_store(db.llen(&key), RespValue::integer)
    }

    fn cmd_lindex(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() != 2 {
            return RespValue::error("ERR wrong number of arguments for 'lindex' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        let Some(index) = Self::get_integer(&args[1]) else {
            return RespValue::error(StoreError::NotAnInteger.to_string());
        };
        Self::from_store(db.lindex(&key, index), |v| v.map(RespValue::bulk_string).unwrap_or(RespValue::Null))
    }

    fn cmd_lset(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() != 3 {
            return RespValue::error("ERR wrong number of arguments for 'lset' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        let Some(index) = Self::get_integer(&args[1]) else {
            return RespValue::error(StoreError::NotAnInteger.to_string());
        };
        let Some(value) = Self::get_bytes(&args[2]) else { return RespValue::error("ERR syntax error") };
        Self::from_store(db.lset(&key, index, value), |_| RespValue::ok())
    }

    // -------------------------------------------------------------- hashes

    fn cmd_hset(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() < 3 || (args.len() - 1) % 2 != 0 {
            return RespValue::error("ERR wrong number of arguments for 'hset' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        let mut created = 0usize;
        for pair in args[1..].chunks(2) {
            let (Some(field), Some(value)) = (Self::get_bytes(&pair[0]), Self::get_bytes(&pair[1])) else {
                return RespValue::error("ERR syntax error");
            };
            match db.hset(&key, field, value) {
                Ok(true) => created += 1,
                Ok(false) => {}
                Err(e) => return RespValue::error(e.to_string()),
            }
        }
        RespValue::integer(created as i64)
    }

    fn cmd_hmset(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() < 3 || (args.len() - 1) % 2 != 0 {
            return RespValue::error("ERR wrong number of arguments for 'hmset' command");
        }
        match self.cmd_hset(db, args) {
            RespValue::Error(e) => RespValue::Error(e),
            _ => RespValue::ok(),
        }
    }

    fn cmd_hsetnx(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() != 3 {
            return RespValue::error("ERR wrong number of arguments for 'hsetnx' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        let (Some(field), Some(value)) = (Self::get_bytes(&args[1]), Self::get_bytes(&args[2])) else {
            return RespValue::error("ERR syntax error");
        };
        Self::from_store(db.hsetnx(&key, field, value), |did| RespValue::integer(did as i64))
    }

    fn cmd_hget(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() != 2 {
            return RespValue::error("ERR wrong number of arguments for 'hget' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        let Some(field) = Self::get_bytes(&args[1]) else { return RespValue::error("ERR syntax error") };
        Self::from_store(db.hget(&key, &field), |v| v.map(RespValue::bulk_string).unwrap_or(RespValue::Null))
    }

    fn cmd_hexists(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() != 2 {
            return RespValue::error("ERR wrong number of arguments for 'hexists' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        let Some(field) = Self::get_bytes(&args[1]) else { return RespValue::error("ERR syntax error") };
        Self::from_store(db.hexists(&key, &field), |b| RespValue::integer(b as i64))
    }

    fn cmd_hdel(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() < 2 {
            return RespValue::error("ERR wrong number of arguments for 'hdel' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        let fields: Vec<Bytes> = args[1..].iter().filter_map(Self::get_bytes).collect();
        Self::from_store(db.hdel(&key, &fields), |n| RespValue::integer(n as i64))
    }

    fn cmd_hlen(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() != 1 {
            return RespValue::error("ERR wrong number of arguments for 'hlen' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        Self::from_store(db.hlen(&key), RespValue::integer)
    }

    fn cmd_hgetall(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() != 1 {
            return RespValue::error("ERR wrong number of arguments for 'hgetall' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        Self::from_store(db.hgetall(&key), |entries| {
            let mut flat = Vec::with_capacity(entries.len() * 2);
            for (f, v) in entries {
                flat.push(RespValue::bulk_string(f));
                flat.push(RespValue::bulk_string(v));
            }
            RespValue::array(flat)
        })
    }

    fn cmd_hkeys(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() != 1 {
            return RespValue::error("ERR wrong number of arguments for 'hkeys' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        Self::from_store(db.hkeys(&key), |fields| RespValue::array(fields.into_iter().map(RespValue::bulk_string).collect()))
    }

    fn cmd_hvals(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() != 1 {
            return RespValue::error("ERR wrong number of arguments for 'hvals' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        Self::from_store(db.hvals(&key), |values| RespValue::array(values.into_iter().map(RespValue::bulk_string).collect()))
    }

    fn cmd_hmget(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() < 2 {
            return RespValue::error("ERR wrong number of arguments for 'hmget' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        let fields: Vec<Bytes> = args[1..].iter().filter_map(Self::get_bytes).collect();
        Self::from_store(db.hmget(&key, &fields), |values| {
            RespValue::array(values.into_iter().map(|v| v.map(RespValue::bulk_string).unwrap_or(RespValue::Null)).collect())
        })
    }

    // ---------------------------------------------------------------- sets

    fn cmd_sadd(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() < 2 {
            return RespValue::error("ERR wrong number of arguments for 'sadd' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        let members: Vec<Bytes> = args[1..].iter().filter_map(Self::get_bytes).collect();
        Self::from_store(db.sadd(&key, members), |n| RespValue::integer(n as i64))
    }

    fn cmd_scard(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() != 1 {
            return RespValue::error("ERR wrong number of arguments for 'scard' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        Self::from_store(db.scard(&key), RespValue::integer)
    }

    fn cmd_sismember(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() != 2 {
            return RespValue::error("ERR wrong number of arguments for 'sismember' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        let Some(member) = Self::get_bytes(&args[1]) else { return RespValue::error("ERR syntax error") };
        Self::from_store(db.sismember(&key, &member), |b| RespValue::integer(b as i64))
    }

    fn cmd_smembers(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() != 1 {
            return RespValue::error("ERR wrong number of arguments for 'smembers' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        Self::from_store(db.smembers(&key), |members| RespValue::array(members.into_iter().map(RespValue::bulk_string).collect()))
    }

    fn cmd_srem(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() < 2 {
            return RespValue::error("ERR wrong number of arguments for 'srem' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        let members: Vec<Bytes> = args[1..].iter().filter_map(Self::get_bytes).collect();
        Self::from_store(db.srem(&key, &members), |n| RespValue::integer(n as i64))
    }

    /// No count: returns a single bulk reply (or nil). With a count: always
    /// an array reply, even for count 1.
    fn cmd_spop(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.is_empty() || args.len() > 2 {
            return RespValue::error("ERR wrong number of arguments for 'spop' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        if args.len() == 1 {
            return Self::from_store(db.spop(&key, None), |v| {
                v.into_iter().next().map(RespValue::bulk_string).unwrap_or(RespValue::Null)
            });
        }
        let Some(count) = Self::get_integer(&args[1]).filter(|n| *n >= 0) else {
            return RespValue::error(StoreError::NotAnInteger.to_string());
        };
        Self::from_store(db.spop(&key, Some(count as usize)), |members| {
            RespValue::array(members.into_iter().map(RespValue::bulk_string).collect())
        })
    }

    fn cmd_srandmember(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.is_empty() || args.len() > 2 {
            return RespValue::error("ERR wrong number of arguments for 'srandmember' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        if args.len() == 1 {
            return Self::from_store(db.srandmember(&key, None), |v| {
                v.into_iter().next().map(RespValue::bulk_string).unwrap_or(RespValue::Null)
            });
        }
        let Some(count) = Self::get_integer(&args[1]) else {
            return RespValue::error(StoreError::NotAnInteger.to_string());
        };
        Self::from_store(db.srandmember(&key, Some(count)), |members| {
            RespValue::array(members.into_iter().map(RespValue::bulk_string).collect())
        })
    }

    fn cmd_set_algebra(
        &self,
        db: &Database,
        args: &[RespValue],
        op: impl Fn(&Database, &[Bytes]) -> StoreResult<std::collections::HashSet<Bytes>>,
    ) -> RespValue {
        if args.is_empty() {
            return RespValue::error("ERR wrong number of arguments for set operation");
        }
        let keys: Vec<Bytes> = args.iter().filter_map(Self::get_bytes).collect();
        Self::from_store(op(db, &keys), |members| RespValue::array(members.into_iter().map(RespValue::bulk_string).collect()))
    }

    fn cmd_set_algebra_store(
        &self,
        db: &Database,
        args: &[RespValue],
        op: impl Fn(&Database, &[Bytes]) -> StoreResult<std::collections::HashSet<Bytes>>,
    ) -> RespValue {
        if args.len() < 2 {
            return RespValue::error("ERR wrong number of arguments for set store operation");
        }
        let Some(dest) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        let keys: Vec<Bytes> = args[1..].iter().filter_map(Self::get_bytes).collect();
        let members = match op(db, &keys) {
            Ok(m) => m,
            Err(e) => return RespValue::error(e.to_string()),
        };
        Self::from_store(db.store_set(&dest, members), |n| RespValue::integer(n as i64))
    }

    // --------------------------------------------------------- sorted sets

    fn cmd_zadd(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() < 3 || (args.len() - 1) % 2 != 0 {
            return RespValue::error("ERR wrong number of arguments for 'zadd' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        let mut pairs = Vec::with_capacity((args.len() - 1) / 2);
        for pair in args[1..].chunks(2) {
            let Some(score) = Self::get_float(&pair[0]) else {
                return RespValue::error("ERR value is not a valid float");
            };
            let Some(member) = Self::get_bytes(&pair[1]) else { return RespValue::error("ERR syntax error") };
            pairs.push((score, member));
        }
        Self::from_store(db.zadd(&key, pairs), |n| RespValue::integer(n as i64))
    }

    fn cmd_zscore(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() != 2 {
            return RespValue::error("ERR wrong number of arguments for 'zscore' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        let Some(member) = Self::get_bytes(&args[1]) else { return RespValue::error("ERR syntax error") };
        Self::from_store(db.zscore(&key, &member), |v| {
            v.map(|s| RespValue::bulk_string(Bytes::from(format_score(s)))).unwrap_or(RespValue::Null)
        })
    }

    fn cmd_zcard(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() != 1 {
            return RespValue::error("ERR wrong number of arguments for 'zcard' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        Self::from_store(db.zcard(&key), RespValue::integer)
    }

    fn cmd_zrange(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() < 3 {
            return RespValue::error("ERR wrong number of arguments for 'zrange' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        let (Some(start), Some(stop)) = (Self::get_integer(&args[1]), Self::get_integer(&args[2])) else {
            return RespValue::error(StoreError::NotAnInteger.to_string());
        };
        let with_scores = args.len() == 4 && Self::get_string(&args[3]).map(|s| s.eq_ignore_ascii_case("WITHSCORES")).unwrap_or(false);
        if args.len() > 3 && !with_scores {
            return RespValue::error("ERR syntax error");
        }
        Self::from_store(db.zrange(&key, start, stop), |items| {
            let mut out = Vec::with_capacity(items.len() * if with_scores { 2 } else { 1 });
            for (member, score) in items {
                out.push(RespValue::bulk_string(member));
                if with_scores {
                    out.push(RespValue::bulk_string(Bytes::from(format_score(score))));
                }
            }
            RespValue::array(out)
        })
    }

    fn cmd_zrem(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() < 2 {
            return RespValue::error("ERR wrong number of arguments for 'zrem' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        let members: Vec<Bytes> = args[1..].iter().filter_map(Self::get_bytes).collect();
        Self::from_store(db.zrem(&key, &members), |n| RespValue::integer(n as i64))
    }

    fn cmd_zcount(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() != 3 {
            return RespValue::error("ERR wrong number of arguments for 'zcount' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        let (Some(min), Some(max)) = (Self::get_float(&args[1]), Self::get_float(&args[2])) else {
            return RespValue::error("ERR min or max is not a float");
        };
        Self::from_store(db.zcount(&key, min, max), |n| RespValue::integer(n as i64))
    }

    fn cmd_zrank(&self, db: &Database, args: &[RespValue]) -> RespValue {
        if args.len() != 2 {
            return RespValue::error("ERR wrong number of arguments for 'zrank' command");
        }
        let Some(key) = Self::get_bytes(&args[0]) else { return RespValue::error("ERR syntax error") };
        let Some(member) = Self::get_bytes(&args[1]) else { return RespValue::error("ERR syntax error") };
        Self::from_store(db.zrank(&key, &member), |rank| rank.map(|r| RespValue::integer(r as i64)).unwrap_or(RespValue::Null))
    }

    // -------------------------------------------------------------- system

    fn cmd_ping(&self, args: &[RespValue]) -> RespValue {
        if args.is_empty() {
            RespValue::pong()
        } else {
            Self::get_bytes(&args[0]).map(RespValue::bulk_string).unwrap_or_else(RespValue::pong)
        }
    }

    fn cmd_echo(&self, args: &[RespValue]) -> RespValue {
        if args.len() != 1 {
            return RespValue::error("ERR wrong number of arguments for 'echo' command");
        }
        Self::get_bytes(&args[0]).map(RespValue::bulk_string).unwrap_or_else(|| RespValue::error("ERR syntax error"))
    }

    fn cmd_dbsize(&self, db: &Database, _args: &[RespValue]) -> RespValue {
        RespValue::integer(db.keys("*").len() as i64)
    }

    fn cmd_command(&self, _args: &[RespValue]) -> RespValue {
        const NAMES: &[&str] = &[
            "DEL", "EXISTS", "TYPE", "RENAME", "RENAMENX", "KEYS", "FLUSHDB", "GET", "SET", "SETNX", "GETSET", "STRLEN",
            "APPEND", "INCR", "INCRBY", "DECR", "DECRBY", "GETDEL", "MSET", "MGET", "LPUSH", "RPUSH", "LPOP", "RPOP",
            "LRANGE", "LLEN", "LINDEX", "LSET", "HSET", "HMSET", "HSETNX", "HGET", "HEXISTS", "HDEL", "HLEN", "HGETALL",
            "HKEYS", "HVALS", "HMGET", "SADD", "SCARD", "SISMEMBER", "SMEMBERS", "SREM", "SPOP", "SRANDMEMBER", "SUNION",
            "SINTER", "SDIFF", "SUNIONSTORE", "SINTERSTORE", "SDIFFSTORE", "ZADD", "ZSCORE", "ZCARD", "ZRANGE", "ZREM",
            "ZCOUNT", "ZRANK", "PING", "ECHO", "DBSIZE", "COMMAND", "CONFIG", "TIME", "INFO", "QUIT",
        ];
        RespValue::array(NAMES.iter().map(|c| RespValue::bulk_string(Bytes::from(*c))).collect())
    }

    fn cmd_config(&self, args: &[RespValue]) -> RespValue {
        if args.is_empty() {
            return RespValue::error("ERR wrong number of arguments for 'config' command");
        }
        let Some(sub) = Self::get_string(&args[0]) else { return RespValue::error("ERR syntax error") };
        match sub.to_uppercase().as_str() {
            "GET" => RespValue::array(vec![]),
            "SET" => RespValue::ok(),
            other => RespValue::error(format!("ERR unknown CONFIG subcommand '{}'", other)),
        }
    }

    fn cmd_time(&self, _args: &[RespValue]) -> RespValue {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        RespValue::array(vec![
            RespValue::bulk_string(Bytes::from(now.as_secs().to_string())),
            RespValue::bulk_string(Bytes::from(now.subsec_micros().to_string())),
        ])
    }

    fn cmd_info(&self, db: &Database, _args: &[RespValue]) -> RespValue {
        let uptime = self.start_time.elapsed().as_secs();
        let info = format!(
            "# Server\r\nnimbuskv_version:{}\r\nos:{}\r\nuptime_in_seconds:{}\r\n\r\n# Keyspace\r\ndb0:keys={}\r\n",
            env!("CARGO_PKG_VERSION"),
            std::env::consts::OS,
            uptime,
            db.keys("*").len(),
        );
        RespValue::bulk_string(Bytes::from(info))
    }
}

fn format_score(score: f64) -> String {
    if score.fract() == 0.0 && score.is_finite() {
        format!("{}", score as i64)
    } else {
        format!("{}", score)
    }
}

fn is_write_command(name: &str) -> bool {
    matches!(
        name,
        "DEL" | "RENAME" | "RENAMENX" | "FLUSHDB"
            | "SET" | "SETNX" | "GETSET" | "APPEND" | "INCR" | "INCRBY" | "DECR" | "DECRBY" | "GETDEL" | "MSET"
            | "LPUSH" | "RPUSH" | "LPOP" | "RPOP" | "LSET"
            | "HSET" | "HMSET" | "HSETNX" | "HDEL"
            | "SADD" | "SREM" | "SPOP" | "SUNIONSTORE" | "SINTERSTORE" | "SDIFFSTORE"
            | "ZADD" | "ZREM"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StorageEngine as Store;

    fn create_handler() -> CommandHandler {
        CommandHandler::new(Arc::new(Store::new(16)), None)
    }

    fn make_command(args: &[&str]) -> RespValue {
        RespValue::Array(args.iter().map(|s| RespValue::bulk_string(Bytes::from(s.to_string()))).collect())
    }

    #[test]
    fn ping_and_echo() {
        let h = create_handler();
        assert_eq!(h.execute(0, make_command(&["PING"])), RespValue::pong());
        assert_eq!(h.execute(0, make_command(&["PING", "hello"])), RespValue::bulk_string(Bytes::from("hello")));
    }

    #[test]
    fn set_then_get() {
        let h = create_handler();
        assert_eq!(h.execute(0, make_command(&["SET", "k", "v"])), RespValue::ok());
        assert_eq!(h.execute(0, make_command(&["GET", "k"])), RespValue::bulk_string(Bytes::from("v")));
    }

    #[test]
    fn databases_are_isolated_by_index() {
        let h = create_handler();
        h.execute(0, make_command(&["SET", "k", "in-db0"]));
        assert_eq!(h.execute(1, make_command(&["GET", "k"])), RespValue::Null);
    }

    #[test]
    fn wrong_type_surfaces_exact_message() {
        let h = create_handler();
        h.execute(0, make_command(&["RPUSH", "l", "a"]));
        let reply = h.execute(0, make_command(&["GET", "l"]));
        assert_eq!(reply, RespValue::error("WRONGTYPE Operation against a key holding the wrong kind of value"));
    }

    #[test]
    fn hash_roundtrip() {
        let h = create_handler();
        h.execute(0, make_command(&["HSET", "h", "f1", "v1", "f2", "v2"]));
        let reply = h.execute(0, make_command(&["HGET", "h", "f1"]));
        assert_eq!(reply, RespValue::bulk_string(Bytes::from("v1")));
        assert_eq!(h.execute(0, make_command(&["HLEN", "h"])), RespValue::integer(2));
    }

    #[test]
    fn set_algebra_union() {
        let h = create_handler();
        h.execute(0, make_command(&["SADD", "a", "x", "y"]));
        h.execute(0, make_command(&["SADD", "b", "y", "z"]));
        let reply = h.execute(0, make_command(&["SUNION", "a", "b"]));
        let RespValue::Array(items) = reply else { panic!("expected array") };
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn zadd_and_zrange_withscores() {
        let h = create_handler();
        h.execute(0, make_command(&["ZADD", "z", "1", "one", "2", "two"]));
        let reply = h.execute(0, make_command(&["ZRANGE", "z", "0", "-1", "WITHSCORES"]));
        assert_eq!(
            reply,
            RespValue::Array(vec![
                RespValue::bulk_string(Bytes::from("one")),
                RespValue::bulk_string(Bytes::from("1")),
                RespValue::bulk_string(Bytes::from("two")),
                RespValue::bulk_string(Bytes::from("2")),
            ])
        );
    }

    #[test]
    fn unknown_command_errors() {
        let h = create_handler();
        assert!(h.execute(0, make_command(&["NOPE"])).is_error());
    }

    #[test]
    fn select_is_not_a_dispatchable_command() {
        let h = create_handler();
        assert!(h.execute(0, make_command(&["SELECT", "1"])).is_error());
    }
}
