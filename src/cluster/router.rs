//! Cluster command routing.
//!
//! Single point of decision for whether a command executes against this
//! node's own [`crate::commands::CommandHandler`] or gets relayed to the
//! peer that owns the key, per the table of per-command strategies below.
//! Local execution is wrapped in `catch_unwind` so a bug in one command's
//! handling can't take the whole connection down with it.

use crate::cluster::pool::ConnectionPool;
use crate::cluster::ring::HashRing;
use crate::commands::CommandHandler;
use crate::protocol::RespValue;
use bytes::Bytes;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::error;

pub struct ClusterRouter {
    self_addr: String,
    ring: HashRing,
    pool: ConnectionPool,
    handler: Arc<CommandHandler>,
}

impl ClusterRouter {
    pub fn new(self_addr: String, peers: Vec<String>, handler: Arc<CommandHandler>) -> Self {
        let mut nodes = peers.clone();
        nodes.push(self_addr.clone());
        let ring = HashRing::new(nodes);
        let pool = ConnectionPool::new(peers);
        Self { self_addr, ring, pool, handler }
    }

    pub fn peer_addresses(&self) -> impl Iterator<Item = &str> {
        self.pool.peer_addresses()
    }

    /// Routes one parsed command. `db_index` is the connection's currently
    /// selected database.
    pub async fn dispatch(&self, db_index: usize, command: RespValue) -> RespValue {
        let Some(args) = command.as_array().map(|a| a.to_vec()) else {
            return self.execute_local(db_index, command);
        };
        let Some(name) = args.first().and_then(|v| v.as_str()) else {
            return self.execute_local(db_index, command);
        };
        let name = name.to_ascii_uppercase();

        match name.as_str() {
            // Connection- or server-local state; never crosses nodes.
            "PING" | "SELECT" | "ECHO" | "COMMAND" | "CONFIG" | "DBSIZE" | "TIME" | "KEYS" => {
                self.execute_local(db_index, RespValue::Array(args))
            }
            "FLUSHDB" => self.broadcast_ok(db_index, &args).await,
            "DEL" => self.route_grouped_count(db_index, "DEL", &args[1..]).await,
            "MGET" => self.route_mget(db_index, &args[1..]).await,
            "MSET" => self.route_mset(db_index, &args[1..]).await,
            "RENAME" | "RENAMENX" => self.route_same_peer(db_index, &name, &args).await,
            "SUNION" | "SINTER" | "SDIFF" => self.route_set_algebra(db_index, &name, &args[1..]).await,
            "SUNIONSTORE" | "SINTERSTORE" | "SDIFFSTORE" => self.route_set_algebra_store(db_index, &name, &args).await,
            _ if is_single_key_command(&name) => {
                if let Some(key) = args.get(1) {
                    let peer = self.peer_for(key.as_bytes().unwrap_or(&[]));
                    self.relay_or_local(&peer, db_index, &args).await
                } else {
                    self.execute_local(db_index, RespValue::Array(args))
                }
            }
            _ => self.execute_local(db_index, RespValue::Array(args)),
        }
    }

    fn peer_for(&self, key: &[u8]) -> String {
        self.ring.pick(key).unwrap_or(self.self_addr.as_str()).to_string()
    }

    fn execute_local(&self, db_index: usize, command: RespValue) -> RespValue {
        let handler = Arc::clone(&self.handler);
        match std::panic::catch_unwind(AssertUnwindSafe(|| handler.execute(db_index, command))) {
            Ok(reply) => reply,
            Err(_) => {
                error!("panic caught while dispatching a command locally");
                RespValue::error("ERR unknown")
            }
        }
    }

    async fn relay_or_local(&self, peer: &str, db_index: usize, args: &[RespValue]) -> RespValue {
        if peer == self.self_addr {
            self.execute_local(db_index, RespValue::Array(args.to_vec()))
        } else {
            match self.pool.relay(peer, db_index, args).await {
                Ok(reply) => reply,
                Err(e) => RespValue::error(format!("ERR cluster relay to {peer} failed: {e}")),
            }
        }
    }

    async fn broadcast_ok(&self, db_index: usize, args: &[RespValue]) -> RespValue {
        let mut first_error = None;
        for peer in self.ring.nodes().map(|s| s.to_string()).collect::<Vec<_>>() {
            match self.relay_or_local(&peer, db_index, args).await {
                RespValue::SimpleString(ref s) if s == "OK" => {}
                RespValue::Error(e) => first_error.get_or_insert(e),
                _ => first_error.get_or_insert("ERR unexpected reply from peer".to_string()),
            };
        }
        match first_error {
            Some(e) => RespValue::Error(e),
            None => RespValue::ok(),
        }
    }

    /// MGET: one GET per key, routed independently, replies reassembled
    /// in the caller's order.
    async fn route_mget(&self, db_index: usize, keys: &[RespValue]) -> RespValue {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let peer = self.peer_for(key.as_bytes().unwrap_or(&[]));
            let cmd = [RespValue::bulk_string(Bytes::from_static(b"GET")), key.clone()];
            out.push(self.relay_or_local(&peer, db_index, &cmd).await);
        }
        RespValue::Array(out)
    }

    /// MSET: one SET per key/value pair, routed independently. Replies OK
    /// only if every pair's SET succeeds.
    async fn route_mset(&self, db_index: usize, pairs: &[RespValue]) -> RespValue {
        if pairs.is_empty() || pairs.len() % 2 != 0 {
            return RespValue::error("ERR wrong number of arguments for 'mset' command");
        }
        for chunk in pairs.chunks(2) {
            let peer = self.peer_for(chunk[0].as_bytes().unwrap_or(&[]));
            let cmd = [
                RespValue::bulk_string(Bytes::from_static(b"SET")),
                chunk[0].clone(),
                chunk[1].clone(),
            ];
            if let RespValue::Error(e) = self.relay_or_local(&peer, db_index, &cmd).await {
                return RespValue::Error(e);
            }
        }
        RespValue::ok()
    }

    /// DEL: a single key relays directly; multiple keys are grouped by
    /// owning peer and the per-peer counts summed.
    async fn route_grouped_count(&self, db_index: usize, name: &str, keys: &[RespValue]) -> RespValue {
        if keys.is_empty() {
            return RespValue::error(format!("ERR wrong number of arguments for '{}' command", name.to_lowercase()));
        }
        if keys.len() == 1 {
            let peer = self.peer_for(keys[0].as_bytes().unwrap_or(&[]));
            let cmd = [RespValue::bulk_string(Bytes::from(name.as_bytes().to_vec())), keys[0].clone()];
            return self.relay_or_local(&peer, db_index, &cmd).await;
        }

        let mut groups: std::collections::HashMap<String, Vec<RespValue>> = std::collections::HashMap::new();
        for key in keys {
            let peer = self.peer_for(key.as_bytes().unwrap_or(&[]));
            groups.entry(peer).or_default().push(key.clone());
        }

        let mut total = 0i64;
        for (peer, group_keys) in groups {
            let mut cmd = vec![RespValue::bulk_string(Bytes::from(name.as_bytes().to_vec()))];
            cmd.extend(group_keys);
            match self.relay_or_local(&peer, db_index, &cmd).await {
                RespValue::Integer(n) => total += n,
                RespValue::Error(e) => return RespValue::Error(e),
                _ => {}
            }
        }
        RespValue::Integer(total)
    }

    /// RENAME/RENAMENX: only sensible when both keys own the same node;
    /// spanning nodes would require a cross-node atomic move we don't have.
    async fn route_same_peer(&self, db_index: usize, name: &str, args: &[RespValue]) -> RespValue {
        if args.len() < 3 {
            return RespValue::error(format!("ERR wrong number of arguments for '{}' command", name.to_lowercase()));
        }
        let src = args[1].as_bytes().unwrap_or(&[]);
        let dst = args[2].as_bytes().unwrap_or(&[]);
        let src_peer = self.peer_for(src);
        let dst_peer = self.peer_for(dst);
        if src_peer != dst_peer {
            return RespValue::error("ERR source and destination keys are on different nodes");
        }
        self.relay_or_local(&src_peer, db_index, args).await
    }

    /// SUNION/SINTER/SDIFF: fan out SMEMBERS to each key's owning peer and
    /// combine the member sets locally rather than moving whole sets to one
    /// node ahead of time.
    async fn route_set_algebra(&self, db_index: usize, name: &str, keys: &[RespValue]) -> RespValue {
        if keys.is_empty() {
            return RespValue::error(format!("ERR wrong number of arguments for '{}' command", name.to_lowercase()));
        }

        let mut sets = Vec::with_capacity(keys.len());
        for key in keys {
            let peer = self.peer_for(key.as_bytes().unwrap_or(&[]));
            let cmd = [RespValue::bulk_string(Bytes::from_static(b"SMEMBERS")), key.clone()];
            match self.relay_or_local(&peer, db_index, &cmd).await {
                RespValue::Array(items) => {
                    sets.push(items.into_iter().filter_map(|v| v.as_bytes().map(Bytes::copy_from_slice)).collect::<HashSet<Bytes>>());
                }
                RespValue::Error(e) => return RespValue::Error(e),
                _ => sets.push(HashSet::new()),
            }
        }

        let combined = combine_sets(name, sets);
        RespValue::Array(combined.into_iter().map(RespValue::bulk_string).collect())
    }

    /// *STORE variants: compute the member set as above, then DEL + SADD it
    /// onto whichever peer owns the destination key.
    async fn route_set_algebra_store(&self, db_index: usize, name: &str, args: &[RespValue]) -> RespValue {
        if args.len() < 3 {
            return RespValue::error(format!("ERR wrong number of arguments for '{}' command", name.to_lowercase()));
        }
        let dest = args[1].clone();
        let base = match name {
            "SUNIONSTORE" => "SUNION",
            "SINTERSTORE" => "SINTER",
            _ => "SDIFF",
        };
        let members = match self.route_set_algebra(db_index, base, &args[2..]).await {
            RespValue::Array(items) => items,
            RespValue::Error(e) => return RespValue::Error(e),
            _ => Vec::new(),
        };

        let dest_peer = self.peer_for(dest.as_bytes().unwrap_or(&[]));
        let del_cmd = [RespValue::bulk_string(Bytes::from_static(b"DEL")), dest.clone()];
        let _ = self.relay_or_local(&dest_peer, db_index, &del_cmd).await;

        if members.is_empty() {
            return RespValue::Integer(0);
        }

        let mut sadd_cmd = vec![RespValue::bulk_string(Bytes::from_static(b"SADD")), dest];
        sadd_cmd.extend(members);
        self.relay_or_local(&dest_peer, db_index, &sadd_cmd).await
    }
}

fn combine_sets(name: &str, sets: Vec<HashSet<Bytes>>) -> HashSet<Bytes> {
    let mut iter = sets.into_iter();
    let mut acc = iter.next().unwrap_or_default();
    for s in iter {
        match name {
            "SUNION" => acc.extend(s),
            "SINTER" => acc.retain(|m| s.contains(m)),
            _ => acc.retain(|m| !s.contains(m)),
        }
    }
    acc
}

fn is_single_key_command(name: &str) -> bool {
    matches!(
        name,
        "GET" | "SET" | "SETNX" | "GETSET" | "GETDEL" | "EXISTS" | "TYPE" | "STRLEN" | "APPEND"
            | "INCR" | "INCRBY" | "DECR" | "DECRBY"
            | "LPUSH" | "RPUSH" | "LPOP" | "RPOP" | "LLEN" | "LRANGE" | "LINDEX" | "LSET"
            | "HSET" | "HSETNX" | "HGET" | "HEXISTS" | "HDEL" | "HLEN" | "HGETALL" | "HKEYS" | "HVALS" | "HMGET"
            | "SADD" | "SCARD" | "SISMEMBER" | "SMEMBERS" | "SREM" | "SPOP" | "SRANDMEMBER"
            | "ZADD" | "ZSCORE" | "ZCARD" | "ZRANGE" | "ZREM" | "ZCOUNT" | "ZRANK"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_key_commands_list_matches_read_and_write_surface() {
        for name in ["GET", "SET", "HGETALL", "SADD", "ZRANGE", "LPUSH"] {
            assert!(is_single_key_command(name));
        }
        for name in ["PING", "DEL", "RENAME", "SUNION", "FLUSHDB"] {
            assert!(!is_single_key_command(name));
        }
    }

    #[test]
    fn combine_sets_implements_union_intersect_diff() {
        let a: HashSet<Bytes> = ["a", "b", "c"].iter().map(|s| Bytes::from(s.to_string())).collect();
        let b: HashSet<Bytes> = ["b", "c", "d"].iter().map(|s| Bytes::from(s.to_string())).collect();

        let union = combine_sets("SUNION", vec![a.clone(), b.clone()]);
        assert_eq!(union.len(), 4);

        let inter = combine_sets("SINTER", vec![a.clone(), b.clone()]);
        assert_eq!(inter, ["b", "c"].iter().map(|s| Bytes::from(s.to_string())).collect());

        let diff = combine_sets("SDIFF", vec![a, b]);
        assert_eq!(diff, ["a"].iter().map(|s| Bytes::from(s.to_string())).collect());
    }
}
