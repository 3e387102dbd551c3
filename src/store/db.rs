//! A single logical database: a sharded key→Value map with a per-key lock
//! manager layered on top for the read-locked/write-locked operation
//! classes. Generalizes the teacher's `storage::engine::Shard` (a sharded
//! `RwLock<HashMap<Bytes, Entry>>`) from a single scalar `Entry` type to the
//! full polymorphic `Value`.

use super::glob::GlobPattern;
use super::locks::KeyLockManager;
use super::value::{HashValue, SetValue, Value, ZSetValue};
use bytes::Bytes;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::RwLock;

const NUM_SHARDS: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,
    #[error("ERR no such key")]
    NoSuchKey,
    #[error("ERR index out of range")]
    IndexOutOfRange,
    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,
}

pub type StoreResult<T> = Result<T, StoreError>;

struct Shard {
    data: RwLock<HashMap<Bytes, Value>>,
}

pub struct Database {
    shards: Vec<Shard>,
    locks: KeyLockManager,
}

impl Database {
    pub fn new() -> Self {
        let shards = (0..NUM_SHARDS).map(|_| Shard { data: RwLock::new(HashMap::new()) }).collect();
        Self { shards, locks: KeyLockManager::new() }
    }

    fn shard_index(&self, key: &Bytes) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % NUM_SHARDS
    }

    fn shard(&self, key: &Bytes) -> &Shard {
        &self.shards[self.shard_index(key)]
    }

    // -- lockless: single-scalar probes on the coarse map ------------------

    fn lockless_read<R>(&self, key: &Bytes, f: impl FnOnce(Option<&Value>) -> R) -> R {
        let map = self.shard(key).data.read().unwrap();
        f(map.get(key))
    }

    fn lockless_write<R>(&self, key: &Bytes, f: impl FnOnce(&mut HashMap<Bytes, Value>) -> R) -> R {
        let mut map = self.shard(key).data.write().unwrap();
        f(&mut map)
    }

    // -- read-locked: iterate/range a collection's interior -----------------

    fn read_locked<R>(&self, key: &Bytes, f: impl FnOnce(Option<&Value>) -> R) -> R {
        self.locks.with_read(key, || {
            let map = self.shard(key).data.read().unwrap();
            f(map.get(key))
        })
    }

    // -- write-locked: mutate a collection's interior ------------------------

    fn write_locked<R>(&self, key: &Bytes, f: impl FnOnce(&mut HashMap<Bytes, Value>) -> R) -> R {
        self.locks.with_write(key, || {
            let mut map = self.shard(key).data.write().unwrap();
            f(&mut map)
        })
    }

    fn remove_if_empty(&self, map: &mut HashMap<Bytes, Value>, key: &Bytes, empty: bool) {
        if empty {
            map.remove(key);
            self.locks.cleanup(key);
        }
    }

    // ---------------------------------------------------------- keyspace --

    pub fn exists(&self, key: &Bytes) -> bool {
        self.lockless_read(key, |v| v.is_some())
    }

    pub fn del(&self, keys: &[Bytes]) -> usize {
        let mut count = 0;
        for key in keys {
            let removed = self.lockless_write(key, |map| map.remove(key).is_some());
            if removed {
                self.locks.cleanup(key);
                count += 1;
            }
        }
        count
    }

    pub fn type_name(&self, key: &Bytes) -> &'static str {
        self.lockless_read(key, |v| v.map(Value::type_name).unwrap_or("none"))
    }

    pub fn rename(&self, src: &Bytes, dst: &Bytes) -> StoreResult<()> {
        let value = self.lockless_write(src, |map| map.remove(src));
        match value {
            Some(v) => {
                self.locks.cleanup(src);
                self.lockless_write(dst, |map| {
                    map.insert(dst.clone(), v);
                });
                Ok(())
            }
            None => Err(StoreError::NoSuchKey),
        }
    }

    pub fn renamenx(&self, src: &Bytes, dst: &Bytes) -> StoreResult<bool> {
        if self.exists(dst) {
            return Ok(false);
        }
        self.rename(src, dst)?;
        Ok(true)
    }

    pub fn keys(&self, pattern: &str) -> Vec<Bytes> {
        let glob = GlobPattern::new(pattern);
        let mut out = Vec::new();
        for shard in &self.shards {
            let map = shard.data.read().unwrap();
            out.extend(map.keys().filter(|k| glob.matches(k)).cloned());
        }
        out
    }

    pub fn flush(&self) {
        for shard in &self.shards {
            shard.data.write().unwrap().clear();
        }
        self.locks.clear();
    }

    // ------------------------------------------------------------ strings -

    pub fn get(&self, key: &Bytes) -> StoreResult<Option<Bytes>> {
        self.lockless_read(key, |v| match v {
            None => Ok(None),
            Some(Value::Str(b)) => Ok(Some(b.clone())),
            Some(_) => Err(StoreError::WrongType),
        })
    }

    pub fn set(&self, key: Bytes, value: Bytes) {
        self.lockless_write(&key, |map| {
            map.insert(key.clone(), Value::Str(value));
        });
    }

    /// Sets only if absent. Returns true if set.
    pub fn setnx(&self, key: Bytes, value: Bytes) -> bool {
        self.lockless_write(&key, |map| {
            if map.contains_key(&key) {
                false
            } else {
                map.insert(key.clone(), Value::Str(value));
                true
            }
        })
    }

    /// Sets and returns the previous value (wrong-type if previous was not a string).
    pub fn getset(&self, key: Bytes, value: Bytes) -> StoreResult<Option<Bytes>> {
        self.lockless_write(&key, |map| {
            let prev = match map.get(&key) {
                None => None,
                Some(Value::Str(b)) => Some(b.clone()),
                Some(_) => return Err(StoreError::WrongType),
            };
            map.insert(key.clone(), Value::Str(value));
            Ok(prev)
        })
    }

    pub fn strlen(&self, key: &Bytes) -> StoreResult<usize> {
        self.lockless_read(key, |v| match v {
            None => Ok(0),
            Some(Value::Str(b)) => Ok(b.len()),
            Some(_) => Err(StoreError::WrongType),
        })
    }

    /// Appends `suffix` to the string at `key` (treating an absent key as
    /// empty). Returns the resulting length.
    pub fn append(&self, key: &Bytes, suffix: &Bytes) -> StoreResult<usize> {
        self.lockless_write(key, |map| {
            let entry = map.entry(key.clone()).or_insert_with(|| Value::Str(Bytes::new()));
            match entry {
                Value::Str(b) => {
                    let mut buf = b.to_vec();
                    buf.extend_from_slice(suffix);
                    let len = buf.len();
                    *b = Bytes::from(buf);
                    Ok(len)
                }
                _ => Err(StoreError::WrongType),
            }
        })
    }

    /// Parses the string at `key` as a base-10 integer, adds `delta`, and
    /// stores the result. A missing key is treated as 0.
    pub fn incr_by(&self, key: &Bytes, delta: i64) -> StoreResult<i64> {
        self.lockless_write(key, |map| {
            let current = match map.get(key) {
                None => 0i64,
                Some(Value::Str(b)) => std::str::from_utf8(b).ok().and_then(|s| s.parse::<i64>().ok()).ok_or(StoreError::NotAnInteger)?,
                Some(_) => return Err(StoreError::WrongType),
            };
            let next = current.checked_add(delta).ok_or(StoreError::NotAnInteger)?;
            map.insert(key.clone(), Value::Str(Bytes::from(next.to_string())));
            Ok(next)
        })
    }

    /// Returns and deletes the string at `key` in one step.
    pub fn getdel(&self, key: &Bytes) -> StoreResult<Option<Bytes>> {
        let result = self.lockless_write(key, |map| match map.get(key) {
            None => Ok(None),
            Some(Value::Str(_)) => {
                let Some(Value::Str(b)) = map.remove(key) else { unreachable!() };
                Ok(Some(b))
            }
            Some(_) => Err(StoreError::WrongType),
        });
        if matches!(result, Ok(Some(_))) {
            self.locks.cleanup(key);
        }
        result
    }

    // -------------------------------------------------------------- lists -

    pub fn llen(&self, key: &Bytes) -> StoreResult<i64> {
        self.lockless_read(key, |v| match v {
            None => Ok(0),
            Some(Value::List(l)) => Ok(l.len() as i64),
            Some(_) => Err(StoreError::WrongType),
        })
    }

    pub fn lpush(&self, key: &Bytes, values: Vec<Bytes>) -> StoreResult<usize> {
        self.write_locked(key, |map| {
            let entry = map.entry(key.clone()).or_insert_with(|| Value::List(VecDeque::new()));
            let list = match entry {
                Value::List(l) => l,
                _ => return Err(StoreError::WrongType),
            };
            for v in values {
                list.push_front(v);
            }
            Ok(list.len())
        })
    }

    pub fn rpush(&self, key: &Bytes, values: Vec<Bytes>) -> StoreResult<usize> {
        self.write_locked(key, |map| {
            let entry = map.entry(key.clone()).or_insert_with(|| Value::List(VecDeque::new()));
            let list = match entry {
                Value::List(l) => l,
                _ => return Err(StoreError::WrongType),
            };
            for v in values {
                list.push_back(v);
            }
            Ok(list.len())
        })
    }

    pub fn lpop(&self, key: &Bytes) -> StoreResult<Option<Bytes>> {
        self.write_locked(key, |map| {
            let Some(Value::List(list)) = map.get_mut(key) else {
                return match map.get(key) {
                    Some(_) => Err(StoreError::WrongType),
                    None => Ok(None),
                };
            };
            let popped = list.pop_front();
            let empty = list.is_empty();
            self.remove_if_empty(map, key, empty);
            Ok(popped)
        })
    }

    pub fn rpop(&self, key: &Bytes) -> StoreResult<Option<Bytes>> {
        self.write_locked(key, |map| {
            let Some(Value::List(list)) = map.get_mut(key) else {
                return match map.get(key) {
                    Some(_) => Err(StoreError::WrongType),
                    None => Ok(None),
                };
            };
            let popped = list.pop_back();
            let empty = list.is_empty();
            self.remove_if_empty(map, key, empty);
            Ok(popped)
        })
    }

    pub fn lrange(&self, key: &Bytes, start: i64, stop: i64) -> StoreResult<Vec<Bytes>> {
        self.read_locked(key, |v| match v {
            None => Ok(Vec::new()),
            Some(Value::List(list)) => {
                let len = list.len() as i64;
                let (start, stop) = clamp_range(start, stop, len);
                if start > stop {
                    return Ok(Vec::new());
                }
                Ok(list.iter().skip(start as usize).take((stop - start + 1) as usize).cloned().collect())
            }
            Some(_) => Err(StoreError::WrongType),
        })
    }

    pub fn lindex(&self, key: &Bytes, index: i64) -> StoreResult<Option<Bytes>> {
        self.read_locked(key, |v| match v {
            None => Ok(None),
            Some(Value::List(list)) => {
                let len = list.len() as i64;
                let idx = if index < 0 { len + index } else { index };
                if idx < 0 || idx >= len {
                    Ok(None)
                } else {
                    Ok(list.get(idx as usize).cloned())
                }
            }
            Some(_) => Err(StoreError::WrongType),
        })
    }

    pub fn lset(&self, key: &Bytes, index: i64, value: Bytes) -> StoreResult<()> {
        self.write_locked(key, |map| match map.get_mut(key) {
            None => Err(StoreError::NoSuchKey),
            Some(Value::List(list)) => {
                let len = list.len() as i64;
                let idx = if index < 0 { len + index } else { index };
                if idx < 0 || idx >= len {
                    return Err(StoreError::IndexOutOfRange);
                }
                list[idx as usize] = value;
                Ok(())
            }
            Some(_) => Err(StoreError::WrongType),
        })
    }

    // -------------------------------------------------------------- hashes -

    pub fn hget(&self, key: &Bytes, field: &[u8]) -> StoreResult<Option<Bytes>> {
        self.lockless_read(key, |v| match v {
            None => Ok(None),
            Some(Value::Hash(h)) => Ok(h.get(field)),
            Some(_) => Err(StoreError::WrongType),
        })
    }

    pub fn hexists(&self, key: &Bytes, field: &[u8]) -> StoreResult<bool> {
        self.lockless_read(key, |v| match v {
            None => Ok(false),
            Some(Value::Hash(h)) => Ok(h.contains(field)),
            Some(_) => Err(StoreError::WrongType),
        })
    }

    pub fn hlen(&self, key: &Bytes) -> StoreResult<i64> {
        self.lockless_read(key, |v| match v {
            None => Ok(0),
            Some(Value::Hash(h)) => Ok(h.len() as i64),
            Some(_) => Err(StoreError::WrongType),
        })
    }

    pub fn hset(&self, key: &Bytes, field: Bytes, value: Bytes) -> StoreResult<bool> {
        self.write_locked(key, |map| {
            let entry = map.entry(key.clone()).or_insert_with(|| Value::Hash(HashValue::new()));
            match entry {
                Value::Hash(h) => Ok(h.set(field, value)),
                _ => Err(StoreError::WrongType),
            }
        })
    }

    pub fn hsetnx(&self, key: &Bytes, field: Bytes, value: Bytes) -> StoreResult<bool> {
        self.write_locked(key, |map| {
            let entry = map.entry(key.clone()).or_insert_with(|| Value::Hash(HashValue::new()));
            match entry {
                Value::Hash(h) => {
                    if h.contains(&field) {
                        Ok(false)
                    } else {
                        h.set(field, value);
                        Ok(true)
                    }
                }
                _ => Err(StoreError::WrongType),
            }
        })
    }

    pub fn hdel(&self, key: &Bytes, fields: &[Bytes]) -> StoreResult<usize> {
        self.write_locked(key, |map| {
            let Some(Value::Hash(h)) = map.get_mut(key) else {
                return match map.get(key) {
                    Some(_) => Err(StoreError::WrongType),
                    None => Ok(0),
                };
            };
            let mut count = 0;
            for f in fields {
                if h.remove(f) {
                    count += 1;
                }
            }
            let empty = h.is_empty();
            self.remove_if_empty(map, key, empty);
            Ok(count)
        })
    }

    pub fn hgetall(&self, key: &Bytes) -> StoreResult<Vec<(Bytes, Bytes)>> {
        self.read_locked(key, |v| match v {
            None => Ok(Vec::new()),
            Some(Value::Hash(h)) => Ok(h.entries()),
            Some(_) => Err(StoreError::WrongType),
        })
    }

    pub fn hkeys(&self, key: &Bytes) -> StoreResult<Vec<Bytes>> {
        self.hgetall(key).map(|e| e.into_iter().map(|(k, _)| k).collect())
    }

    pub fn hvals(&self, key: &Bytes) -> StoreResult<Vec<Bytes>> {
        self.hgetall(key).map(|e| e.into_iter().map(|(_, v)| v).collect())
    }

    pub fn hmget(&self, key: &Bytes, fields: &[Bytes]) -> StoreResult<Vec<Option<Bytes>>> {
        self.read_locked(key, |v| match v {
            None => Ok(fields.iter().map(|_| None).collect()),
            Some(Value::Hash(h)) => Ok(fields.iter().map(|f| h.get(f)).collect()),
            Some(_) => Err(StoreError::WrongType),
        })
    }

    // ---------------------------------------------------------------- sets -

    pub fn scard(&self, key: &Bytes) -> StoreResult<i64> {
        self.lockless_read(key, |v| match v {
            None => Ok(0),
            Some(Value::Set(s)) => Ok(s.len() as i64),
            Some(_) => Err(StoreError::WrongType),
        })
    }

    pub fn sismember(&self, key: &Bytes, member: &[u8]) -> StoreResult<bool> {
        self.lockless_read(key, |v| match v {
            None => Ok(false),
            Some(Value::Set(s)) => Ok(s.contains(member)),
            Some(_) => Err(StoreError::WrongType),
        })
    }

    pub fn sadd(&self, key: &Bytes, members: Vec<Bytes>) -> StoreResult<usize> {
        self.write_locked(key, |map| {
            let entry = map.entry(key.clone()).or_insert_with(|| Value::Set(SetValue::new()));
            match entry {
                Value::Set(s) => Ok(members.into_iter().filter(|m| s.insert(m.clone())).count()),
                _ => Err(StoreError::WrongType),
            }
        })
    }

    pub fn srem(&self, key: &Bytes, members: &[Bytes]) -> StoreResult<usize> {
        self.write_locked(key, |map| {
            let Some(Value::Set(s)) = map.get_mut(key) else {
                return match map.get(key) {
                    Some(_) => Err(StoreError::WrongType),
                    None => Ok(0),
                };
            };
            let count = members.iter().filter(|m| s.remove(m)).count();
            let empty = s.is_empty();
            self.remove_if_empty(map, key, empty);
            Ok(count)
        })
    }

    pub fn smembers(&self, key: &Bytes) -> StoreResult<Vec<Bytes>> {
        self.read_locked(key, |v| match v {
            None => Ok(Vec::new()),
            Some(Value::Set(s)) => Ok(s.members()),
            Some(_) => Err(StoreError::WrongType),
        })
    }

    /// Random removal. `count = None` removes and returns exactly one member (or none).
    pub fn spop(&self, key: &Bytes, count: Option<usize>) -> StoreResult<Vec<Bytes>> {
        self.write_locked(key, |map| {
            let Some(Value::Set(s)) = map.get_mut(key) else {
                return match map.get(key) {
                    Some(_) => Err(StoreError::WrongType),
                    None => Ok(Vec::new()),
                };
            };
            let n = count.unwrap_or(1).min(s.len());
            let mut members = s.members();
            shuffle(&mut members);
            members.truncate(n);
            for m in &members {
                s.remove(m);
            }
            let empty = s.is_empty();
            self.remove_if_empty(map, key, empty);
            Ok(members)
        })
    }

    /// Sampling. Positive count: up to `count` distinct members. Negative
    /// count: `-count` samples with replacement. `None`: exactly one member.
    pub fn srandmember(&self, key: &Bytes, count: Option<i64>) -> StoreResult<Vec<Bytes>> {
        self.read_locked(key, |v| {
            let members = match v {
                None => return Ok(Vec::new()),
                Some(Value::Set(s)) => s.members(),
                Some(_) => return Err(StoreError::WrongType),
            };
            if members.is_empty() {
                return Ok(Vec::new());
            }
            match count {
                None => {
                    let idx = rand::random::<usize>() % members.len();
                    Ok(vec![members[idx].clone()])
                }
                Some(n) if n >= 0 => {
                    let mut pool = members;
                    shuffle(&mut pool);
                    pool.truncate(n as usize);
                    Ok(pool)
                }
                Some(n) => {
                    let draws = (-n) as usize;
                    Ok((0..draws).map(|_| members[rand::random::<usize>() % members.len()].clone()).collect())
                }
            }
        })
    }

    pub fn sunion(&self, keys: &[Bytes]) -> StoreResult<HashSet<Bytes>> {
        self.set_algebra(keys, |acc, members| acc.extend(members))
    }

    pub fn sinter(&self, keys: &[Bytes]) -> StoreResult<HashSet<Bytes>> {
        let mut sets = Vec::with_capacity(keys.len());
        for k in keys {
            sets.push(self.smembers_typed(k)?);
        }
        let mut iter = sets.into_iter();
        let mut result = iter.next().unwrap_or_default();
        for s in iter {
            result.retain(|m| s.contains(m));
        }
        Ok(result)
    }

    pub fn sdiff(&self, keys: &[Bytes]) -> StoreResult<HashSet<Bytes>> {
        let mut sets = Vec::with_capacity(keys.len());
        for k in keys {
            sets.push(self.smembers_typed(k)?);
        }
        let mut iter = sets.into_iter();
        let mut result = iter.next().unwrap_or_default();
        for s in iter {
            result.retain(|m| !s.contains(m));
        }
        Ok(result)
    }

    fn set_algebra(
        &self,
        keys: &[Bytes],
        fold: impl Fn(&mut HashSet<Bytes>, HashSet<Bytes>),
    ) -> StoreResult<HashSet<Bytes>> {
        let mut result = HashSet::new();
        for k in keys {
            let members = self.smembers_typed(k)?;
            fold(&mut result, members);
        }
        Ok(result)
    }

    fn smembers_typed(&self, key: &Bytes) -> StoreResult<HashSet<Bytes>> {
        Ok(self.smembers(key)?.into_iter().collect())
    }

    /// Replaces `dest` with the given member set (used by *STORE variants).
    /// Returns the resulting cardinality.
    pub fn store_set(&self, dest: &Bytes, members: HashSet<Bytes>) -> StoreResult<usize> {
        self.del(std::slice::from_ref(dest));
        if members.is_empty() {
            return Ok(0);
        }
        self.sadd(dest, members.into_iter().collect())
    }

    // ----------------------------------------------------------- sorted sets

    pub fn zscore(&self, key: &Bytes, member: &[u8]) -> StoreResult<Option<f64>> {
        self.lockless_read(key, |v| match v {
            None => Ok(None),
            Some(Value::ZSet(z)) => Ok(z.score(member)),
            Some(_) => Err(StoreError::WrongType),
        })
    }

    pub fn zcard(&self, key: &Bytes) -> StoreResult<i64> {
        self.lockless_read(key, |v| match v {
            None => Ok(0),
            Some(Value::ZSet(z)) => Ok(z.len() as i64),
            Some(_) => Err(StoreError::WrongType),
        })
    }

    pub fn zadd(&self, key: &Bytes, pairs: Vec<(f64, Bytes)>) -> StoreResult<usize> {
        self.write_locked(key, |map| {
            let entry = map.entry(key.clone()).or_insert_with(|| Value::ZSet(ZSetValue::new()));
            match entry {
                Value::ZSet(z) => Ok(pairs.into_iter().filter(|(score, member)| z.insert(member.clone(), *score)).count()),
                _ => Err(StoreError::WrongType),
            }
        })
    }

    pub fn zrem(&self, key: &Bytes, members: &[Bytes]) -> StoreResult<usize> {
        self.write_locked(key, |map| {
            let Some(Value::ZSet(z)) = map.get_mut(key) else {
                return match map.get(key) {
                    Some(_) => Err(StoreError::WrongType),
                    None => Ok(0),
                };
            };
            let count = members.iter().filter(|m| z.remove(m)).count();
            let empty = z.is_empty();
            self.remove_if_empty(map, key, empty);
            Ok(count)
        })
    }

    pub fn zrange(&self, key: &Bytes, start: i64, stop: i64) -> StoreResult<Vec<(Bytes, f64)>> {
        self.read_locked(key, |v| match v {
            None => Ok(Vec::new()),
            Some(Value::ZSet(z)) => {
                let all = z.range();
                let len = all.len() as i64;
                let (start, stop) = clamp_range(start, stop, len);
                if start > stop {
                    return Ok(Vec::new());
                }
                Ok(all.into_iter().skip(start as usize).take((stop - start + 1) as usize).collect())
            }
            Some(_) => Err(StoreError::WrongType),
        })
    }

    pub fn zcount(&self, key: &Bytes, min: f64, max: f64) -> StoreResult<usize> {
        self.read_locked(key, |v| match v {
            None => Ok(0),
            Some(Value::ZSet(z)) => Ok(z.count_in_range(min, max)),
            Some(_) => Err(StoreError::WrongType),
        })
    }

    pub fn zrank(&self, key: &Bytes, member: &[u8]) -> StoreResult<Option<usize>> {
        self.read_locked(key, |v| match v {
            None => Ok(None),
            Some(Value::ZSet(z)) => Ok(z.rank(member)),
            Some(_) => Err(StoreError::WrongType),
        })
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

fn clamp_range(start: i64, stop: i64, len: i64) -> (i64, i64) {
    let norm = |i: i64| -> i64 {
        if i < 0 {
            (len + i).max(0)
        } else {
            i
        }
    };
    let start = norm(start).min(len);
    let stop = norm(stop).min(len - 1);
    (start, stop)
}

fn shuffle(items: &mut [Bytes]) {
    for i in (1..items.len()).rev() {
        let j = rand::random::<usize>() % (i + 1);
        items.swap(i, j);
    }
}

/// The full server: a fixed number of logical databases.
pub struct StorageEngine {
    databases: Vec<Database>,
}

impl StorageEngine {
    pub fn new(num_databases: usize) -> Self {
        Self { databases: (0..num_databases).map(|_| Database::new()).collect() }
    }

    pub fn num_databases(&self) -> usize {
        self.databases.len()
    }

    pub fn db(&self, index: usize) -> &Database {
        &self.databases[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_roundtrip() {
        let db = Database::new();
        db.set(Bytes::from("k"), Bytes::from("v"));
        assert_eq!(db.get(&Bytes::from("k")).unwrap(), Some(Bytes::from("v")));
    }

    #[test]
    fn wrong_type_on_mismatched_variant() {
        let db = Database::new();
        let key = Bytes::from("k");
        db.lpush(&key, vec![Bytes::from("a")]).unwrap();
        assert!(matches!(db.get(&key), Err(StoreError::WrongType)));
    }

    #[test]
    fn collection_deleted_when_emptied() {
        let db = Database::new();
        let key = Bytes::from("h");
        db.hset(&key, Bytes::from("f"), Bytes::from("v")).unwrap();
        assert!(db.exists(&key));
        db.hdel(&key, &[Bytes::from("f")]).unwrap();
        assert!(!db.exists(&key));
    }

    #[test]
    fn list_push_pop_and_range() {
        let db = Database::new();
        let key = Bytes::from("l");
        db.rpush(&key, vec![Bytes::from("a"), Bytes::from("b"), Bytes::from("c")]).unwrap();
        assert_eq!(db.lrange(&key, 0, -1).unwrap(), vec![Bytes::from("a"), Bytes::from("b"), Bytes::from("c")]);
        assert_eq!(db.lpop(&key).unwrap(), Some(Bytes::from("a")));
        assert_eq!(db.llen(&key).unwrap(), 2);
    }

    #[test]
    fn lrange_start_after_stop_is_empty() {
        let db = Database::new();
        let key = Bytes::from("l");
        db.rpush(&key, vec![Bytes::from("a"), Bytes::from("b")]).unwrap();
        assert_eq!(db.lrange(&key, 1, 0).unwrap(), Vec::<Bytes>::new());
    }

    #[test]
    fn rename_moves_value_and_deletes_source() {
        let db = Database::new();
        db.set(Bytes::from("a"), Bytes::from("1"));
        db.rename(&Bytes::from("a"), &Bytes::from("b")).unwrap();
        assert!(!db.exists(&Bytes::from("a")));
        assert_eq!(db.get(&Bytes::from("b")).unwrap(), Some(Bytes::from("1")));
    }

    #[test]
    fn rename_missing_source_errors() {
        let db = Database::new();
        assert!(matches!(db.rename(&Bytes::from("missing"), &Bytes::from("b")), Err(StoreError::NoSuchKey)));
    }

    #[test]
    fn renamenx_refuses_existing_destination() {
        let db = Database::new();
        db.set(Bytes::from("a"), Bytes::from("1"));
        db.set(Bytes::from("b"), Bytes::from("2"));
        assert_eq!(db.renamenx(&Bytes::from("a"), &Bytes::from("b")).unwrap(), false);
    }

    #[test]
    fn keys_glob_filters() {
        let db = Database::new();
        db.set(Bytes::from("user:1"), Bytes::from("a"));
        db.set(Bytes::from("user:2"), Bytes::from("b"));
        db.set(Bytes::from("session:1"), Bytes::from("c"));
        let mut matched = db.keys("user:*");
        matched.sort();
        assert_eq!(matched, vec![Bytes::from("user:1"), Bytes::from("user:2")]);
    }

    #[test]
    fn flush_clears_everything() {
        let db = Database::new();
        db.set(Bytes::from("a"), Bytes::from("1"));
        db.flush();
        assert_eq!(db.keys("*").len(), 0);
    }

    #[test]
    fn concurrent_mixed_ops_on_shared_keyspace() {
        use std::sync::Arc;
        use std::thread;

        let db = Arc::new(Database::new());
        let mut handles = Vec::new();
        for t in 0..8 {
            let db = Arc::clone(&db);
            handles.push(thread::spawn(move || {
                for i in 0..200 {
                    let key = Bytes::from(format!("k{}", i % 16));
                    match i % 4 {
                        0 => db.set(key.clone(), Bytes::from(format!("{}:{}", t, i))),
                        1 => {
                            let _ = db.get(&key);
                        }
                        2 => {
                            let _ = db.sadd(&Bytes::from("shared-set"), vec![Bytes::from(format!("{}", t))]);
                        }
                        _ => {
                            let _ = db.scard(&Bytes::from("shared-set"));
                        }
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn incr_by_parses_missing_key_as_zero() {
        let db = Database::new();
        let key = Bytes::from("counter");
        assert_eq!(db.incr_by(&key, 5).unwrap(), 5);
        assert_eq!(db.incr_by(&key, -2).unwrap(), 3);
    }

    #[test]
    fn incr_by_rejects_non_integer_string() {
        let db = Database::new();
        let key = Bytes::from("word");
        db.set(key.clone(), Bytes::from("abc"));
        assert!(matches!(db.incr_by(&key, 1), Err(StoreError::NotAnInteger)));
    }

    #[test]
    fn append_extends_or_creates_string() {
        let db = Database::new();
        let key = Bytes::from("s");
        assert_eq!(db.append(&key, &Bytes::from("Hello")).unwrap(), 5);
        assert_eq!(db.append(&key, &Bytes::from(" World")).unwrap(), 11);
        assert_eq!(db.get(&key).unwrap(), Some(Bytes::from("Hello World")));
    }

    #[test]
    fn getdel_removes_and_returns_value() {
        let db = Database::new();
        let key = Bytes::from("s");
        db.set(key.clone(), Bytes::from("v"));
        assert_eq!(db.getdel(&key).unwrap(), Some(Bytes::from("v")));
        assert!(!db.exists(&key));
        assert_eq!(db.getdel(&key).unwrap(), None);
    }

    #[test]
    fn zadd_zrange_withscores_order() {
        let db = Database::new();
        let key = Bytes::from("z");
        db.zadd(&key, vec![(1.0, Bytes::from("one")), (2.0, Bytes::from("two")), (3.0, Bytes::from("three"))]).unwrap();
        assert_eq!(
            db.zrange(&key, 0, -1).unwrap(),
            vec![(Bytes::from("one"), 1.0), (Bytes::from("two"), 2.0), (Bytes::from("three"), 3.0)]
        );
    }
}
