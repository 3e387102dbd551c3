//! The polymorphic value stored under a key, and its dual-encoding variants.
//!
//! Each collection variant (Hash, Set, SortedSet) starts in a compact
//! encoding optimized for small sizes and auto-upgrades to a scalable
//! encoding once a threshold is crossed. Downgrade never happens. List has a
//! single encoding; String is a raw byte sequence.

use bytes::Bytes;
use ordered_float::OrderedFloat;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

pub const HASH_MAX_COMPACT_ENTRIES: usize = 512;
pub const HASH_MAX_COMPACT_FIELD_LEN: usize = 64;
pub const SET_MAX_COMPACT_ENTRIES: usize = 512;
pub const ZSET_MAX_COMPACT_ENTRIES: usize = 128;

/// The tagged union stored under a key. A key's variant is immutable across
/// its lifetime; callers must delete before reinserting as a different
/// variant (enforced one level up, in `store::db`).
#[derive(Debug, Clone)]
pub enum Value {
    Str(Bytes),
    List(VecDeque<Bytes>),
    Hash(HashValue),
    Set(SetValue),
    ZSet(ZSetValue),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Hash(_) => "hash",
            Value::Set(_) => "set",
            Value::ZSet(_) => "zset",
        }
    }
}

fn parse_int(b: &[u8]) -> Option<i64> {
    std::str::from_utf8(b).ok()?.parse::<i64>().ok()
}

// ---------------------------------------------------------------- Hash ----

#[derive(Debug, Clone)]
pub enum HashValue {
    Compact(Vec<(Bytes, Bytes)>),
    Scalable(HashMap<Bytes, Bytes>),
}

impl HashValue {
    pub fn new() -> Self {
        HashValue::Compact(Vec::new())
    }

    pub fn len(&self) -> usize {
        match self {
            HashValue::Compact(v) => v.len(),
            HashValue::Scalable(m) => m.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, field: &[u8]) -> Option<Bytes> {
        match self {
            HashValue::Compact(v) => v.iter().find(|(f, _)| f.as_ref() == field).map(|(_, v)| v.clone()),
            HashValue::Scalable(m) => m.get(field).cloned(),
        }
    }

    pub fn contains(&self, field: &[u8]) -> bool {
        match self {
            HashValue::Compact(v) => v.iter().any(|(f, _)| f.as_ref() == field),
            HashValue::Scalable(m) => m.contains_key(field),
        }
    }

    /// Inserts or overwrites a field. Returns true if the field is new.
    pub fn set(&mut self, field: Bytes, value: Bytes) -> bool {
        if matches!(self, HashValue::Compact(_)) && oversized(&field, &value) {
            self.upgrade();
        }
        let is_new = match self {
            HashValue::Compact(v) => {
                if let Some(entry) = v.iter_mut().find(|(f, _)| *f == field) {
                    entry.1 = value;
                    false
                } else {
                    v.push((field, value));
                    true
                }
            }
            HashValue::Scalable(m) => m.insert(field, value).is_none(),
        };
        if let HashValue::Compact(v) = self {
            if v.len() > HASH_MAX_COMPACT_ENTRIES {
                self.upgrade();
            }
        }
        is_new
    }

    pub fn remove(&mut self, field: &[u8]) -> bool {
        match self {
            HashValue::Compact(v) => {
                let before = v.len();
                v.retain(|(f, _)| f.as_ref() != field);
                v.len() != before
            }
            HashValue::Scalable(m) => m.remove(field).is_some(),
        }
    }

    pub fn entries(&self) -> Vec<(Bytes, Bytes)> {
        match self {
            HashValue::Compact(v) => v.clone(),
            HashValue::Scalable(m) => m.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }

    pub fn encoding(&self) -> &'static str {
        match self {
            HashValue::Compact(_) => "compact",
            HashValue::Scalable(_) => "scalable",
        }
    }

    fn upgrade(&mut self) {
        if let HashValue::Compact(v) = self {
            let map: HashMap<Bytes, Bytes> = v.drain(..).collect();
            *self = HashValue::Scalable(map);
        }
    }
}

fn oversized(field: &Bytes, value: &Bytes) -> bool {
    field.len() > HASH_MAX_COMPACT_FIELD_LEN || value.len() > HASH_MAX_COMPACT_FIELD_LEN
}

impl Default for HashValue {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------- Set ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum IntWidth {
    W16,
    W32,
    W64,
}

impl IntWidth {
    fn required_for(n: i64) -> IntWidth {
        if n >= i16::MIN as i64 && n <= i16::MAX as i64 {
            IntWidth::W16
        } else if n >= i32::MIN as i64 && n <= i32::MAX as i64 {
            IntWidth::W32
        } else {
            IntWidth::W64
        }
    }
}

#[derive(Debug, Clone)]
pub struct IntSet {
    width: IntWidth,
    items: Vec<i64>,
}

impl IntSet {
    fn new() -> Self {
        Self {
            width: IntWidth::W16,
            items: Vec::new(),
        }
    }

    fn insert(&mut self, n: i64) -> bool {
        let needed = IntWidth::required_for(n);
        if needed > self.width {
            self.width = needed;
        }
        match self.items.binary_search(&n) {
            Ok(_) => false,
            Err(pos) => {
                self.items.insert(pos, n);
                true
            }
        }
    }

    fn remove(&mut self, n: i64) -> bool {
        match self.items.binary_search(&n) {
            Ok(pos) => {
                self.items.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    fn contains(&self, n: i64) -> bool {
        self.items.binary_search(&n).is_ok()
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    #[cfg(test)]
    fn width_bits(&self) -> u8 {
        match self.width {
            IntWidth::W16 => 16,
            IntWidth::W32 => 32,
            IntWidth::W64 => 64,
        }
    }

    fn iter_bytes(&self) -> impl Iterator<Item = Bytes> + '_ {
        self.items.iter().map(|n| Bytes::from(n.to_string()))
    }
}

#[derive(Debug, Clone)]
pub enum SetValue {
    IntSet(IntSet),
    Hash(HashSet<Bytes>),
}

impl SetValue {
    pub fn new() -> Self {
        SetValue::IntSet(IntSet::new())
    }

    pub fn len(&self) -> usize {
        match self {
            SetValue::IntSet(s) => s.len(),
            SetValue::Hash(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, member: &[u8]) -> bool {
        match self {
            SetValue::IntSet(s) => parse_int(member).map(|n| s.contains(n)).unwrap_or(false),
            SetValue::Hash(s) => s.contains(member),
        }
    }

    pub fn members(&self) -> Vec<Bytes> {
        match self {
            SetValue::IntSet(s) => s.iter_bytes().collect(),
            SetValue::Hash(s) => s.iter().cloned().collect(),
        }
    }

    /// Returns true if the member was newly added.
    pub fn insert(&mut self, member: Bytes) -> bool {
        if let SetValue::IntSet(s) = self {
            if let Some(n) = parse_int(&member) {
                let added = s.insert(n);
                if added && s.len() > SET_MAX_COMPACT_ENTRIES {
                    self.upgrade();
                }
                return added;
            }
            self.upgrade();
        }
        match self {
            SetValue::Hash(s) => s.insert(member),
            SetValue::IntSet(_) => unreachable!("upgraded above"),
        }
    }

    pub fn remove(&mut self, member: &[u8]) -> bool {
        match self {
            SetValue::IntSet(s) => parse_int(member).map(|n| s.remove(n)).unwrap_or(false),
            SetValue::Hash(s) => s.remove(member),
        }
    }

    pub fn encoding(&self) -> &'static str {
        match self {
            SetValue::IntSet(_) => "compact",
            SetValue::Hash(_) => "scalable",
        }
    }

    fn upgrade(&mut self) {
        if let SetValue::IntSet(s) = self {
            let members: HashSet<Bytes> = s.iter_bytes().collect();
            *self = SetValue::Hash(members);
        }
    }
}

impl Default for SetValue {
    fn default() -> Self {
        Self::new()
    }
}

// -------------------------------------------------------------- SortedSet -

#[derive(Debug, Clone)]
pub enum ZSetValue {
    Compact(Vec<(Bytes, f64)>),
    Scalable {
        ordered: BTreeSet<(OrderedFloat<f64>, Bytes)>,
        scores: HashMap<Bytes, f64>,
    },
}

impl ZSetValue {
    pub fn new() -> Self {
        ZSetValue::Compact(Vec::new())
    }

    pub fn len(&self) -> usize {
        match self {
            ZSetValue::Compact(v) => v.len(),
            ZSetValue::Scalable { scores, .. } => scores.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        match self {
            ZSetValue::Compact(v) => v.iter().find(|(m, _)| m.as_ref() == member).map(|(_, s)| *s),
            ZSetValue::Scalable { scores, .. } => scores.get(member).copied(),
        }
    }

    /// Inserts or updates a member's score. Returns true if newly added.
    pub fn insert(&mut self, member: Bytes, score: f64) -> bool {
        let is_new = match self {
            ZSetValue::Compact(v) => {
                if let Some(pos) = v.iter().position(|(m, _)| *m == member) {
                    v.remove(pos);
                    Self::compact_insert_sorted(v, member, score);
                    false
                } else {
                    Self::compact_insert_sorted(v, member, score);
                    true
                }
            }
            ZSetValue::Scalable { ordered, scores } => {
                if let Some(&old) = scores.get(&member) {
                    ordered.remove(&(OrderedFloat(old), member.clone()));
                    ordered.insert((OrderedFloat(score), member.clone()));
                    scores.insert(member, score);
                    false
                } else {
                    ordered.insert((OrderedFloat(score), member.clone()));
                    scores.insert(member, score);
                    true
                }
            }
        };
        if let ZSetValue::Compact(v) = self {
            if v.len() > ZSET_MAX_COMPACT_ENTRIES {
                self.upgrade();
            }
        }
        is_new
    }

    fn compact_insert_sorted(v: &mut Vec<(Bytes, f64)>, member: Bytes, score: f64) {
        let pos = v.partition_point(|(m, s)| (*s, m.as_ref()) < (score, member.as_ref()));
        v.insert(pos, (member, score));
    }

    pub fn remove(&mut self, member: &[u8]) -> bool {
        match self {
            ZSetValue::Compact(v) => {
                let before = v.len();
                v.retain(|(m, _)| m.as_ref() != member);
                v.len() != before
            }
            ZSetValue::Scalable { ordered, scores } => {
                if let Some(old) = scores.remove(member) {
                    ordered.remove(&(OrderedFloat(old), Bytes::copy_from_slice(member)));
                    true
                } else {
                    false
                }
            }
        }
    }

    /// All (member, score) pairs in ascending (score, member) order.
    pub fn range(&self) -> Vec<(Bytes, f64)> {
        match self {
            ZSetValue::Compact(v) => v.clone(),
            ZSetValue::Scalable { ordered, .. } => ordered.iter().map(|(s, m)| (m.clone(), s.0)).collect(),
        }
    }

    pub fn rank(&self, member: &[u8]) -> Option<usize> {
        self.range().iter().position(|(m, _)| m.as_ref() == member)
    }

    pub fn count_in_range(&self, min: f64, max: f64) -> usize {
        self.range().iter().filter(|(_, s)| *s >= min && *s <= max).count()
    }

    pub fn encoding(&self) -> &'static str {
        match self {
            ZSetValue::Compact(_) => "compact",
            ZSetValue::Scalable { .. } => "scalable",
        }
    }

    fn upgrade(&mut self) {
        if let ZSetValue::Compact(v) = self {
            let mut ordered = BTreeSet::new();
            let mut scores = HashMap::new();
            for (m, s) in v.drain(..) {
                ordered.insert((OrderedFloat(s), m.clone()));
                scores.insert(m, s);
            }
            *self = ZSetValue::Scalable { ordered, scores };
        }
    }
}

impl Default for ZSetValue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_upgrades_past_entry_threshold() {
        let mut h = HashValue::new();
        for i in 0..HASH_MAX_COMPACT_ENTRIES {
            h.set(Bytes::from(format!("f{}", i)), Bytes::from("v"));
        }
        assert_eq!(h.encoding(), "compact");
        h.set(Bytes::from("one-more"), Bytes::from("v"));
        assert_eq!(h.encoding(), "scalable");
        assert_eq!(h.len(), HASH_MAX_COMPACT_ENTRIES + 1);
        for i in 0..HASH_MAX_COMPACT_ENTRIES {
            assert!(h.contains(format!("f{}", i).as_bytes()));
        }
    }

    #[test]
    fn hash_upgrades_on_oversized_value() {
        let mut h = HashValue::new();
        h.set(Bytes::from("f"), Bytes::from("x".repeat(65)));
        assert_eq!(h.encoding(), "scalable");
    }

    #[test]
    fn hash_set_existing_field_returns_false() {
        let mut h = HashValue::new();
        assert!(h.set(Bytes::from("f"), Bytes::from("a")));
        assert!(!h.set(Bytes::from("f"), Bytes::from("b")));
        assert_eq!(h.get(b"f"), Some(Bytes::from("b")));
    }

    #[test]
    fn intset_widens_on_large_value() {
        let mut s = SetValue::new();
        s.insert(Bytes::from("1"));
        s.insert(Bytes::from("2"));
        if let SetValue::IntSet(is) = &s {
            assert_eq!(is.width_bits(), 16);
        } else {
            panic!("expected intset encoding");
        }
        s.insert(Bytes::from((1i64 << 31).to_string()));
        if let SetValue::IntSet(is) = &s {
            assert_eq!(is.width_bits(), 64);
            assert!(is.contains(1));
            assert!(is.contains(2));
        } else {
            panic!("expected intset encoding to remain compact");
        }
    }

    #[test]
    fn set_upgrades_on_non_integer_member() {
        let mut s = SetValue::new();
        s.insert(Bytes::from("1"));
        s.insert(Bytes::from("2"));
        s.insert(Bytes::from("3"));
        assert_eq!(s.encoding(), "compact");
        s.insert(Bytes::from("abc"));
        assert_eq!(s.encoding(), "scalable");
        assert_eq!(s.len(), 4);
        let members: HashSet<Bytes> = s.members().into_iter().collect();
        assert_eq!(
            members,
            HashSet::from([Bytes::from("1"), Bytes::from("2"), Bytes::from("3"), Bytes::from("abc")])
        );
    }

    #[test]
    fn zset_orders_by_score_then_member() {
        let mut z = ZSetValue::new();
        z.insert(Bytes::from("two"), 2.0);
        z.insert(Bytes::from("one"), 1.0);
        z.insert(Bytes::from("three"), 3.0);
        assert_eq!(
            z.range(),
            vec![
                (Bytes::from("one"), 1.0),
                (Bytes::from("two"), 2.0),
                (Bytes::from("three"), 3.0),
            ]
        );
        assert_eq!(z.rank(b"two"), Some(1));
    }

    #[test]
    fn zset_upgrades_past_threshold_and_stays_consistent() {
        let mut z = ZSetValue::new();
        for i in 0..ZSET_MAX_COMPACT_ENTRIES {
            z.insert(Bytes::from(format!("m{}", i)), i as f64);
        }
        assert_eq!(z.encoding(), "compact");
        z.insert(Bytes::from("last"), 9999.0);
        assert_eq!(z.encoding(), "scalable");
        for i in 0..ZSET_MAX_COMPACT_ENTRIES {
            assert_eq!(z.score(format!("m{}", i).as_bytes()), Some(i as f64));
        }
        assert_eq!(z.score(b"last"), Some(9999.0));
    }

    #[test]
    fn zset_update_score_moves_member_and_removes_stale_entry() {
        let mut z = ZSetValue::new();
        z.insert(Bytes::from("m"), 1.0);
        assert!(!z.insert(Bytes::from("m"), 5.0));
        assert_eq!(z.score(b"m"), Some(5.0));
        assert_eq!(z.len(), 1);
    }
}
