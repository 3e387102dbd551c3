//! Consistent-hash peer picker.
//!
//! Each node is placed on a ring at `crc32(address)`. `pick(key)` finds the
//! first ring position at or after `crc32(key)`, wrapping to the lowest
//! position if none exists past it. `crc32fast` is a real, widely-used
//! implementation of the IEEE CRC-32 checksum this calls for.

use std::collections::BTreeMap;

pub fn hash32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

#[derive(Debug, Clone)]
pub struct HashRing {
    ring: BTreeMap<u32, String>,
}

impl HashRing {
    pub fn new(nodes: impl IntoIterator<Item = String>) -> Self {
        let mut ring = BTreeMap::new();
        for node in nodes {
            ring.insert(hash32(node.as_bytes()), node);
        }
        Self { ring }
    }

    pub fn pick(&self, key: &[u8]) -> Option<&str> {
        if self.ring.is_empty() {
            return None;
        }
        let h = hash32(key);
        self.ring
            .range(h..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, addr)| addr.as_str())
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.ring.values().map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_a_node_for_every_key() {
        let ring = HashRing::new(["a:1".to_string(), "b:2".to_string(), "c:3".to_string()]);
        for key in ["k1", "k2", "hello", "", "a-very-long-key-name-indeed"] {
            assert!(ring.pick(key.as_bytes()).is_some());
        }
    }

    #[test]
    fn same_key_always_maps_to_same_node() {
        let ring = HashRing::new(["a:1".to_string(), "b:2".to_string(), "c:3".to_string()]);
        let first = ring.pick(b"stable-key").unwrap().to_string();
        for _ in 0..10 {
            assert_eq!(ring.pick(b"stable-key").unwrap(), first);
        }
    }

    #[test]
    fn empty_ring_picks_nothing() {
        let ring = HashRing::new(Vec::<String>::new());
        assert!(ring.pick(b"anything").is_none());
    }

    #[test]
    fn wraps_around_to_lowest_position() {
        // A single node's hash may sit below many keys' hashes; those keys
        // must still resolve by wrapping, not by returning None.
        let ring = HashRing::new(["only-node".to_string()]);
        for key in ["a", "b", "zzz", "123"] {
            assert_eq!(ring.pick(key.as_bytes()), Some("only-node"));
        }
    }
}
