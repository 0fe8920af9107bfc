// src/primitives/shard.rs
//! Consistent-hash shard assignment
//!
//! Each shard owns [`VNODES_PER_SHARD`] points on a 64-bit ring; a key maps
//! to the owner of the first point at or after its own hash. Hashes are
//! SHA-256 prefixes, so assignments are identical across processes and
//! releases. Adding or removing one shard only moves the keys whose nearest
//! point belonged to (or now belongs to) that shard.

use crate::utils::errors::{Result, RuntimeError};
use sha2::{Digest, Sha256};

/// Ring points per shard
pub const VNODES_PER_SHARD: u32 = 64;

fn hash64(parts: &[&[u8]]) -> u64 {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

fn vnode_hash(shard: &[u8], vnode: u32) -> u64 {
    hash64(&[shard, b"#", &vnode.to_be_bytes()])
}

/// Map `key` to one of `shards`
///
/// Pure: the same key and list always give the same shard, independent of
/// list order. Fails with `ShardUnavailable` for an empty list.
pub fn shard<'a, S: AsRef<[u8]>>(key: impl AsRef<[u8]>, shards: &'a [S]) -> Result<&'a S> {
    let target = hash64(&[key.as_ref()]);

    // Scan instead of building a ring: one successor and the ring minimum.
    let mut successor: Option<(u64, &[u8], usize)> = None;
    let mut lowest: Option<(u64, &[u8], usize)> = None;

    for (index, shard) in shards.iter().enumerate() {
        let name = shard.as_ref();
        for vnode in 0..VNODES_PER_SHARD {
            let point = (vnode_hash(name, vnode), name, index);
            if point.0 >= target && successor.map_or(true, |best| point < best) {
                successor = Some(point);
            }
            if lowest.map_or(true, |best| point < best) {
                lowest = Some(point);
            }
        }
    }

    successor
        .or(lowest)
        .map(|(_, _, index)| &shards[index])
        .ok_or(RuntimeError::ShardUnavailable)
}

/// A prebuilt ring for repeated lookups over a stable shard list
#[derive(Debug, Clone)]
pub struct ShardRing<S> {
    shards: Vec<S>,

    /// (point, shard name, shard index), sorted
    points: Vec<(u64, Vec<u8>, usize)>,
}

impl<S: AsRef<[u8]>> ShardRing<S> {
    pub fn new(shards: Vec<S>) -> Self {
        let mut ring = Self {
            shards,
            points: Vec::new(),
        };
        ring.rebuild();
        ring
    }

    pub fn add(&mut self, shard: S) {
        self.shards.push(shard);
        self.rebuild();
    }

    /// Remove every shard equal to `shard`; returns whether any was removed
    pub fn remove(&mut self, shard: &[u8]) -> bool {
        let before = self.shards.len();
        self.shards.retain(|s| s.as_ref() != shard);
        let removed = self.shards.len() != before;
        if removed {
            self.rebuild();
        }
        removed
    }

    /// Same answer as [`shard`] over the current members
    pub fn locate(&self, key: impl AsRef<[u8]>) -> Result<&S> {
        if self.points.is_empty() {
            return Err(RuntimeError::ShardUnavailable);
        }

        let target = hash64(&[key.as_ref()]);
        let slot = self.points.partition_point(|(point, _, _)| *point < target);
        let (_, _, index) = &self.points[slot % self.points.len()];
        Ok(&self.shards[*index])
    }

    pub fn shards(&self) -> &[S] {
        &self.shards
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    fn rebuild(&mut self) {
        self.points.clear();
        for (index, shard) in self.shards.iter().enumerate() {
            let name = shard.as_ref();
            for vnode in 0..VNODES_PER_SHARD {
                self.points
                    .push((vnode_hash(name, vnode), name.to_vec(), index));
            }
        }
        self.points.sort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("shard-{}", i)).collect()
    }

    #[test]
    fn test_empty_list_is_unavailable() {
        let empty: Vec<String> = Vec::new();
        assert_eq!(shard("key", &empty), Err(RuntimeError::ShardUnavailable));
        assert!(ShardRing::new(empty).locate("key").is_err());
    }

    #[test]
    fn test_single_shard_owns_everything() {
        let shards = names(1);
        for key in ["a", "b", "c", ""] {
            assert_eq!(shard(key, &shards).unwrap(), "shard-0");
        }
    }

    #[test]
    fn test_ring_matches_scan() {
        let shards = names(7);
        let ring = ShardRing::new(shards.clone());
        for i in 0..500 {
            let key = format!("key-{}", i);
            assert_eq!(ring.locate(&key).unwrap(), shard(&key, &shards).unwrap());
        }
    }

    #[test]
    fn test_spread_is_reasonable() {
        let shards = names(4);
        let ring = ShardRing::new(shards.clone());
        let mut counts = [0usize; 4];
        for i in 0..4000 {
            let owner = ring.locate(format!("key-{}", i)).unwrap();
            let index = shards.iter().position(|s| s == owner).unwrap();
            counts[index] += 1;
        }
        for count in counts {
            assert!(count > 500, "unbalanced ring: {:?}", counts);
        }
    }

    #[test]
    fn test_ring_add_remove() {
        let mut ring = ShardRing::new(names(3));
        ring.add("shard-3".to_string());
        assert_eq!(ring.len(), 4);
        assert!(ring.remove(b"shard-1"));
        assert!(!ring.remove(b"missing"));
        assert_eq!(ring.len(), 3);
        assert_ne!(ring.locate("anything").unwrap(), "shard-1");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_shard_is_deterministic(key in ".*", n in 1usize..16) {
            let shards = names(n);
            let first = shard(&key, &shards).unwrap().clone();
            let second = shard(&key, &shards).unwrap().clone();
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_order_does_not_matter(key in ".*", n in 1usize..16) {
            let shards = names(n);
            let mut reversed = shards.clone();
            reversed.reverse();
            prop_assert_eq!(shard(&key, &shards).unwrap(), shard(&key, &reversed).unwrap());
        }

        #[test]
        fn prop_removal_only_moves_removed_keys(n in 2usize..12, removed in 0usize..12, keys in prop::collection::vec("[a-z0-9]{1,12}", 1..32)) {
            let shards = names(n);
            let removed = removed % n;
            let mut remaining = shards.clone();
            let gone = remaining.remove(removed);

            for key in &keys {
                let before = shard(key, &shards).unwrap();
                let after = shard(key, &remaining).unwrap();
                if *before != gone {
                    prop_assert_eq!(before, after);
                }
            }
        }

        #[test]
        fn prop_addition_moves_keys_only_to_new_shard(n in 1usize..12, keys in prop::collection::vec("[a-z0-9]{1,12}", 1..32)) {
            let shards = names(n);
            let mut grown = shards.clone();
            grown.push("shard-new".to_string());

            for key in &keys {
                let before = shard(key, &shards).unwrap();
                let after = shard(key, &grown).unwrap();
                prop_assert!(before == after || after == "shard-new");
            }
        }
    }
}
