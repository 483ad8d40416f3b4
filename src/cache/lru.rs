//! Pattern-sharded LRU storage
//!
//! One `ShardedLru` holds the entries of a single pattern kind, partitioned
//! by a stable hash of the key into independently locked shards. Each shard
//! is a hash map into a slab of nodes threaded onto a doubly linked recency
//! list, so get/put/remove are O(1) under the shard mutex.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::cache::key::{CachedPostings, SubKey};
use crate::config::CacheCapacity;
use crate::segment::SegmentId;

const NIL: usize = usize::MAX;

struct Node {
    key: SubKey,
    value: CachedPostings,
    bytes: u64,
    prev: usize,
    next: usize,
}

/// Outcome of a shard put, reported so the caller can fix up the back-index
/// and metrics outside the shard lock.
#[derive(Default)]
pub(crate) struct PutOutcome {
    /// Keys evicted to restore the capacity bound, with their byte sizes.
    /// May include the key just inserted when it alone exceeds the budget.
    pub evicted: Vec<(SubKey, u64)>,
    /// Byte size of the previous value when the put replaced an entry
    pub replaced_bytes: Option<u64>,
}

struct LruShard {
    map: HashMap<SubKey, usize>,
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
    total_bytes: u64,
    capacity: CacheCapacity,
}

impl LruShard {
    fn new(capacity: CacheCapacity) -> Self {
        Self {
            map: HashMap::new(),
            nodes: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            total_bytes: 0,
            capacity,
        }
    }

    fn node(&self, idx: usize) -> &Node {
        self.nodes[idx].as_ref().expect("live node")
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node {
        self.nodes[idx].as_mut().expect("live node")
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.node(idx);
            (node.prev, node.next)
        };
        if prev != NIL {
            self.node_mut(prev).next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.node_mut(next).prev = prev;
        } else {
            self.tail = prev;
        }
    }

    fn attach_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let node = self.node_mut(idx);
            node.prev = NIL;
            node.next = old_head;
        }
        if old_head != NIL {
            self.node_mut(old_head).prev = idx;
        } else {
            self.tail = idx;
        }
        self.head = idx;
    }

    fn alloc(&mut self, node: Node) -> usize {
        if let Some(idx) = self.free.pop() {
            self.nodes[idx] = Some(node);
            idx
        } else {
            self.nodes.push(Some(node));
            self.nodes.len() - 1
        }
    }

    fn release(&mut self, idx: usize) -> Node {
        let node = self.nodes[idx].take().expect("live node");
        self.free.push(idx);
        node
    }

    fn over_capacity(&self) -> bool {
        if let Some(max_bytes) = self.capacity.max_bytes {
            if self.total_bytes > max_bytes {
                return true;
            }
        }
        if let Some(max_entries) = self.capacity.max_entries {
            if self.map.len() > max_entries {
                return true;
            }
        }
        false
    }

    fn pop_tail(&mut self) -> Option<(SubKey, u64)> {
        if self.tail == NIL {
            return None;
        }
        let idx = self.tail;
        self.detach(idx);
        let node = self.release(idx);
        self.map.remove(&node.key);
        self.total_bytes -= node.bytes;
        Some((node.key, node.bytes))
    }

    fn get(&mut self, key: &SubKey) -> Option<CachedPostings> {
        let idx = *self.map.get(key)?;
        self.detach(idx);
        self.attach_front(idx);
        Some(self.node(idx).value.clone())
    }

    fn put(&mut self, key: SubKey, value: CachedPostings, bytes: u64) -> PutOutcome {
        let mut outcome = PutOutcome::default();

        if let Some(&idx) = self.map.get(&key) {
            self.detach(idx);
            self.attach_front(idx);
            let node = self.node_mut(idx);
            let old_bytes = node.bytes;
            node.value = value;
            node.bytes = bytes;
            self.total_bytes = self.total_bytes - old_bytes + bytes;
            outcome.replaced_bytes = Some(old_bytes);
        } else {
            let idx = self.alloc(Node {
                key: key.clone(),
                value,
                bytes,
                prev: NIL,
                next: NIL,
            });
            self.map.insert(key, idx);
            self.attach_front(idx);
            self.total_bytes += bytes;
        }

        while self.over_capacity() {
            match self.pop_tail() {
                Some(evicted) => outcome.evicted.push(evicted),
                None => break,
            }
        }

        outcome
    }

    fn remove(&mut self, key: &SubKey) -> Option<u64> {
        let idx = self.map.remove(key)?;
        self.detach(idx);
        let node = self.release(idx);
        self.total_bytes -= node.bytes;
        Some(node.bytes)
    }

    fn visit<F>(&self, segment: Option<&SegmentId>, visitor: &mut F)
    where
        F: FnMut(&SubKey, &CachedPostings),
    {
        let mut idx = self.head;
        while idx != NIL {
            let node = self.node(idx);
            if segment.map_or(true, |seg| node.key.segment == *seg) {
                visitor(&node.key, &node.value);
            }
            idx = node.next;
        }
    }

    fn clear(&mut self) -> (usize, u64) {
        let removed = (self.map.len(), self.total_bytes);
        self.map.clear();
        self.nodes.clear();
        self.free.clear();
        self.head = NIL;
        self.tail = NIL;
        self.total_bytes = 0;
        removed
    }
}

/// The sharded LRU for one pattern kind.
pub(crate) struct ShardedLru {
    shards: Vec<Mutex<LruShard>>,
}

impl ShardedLru {
    pub fn new(shards: usize, capacity: CacheCapacity) -> Self {
        let shards = shards.max(1);
        let per_shard = capacity.per_shard(shards);
        Self {
            shards: (0..shards)
                .map(|_| Mutex::new(LruShard::new(per_shard)))
                .collect(),
        }
    }

    fn shard_for(&self, key: &SubKey) -> &Mutex<LruShard> {
        let idx = (key.shard_hash() % self.shards.len() as u64) as usize;
        &self.shards[idx]
    }

    /// Look up and promote to most recently used
    pub fn get(&self, key: &SubKey) -> Option<CachedPostings> {
        self.shard_for(key).lock().get(key)
    }

    /// Insert or replace, evicting to the capacity bound
    pub fn put(&self, key: SubKey, value: CachedPostings, bytes: u64) -> PutOutcome {
        self.shard_for(&key).lock().put(key, value, bytes)
    }

    /// Remove an entry, returning its byte size when it was present
    pub fn remove(&self, key: &SubKey) -> Option<u64> {
        self.shard_for(key).lock().remove(key)
    }

    /// Visit entries without promoting recency. Each shard lock is held only
    /// while that shard is walked, so other shards stay writable.
    pub fn visit<F>(&self, segment: Option<&SegmentId>, mut visitor: F)
    where
        F: FnMut(&SubKey, &CachedPostings),
    {
        for shard in &self.shards {
            shard.lock().visit(segment, &mut visitor);
        }
    }

    /// Drop every entry, returning (entries, bytes) removed
    pub fn clear(&self) -> (usize, u64) {
        let mut entries = 0;
        let mut bytes = 0;
        for shard in &self.shards {
            let (e, b) = shard.lock().clear();
            entries += e;
            bytes += b;
        }
        (entries, bytes)
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().map.len()).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.shards.iter().map(|s| s.lock().total_bytes).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::postings::PostingsList;

    fn value() -> CachedPostings {
        CachedPostings::postings(PostingsList::from_range(0..4))
    }

    fn key(seg: SegmentId, pattern: &str) -> SubKey {
        SubKey::new(seg, "f", pattern)
    }

    fn entry_lru(max_entries: usize) -> ShardedLru {
        // Single shard so recency order is observable
        ShardedLru::new(1, CacheCapacity::entries(max_entries))
    }

    #[test]
    fn test_get_miss_then_hit() {
        let lru = entry_lru(4);
        let seg = SegmentId::new();
        let k = key(seg, "a");

        assert!(lru.get(&k).is_none());
        lru.put(k.clone(), value(), 1);
        assert!(lru.get(&k).is_some());
        assert_eq!(lru.len(), 1);
    }

    #[test]
    fn test_eviction_order() {
        // Insert K1..K4 into a capacity-3 LRU: K1 falls out. Touch K2, then
        // insert K5: K3 is the victim, not K2.
        let lru = entry_lru(3);
        let seg = SegmentId::new();
        let keys: Vec<SubKey> = ["k1", "k2", "k3", "k4"]
            .iter()
            .map(|p| key(seg, p))
            .collect();

        for k in &keys {
            lru.put(k.clone(), value(), 1);
        }
        assert!(lru.get(&keys[0]).is_none());
        assert!(lru.get(&keys[1]).is_some());
        assert!(lru.get(&keys[2]).is_some());
        assert!(lru.get(&keys[3]).is_some());

        lru.get(&keys[1]);
        lru.get(&keys[3]);
        // Recency (MRU..LRU) is now k4, k2, k3
        let outcome = lru.put(key(seg, "k5"), value(), 1);
        assert_eq!(outcome.evicted.len(), 1);
        assert_eq!(outcome.evicted[0].0, keys[2]);
        assert!(lru.get(&keys[1]).is_some());
    }

    #[test]
    fn test_byte_budget_eviction() {
        let lru = ShardedLru::new(1, CacheCapacity::bytes(100));
        let seg = SegmentId::new();

        lru.put(key(seg, "a"), value(), 40);
        lru.put(key(seg, "b"), value(), 40);
        assert_eq!(lru.total_bytes(), 80);

        let outcome = lru.put(key(seg, "c"), value(), 40);
        assert_eq!(outcome.evicted.len(), 1);
        assert_eq!(outcome.evicted[0].0, key(seg, "a"));
        assert_eq!(lru.total_bytes(), 80);
    }

    #[test]
    fn test_oversized_entry_does_not_stick() {
        let lru = ShardedLru::new(1, CacheCapacity::bytes(100));
        let seg = SegmentId::new();

        lru.put(key(seg, "small"), value(), 10);
        let outcome = lru.put(key(seg, "huge"), value(), 500);
        // Everything goes, including the oversized entry itself
        assert_eq!(outcome.evicted.len(), 2);
        assert_eq!(lru.len(), 0);
        assert_eq!(lru.total_bytes(), 0);
    }

    #[test]
    fn test_replace_adjusts_bytes() {
        let lru = ShardedLru::new(1, CacheCapacity::bytes(100));
        let seg = SegmentId::new();
        let k = key(seg, "a");

        lru.put(k.clone(), value(), 60);
        let outcome = lru.put(k.clone(), value(), 20);
        assert_eq!(outcome.replaced_bytes, Some(60));
        assert!(outcome.evicted.is_empty());
        assert_eq!(lru.total_bytes(), 20);
        assert_eq!(lru.len(), 1);
    }

    #[test]
    fn test_remove() {
        let lru = entry_lru(4);
        let seg = SegmentId::new();
        let k = key(seg, "a");

        lru.put(k.clone(), value(), 7);
        assert_eq!(lru.remove(&k), Some(7));
        assert_eq!(lru.remove(&k), None);
        assert_eq!(lru.len(), 0);
        assert_eq!(lru.total_bytes(), 0);
    }

    #[test]
    fn test_visit_filters_by_segment_without_promoting() {
        let lru = entry_lru(8);
        let seg_a = SegmentId::new();
        let seg_b = SegmentId::new();

        lru.put(key(seg_a, "x"), value(), 1);
        lru.put(key(seg_a, "y"), value(), 1);
        lru.put(key(seg_b, "z"), value(), 1);

        let mut seen = Vec::new();
        lru.visit(Some(&seg_a), |k, _| seen.push(k.pattern.clone()));
        seen.sort();
        assert_eq!(seen, vec![b"x".to_vec(), b"y".to_vec()]);

        // Visitation must not have promoted seg_a entries: with the recency
        // list untouched, "x" is still the LRU victim after "y" and "z".
        let mut all = 0;
        lru.visit(None, |_, _| all += 1);
        assert_eq!(all, 3);
    }

    #[test]
    fn test_clear() {
        let lru = entry_lru(8);
        let seg = SegmentId::new();
        lru.put(key(seg, "a"), value(), 3);
        lru.put(key(seg, "b"), value(), 4);

        assert_eq!(lru.clear(), (2, 7));
        assert_eq!(lru.len(), 0);
        assert!(lru.get(&key(seg, "a")).is_none());
    }

    #[test]
    fn test_slab_reuses_slots() {
        let lru = entry_lru(2);
        let seg = SegmentId::new();
        for i in 0..100 {
            lru.put(key(seg, &format!("k{}", i)), value(), 1);
        }
        assert_eq!(lru.len(), 2);
        // Slab stays bounded by capacity, not by insert count
        let shard = lru.shards[0].lock();
        assert!(shard.nodes.len() <= 3);
    }
}
