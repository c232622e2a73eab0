//! Shared memoization cache for the recursive operations.
//!
//! Keys identify an operation plus its operand bits; values are raw `u64`
//! payloads (edge bits, or `f64` bits for probability results). Entries must
//! be bit-identical to what recomputation would produce, so the whole cache
//! is dropped whenever amplitude indices are remapped (table compaction) or a
//! parameterized sub-circuit is about to run with constants outside the key.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

/// Operation tag distinguishing cache entries of different algorithms.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum OpTag {
    Plus,
    Gate,
    CGate,
    SubCircuit,
    Prob,
    MatVec,
    MatMat,
}

/// Full key for one memoized call.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub op: OpTag,
    pub x: u64,
    pub y: u64,
    pub z: u64,
}

/// Process-wide memoization table, shared across the fork-join workers.
///
/// Lookups take a read lock, insertions a write lock; neither blocks the
/// pure traversal work between them.
#[derive(Debug, Default)]
pub struct OpCache {
    map: RwLock<FxHashMap<CacheKey, u64>>,
}

impl OpCache {
    pub fn new() -> Self { Self::default() }

    pub fn get(&self, key: CacheKey) -> Option<u64> {
        self.map.read().get(&key).copied()
    }

    pub fn put(&self, key: CacheKey, val: u64) {
        self.map.write().insert(key, val);
    }

    pub fn len(&self) -> usize { self.map.read().len() }

    pub fn is_empty(&self) -> bool { self.map.read().is_empty() }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut map = self.map.write();
        log::debug!("clearing operation cache ({} entries)", map.len());
        map.clear();
    }
}
