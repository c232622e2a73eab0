//! Deduplicating table of complex edge weights.
//!
//! Every edge weight in the engine is a small integer index into this table.
//! Values closer together than the configured tolerance share an index, which
//! is what makes structurally equal sub-diagrams hash-cons to the same node
//! even when their weights were produced by different floating-point routes.

use num_complex::Complex64 as C64;
use rustc_hash::FxHashMap;

/// Index of a complex value in the amplitude table.
pub type AmpIdx = u32;

/// Index of the always-present exact zero.
pub const AMP_ZERO: AmpIdx = 0;

/// Index of the always-present exact one.
pub const AMP_ONE: AmpIdx = 1;

/// Default equality tolerance for amplitude deduplication.
pub const DEFAULT_TOLERANCE: f64 = 1e-14;

/// Append-only store assigning a unique [`AmpIdx`] to every distinct complex
/// value, with distinctness judged per component against a tolerance.
///
/// Indices 0 and 1 hold exact zero and one. Lookups quantize both components
/// by the tolerance into integer buckets and probe the neighboring buckets,
/// so any two values within the tolerance of each other resolve to one index.
#[derive(Clone, Debug)]
pub struct ComplexTable {
    vals: Vec<C64>,
    buckets: FxHashMap<(i64, i64), Vec<AmpIdx>>,
    tol: f64,
    capacity: usize,
}

impl ComplexTable {
    /// Create a table holding at most `capacity` entries, seeded with the
    /// ZERO and ONE constants.
    ///
    /// *Panics if `capacity` is too small to hold the constants or exceeds
    /// the amplitude-index field width.*
    pub fn new(capacity: usize, tol: f64) -> Self {
        assert!(capacity >= 2, "amplitude table needs room for 0 and 1");
        assert!(capacity as u64 <= crate::node::MAX_AMPS,
            "amplitude table capacity exceeds index width");
        assert!(tol > 0.0 && tol.is_finite());
        let mut table = Self {
            vals: Vec::new(),
            buckets: FxHashMap::default(),
            tol,
            capacity,
        };
        let zero = table.insert(C64::new(0.0, 0.0));
        let one = table.insert(C64::new(1.0, 0.0));
        debug_assert_eq!(zero, AMP_ZERO);
        debug_assert_eq!(one, AMP_ONE);
        table
    }

    pub fn len(&self) -> usize { self.vals.len() }

    pub fn is_empty(&self) -> bool { self.vals.is_empty() }

    pub fn capacity(&self) -> usize { self.capacity }

    pub fn tolerance(&self) -> f64 { self.tol }

    /// The complex value stored at `idx`.
    ///
    /// *Panics if `idx` was never issued by this table.*
    pub fn value(&self, idx: AmpIdx) -> C64 { self.vals[idx as usize] }

    fn bucket_of(&self, c: C64) -> (i64, i64) {
        ((c.re / self.tol).round() as i64, (c.im / self.tol).round() as i64)
    }

    fn close(&self, a: C64, b: C64) -> bool {
        (a.re - b.re).abs() < self.tol && (a.im - b.im).abs() < self.tol
    }

    /// Find the index of a value already in the table, within tolerance.
    pub fn find(&self, c: C64) -> Option<AmpIdx> {
        let (kr, ki) = self.bucket_of(c);
        for dr in -1..=1_i64 {
            for di in -1..=1_i64 {
                let Some(bucket) = self.buckets.get(&(kr + dr, ki + di))
                    else { continue; };
                for &idx in bucket.iter() {
                    if self.close(self.vals[idx as usize], c) {
                        return Some(idx);
                    }
                }
            }
        }
        None
    }

    /// Find the index of `c`, inserting it if no value within tolerance is
    /// present yet.
    ///
    /// *Panics (fatal resource exhaustion) if the table is full: continuing
    /// without a canonical index would silently break sharing.*
    pub fn insert(&mut self, c: C64) -> AmpIdx {
        if let Some(idx) = self.find(c) { return idx; }
        if self.vals.len() >= self.capacity {
            panic!("amplitude table full: {} of {} entries used",
                self.vals.len(), self.capacity);
        }
        let idx = self.vals.len() as AmpIdx;
        let key = self.bucket_of(c);
        self.vals.push(c);
        self.buckets.entry(key).or_default().push(idx);
        idx
    }
}
