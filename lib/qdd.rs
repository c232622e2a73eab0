//! The QDD engine: canonical node construction, diagram addition, gate
//! application, measurement, and amplitude-table compaction.
//!
//! A [`Qdd`] owns the node unique table, the amplitude table, and the shared
//! memoization cache. Diagrams are plain [`Edge`] values rooted in the
//! engine's store; all operations take `&self` and fork their two-child
//! recursions with [`rayon::join`], synchronizing only at table insertions.

use std::fmt::Write as _;
use num_complex::Complex64 as C64;
use parking_lot::RwLock;
use rand::Rng;
use rustc_hash::{ FxHashMap, FxHashSet };
use crate::{
    amp::{ AmpIdx, ComplexTable, AMP_ONE, AMP_ZERO, DEFAULT_TOLERANCE },
    cache::{ CacheKey, OpCache, OpTag },
    gate::GateId,
    node::{ Edge, Node, TERMINAL },
    store::NodeStore,
};

// Slack allowed on accumulated probability sums. Looser than the amplitude
// tolerance: rounding from thousands of gate applications piles up here.
const PROB_TOLERANCE: f64 = 1e-9;

/// Capacities and numeric tolerance for a new engine.
#[derive(Copy, Clone, Debug)]
pub struct QddConfig {
    /// Maximum number of nodes in the unique table.
    pub node_capacity: usize,
    /// Maximum number of entries in the amplitude table.
    pub amp_capacity: usize,
    /// Amplitude equality tolerance.
    pub tolerance: f64,
}

impl Default for QddConfig {
    fn default() -> Self {
        Self {
            node_capacity: 1 << 20,
            amp_capacity: 1 << 18,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

/// Decision-diagram engine for quantum state vectors and gate matrices.
pub struct Qdd {
    store: RwLock<NodeStore>,
    amps: RwLock<ComplexTable>,
    pub(crate) cache: OpCache,
}

impl Default for Qdd {
    fn default() -> Self { Self::new(QddConfig::default()) }
}

impl Qdd {
    pub fn new(config: QddConfig) -> Self {
        Self {
            store: RwLock::new(NodeStore::new(config.node_capacity)),
            amps: RwLock::new(
                ComplexTable::new(config.amp_capacity, config.tolerance)),
            cache: OpCache::new(),
        }
    }

    /// The amplitude equality tolerance.
    pub fn tolerance(&self) -> f64 { self.amps.read().tolerance() }

    /// Number of nodes currently interned (terminal included).
    pub fn store_len(&self) -> usize { self.store.read().len() }

    /// Number of amplitude-table entries currently present.
    pub fn amp_len(&self) -> usize { self.amps.read().len() }

    pub(crate) fn node(&self, ptr: u64) -> Node { self.store.read().get(ptr) }

    /// Variable of the edge's target node, or `u32::MAX` for the terminal.
    pub(crate) fn var_of(&self, q: Edge) -> u32 {
        if q.is_terminal() { u32::MAX } else { self.node(q.ptr()).var() as u32 }
    }

    /* amplitude arithmetic over table indices */

    pub(crate) fn amp_value(&self, a: AmpIdx) -> C64 { self.amps.read().value(a) }

    pub(crate) fn amp_lookup(&self, c: C64) -> AmpIdx {
        if let Some(idx) = self.amps.read().find(c) { return idx; }
        self.amps.write().insert(c)
    }

    pub(crate) fn amp_mul(&self, a: AmpIdx, b: AmpIdx) -> AmpIdx {
        if a == AMP_ZERO || b == AMP_ZERO { return AMP_ZERO; }
        if a == AMP_ONE { return b; }
        if b == AMP_ONE { return a; }
        self.amp_lookup(self.amp_value(a) * self.amp_value(b))
    }

    pub(crate) fn amp_add(&self, a: AmpIdx, b: AmpIdx) -> AmpIdx {
        if a == AMP_ZERO { return b; }
        if b == AMP_ZERO { return a; }
        self.amp_lookup(self.amp_value(a) + self.amp_value(b))
    }

    pub(crate) fn amp_div(&self, a: AmpIdx, b: AmpIdx) -> AmpIdx {
        if a == AMP_ZERO { return AMP_ZERO; }
        if b == AMP_ONE { return a; }
        if a == b { return AMP_ONE; }
        self.amp_lookup(self.amp_value(a) / self.amp_value(b))
    }

    pub(crate) fn amp_neg(&self, a: AmpIdx) -> AmpIdx {
        if a == AMP_ZERO { return AMP_ZERO; }
        self.amp_lookup(-self.amp_value(a))
    }

    /// |amplitude|² of a table entry.
    pub(crate) fn prob_of(&self, a: AmpIdx) -> f64 {
        self.amp_value(a).norm_sqr()
    }

    fn intern(&self, node: Node) -> u64 {
        if let Some(ptr) = self.store.read().find(&node) { return ptr; }
        self.store.write().intern(node)
    }

    /* node algebra */

    /// The canonicalizing node constructor.
    ///
    /// Zero-weight edges are redirected to the terminal; a node whose two
    /// children are identical collapses to that child (reduction rule);
    /// otherwise the first nonzero child weight is factored out onto the
    /// returned edge and the node is interned.
    pub fn make_node(&self, var: u8, low: Edge, high: Edge) -> Edge {
        let low = if low.amp() == AMP_ZERO { Edge::zero() } else { low };
        let high = if high.amp() == AMP_ZERO { Edge::zero() } else { high };
        if low == high { return low; }
        let (low, high, norm) = if low.amp() != AMP_ZERO {
            let norm = low.amp();
            let high_amp = self.amp_div(high.amp(), norm);
            (low.with_amp(AMP_ONE), high.with_amp(high_amp), norm)
        } else {
            (low, high.with_amp(AMP_ONE), high.amp())
        };
        let ptr = self.intern(Node::new(var, low, high));
        Edge::new(ptr, norm)
    }

    /// The diagram for basis state ∣x⟩ on `n` qubits (`x[k]` is qubit `k`).
    pub fn basis_state(&self, n: u32, x: &[bool]) -> Edge {
        assert!(x.len() >= n as usize);
        let mut prev = Edge::one();
        for k in (0..n).rev() {
            let next = Edge::new(prev.ptr(), AMP_ONE);
            let (low, high) = if x[k as usize] {
                (Edge::zero(), next)
            } else {
                (next, Edge::zero())
            };
            prev = self.make_node(k as u8, low, high);
        }
        prev
    }

    /// The diagram for ∣0…0⟩ on `n` qubits.
    pub fn all_zero_state(&self, n: u32) -> Edge {
        self.basis_state(n, &vec![false; n as usize])
    }

    /// Count the distinct nodes reachable from `q`, the terminal pseudo-node
    /// always counted once.
    ///
    /// Traversal state is a local visited-set, so this is safe to run on a
    /// diagram sharing structure with any other live diagram.
    pub fn count_nodes(&self, q: Edge) -> u64 {
        let mut seen: FxHashSet<u64> = FxHashSet::default();
        self.visit_rec(q, &mut seen);
        seen.len() as u64 + 1
    }

    fn visit_rec(&self, q: Edge, seen: &mut FxHashSet<u64>) {
        if q.is_terminal() || !seen.insert(q.ptr()) { return; }
        let n = self.node(q.ptr());
        self.visit_rec(n.low(), seen);
        self.visit_rec(n.high(), seen);
    }

    /* diagram addition */

    /// Pointwise sum of two diagrams.
    ///
    /// The merge primitive behind gate application: walks both diagrams by
    /// their top variable with skip semantics, pushes edge weights down, and
    /// recombines bottom-up through [`make_node`][Self::make_node].
    pub fn plus(&self, a: Edge, b: Edge) -> Edge {
        if a.amp() == AMP_ZERO { return b; }
        if b.amp() == AMP_ZERO { return a; }

        let key = CacheKey { op: OpTag::Plus, x: a.bits(), y: b.bits(), z: 0 };
        if let Some(bits) = self.cache.get(key) { return Edge::from_bits(bits); }

        let var_a = self.var_of(a);
        let var_b = self.var_of(b);

        // same target and same variable: sum the weights directly
        if a.ptr() == b.ptr() && var_a == var_b {
            let sum = self.amp_add(a.amp(), b.amp());
            return if sum == AMP_ZERO {
                Edge::zero()
            } else {
                Edge::new(a.ptr(), sum)
            };
        }

        // a diagram that skips the top variable repeats itself on both
        // branches with unit weight
        let mut low_a = Edge::new(a.ptr(), AMP_ONE);
        let mut high_a = low_a;
        let mut low_b = Edge::new(b.ptr(), AMP_ONE);
        let mut high_b = low_b;
        let mut topvar = 0;
        if var_a <= var_b {
            let n = self.node(a.ptr());
            low_a = n.low();
            high_a = n.high();
            topvar = var_a;
        }
        if var_b <= var_a {
            let n = self.node(b.ptr());
            low_b = n.low();
            high_b = n.high();
            topvar = var_b;
        }

        // push the parent weights down before recursing
        let low_a = low_a.with_amp(self.amp_mul(a.amp(), low_a.amp()));
        let high_a = high_a.with_amp(self.amp_mul(a.amp(), high_a.amp()));
        let low_b = low_b.with_amp(self.amp_mul(b.amp(), low_b.amp()));
        let high_b = high_b.with_amp(self.amp_mul(b.amp(), high_b.amp()));

        let (low, high) = rayon::join(
            || self.plus(low_a, low_b),
            || self.plus(high_a, high_b),
        );
        let res = self.make_node(topvar as u8, low, high);
        self.cache.put(key, res.bits());
        res
    }

    /* gate application */

    /// Apply a single-qubit gate to `target`.
    pub fn apply_gate(&self, q: Edge, g: GateId, target: u8) -> Edge {
        let (gid, gparam) = g.key_bits();
        let key = CacheKey {
            op: OpTag::Gate,
            x: gid | (target as u64) << 32,
            y: q.bits(),
            z: gparam,
        };
        if let Some(bits) = self.cache.get(key) { return Edge::from_bits(bits); }

        let var = self.var_of(q);
        let skipped = var > target as u32;
        let at_targ = var == target as u32;

        let (low, high, var) = if skipped {
            let e = Edge::new(q.ptr(), AMP_ONE);
            (e, e, target)
        } else {
            let n = self.node(q.ptr());
            (n.low(), n.high(), var as u8)
        };

        let res = if skipped || at_targ {
            // application point: combine the two sub-edges with the four
            // matrix entries and merge
            let u = g.matrix();
            let al = self.amp_value(low.amp());
            let ah = self.amp_value(high.amp());
            let e00 = self.amp_lookup(al * u[0]);
            let e10 = self.amp_lookup(al * u[2]);
            let e01 = self.amp_lookup(ah * u[1]);
            let e11 = self.amp_lookup(ah * u[3]);
            let col0 = self.make_node(target,
                Edge::new(low.ptr(), e00), Edge::new(low.ptr(), e10));
            let col1 = self.make_node(target,
                Edge::new(high.ptr(), e01), Edge::new(high.ptr(), e11));
            self.plus(col0, col1)
        } else {
            let (low, high) = rayon::join(
                || self.apply_gate(low, g, target),
                || self.apply_gate(high, g, target),
            );
            self.make_node(var, low, high)
        };

        let res = res.with_amp(self.amp_mul(q.amp(), res.amp()));
        self.cache.put(key, res.bits());
        res
    }

    /// Apply a gate to `t` controlled on qubit `c`.
    ///
    /// *Panics unless `c < t` — the recursion reaches the control first.*
    pub fn apply_cgate(&self, q: Edge, g: GateId, c: u8, t: u8) -> Edge {
        assert!(c < t, "control must sit above target");

        let (gid, gparam) = g.key_bits();
        let key = CacheKey {
            op: OpTag::CGate,
            x: gid | (c as u64) << 32 | (t as u64) << 40,
            y: q.bits(),
            z: gparam,
        };
        if let Some(bits) = self.cache.get(key) { return Edge::from_bits(bits); }

        let var = self.var_of(q);
        let skipped = var > c as u32;
        let at_ctrl = var == c as u32;

        let (low, high, var) = if skipped {
            let e = Edge::new(q.ptr(), AMP_ONE);
            (e, e, c)
        } else {
            let n = self.node(q.ptr());
            (n.low(), n.high(), var as u8)
        };

        let (low, high) = if skipped || at_ctrl {
            // control = 1 branch gets the gate, the other is untouched
            (low, self.apply_gate(high, g, t))
        } else {
            rayon::join(
                || self.apply_cgate(low, g, c, t),
                || self.apply_cgate(high, g, c, t),
            )
        };
        let res = self.make_node(var, low, high);

        let res = res.with_amp(self.amp_mul(q.amp(), res.amp()));
        self.cache.put(key, res.bits());
        res
    }

    /* amplitude extraction and exhaustive comparison */

    /// The amplitude of one basis state: a deterministic O(n) walk
    /// multiplying edge weights along the path selected by `x`.
    pub fn get_amplitude(&self, q: Edge, x: &[bool]) -> C64 {
        let mut q = q;
        let mut a = C64::new(1.0, 0.0);
        loop {
            a *= self.amp_value(q.amp());
            if q.is_terminal() { break a; }
            let n = self.node(q.ptr());
            q = if x[n.var() as usize] { n.high() } else { n.low() };
        }
    }

    /// Compare two `n`-qubit diagrams amplitude by amplitude.
    ///
    /// Enumerates all 2^n basis states — intended for small-n testing only.
    pub fn equivalent(&self, a: Edge, b: Edge, n: u32, exact: bool) -> bool {
        let tol = self.tolerance();
        let mut x = vec![false; n as usize];
        loop {
            let amp_a = self.get_amplitude(a, &x);
            let amp_b = self.get_amplitude(b, &x);
            let eq = if exact {
                amp_a == amp_b
            } else {
                (amp_a.re - amp_b.re).abs() < tol
                    && (amp_a.im - amp_b.im).abs() < tol
            };
            if !eq {
                log::debug!("amplitude mismatch at {:?}: {} != {}",
                    x, amp_a, amp_b);
                return false;
            }
            if !next_bitstring(&mut x) { return true; }
        }
    }

    /// Whether the sum of all 2^n basis probabilities is 1 within tolerance.
    ///
    /// Exponential in `n`; intended for small-n testing only.
    pub fn is_unit_vector(&self, q: Edge, n: u32) -> bool {
        let mut x = vec![false; n as usize];
        let mut sum = 0.0;
        loop {
            sum += self.get_amplitude(q, &x).norm_sqr();
            if !next_bitstring(&mut x) { break; }
        }
        (sum - 1.0).abs() < PROB_TOLERANCE
    }

    /// Debug dump of every node reachable from `q`, one line per node.
    pub fn dump_nodes(&self, q: Edge) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "root {:?} = {}", q, self.amp_value(q.amp()));
        let mut seen: FxHashSet<u64> = FxHashSet::default();
        self.dump_rec(q, &mut seen, &mut out);
        out
    }

    fn dump_rec(&self, q: Edge, seen: &mut FxHashSet<u64>, out: &mut String) {
        if q.is_terminal() || !seen.insert(q.ptr()) { return; }
        let n = self.node(q.ptr());
        let _ = writeln!(out, "{:#x}\t[var={}, low={:?} ({}), high={:?} ({})]",
            q.ptr(), n.var(),
            n.low(), self.amp_value(n.low().amp()),
            n.high(), self.amp_value(n.high().amp()));
        self.dump_rec(n.low(), seen, out);
        self.dump_rec(n.high(), seen, out);
    }

    /* measurement and probabilities */

    /// Unnormalized probability mass of a sub-diagram: the sum of |amp|²
    /// over all paths from `topvar` to the terminal at depth `nvars`.
    pub fn unnormed_prob(&self, q: Edge, topvar: u32, nvars: u32) -> f64 {
        assert!(topvar <= nvars);
        if topvar == nvars {
            assert!(q.is_terminal(),
                "diagram deeper than its declared variable count");
            return self.prob_of(q.amp());
        }

        let key = CacheKey {
            op: OpTag::Prob,
            x: q.bits(),
            y: (topvar as u64) | (nvars as u64) << 32,
            z: 0,
        };
        if let Some(bits) = self.cache.get(key) { return f64::from_bits(bits); }

        let var = self.var_of(q);
        debug_assert!(var >= topvar);
        let (low, high) = if var > topvar {
            let e = Edge::new(q.ptr(), AMP_ONE);
            (e, e)
        } else {
            let n = self.node(q.ptr());
            (n.low(), n.high())
        };

        let (p_low, p_high) = rayon::join(
            || self.unnormed_prob(low, topvar + 1, nvars),
            || self.unnormed_prob(high, topvar + 1, nvars),
        );
        let p = self.prob_of(q.amp()) * (p_low + p_high);
        self.cache.put(key, p.to_bits());
        p
    }

    /// Measure qubit 0 of an `nvars`-qubit diagram: compute both branch
    /// probabilities, sample, collapse the losing branch to zero, and
    /// renormalize the survivor.
    ///
    /// Returns the post-measurement diagram, the sampled outcome, and the
    /// probability of the ∣0⟩ outcome.
    ///
    /// *Panics if the branch probabilities do not sum to 1 within tolerance
    /// — that indicates a non-unitary diagram, an upstream bug.*
    pub fn measure_qubit0<R>(&self, q: Edge, nvars: u32, rng: &mut R)
        -> (Edge, bool, f64)
    where R: Rng + ?Sized
    {
        let at_zero = self.var_of(q) == 0;
        let (low, high) = if at_zero {
            let n = self.node(q.ptr());
            (n.low(), n.high())
        } else {
            let e = Edge::new(q.ptr(), AMP_ONE);
            (e, e)
        };

        let prob_root = self.prob_of(q.amp());
        let prob_low = prob_root * self.unnormed_prob(low, 1, nvars);
        let prob_high = prob_root * self.unnormed_prob(high, 1, nvars);
        if (prob_low + prob_high - 1.0).abs() > PROB_TOLERANCE {
            panic!("measurement probabilities sum to {} instead of 1",
                prob_low + prob_high);
        }

        let outcome = rng.gen::<f64>() >= prob_low;
        let (low, high, norm) = if outcome {
            let norm = self.amp_lookup(C64::new(prob_high.sqrt(), 0.0));
            (Edge::zero(), Edge::new(high.ptr(), AMP_ONE), norm)
        } else {
            let norm = self.amp_lookup(C64::new(prob_low.sqrt(), 0.0));
            (Edge::new(low.ptr(), AMP_ONE), Edge::zero(), norm)
        };
        let res = self.make_node(0, low, high);
        let res = res.with_amp(self.amp_div(q.amp(), norm));
        (res, outcome, prob_low)
    }

    /// Measure qubit `k`, conjugating through a swap with qubit 0 so the
    /// single-qubit measurement can be reused.
    pub fn measure_qubit<R>(&self, q: Edge, k: u8, nvars: u32, rng: &mut R)
        -> (Edge, bool, f64)
    where R: Rng + ?Sized
    {
        if k == 0 { return self.measure_qubit0(q, nvars, rng); }
        let q = self.circuit_swap(q, 0, k);
        let (q, outcome, p) = self.measure_qubit0(q, nvars, rng);
        (self.circuit_swap(q, 0, k), outcome, p)
    }

    /// Measure all `n` qubits in variable order, sampling each conditional
    /// branch distribution in a single descent.
    ///
    /// Returns the sampled computational-basis diagram, the outcome bits,
    /// and the joint probability of the sampled outcome.
    pub fn measure_all<R>(&self, q: Edge, n: u32, rng: &mut R)
        -> (Edge, Vec<bool>, f64)
    where R: Rng + ?Sized
    {
        let mut q = q;
        let mut ms = vec![false; n as usize];
        let mut prob_path = 1.0;
        let mut prob_roots = 1.0;
        for k in 0..n {
            let var = self.var_of(q);
            assert!(var >= k, "unexpected variable order during measurement");
            let (low, high) = if var > k {
                let e = Edge::new(q.ptr(), AMP_ONE);
                (e, e)
            } else {
                let nd = self.node(q.ptr());
                (nd.low(), nd.high())
            };

            prob_roots *= self.prob_of(q.amp());
            let prob_low
                = self.unnormed_prob(low, k + 1, n) * prob_roots / prob_path;
            let prob_high
                = self.unnormed_prob(high, k + 1, n) * prob_roots / prob_path;
            if (prob_low + prob_high - 1.0).abs() > PROB_TOLERANCE {
                panic!("measurement probabilities sum to {} instead of 1",
                    prob_low + prob_high);
            }

            let outcome = rng.gen::<f64>() >= prob_low;
            ms[k as usize] = outcome;
            q = if outcome { high } else { low };
            prob_path *= if outcome { prob_high } else { prob_low };
        }
        (self.basis_state(n, &ms), ms, prob_path)
    }

    /* amplitude-table compaction */

    /// Rebuild the amplitude table from scratch, keeping only values
    /// reachable from `roots`, and return the roots remapped to the new
    /// indices.
    ///
    /// All operation caches are invalidated: cached results refer to stale
    /// amplitude indices.
    pub fn compact(&mut self, roots: &[Edge]) -> Vec<Edge> {
        let capacity = self.amps.get_mut().capacity();
        let tol = self.amps.get_mut().tolerance();
        let old = std::mem::replace(
            self.amps.get_mut(), ComplexTable::new(capacity, tol));
        let mut memo: FxHashMap<u64, Edge> = FxHashMap::default();
        let migrated = roots.iter()
            .map(|&root| self.migrate_amps(root, &old, &mut memo))
            .collect();
        self.cache.clear();
        log::debug!("amplitude table compacted: {} -> {} entries",
            old.len(), self.amps.get_mut().len());
        migrated
    }

    fn migrate_amps(
        &mut self,
        q: Edge,
        old: &ComplexTable,
        memo: &mut FxHashMap<u64, Edge>,
    ) -> Edge {
        if let Some(&e) = memo.get(&q.bits()) { return e; }
        let new_amp = self.amps.get_mut().insert(old.value(q.amp()));
        let res = if q.is_terminal() {
            Edge::new(TERMINAL, new_amp)
        } else {
            let n = self.store.get_mut().get(q.ptr());
            let low = self.migrate_amps(n.low(), old, memo);
            let high = self.migrate_amps(n.high(), old, memo);
            // raw re-intern: none of the values change, only their indices,
            // so the normalizing constructor is not needed
            let ptr = self.store.get_mut().intern(Node::new(n.var(), low, high));
            Edge::new(ptr, new_amp)
        };
        memo.insert(q.bits(), res);
        res
    }
}

/// Binary-increment a bit vector (LSB first); `false` once it wraps to zero.
pub(crate) fn next_bitstring(x: &mut [bool]) -> bool {
    for b in x.iter_mut() {
        *b = !*b;
        if *b { return true; }
    }
    false
}
