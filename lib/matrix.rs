//! Matrix decision diagrams and matrix-vector / matrix-matrix products.
//!
//! An n-qubit operator is a diagram over 2n interleaved variables: row bit of
//! qubit k at variable 2k, column bit at 2k+1. A level skipped by the diagram
//! reads as an all-ones block (both children equal with unit weight), which
//! is exactly what the reduction rule produces, so vector-side skip semantics
//! carry over unchanged.
//!
//! Matrix diagrams make multi-controlled gates expressible: build the
//! operator once with [`cgate_matrix`][Qdd::cgate_matrix] and apply it with
//! [`matvec`][Qdd::matvec].

use crate::{
    amp::{ AMP_ONE, AMP_ZERO },
    cache::{ CacheKey, OpTag },
    error::{ Error, Result },
    gate::GateId,
    node::{ Edge, MAX_VARS, TERMINAL },
    qdd::Qdd,
};

fn check_width(n: u32) {
    assert!(2 * n <= MAX_VARS as u32,
        "matrix diagrams need 2 variables per qubit");
}

impl Qdd {
    /// Identity-operator diagram spanning qubits `lo..n`.
    fn identity_span(&self, lo: u32, n: u32) -> Edge {
        let mut prev = Edge::one();
        for k in (lo..n).rev() {
            let low = self.make_node(2 * k as u8 + 1, prev, Edge::zero());
            let high = self.make_node(2 * k as u8 + 1, Edge::zero(), prev);
            prev = self.make_node(2 * k as u8, low, high);
        }
        prev
    }

    /// The n-qubit identity operator.
    pub fn identity_matrix(&self, n: u32) -> Edge {
        check_width(n);
        self.identity_span(0, n)
    }

    /// One single-qubit block at level `k`, row-major entries of `u`, with
    /// `rest` hanging below every nonzero entry.
    fn gate_block(&self, k: u32, u: [num_complex::Complex64; 4], rest: Edge)
        -> Edge
    {
        let a = self.amp_value(rest.amp());
        let e: Vec<Edge> = u.iter()
            .map(|&c| Edge::new(rest.ptr(), self.amp_lookup(a * c)))
            .collect();
        let low = self.make_node(2 * k as u8 + 1, e[0], e[1]);
        let high = self.make_node(2 * k as u8 + 1, e[2], e[3]);
        self.make_node(2 * k as u8, low, high)
    }

    /// The operator applying `g` to qubit `t` and identity elsewhere.
    pub fn single_gate_matrix(&self, n: u32, t: u8, g: GateId) -> Result<Edge> {
        check_width(n);
        if (t as u32) >= n {
            return Err(Error::QubitOutOfRange { idx: t as usize, nvars: n });
        }
        let mut prev = Edge::one();
        for k in (0..n).rev() {
            if k == t as u32 {
                prev = self.gate_block(k, g.matrix(), prev);
            } else {
                let low = self.make_node(2 * k as u8 + 1, prev, Edge::zero());
                let high = self.make_node(2 * k as u8 + 1, Edge::zero(), prev);
                prev = self.make_node(2 * k as u8, low, high);
            }
        }
        Ok(prev)
    }

    /// The operator applying `gates[k]` to qubit `k` for every qubit at once.
    pub fn column_matrix(&self, n: u32, gates: &[GateId]) -> Edge {
        check_width(n);
        assert!(gates.len() >= n as usize);
        let mut prev = Edge::one();
        for k in (0..n).rev() {
            prev = self.gate_block(k, gates[k as usize].matrix(), prev);
        }
        prev
    }

    /// The operator applying `g` to `t` under the (possibly multiple)
    /// `controls`, identity elsewhere.
    ///
    /// Every control must sit strictly above the target; conjugate through
    /// [`swap_matrix`][Self::swap_matrix] first when it does not.
    pub fn cgate_matrix(&self, n: u32, controls: &[u8], t: u8, g: GateId)
        -> Result<Edge>
    {
        check_width(n);
        if (t as u32) >= n {
            return Err(Error::QubitOutOfRange { idx: t as usize, nvars: n });
        }
        for &c in controls {
            if (c as u32) >= n {
                return Err(Error::QubitOutOfRange { idx: c as usize, nvars: n });
            }
            if c >= t {
                return Err(Error::ControlBelowTarget { control: c, target: t });
            }
        }
        Ok(self.cgate_span(n, controls, t, g, 0))
    }

    fn cgate_span(&self, n: u32, controls: &[u8], t: u8, g: GateId, k: u32)
        -> Edge
    {
        if k == t as u32 {
            // everything below the target is identity (controls sit above)
            return self.gate_block(k, g.matrix(), self.identity_span(k + 1, n));
        }
        let rest = self.cgate_span(n, controls, t, g, k + 1);
        if controls.contains(&(k as u8)) {
            // control = 0 half behaves as identity on all remaining qubits
            let ident = self.identity_span(k + 1, n);
            let low = self.make_node(2 * k as u8 + 1, ident, Edge::zero());
            let high = self.make_node(2 * k as u8 + 1, Edge::zero(), rest);
            self.make_node(2 * k as u8, low, high)
        } else {
            let low = self.make_node(2 * k as u8 + 1, rest, Edge::zero());
            let high = self.make_node(2 * k as u8 + 1, Edge::zero(), rest);
            self.make_node(2 * k as u8, low, high)
        }
    }

    /// The operator exchanging qubits `q1 < q2`.
    ///
    /// Composed as CX · H · CZ · H · CX so every controlled factor keeps its
    /// control above its target.
    pub fn swap_matrix(&self, n: u32, q1: u8, q2: u8) -> Result<Edge> {
        assert!(q1 < q2, "swap operands must be given in variable order");
        let cx = self.cgate_matrix(n, &[q1], q2, GateId::X)?;
        let cz = self.cgate_matrix(n, &[q1], q2, GateId::Z)?;
        let h = self.single_gate_matrix(n, q1, GateId::H)?;
        let m = self.matmat(h, cx);
        let m = self.matmat(cz, m);
        let m = self.matmat(h, m);
        Ok(self.matmat(cx, m))
    }

    /// Split a unit-weight matrix edge into its four blocks at level `k`,
    /// row-major, child weights pushed down.
    fn mat_blocks(&self, m: Edge, k: u32) -> [Edge; 4] {
        let (r0, r1) = if self.var_of(m) == 2 * k {
            let n = self.node(m.ptr());
            (n.low(), n.high())
        } else {
            let e = Edge::new(m.ptr(), AMP_ONE);
            (e, e)
        };
        let split = |r: Edge| -> (Edge, Edge) {
            if self.var_of(r) == 2 * k + 1 {
                let n = self.node(r.ptr());
                let c0 = n.low().with_amp(self.amp_mul(r.amp(), n.low().amp()));
                let c1
                    = n.high().with_amp(self.amp_mul(r.amp(), n.high().amp()));
                (c0, c1)
            } else {
                (r, r)
            }
        };
        let (m00, m01) = split(r0);
        let (m10, m11) = split(r1);
        [m00, m01, m10, m11]
    }

    /// Split a unit-weight vector edge into its two sub-vectors at level `k`.
    fn vec_halves(&self, v: Edge, k: u32) -> (Edge, Edge) {
        if self.var_of(v) == k {
            let n = self.node(v.ptr());
            (n.low(), n.high())
        } else {
            let e = Edge::new(v.ptr(), AMP_ONE);
            (e, e)
        }
    }

    /// Apply a matrix diagram to a vector diagram.
    pub fn matvec(&self, m: Edge, v: Edge) -> Edge {
        if m.amp() == AMP_ZERO || v.amp() == AMP_ZERO {
            return Edge::zero();
        }
        // factor the root weights out so cache entries are shared between
        // scaled operands
        let m1 = m.with_amp(AMP_ONE);
        let v1 = v.with_amp(AMP_ONE);
        let res = self.matvec_rec(m1, v1);
        let amp = self.amp_mul(self.amp_mul(m.amp(), v.amp()), res.amp());
        if amp == AMP_ZERO { Edge::zero() } else { res.with_amp(amp) }
    }

    fn matvec_rec(&self, m: Edge, v: Edge) -> Edge {
        if m.is_terminal() && v.is_terminal() {
            return Edge::new(TERMINAL, self.amp_mul(m.amp(), v.amp()));
        }
        let key = CacheKey { op: OpTag::MatVec, x: m.bits(), y: v.bits(), z: 0 };
        if let Some(bits) = self.cache.get(key) { return Edge::from_bits(bits); }

        let k = (self.var_of(m) / 2).min(self.var_of(v));
        let b = self.mat_blocks(m, k);
        let (v0, v1) = self.vec_halves(v, k);
        let (low, high) = rayon::join(
            || self.plus(self.matvec(b[0], v0), self.matvec(b[1], v1)),
            || self.plus(self.matvec(b[2], v0), self.matvec(b[3], v1)),
        );
        let res = self.make_node(k as u8, low, high);
        self.cache.put(key, res.bits());
        res
    }

    /// Product of two matrix diagrams, `a · b` (apply `b` first).
    pub fn matmat(&self, a: Edge, b: Edge) -> Edge {
        if a.amp() == AMP_ZERO || b.amp() == AMP_ZERO {
            return Edge::zero();
        }
        let a1 = a.with_amp(AMP_ONE);
        let b1 = b.with_amp(AMP_ONE);
        let res = self.matmat_rec(a1, b1);
        let amp = self.amp_mul(self.amp_mul(a.amp(), b.amp()), res.amp());
        if amp == AMP_ZERO { Edge::zero() } else { res.with_amp(amp) }
    }

    fn matmat_rec(&self, a: Edge, b: Edge) -> Edge {
        if a.is_terminal() && b.is_terminal() {
            return Edge::new(TERMINAL, self.amp_mul(a.amp(), b.amp()));
        }
        let key = CacheKey { op: OpTag::MatMat, x: a.bits(), y: b.bits(), z: 0 };
        if let Some(bits) = self.cache.get(key) { return Edge::from_bits(bits); }

        let k = (self.var_of(a).min(self.var_of(b))) / 2;
        let ab = self.mat_blocks(a, k);
        let bb = self.mat_blocks(b, k);
        let (c00, c01) = rayon::join(
            || self.plus(self.matmat(ab[0], bb[0]), self.matmat(ab[1], bb[2])),
            || self.plus(self.matmat(ab[0], bb[1]), self.matmat(ab[1], bb[3])),
        );
        let (c10, c11) = rayon::join(
            || self.plus(self.matmat(ab[2], bb[0]), self.matmat(ab[3], bb[2])),
            || self.plus(self.matmat(ab[2], bb[1]), self.matmat(ab[3], bb[3])),
        );
        let low = self.make_node(2 * k as u8 + 1, c00, c01);
        let high = self.make_node(2 * k as u8 + 1, c10, c11);
        let res = self.make_node(2 * k as u8, low, high);
        self.cache.put(key, res.bits());
        res
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn bits(n: u32, x: u64) -> Vec<bool> {
        (0..n).map(|k| x >> k & 1 == 1).collect()
    }

    #[test]
    fn identity_acts_trivially() {
        let qdd = Qdd::default();
        let ident = qdd.identity_matrix(3);
        let mut v = qdd.all_zero_state(3);
        v = qdd.apply_gate(v, GateId::H, 0);
        v = qdd.apply_cgate(v, GateId::X, 0, 2);
        v = qdd.apply_gate(v, GateId::T, 1);
        let w = qdd.matvec(ident, v);
        assert_eq!(w.bits(), v.bits());
    }

    #[test]
    fn single_gate_matrix_matches_apply_gate() {
        let qdd = Qdd::default();
        let gates = [GateId::H, GateId::T, GateId::SqrtX, GateId::Rz(0.4)];
        for (i, g) in gates.into_iter().enumerate() {
            let t = (i % 3) as u8;
            let m = qdd.single_gate_matrix(3, t, g).unwrap();
            let mut v = qdd.all_zero_state(3);
            for k in 0..3 { v = qdd.apply_gate(v, GateId::H, k); }
            let by_matrix = qdd.matvec(m, v);
            let direct = qdd.apply_gate(v, g, t);
            assert!(qdd.equivalent(by_matrix, direct, 3, false),
                "{:?} on qubit {}", g, t);
        }
    }

    #[test]
    fn column_matrix_is_gate_product() {
        let qdd = Qdd::default();
        let gates = [GateId::H, GateId::I, GateId::X];
        let col = qdd.column_matrix(3, &gates);
        let mut v = qdd.basis_state(3, &bits(3, 0b010));
        let w = qdd.matvec(col, v);
        for (k, g) in gates.into_iter().enumerate() {
            v = qdd.apply_gate(v, g, k as u8);
        }
        assert!(qdd.equivalent(w, v, 3, false));
    }

    #[test]
    fn cgate_matrix_matches_apply_cgate() {
        let qdd = Qdd::default();
        let m = qdd.cgate_matrix(2, &[0], 1, GateId::X).unwrap();
        let mut v = qdd.all_zero_state(2);
        v = qdd.apply_gate(v, GateId::H, 0);
        let by_matrix = qdd.matvec(m, v);
        let direct = qdd.apply_cgate(v, GateId::X, 0, 1);
        assert!(qdd.equivalent(by_matrix, direct, 2, false));
    }

    #[test]
    fn toffoli_flips_only_when_both_controls_set() {
        let qdd = Qdd::default();
        let toff = qdd.cgate_matrix(3, &[0, 1], 2, GateId::X).unwrap();
        for x in 0..8_u64 {
            let v = qdd.basis_state(3, &bits(3, x));
            let w = qdd.matvec(toff, v);
            let expect = if x & 0b011 == 0b011 { x ^ 0b100 } else { x };
            let want = qdd.basis_state(3, &bits(3, expect));
            assert!(qdd.equivalent(w, want, 3, false), "input {:03b}", x);
        }
    }

    #[test]
    fn control_below_target_is_rejected() {
        let qdd = Qdd::default();
        assert_eq!(
            qdd.cgate_matrix(3, &[2], 1, GateId::X),
            Err(Error::ControlBelowTarget { control: 2, target: 1 }));
        assert_eq!(
            qdd.cgate_matrix(2, &[0], 5, GateId::X),
            Err(Error::QubitOutOfRange { idx: 5, nvars: 2 }));
    }

    #[test]
    fn swap_matrix_exchanges_qubits() {
        let qdd = Qdd::default();
        let swap = qdd.swap_matrix(3, 0, 2).unwrap();
        for x in 0..8_u64 {
            let v = qdd.basis_state(3, &bits(3, x));
            let w = qdd.matvec(swap, v);
            let b0 = x & 1;
            let b2 = x >> 2 & 1;
            let expect = (x & 0b010) | b0 << 2 | b2;
            let want = qdd.basis_state(3, &bits(3, expect));
            assert!(qdd.equivalent(w, want, 3, false), "input {:03b}", x);
        }
    }

    #[test]
    fn hadamard_squares_to_identity() {
        let qdd = Qdd::default();
        let h = qdd.single_gate_matrix(2, 1, GateId::H).unwrap();
        let hh = qdd.matmat(h, h);
        let ident = qdd.identity_matrix(2);
        let mut v = qdd.all_zero_state(2);
        v = qdd.apply_gate(v, GateId::T, 0);
        v = qdd.apply_gate(v, GateId::H, 1);
        assert!(qdd.equivalent(
            qdd.matvec(hh, v), qdd.matvec(ident, v), 2, false));
    }
}
