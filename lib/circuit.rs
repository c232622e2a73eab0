//! Named sub-circuits, controlled sub-circuit application, and the
//! algorithm-level drivers (Grover search, Shor period finding, and a
//! gate-sequence runner with measurement histograms).
//!
//! Sub-circuits are applied gate by gate, but a whole sub-circuit can also be
//! placed under up to [`MAX_CONTROLS`] control qubits structurally: the
//! recursion descends the control qubits' high branches and dispatches the
//! sub-circuit on the remaining sub-diagram, without ever expanding the
//! controlled operator.

use std::fmt;
use itertools::Itertools;
use rand::Rng;
use rustc_hash::FxHashMap;
use crate::{
    amp::AMP_ONE,
    cache::{ CacheKey, OpTag },
    error::{ Error, Result },
    gate::GateId,
    node::{ Edge, MAX_VARS },
    qdd::Qdd,
};

/// Structural limit on the number of controls of a controlled sub-circuit.
pub const MAX_CONTROLS: usize = 3;

/// Identifier of a named sub-circuit, for controlled application and
/// memoization.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CircuitId {
    /// Swap two qubits.
    Swap,
    /// Reverse the order of a qubit range by pairwise swaps.
    SwapRange,
    /// Quantum Fourier transform on a qubit range (no final reversal).
    Qft,
    /// Inverse quantum Fourier transform (no initial reversal).
    QftInv,
    /// Fourier-space addition of the constant `a`.
    PhiAddA,
    /// Fourier-space addition of the modulus.
    PhiAddN,
    /// Fourier-space subtraction of the constant `a`.
    PhiAddAInv,
    /// Fourier-space subtraction of the modulus.
    PhiAddNInv,
}

impl CircuitId {
    fn key(self) -> u64 {
        match self {
            Self::Swap => 0,
            Self::SwapRange => 1,
            Self::Qft => 2,
            Self::QftInv => 3,
            Self::PhiAddA => 4,
            Self::PhiAddN => 5,
            Self::PhiAddAInv => 6,
            Self::PhiAddNInv => 7,
        }
    }
}

/// Up to [`MAX_CONTROLS`] control qubits, in ascending variable order.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Controls {
    qubits: [Option<u8>; MAX_CONTROLS],
}

impl Controls {
    pub fn new(cs: &[u8]) -> Result<Self> {
        if cs.len() > MAX_CONTROLS {
            return Err(Error::TooManyControls {
                got: cs.len(),
                max: MAX_CONTROLS,
            });
        }
        let mut qubits = [None; MAX_CONTROLS];
        for (slot, &c) in qubits.iter_mut().zip(cs.iter()) {
            *slot = Some(c);
        }
        Ok(Self { qubits })
    }

    pub fn single(c: u8) -> Self {
        Self { qubits: [Some(c), None, None] }
    }

    pub fn pair(c1: u8, c2: u8) -> Self {
        Self { qubits: [Some(c1), Some(c2), None] }
    }

    fn get(&self, i: usize) -> Option<u8> {
        self.qubits.get(i).copied().flatten()
    }

    /// One byte per slot, `0xff` for an empty slot.
    fn bits(&self) -> u64 {
        self.qubits.iter().enumerate()
            .map(|(i, &c)| c.map(u64::from).unwrap_or(0xff) << (8 * i))
            .sum()
    }
}

/// Bit patterns of the two constants added by the Fourier adders, in the
/// adders' register order: overflow bit first, then MSB down to LSB, so that
/// element 0 lands on the top qubit of the target range.
///
/// These are runtime parameters that deliberately stay *outside* the
/// memoization key; callers that change them must clear the operation cache
/// first (see [`Qdd::phi_add_mod`]).
pub struct PhiParams {
    bits_a: Vec<bool>,
    bits_n: Vec<bool>,
}

impl PhiParams {
    fn new(a: u64, modulus: u64, nbits: u32) -> Self {
        let len = nbits as usize + 1;
        Self { bits_a: bit_vec(a, len), bits_n: bit_vec(modulus, len) }
    }
}

// value -> bit vector of length `len`, highest bit first
fn bit_vec(x: u64, len: usize) -> Vec<bool> {
    (0..len).rev().map(|i| i < 64 && x >> i & 1 == 1).collect()
}

impl Qdd {
    /// Swap qubits `q1 < q2` by three CNOTs, the middle one upside down
    /// (realized as H·CZ·H so its control keeps sitting above its target).
    pub fn circuit_swap(&self, q: Edge, q1: u8, q2: u8) -> Edge {
        assert!(q1 < q2, "swap operands must be given in variable order");
        let res = self.apply_cgate(q, GateId::X, q1, q2);
        let res = self.apply_gate(res, GateId::H, q1);
        let res = self.apply_cgate(res, GateId::Z, q1, q2);
        let res = self.apply_gate(res, GateId::H, q1);
        self.apply_cgate(res, GateId::X, q1, q2)
    }

    /// Reverse the order of qubits `first..=last`.
    pub fn circuit_swap_range(&self, q: Edge, first: u8, last: u8) -> Edge {
        assert!(first <= last, "swap range bounds must be given in order");
        let mut res = q;
        let num_qubits = (last - first) + 1;
        for j in 0..num_qubits / 2 {
            res = self.circuit_swap(res, first + j, last - j);
        }
        res
    }

    /// Quantum Fourier transform on `first..=last`.
    ///
    /// The qubit order is *not* reversed afterwards; compose with
    /// [`circuit_swap_range`][Self::circuit_swap_range] when the textbook
    /// ordering is needed.
    pub fn circuit_qft(&self, q: Edge, first: u8, last: u8) -> Edge {
        let mut res = q;
        for a in first..=last {
            res = self.apply_gate(res, GateId::H, a);
            // conditional phases against all qubits below; the controlled
            // phase is symmetric, so the upper qubit can act as control
            for b in a + 1..=last {
                let k = (b - a) as u32 + 1;
                res = self.apply_cgate(res, GateId::Rk(k), a, b);
            }
        }
        res
    }

    /// Inverse quantum Fourier transform on `first..=last`.
    pub fn circuit_qft_inv(&self, q: Edge, first: u8, last: u8) -> Edge {
        let mut res = q;
        for a in (first..=last).rev() {
            for b in (a + 1..=last).rev() {
                let k = (b - a) as u32 + 1;
                res = self.apply_cgate(res, GateId::RkDag(k), a, b);
            }
            res = self.apply_gate(res, GateId::H, a);
        }
        res
    }

    /// Fourier-space addition: with the register `first..=last` in Fourier
    /// basis, adds the constant whose bits are `a` by single-qubit phases
    /// only.
    pub fn phi_add(&self, q: Edge, first: u8, last: u8, a: &[bool]) -> Edge {
        let mut res = q;
        let num_qubits = (last - first) as usize + 1;
        for i in 0..num_qubits {
            let qubit = first + i as u8;
            for j in i..num_qubits {
                if a.get(j).copied().unwrap_or(false) {
                    let k = (j - i) as u32 + 1;
                    res = self.apply_gate(res, GateId::Rk(k), qubit);
                }
            }
        }
        res
    }

    /// Inverse of [`phi_add`][Self::phi_add]; all factors are commuting
    /// phases, so this is the same gate pattern with negated angles.
    pub fn phi_add_inv(&self, q: Edge, first: u8, last: u8, a: &[bool])
        -> Edge
    {
        let mut res = q;
        let num_qubits = (last - first) as usize + 1;
        for i in 0..num_qubits {
            let qubit = first + i as u8;
            for j in i..num_qubits {
                if a.get(j).copied().unwrap_or(false) {
                    let k = (j - i) as u32 + 1;
                    res = self.apply_gate(res, GateId::RkDag(k), qubit);
                }
            }
        }
        res
    }

    /// Dispatch a named sub-circuit on targets `t1`, `t2` (a qubit pair for
    /// the swaps, a register range for the others).
    ///
    /// *Panics if a Fourier-adder id is dispatched without its parameters.*
    pub fn circuit(
        &self,
        q: Edge,
        circ: CircuitId,
        t1: u8,
        t2: u8,
        params: Option<&PhiParams>,
    ) -> Edge {
        let phi = || match params {
            Some(p) => p,
            None => panic!("Fourier adders need their constant bits"),
        };
        match circ {
            CircuitId::Swap => self.circuit_swap(q, t1, t2),
            CircuitId::SwapRange => self.circuit_swap_range(q, t1, t2),
            CircuitId::Qft => self.circuit_qft(q, t1, t2),
            CircuitId::QftInv => self.circuit_qft_inv(q, t1, t2),
            CircuitId::PhiAddA => self.phi_add(q, t1, t2, &phi().bits_a),
            CircuitId::PhiAddN => self.phi_add(q, t1, t2, &phi().bits_n),
            CircuitId::PhiAddAInv
                => self.phi_add_inv(q, t1, t2, &phi().bits_a),
            CircuitId::PhiAddNInv
                => self.phi_add_inv(q, t1, t2, &phi().bits_n),
        }
    }

    /// Apply a named sub-circuit under the given control qubits.
    ///
    /// All controls must sit above the sub-circuit's target range; the
    /// recursion consumes controls in ascending order and dispatches the
    /// sub-circuit on each sub-diagram below the last control's high branch.
    pub fn ccircuit(
        &self,
        q: Edge,
        circ: CircuitId,
        cs: &Controls,
        t1: u8,
        t2: u8,
        params: Option<&PhiParams>,
    ) -> Edge {
        self.ccircuit_rec(q, circ, cs, 0, t1, t2, params)
    }

    fn ccircuit_rec(
        &self,
        q: Edge,
        circ: CircuitId,
        cs: &Controls,
        ci: usize,
        t1: u8,
        t2: u8,
        params: Option<&PhiParams>,
    ) -> Edge {
        let key = CacheKey {
            op: OpTag::SubCircuit,
            x: circ.key()
                | (t1 as u64) << 8
                | (t2 as u64) << 16
                | cs.bits() << 24
                | (ci as u64) << 48,
            y: q.bits(),
            z: 0,
        };
        if let Some(bits) = self.cache.get(key) { return Edge::from_bits(bits); }

        let res = match cs.get(ci) {
            // controls exhausted: the sub-circuit itself folds the root
            // amplitude of `q` into its result
            None => self.circuit(q, circ, t1, t2, params),
            Some(c) => {
                let var = self.var_of(q);
                let skipped = var > c as u32;
                let (mut low, mut high, var, control_here) = if skipped {
                    let e = Edge::new(q.ptr(), AMP_ONE);
                    (e, e, c, true)
                } else {
                    let n = self.node(q.ptr());
                    (n.low(), n.high(), n.var(), var == c as u32)
                };
                if control_here {
                    high = self.ccircuit_rec(
                        high, circ, cs, ci + 1, t1, t2, params);
                } else {
                    let (l, h) = rayon::join(
                        || self.ccircuit_rec(low, circ, cs, ci, t1, t2, params),
                        || self.ccircuit_rec(
                            high, circ, cs, ci, t1, t2, params),
                    );
                    low = l;
                    high = h;
                }
                let res = self.make_node(var, low, high);
                res.with_amp(self.amp_mul(q.amp(), res.amp()))
            }
        };
        self.cache.put(key, res.bits());
        res
    }

    /// Negate the amplitude of the single basis state `x` of an `n`-qubit
    /// diagram (a phase controlled on every qubit at once).
    pub fn all_control_phase(&self, q: Edge, n: u32, x: &[bool]) -> Edge {
        self.all_control_phase_rec(q, 0, n, x)
    }

    fn all_control_phase_rec(&self, q: Edge, k: u32, n: u32, x: &[bool])
        -> Edge
    {
        assert!(k < n);
        let skipped = self.var_of(q) > k;
        let (mut low, mut high) = if skipped {
            let e = Edge::new(q.ptr(), AMP_ONE);
            (e, e)
        } else {
            let nd = self.node(q.ptr());
            (nd.low(), nd.high())
        };

        if k == n - 1 {
            if x[k as usize] {
                high = high.with_amp(self.amp_neg(high.amp()));
            } else {
                low = low.with_amp(self.amp_neg(low.amp()));
            }
        } else if x[k as usize] {
            high = self.all_control_phase_rec(high, k + 1, n, x);
        } else {
            low = self.all_control_phase_rec(low, k + 1, n, x);
        }

        let res = self.make_node(k as u8, low, high);
        res.with_amp(self.amp_mul(q.amp(), res.amp()))
    }

    /* Grover search */

    fn grover_iteration(&self, q: Edge, n: u32, flag: &[bool]) -> Edge {
        // oracle: phase flip on the flagged state
        let mut q = self.all_control_phase(q, n, flag);
        for k in 0..n { q = self.apply_gate(q, GateId::H, k as u8); }
        // reflection about the mean: phase on everything except ∣0…0⟩
        let zeros = vec![false; n as usize];
        q = self.all_control_phase(q, n, &zeros);
        q = q.with_amp(self.amp_neg(q.amp()));
        for k in 0..n { q = self.apply_gate(q, GateId::H, k as u8); }
        q
    }

    /// Grover search for the flagged basis state, ⌊π/4·√2ⁿ⌋ iterations from
    /// the uniform superposition.
    pub fn grover(&self, n: u32, flag: &[bool]) -> Edge {
        let r = (std::f64::consts::FRAC_PI_4
            * ((1_u64 << n) as f64).sqrt()).floor() as u32;
        let mut q = self.all_zero_state(n);
        for k in 0..n { q = self.apply_gate(q, GateId::H, k as u8); }
        for _ in 0..r { q = self.grover_iteration(q, n, flag); }
        q
    }
}

/* Shor period finding */

/// Wire layout of the period-finding circuit.
#[derive(Copy, Clone, Debug)]
pub struct ShorWires {
    /// Semiclassical control qubit, measured and reset every round.
    pub top: u8,
    pub ctrl_first: u8,
    pub ctrl_last: u8,
    /// Overflow helper of the modular adder.
    pub helper: u8,
    pub targ_first: u8,
    pub targ_last: u8,
}

/// Fixed parameters of one period-finding run: the modulus, its bit width,
/// and the wire layout derived from it.
#[derive(Copy, Clone, Debug)]
pub struct ShorEnv {
    pub modulus: u64,
    pub nbits: u32,
    pub wires: ShorWires,
}

impl ShorEnv {
    pub fn new(modulus: u64) -> Self {
        assert!(modulus >= 3, "modulus too small to factor");
        let nbits = 64 - (modulus - 1).leading_zeros();
        assert!(2 * nbits + 3 <= MAX_VARS as u32,
            "modulus needs more qubits than the variable space has");
        let n = nbits as u8;
        let wires = ShorWires {
            top: 0,
            ctrl_first: 1,
            ctrl_last: n,
            helper: n + 1,
            targ_first: n + 2,
            targ_last: 2 * n + 2,
        };
        Self { modulus, nbits, wires }
    }

    pub fn num_qubits(&self) -> u32 { 2 * self.nbits + 3 }
}

fn mulmod(a: u64, b: u64, m: u64) -> u64 {
    (a as u128 * b as u128 % m as u128) as u64
}

/// Multiplicative inverse of `a` modulo `n` by the extended Euclidean
/// algorithm.
///
/// *Panics if `a` is not invertible modulo `n`.*
pub fn inverse_mod(a: u64, n: u64) -> u64 {
    let (mut t, mut newt): (i64, i64) = (0, 1);
    let (mut r, mut newr): (i64, i64) = (n as i64, a as i64);
    while newr != 0 {
        let quotient = r / newr;
        (t, newt) = (newt, t - quotient * newt);
        (r, newr) = (newr, r - quotient * newr);
    }
    assert!(r <= 1, "{} is not invertible modulo {}", a, n);
    if t < 0 { t += n as i64; }
    t as u64
}

pub fn gcd(mut a: u64, mut b: u64) -> u64 {
    while a != 0 {
        (a, b) = (b % a, a);
    }
    b
}

impl Qdd {
    /// Doubly controlled modular adder: adds `a` mod the modulus to the
    /// Fourier-basis target register when both controls in `cs` are set.
    ///
    /// The adder's constant stays outside the memoization key, so the whole
    /// operation cache is cleared up front; within one call the cached
    /// entries are consistent.
    pub fn phi_add_mod(&self, q: Edge, cs: &Controls, a: u64, env: &ShorEnv)
        -> Edge
    {
        self.cache.clear();
        let params = PhiParams::new(a, env.modulus, env.nbits);
        let p = Some(&params);
        let w = env.wires;
        let (tf, tl) = (w.targ_first, w.targ_last);

        let mut q = self.ccircuit(q, CircuitId::PhiAddA, cs, tf, tl, p);
        q = self.circuit(q, CircuitId::PhiAddNInv, tf, tl, p);
        q = self.circuit_qft_inv(q, tf, tl);
        // copy the would-be sign bit into the helper (CNOT with the control
        // below the target, via H·CZ·H)
        q = self.apply_gate(q, GateId::H, w.helper);
        q = self.apply_cgate(q, GateId::Z, w.helper, tf);
        q = self.apply_gate(q, GateId::H, w.helper);
        q = self.circuit_qft(q, tf, tl);
        let helper_cs = Controls::single(w.helper);
        q = self.ccircuit(q, CircuitId::PhiAddN, &helper_cs, tf, tl, p);
        q = self.ccircuit(q, CircuitId::PhiAddAInv, cs, tf, tl, p);
        // uncompute the helper
        q = self.circuit_qft_inv(q, tf, tl);
        q = self.apply_gate(q, GateId::X, tf);
        q = self.apply_gate(q, GateId::H, w.helper);
        q = self.apply_cgate(q, GateId::Z, w.helper, tf);
        q = self.apply_gate(q, GateId::H, w.helper);
        q = self.apply_gate(q, GateId::X, tf);
        q = self.circuit_qft(q, tf, tl);
        self.ccircuit(q, CircuitId::PhiAddA, cs, tf, tl, p)
    }

    /// Inverse of [`phi_add_mod`][Self::phi_add_mod]: the same thirteen
    /// steps, each inverted, in reverse order.
    pub fn phi_add_mod_inv(&self, q: Edge, cs: &Controls, a: u64, env: &ShorEnv)
        -> Edge
    {
        self.cache.clear();
        let params = PhiParams::new(a, env.modulus, env.nbits);
        let p = Some(&params);
        let w = env.wires;
        let (tf, tl) = (w.targ_first, w.targ_last);

        let mut q = self.ccircuit(q, CircuitId::PhiAddAInv, cs, tf, tl, p);
        q = self.circuit_qft_inv(q, tf, tl);
        q = self.apply_gate(q, GateId::X, tf);
        q = self.apply_gate(q, GateId::H, w.helper);
        q = self.apply_cgate(q, GateId::Z, w.helper, tf);
        q = self.apply_gate(q, GateId::H, w.helper);
        q = self.apply_gate(q, GateId::X, tf);
        q = self.circuit_qft(q, tf, tl);
        q = self.ccircuit(q, CircuitId::PhiAddA, cs, tf, tl, p);
        let helper_cs = Controls::single(w.helper);
        q = self.ccircuit(q, CircuitId::PhiAddNInv, &helper_cs, tf, tl, p);
        q = self.circuit_qft_inv(q, tf, tl);
        q = self.apply_gate(q, GateId::H, w.helper);
        q = self.apply_cgate(q, GateId::Z, w.helper, tf);
        q = self.apply_gate(q, GateId::H, w.helper);
        q = self.circuit_qft(q, tf, tl);
        q = self.circuit(q, CircuitId::PhiAddN, tf, tl, p);
        self.ccircuit(q, CircuitId::PhiAddAInv, cs, tf, tl, p)
    }

    /// Controlled modular multiplication of the target register by `a`,
    /// controlled on the top wire: a cascade of doubly controlled modular
    /// adders of `a·2^k` between a QFT pair.
    pub fn cmult(&self, q: Edge, a: u64, env: &ShorEnv) -> Edge {
        let w = env.wires;
        let mut q = self.circuit_qft(q, w.targ_first, w.targ_last);
        let mut t = a;
        for i in w.ctrl_first..=w.ctrl_last {
            let cs = Controls::pair(w.top, i);
            q = self.phi_add_mod(q, &cs, t, env);
            t = mulmod(2, t, env.modulus);
        }
        self.circuit_qft_inv(q, w.targ_first, w.targ_last)
    }

    /// The adder-inverted counterpart of [`cmult`][Self::cmult], used with
    /// the inverse base to uncompute the control register.
    pub fn cmult_inv(&self, q: Edge, a: u64, env: &ShorEnv) -> Edge {
        let w = env.wires;
        let mut q = self.circuit_qft(q, w.targ_first, w.targ_last);
        let mut t = a;
        for i in w.ctrl_first..=w.ctrl_last {
            let cs = Controls::pair(w.top, i);
            q = self.phi_add_mod_inv(q, &cs, t, env);
            t = mulmod(2, t, env.modulus);
        }
        self.circuit_qft_inv(q, w.targ_first, w.targ_last)
    }

    /// Controlled modular exponentiation step U_a: multiply by `a`, swap the
    /// registers under the top-wire control, then uncompute with a⁻¹.
    pub fn shor_ua(&self, q: Edge, a: u64, env: &ShorEnv) -> Edge {
        let w = env.wires;
        let mut q = self.cmult(q, a, env);
        let cs = Controls::single(w.top);
        // pair the x register with the accumulator bit for bit: x bit 2^k
        // sits at ctrl_first + k, the accumulator's at targ_last - k
        for i in w.ctrl_first..=w.ctrl_last {
            let t = w.targ_last - (i - w.ctrl_first);
            q = self.ccircuit(q, CircuitId::Swap, &cs, i, t, None);
        }
        let a_inv = inverse_mod(a, env.modulus);
        self.cmult_inv(q, a_inv, env)
    }

    /// Semiclassical quantum period finding for f(x) = aˣ mod `modulus`.
    ///
    /// Runs 2n rounds over a single control wire, each round applying the
    /// controlled U_{a^{2^i}}, phase corrections conditioned on earlier
    /// outcomes, and a measurement of the control. Returns the measured
    /// integer m, for which m/2^{2n} approximates a multiple of 1/r with r
    /// the period.
    pub fn shor_period_finding<R>(&self, a: u64, modulus: u64, rng: &mut R)
        -> u64
    where R: Rng + ?Sized
    {
        let env = ShorEnv::new(modulus);
        let rounds = 2 * env.nbits as usize;
        let nq = env.num_qubits();

        // x register starts at 1, helper and accumulator at 0
        let mut x = vec![false; nq as usize];
        x[env.wires.ctrl_first as usize] = true;
        let mut q = self.basis_state(nq, &x);

        // powers a^{2^i}, most significant round first
        let mut pows = vec![0_u64; rounds];
        pows[rounds - 1] = a;
        let mut t = a;
        for i in (0..rounds - 1).rev() {
            t = mulmod(t, t, modulus);
            pows[i] = t;
        }

        let mut outcomes = vec![false; rounds];
        for i in 0..rounds {
            log::info!("period finding round {}/{}", i + 1, rounds);
            q = self.apply_gate(q, GateId::H, env.wires.top);
            q = self.shor_ua(q, pows[i], &env);

            // semiclassical inverse QFT: phase corrections conditioned on
            // all earlier outcomes
            let mut k = 2;
            for j in (0..i).rev() {
                if outcomes[j] {
                    q = self.apply_gate(q, GateId::RkDag(k), env.wires.top);
                }
                k += 1;
            }
            q = self.apply_gate(q, GateId::H, env.wires.top);

            let (collapsed, outcome, _) = self.measure_qubit0(q, nq, rng);
            outcomes[i] = outcome;
            // reset the control wire to ∣0⟩ for the next round
            q = if outcome {
                self.apply_gate(collapsed, GateId::X, env.wires.top)
            } else {
                collapsed
            };
        }

        let mut res = 0_u64;
        for i in (0..rounds).rev() {
            res = res << 1 | outcomes[i] as u64;
        }
        res
    }

    /// Pick a random base coprime to `modulus` and run period finding with
    /// it. Returns the base and the measured integer.
    pub fn run_shor<R>(&self, modulus: u64, rng: &mut R) -> (u64, u64)
    where R: Rng + ?Sized
    {
        let mut a;
        loop {
            a = rng.gen_range(2..modulus);
            if gcd(a, modulus) == 1 { break; }
        }
        log::info!("period finding modulo {} with base {}", modulus, a);
        (a, self.shor_period_finding(a, modulus, rng))
    }
}

/* gate-sequence runner */

/// One step of a gate sequence.
#[derive(Clone, Debug)]
pub enum SeqOp {
    /// Apply `gate` to `target` under the given controls (empty for a plain
    /// single-qubit gate).
    Gate { gate: GateId, controls: Vec<u8>, target: u8 },
    /// Mark a qubit for readout in the final histogram.
    Measure(u8),
    /// Alignment marker, no effect on the state.
    Barrier,
}

/// A circuit as a flat list of steps over a fixed register width.
#[derive(Clone, Debug)]
pub struct GateSeq {
    pub nvars: u32,
    pub ops: Vec<SeqOp>,
}

/// Measurement counts keyed by outcome string, highest qubit leftmost,
/// `_` for qubits that were never measured.
#[derive(Clone, Debug, Default)]
pub struct Histogram {
    counts: FxHashMap<String, u32>,
}

impl Histogram {
    pub fn count(&self, outcome: &str) -> u32 {
        self.counts.get(outcome).copied().unwrap_or(0)
    }

    pub fn shots(&self) -> u32 { self.counts.values().sum() }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.counts.iter().map(|(k, &v)| (k.as_str(), v))
    }
}

impl fmt::Display for Histogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for key in self.counts.keys().sorted() {
            writeln!(f, "{}  {}", key, self.counts[key])?;
        }
        Ok(())
    }
}

impl Qdd {
    /// The operator for `gate` on `target` under arbitrary `controls`.
    ///
    /// Controls sitting below the target are handled by conjugating the
    /// gate matrix through a swap with the highest involved qubit.
    pub fn controlled_matrix(
        &self,
        n: u32,
        controls: &[u8],
        target: u8,
        gate: GateId,
    ) -> Result<Edge> {
        if controls.is_empty() {
            return self.single_gate_matrix(n, target, gate);
        }
        if controls.len() > MAX_CONTROLS {
            return Err(Error::TooManyControls {
                got: controls.len(),
                max: MAX_CONTROLS,
            });
        }
        let max_c = controls.iter().copied().max().unwrap_or(0);
        if max_c < target {
            return self.cgate_matrix(n, controls, target, gate);
        }
        if max_c == target {
            return Err(Error::ControlBelowTarget {
                control: max_c,
                target,
            });
        }
        if target as u32 >= n {
            return Err(Error::QubitOutOfRange {
                idx: target as usize,
                nvars: n,
            });
        }
        // move the target to the highest involved line, so every control
        // ends up above it
        let swap = self.swap_matrix(n, target, max_c)?;
        let moved: Vec<u8> = controls.iter()
            .map(|&c| if c == max_c { target } else { c })
            .collect();
        let core = self.cgate_matrix(n, &moved, max_c, gate)?;
        Ok(self.matmat(swap, self.matmat(core, swap)))
    }

    /// Run a gate sequence from ∣0…0⟩ and sample `shots` outcomes of the
    /// measured qubits.
    ///
    /// In direct mode gates act on the state diagram where they can (single
    /// qubit, or one control above its target) and fall back to matrix
    /// application otherwise. In matrix mode gate matrices are accumulated
    /// with [`matmat`][Self::matmat] and flushed into the state at barriers,
    /// at the end, and whenever the accumulated operator grows past
    /// `node_limit` nodes.
    pub fn run_circuit<R>(
        &self,
        seq: &GateSeq,
        shots: u32,
        matrix_mode: bool,
        node_limit: Option<u64>,
        rng: &mut R,
    ) -> Result<Histogram>
    where R: Rng + ?Sized
    {
        let n = seq.nvars;
        let mut measured = vec![false; n as usize];
        let mut q = self.all_zero_state(n);
        let mut acc: Option<Edge> = None;
        let mut peak = self.count_nodes(q);

        for op in &seq.ops {
            match op {
                SeqOp::Barrier => {
                    if let Some(a) = acc.take() { q = self.matvec(a, q); }
                    continue;
                }
                SeqOp::Measure(k) => {
                    if *k as u32 >= n {
                        return Err(Error::QubitOutOfRange {
                            idx: *k as usize,
                            nvars: n,
                        });
                    }
                    measured[*k as usize] = true;
                    continue;
                }
                SeqOp::Gate { gate, controls, target } => {
                    if *target as u32 >= n {
                        return Err(Error::QubitOutOfRange {
                            idx: *target as usize,
                            nvars: n,
                        });
                    }
                    match (matrix_mode, controls.as_slice()) {
                        (false, []) => {
                            q = self.apply_gate(q, *gate, *target);
                        }
                        (false, [c]) if c < target => {
                            q = self.apply_cgate(q, *gate, *c, *target);
                        }
                        (false, _) => {
                            let m = self.controlled_matrix(
                                n, controls, *target, *gate)?;
                            q = self.matvec(m, q);
                        }
                        (true, _) => {
                            let m = self.controlled_matrix(
                                n, controls, *target, *gate)?;
                            acc = Some(match acc {
                                None => m,
                                Some(a) => self.matmat(m, a),
                            });
                        }
                    }
                }
            }
            if let (Some(limit), Some(a)) = (node_limit, acc) {
                if self.count_nodes(a) > limit {
                    q = self.matvec(a, q);
                    acc = None;
                }
            }
            peak = peak.max(self.count_nodes(q));
        }
        if let Some(a) = acc.take() { q = self.matvec(a, q); }
        log::debug!("sequence done, peak node count {}", peak);

        Ok(self.final_measure(q, &measured, n, shots, rng))
    }

    /// Sample `shots` outcomes of the marked qubits from a finished state.
    pub fn final_measure<R>(
        &self,
        q: Edge,
        measured: &[bool],
        n: u32,
        shots: u32,
        rng: &mut R,
    ) -> Histogram
    where R: Rng + ?Sized
    {
        let mut counts: FxHashMap<String, u32> = FxHashMap::default();
        for _ in 0..shots {
            let (_, ms, _) = self.measure_all(q, n, rng);
            let key: String = (0..n as usize).rev()
                .map(|k| match (measured[k], ms[k]) {
                    (false, _) => '_',
                    (true, false) => '0',
                    (true, true) => '1',
                })
                .collect();
            *counts.entry(key).or_insert(0) += 1;
        }
        Histogram { counts }
    }
}

#[cfg(test)]
mod test {
    use rand::{ rngs::StdRng, SeedableRng };
    use super::*;

    fn bits(n: u32, x: u64) -> Vec<bool> {
        (0..n).map(|k| x >> k & 1 == 1).collect()
    }

    // value -> bit vector with qubit 0 as the most significant bit, the
    // register convention of the Fourier adder tests
    fn bits_msb(n: u32, x: u64) -> Vec<bool> {
        (0..n).rev().map(|k| x >> k & 1 == 1).collect()
    }

    #[test]
    fn swap_exchanges_basis_states() {
        let qdd = Qdd::default();
        let q = qdd.basis_state(2, &bits(2, 0b01)); // qubit 0 set
        let q = qdd.circuit_swap(q, 0, 1);
        assert!(qdd.equivalent(q, qdd.basis_state(2, &bits(2, 0b10)), 2, false));
    }

    #[test]
    fn swap_range_reverses_register() {
        let qdd = Qdd::default();
        let q = qdd.basis_state(4, &[true, true, false, false]);
        let q = qdd.circuit_swap_range(q, 0, 3);
        let want = qdd.basis_state(4, &[false, false, true, true]);
        assert!(qdd.equivalent(q, want, 4, false));
    }

    #[test]
    #[should_panic(expected = "bounds must be given in order")]
    fn swap_range_rejects_reversed_bounds() {
        let qdd = Qdd::default();
        let _ = qdd.circuit_swap_range(qdd.all_zero_state(3), 2, 0);
    }

    #[test]
    fn qft_of_zero_is_uniform() {
        let qdd = Qdd::default();
        let q = qdd.circuit_qft(qdd.all_zero_state(3), 0, 2);
        let amp = 1.0 / (8.0_f64).sqrt();
        for x in 0..8_u64 {
            let a = qdd.get_amplitude(q, &bits(3, x));
            assert!((a.re - amp).abs() < 1e-12 && a.im.abs() < 1e-12,
                "basis {:03b}: {}", x, a);
        }
    }

    #[test]
    fn qft_roundtrip_is_identity() {
        let qdd = Qdd::default();
        let orig = qdd.basis_state(3, &bits(3, 0b101));
        let q = qdd.circuit_qft(orig, 0, 2);
        let q = qdd.circuit_qft_inv(q, 0, 2);
        assert!(qdd.equivalent(q, orig, 3, false));
        assert!(qdd.is_unit_vector(q, 3));
    }

    #[test]
    fn phi_add_adds_in_fourier_space() {
        let qdd = Qdd::default();
        // 4-qubit register, qubit 0 most significant: 3 + 5 = 8
        let q = qdd.basis_state(4, &bits_msb(4, 3));
        let q = qdd.circuit_qft(q, 0, 3);
        let q = qdd.phi_add(q, 0, 3, &bits_msb(4, 5));
        let q = qdd.circuit_qft_inv(q, 0, 3);
        assert!(qdd.equivalent(q, qdd.basis_state(4, &bits_msb(4, 8)), 4, false));

        // and wrap-around: 12 + 7 = 3 mod 16
        let q = qdd.basis_state(4, &bits_msb(4, 12));
        let q = qdd.circuit_qft(q, 0, 3);
        let q = qdd.phi_add(q, 0, 3, &bits_msb(4, 7));
        let q = qdd.circuit_qft_inv(q, 0, 3);
        assert!(qdd.equivalent(q, qdd.basis_state(4, &bits_msb(4, 3)), 4, false));
    }

    #[test]
    fn phi_add_inv_undoes_phi_add() {
        let qdd = Qdd::default();
        let orig = qdd.basis_state(4, &bits_msb(4, 9));
        let q = qdd.circuit_qft(orig, 0, 3);
        let q = qdd.phi_add(q, 0, 3, &bits_msb(4, 6));
        let q = qdd.phi_add_inv(q, 0, 3, &bits_msb(4, 6));
        let q = qdd.circuit_qft_inv(q, 0, 3);
        assert!(qdd.equivalent(q, orig, 4, false));
    }

    #[test]
    fn controlled_subcircuit_respects_control() {
        let qdd = Qdd::default();
        let cs = Controls::single(0);

        // control set: qubits 1 and 2 swapped
        let q = qdd.basis_state(3, &[true, true, false]);
        let q = qdd.ccircuit(q, CircuitId::Swap, &cs, 1, 2, None);
        let want = qdd.basis_state(3, &[true, false, true]);
        assert!(qdd.equivalent(q, want, 3, false));

        // control clear: untouched
        let q = qdd.basis_state(3, &[false, true, false]);
        let res = qdd.ccircuit(q, CircuitId::Swap, &cs, 1, 2, None);
        assert!(qdd.equivalent(res, q, 3, false));
    }

    #[test]
    fn too_many_controls_rejected() {
        assert!(Controls::new(&[0, 1, 2]).is_ok());
        assert_eq!(
            Controls::new(&[0, 1, 2, 3]),
            Err(Error::TooManyControls { got: 4, max: MAX_CONTROLS }));
    }

    #[test]
    fn all_control_phase_flips_one_amplitude() {
        let qdd = Qdd::default();
        let mut q = qdd.all_zero_state(2);
        for k in 0..2 { q = qdd.apply_gate(q, GateId::H, k); }
        let target = [false, true];
        let q = qdd.all_control_phase(q, 2, &target);
        for x in 0..4_u64 {
            let pattern = bits(2, x);
            let a = qdd.get_amplitude(q, &pattern);
            let expected = if pattern == target { -0.5 } else { 0.5 };
            assert!((a.re - expected).abs() < 1e-12 && a.im.abs() < 1e-12,
                "basis {:02b}: {}", x, a);
        }
    }

    #[test]
    fn grover_amplifies_flagged_state() {
        let qdd = Qdd::default();
        let flag = [true, false, true, false];
        let q = qdd.grover(4, &flag);
        assert!(qdd.is_unit_vector(q, 4));
        let p = qdd.get_amplitude(q, &flag).norm_sqr();
        assert!(p > 0.9, "flagged probability {}", p);
    }

    #[test]
    fn modular_arithmetic_helpers() {
        assert_eq!(gcd(12, 18), 6);
        assert_eq!(gcd(7, 15), 1);
        assert_eq!(inverse_mod(7, 15), 13);
        assert_eq!(mulmod(7, 13, 15), 1);
        assert_eq!(inverse_mod(3, 7), 5);
    }

    // basis pattern for the period-finding wires: control bits as given,
    // helper clear, the accumulator holding `t` in the adders' register order
    fn shor_pattern(env: &ShorEnv, controls_set: bool, t: u64) -> Vec<bool> {
        let w = env.wires;
        let mut x = vec![false; env.num_qubits() as usize];
        x[w.top as usize] = controls_set;
        x[w.ctrl_first as usize] = controls_set;
        for (k, b) in bit_vec(t, env.nbits as usize + 1).iter().enumerate() {
            x[w.targ_first as usize + k] = *b;
        }
        x
    }

    #[test]
    fn phi_add_mod_adds_modulo() {
        let qdd = Qdd::default();
        let env = ShorEnv::new(7);
        let w = env.wires;
        let cs = Controls::pair(w.top, w.ctrl_first);
        let nq = env.num_qubits();

        // 3 + 5 mod 7 = 1
        let q = qdd.basis_state(nq, &shor_pattern(&env, true, 3));
        let q = qdd.circuit_qft(q, w.targ_first, w.targ_last);
        let q = qdd.phi_add_mod(q, &cs, 5, &env);
        let q = qdd.circuit_qft_inv(q, w.targ_first, w.targ_last);
        let a = qdd.get_amplitude(q, &shor_pattern(&env, true, 1));
        assert!((a.norm_sqr() - 1.0).abs() < 1e-9,
            "wrong sum amplitude: {}", a);

        // and the inverse takes it back
        let q = qdd.circuit_qft(q, w.targ_first, w.targ_last);
        let q = qdd.phi_add_mod_inv(q, &cs, 5, &env);
        let q = qdd.circuit_qft_inv(q, w.targ_first, w.targ_last);
        let a = qdd.get_amplitude(q, &shor_pattern(&env, true, 3));
        assert!((a.norm_sqr() - 1.0).abs() < 1e-9,
            "wrong difference amplitude: {}", a);
    }

    #[test]
    fn phi_add_mod_respects_controls() {
        let qdd = Qdd::default();
        let env = ShorEnv::new(7);
        let w = env.wires;
        let cs = Controls::pair(w.top, w.ctrl_first);

        // a clear control makes the whole adder the identity
        let q = qdd.basis_state(env.num_qubits(), &shor_pattern(&env, false, 3));
        let res = qdd.circuit_qft(q, w.targ_first, w.targ_last);
        let res = qdd.phi_add_mod(res, &cs, 5, &env);
        let res = qdd.circuit_qft_inv(res, w.targ_first, w.targ_last);
        let a = qdd.get_amplitude(res, &shor_pattern(&env, false, 3));
        assert!((a.norm_sqr() - 1.0).abs() < 1e-9,
            "control-clear input was modified: {}", a);
    }

    #[test]
    fn shor_ua_multiplies_x_register() {
        let qdd = Qdd::default();
        let env = ShorEnv::new(7);
        let w = env.wires;
        // x = 1, control set: U_a maps x to a·x mod N = 3, uncomputing the
        // helper and the accumulator
        let q = qdd.basis_state(env.num_qubits(), &shor_pattern(&env, true, 0));
        let q = qdd.shor_ua(q, 3, &env);
        let mut want = shor_pattern(&env, true, 0);
        want[w.ctrl_first as usize + 1] = true; // 1 -> 0b011
        let a = qdd.get_amplitude(q, &want);
        assert!((a.norm_sqr() - 1.0).abs() < 1e-9,
            "wrong product amplitude: {}", a);
    }

    #[test]
    fn shor_env_layout() {
        let env = ShorEnv::new(15);
        assert_eq!(env.nbits, 4);
        assert_eq!(env.num_qubits(), 11);
        assert_eq!(env.wires.top, 0);
        assert_eq!(env.wires.ctrl_last, 4);
        assert_eq!(env.wires.helper, 5);
        assert_eq!(env.wires.targ_first, 6);
        assert_eq!(env.wires.targ_last, 10);
    }

    #[test]
    fn shor_measures_period_multiple_for_15() {
        let qdd = Qdd::default();
        let mut rng = StdRng::seed_from_u64(42);
        // a = 7 has period 4 mod 15, so the 8-bit outcome is a multiple
        // of 2^8/4 = 64
        let m = qdd.shor_period_finding(7, 15, &mut rng);
        assert_eq!(m % 64, 0, "measured {}", m);
    }

    #[test]
    fn run_circuit_bell_histogram() {
        let qdd = Qdd::default();
        let seq = GateSeq {
            nvars: 2,
            ops: vec![
                SeqOp::Gate { gate: GateId::H, controls: vec![], target: 0 },
                SeqOp::Gate { gate: GateId::X, controls: vec![0], target: 1 },
                SeqOp::Barrier,
                SeqOp::Measure(0),
                SeqOp::Measure(1),
            ],
        };
        let mut rng = StdRng::seed_from_u64(1);
        let hist = qdd.run_circuit(&seq, 200, false, None, &mut rng).unwrap();
        assert_eq!(hist.shots(), 200);
        assert_eq!(hist.count("01") + hist.count("10"), 0);
        assert!(hist.count("00") > 50 && hist.count("11") > 50);
    }

    #[test]
    fn run_circuit_matrix_mode_agrees() {
        let qdd = Qdd::default();
        // CX with the control below the target forces the swap-conjugated
        // matrix path in both modes
        let ops = vec![
            SeqOp::Gate { gate: GateId::H, controls: vec![], target: 2 },
            SeqOp::Gate { gate: GateId::X, controls: vec![2], target: 0 },
            SeqOp::Measure(0),
            SeqOp::Measure(2),
        ];
        let seq = GateSeq { nvars: 3, ops };
        let mut rng = StdRng::seed_from_u64(5);
        let direct = qdd.run_circuit(&seq, 100, false, None, &mut rng).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let matrix = qdd.run_circuit(&seq, 100, true, None, &mut rng).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        // a tiny node limit forces a flush after every gate
        let flushed
            = qdd.run_circuit(&seq, 100, true, Some(1), &mut rng).unwrap();
        for (key, count) in direct.iter() {
            assert_eq!(count, matrix.count(key), "outcome {}", key);
            assert_eq!(count, flushed.count(key), "outcome {}", key);
        }
        // unmeasured qubit shows as a placeholder
        assert_eq!(direct.count("0_0") + direct.count("1_1"), 100);
    }

    #[test]
    fn run_circuit_rejects_bad_indices() {
        let qdd = Qdd::default();
        let seq = GateSeq {
            nvars: 2,
            ops: vec![
                SeqOp::Gate { gate: GateId::X, controls: vec![], target: 5 },
            ],
        };
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(
            qdd.run_circuit(&seq, 1, false, None, &mut rng).unwrap_err(),
            Error::QubitOutOfRange { idx: 5, nvars: 2 });

        let seq = GateSeq {
            nvars: 6,
            ops: vec![
                SeqOp::Gate {
                    gate: GateId::X,
                    controls: vec![0, 1, 2, 3],
                    target: 4,
                },
            ],
        };
        assert_eq!(
            qdd.run_circuit(&seq, 1, false, None, &mut rng).unwrap_err(),
            Error::TooManyControls { got: 4, max: MAX_CONTROLS });
    }

    #[test]
    fn toffoli_via_controlled_matrix() {
        let qdd = Qdd::default();
        let seq = GateSeq {
            nvars: 3,
            ops: vec![
                SeqOp::Gate { gate: GateId::X, controls: vec![], target: 0 },
                SeqOp::Gate { gate: GateId::X, controls: vec![], target: 1 },
                SeqOp::Gate {
                    gate: GateId::X,
                    controls: vec![0, 1],
                    target: 2,
                },
                SeqOp::Measure(0),
                SeqOp::Measure(1),
                SeqOp::Measure(2),
            ],
        };
        let mut rng = StdRng::seed_from_u64(9);
        let hist = qdd.run_circuit(&seq, 20, false, None, &mut rng).unwrap();
        assert_eq!(hist.count("111"), 20);
    }

    #[test]
    fn histogram_display_sorted() {
        let qdd = Qdd::default();
        let q = qdd.apply_gate(qdd.all_zero_state(1), GateId::H, 0);
        let mut rng = StdRng::seed_from_u64(2);
        let hist = qdd.final_measure(q, &[true], 1, 50, &mut rng);
        let text = format!("{}", hist);
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines.len() <= 2);
        let mut sorted = lines.clone();
        sorted.sort();
        assert_eq!(lines, sorted);
    }
}
