//! Bit-level encoding of QDD edges and nodes.
//!
//! An [`Edge`] packs a 40-bit node pointer and a 20-bit amplitude-table index
//! into a single `u64`; a [`Node`] packs its 7-bit variable and two edges into
//! two `u64` words. These widths bound the scale of the whole engine and are
//! exposed as named constants.

use std::fmt;
use crate::amp::{ AmpIdx, AMP_ONE, AMP_ZERO };

/// Number of bits in a node pointer.
pub const PTR_BITS: u32 = 40;

/// Number of bits in an amplitude-table index.
pub const AMP_BITS: u32 = 20;

/// Number of bits in a variable (qubit) index.
pub const VAR_BITS: u32 = 7;

/// Maximum number of nodes the store can address.
pub const MAX_NODES: u64 = 1 << PTR_BITS;

/// Maximum number of entries the amplitude table can address.
pub const MAX_AMPS: u64 = 1 << AMP_BITS;

/// Maximum number of variables (qubits) a diagram can span.
pub const MAX_VARS: u32 = 1 << VAR_BITS;

/// Pointer value of the terminal pseudo-node.
pub const TERMINAL: u64 = 0;

const PTR_MASK: u64 = MAX_NODES - 1;
const AMP_MASK: u64 = (MAX_AMPS - 1) << PTR_BITS;
const EDGE_MASK: u64 = PTR_MASK | AMP_MASK;

/// A reference into the node DAG: a node pointer plus the index of the
/// complex weight carried on the way there.
///
/// A whole diagram is just an `Edge` treated as a root reference.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Edge(u64);

impl Edge {
    /// Bundle a pointer and an amplitude index into an edge.
    ///
    /// *Panics if either value exceeds its field width.*
    pub fn new(ptr: u64, amp: AmpIdx) -> Self {
        assert!(ptr < MAX_NODES, "node pointer exceeds {} bits", PTR_BITS);
        assert!((amp as u64) < MAX_AMPS, "amp index exceeds {} bits", AMP_BITS);
        Self((amp as u64) << PTR_BITS | ptr)
    }

    /// The all-zero edge: terminal pointer, zero weight.
    pub fn zero() -> Self { Self::new(TERMINAL, AMP_ZERO) }

    /// The unit terminal edge: terminal pointer, unit weight.
    pub fn one() -> Self { Self::new(TERMINAL, AMP_ONE) }

    pub fn ptr(self) -> u64 { self.0 & PTR_MASK }

    pub fn amp(self) -> AmpIdx { ((self.0 & AMP_MASK) >> PTR_BITS) as AmpIdx }

    pub fn is_terminal(self) -> bool { self.ptr() == TERMINAL }

    /// Replace the amplitude index, keeping the pointer.
    pub fn with_amp(self, amp: AmpIdx) -> Self { Self::new(self.ptr(), amp) }

    /// Raw bit pattern, used as cache-key material.
    pub fn bits(self) -> u64 { self.0 }

    pub fn from_bits(bits: u64) -> Self {
        debug_assert_eq!(bits & !EDGE_MASK, 0);
        Self(bits & EDGE_MASK)
    }
}

impl fmt::Debug for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Edge(ptr={:#x}, amp={})", self.ptr(), self.amp())
    }
}

/// An interned decision-diagram vertex: a variable index and two child edges,
/// packed into two `u64` words.
///
/// The variable is split across the words (bottom 4 bits in the low word, top
/// 3 bits in the high word); the high word's top bit is reserved. Nodes are
/// immutable once interned and are only ever created through
/// [`Qdd::make_node`][crate::qdd::Qdd::make_node].
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Node {
    low: u64,
    high: u64,
}

impl Node {
    /// Pack a variable and two child edges.
    ///
    /// *Panics if `var` exceeds [`VAR_BITS`] bits.*
    pub fn new(var: u8, low: Edge, high: Edge) -> Self {
        assert!((var as u32) < MAX_VARS, "variable exceeds {} bits", VAR_BITS);
        let lo = ((var & 0x0f) as u64) << 60 | low.bits();
        let hi = ((var & 0x70) as u64) << 56 | high.bits();
        Self { low: lo, high: hi }
    }

    pub fn var(self) -> u8 {
        ((self.low >> 60) | ((self.high >> 56) & 0x70)) as u8
    }

    pub fn low(self) -> Edge { Edge::from_bits(self.low & EDGE_MASK) }

    pub fn high(self) -> Edge { Edge::from_bits(self.high & EDGE_MASK) }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node(var={}, low={:?}, high={:?})",
            self.var(), self.low(), self.high())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn edge_roundtrip() {
        let e = Edge::new(0x00ab_cdef_0123, 0xf_4321);
        assert_eq!(e.ptr(), 0x00ab_cdef_0123);
        assert_eq!(e.amp(), 0xf_4321);
        assert_eq!(Edge::from_bits(e.bits()), e);
        assert_eq!(e.with_amp(AMP_ONE).amp(), AMP_ONE);
        assert_eq!(e.with_amp(AMP_ONE).ptr(), e.ptr());
    }

    #[test]
    fn node_roundtrip() {
        let low = Edge::new(17, 3);
        let high = Edge::new(0x00ff_ffff_fffe, 0xf_ffff);
        for var in [0_u8, 1, 15, 16, 64, 127] {
            let n = Node::new(var, low, high);
            assert_eq!(n.var(), var);
            assert_eq!(n.low(), low);
            assert_eq!(n.high(), high);
        }
    }

    #[test]
    fn terminal_edges() {
        assert!(Edge::zero().is_terminal());
        assert!(Edge::one().is_terminal());
        assert_eq!(Edge::zero().amp(), AMP_ZERO);
        assert_eq!(Edge::one().amp(), AMP_ONE);
    }
}
