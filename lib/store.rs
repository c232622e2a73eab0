//! Hash-consed node store.
//!
//! Thin stand-in for the external unique-table substrate: a content-keyed
//! map guaranteeing at most one stored node per distinct (variable, low,
//! high) tuple. Slot 0 is reserved for the terminal pseudo-node. The store
//! is append-only; reclamation is out of scope here, so filling up is fatal.

use rustc_hash::FxHashMap;
use crate::node::{ Edge, Node, MAX_NODES, TERMINAL };

/// Unique table mapping node content to a canonical pointer.
#[derive(Clone, Debug)]
pub struct NodeStore {
    nodes: Vec<Node>,
    index: FxHashMap<Node, u64>,
    capacity: usize,
}

impl NodeStore {
    /// Create a store holding at most `capacity` nodes (terminal included).
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 2, "node store needs room beyond the terminal");
        assert!(capacity as u64 <= MAX_NODES,
            "node store capacity exceeds pointer width");
        let mut nodes = Vec::new();
        // slot 0: terminal placeholder, never looked up by content
        nodes.push(Node::new(0, Edge::zero(), Edge::zero()));
        Self { nodes, index: FxHashMap::default(), capacity }
    }

    /// Number of live slots, terminal included.
    pub fn len(&self) -> usize { self.nodes.len() }

    // always false: the terminal placeholder occupies slot 0 from creation
    pub fn is_empty(&self) -> bool { self.nodes.is_empty() }

    pub fn capacity(&self) -> usize { self.capacity }

    /// The node stored at `ptr`.
    ///
    /// *Panics if `ptr` is the terminal or was never issued.*
    pub fn get(&self, ptr: u64) -> Node {
        assert_ne!(ptr, TERMINAL, "terminal edge has no node");
        self.nodes[ptr as usize]
    }

    /// Pointer of an already-interned node, if any.
    pub fn find(&self, node: &Node) -> Option<u64> {
        self.index.get(node).copied()
    }

    /// Find-or-insert by content.
    ///
    /// *Panics (fatal resource exhaustion) if the table is full.*
    pub fn intern(&mut self, node: Node) -> u64 {
        if let Some(ptr) = self.index.get(&node) { return *ptr; }
        if self.nodes.len() >= self.capacity {
            panic!("node unique table full: {} of {} buckets filled",
                self.nodes.len(), self.capacity);
        }
        let ptr = self.nodes.len() as u64;
        self.nodes.push(node);
        self.index.insert(node, ptr);
        ptr
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::amp::{ AMP_ONE, AMP_ZERO };

    #[test]
    fn intern_is_idempotent() {
        let mut store = NodeStore::new(16);
        let n = Node::new(3, Edge::new(TERMINAL, AMP_ONE), Edge::zero());
        let p = store.intern(n);
        assert_eq!(store.intern(n), p);
        assert_eq!(store.find(&n), Some(p));
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(p), n);
    }

    #[test]
    fn distinct_content_distinct_pointer() {
        let mut store = NodeStore::new(16);
        let a = Node::new(0, Edge::one(), Edge::zero());
        let b = Node::new(0, Edge::zero(), Edge::one());
        let c = Node::new(1, Edge::one(), Edge::zero());
        let pa = store.intern(a);
        let pb = store.intern(b);
        let pc = store.intern(c);
        assert_ne!(pa, pb);
        assert_ne!(pa, pc);
        assert_ne!(pb, pc);
    }

    #[test]
    #[should_panic(expected = "unique table full")]
    fn exhaustion_is_fatal() {
        let mut store = NodeStore::new(2);
        store.intern(Node::new(0, Edge::one(), Edge::zero()));
        store.intern(Node::new(1, Edge::one(), Edge::zero()));
    }

    #[test]
    fn zero_amp_zero_edge_nodes_allowed() {
        // the reduction rule lives in make_node, not here
        let mut store = NodeStore::new(4);
        let n = Node::new(5, Edge::zero(), Edge::new(TERMINAL, AMP_ZERO));
        let p = store.intern(n);
        assert_eq!(store.get(p).var(), 5);
    }
}
