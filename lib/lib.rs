//! Simulation of quantum states and circuits based on hash-consed,
//! edge-weighted binary decision diagrams.
//!
//! A state vector over n qubits is stored as a reduced diagram whose nodes
//! branch on one qubit each and whose edges carry complex weights drawn from
//! a deduplicating amplitude table; the amplitude of a basis state is the
//! product of the weights along its path. Equal sub-states share structure,
//! so states with few distinct sub-vectors (stabilizer-like states, Fourier
//! states, the intermediate states of arithmetic circuits) stay exponentially
//! smaller than their dense vectors.
//!
//! The central type is [`Qdd`], which owns the node and amplitude tables and
//! offers gate application, measurement, operator (matrix) diagrams, and a
//! handful of algorithm drivers (QFT, Grover search, Shor period finding).
//! Diagrams themselves are lightweight [`Edge`] handles into the engine.
//!
//! ```
//! use qudd::{ Qdd, GateId };
//!
//! let qdd = Qdd::default();
//!
//! // Bell state: H on qubit 0, then CNOT
//! let q = qdd.all_zero_state(2);
//! let q = qdd.apply_gate(q, GateId::H, 0);
//! let q = qdd.apply_cgate(q, GateId::X, 0, 1);
//!
//! let amp = qdd.get_amplitude(q, &[true, true]);
//! assert!((amp.re - 0.5_f64.sqrt()).abs() < 1e-12);
//! assert!(qdd.is_unit_vector(q, 2));
//! ```

pub mod error;
pub use error::{ Error, Result };

pub mod node;
pub use node::Edge;

pub mod amp;
pub mod store;
pub mod cache;

pub mod gate;
pub use gate::GateId;

pub mod qdd;
pub use qdd::{ Qdd, QddConfig };

pub mod matrix;

pub mod circuit;
pub use circuit::{
    CircuitId, Controls, GateSeq, Histogram, SeqOp, ShorEnv, MAX_CONTROLS,
};

pub mod graph;
