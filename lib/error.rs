//! Recoverable error conditions surfaced to callers.
//!
//! Resource exhaustion and invariant violations are *not* represented here:
//! those are fatal by design and panic with a diagnostic instead (a full
//! unique table or a non-unit probability mass cannot be recovered from
//! without corrupting the canonical-sharing invariant).

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// A controlled gate asked for more controls than the structurally
    /// supported maximum.
    #[error("controlled gates with more than {max} controls are not implemented (got {got})")]
    TooManyControls { got: usize, max: usize },

    /// A qubit index referenced a line outside the register.
    #[error("qubit index {idx} out of range for {nvars} qubits")]
    QubitOutOfRange { idx: usize, nvars: u32 },

    /// A controlled-gate matrix was requested with a control at or below its
    /// target; callers must conjugate through a swap first.
    #[error("control qubit {control} must sit above target {target}")]
    ControlBelowTarget { control: u8, target: u8 },
}

pub type Result<T> = std::result::Result<T, Error>;
