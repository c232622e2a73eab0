//! Single-qubit gate identifiers and their dense 2×2 unitaries.

use std::f64::consts::{ FRAC_1_SQRT_2, FRAC_PI_4, PI };
use num_complex::Complex64 as C64;
use once_cell::sync::Lazy;

/// Identifier of a single-qubit gate.
///
/// Fixed gates carry no parameters; `Rk`/`RkDag` are the phase rotations by
/// ±2π/2^k used by the QFT and Fourier-adder circuits; `Rx`/`Ry`/`Rz` carry a
/// continuous rotation angle.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum GateId {
    /// Identity
    I,
    /// Pauli X
    X,
    /// Pauli Y
    Y,
    /// Pauli Z
    Z,
    /// Hadamard
    H,
    /// Phase gate, i on ∣1⟩
    S,
    /// Inverse phase gate
    Sdag,
    /// π/8 gate, e^{iπ/4} on ∣1⟩
    T,
    /// Inverse π/8 gate
    Tdag,
    /// Square root of X
    SqrtX,
    /// Square root of Y
    SqrtY,
    /// Phase rotation by 2π/2^k on ∣1⟩
    Rk(u32),
    /// Phase rotation by −2π/2^k on ∣1⟩
    RkDag(u32),
    /// Rotation about X by an arbitrary angle
    Rx(f64),
    /// Rotation about Y by an arbitrary angle
    Ry(f64),
    /// Rotation about Z by an arbitrary angle
    Rz(f64),
}

// matrices of the parameterless gates, row-major [u00, u01, u10, u11]
static FIXED: Lazy<[[C64; 4]; 11]> = Lazy::new(|| {
    let o = C64::new(0.0, 0.0);
    let l = C64::new(1.0, 0.0);
    let i = C64::new(0.0, 1.0);
    let s = C64::new(FRAC_1_SQRT_2, 0.0);
    let t = C64::cis(FRAC_PI_4);
    let p = C64::new(0.5, 0.5);   // (1+i)/2
    let m = C64::new(0.5, -0.5);  // (1−i)/2
    [
        [l, o, o, l],         // I
        [o, l, l, o],         // X
        [o, -i, i, o],        // Y
        [l, o, o, -l],        // Z
        [s, s, s, -s],        // H
        [l, o, o, i],         // S
        [l, o, o, -i],        // Sdag
        [l, o, o, t],         // T
        [l, o, o, t.conj()],  // Tdag
        [p, m, m, p],         // SqrtX
        [p, -p, p, p],        // SqrtY
    ]
});

impl GateId {
    /// The gate's dense unitary, row-major `[u00, u01, u10, u11]`.
    pub fn matrix(self) -> [C64; 4] {
        let o = C64::new(0.0, 0.0);
        let l = C64::new(1.0, 0.0);
        match self {
            Self::I => FIXED[0],
            Self::X => FIXED[1],
            Self::Y => FIXED[2],
            Self::Z => FIXED[3],
            Self::H => FIXED[4],
            Self::S => FIXED[5],
            Self::Sdag => FIXED[6],
            Self::T => FIXED[7],
            Self::Tdag => FIXED[8],
            Self::SqrtX => FIXED[9],
            Self::SqrtY => FIXED[10],
            Self::Rk(k)
                => [l, o, o, C64::cis(2.0 * PI / 2.0_f64.powi(k as i32))],
            Self::RkDag(k)
                => [l, o, o, C64::cis(-2.0 * PI / 2.0_f64.powi(k as i32))],
            Self::Rx(ang) => {
                let c = C64::new((ang / 2.0).cos(), 0.0);
                let s = C64::new(0.0, -(ang / 2.0).sin());
                [c, s, s, c]
            },
            Self::Ry(ang) => {
                let c = C64::new((ang / 2.0).cos(), 0.0);
                let s = C64::new((ang / 2.0).sin(), 0.0);
                [c, -s, s, c]
            },
            Self::Rz(ang) => [C64::cis(-ang / 2.0), o, o, C64::cis(ang / 2.0)],
        }
    }

    /// Stable cache-key material: a small tag plus the parameter bits.
    ///
    /// Two gates with the same tag and parameter bits are guaranteed to
    /// apply the same unitary.
    pub fn key_bits(self) -> (u64, u64) {
        match self {
            Self::I => (0, 0),
            Self::X => (1, 0),
            Self::Y => (2, 0),
            Self::Z => (3, 0),
            Self::H => (4, 0),
            Self::S => (5, 0),
            Self::Sdag => (6, 0),
            Self::T => (7, 0),
            Self::Tdag => (8, 0),
            Self::SqrtX => (9, 0),
            Self::SqrtY => (10, 0),
            Self::Rk(k) => (11, k as u64),
            Self::RkDag(k) => (12, k as u64),
            Self::Rx(ang) => (13, ang.to_bits()),
            Self::Ry(ang) => (14, ang.to_bits()),
            Self::Rz(ang) => (15, ang.to_bits()),
        }
    }
}
