//! Error type for the internal coordinate engine.
//!
//! Only configuration problems, logic errors in the derivative kernels, oracle
//! failures and retry-ceiling exhaustion surface as errors. Numerical trouble
//! inside the back-transform is handled locally (damping, rollback, retry) and
//! reported through step diagnostics instead.

use crate::oracle::OracleError;
use thiserror::Error;

/// Errors raised by the delocalized internal coordinate engine.
#[derive(Error, Debug)]
pub enum DicError {
    /// The molecule has too few atoms for a 3N-6 dimensional coordinate space
    #[error("at least 3 atoms are required, got {0}")]
    TooFewAtoms(usize),
    /// An atom index outside `0..N` was supplied
    #[error("atom index {index} out of range for {num_atoms} atoms")]
    AtomIndex {
        /// Offending index
        index: usize,
        /// Number of atoms in the topology
        num_atoms: usize,
    },
    /// More than three degrees of freedom were lost in the basis reduction
    #[error("degenerate optimization space: {lost} degrees of freedom lost ({available} of {expected} remain)")]
    DegenerateSpace {
        /// Number of discarded near-null directions
        lost: usize,
        /// Dimension that survived
        available: usize,
        /// Expected dimension, 3N-6
        expected: usize,
    },
    /// A derivative kernel produced NaN
    #[error("non-finite value in B-matrix row {row} ({primitive})")]
    NonFiniteRow {
        /// Row index in the primitive B-matrix
        row: usize,
        /// Human readable primitive label
        primitive: String,
    },
    /// A matrix that must be invertible was singular
    #[error("singular matrix: {0}")]
    SingularMatrix(&'static str),
    /// A vector did not have the dimension the operation expects
    #[error("dimension mismatch in {context}: expected {expected}, got {actual}")]
    Dimension {
        /// Operation that detected the mismatch
        context: &'static str,
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },
    /// The back-transform retry ceiling was exhausted
    #[error("back-transform retry ceiling of {0} exhausted")]
    RetryCeilingExhausted(usize),
    /// The energy/gradient oracle failed
    #[error("oracle failure: {0}")]
    Oracle(#[from] OracleError),
}

/// Type alias for engine results
pub type Result<T> = std::result::Result<T, DicError>;
