#![deny(missing_docs)]

//! dicopt - Delocalized Internal Coordinate Geometry Optimizer
//!
//! dicopt builds a non-redundant internal coordinate system for a molecule
//! (delocalized internal coordinates, Baker, Kessi and Delley 1996) and uses
//! it to drive a geometry optimization against an external energy/gradient
//! oracle.
//!
//! # Algorithm
//!
//! 1. **Primitives**: bonds, angles and torsions are enumerated from the bond
//!    graph. Near-linear angles get cross-link torsions and disconnected
//!    fragments are bridged by their closest atom pair.
//! 2. **Wilson B-matrix**: `B` (M×3N) holds the Cartesian derivatives of
//!    every primitive.
//! 3. **Delocalized basis**: the SVD of `B·Bᵗ` keeps the `3N-6` directions
//!    with non-zero singular values. Their span is the row space `U`, and
//!    the coordinates are
//!    ```text
//!    q = U · [bonds, angles, torsions]
//!    ```
//! 4. **Step**: the q-space gradient `g_q = Bᵘ⁺ · g_x` and a diagonal guess
//!    Hessian projected into q-space give an eigenvector-following step.
//! 5. **Back-transform**: Cartesians are found iteratively from the target
//!    `q + Δq`, with damping, rollback and a bounded number of retries.
//!
//! # Quick Start
//!
//! ```no_run
//! use dicopt::config::Config;
//! use dicopt::geometry::Geometry;
//! use dicopt::optimizer::DicOptimizer;
//! use dicopt::oracle::{HarmonicBondOracle, LevelOfTheory};
//! use dicopt::topology::Molecule;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let geometry = Geometry::new(
//!         vec!["O".into(), "H".into(), "H".into()],
//!         vec![0.0, 0.0, 0.0, 1.1, 0.0, 0.0, -0.3, 1.05, 0.0],
//!     );
//!     let bonds = [(0, 1), (0, 2)];
//!     let oracle = HarmonicBondOracle::uniform(&bonds, 0.96, 0.3);
//!     let mut lot = LevelOfTheory::new(oracle);
//!
//!     let mut optimizer = DicOptimizer::new(Molecule::new(geometry, &bonds), Config::default())?;
//!     let summary = optimizer.optimize_until_converged(&mut lot, None)?;
//!     println!("converged: {}", summary.converged);
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`topology`] - The `Topology` trait and the in-memory `Molecule`
//! - [`primitives`] - Primitive coordinate construction
//! - [`wilson`] - Wilson B-matrix kernels
//! - [`basis`] - SVD reduction and the reduced B-matrix
//! - [`internals`] - Primitive values, torsion continuity, projection
//! - [`coordinates`] - Delocalized coordinates for one geometry
//! - [`hessian`] - Guess Hessian, BFGS update and eigenvector-following step
//! - [`backtransform`] - Iterative Cartesian back-transform
//! - [`optimizer`] - Optimization loop and convergence checks
//! - [`oracle`] - Energy oracle trait and unit conversion
//! - [`settings`] - INI settings files
//! - [`checkpoint`] - Restart files
//!
//! # Units
//!
//! Cartesians are in Angstrom, energies in kcal/mol and gradients in
//! Hartree/Angstrom everywhere except inside an [`oracle::EnergyOracle`],
//! which works in atomic units.

/// Iterative Cartesian back-transform
pub mod backtransform;
pub mod basis;
/// Restart functionality
pub mod checkpoint;
pub mod config;
pub mod coordinates;
/// Element data
pub mod elements;
pub mod error;
pub mod geometry;
pub mod hessian;
pub mod internals;
pub mod optimizer;
pub mod oracle;
pub mod primitives;
/// Configuration management system
pub mod settings;
pub mod topology;
/// Trajectory recording
pub mod trajectory;
pub mod wilson;

pub use config::Config;
pub use error::{DicError, Result};
pub use geometry::Geometry;
pub use optimizer::DicOptimizer;
pub use topology::{Molecule, Topology};
