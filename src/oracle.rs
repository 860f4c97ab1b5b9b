//! Energy and gradient oracles.
//!
//! The optimizer never performs electronic structure work itself. It asks an
//! [`EnergyOracle`] for energies and Cartesian gradients at a geometry and
//! treats the answer as a black box. Oracles work in atomic units: coordinates
//! in Bohr, energies in Hartree, gradients in Hartree/Bohr.
//!
//! # Unit Boundary
//!
//! [`LevelOfTheory`] wraps an oracle and is the only place units change:
//!
//! - Coordinates: Angstrom → Bohr (× [`ANGSTROM_TO_BOHR`])
//! - Energy: Hartree → kcal/mol (× [`KCAL_MOL_PER_AU`])
//! - Gradient and coupling: per Bohr → per Angstrom (× [`ANGSTROM_TO_BOHR`])
//!
//! It also caches the last evaluation so that asking for the energy and the
//! gradient at the same geometry costs one oracle call each.
//!
//! # Error Handling
//!
//! All operations return an [`OracleError`]:
//! - `Io`: file system errors of file-based oracles
//! - `Calculation`: the underlying method failed
//! - `Parse`: an oracle produced output it could not interpret
//! - `Unsupported`: the oracle does not provide the requested quantity
//! - `Dimension`: the oracle returned a vector of the wrong length

use crate::config::{ANGSTROM_TO_BOHR, KCAL_MOL_PER_AU};
use crate::geometry::{Geometry, State};
use nalgebra::{DVector, Vector3};
use thiserror::Error;

/// Error type for oracle operations.
#[derive(Error, Debug)]
pub enum OracleError {
    /// File system or I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The energy/gradient calculation failed
    #[error("calculation failed: {0}")]
    Calculation(String),
    /// Failed to interpret oracle output
    #[error("parse error: {0}")]
    Parse(String),
    /// The oracle does not provide this quantity
    #[error("{0} is not supported by this oracle")]
    Unsupported(&'static str),
    /// The oracle returned a vector of the wrong length
    #[error("oracle returned {actual} components, expected {expected}")]
    Dimension {
        /// Expected length (3N)
        expected: usize,
        /// Returned length
        actual: usize,
    },
}

/// Type alias for oracle results
pub type Result<T> = std::result::Result<T, OracleError>;

/// A source of energies and Cartesian gradients in atomic units.
///
/// Implementations receive flattened Cartesian coordinates in Bohr,
/// `[x1, y1, z1, ...]`, and must return gradients with the same layout.
pub trait EnergyOracle {
    /// Energy in Hartree.
    fn energy(&mut self, coords_bohr: &DVector<f64>) -> Result<f64>;

    /// Cartesian gradient in Hartree/Bohr.
    fn gradient(&mut self, coords_bohr: &DVector<f64>) -> Result<DVector<f64>>;

    /// Derivative coupling vector in 1/Bohr, for oracles that compute one.
    fn coupling(&mut self, _coords_bohr: &DVector<f64>) -> Result<DVector<f64>> {
        Err(OracleError::Unsupported("derivative coupling"))
    }
}

impl<O: EnergyOracle + ?Sized> EnergyOracle for &mut O {
    fn energy(&mut self, coords_bohr: &DVector<f64>) -> Result<f64> {
        (**self).energy(coords_bohr)
    }

    fn gradient(&mut self, coords_bohr: &DVector<f64>) -> Result<DVector<f64>> {
        (**self).gradient(coords_bohr)
    }

    fn coupling(&mut self, coords_bohr: &DVector<f64>) -> Result<DVector<f64>> {
        (**self).coupling(coords_bohr)
    }
}

impl<O: EnergyOracle + ?Sized> EnergyOracle for Box<O> {
    fn energy(&mut self, coords_bohr: &DVector<f64>) -> Result<f64> {
        (**self).energy(coords_bohr)
    }

    fn gradient(&mut self, coords_bohr: &DVector<f64>) -> Result<DVector<f64>> {
        (**self).gradient(coords_bohr)
    }

    fn coupling(&mut self, coords_bohr: &DVector<f64>) -> Result<DVector<f64>> {
        (**self).coupling(coords_bohr)
    }
}

/// Unit-converting, caching wrapper around an [`EnergyOracle`].
///
/// Takes coordinates in Angstrom and returns energies in kcal/mol and
/// gradients in Hartree/Angstrom.
///
/// # Examples
///
/// ```
/// use dicopt::oracle::{HarmonicBondOracle, LevelOfTheory};
/// use nalgebra::DVector;
///
/// let oracle = HarmonicBondOracle::uniform(&[(0, 1)], 0.74, 0.4);
/// let mut lot = LevelOfTheory::new(oracle);
/// let coords = DVector::from_vec(vec![0.0, 0.0, 0.0, 0.74, 0.0, 0.0]);
/// assert!(lot.energy(&coords).unwrap().abs() < 1e-12);
/// ```
pub struct LevelOfTheory<O: EnergyOracle> {
    oracle: O,
    cached_coords: Option<DVector<f64>>,
    cached_energy: Option<f64>,
    cached_gradient: Option<DVector<f64>>,
    evaluations: usize,
}

impl<O: EnergyOracle> LevelOfTheory<O> {
    /// Wraps an oracle.
    pub fn new(oracle: O) -> Self {
        Self {
            oracle,
            cached_coords: None,
            cached_energy: None,
            cached_gradient: None,
            evaluations: 0,
        }
    }

    /// Borrow the wrapped oracle.
    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    /// Unwraps the oracle.
    pub fn into_inner(self) -> O {
        self.oracle
    }

    /// Number of calls forwarded to the oracle (cache misses).
    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    /// Drops the cached results.
    pub fn invalidate(&mut self) {
        self.cached_coords = None;
        self.cached_energy = None;
        self.cached_gradient = None;
    }

    fn sync_cache(&mut self, coords: &DVector<f64>) {
        let same = self
            .cached_coords
            .as_ref()
            .map(|c| c.len() == coords.len() && c.iter().zip(coords.iter()).all(|(a, b)| a == b))
            .unwrap_or(false);
        if !same {
            self.invalidate();
            self.cached_coords = Some(coords.clone());
        }
    }

    /// Energy in kcal/mol at Cartesian coordinates in Angstrom.
    pub fn energy(&mut self, coords: &DVector<f64>) -> Result<f64> {
        self.sync_cache(coords);
        if let Some(energy) = self.cached_energy {
            return Ok(energy);
        }
        let energy = self.oracle.energy(&(coords * ANGSTROM_TO_BOHR))? * KCAL_MOL_PER_AU;
        self.evaluations += 1;
        self.cached_energy = Some(energy);
        Ok(energy)
    }

    /// Gradient in Hartree/Angstrom at Cartesian coordinates in Angstrom.
    pub fn gradient(&mut self, coords: &DVector<f64>) -> Result<DVector<f64>> {
        self.sync_cache(coords);
        if let Some(gradient) = &self.cached_gradient {
            return Ok(gradient.clone());
        }
        let raw = self.oracle.gradient(&(coords * ANGSTROM_TO_BOHR))?;
        if raw.len() != coords.len() {
            return Err(OracleError::Dimension {
                expected: coords.len(),
                actual: raw.len(),
            });
        }
        self.evaluations += 1;
        let gradient = raw * ANGSTROM_TO_BOHR;
        self.cached_gradient = Some(gradient.clone());
        Ok(gradient)
    }

    /// Derivative coupling in 1/Angstrom. Never cached.
    pub fn coupling(&mut self, coords: &DVector<f64>) -> Result<DVector<f64>> {
        let raw = self.oracle.coupling(&(coords * ANGSTROM_TO_BOHR))?;
        if raw.len() != coords.len() {
            return Err(OracleError::Dimension {
                expected: coords.len(),
                actual: raw.len(),
            });
        }
        Ok(raw * ANGSTROM_TO_BOHR)
    }

    /// Energy and gradient at a geometry, packaged as a [`State`].
    pub fn evaluate(&mut self, geometry: &Geometry) -> Result<State> {
        let energy = self.energy(&geometry.coords)?;
        let gradient = self.gradient(&geometry.coords)?;
        Ok(State {
            energy,
            gradient,
            geometry: geometry.clone(),
        })
    }
}

/// One harmonic spring between two atoms, in atomic units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HarmonicBond {
    /// First atom
    pub i: usize,
    /// Second atom
    pub j: usize,
    /// Equilibrium length in Bohr
    pub r0: f64,
    /// Force constant in Hartree/Bohr²
    pub k: f64,
}

/// Model level of theory: a sum of harmonic bond stretches.
///
/// `E = Σ ½·k·(r - r0)²` over the configured bonds. Its minimum is any
/// geometry with every listed bond at its equilibrium length, which makes it
/// a convenient target for exercising the optimizer.
#[derive(Debug, Clone)]
pub struct HarmonicBondOracle {
    bonds: Vec<HarmonicBond>,
}

impl HarmonicBondOracle {
    /// Builds the oracle from explicit springs.
    pub fn new(bonds: Vec<HarmonicBond>) -> Self {
        Self { bonds }
    }

    /// Same equilibrium length (Angstrom) and force constant (Hartree/Bohr²)
    /// for every listed pair.
    pub fn uniform(pairs: &[(usize, usize)], r0_angstrom: f64, k: f64) -> Self {
        let r0 = r0_angstrom * ANGSTROM_TO_BOHR;
        Self::new(pairs.iter().map(|&(i, j)| HarmonicBond { i, j, r0, k }).collect())
    }

    /// The configured springs.
    pub fn bonds(&self) -> &[HarmonicBond] {
        &self.bonds
    }

    fn check(&self, coords: &DVector<f64>) -> Result<()> {
        if coords.len() % 3 != 0 {
            return Err(OracleError::Calculation(format!(
                "coordinate vector length {} is not a multiple of 3",
                coords.len()
            )));
        }
        let num_atoms = coords.len() / 3;
        if let Some(bond) = self.bonds.iter().find(|b| b.i >= num_atoms || b.j >= num_atoms) {
            return Err(OracleError::Calculation(format!(
                "bond {}-{} references an atom beyond {}",
                bond.i, bond.j, num_atoms
            )));
        }
        Ok(())
    }
}

fn atom(coords: &DVector<f64>, idx: usize) -> Vector3<f64> {
    Vector3::new(coords[3 * idx], coords[3 * idx + 1], coords[3 * idx + 2])
}

impl EnergyOracle for HarmonicBondOracle {
    fn energy(&mut self, coords_bohr: &DVector<f64>) -> Result<f64> {
        self.check(coords_bohr)?;
        Ok(self
            .bonds
            .iter()
            .map(|b| {
                let r = (atom(coords_bohr, b.i) - atom(coords_bohr, b.j)).norm();
                0.5 * b.k * (r - b.r0).powi(2)
            })
            .sum())
    }

    fn gradient(&mut self, coords_bohr: &DVector<f64>) -> Result<DVector<f64>> {
        self.check(coords_bohr)?;
        let mut gradient = DVector::zeros(coords_bohr.len());
        for b in &self.bonds {
            let d = atom(coords_bohr, b.i) - atom(coords_bohr, b.j);
            let r = d.norm();
            if r < 1e-12 {
                continue;
            }
            let g = d * (b.k * (r - b.r0) / r);
            for c in 0..3 {
                gradient[3 * b.i + c] += g[c];
                gradient[3 * b.j + c] -= g[c];
            }
        }
        Ok(gradient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    struct Counting {
        calls: usize,
    }

    impl EnergyOracle for Counting {
        fn energy(&mut self, _coords_bohr: &DVector<f64>) -> Result<f64> {
            self.calls += 1;
            Ok(-1.0)
        }

        fn gradient(&mut self, coords_bohr: &DVector<f64>) -> Result<DVector<f64>> {
            self.calls += 1;
            Ok(DVector::from_element(coords_bohr.len(), 0.5))
        }
    }

    #[test]
    fn test_unit_conversion() {
        let mut lot = LevelOfTheory::new(Counting { calls: 0 });
        let coords = DVector::from_vec(vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
        assert!(approx_eq(lot.energy(&coords).unwrap(), -KCAL_MOL_PER_AU, 1e-9));
        let gradient = lot.gradient(&coords).unwrap();
        assert!(approx_eq(gradient[0], 0.5 * ANGSTROM_TO_BOHR, 1e-12));
    }

    #[test]
    fn test_cache_reuses_results() {
        let mut lot = LevelOfTheory::new(Counting { calls: 0 });
        let coords = DVector::from_vec(vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
        lot.energy(&coords).unwrap();
        lot.energy(&coords).unwrap();
        lot.gradient(&coords).unwrap();
        lot.gradient(&coords).unwrap();
        assert_eq!(lot.oracle().calls, 2);
        assert_eq!(lot.evaluations(), 2);

        let moved = DVector::from_vec(vec![0.0, 0.0, 0.0, 1.1, 0.0, 0.0]);
        lot.energy(&moved).unwrap();
        assert_eq!(lot.oracle().calls, 3);
    }

    #[test]
    fn test_coupling_unsupported_by_default() {
        let mut lot = LevelOfTheory::new(Counting { calls: 0 });
        let coords = DVector::zeros(6);
        assert!(matches!(lot.coupling(&coords), Err(OracleError::Unsupported(_))));
    }

    #[test]
    fn test_harmonic_energy_and_gradient() {
        let mut oracle = HarmonicBondOracle::new(vec![HarmonicBond {
            i: 0,
            j: 1,
            r0: 2.0,
            k: 0.5,
        }]);
        let coords = DVector::from_vec(vec![0.0, 0.0, 0.0, 3.0, 0.0, 0.0]);
        assert!(approx_eq(oracle.energy(&coords).unwrap(), 0.25, 1e-12));
        let g = oracle.gradient(&coords).unwrap();
        assert!(approx_eq(g[0], -0.5, 1e-12));
        assert!(approx_eq(g[3], 0.5, 1e-12));
        assert!(approx_eq(g.sum(), 0.0, 1e-12));
    }

    #[test]
    fn test_harmonic_gradient_matches_finite_difference() {
        let mut oracle = HarmonicBondOracle::uniform(&[(0, 1), (1, 2)], 1.0, 0.3);
        let coords = DVector::from_vec(vec![0.0, 0.1, 0.0, 2.2, 0.0, 0.3, 3.0, 1.5, -0.2]);
        let analytic = oracle.gradient(&coords).unwrap();
        let h = 1e-6;
        for idx in 0..coords.len() {
            let mut plus = coords.clone();
            let mut minus = coords.clone();
            plus[idx] += h;
            minus[idx] -= h;
            let numeric = (oracle.energy(&plus).unwrap() - oracle.energy(&minus).unwrap()) / (2.0 * h);
            assert!(approx_eq(analytic[idx], numeric, 1e-6), "component {}", idx);
        }
    }

    #[test]
    fn test_harmonic_rejects_bad_index() {
        let mut oracle = HarmonicBondOracle::uniform(&[(0, 5)], 1.0, 0.3);
        let coords = DVector::zeros(6);
        assert!(matches!(oracle.energy(&coords), Err(OracleError::Calculation(_))));
    }

    #[test]
    fn test_evaluate_returns_state() {
        let oracle = HarmonicBondOracle::uniform(&[(0, 1)], 0.74, 0.4);
        let mut lot = LevelOfTheory::new(oracle);
        let geometry = Geometry::new(
            vec!["H".to_string(), "H".to_string()],
            vec![0.0, 0.0, 0.0, 0.80, 0.0, 0.0],
        );
        let state = lot.evaluate(&geometry).unwrap();
        assert!(state.validate().is_ok());
        assert!(state.energy > 0.0);
        assert!(state.gradient[3] > 0.0);
    }
}
