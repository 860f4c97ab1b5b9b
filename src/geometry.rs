//! Core geometry and state data structures for molecular representations.
//!
//! This module provides the fundamental data types for representing molecular
//! geometries and evaluated electronic states:
//!
//! - [`Geometry`]: Molecular structure with element types and Cartesian coordinates
//! - [`State`]: Energy and gradient evaluated at a geometry
//!
//! plus the elementary measurements (distance, bond angle, dihedral) every
//! other module builds on. All coordinates are in Angstrom.

use nalgebra::{DVector, Vector3};

/// Represents a molecular geometry with atomic elements and Cartesian coordinates.
///
/// Coordinates are stored flat, `[x1, y1, z1, x2, y2, z2, ...]`, so they can be
/// used directly in the matrix algebra of the B-matrix and back-transform.
///
/// # Examples
///
/// ```
/// use dicopt::geometry::Geometry;
///
/// let elements = vec!["O".to_string(), "H".to_string(), "H".to_string()];
/// let coords = vec![
///     0.0, 0.0, 0.0,
///     0.757, 0.586, 0.0,
///     -0.757, 0.586, 0.0,
/// ];
///
/// let geometry = Geometry::new(elements, coords);
/// assert_eq!(geometry.num_atoms, 3);
/// assert_eq!(geometry.get_atom_coords(1), [0.757, 0.586, 0.0]);
/// ```
#[derive(Debug, Clone)]
pub struct Geometry {
    /// Chemical element symbols for each atom in order
    pub elements: Vec<String>,
    /// Flattened Cartesian coordinates [x1, y1, z1, x2, y2, z2, ...] in Angstroms
    pub coords: DVector<f64>,
    /// Number of atoms in the molecule
    pub num_atoms: usize,
}

impl Geometry {
    /// Create a new `Geometry` from element list and coordinate vector.
    ///
    /// # Panics
    ///
    /// Panics if `coords.len() != elements.len() * 3`, ensuring data consistency.
    pub fn new(elements: Vec<String>, coords: Vec<f64>) -> Self {
        let num_atoms = elements.len();
        assert_eq!(coords.len(), num_atoms * 3);
        Self {
            elements,
            coords: DVector::from_vec(coords),
            num_atoms,
        }
    }

    /// Get the Cartesian coordinates of a specific atom as an array.
    pub fn get_atom_coords(&self, atom_idx: usize) -> [f64; 3] {
        let i = atom_idx * 3;
        [self.coords[i], self.coords[i + 1], self.coords[i + 2]]
    }

    /// Position of an atom as a 3-vector.
    pub fn position(&self, atom_idx: usize) -> Vector3<f64> {
        let i = atom_idx * 3;
        Vector3::new(self.coords[i], self.coords[i + 1], self.coords[i + 2])
    }

    /// Moves an atom to a new position.
    pub fn set_position(&mut self, atom_idx: usize, xyz: &Vector3<f64>) {
        let i = atom_idx * 3;
        self.coords[i] = xyz.x;
        self.coords[i + 1] = xyz.y;
        self.coords[i + 2] = xyz.z;
    }
}

/// Energy and Cartesian gradient evaluated at a geometry.
///
/// Values are in the units produced by the oracle boundary
/// ([`LevelOfTheory`](crate::oracle::LevelOfTheory)): energy in kcal/mol,
/// gradient in Hartree/Angstrom.
#[derive(Debug, Clone)]
pub struct State {
    /// Energy in kcal/mol
    pub energy: f64,
    /// Cartesian gradient in Hartree/Angstrom, same layout as `Geometry::coords`
    pub gradient: DVector<f64>,
    /// Geometry at which the state was evaluated
    pub geometry: Geometry,
}

impl State {
    /// Validates that the State contains usable data.
    ///
    /// A state is rejected when the gradient is empty, does not match the
    /// geometry, or contains non-finite values.
    pub fn validate(&self) -> Result<(), String> {
        if self.gradient.is_empty() {
            return Err("State contains empty gradient vector".to_string());
        }

        let expected = self.geometry.num_atoms * 3;
        if self.gradient.len() != expected {
            return Err(format!(
                "Gradient/geometry mismatch: expected {} gradient components for {} atoms, got {}",
                expected,
                self.geometry.num_atoms,
                self.gradient.len()
            ));
        }

        if !self.energy.is_finite() || self.gradient.iter().any(|g| !g.is_finite()) {
            return Err("State contains non-finite energy or gradient".to_string());
        }

        Ok(())
    }
}

/// Distance between two points.
pub fn distance(a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    (a - b).norm()
}

/// Angle a-b-c in radians with `b` as the vertex.
pub fn bond_angle(a: &Vector3<f64>, b: &Vector3<f64>, c: &Vector3<f64>) -> f64 {
    let ba = a - b;
    let bc = c - b;
    let denom = ba.norm() * bc.norm();
    if denom < 1e-14 {
        return 0.0;
    }
    (ba.dot(&bc) / denom).clamp(-1.0, 1.0).acos()
}

/// Dihedral angle a-b-c-d in radians, in `(-π, π]`.
///
/// Positive values follow the IUPAC convention: looking down b→c, the
/// front bond a-b must rotate clockwise to eclipse the back bond c-d.
pub fn dihedral(a: &Vector3<f64>, b: &Vector3<f64>, c: &Vector3<f64>, d: &Vector3<f64>) -> f64 {
    let b1 = b - a;
    let b2 = c - b;
    let b3 = d - c;

    let n1 = b1.cross(&b2);
    let n2 = b2.cross(&b3);

    let y = b2.norm() * b1.dot(&n2);
    let x = n1.dot(&n2);
    y.atan2(x)
}

/// Folds an angle in degrees into `[-180, 180)`.
pub fn wrap_degrees(mut value: f64) -> f64 {
    while value >= 180.0 {
        value -= 360.0;
    }
    while value < -180.0 {
        value += 360.0;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    #[test]
    fn test_position_round_trip() {
        let mut geometry = Geometry::new(
            vec!["H".to_string(), "H".to_string()],
            vec![0.0, 0.0, 0.0, 0.74, 0.0, 0.0],
        );
        let moved = Vector3::new(0.8, 0.1, -0.2);
        geometry.set_position(1, &moved);
        assert_eq!(geometry.position(1), moved);
        assert_eq!(geometry.get_atom_coords(1), [0.8, 0.1, -0.2]);
    }

    #[test]
    fn test_bond_angle_right_angle() {
        let a = Vector3::new(1.0, 0.0, 0.0);
        let b = Vector3::zeros();
        let c = Vector3::new(0.0, 2.0, 0.0);
        assert!(approx_eq(bond_angle(&a, &b, &c), PI / 2.0, 1e-12));
    }

    #[test]
    fn test_bond_angle_linear_is_pi() {
        let a = Vector3::new(-1.0, 0.0, 0.0);
        let b = Vector3::zeros();
        let c = Vector3::new(1.0, 0.0, 0.0);
        assert!(approx_eq(bond_angle(&a, &b, &c), PI, 1e-12));
    }

    #[test]
    fn test_dihedral_sign_convention() {
        let a = Vector3::new(0.0, 1.0, 0.0);
        let b = Vector3::zeros();
        let c = Vector3::new(1.0, 0.0, 0.0);
        let d = Vector3::new(1.0, 0.0, 1.0);
        assert!(approx_eq(dihedral(&a, &b, &c, &d), PI / 2.0, 1e-12));

        let d_mirror = Vector3::new(1.0, 0.0, -1.0);
        assert!(approx_eq(dihedral(&a, &b, &c, &d_mirror), -PI / 2.0, 1e-12));
    }

    #[test]
    fn test_dihedral_trans_is_pi() {
        let a = Vector3::new(0.0, 1.0, 0.0);
        let b = Vector3::zeros();
        let c = Vector3::new(1.0, 0.0, 0.0);
        let d = Vector3::new(1.0, -1.0, 0.0);
        assert!(approx_eq(dihedral(&a, &b, &c, &d).abs(), PI, 1e-12));
    }

    #[test]
    fn test_wrap_degrees() {
        assert!(approx_eq(wrap_degrees(180.0), -180.0, 1e-12));
        assert!(approx_eq(wrap_degrees(190.0), -170.0, 1e-12));
        assert!(approx_eq(wrap_degrees(-190.0), 170.0, 1e-12));
        assert!(approx_eq(wrap_degrees(45.0), 45.0, 1e-12));
    }

    #[test]
    fn test_state_validation() {
        let geometry = Geometry::new(vec!["H".to_string()], vec![0.0, 0.0, 0.0]);
        let state = State {
            energy: -0.5,
            gradient: DVector::from_vec(vec![0.1, -0.2, 0.0]),
            geometry: geometry.clone(),
        };
        assert!(state.validate().is_ok());

        let mismatched = State {
            energy: -0.5,
            gradient: DVector::from_vec(vec![0.1, -0.2]),
            geometry: geometry.clone(),
        };
        assert!(mismatched.validate().unwrap_err().contains("mismatch"));

        let non_finite = State {
            energy: f64::NAN,
            gradient: DVector::from_vec(vec![0.1, -0.2, 0.0]),
            geometry,
        };
        assert!(non_finite.validate().unwrap_err().contains("non-finite"));
    }
}
