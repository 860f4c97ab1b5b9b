//! Primitive values and their projection into delocalized coordinates.
//!
//! Values are stacked in B-matrix row order: bond lengths (Angstrom), angles
//! (radians), torsions (radians). Torsions are measured in `[-180°, 180°)`
//! and then shifted by ±360° against a reference so that a torsion crossing
//! the ±180° seam moves by a few degrees rather than jumping by a full turn.

use crate::primitives::PrimitiveSet;
use crate::topology::Topology;
use nalgebra::{DMatrix, DVector};

/// Measured primitive values, one block per primitive kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrimitiveValues {
    /// Bond lengths in Angstrom
    pub bonds: Vec<f64>,
    /// Angles in radians
    pub angles: Vec<f64>,
    /// Torsions in radians
    pub torsions: Vec<f64>,
}

impl PrimitiveValues {
    /// Measures every primitive at the topology's current geometry.
    pub fn evaluate<T: Topology + ?Sized>(topology: &T, set: &PrimitiveSet) -> Self {
        Self {
            bonds: set.bonds.iter().map(|&(i, j)| topology.distance(i, j)).collect(),
            angles: set
                .angles
                .iter()
                .map(|&(i, j, k)| topology.angle_degrees(i, j, k).to_radians())
                .collect(),
            torsions: set
                .torsions
                .iter()
                .map(|&(i, j, k, l)| topology.torsion_degrees(i, j, k, l).to_radians())
                .collect(),
        }
    }

    /// Torsions in degrees.
    pub fn torsion_degrees(&self) -> Vec<f64> {
        self.torsions.iter().map(|t| t.to_degrees()).collect()
    }

    /// Shifts each torsion by ±360° to stay within 180° of its reference
    /// (degrees).
    pub fn apply_torsion_continuity(&mut self, reference: &[f64]) {
        for (torsion, &r) in self.torsions.iter_mut().zip(reference) {
            *torsion = unwrap_torsion(r, torsion.to_degrees()).to_radians();
        }
    }

    /// All values stacked in row order.
    pub fn stacked(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.bonds.len() + self.angles.len() + self.torsions.len(),
            self.bonds
                .iter()
                .chain(&self.angles)
                .chain(&self.torsions)
                .copied(),
        )
    }
}

/// Continuity correction of a torsion `value` against `reference`, degrees.
///
/// ```
/// use dicopt::internals::unwrap_torsion;
///
/// assert_eq!(unwrap_torsion(179.0, -179.0), 181.0);
/// assert_eq!(unwrap_torsion(-170.0, 175.0), -185.0);
/// assert_eq!(unwrap_torsion(10.0, 20.0), 20.0);
/// ```
pub fn unwrap_torsion(reference: f64, value: f64) -> f64 {
    let diff = reference - value;
    if diff > 180.0 {
        value + 360.0
    } else if diff < -180.0 {
        value - 360.0
    } else {
        value
    }
}

/// Delocalized coordinates `q = U·values`.
pub fn project(u: &DMatrix<f64>, values: &PrimitiveValues) -> DVector<f64> {
    u * values.stacked()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoordinateOptions;
    use crate::geometry::Geometry;
    use crate::topology::Molecule;

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    fn chain(torsion_deg: f64) -> Molecule {
        let phi = torsion_deg.to_radians();
        let geometry = Geometry::new(
            vec!["C".into(), "C".into(), "C".into(), "C".into()],
            vec![
                0.0, 1.0, 0.0, //
                0.0, 0.0, 0.0, //
                1.5, 0.0, 0.0, //
                1.5, phi.cos(), phi.sin(),
            ],
        );
        Molecule::new(geometry, &[(0, 1), (1, 2), (2, 3)])
    }

    #[test]
    fn test_evaluate_units_and_order() {
        let mut mol = chain(60.0);
        let set = PrimitiveSet::build(&mut mol, &CoordinateOptions::default()).unwrap();
        let values = PrimitiveValues::evaluate(&mol, &set);
        assert!(approx_eq(values.bonds[0], 1.0, 1e-12));
        assert!(approx_eq(values.bonds[1], 1.5, 1e-12));
        assert!(approx_eq(values.angles[0], std::f64::consts::FRAC_PI_2, 1e-12));
        assert!(approx_eq(values.torsion_degrees()[0], 60.0, 1e-9));
        let stacked = values.stacked();
        assert_eq!(stacked.len(), set.len());
        assert!(approx_eq(stacked[5], 60.0_f64.to_radians(), 1e-9));
    }

    #[test]
    fn test_torsion_crossing_seam() {
        let mut mol = chain(179.0);
        let set = PrimitiveSet::build(&mut mol, &CoordinateOptions::default()).unwrap();
        let reference = PrimitiveValues::evaluate(&mol, &set).torsion_degrees();

        let crossed = chain(-179.0);
        let mut values = PrimitiveValues::evaluate(&crossed, &set);
        assert!(approx_eq(values.torsion_degrees()[0], -179.0, 1e-9));
        values.apply_torsion_continuity(&reference);
        let change = values.torsion_degrees()[0] - reference[0];
        assert!(approx_eq(change, 2.0, 1e-9));
    }

    #[test]
    fn test_project_identity_basis() {
        let values = PrimitiveValues {
            bonds: vec![1.0, 2.0],
            angles: vec![0.5],
            torsions: vec![],
        };
        let q = project(&DMatrix::identity(3, 3), &values);
        assert_eq!(q.as_slice(), &[1.0, 2.0, 0.5]);
    }
}
