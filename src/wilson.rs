//! Wilson B-matrix construction.
//!
//! Row `r` of the B-matrix holds the derivatives of primitive `r` with respect
//! to every Cartesian component, in Angstrom (bonds, unitless) and radians
//! per Angstrom (angles and torsions). Each kernel returns derivatives for
//! the atoms it involves only; [`build_bmatrix`] scatters them into the full
//! `M × 3N` matrix.
//!
//! Singular geometries are handled inside the kernels:
//!
//! - Collinear angles use an auxiliary normal so the row stays finite.
//! - Torsions with a flanking angle above [`TORSION_LINEAR_LIMIT`] are
//!   undefined and contribute a zero row.
//!
//! A non-finite value in any row is a logic error and is reported, never
//! stored.

use crate::error::{DicError, Result};
use crate::primitives::{Primitive, PrimitiveSet};
use crate::topology::Topology;
use log::debug;
use nalgebra::{DMatrix, Vector3};

/// Norm below which the angle normal falls back to an auxiliary axis.
pub const NORMAL_FALLBACK_THRESHOLD: f64 = 1e-3;

/// Flanking angle (radians) above which a torsion derivative is undefined.
pub const TORSION_LINEAR_LIMIT: f64 = 3.0;

/// Derivatives of the distance |a - b|.
pub fn bond_row(a: &Vector3<f64>, b: &Vector3<f64>) -> [Vector3<f64>; 2] {
    let u = (a - b).normalize();
    [u, -u]
}

/// Unit normal to the plane spanned by unit vectors `u` and `v`.
///
/// For (nearly) parallel vectors the normal is taken against the z axis, or
/// the y axis if `u` is itself along z, so the result is always unit length.
pub fn angle_normal(u: &Vector3<f64>, v: &Vector3<f64>) -> Vector3<f64> {
    let mut w = u.cross(v);
    if w.norm() < NORMAL_FALLBACK_THRESHOLD {
        w = u.cross(&Vector3::z());
        if w.norm() < NORMAL_FALLBACK_THRESHOLD {
            w = u.cross(&Vector3::y());
        }
    }
    w.normalize()
}

/// Derivatives of the angle a-b-c (vertex `b`), ordered `[a, b, c]`.
pub fn angle_row(a: &Vector3<f64>, b: &Vector3<f64>, c: &Vector3<f64>) -> [Vector3<f64>; 3] {
    let ba = a - b;
    let bc = c - b;
    let n1 = ba.norm();
    let n2 = bc.norm();
    let u = ba / n1;
    let v = bc / n2;
    let w = angle_normal(&u, &v);

    let da = u.cross(&w) / n1;
    let dc = w.cross(&v) / n2;
    [da, -(da + dc), dc]
}

/// Derivatives of the dihedral a-b-c-d, ordered `[a, b, c, d]`.
///
/// Returns `None` when either flanking angle exceeds
/// [`TORSION_LINEAR_LIMIT`], where the dihedral is not defined.
pub fn torsion_row(
    a: &Vector3<f64>,
    b: &Vector3<f64>,
    c: &Vector3<f64>,
    d: &Vector3<f64>,
) -> Option<[Vector3<f64>; 4]> {
    let ba = a - b;
    let bc = c - b;
    let cd = d - c;
    let n1 = ba.norm();
    let n2 = bc.norm();
    let n3 = cd.norm();
    let u = ba / n1;
    let w = bc / n2;
    let v = cd / n3;

    let cos_u = u.dot(&w);
    let cos_v = -v.dot(&w);
    if cos_u.clamp(-1.0, 1.0).acos() > TORSION_LINEAR_LIMIT
        || cos_v.clamp(-1.0, 1.0).acos() > TORSION_LINEAR_LIMIT
    {
        return None;
    }
    let sin2_u = 1.0 - cos_u * cos_u;
    let sin2_v = 1.0 - cos_v * cos_v;

    let uw = u.cross(&w);
    let vw = v.cross(&w);

    let t1 = uw / (n1 * sin2_u);
    let t2 = vw / (n3 * sin2_v);
    let t3 = uw * cos_u / (n2 * sin2_u);
    let t4 = vw * cos_v / (n2 * sin2_v);

    Some([t1, -t1 + t3 + t4, t2 - t3 - t4, -t2])
}

/// Builds the primitive B-matrix at the topology's current geometry.
///
/// # Errors
///
/// - [`DicError::AtomIndex`] when a primitive references a missing atom
/// - [`DicError::NonFiniteRow`] when a kernel produces NaN or infinity
pub fn build_bmatrix<T: Topology + ?Sized>(topology: &T, set: &PrimitiveSet) -> Result<DMatrix<f64>> {
    let num_atoms = topology.atom_count();
    let mut bmat = DMatrix::zeros(set.len(), 3 * num_atoms);
    let mut zeroed = 0;

    for (row, primitive) in set.iter().enumerate() {
        let atoms = primitive.atoms();
        if let Some(&index) = atoms.iter().find(|&&a| a >= num_atoms) {
            return Err(DicError::AtomIndex { index, num_atoms });
        }
        let x: Vec<Vector3<f64>> = atoms.iter().map(|&a| topology.cartesian(a)).collect();

        let derivatives: Vec<Vector3<f64>> = match primitive {
            Primitive::Bond(..) => bond_row(&x[0], &x[1]).to_vec(),
            Primitive::Angle(..) => angle_row(&x[0], &x[1], &x[2]).to_vec(),
            Primitive::Torsion(..) => match torsion_row(&x[0], &x[1], &x[2], &x[3]) {
                Some(d) => d.to_vec(),
                None => {
                    zeroed += 1;
                    continue;
                }
            },
        };

        if derivatives.iter().any(|d| d.iter().any(|v| !v.is_finite())) {
            return Err(DicError::NonFiniteRow {
                row,
                primitive: primitive.to_string(),
            });
        }

        for (&atom, d) in atoms.iter().zip(&derivatives) {
            for k in 0..3 {
                bmat[(row, 3 * atom + k)] += d[k];
            }
        }
    }

    if zeroed > 0 {
        debug!("{} torsion rows zeroed at near-linear flanking angles", zeroed);
    }
    Ok(bmat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{bond_angle, dihedral};

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    fn numeric<F: Fn(&[Vector3<f64>]) -> f64>(points: &[Vector3<f64>], f: F) -> Vec<Vector3<f64>> {
        let h = 1e-6;
        let mut grads = Vec::new();
        for atom in 0..points.len() {
            let mut g = Vector3::zeros();
            for k in 0..3 {
                let mut plus = points.to_vec();
                let mut minus = points.to_vec();
                plus[atom][k] += h;
                minus[atom][k] -= h;
                g[k] = (f(&plus) - f(&minus)) / (2.0 * h);
            }
            grads.push(g);
        }
        grads
    }

    #[test]
    fn test_bond_row() {
        let [da, db] = bond_row(&Vector3::new(1.5, 0.0, 0.0), &Vector3::zeros());
        assert_eq!(da, Vector3::new(1.0, 0.0, 0.0));
        assert_eq!(db, Vector3::new(-1.0, 0.0, 0.0));
    }

    #[test]
    fn test_angle_row_matches_finite_difference() {
        let points = [
            Vector3::new(0.9, 0.1, -0.2),
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(-0.3, 1.0, 0.4),
        ];
        let analytic = angle_row(&points[0], &points[1], &points[2]);
        let numeric = numeric(&points, |p| bond_angle(&p[0], &p[1], &p[2]));
        for (a, n) in analytic.iter().zip(&numeric) {
            assert!((a - n).norm() < 1e-6, "{:?} vs {:?}", a, n);
        }
    }

    #[test]
    fn test_angle_normal_linear_is_unit() {
        let u = Vector3::new(1.0, 0.0, 0.0);
        let w = angle_normal(&u, &-u);
        assert!(approx_eq(w.norm(), 1.0, 1e-12));

        let along_z = Vector3::new(0.0, 0.0, 1.0);
        let w = angle_normal(&along_z, &-along_z);
        assert!(approx_eq(w.norm(), 1.0, 1e-12));
        assert!(w.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_angle_row_linear_is_finite() {
        let row = angle_row(
            &Vector3::new(-1.2, 0.0, 0.0),
            &Vector3::zeros(),
            &Vector3::new(1.2, 0.0, 0.0),
        );
        assert!(row.iter().all(|d| d.iter().all(|v| v.is_finite())));
        let total: Vector3<f64> = row.iter().sum();
        assert!(total.norm() < 1e-12);
    }

    #[test]
    fn test_torsion_row_matches_finite_difference() {
        let points = [
            Vector3::new(0.2, 1.3, 0.1),
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.5, 0.0, 0.0),
            Vector3::new(1.8, 0.7, 1.1),
        ];
        let analytic = torsion_row(&points[0], &points[1], &points[2], &points[3]).unwrap();
        let numeric = numeric(&points, |p| dihedral(&p[0], &p[1], &p[2], &p[3]));
        for (a, n) in analytic.iter().zip(&numeric) {
            assert!((a - n).norm() < 1e-5, "{:?} vs {:?}", a, n);
        }
    }

    #[test]
    fn test_torsion_row_undefined_for_linear_flank() {
        let row = torsion_row(
            &Vector3::new(-1.0, 0.0, 0.0),
            &Vector3::zeros(),
            &Vector3::new(1.0, 0.0, 0.0),
            &Vector3::new(1.5, 1.0, 0.0),
        );
        assert!(row.is_none());
    }
}
