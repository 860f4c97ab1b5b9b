//! Delocalized internal coordinate basis.
//!
//! The primitive set is redundant: for `M` primitives only `3N - 6` linear
//! combinations are independent. The basis is obtained from the singular
//! value decomposition of `G = B·Bᵀ`; the left singular vectors belonging to
//! the `3N - 6` largest singular values span the non-redundant space. Rows of
//! [`DelocalizedBasis::u`] are those vectors, so `U·Uᵀ = I`.
//!
//! Directions with a singular value below [`NULL_SINGULAR_VALUE`] are
//! discarded. Losing up to three degrees of freedom is tolerated (e.g. a
//! linear fragment); more is fatal.
//!
//! [`ReducedBMatrix`] holds `Bᵘ = U·B` and its generalized inverse
//! `Bᵘ⁺ = (Bᵘ·Bᵘᵀ)⁻¹·Bᵘ`, which move gradients into q-space and steps back
//! into Cartesian space.

use crate::error::{DicError, Result};
use log::{debug, warn};
use nalgebra::{DMatrix, DVector};

/// Singular values below this are treated as null directions.
pub const NULL_SINGULAR_VALUE: f64 = 1e-3;

/// Maximum number of degrees of freedom that may be lost.
pub const MAX_LOST_DOF: usize = 3;

/// Orthonormal row basis of the non-redundant internal coordinate space.
#[derive(Debug, Clone)]
pub struct DelocalizedBasis {
    /// Basis rows, `nicd × M`
    pub u: DMatrix<f64>,
    /// Singular values of `B·Bᵀ` in descending order
    pub singular_values: Vec<f64>,
    /// Number of discarded near-null directions
    pub lost: usize,
}

impl DelocalizedBasis {
    /// Builds the basis from a primitive B-matrix of `num_atoms` atoms.
    ///
    /// # Errors
    ///
    /// - [`DicError::TooFewAtoms`] for fewer than three atoms
    /// - [`DicError::DegenerateSpace`] when more than three directions are lost
    /// - [`DicError::SingularMatrix`] if the decomposition fails
    pub fn build(bmat: &DMatrix<f64>, num_atoms: usize) -> Result<Self> {
        if num_atoms < 3 {
            return Err(DicError::TooFewAtoms(num_atoms));
        }
        let expected = 3 * num_atoms - 6;
        let m = bmat.nrows();

        let g = bmat * bmat.transpose();
        let svd = g.svd(true, false);
        let left = svd.u.ok_or(DicError::SingularMatrix("SVD of B·Bᵀ"))?;

        let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
        order.sort_by(|&a, &b| svd.singular_values[b].total_cmp(&svd.singular_values[a]));
        let singular_values: Vec<f64> = order.iter().map(|&i| svd.singular_values[i]).collect();

        let leading = expected.min(m);
        let mut lost = singular_values[..leading]
            .iter()
            .filter(|&&s| s < NULL_SINGULAR_VALUE)
            .count();
        lost += expected - leading;

        let nicd = expected.saturating_sub(lost);
        if lost > MAX_LOST_DOF || nicd == 0 {
            return Err(DicError::DegenerateSpace {
                lost,
                available: nicd,
                expected,
            });
        }
        if lost > 0 {
            warn!("Lost {} degrees of freedom in the delocalized basis", lost);
        }

        let mut u = DMatrix::zeros(nicd, m);
        for (row, &col) in order.iter().take(nicd).enumerate() {
            u.set_row(row, &left.column(col).transpose());
        }

        debug!("Delocalized basis: {} coordinates from {} primitives", nicd, m);
        Ok(Self {
            u,
            singular_values,
            lost,
        })
    }

    /// Number of delocalized coordinates.
    pub fn dimension(&self) -> usize {
        self.u.nrows()
    }

    /// Number of primitives the basis combines.
    pub fn primitive_count(&self) -> usize {
        self.u.ncols()
    }
}

/// Reduced B-matrix `Bᵘ = U·B` and its generalized inverse.
#[derive(Debug, Clone)]
pub struct ReducedBMatrix {
    /// `U·B`, `nicd × 3N`
    pub bu: DMatrix<f64>,
    /// `(Bᵘ·Bᵘᵀ)⁻¹·Bᵘ`, `nicd × 3N`
    pub pinv: DMatrix<f64>,
}

impl ReducedBMatrix {
    /// Projects the primitive B-matrix onto the basis and inverts it.
    ///
    /// # Errors
    ///
    /// [`DicError::SingularMatrix`] when `Bᵘ·Bᵘᵀ` cannot be inverted.
    pub fn new(u: &DMatrix<f64>, bmat: &DMatrix<f64>) -> Result<Self> {
        if u.ncols() != bmat.nrows() {
            return Err(DicError::Dimension {
                context: "reduced B-matrix",
                expected: u.ncols(),
                actual: bmat.nrows(),
            });
        }
        let bu = u * bmat;
        let gram = &bu * bu.transpose();
        let inverse = gram.try_inverse().ok_or(DicError::SingularMatrix("Bᵘ·Bᵘᵀ"))?;
        let pinv = inverse * &bu;
        Ok(Self { bu, pinv })
    }

    /// Cartesian gradient → q-space gradient, `Bᵘ⁺·g`.
    pub fn project_gradient(&self, gradient: &DVector<f64>) -> Result<DVector<f64>> {
        if gradient.len() != self.pinv.ncols() {
            return Err(DicError::Dimension {
                context: "gradient projection",
                expected: self.pinv.ncols(),
                actual: gradient.len(),
            });
        }
        Ok(&self.pinv * gradient)
    }

    /// q-space step → Cartesian displacement, `Bᵘ⁺ᵀ·Δq`.
    pub fn cartesian_displacement(&self, dq: &DVector<f64>) -> Result<DVector<f64>> {
        if dq.len() != self.pinv.nrows() {
            return Err(DicError::Dimension {
                context: "Cartesian displacement",
                expected: self.pinv.nrows(),
                actual: dq.len(),
            });
        }
        Ok(self.pinv.tr_mul(dq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoordinateOptions;
    use crate::geometry::Geometry;
    use crate::primitives::PrimitiveSet;
    use crate::topology::Molecule;
    use crate::wilson::build_bmatrix;

    fn water_bmatrix() -> DMatrix<f64> {
        let theta = 104.5_f64.to_radians();
        let geometry = Geometry::new(
            vec!["O".into(), "H".into(), "H".into()],
            vec![0.0, 0.0, 0.0, 0.96, 0.0, 0.0, 0.96 * theta.cos(), 0.96 * theta.sin(), 0.0],
        );
        let mut mol = Molecule::new(geometry, &[(0, 1), (0, 2)]);
        let set = PrimitiveSet::build(&mut mol, &CoordinateOptions::default()).unwrap();
        build_bmatrix(&mol, &set).unwrap()
    }

    #[test]
    fn test_water_basis_is_orthonormal() {
        let bmat = water_bmatrix();
        let basis = DelocalizedBasis::build(&bmat, 3).unwrap();
        assert_eq!(basis.dimension(), 3);
        assert_eq!(basis.lost, 0);
        let identity = &basis.u * basis.u.transpose();
        assert!((identity - DMatrix::<f64>::identity(3, 3)).norm() < 1e-10);
    }

    #[test]
    fn test_singular_values_sorted() {
        let bmat = water_bmatrix();
        let basis = DelocalizedBasis::build(&bmat, 3).unwrap();
        assert!(basis.singular_values.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_reduced_inverse() {
        let bmat = water_bmatrix();
        let basis = DelocalizedBasis::build(&bmat, 3).unwrap();
        let reduced = ReducedBMatrix::new(&basis.u, &bmat).unwrap();
        let product = &reduced.bu * reduced.pinv.transpose();
        assert!((product - DMatrix::<f64>::identity(3, 3)).norm() < 1e-8);
    }

    #[test]
    fn test_missing_primitives_count_as_lost() {
        // 4 atoms (6 dimensions) described by 2 independent rows.
        let mut bmat = DMatrix::zeros(2, 12);
        bmat[(0, 0)] = 1.0;
        bmat[(0, 3)] = -1.0;
        bmat[(1, 6)] = 1.0;
        bmat[(1, 9)] = -1.0;
        let err = DelocalizedBasis::build(&bmat, 4).unwrap_err();
        assert!(matches!(
            err,
            DicError::DegenerateSpace {
                lost: 4,
                available: 2,
                expected: 6
            }
        ));
    }

    #[test]
    fn test_dimension_checks() {
        let bmat = water_bmatrix();
        let basis = DelocalizedBasis::build(&bmat, 3).unwrap();
        let reduced = ReducedBMatrix::new(&basis.u, &bmat).unwrap();
        assert!(reduced.project_gradient(&DVector::zeros(4)).is_err());
        assert!(reduced.cartesian_displacement(&DVector::zeros(2)).is_err());
    }
}
