//! Approximate Hessian and eigenvector-following step generation.
//!
//! The Hessian lives in primitive space as a diagonal guess built from
//! simple force-field style constants:
//!
//! - bonds: `0.35 * min(exp(-0.2 * (d - d_vdw)), 1)`, `d_vdw` the mean van der
//!   Waals radius of the two atoms, so long contacts are softer
//! - angles: `0.2`
//! - torsions: `0.035`
//!
//! and is projected into delocalized coordinates with `H = U·Hₚ·Uᵀ` whenever
//! the basis changes.
//!
//! # Step Generation
//!
//! [`HessianModel::eigen_step`] diagonalizes `H`, divides the gradient along
//! each mode by the eigenvalue and by a shift-times-scale factor, caps every
//! mode at `max_mode_step` and the full step at `max_step`. The predicted
//! energy change is reported in kcal/mol for diagnostics.
//!
//! # Updates
//!
//! With [`HessianUpdate::Bfgs`] the primitive Hessian receives a BFGS update
//! from successive primitive gradients and displacements. Each applied
//! update lowers the new-Hessian counter, which in turn shrinks the step scale.

use crate::config::{HessianUpdate, StepOptions, KCAL_MOL_PER_AU};
use crate::error::{DicError, Result};
use crate::primitives::PrimitiveSet;
use crate::topology::Topology;
use log::{debug, warn};
use nalgebra::{DMatrix, DVector};

/// Bond force constant prefactor
pub const BOND_FORCE_CONSTANT: f64 = 0.35;
/// Angle force constant
pub const ANGLE_FORCE_CONSTANT: f64 = 0.2;
/// Torsion force constant
pub const TORSION_FORCE_CONSTANT: f64 = 0.035;

const CLOSE_BOND_DECAY: f64 = 0.2;
const MIN_SHIFT: f64 = 0.005;
const NEGATIVE_MODE_OFFSET: f64 = 0.015;
const SMALL: f64 = 1e-14;
const ZERO_EIGENVALUE: f64 = 1e-12;

/// Diagonal primitive Hessian guess in row order.
pub fn primitive_guess<T: Topology + ?Sized>(topology: &T, set: &PrimitiveSet) -> DVector<f64> {
    let bonds = set.bonds.iter().map(|&(i, j)| {
        let d = topology.distance(i, j);
        let d_vdw = 0.5
            * (topology.vdw_radius(topology.atomic_number(i)) + topology.vdw_radius(topology.atomic_number(j)));
        BOND_FORCE_CONSTANT * (-CLOSE_BOND_DECAY * (d - d_vdw)).exp().min(1.0)
    });
    let angles = std::iter::repeat(ANGLE_FORCE_CONSTANT).take(set.angles.len());
    let torsions = std::iter::repeat(TORSION_FORCE_CONSTANT).take(set.torsions.len());
    DVector::from_iterator(set.len(), bonds.chain(angles).chain(torsions))
}

/// BFGS update of a Hessian.
///
/// ```text
/// H_new = H + (Δg·Δgᵀ)/(Δx·Δg) - (H·Δx)(H·Δx)ᵀ/(Δxᵀ·H·Δx)
/// ```
///
/// Skipped (the input is returned unchanged) when the curvature condition
/// `Δx·Δg > 0` fails or an input is non-finite.
pub fn update_bfgs(hessian: &DMatrix<f64>, delta_x: &DVector<f64>, delta_g: &DVector<f64>) -> DMatrix<f64> {
    let mut h_new = hessian.clone();

    if !delta_x.iter().all(|v| v.is_finite()) || !delta_g.iter().all(|v| v.is_finite()) {
        return h_new;
    }

    let dx_dg = delta_x.dot(delta_g);
    if dx_dg <= SMALL {
        return h_new;
    }

    let h_dx = hessian * delta_x;
    let dx_h_dx = delta_x.dot(&h_dx);
    if dx_h_dx.abs() <= SMALL {
        return h_new;
    }

    let n = hessian.nrows();
    for i in 0..n {
        for j in 0..=i {
            let update = delta_g[i] * delta_g[j] / dx_dg - h_dx[i] * h_dx[j] / dx_h_dx;
            h_new[(i, j)] += update;
            if i != j {
                h_new[(j, i)] += update;
            }
        }
    }
    h_new
}

/// Result of one eigenvector-following step.
#[derive(Debug, Clone)]
pub struct StepProposal {
    /// Step in delocalized coordinates
    pub dq: DVector<f64>,
    /// Predicted energy change in kcal/mol
    pub predicted_energy_change: f64,
    /// Lowest eigenvalue of the projected Hessian
    pub lowest_eigenvalue: f64,
    /// Eigenvalue shift used as a step divisor
    pub shift: f64,
    /// Step scale derived from the new-Hessian counter
    pub scale: f64,
}

/// Primitive Hessian plus its projection into the current basis.
#[derive(Debug, Clone)]
pub struct HessianModel {
    primitive: DMatrix<f64>,
    projected: DMatrix<f64>,
    inverse: Option<DMatrix<f64>>,
    new_hess: u32,
    options: StepOptions,
}

impl HessianModel {
    /// Builds the diagonal guess for a primitive set.
    ///
    /// The projection is empty until [`project`](Self::project) is called.
    pub fn new<T: Topology + ?Sized>(topology: &T, set: &PrimitiveSet, options: &StepOptions) -> Self {
        Self::from_primitive(DMatrix::from_diagonal(&primitive_guess(topology, set)), options)
    }

    /// Wraps an existing primitive Hessian.
    pub fn from_primitive(primitive: DMatrix<f64>, options: &StepOptions) -> Self {
        Self {
            primitive,
            projected: DMatrix::zeros(0, 0),
            inverse: None,
            new_hess: options.new_hess,
            options: options.clone(),
        }
    }

    /// Projects the primitive Hessian onto basis rows `u`.
    pub fn project(&mut self, u: &DMatrix<f64>) -> Result<()> {
        if u.ncols() != self.primitive.nrows() {
            return Err(DicError::Dimension {
                context: "Hessian projection",
                expected: self.primitive.nrows(),
                actual: u.ncols(),
            });
        }
        self.projected = u * &self.primitive * u.transpose();
        self.inverse = self.projected.clone().try_inverse();
        if self.inverse.is_none() {
            warn!("Projected Hessian is singular; no inverse kept");
        }
        Ok(())
    }

    /// Primitive-space Hessian.
    pub fn primitive(&self) -> &DMatrix<f64> {
        &self.primitive
    }

    /// Hessian in delocalized coordinates.
    pub fn projected(&self) -> &DMatrix<f64> {
        &self.projected
    }

    /// Inverse of the projected Hessian, if it exists.
    pub fn inverse(&self) -> Option<&DMatrix<f64>> {
        self.inverse.as_ref()
    }

    /// Current value of the new-Hessian counter.
    pub fn new_hess(&self) -> u32 {
        self.new_hess
    }

    /// Overrides the new-Hessian counter (checkpoint restore).
    pub fn set_new_hess(&mut self, value: u32) {
        self.new_hess = value;
    }

    /// Effective step scale.
    pub fn scale(&self) -> f64 {
        let scale = if self.new_hess > 0 {
            self.options.scale_qn * f64::from(self.new_hess)
        } else {
            self.options.scale_qn
        };
        scale.min(self.options.max_scale)
    }

    /// Applies the configured quasi-Newton update in primitive space.
    ///
    /// Returns `true` when the Hessian changed.
    pub fn update(&mut self, delta_x: &DVector<f64>, delta_g: &DVector<f64>) -> bool {
        if self.options.hessian_update != HessianUpdate::Bfgs {
            return false;
        }
        if delta_x.len() != self.primitive.nrows() || delta_g.len() != self.primitive.nrows() {
            warn!("Skipping Hessian update: dimension mismatch");
            return false;
        }
        let updated = update_bfgs(&self.primitive, delta_x, delta_g);
        if updated == self.primitive {
            debug!("BFGS update skipped (curvature condition)");
            return false;
        }
        self.primitive = updated;
        self.new_hess = self.new_hess.saturating_sub(1);
        true
    }

    /// Eigenvector-following step for a q-space gradient.
    pub fn eigen_step(&self, gradq: &DVector<f64>) -> Result<StepProposal> {
        let n = self.projected.nrows();
        if gradq.len() != n || n == 0 {
            return Err(DicError::Dimension {
                context: "eigenvector-following step",
                expected: n,
                actual: gradq.len(),
            });
        }

        let eigen = self.projected.clone().symmetric_eigen();
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| eigen.eigenvalues[a].total_cmp(&eigen.eigenvalues[b]));

        let lowest = eigen.eigenvalues[order[0]];
        let mut shift = if lowest < 0.0 {
            -lowest + NEGATIVE_MODE_OFFSET
        } else {
            MIN_SHIFT
        };
        if shift.abs() < MIN_SHIFT {
            shift = MIN_SHIFT;
        }
        let scale = self.scale();
        let max_mode = self.options.max_mode_step;

        let mut dq = DVector::zeros(n);
        for &mode in &order {
            let e = eigen.eigenvalues[mode];
            if e.abs() < ZERO_EIGENVALUE {
                continue;
            }
            let v = eigen.eigenvectors.column(mode);
            let ge = v.dot(gradq);
            let dqe = (-ge / e / (shift * scale)).clamp(-max_mode, max_mode);
            dq += v * dqe;
        }

        let norm = dq.norm();
        debug!("Step norm {:.4} (max {:.4})", norm, self.options.max_step);
        if norm > self.options.max_step {
            dq *= self.options.max_step / norm;
        }

        let predicted = (dq.dot(gradq) + 0.5 * dq.dot(&(&self.projected * &dq))) * KCAL_MOL_PER_AU;

        Ok(StepProposal {
            dq,
            predicted_energy_change: predicted,
            lowest_eigenvalue: lowest,
            shift,
            scale,
        })
    }
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

    fn identity_model(diag: Vec<f64>, options: &StepOptions) -> HessianModel {
        let n = diag.len();
        let mut model = HessianModel::from_primitive(DMatrix::from_diagonal(&DVector::from_vec(diag)), options);
        model.project(&DMatrix::identity(n, n)).unwrap();
        model
    }

    #[test]
    fn test_primitive_guess() {
        let theta = 104.5_f64.to_radians();
        let geometry = Geometry::new(
            vec!["O".into(), "H".into(), "H".into()],
            vec![0.0, 0.0, 0.0, 0.96, 0.0, 0.0, 0.96 * theta.cos(), 0.96 * theta.sin(), 0.0],
        );
        let mut mol = Molecule::new(geometry, &[(0, 1), (0, 2)]);
        let set = PrimitiveSet::build(&mut mol, &CoordinateOptions::default()).unwrap();
        let guess = primitive_guess(&mol, &set);
        // 0.96 Angstrom is shorter than the O/H vdW mean, so the cap applies.
        assert!(approx_eq(guess[0], 0.35, 1e-12));
        assert!(approx_eq(guess[1], 0.35, 1e-12));
        assert!(approx_eq(guess[2], 0.2, 1e-12));
    }

    #[test]
    fn test_long_bond_is_softer() {
        let geometry = Geometry::new(
            vec!["C".into(), "C".into(), "C".into()],
            vec![0.0, 0.0, 0.0, 3.7, 0.0, 0.0, 3.7, 1.5, 0.0],
        );
        let mut mol = Molecule::new(geometry, &[(0, 1), (1, 2)]);
        let set = PrimitiveSet::build(&mut mol, &CoordinateOptions::default()).unwrap();
        let guess = primitive_guess(&mol, &set);
        assert!(approx_eq(guess[0], 0.35 * (-0.2_f64 * 2.0).exp(), 1e-12));
    }

    #[test]
    fn test_projection_and_inverse() {
        let model = identity_model(vec![0.5, 0.2, 0.035], &StepOptions::default());
        assert!(approx_eq(model.projected()[(0, 0)], 0.5, 1e-12));
        let inverse = model.inverse().unwrap();
        assert!(approx_eq(inverse[(2, 2)], 1.0 / 0.035, 1e-9));
    }

    #[test]
    fn test_scale_from_counter() {
        let options = StepOptions::default();
        let mut model = identity_model(vec![1.0], &options);
        assert!(approx_eq(model.scale(), 5.0, 1e-12));
        model.set_new_hess(0);
        assert!(approx_eq(model.scale(), 1.0, 1e-12));
        model.set_new_hess(50);
        assert!(approx_eq(model.scale(), 10.0, 1e-12));
    }

    #[test]
    fn test_eigen_step_small_gradient() {
        let model = identity_model(vec![0.5, 0.2], &StepOptions::default());
        let gradq = DVector::from_vec(vec![1e-4, -2e-4]);
        let step = model.eigen_step(&gradq).unwrap();
        // -g / e / (shift * scale) with shift 0.005 and scale 5
        assert!(approx_eq(step.dq[0], -1e-4 / 0.5 / 0.025, 1e-12));
        assert!(approx_eq(step.dq[1], 2e-4 / 0.2 / 0.025, 1e-12));
        assert!(approx_eq(step.shift, 0.005, 1e-15));
        let expected = (-8.8e-6 + 0.5 * (0.5 * 0.008 * 0.008 + 0.2 * 0.04 * 0.04)) * KCAL_MOL_PER_AU;
        assert!(approx_eq(step.predicted_energy_change, expected, 1e-9));
    }

    #[test]
    fn test_eigen_step_is_capped() {
        let model = identity_model(vec![0.5, 0.5, 0.5], &StepOptions::default());
        let gradq = DVector::from_vec(vec![1.0, 1.0, -1.0]);
        let step = model.eigen_step(&gradq).unwrap();
        assert!(approx_eq(step.dq.norm(), 0.1, 1e-12));
        assert!(step.dq.dot(&gradq) < 0.0);
    }

    #[test]
    fn test_negative_eigenvalue_shift() {
        let model = identity_model(vec![-0.1, 0.5], &StepOptions::default());
        let step = model.eigen_step(&DVector::from_vec(vec![1e-4, 1e-4])).unwrap();
        assert!(approx_eq(step.lowest_eigenvalue, -0.1, 1e-12));
        assert!(approx_eq(step.shift, 0.115, 1e-12));
    }

    #[test]
    fn test_bfgs_update_decrements_counter() {
        let options = StepOptions {
            hessian_update: HessianUpdate::Bfgs,
            ..Default::default()
        };
        let mut model = identity_model(vec![1.0, 1.0, 1.0], &options);
        let dx = DVector::from_vec(vec![0.1, 0.2, 0.3]);
        let dg = DVector::from_vec(vec![0.15, 0.25, 0.35]);
        assert!(model.update(&dx, &dg));
        assert_eq!(model.new_hess(), 4);
        let h = model.primitive();
        assert!(approx_eq((h - h.transpose()).norm(), 0.0, 1e-12));
        // Secant condition H·Δx = Δg
        assert!(((h * &dx) - &dg).norm() < 1e-12);
    }

    #[test]
    fn test_update_disabled_by_default() {
        let mut model = identity_model(vec![1.0, 1.0], &StepOptions::default());
        let dx = DVector::from_vec(vec![0.1, 0.2]);
        let dg = DVector::from_vec(vec![0.1, 0.2]);
        assert!(!model.update(&dx, &dg));
        assert_eq!(model.new_hess(), 5);
    }

    #[test]
    fn test_bfgs_negative_curvature_skipped() {
        let h = DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, 1.0, 1.0]));
        let dx = DVector::from_vec(vec![0.1, 0.2, 0.3]);
        let dg = DVector::from_vec(vec![-0.1, -0.2, -0.3]);
        let h_new = update_bfgs(&h, &dx, &dg);
        assert!(approx_eq((h_new - h).norm(), 0.0, 1e-12));
    }
}
