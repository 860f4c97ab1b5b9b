//! Geometry optimization in delocalized internal coordinates.
//!
//! [`DicOptimizer`] ties the pieces together. One step is:
//!
//! 1. Energy and Cartesian gradient from the level of theory
//! 2. Basis rebuild (or refresh) at the current geometry
//! 3. Gradient projection into q-space
//! 4. Optional primitive Hessian update, then projection into the new basis
//! 5. Eigenvector-following step
//! 6. Back-transform to Cartesian coordinates
//!
//! [`DicOptimizer::optimize`] runs a fixed number of steps. Stopping on
//! convergence is up to the caller; [`check_convergence`] and
//! [`DicOptimizer::optimize_until_converged`] cover the common case.

use crate::backtransform::{BackTransform, BackTransformOutcome};
use crate::config::{Config, Thresholds};
use crate::coordinates::DelocalizedCoordinates;
use crate::error::{DicError, Result};
use crate::hessian::{HessianModel, StepProposal};
use crate::oracle::{EnergyOracle, LevelOfTheory};
use crate::topology::Topology;
use crate::trajectory::{Frame, TrajectorySink};
use log::{error, info};
use nalgebra::DVector;
use std::f64::consts::PI;

/// Diagnostics of one optimization step.
#[derive(Debug, Clone)]
pub struct StepReport {
    /// Step number, starting at 1
    pub step: usize,
    /// Energy in kcal/mol at the start of the step
    pub energy: f64,
    /// q-space gradient at the start of the step
    pub gradq: DVector<f64>,
    /// Norm of the proposed q-space step
    pub step_norm: f64,
    /// Predicted energy change in kcal/mol
    pub predicted_energy_change: f64,
    /// Cartesian coordinates before the step
    pub x_old: DVector<f64>,
    /// Cartesian coordinates after the step
    pub x_new: DVector<f64>,
    /// Back-transform diagnostics
    pub back_transform: BackTransformOutcome,
}

impl StepReport {
    /// Convergence status of this step against `thresholds`.
    pub fn convergence(&self, thresholds: &Thresholds) -> ConvergenceStatus {
        check_convergence(&self.x_old, &self.x_new, &self.gradq, thresholds)
    }
}

/// Per-criterion convergence flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvergenceStatus {
    /// RMS gradient below threshold
    pub rms_grad_converged: bool,
    /// Largest gradient component below threshold
    pub max_grad_converged: bool,
    /// RMS displacement below threshold
    pub rms_disp_converged: bool,
    /// Largest displacement below threshold
    pub max_disp_converged: bool,
}

impl ConvergenceStatus {
    /// All criteria met.
    pub fn is_converged(&self) -> bool {
        self.rms_grad_converged && self.max_grad_converged && self.rms_disp_converged && self.max_disp_converged
    }
}

/// Checks gradient and displacement criteria.
///
/// `grad` is usually the q-space gradient; displacements are Cartesian.
/// Non-finite values never count as converged.
pub fn check_convergence(
    x_old: &DVector<f64>,
    x_new: &DVector<f64>,
    grad: &DVector<f64>,
    thresholds: &Thresholds,
) -> ConvergenceStatus {
    let disp = x_new - x_old;

    let rms_disp = disp.norm() / (disp.len().max(1) as f64).sqrt();
    let max_disp = disp.iter().map(|x| x.abs()).fold(0.0, f64::max);

    let rms_grad = grad.norm() / (grad.len().max(1) as f64).sqrt();
    let max_grad = grad.iter().map(|x| x.abs()).fold(0.0, f64::max);
    let finite = grad.iter().chain(disp.iter()).all(|v| v.is_finite());

    ConvergenceStatus {
        rms_grad_converged: finite && rms_grad < thresholds.rms_g,
        max_grad_converged: finite && max_grad < thresholds.max_g,
        rms_disp_converged: finite && rms_disp < thresholds.rms,
        max_disp_converged: finite && max_disp < thresholds.max_dis,
    }
}

/// Result of [`DicOptimizer::optimize_until_converged`].
#[derive(Debug, Clone)]
pub struct OptimizationSummary {
    /// Convergence criteria met before the budget ran out
    pub converged: bool,
    /// Step reports in order
    pub reports: Vec<StepReport>,
}

/// Delocalized internal coordinate geometry optimizer.
#[derive(Debug, Clone)]
pub struct DicOptimizer<T: Topology> {
    coords: DelocalizedCoordinates<T>,
    hessian: HessianModel,
    back_transform: BackTransform,
    config: Config,
    step: usize,
    previous: Option<(DVector<f64>, DVector<f64>)>,
}

impl<T: Topology> DicOptimizer<T> {
    /// Builds coordinates and the Hessian guess for a topology.
    pub fn new(topology: T, config: Config) -> Result<Self> {
        let coords = DelocalizedCoordinates::new(topology, &config.coordinates)?;
        Self::from_coordinates(coords, config)
    }

    /// Wraps prepared coordinates, e.g. built from a primitive-set union.
    pub fn from_coordinates(coords: DelocalizedCoordinates<T>, config: Config) -> Result<Self> {
        let hessian = HessianModel::new(coords.topology(), coords.primitives(), &config.step);
        Self::with_state(coords, hessian, config, 0, 0)
    }

    /// Restores an optimizer from saved state.
    pub fn with_state(
        coords: DelocalizedCoordinates<T>,
        mut hessian: HessianModel,
        config: Config,
        step: usize,
        retries: usize,
    ) -> Result<Self> {
        hessian.project(&coords.basis().u)?;
        let mut back_transform = BackTransform::new(config.back_transform.clone());
        back_transform.set_retries(retries);
        Ok(Self {
            coords,
            hessian,
            back_transform,
            config,
            step,
            previous: None,
        })
    }

    /// Number of delocalized coordinates.
    pub fn coordinate_dimension(&self) -> usize {
        self.coords.coordinate_dimension()
    }

    /// Current coordinate vector.
    pub fn current_q(&self) -> &DVector<f64> {
        self.coords.current_q()
    }

    /// Re-measures the geometry with the basis held fixed.
    pub fn refresh_from_cartesian(&mut self) -> Result<()> {
        self.coords.refresh_from_cartesian()
    }

    /// Cartesian gradient (Hartree/Angstrom) → q-space gradient.
    pub fn project_gradient(&self, gradient: &DVector<f64>) -> Result<DVector<f64>> {
        self.coords.project_gradient(gradient)
    }

    /// Eigenvector-following step for a q-space gradient.
    pub fn propose_step(&self, gradq: &DVector<f64>) -> Result<StepProposal> {
        self.hessian.eigen_step(gradq)
    }

    /// Back-transforms a q-space step onto the atoms.
    pub fn apply_step(&mut self, dq: &DVector<f64>) -> Result<BackTransformOutcome> {
        self.back_transform.apply(&mut self.coords, dq)
    }

    /// Coordinates, primitives and basis.
    pub fn coordinates(&self) -> &DelocalizedCoordinates<T> {
        &self.coords
    }

    /// Hessian model.
    pub fn hessian(&self) -> &HessianModel {
        &self.hessian
    }

    /// Active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Steps taken so far.
    pub fn step_count(&self) -> usize {
        self.step
    }

    /// Back-transform retries consumed so far.
    pub fn retries(&self) -> usize {
        self.back_transform.retries()
    }

    /// Consecutive steps whose back-transform move was too large.
    pub fn large_moves(&self) -> usize {
        self.back_transform.large_moves()
    }

    /// Flattened Cartesian coordinates in Angstrom.
    pub fn cartesian(&self) -> DVector<f64> {
        self.coords.cartesian()
    }

    /// Consumes the optimizer and returns the topology at its final geometry.
    pub fn into_topology(self) -> T {
        self.coords.into_topology()
    }

    /// Performs one optimization step.
    pub fn opt_step<O: EnergyOracle>(&mut self, lot: &mut LevelOfTheory<O>) -> Result<StepReport> {
        let x_old = self.coords.cartesian();
        let energy = lot.energy(&x_old)?;
        let gradient = lot.gradient(&x_old)?;

        if self.config.rebuild_basis_each_step {
            self.coords.rebuild_basis()?;
        } else {
            self.coords.refresh_from_cartesian()?;
        }
        let gradq = self.coords.project_gradient(&gradient)?;

        self.update_hessian(&gradq);
        self.hessian.project(&self.coords.basis().u)?;

        let proposal = self.hessian.eigen_step(&gradq)?;
        let outcome = self.back_transform.apply(&mut self.coords, &proposal.dq)?;
        self.step += 1;

        let report = StepReport {
            step: self.step,
            energy,
            step_norm: proposal.dq.norm(),
            predicted_energy_change: proposal.predicted_energy_change,
            x_new: self.coords.cartesian(),
            x_old,
            gradq,
            back_transform: outcome,
        };
        info!(
            "Step {:3}  E = {:16.8} kcal/mol  |gq| = {:.3e}  |dq| = {:.4}  predE = {:8.4}  retries = {}",
            report.step,
            report.energy,
            report.gradq.norm(),
            report.step_norm,
            report.predicted_energy_change,
            self.back_transform.retries()
        );
        Ok(report)
    }

    /// Runs `nsteps` optimization steps.
    ///
    /// Accepted steps are reported to `sink`. A step that exhausts the
    /// back-transform retry ceiling ends the run with
    /// [`DicError::RetryCeilingExhausted`].
    pub fn optimize<O: EnergyOracle>(
        &mut self,
        lot: &mut LevelOfTheory<O>,
        nsteps: usize,
        mut sink: Option<&mut dyn TrajectorySink>,
    ) -> Result<Vec<StepReport>> {
        let mut reports = Vec::with_capacity(nsteps);
        for _ in 0..nsteps {
            let report = self.opt_step(lot)?;
            if report.back_transform.ceiling_reached {
                error!("Optimization stopped at step {}: back-transform retries exhausted", report.step);
                return Err(DicError::RetryCeilingExhausted(self.back_transform.retries()));
            }
            if !report.back_transform.degraded {
                if let Some(sink) = sink.as_deref_mut() {
                    sink.record(&Frame {
                        step: report.step,
                        energy: report.energy,
                        coords: report.x_new.clone(),
                    });
                }
            }
            reports.push(report);
        }
        Ok(reports)
    }

    /// Runs up to `config.max_steps` steps, stopping once a step meets every
    /// convergence threshold.
    pub fn optimize_until_converged<O: EnergyOracle>(
        &mut self,
        lot: &mut LevelOfTheory<O>,
        mut sink: Option<&mut dyn TrajectorySink>,
    ) -> Result<OptimizationSummary> {
        let mut reports = Vec::new();
        for _ in 0..self.config.max_steps {
            let mut batch = self.optimize(
                lot,
                1,
                sink.as_mut().map(|s| &mut **s as &mut dyn TrajectorySink),
            )?;
            let Some(report) = batch.pop() else { break };
            let converged = report.convergence(&self.config.thresholds).is_converged();
            reports.push(report);
            if converged {
                info!("Converged after {} steps", self.step);
                return Ok(OptimizationSummary {
                    converged: true,
                    reports,
                });
            }
        }
        info!("Not converged within {} steps", self.config.max_steps);
        Ok(OptimizationSummary {
            converged: false,
            reports,
        })
    }

    fn update_hessian(&mut self, gradq: &DVector<f64>) {
        let values = self.coords.values().stacked();
        let gprim = self.coords.primitive_gradient(gradq);
        if let Some((old_values, old_gprim)) = &self.previous {
            let mut dx = &values - old_values;
            let first_torsion = values.len() - self.coords.primitives().torsions.len();
            for v in dx.iter_mut().skip(first_torsion) {
                *v = wrap_radians(*v);
            }
            let dg = &gprim - old_gprim;
            self.hessian.update(&dx, &dg);
        }
        self.previous = Some((values, gprim));
    }
}

fn wrap_radians(mut value: f64) -> f64 {
    while value > PI {
        value -= 2.0 * PI;
    }
    while value <= -PI {
        value += 2.0 * PI;
    }
    value
}
