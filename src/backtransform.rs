//! Internal → Cartesian back-transform.
//!
//! A step `Δq` in delocalized coordinates has no closed-form Cartesian
//! counterpart. [`BackTransform::apply`] solves for it iteratively: each
//! iteration moves the atoms by `Bᵘ⁺ᵀ·Δq / scale`, re-measures `q` and
//! recomputes the remaining `Δq = target - q`. The basis is held fixed
//! throughout.
//!
//! # Safeguards
//!
//! - **Rollback**: if the residual grows more than `divergence_ratio` times
//!   in one iteration, the move is undone and the damping divisor doubled.
//! - **Best geometry**: if the last move is larger than
//!   `max_displacement_per_atom · N`, the geometry reached by the smallest
//!   move that was not rolled back is used instead.
//! - **Retry**: if even that is too large, the atoms return to the start and
//!   the attempt is repeated with half the requested step. Retries are
//!   counted over the lifetime of the [`BackTransform`]; once
//!   `max_retries` is reached the step degrades to the start geometry.
//!
//! [`BackTransform::displace`] is the simpler variant used to place
//! interpolated geometries: no rollback and no retries, only damping when the
//! move grows.

use crate::config::BackTransformOptions;
use crate::coordinates::DelocalizedCoordinates;
use crate::error::{DicError, Result};
use crate::topology::Topology;
use log::{debug, info, warn};
use nalgebra::DVector;

const DISPLACE_ITERATIONS: usize = 10;
const DISPLACE_DAMPING: f64 = 1.5;

/// Result of [`BackTransform::apply`].
#[derive(Debug, Clone, PartialEq)]
pub struct BackTransformOutcome {
    /// The accepted attempt met the residual or magnitude criterion
    pub converged: bool,
    /// The atoms were returned to the start geometry
    pub degraded: bool,
    /// The lifetime retry ceiling was hit during this call
    pub ceiling_reached: bool,
    /// Retries consumed by this call
    pub retries: usize,
    /// Iterations over all attempts
    pub iterations: usize,
    /// Rollbacks over all attempts
    pub rollbacks: usize,
    /// Norm of `target - q` at the accepted geometry
    pub residual: f64,
    /// Size of the last accepted Cartesian update, Angstrom
    pub displacement: f64,
}

/// Result of [`BackTransform::displace`].
#[derive(Debug, Clone, PartialEq)]
pub struct DisplaceOutcome {
    /// Iterations performed
    pub iterations: usize,
    /// Squared magnitude of the last Cartesian update
    pub magnitude: f64,
    /// Norm of `target - q` at the final geometry
    pub residual: f64,
}

struct Attempt {
    converged: bool,
    iterations: usize,
    rollbacks: usize,
    last_magnitude: f64,
    best: Option<(f64, DVector<f64>)>,
}

/// Iterative back-transform solver with rollback and bounded retries.
#[derive(Debug, Clone)]
pub struct BackTransform {
    options: BackTransformOptions,
    retries: usize,
    large_moves: usize,
}

impl BackTransform {
    /// Creates a solver with a zero retry counter.
    pub fn new(options: BackTransformOptions) -> Self {
        Self {
            options,
            retries: 0,
            large_moves: 0,
        }
    }

    /// Retries consumed so far.
    pub fn retries(&self) -> usize {
        self.retries
    }

    /// Restores the retry counter (checkpoint restore).
    pub fn set_retries(&mut self, retries: usize) {
        self.retries = retries;
    }

    /// Whether no retries are left.
    pub fn ceiling_reached(&self) -> bool {
        self.retries >= self.options.max_retries
    }

    /// Consecutive steps whose final move exceeded the size threshold.
    pub fn large_moves(&self) -> usize {
        self.large_moves
    }

    /// Solver options.
    pub fn options(&self) -> &BackTransformOptions {
        &self.options
    }

    /// Moves the atoms so that `q` changes by `dq`.
    ///
    /// Never fails for numerical reasons: divergence ends in a degraded step
    /// at the start geometry. Errors come only from dimension mismatches or
    /// from refreshing the start geometry.
    pub fn apply<T: Topology>(
        &mut self,
        coords: &mut DelocalizedCoordinates<T>,
        dq: &DVector<f64>,
    ) -> Result<BackTransformOutcome> {
        if dq.len() != coords.coordinate_dimension() {
            return Err(DicError::Dimension {
                context: "back-transform step",
                expected: coords.coordinate_dimension(),
                actual: dq.len(),
            });
        }

        let threshold = self.options.max_displacement_per_atom * coords.atom_count() as f64;
        let start = coords.cartesian();
        let q_start = coords.current_q().clone();
        let mut request = dq.clone();
        let mut retries = 0;
        let mut iterations = 0;
        let mut rollbacks = 0;

        loop {
            let target = &q_start + &request;
            let attempt = self.attempt(coords, &target, &request)?;
            iterations += attempt.iterations;
            rollbacks += attempt.rollbacks;

            let last = attempt.last_magnitude.sqrt();
            if last.is_finite() && last <= threshold {
                self.large_moves = 0;
                return Ok(BackTransformOutcome {
                    converged: attempt.converged,
                    degraded: false,
                    ceiling_reached: false,
                    retries,
                    iterations,
                    rollbacks,
                    residual: (&target - coords.current_q()).norm(),
                    displacement: last,
                });
            }

            self.large_moves += 1;
            if let Some((best_magnitude, best_coords)) = attempt.best {
                let best = best_magnitude.sqrt();
                if best <= threshold {
                    debug!("Using smallest back-transform move ({:.5} Angstrom)", best);
                    coords.set_cartesian(&best_coords)?;
                    return Ok(BackTransformOutcome {
                        converged: false,
                        degraded: false,
                        ceiling_reached: false,
                        retries,
                        iterations,
                        rollbacks,
                        residual: (&target - coords.current_q()).norm(),
                        displacement: best,
                    });
                }
            }

            coords.set_cartesian(&start)?;
            if self.ceiling_reached() {
                warn!(
                    "Back-transform retry ceiling ({}) reached; keeping the start geometry",
                    self.options.max_retries
                );
                return Ok(BackTransformOutcome {
                    converged: false,
                    degraded: true,
                    ceiling_reached: true,
                    retries,
                    iterations,
                    rollbacks,
                    residual: request.norm(),
                    displacement: 0.0,
                });
            }

            self.retries += 1;
            retries += 1;
            request *= 0.5;
            info!(
                "Back-transform move too large; retry {} with step norm {:.5}",
                self.retries,
                request.norm()
            );
        }
    }

    fn attempt<T: Topology>(
        &self,
        coords: &mut DelocalizedCoordinates<T>,
        target: &DVector<f64>,
        request: &DVector<f64>,
    ) -> Result<Attempt> {
        let mut scale = self.options.initial_scale;
        let mut dq = request.clone();
        let mut previous_norm = dq.norm();
        let mut attempt = Attempt {
            converged: false,
            iterations: 0,
            rollbacks: 0,
            last_magnitude: f64::INFINITY,
            best: None,
        };

        for _ in 0..self.options.max_iterations {
            attempt.iterations += 1;
            let xyzd = coords.cartesian_displacement(&dq)?;
            if xyzd.iter().any(|v| !v.is_finite()) {
                debug!("Non-finite Cartesian displacement; attempt diverged");
                attempt.last_magnitude = f64::INFINITY;
                return Ok(attempt);
            }

            let magnitude = xyzd.norm_squared();
            attempt.last_magnitude = magnitude;
            let before = coords.cartesian();
            let moved = &before + &xyzd / scale;
            if let Err(err) = coords.set_cartesian(&moved) {
                debug!("Refresh failed after back-transform move: {}", err);
                coords.set_cartesian(&before)?;
                attempt.last_magnitude = f64::INFINITY;
                return Ok(attempt);
            }

            dq = target - coords.current_q();
            let norm = dq.norm();
            if norm >= self.options.dq_tolerance && norm > self.options.divergence_ratio * previous_norm {
                debug!(
                    "Back-transform residual grew {:.3e} -> {:.3e}; rolling back",
                    previous_norm, norm
                );
                coords.set_cartesian(&before)?;
                scale *= 2.0;
                attempt.rollbacks += 1;
                dq = target - coords.current_q();
            } else if attempt.best.as_ref().map_or(true, |(m, _)| magnitude < *m) {
                // Only geometries that were kept are candidates
                attempt.best = Some((magnitude, moved));
            }

            if norm < self.options.dq_tolerance {
                attempt.converged = true;
                break;
            }
            previous_norm = dq.norm();

            if magnitude < self.options.magnitude_tolerance {
                attempt.converged = true;
                break;
            }
        }

        Ok(attempt)
    }

    /// Moves the atoms toward `q + dq` without rollback or retries.
    ///
    /// Runs at most ten iterations, increasing the damping by 1.5 whenever
    /// the move grows. A non-finite update returns the atoms to the start.
    pub fn displace<T: Topology>(
        coords: &mut DelocalizedCoordinates<T>,
        dq: &DVector<f64>,
    ) -> Result<DisplaceOutcome> {
        if dq.len() != coords.coordinate_dimension() {
            return Err(DicError::Dimension {
                context: "displacement",
                expected: coords.coordinate_dimension(),
                actual: dq.len(),
            });
        }
        let options = BackTransformOptions::default();
        let start = coords.cartesian();
        let target = coords.current_q() + dq;
        let mut step = dq.clone();
        let mut scale = options.initial_scale;
        let mut previous = f64::INFINITY;
        let mut outcome = DisplaceOutcome {
            iterations: 0,
            magnitude: 0.0,
            residual: dq.norm(),
        };

        for _ in 0..DISPLACE_ITERATIONS {
            outcome.iterations += 1;
            let xyzd = coords.cartesian_displacement(&step)?;
            if xyzd.iter().any(|v| !v.is_finite()) {
                warn!("Non-finite displacement; restoring start geometry");
                coords.set_cartesian(&start)?;
                outcome.residual = dq.norm();
                return Ok(outcome);
            }
            let magnitude = xyzd.norm_squared();
            if magnitude > previous {
                scale *= DISPLACE_DAMPING;
            }
            previous = magnitude;
            outcome.magnitude = magnitude;

            let moved = coords.cartesian() + xyzd / scale;
            coords.set_cartesian(&moved)?;
            step = &target - coords.current_q();
            if magnitude < options.magnitude_tolerance {
                break;
            }
        }

        outcome.residual = (&target - coords.current_q()).norm();
        Ok(outcome)
    }
}
