//! Configuration structures for delocalized internal coordinate optimizations.
//!
//! This module defines all tunable parameters of the engine, grouped by the
//! component that consumes them:
//!
//! - [`CoordinateOptions`]: primitive coordinate construction
//! - [`StepOptions`]: eigenvector-following step generation
//! - [`BackTransformOptions`]: iterative internal → Cartesian back-transform
//! - [`Thresholds`]: convergence criteria for caller-level stopping
//! - [`Config`]: everything above plus the iteration budget
//!
//! All defaults reproduce the reference parameter set. Values can be overridden
//! programmatically or from INI files through [`settings`](crate::settings).
//!
//! Lengths are in Angstrom, angles in radians, energies in the oracle-native
//! unit (Hartree) unless noted otherwise.

use serde::{Deserialize, Serialize};

/// Unit conversion constant: Angstrom to Bohr
pub const ANGSTROM_TO_BOHR: f64 = 1.8897261;
/// Unit conversion constant: Bohr to Angstrom
pub const BOHR_TO_ANGSTROM: f64 = 1.0 / ANGSTROM_TO_BOHR;
/// Unit conversion constant: kcal/mol per Hartree
pub const KCAL_MOL_PER_AU: f64 = 627.5095;

/// Selects which topology post-processing runs while building primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CoordinateMode {
    /// Plain topology: bonds, angles and torsions exactly as enumerated.
    Static,
    /// Fragment bridging plus linear-angle ties (geometry optimization).
    #[default]
    Optimization,
    /// Fragment bridging only, linear angles left untouched.
    FragmentsOnly,
}

impl CoordinateMode {
    /// Whether disconnected fragments are bridged with a new bond.
    pub fn bridges_fragments(self) -> bool {
        matches!(self, CoordinateMode::Optimization | CoordinateMode::FragmentsOnly)
    }

    /// Whether near-linear angles receive cross-link bonds and torsions.
    pub fn ties_linear_angles(self) -> bool {
        matches!(self, CoordinateMode::Optimization)
    }

    /// Parses the numeric (`0`, `1`, `2`) or named form used in settings files.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "0" | "static" => Some(CoordinateMode::Static),
            "1" | "optimization" | "opt" => Some(CoordinateMode::Optimization),
            "2" | "fragments" | "fragments_only" => Some(CoordinateMode::FragmentsOnly),
            _ => None,
        }
    }
}

/// Primitive coordinate construction parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinateOptions {
    /// Topology post-processing mode
    pub mode: CoordinateMode,
    /// Maximum distance (Angstrom) for a fragment-bridging bond
    pub max_frag_dist: f64,
    /// Angle (degrees) above which an angle is treated as linear
    pub linear_angle_threshold: f64,
}

impl Default for CoordinateOptions {
    fn default() -> Self {
        Self {
            mode: CoordinateMode::Optimization,
            max_frag_dist: 12.0,
            linear_angle_threshold: 160.0,
        }
    }
}

/// Quasi-Newton update applied to the primitive Hessian between steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HessianUpdate {
    /// Keep the initial guess for the whole run.
    #[default]
    None,
    /// BFGS update in primitive space.
    Bfgs,
}

/// Eigenvector-following step parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOptions {
    /// Maximum absolute displacement per Hessian eigenmode (MAXAD)
    pub max_mode_step: f64,
    /// Maximum norm of the whole internal coordinate step (DMAX)
    pub max_step: f64,
    /// Base step scale (SCALEQN)
    pub scale_qn: f64,
    /// Initial value of the new-Hessian counter
    pub new_hess: u32,
    /// Upper bound of the effective step scale
    pub max_scale: f64,
    /// Hessian update scheme
    pub hessian_update: HessianUpdate,
}

impl Default for StepOptions {
    fn default() -> Self {
        Self {
            max_mode_step: 0.075,
            max_step: 0.1,
            scale_qn: 1.0,
            new_hess: 5,
            max_scale: 10.0,
            hessian_update: HessianUpdate::None,
        }
    }
}

/// Iterative back-transform parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackTransformOptions {
    /// Iterations per attempt
    pub max_iterations: usize,
    /// Initial damping divisor applied to each Cartesian update (SCALEBT)
    pub initial_scale: f64,
    /// Convergence threshold on the internal coordinate residual norm
    pub dq_tolerance: f64,
    /// Convergence threshold on the squared Cartesian displacement magnitude
    pub magnitude_tolerance: f64,
    /// Residual growth factor that triggers a rollback
    pub divergence_ratio: f64,
    /// Accepted displacement per atom (threshold is this times the atom count)
    pub max_displacement_per_atom: f64,
    /// Retry ceiling over the optimizer lifetime
    pub max_retries: usize,
}

impl Default for BackTransformOptions {
    fn default() -> Self {
        Self {
            max_iterations: 8,
            initial_scale: 1.5,
            dq_tolerance: 1e-4,
            magnitude_tolerance: 5e-5,
            divergence_ratio: 10.0,
            max_displacement_per_atom: 0.025,
            max_retries: 100,
        }
    }
}

/// Convergence thresholds used by [`check_convergence`](crate::optimizer::check_convergence).
///
/// The optimizer loop itself only runs a fixed iteration budget; these
/// criteria are for drivers that want to stop early.
///
/// # Default Values
///
/// - RMS gradient: 0.0003 hartree/Angstrom
/// - Max gradient: 0.00045 hartree/Angstrom
/// - RMS displacement: 0.0012 Angstrom
/// - Max displacement: 0.0018 Angstrom
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thresholds {
    /// RMS gradient threshold (internal coordinate space)
    pub rms_g: f64,
    /// Maximum gradient component threshold (internal coordinate space)
    pub max_g: f64,
    /// RMS Cartesian displacement threshold in Angstrom
    pub rms: f64,
    /// Maximum Cartesian displacement threshold in Angstrom
    pub max_dis: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            rms_g: 0.0003,
            max_g: 0.00045,
            rms: 0.0012,
            max_dis: 0.0018,
        }
    }
}

/// Complete configuration for a delocalized internal coordinate optimization.
///
/// # Examples
///
/// ```
/// use dicopt::config::{Config, CoordinateMode};
///
/// let mut config = Config::default();
/// config.max_steps = 30;
/// config.coordinates.mode = CoordinateMode::Static;
/// assert_eq!(config.back_transform.max_retries, 100);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Primitive coordinate construction
    pub coordinates: CoordinateOptions,
    /// Step generation
    pub step: StepOptions,
    /// Back-transform solver
    pub back_transform: BackTransformOptions,
    /// Caller-level convergence criteria
    pub thresholds: Thresholds,
    /// Iteration budget of the optimizer loop
    pub max_steps: usize,
    /// Rebuild the delocalized basis at the start of every step
    pub rebuild_basis_each_step: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            coordinates: CoordinateOptions::default(),
            step: StepOptions::default(),
            back_transform: BackTransformOptions::default(),
            thresholds: Thresholds::default(),
            max_steps: 50,
            rebuild_basis_each_step: true,
        }
    }
}
