//! Checkpoints for restarting optimizations.
//!
//! A checkpoint is a pretty-printed JSON file holding everything needed to
//! rebuild a [`DicOptimizer`] over a [`Molecule`]:
//!
//! - **Step number** and the back-transform retry counter
//! - **Geometry** and the bond list (including any fragment bridge)
//! - **Primitive set** so that the restored coordinates use the same rows
//! - **Primitive Hessian** and its `new_hess` counter
//! - **Configuration**
//!
//! nalgebra vectors and matrices are stored as plain `Vec`s.
//!
//! ```no_run
//! use dicopt::checkpoint::Checkpoint;
//! # fn demo(optimizer: &dicopt::optimizer::DicOptimizer<dicopt::topology::Molecule>)
//! #     -> Result<(), dicopt::checkpoint::CheckpointError> {
//! use std::path::Path;
//!
//! Checkpoint::from_optimizer(optimizer).save(Path::new("dicopt.chk"))?;
//! let restored = Checkpoint::load(Path::new("dicopt.chk"))?.restore()?;
//! # Ok(())
//! # }
//! ```

use crate::config::Config;
use crate::coordinates::DelocalizedCoordinates;
use crate::error::DicError;
use crate::geometry::Geometry;
use crate::hessian::HessianModel;
use crate::optimizer::DicOptimizer;
use crate::primitives::PrimitiveSet;
use crate::topology::{Molecule, Topology};
use log::info;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors raised while saving or restoring a checkpoint.
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// File could not be read or written
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON (de)serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// File contents are inconsistent
    #[error("Invalid checkpoint: {0}")]
    Invalid(String),
    /// Rebuilding the coordinates failed
    #[error("Failed to restore coordinates: {0}")]
    Engine(#[from] DicError),
}

/// Serializable wrapper for [`Geometry`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializableGeometry {
    /// Chemical element symbols
    pub elements: Vec<String>,
    /// Flattened coordinates in Angstrom
    pub coords: Vec<f64>,
}

impl From<&Geometry> for SerializableGeometry {
    fn from(geom: &Geometry) -> Self {
        Self {
            elements: geom.elements.clone(),
            coords: geom.coords.iter().copied().collect(),
        }
    }
}

impl From<SerializableGeometry> for Geometry {
    fn from(ser_geom: SerializableGeometry) -> Self {
        Geometry::new(ser_geom.elements, ser_geom.coords)
    }
}

/// Saved optimizer state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Steps completed
    pub step: usize,
    /// Back-transform retries used so far
    pub retries: usize,
    /// Current geometry
    pub geometry: SerializableGeometry,
    /// Bonded pairs, lower index first
    pub bonds: Vec<(usize, usize)>,
    /// Primitive coordinate set
    pub primitives: PrimitiveSet,
    /// Primitive Hessian, row by row
    pub hessian: Vec<Vec<f64>>,
    /// Steps left before the Hessian counts as aged
    pub new_hess: u32,
    /// Configuration the optimizer runs with
    pub config: Config,
}

impl Checkpoint {
    /// Captures the state of an optimizer.
    pub fn from_optimizer(optimizer: &DicOptimizer<Molecule>) -> Self {
        let molecule = optimizer.coordinates().topology();
        let hessian = optimizer.hessian();
        Self {
            step: optimizer.step_count(),
            retries: optimizer.retries(),
            geometry: molecule.geometry().into(),
            bonds: molecule.bonded_pairs(),
            primitives: optimizer.coordinates().primitives().clone(),
            hessian: hessian
                .primitive()
                .row_iter()
                .map(|row| row.iter().copied().collect())
                .collect(),
            new_hess: hessian.new_hess(),
            config: optimizer.config().clone(),
        }
    }

    /// Save checkpoint to a JSON file.
    pub fn save(&self, path: &Path) -> Result<(), CheckpointError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        info!("Checkpoint for step {} written to {}", self.step, path.display());
        Ok(())
    }

    /// Load checkpoint from a JSON file.
    pub fn load(path: &Path) -> Result<Self, CheckpointError> {
        let content = fs::read_to_string(path)?;
        let checkpoint: Checkpoint = serde_json::from_str(&content)?;
        checkpoint.validate()?;
        Ok(checkpoint)
    }

    fn validate(&self) -> Result<(), CheckpointError> {
        let n = self.geometry.elements.len();
        if self.geometry.coords.len() != 3 * n {
            return Err(CheckpointError::Invalid(format!(
                "{} coordinates for {} atoms",
                self.geometry.coords.len(),
                n
            )));
        }
        let m = self.primitives.len();
        if self.hessian.len() != m || self.hessian.iter().any(|row| row.len() != m) {
            return Err(CheckpointError::Invalid(format!(
                "Hessian is not {}x{} for {} primitives",
                m, m, m
            )));
        }
        if let Some(&(i, j)) = self.bonds.iter().find(|&&(i, j)| i >= n || j >= n) {
            return Err(CheckpointError::Invalid(format!("bond {}-{} out of range", i, j)));
        }
        Ok(())
    }

    /// Rebuilds the optimizer.
    ///
    /// The delocalized basis is recomputed at the saved geometry; the
    /// primitive Hessian is projected onto it.
    pub fn restore(self) -> Result<DicOptimizer<Molecule>, CheckpointError> {
        self.validate()?;
        let m = self.primitives.len();
        let flat: Vec<f64> = self.hessian.into_iter().flatten().collect();
        let primitive = DMatrix::from_row_slice(m, m, &flat);

        let molecule = Molecule::new(self.geometry.into(), &self.bonds);
        let coords = DelocalizedCoordinates::with_primitives(molecule, self.primitives)?;
        let mut hessian = HessianModel::from_primitive(primitive, &self.config.step);
        hessian.set_new_hess(self.new_hess);
        let optimizer = DicOptimizer::with_state(coords, hessian, self.config, self.step, self.retries)?;
        info!("Restored optimizer at step {}", optimizer.step_count());
        Ok(optimizer)
    }
}
