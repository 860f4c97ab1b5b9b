//! Delocalized internal coordinates for one molecule.
//!
//! [`DelocalizedCoordinates`] owns the topology together with everything
//! derived from its geometry: the primitive set, the primitive B-matrix, the
//! delocalized basis `U`, the reduced B-matrix and its inverse, the primitive
//! values and the coordinate vector `q`.
//!
//! Two refresh levels exist:
//!
//! - [`refresh_from_cartesian`](DelocalizedCoordinates::refresh_from_cartesian)
//!   re-measures primitives and rebuilds `B`, `Bᵘ`, `Bᵘ⁺` and `q` with `U`
//!   unchanged. The back-transform uses this so that its target stays
//!   expressed in one basis.
//! - [`rebuild_basis`](DelocalizedCoordinates::rebuild_basis) additionally
//!   recomputes `U` and resets the torsion continuity reference. The
//!   optimizer calls it at the start of each step.

use crate::basis::{DelocalizedBasis, ReducedBMatrix};
use crate::config::CoordinateOptions;
use crate::error::{DicError, Result};
use crate::internals::{self, PrimitiveValues};
use crate::primitives::PrimitiveSet;
use crate::topology::Topology;
use crate::wilson;
use log::info;
use nalgebra::{DMatrix, DVector};

/// Delocalized internal coordinate state of a molecule.
#[derive(Debug, Clone)]
pub struct DelocalizedCoordinates<T: Topology> {
    topology: T,
    primitives: PrimitiveSet,
    bmat: DMatrix<f64>,
    basis: DelocalizedBasis,
    reduced: ReducedBMatrix,
    values: PrimitiveValues,
    torsion_reference: Vec<f64>,
    q: DVector<f64>,
}

impl<T: Topology> DelocalizedCoordinates<T> {
    /// Builds primitives from the topology and sets up the coordinates.
    ///
    /// # Errors
    ///
    /// Any configuration error from primitive construction or the basis
    /// reduction, e.g. [`DicError::DegenerateSpace`].
    pub fn new(mut topology: T, options: &CoordinateOptions) -> Result<Self> {
        let primitives = PrimitiveSet::build(&mut topology, options)?;
        Self::with_primitives(topology, primitives)
    }

    /// Sets up the coordinates for an explicit primitive set.
    pub fn with_primitives(topology: T, primitives: PrimitiveSet) -> Result<Self> {
        let num_atoms = topology.atom_count();
        if num_atoms < 3 {
            return Err(DicError::TooFewAtoms(num_atoms));
        }
        let bmat = wilson::build_bmatrix(&topology, &primitives)?;
        let basis = DelocalizedBasis::build(&bmat, num_atoms)?;
        let reduced = ReducedBMatrix::new(&basis.u, &bmat)?;
        let values = PrimitiveValues::evaluate(&topology, &primitives);
        let torsion_reference = values.torsion_degrees();
        let q = internals::project(&basis.u, &values);

        info!(
            "Delocalized coordinates: {} from {} primitives ({} atoms)",
            basis.dimension(),
            primitives.len(),
            num_atoms
        );

        Ok(Self {
            topology,
            primitives,
            bmat,
            basis,
            reduced,
            values,
            torsion_reference,
            q,
        })
    }

    /// Number of delocalized coordinates.
    pub fn coordinate_dimension(&self) -> usize {
        self.basis.dimension()
    }

    /// Current coordinate vector `q`.
    pub fn current_q(&self) -> &DVector<f64> {
        &self.q
    }

    /// Re-measures the geometry with the basis held fixed.
    pub fn refresh_from_cartesian(&mut self) -> Result<()> {
        self.bmat = wilson::build_bmatrix(&self.topology, &self.primitives)?;
        self.reduced = ReducedBMatrix::new(&self.basis.u, &self.bmat)?;
        self.values = PrimitiveValues::evaluate(&self.topology, &self.primitives);
        self.values.apply_torsion_continuity(&self.torsion_reference);
        self.q = internals::project(&self.basis.u, &self.values);
        Ok(())
    }

    /// Recomputes the basis at the current geometry.
    pub fn rebuild_basis(&mut self) -> Result<()> {
        self.bmat = wilson::build_bmatrix(&self.topology, &self.primitives)?;
        self.basis = DelocalizedBasis::build(&self.bmat, self.topology.atom_count())?;
        self.reduced = ReducedBMatrix::new(&self.basis.u, &self.bmat)?;
        self.values = PrimitiveValues::evaluate(&self.topology, &self.primitives);
        self.torsion_reference = self.values.torsion_degrees();
        self.q = internals::project(&self.basis.u, &self.values);
        Ok(())
    }

    /// Cartesian gradient (Hartree/Angstrom) → q-space gradient.
    pub fn project_gradient(&self, gradient: &DVector<f64>) -> Result<DVector<f64>> {
        self.reduced.project_gradient(gradient)
    }

    /// q-space step → Cartesian displacement in Angstrom (first order).
    pub fn cartesian_displacement(&self, dq: &DVector<f64>) -> Result<DVector<f64>> {
        self.reduced.cartesian_displacement(dq)
    }

    /// q-space gradient → primitive-space gradient, `Uᵀ·g_q`.
    pub fn primitive_gradient(&self, gradq: &DVector<f64>) -> DVector<f64> {
        self.basis.u.tr_mul(gradq)
    }

    /// Flattened Cartesian coordinates in Angstrom.
    pub fn cartesian(&self) -> DVector<f64> {
        self.topology.coordinates()
    }

    /// Moves the atoms and refreshes with the basis held fixed.
    pub fn set_cartesian(&mut self, coords: &DVector<f64>) -> Result<()> {
        let expected = 3 * self.topology.atom_count();
        if coords.len() != expected {
            return Err(DicError::Dimension {
                context: "Cartesian coordinates",
                expected,
                actual: coords.len(),
            });
        }
        self.topology.set_coordinates(coords);
        self.refresh_from_cartesian()
    }

    /// Number of atoms.
    pub fn atom_count(&self) -> usize {
        self.topology.atom_count()
    }

    /// The underlying topology.
    pub fn topology(&self) -> &T {
        &self.topology
    }

    /// Consumes the coordinates and returns the topology.
    pub fn into_topology(self) -> T {
        self.topology
    }

    /// The primitive coordinate set.
    pub fn primitives(&self) -> &PrimitiveSet {
        &self.primitives
    }

    /// Primitive B-matrix at the current geometry.
    pub fn bmatrix(&self) -> &DMatrix<f64> {
        &self.bmat
    }

    /// Current delocalized basis.
    pub fn basis(&self) -> &DelocalizedBasis {
        &self.basis
    }

    /// Reduced B-matrix and inverse at the current geometry.
    pub fn reduced(&self) -> &ReducedBMatrix {
        &self.reduced
    }

    /// Primitive values, torsions continuity-corrected.
    pub fn values(&self) -> &PrimitiveValues {
        &self.values
    }
}
