//! Topology adapter consumed by the coordinate engine.
//!
//! The engine never discovers bonds itself. Everything it needs to know about
//! the molecule (atom count, positions, bonded pairs, the native enumeration of
//! angles and torsions, geometric measurements and element data) comes through
//! the [`Topology`] trait. [`Molecule`] is the in-memory implementation used by
//! the optimizer, tests and the demo driver; other geometry libraries can be
//! plugged in by implementing the trait.
//!
//! Bonded pairs are always reported with the lower index first.

use crate::elements;
use crate::geometry::{self, Geometry};
use nalgebra::{DVector, Vector3};
use std::collections::BTreeSet;

/// Capability set the internal coordinate engine requires from a molecule.
///
/// Angles are `(i, j, k)` with `j` as the vertex; torsions are `(i, j, k, l)`
/// around the central bond `j-k`. Angle and torsion measurements are in
/// degrees.
pub trait Topology {
    /// Number of atoms.
    fn atom_count(&self) -> usize;

    /// Cartesian position of an atom in Angstrom.
    fn cartesian(&self, atom: usize) -> Vector3<f64>;

    /// Moves an atom.
    fn set_cartesian(&mut self, atom: usize, xyz: Vector3<f64>);

    /// All bonded pairs, lower index first.
    fn bonded_pairs(&self) -> Vec<(usize, usize)>;

    /// Angle triples enumerated from the bond graph.
    fn native_angle_triples(&self) -> Vec<(usize, usize, usize)>;

    /// Torsion quadruples enumerated from the bond graph.
    fn native_torsion_quadruples(&self) -> Vec<(usize, usize, usize, usize)>;

    /// Atomic number of an atom (0 for dummy atoms).
    fn atomic_number(&self, atom: usize) -> u8;

    /// Adds a bond; returns `false` when it already existed.
    fn add_bond(&mut self, i: usize, j: usize) -> bool;

    /// van der Waals radius in Angstrom for an atomic number.
    fn vdw_radius(&self, atomic_number: u8) -> f64 {
        elements::vdw_radius(atomic_number)
    }

    /// Distance between two atoms in Angstrom.
    fn distance(&self, i: usize, j: usize) -> f64 {
        geometry::distance(&self.cartesian(i), &self.cartesian(j))
    }

    /// Angle i-j-k in degrees with `j` as the vertex.
    fn angle_degrees(&self, i: usize, j: usize, k: usize) -> f64 {
        geometry::bond_angle(&self.cartesian(i), &self.cartesian(j), &self.cartesian(k)).to_degrees()
    }

    /// Torsion i-j-k-l in degrees, folded into `[-180, 180)`.
    fn torsion_degrees(&self, i: usize, j: usize, k: usize, l: usize) -> f64 {
        let phi = geometry::dihedral(
            &self.cartesian(i),
            &self.cartesian(j),
            &self.cartesian(k),
            &self.cartesian(l),
        );
        geometry::wrap_degrees(phi.to_degrees())
    }

    /// Whether `i` and `j` are bonded (either order).
    fn is_bonded(&self, i: usize, j: usize) -> bool {
        let key = (i.min(j), i.max(j));
        self.bonded_pairs().contains(&key)
    }

    /// Bonded neighbors of an atom in ascending order.
    fn neighbors(&self, atom: usize) -> Vec<usize> {
        let mut out: Vec<usize> = self
            .bonded_pairs()
            .into_iter()
            .filter_map(|(i, j)| {
                if i == atom {
                    Some(j)
                } else if j == atom {
                    Some(i)
                } else {
                    None
                }
            })
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Flattened Cartesian coordinates `[x1, y1, z1, ...]`.
    fn coordinates(&self) -> DVector<f64> {
        let n = self.atom_count();
        let mut coords = DVector::zeros(3 * n);
        for atom in 0..n {
            let p = self.cartesian(atom);
            coords[3 * atom] = p.x;
            coords[3 * atom + 1] = p.y;
            coords[3 * atom + 2] = p.z;
        }
        coords
    }

    /// Replaces all positions from a flattened coordinate vector.
    fn set_coordinates(&mut self, coords: &DVector<f64>) {
        for atom in 0..self.atom_count() {
            let xyz = Vector3::new(coords[3 * atom], coords[3 * atom + 1], coords[3 * atom + 2]);
            self.set_cartesian(atom, xyz);
        }
    }
}

/// In-memory molecule: a [`Geometry`] plus an explicit bond graph.
///
/// Angles and torsions are enumerated the way common cheminformatics
/// toolkits do it: every pair of neighbors around a vertex forms an angle,
/// and every neighbor pair across a bond (excluding three-membered ring
/// closures) forms a torsion.
///
/// # Examples
///
/// ```
/// use dicopt::geometry::Geometry;
/// use dicopt::topology::{Molecule, Topology};
///
/// let geometry = Geometry::new(
///     vec!["O".into(), "H".into(), "H".into()],
///     vec![0.0, 0.0, 0.0, 0.96, 0.0, 0.0, -0.24, 0.93, 0.0],
/// );
/// let water = Molecule::new(geometry, &[(0, 1), (0, 2)]);
/// assert_eq!(water.native_angle_triples(), vec![(1, 0, 2)]);
/// assert!(water.native_torsion_quadruples().is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct Molecule {
    geometry: Geometry,
    atomic_numbers: Vec<u8>,
    bonds: BTreeSet<(usize, usize)>,
}

impl Molecule {
    /// Builds a molecule from a geometry and a bond list.
    ///
    /// Self-bonds and out-of-range indices are ignored; duplicate bonds in
    /// either order collapse to one.
    pub fn new(geometry: Geometry, bonds: &[(usize, usize)]) -> Self {
        let atomic_numbers = geometry.elements.iter().map(|e| elements::atomic_number(e)).collect();
        let n = geometry.num_atoms;
        let bonds = bonds
            .iter()
            .filter(|&&(i, j)| i != j && i < n && j < n)
            .map(|&(i, j)| (i.min(j), i.max(j)))
            .collect();
        Self {
            geometry,
            atomic_numbers,
            bonds,
        }
    }

    /// Underlying geometry.
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Element symbols in atom order.
    pub fn elements(&self) -> &[String] {
        &self.geometry.elements
    }

    fn adjacency(&self) -> Vec<Vec<usize>> {
        let mut adjacency = vec![Vec::new(); self.geometry.num_atoms];
        for &(i, j) in &self.bonds {
            adjacency[i].push(j);
            adjacency[j].push(i);
        }
        for list in &mut adjacency {
            list.sort_unstable();
        }
        adjacency
    }
}

impl Topology for Molecule {
    fn atom_count(&self) -> usize {
        self.geometry.num_atoms
    }

    fn cartesian(&self, atom: usize) -> Vector3<f64> {
        self.geometry.position(atom)
    }

    fn set_cartesian(&mut self, atom: usize, xyz: Vector3<f64>) {
        self.geometry.set_position(atom, &xyz);
    }

    fn bonded_pairs(&self) -> Vec<(usize, usize)> {
        self.bonds.iter().copied().collect()
    }

    fn native_angle_triples(&self) -> Vec<(usize, usize, usize)> {
        let adjacency = self.adjacency();
        let mut angles = Vec::new();
        for (vertex, nbrs) in adjacency.iter().enumerate() {
            for (a, &i) in nbrs.iter().enumerate() {
                for &k in &nbrs[a + 1..] {
                    angles.push((i, vertex, k));
                }
            }
        }
        angles
    }

    fn native_torsion_quadruples(&self) -> Vec<(usize, usize, usize, usize)> {
        let adjacency = self.adjacency();
        let mut torsions = Vec::new();
        for &(j, k) in &self.bonds {
            for &i in adjacency[j].iter().filter(|&&i| i != k) {
                for &l in adjacency[k].iter().filter(|&&l| l != j && l != i) {
                    torsions.push((i, j, k, l));
                }
            }
        }
        torsions
    }

    fn atomic_number(&self, atom: usize) -> u8 {
        self.atomic_numbers[atom]
    }

    fn add_bond(&mut self, i: usize, j: usize) -> bool {
        if i == j {
            return false;
        }
        self.bonds.insert((i.min(j), i.max(j)))
    }

    fn is_bonded(&self, i: usize, j: usize) -> bool {
        self.bonds.contains(&(i.min(j), i.max(j)))
    }

    fn neighbors(&self, atom: usize) -> Vec<usize> {
        let mut out: Vec<usize> = self
            .bonds
            .iter()
            .filter_map(|&(i, j)| match (i == atom, j == atom) {
                (true, _) => Some(j),
                (_, true) => Some(i),
                _ => None,
            })
            .collect();
        out.sort_unstable();
        out
    }

    fn coordinates(&self) -> DVector<f64> {
        self.geometry.coords.clone()
    }

    fn set_coordinates(&mut self, coords: &DVector<f64>) {
        self.geometry.coords.copy_from(coords);
    }
}
