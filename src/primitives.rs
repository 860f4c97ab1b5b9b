//! Primitive internal coordinates.
//!
//! A [`PrimitiveSet`] is the redundant list of bond lengths, bond angles and
//! torsions the delocalized coordinates are built from. Rows are always
//! ordered bonds first, then angles, then torsions; the B-matrix, the
//! Hessian guess and the value vector all share this order.
//!
//! Construction runs in four stages:
//!
//! 1. Bonds from the topology.
//! 2. Fragment bridging (optional): atoms reachable from atom 0 form one
//!    fragment, everything else the other; the closest pair across the two
//!    is bonded if it lies within `max_frag_dist`.
//! 3. Angles and torsions from the (possibly bridged) bond graph.
//! 4. Linear ties (optional): every angle above the linear threshold gets a
//!    bond between its end atoms and cross torsions through that bond, so the
//!    collinear atoms stay well described.
//!
//! Only one bridging bond is ever added. Molecules with three or more
//! disconnected pieces, or metal centres that need multi-pair bridging, are
//! not handled.

use crate::config::CoordinateOptions;
use crate::error::{DicError, Result};
use crate::topology::Topology;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;

/// One primitive internal coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Primitive {
    /// Distance between two atoms
    Bond(usize, usize),
    /// Angle i-j-k with `j` as the vertex
    Angle(usize, usize, usize),
    /// Dihedral i-j-k-l around the j-k bond
    Torsion(usize, usize, usize, usize),
}

impl Primitive {
    /// Atoms involved, in definition order.
    pub fn atoms(&self) -> Vec<usize> {
        match *self {
            Primitive::Bond(i, j) => vec![i, j],
            Primitive::Angle(i, j, k) => vec![i, j, k],
            Primitive::Torsion(i, j, k, l) => vec![i, j, k, l],
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Primitive::Bond(i, j) => write!(f, "bond {}-{}", i, j),
            Primitive::Angle(i, j, k) => write!(f, "angle {}-{}-{}", i, j, k),
            Primitive::Torsion(i, j, k, l) => write!(f, "torsion {}-{}-{}-{}", i, j, k, l),
        }
    }
}

/// Atom pair that is neither bonded nor part of a common angle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NonBondedPair {
    /// Lower atom index
    pub i: usize,
    /// Higher atom index
    pub j: usize,
    /// Distance in Angstrom at construction time
    pub distance: f64,
}

/// Redundant primitive coordinate set for one molecule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrimitiveSet {
    /// Bonded pairs, lower index first
    pub bonds: Vec<(usize, usize)>,
    /// Angle triples, vertex in the middle
    pub angles: Vec<(usize, usize, usize)>,
    /// Torsion quadruples
    pub torsions: Vec<(usize, usize, usize, usize)>,
    /// Non-bonded pairs (diagnostic only)
    pub nonbonded: Vec<NonBondedPair>,
    /// Fragment-bridging bond added during construction
    pub bridge: Option<(usize, usize)>,
    /// Angles found above the linear threshold
    pub linear_angles: Vec<(usize, usize, usize)>,
}

fn bond_key(i: usize, j: usize) -> (usize, usize) {
    (i.min(j), i.max(j))
}

fn same_angle(a: (usize, usize, usize), b: (usize, usize, usize)) -> bool {
    a == b || a == (b.2, b.1, b.0)
}

fn same_torsion(a: (usize, usize, usize, usize), b: (usize, usize, usize, usize)) -> bool {
    a == b || a == (b.3, b.2, b.1, b.0)
}

impl PrimitiveSet {
    /// Builds the primitive set for a topology.
    ///
    /// The topology is mutated only when a fragment-bridging bond is added.
    ///
    /// # Errors
    ///
    /// - [`DicError::TooFewAtoms`] for fewer than three atoms
    /// - [`DicError::AtomIndex`] when the topology reports an out-of-range atom
    /// - [`DicError::DegenerateSpace`] when the primitives cannot span 3N-9 dimensions
    pub fn build<T: Topology>(topology: &mut T, options: &CoordinateOptions) -> Result<Self> {
        let num_atoms = topology.atom_count();
        if num_atoms < 3 {
            return Err(DicError::TooFewAtoms(num_atoms));
        }

        let mut set = PrimitiveSet::default();

        if options.mode.bridges_fragments() {
            set.bridge = bridge_fragments(topology, options.max_frag_dist);
        }

        set.bonds = topology.bonded_pairs().into_iter().map(|(i, j)| bond_key(i, j)).collect();
        set.bonds.sort_unstable();
        set.bonds.dedup();
        set.angles = topology
            .native_angle_triples()
            .into_iter()
            .filter(|&(i, j, k)| i != j && j != k && i != k)
            .collect();
        set.torsions = topology
            .native_torsion_quadruples()
            .into_iter()
            .filter(|&(i, j, k, l)| {
                let atoms = [i, j, k, l];
                (0..4).all(|a| (a + 1..4).all(|b| atoms[a] != atoms[b]))
            })
            .collect();

        set.check_indices(num_atoms)?;

        if options.mode.ties_linear_angles() {
            set.tie_linear_angles(topology, options.linear_angle_threshold);
        }

        set.nonbonded = set.find_nonbonded(topology);

        info!(
            "Primitive coordinates: {} bonds, {} angles, {} torsions ({} non-bonded pairs)",
            set.bonds.len(),
            set.angles.len(),
            set.torsions.len(),
            set.nonbonded.len()
        );

        let expected = 3 * num_atoms - 6;
        if set.len() + 3 < expected {
            return Err(DicError::DegenerateSpace {
                lost: expected - set.len(),
                available: set.len(),
                expected,
            });
        }

        Ok(set)
    }

    /// Assembles a set from explicit lists, e.g. when restoring a checkpoint.
    pub fn from_parts(
        bonds: Vec<(usize, usize)>,
        angles: Vec<(usize, usize, usize)>,
        torsions: Vec<(usize, usize, usize, usize)>,
    ) -> Self {
        Self {
            bonds: bonds.into_iter().map(|(i, j)| bond_key(i, j)).collect(),
            angles,
            torsions,
            ..Default::default()
        }
    }

    /// Total number of primitives `M`.
    pub fn len(&self) -> usize {
        self.bonds.len() + self.angles.len() + self.torsions.len()
    }

    /// Whether the set has no primitives.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Primitive at a row of the B-matrix.
    pub fn get(&self, row: usize) -> Option<Primitive> {
        let nb = self.bonds.len();
        let na = self.angles.len();
        if row < nb {
            let (i, j) = self.bonds[row];
            Some(Primitive::Bond(i, j))
        } else if row < nb + na {
            let (i, j, k) = self.angles[row - nb];
            Some(Primitive::Angle(i, j, k))
        } else {
            self.torsions
                .get(row - nb - na)
                .map(|&(i, j, k, l)| Primitive::Torsion(i, j, k, l))
        }
    }

    /// All primitives in row order.
    pub fn iter(&self) -> impl Iterator<Item = Primitive> + '_ {
        (0..self.len()).filter_map(move |row| self.get(row))
    }

    /// Number of bonds per atom.
    pub fn coordination_numbers(&self, num_atoms: usize) -> Vec<usize> {
        let mut counts = vec![0; num_atoms];
        for &(i, j) in &self.bonds {
            if i < num_atoms {
                counts[i] += 1;
            }
            if j < num_atoms {
                counts[j] += 1;
            }
        }
        counts
    }

    /// Whether the set contains a bond in either index order.
    pub fn has_bond(&self, i: usize, j: usize) -> bool {
        self.bonds.contains(&bond_key(i, j))
    }

    /// Union of two primitive sets.
    ///
    /// Used to give two geometries of the same molecule one shared coordinate
    /// system. Angles and torsions match regardless of direction. Non-bonded
    /// pairs of `self` survive only if the union does not cover them.
    pub fn union(&self, other: &PrimitiveSet) -> PrimitiveSet {
        let mut merged = self.clone();
        for &(i, j) in &other.bonds {
            if !merged.has_bond(i, j) {
                merged.bonds.push(bond_key(i, j));
            }
        }
        for &angle in &other.angles {
            if !merged.angles.iter().any(|&a| same_angle(a, angle)) {
                merged.angles.push(angle);
            }
        }
        for &torsion in &other.torsions {
            if !merged.torsions.iter().any(|&t| same_torsion(t, torsion)) {
                merged.torsions.push(torsion);
            }
        }
        for &angle in &other.linear_angles {
            if !merged.linear_angles.iter().any(|&a| same_angle(a, angle)) {
                merged.linear_angles.push(angle);
            }
        }
        merged.bridge = self.bridge.or(other.bridge);
        let covered: Vec<(usize, usize)> = merged.nonbonded_exclusions();
        merged.nonbonded.retain(|p| !covered.contains(&(p.i, p.j)));
        merged
    }

    fn check_indices(&self, num_atoms: usize) -> Result<()> {
        for atoms in self.iter().map(|p| p.atoms()) {
            if let Some(&index) = atoms.iter().find(|&&a| a >= num_atoms) {
                return Err(DicError::AtomIndex { index, num_atoms });
            }
        }
        Ok(())
    }

    fn tie_linear_angles<T: Topology>(&mut self, topology: &T, threshold: f64) {
        let angles = self.angles.clone();
        for (a1, vertex, a2) in angles {
            let value = topology.angle_degrees(a1, vertex, a2);
            if value <= threshold {
                continue;
            }
            info!("Linear angle {}-{}-{} ({:.2} degrees)", a1, vertex, a2, value);
            self.linear_angles.push((a1, vertex, a2));

            if !self.has_bond(a1, a2) {
                self.bonds.push(bond_key(a1, a2));
                debug!("Added linear tie bond {}-{}", a1, a2);
            }

            let left: Vec<usize> = topology
                .neighbors(a1)
                .into_iter()
                .filter(|&c| c != vertex && c != a2)
                .collect();
            let right: Vec<usize> = topology
                .neighbors(a2)
                .into_iter()
                .filter(|&c| c != vertex && c != a1)
                .collect();

            for &c1 in &left {
                for &c2 in &right {
                    if c1 == c2 {
                        continue;
                    }
                    let torsion = (c1, a1, a2, c2);
                    if self.torsions.iter().any(|&t| same_torsion(t, torsion)) {
                        continue;
                    }
                    let ends_of_angle = self
                        .angles
                        .iter()
                        .any(|&(i, _, k)| (i == c1 && k == c2) || (i == c2 && k == c1));
                    if ends_of_angle {
                        continue;
                    }
                    self.torsions.push(torsion);
                    debug!("Added linear cross torsion {}-{}-{}-{}", c1, a1, a2, c2);
                }
            }
        }
    }

    fn nonbonded_exclusions(&self) -> Vec<(usize, usize)> {
        let mut covered: Vec<(usize, usize)> = self.bonds.clone();
        for &(i, j, k) in &self.angles {
            covered.push(bond_key(i, j));
            covered.push(bond_key(j, k));
            covered.push(bond_key(i, k));
        }
        covered.sort_unstable();
        covered.dedup();
        covered
    }

    fn find_nonbonded<T: Topology>(&self, topology: &T) -> Vec<NonBondedPair> {
        let covered: HashSet<(usize, usize)> = self.nonbonded_exclusions().into_iter().collect();
        let n = topology.atom_count();
        let mut pairs = Vec::new();
        for i in 0..n {
            for j in (i + 1)..n {
                if !covered.contains(&(i, j)) {
                    pairs.push(NonBondedPair {
                        i,
                        j,
                        distance: topology.distance(i, j),
                    });
                }
            }
        }
        pairs
    }
}

/// Fragment label (0 or 1) for every atom.
///
/// Atoms reachable from atom 0 through bonds are fragment 0; all others are
/// fragment 1, however many pieces they form.
pub fn fragments<T: Topology + ?Sized>(topology: &T) -> Vec<usize> {
    let n = topology.atom_count();
    let mut labels = vec![1; n];
    if n == 0 {
        return labels;
    }
    let mut queue = VecDeque::from([0]);
    labels[0] = 0;
    while let Some(atom) = queue.pop_front() {
        for next in topology.neighbors(atom) {
            if next < n && labels[next] == 1 {
                labels[next] = 0;
                queue.push_back(next);
            }
        }
    }
    labels
}

fn bridge_fragments<T: Topology>(topology: &mut T, max_frag_dist: f64) -> Option<(usize, usize)> {
    let labels = fragments(topology);
    if labels.iter().all(|&f| f == 0) {
        return None;
    }

    let n = labels.len();
    let mut best: Option<(usize, usize, f64)> = None;
    for i in (0..n).filter(|&i| labels[i] == 0) {
        for j in (0..n).filter(|&j| labels[j] == 1) {
            let d = topology.distance(i, j);
            if best.map_or(true, |(_, _, bd)| d < bd) {
                best = Some((i, j, d));
            }
        }
    }

    let (i, j, d) = best?;
    if d >= max_frag_dist {
        warn!(
            "Fragments not bridged: closest pair {}-{} is {:.3} Angstrom apart (limit {:.1})",
            i, j, d, max_frag_dist
        );
        return None;
    }
    if topology.add_bond(i, j) {
        info!("Bridging fragments with bond {}-{} ({:.3} Angstrom)", i, j, d);
        Some(bond_key(i, j))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CoordinateMode, CoordinateOptions};
    use crate::geometry::Geometry;
    use crate::topology::Molecule;

    fn water() -> Molecule {
        let theta = 104.5_f64.to_radians();
        let geometry = Geometry::new(
            vec!["O".into(), "H".into(), "H".into()],
            vec![0.0, 0.0, 0.0, 0.96, 0.0, 0.0, 0.96 * theta.cos(), 0.96 * theta.sin(), 0.0],
        );
        Molecule::new(geometry, &[(0, 1), (0, 2)])
    }

    /// H-C≡C-H style chain with a perfectly linear backbone.
    fn linear_chain() -> Molecule {
        let geometry = Geometry::new(
            vec!["H".into(), "C".into(), "C".into(), "H".into()],
            vec![
                -1.06, 0.0, 0.0, //
                0.0, 0.0, 0.0, //
                1.20, 0.0, 0.0, //
                2.26, 0.0, 0.0,
            ],
        );
        Molecule::new(geometry, &[(0, 1), (1, 2), (2, 3)])
    }

    #[test]
    fn test_water_primitives() {
        let mut mol = water();
        let set = PrimitiveSet::build(&mut mol, &CoordinateOptions::default()).unwrap();
        assert_eq!(set.bonds, vec![(0, 1), (0, 2)]);
        assert_eq!(set.angles, vec![(1, 0, 2)]);
        assert!(set.torsions.is_empty());
        assert_eq!(set.len(), 3);
        assert!(set.nonbonded.is_empty());
        assert_eq!(set.get(2), Some(Primitive::Angle(1, 0, 2)));
        assert_eq!(set.get(3), None);
    }

    #[test]
    fn test_too_few_atoms() {
        let geometry = Geometry::new(vec!["H".into(), "H".into()], vec![0.0; 6]);
        let mut mol = Molecule::new(geometry, &[(0, 1)]);
        let err = PrimitiveSet::build(&mut mol, &CoordinateOptions::default()).unwrap_err();
        assert!(matches!(err, DicError::TooFewAtoms(2)));
    }

    #[test]
    fn test_fragment_labels() {
        let geometry = Geometry::new(
            vec!["O".into(), "H".into(), "H".into(), "Ne".into()],
            vec![0.0, 0.0, 0.0, 0.96, 0.0, 0.0, -0.24, 0.93, 0.0, 0.0, 0.0, 3.0],
        );
        let mol = Molecule::new(geometry, &[(0, 1), (0, 2)]);
        assert_eq!(fragments(&mol), vec![0, 0, 0, 1]);
    }

    #[test]
    fn test_fragment_bridge_added_once() {
        let geometry = Geometry::new(
            vec!["O".into(), "H".into(), "H".into(), "Ne".into()],
            vec![0.0, 0.0, 0.0, 0.96, 0.0, 0.0, -0.24, 0.93, 0.0, 0.2, 0.1, 3.0],
        );
        let mut mol = Molecule::new(geometry, &[(0, 1), (0, 2)]);
        let set = PrimitiveSet::build(&mut mol, &CoordinateOptions::default()).unwrap();
        assert_eq!(set.bridge, Some((0, 3)));
        assert_eq!(set.bonds.iter().filter(|&&b| b == (0, 3)).count(), 1);
        assert!(mol.is_bonded(3, 0));
        // Bridge participates in angle enumeration.
        assert!(set.angles.iter().any(|&(i, j, k)| j == 0 && (i == 3 || k == 3)));
        assert_eq!(fragments(&mol), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_static_mode_does_not_bridge() {
        let geometry = Geometry::new(
            vec!["O".into(), "H".into(), "H".into(), "Ne".into()],
            vec![0.0, 0.0, 0.0, 0.96, 0.0, 0.0, -0.24, 0.93, 0.0, 0.2, 0.1, 3.0],
        );
        let mut mol = Molecule::new(geometry, &[(0, 1), (0, 2)]);
        let options = CoordinateOptions {
            mode: CoordinateMode::Static,
            ..Default::default()
        };
        let set = PrimitiveSet::build(&mut mol, &options).unwrap();
        assert!(set.bridge.is_none());
        assert!(!mol.is_bonded(0, 3));
        assert_eq!(set.nonbonded.len(), 3);
    }

    #[test]
    fn test_distant_fragments_not_bridged() {
        let geometry = Geometry::new(
            vec!["O".into(), "H".into(), "H".into(), "Ne".into()],
            vec![0.0, 0.0, 0.0, 0.96, 0.0, 0.0, -0.24, 0.93, 0.0, 0.0, 0.0, 20.0],
        );
        let mut mol = Molecule::new(geometry, &[(0, 1), (0, 2)]);
        let set = PrimitiveSet::build(&mut mol, &CoordinateOptions::default()).unwrap();
        assert!(set.bridge.is_none());
        assert!(!mol.is_bonded(0, 3));
        assert_eq!(set.nonbonded.len(), 3);
    }

    #[test]
    fn test_degenerate_space_is_fatal() {
        // Two separated water molecules, no bridging: 6 primitives for 12 dimensions.
        let geometry = Geometry::new(
            vec!["O".into(), "H".into(), "H".into(), "O".into(), "H".into(), "H".into()],
            vec![
                0.0, 0.0, 0.0, 0.96, 0.0, 0.0, -0.24, 0.93, 0.0, //
                0.0, 0.0, 30.0, 0.96, 0.0, 30.0, -0.24, 0.93, 30.0,
            ],
        );
        let mut mol = Molecule::new(geometry, &[(0, 1), (0, 2), (3, 4), (3, 5)]);
        let err = PrimitiveSet::build(&mut mol, &CoordinateOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            DicError::DegenerateSpace {
                lost: 6,
                available: 6,
                expected: 12
            }
        ));
    }

    #[test]
    fn test_linear_ties() {
        let mut mol = linear_chain();
        let set = PrimitiveSet::build(&mut mol, &CoordinateOptions::default()).unwrap();
        assert_eq!(set.linear_angles.len(), 2);
        // Angle 0-1-2 ties 0-2, angle 1-2-3 ties 1-3.
        assert!(set.has_bond(0, 2));
        assert!(set.has_bond(1, 3));
        // Tie bonds live in the primitive set only.
        assert!(!mol.is_bonded(0, 2));
        // Existing torsion 0-1-2-3 is not duplicated.
        assert_eq!(set.torsions, vec![(0, 1, 2, 3)]);
    }

    #[test]
    fn test_linear_cross_torsions() {
        // Two methyl-like caps on a linear C-C-C spine.
        let geometry = Geometry::new(
            vec!["C".into(), "C".into(), "C".into(), "H".into(), "H".into()],
            vec![
                0.0, 0.0, 0.0, //
                1.3, 0.0, 0.0, //
                2.6, 0.0, 0.0, //
                -0.5, 0.9, 0.0, //
                3.1, 0.0, 0.9,
            ],
        );
        let mut mol = Molecule::new(geometry, &[(0, 1), (1, 2), (0, 3), (2, 4)]);
        let set = PrimitiveSet::build(&mut mol, &CoordinateOptions::default()).unwrap();
        assert!(set.linear_angles.contains(&(0, 1, 2)));
        assert!(set.has_bond(0, 2));
        assert!(set.torsions.contains(&(3, 0, 2, 4)));
    }

    #[test]
    fn test_fragments_only_mode_skips_linear_ties() {
        let mut mol = linear_chain();
        let options = CoordinateOptions {
            mode: CoordinateMode::FragmentsOnly,
            ..Default::default()
        };
        let set = PrimitiveSet::build(&mut mol, &options).unwrap();
        assert!(set.linear_angles.is_empty());
        assert!(!set.has_bond(0, 2));
    }

    #[test]
    fn test_coordination_numbers() {
        let mut mol = water();
        let set = PrimitiveSet::build(&mut mol, &CoordinateOptions::default()).unwrap();
        assert_eq!(set.coordination_numbers(3), vec![2, 1, 1]);
    }

    #[test]
    fn test_union_matches_reversed_primitives() {
        let a = PrimitiveSet::from_parts(vec![(0, 1), (1, 2)], vec![(0, 1, 2)], vec![]);
        let b = PrimitiveSet::from_parts(
            vec![(2, 1), (2, 3)],
            vec![(2, 1, 0), (1, 2, 3)],
            vec![(3, 2, 1, 0)],
        );
        let merged = a.union(&b);
        assert_eq!(merged.bonds, vec![(0, 1), (1, 2), (2, 3)]);
        assert_eq!(merged.angles, vec![(0, 1, 2), (1, 2, 3)]);
        assert_eq!(merged.torsions, vec![(3, 2, 1, 0)]);
        assert_eq!(merged.len(), 6);
    }

    #[test]
    fn test_primitive_display() {
        assert_eq!(Primitive::Torsion(0, 1, 2, 3).to_string(), "torsion 0-1-2-3");
        assert_eq!(Primitive::Bond(4, 2).atoms(), vec![4, 2]);
    }
}
