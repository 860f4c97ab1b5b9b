// B-matrix rows checked against finite differences of the primitive values
use dicopt::geometry::Geometry;
use dicopt::internals::PrimitiveValues;
use dicopt::primitives::PrimitiveSet;
use dicopt::topology::{Molecule, Topology};
use dicopt::wilson::{angle_normal, angle_row, build_bmatrix, torsion_row};
use nalgebra::{DVector, Vector3};

fn skewed_chain() -> Molecule {
    let elements = vec![
        "H".to_string(),
        "C".to_string(),
        "C".to_string(),
        "H".to_string(),
    ];
    let coords = vec![
        0.1, 1.0, 0.2,   // H1
        0.0, 0.0, 0.0,   // C1
        1.5, 0.1, 0.0,   // C2
        1.7, 0.3, 1.0,   // H2
    ];
    Molecule::new(Geometry::new(elements, coords), &[(0, 1), (1, 2), (2, 3)])
}

fn chain_primitives() -> PrimitiveSet {
    PrimitiveSet::from_parts(
        vec![(0, 1), (1, 2), (2, 3)],
        vec![(0, 1, 2), (1, 2, 3)],
        vec![(0, 1, 2, 3)],
    )
}

fn values_at(molecule: &mut Molecule, coords: &DVector<f64>, set: &PrimitiveSet) -> DVector<f64> {
    molecule.set_coordinates(coords);
    PrimitiveValues::evaluate(&*molecule, set).stacked()
}

#[test]
fn test_bmatrix_numerical_vs_analytical() {
    let mut molecule = skewed_chain();
    let set = chain_primitives();
    let bmat = build_bmatrix(&molecule, &set).unwrap();
    assert_eq!(bmat.nrows(), 6);
    assert_eq!(bmat.ncols(), 12);

    let x0 = molecule.coordinates();
    let delta = 1e-5;
    for col in 0..12 {
        let mut plus = x0.clone();
        plus[col] += delta;
        let mut minus = x0.clone();
        minus[col] -= delta;
        let numerical = (values_at(&mut molecule, &plus, &set) - values_at(&mut molecule, &minus, &set)) / (2.0 * delta);
        for row in 0..6 {
            assert!(
                (bmat[(row, col)] - numerical[row]).abs() < 1e-6,
                "row {} col {}: analytical={}, numerical={}",
                row,
                col,
                bmat[(row, col)],
                numerical[row]
            );
        }
    }
}

#[test]
fn test_rows_are_translation_invariant() {
    let molecule = skewed_chain();
    let bmat = build_bmatrix(&molecule, &chain_primitives()).unwrap();
    for row in 0..bmat.nrows() {
        for axis in 0..3 {
            let sum: f64 = (0..4).map(|atom| bmat[(row, 3 * atom + axis)]).sum();
            assert!(sum.abs() < 1e-10, "row {} axis {} sums to {}", row, axis, sum);
        }
    }
}

#[test]
fn test_linear_angle_row_is_finite() {
    let a = Vector3::new(-1.2, 0.0, 0.0);
    let b = Vector3::new(0.0, 0.0, 0.0);
    let c = Vector3::new(1.1, 0.0, 0.0);

    let normal = angle_normal(&(a - b), &(c - b));
    assert!(normal.iter().all(|v| v.is_finite()));
    assert!((normal.norm() - 1.0).abs() < 1e-12);

    let row = angle_row(&a, &b, &c);
    for derivative in &row {
        assert!(derivative.iter().all(|v| v.is_finite()));
    }
    assert!(row[0].norm() > 0.0);
}

#[test]
fn test_torsion_undefined_through_linear_angle() {
    let a = Vector3::new(-1.0, 0.0, 0.0);
    let b = Vector3::new(0.0, 0.0, 0.0);
    let c = Vector3::new(1.0, 0.0, 0.0);
    let d = Vector3::new(2.0, 1.0, 0.0);
    assert!(torsion_row(&a, &b, &c, &d).is_none());

    let a_bent = Vector3::new(-0.5, 0.9, 0.0);
    assert!(torsion_row(&a_bent, &b, &c, &d).is_some());
}
