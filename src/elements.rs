//! Element data used by the coordinate engine.
//!
//! Only what the Hessian guess and topology adapters need: element symbols,
//! atomic numbers and van der Waals radii (Angstrom). Radii follow Bondi where
//! available; elements without a tabulated radius fall back to
//! [`DEFAULT_VDW_RADIUS`].

use lazy_static::lazy_static;
use std::collections::HashMap;

/// Radius used for elements missing from the table.
pub const DEFAULT_VDW_RADIUS: f64 = 2.0;

/// One row of the element table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Element {
    /// Element symbol with conventional capitalization
    pub symbol: &'static str,
    /// Atomic number
    pub atomic_number: u8,
    /// van der Waals radius in Angstrom
    pub vdw_radius: f64,
}

const fn el(symbol: &'static str, atomic_number: u8, vdw_radius: f64) -> Element {
    Element {
        symbol,
        atomic_number,
        vdw_radius,
    }
}

static ELEMENTS: [Element; 54] = [
    el("H", 1, 1.20),
    el("He", 2, 1.40),
    el("Li", 3, 1.82),
    el("Be", 4, 1.53),
    el("B", 5, 1.92),
    el("C", 6, 1.70),
    el("N", 7, 1.55),
    el("O", 8, 1.52),
    el("F", 9, 1.47),
    el("Ne", 10, 1.54),
    el("Na", 11, 2.27),
    el("Mg", 12, 1.73),
    el("Al", 13, 1.84),
    el("Si", 14, 2.10),
    el("P", 15, 1.80),
    el("S", 16, 1.80),
    el("Cl", 17, 1.75),
    el("Ar", 18, 1.88),
    el("K", 19, 2.75),
    el("Ca", 20, 2.31),
    el("Sc", 21, 2.11),
    el("Ti", 22, 2.00),
    el("V", 23, 2.00),
    el("Cr", 24, 2.00),
    el("Mn", 25, 2.00),
    el("Fe", 26, 2.00),
    el("Co", 27, 2.00),
    el("Ni", 28, 1.63),
    el("Cu", 29, 1.40),
    el("Zn", 30, 1.39),
    el("Ga", 31, 1.87),
    el("Ge", 32, 2.11),
    el("As", 33, 1.85),
    el("Se", 34, 1.90),
    el("Br", 35, 1.85),
    el("Kr", 36, 2.02),
    el("Rb", 37, 3.03),
    el("Sr", 38, 2.49),
    el("Y", 39, 2.00),
    el("Zr", 40, 2.00),
    el("Nb", 41, 2.00),
    el("Mo", 42, 2.00),
    el("Tc", 43, 2.00),
    el("Ru", 44, 2.00),
    el("Rh", 45, 2.00),
    el("Pd", 46, 1.63),
    el("Ag", 47, 1.72),
    el("Cd", 48, 1.58),
    el("In", 49, 1.93),
    el("Sn", 50, 2.17),
    el("Sb", 51, 2.06),
    el("Te", 52, 2.06),
    el("I", 53, 1.98),
    el("Xe", 54, 2.16),
];

lazy_static! {
    static ref BY_SYMBOL: HashMap<String, &'static Element> = ELEMENTS
        .iter()
        .map(|e| (e.symbol.to_lowercase(), e))
        .collect();
}

/// Looks up an element by symbol (case-insensitive).
pub fn by_symbol(symbol: &str) -> Option<&'static Element> {
    BY_SYMBOL.get(&symbol.trim().to_lowercase()).copied()
}

/// Looks up an element by atomic number.
pub fn by_atomic_number(atomic_number: u8) -> Option<&'static Element> {
    ELEMENTS
        .get((atomic_number as usize).checked_sub(1)?)
        .filter(|e| e.atomic_number == atomic_number)
}

/// Atomic number for a symbol, `0` for unknown symbols (dummy atoms).
pub fn atomic_number(symbol: &str) -> u8 {
    by_symbol(symbol).map(|e| e.atomic_number).unwrap_or(0)
}

/// van der Waals radius in Angstrom for an atomic number.
pub fn vdw_radius(atomic_number: u8) -> f64 {
    by_atomic_number(atomic_number)
        .map(|e| e.vdw_radius)
        .unwrap_or(DEFAULT_VDW_RADIUS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_indexed_by_atomic_number() {
        for (idx, element) in ELEMENTS.iter().enumerate() {
            assert_eq!(element.atomic_number as usize, idx + 1, "{}", element.symbol);
        }
    }

    #[test]
    fn test_symbol_lookup() {
        assert_eq!(atomic_number("C"), 6);
        assert_eq!(atomic_number("cl"), 17);
        assert_eq!(atomic_number(" O "), 8);
        assert_eq!(atomic_number("Xx"), 0);
    }

    #[test]
    fn test_vdw_radius() {
        assert!((vdw_radius(1) - 1.20).abs() < 1e-12);
        assert!((vdw_radius(8) - 1.52).abs() < 1e-12);
        assert!((vdw_radius(0) - DEFAULT_VDW_RADIUS).abs() < 1e-12);
        assert!((vdw_radius(118) - DEFAULT_VDW_RADIUS).abs() < 1e-12);
    }
}
