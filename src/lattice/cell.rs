//! Unit cell parameters and cell comparison.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Six unit cell parameters: lengths a, b, c (Å) and angles α, β, γ (degrees).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitCell(pub [f64; 6]);

impl UnitCell {
    /// Create a cell from lengths and angles.
    pub fn new(a: f64, b: f64, c: f64, alpha: f64, beta: f64, gamma: f64) -> Self {
        Self([a, b, c, alpha, beta, gamma])
    }

    /// Cell edge lengths.
    pub fn lengths(&self) -> [f64; 3] {
        [self.0[0], self.0[1], self.0[2]]
    }

    /// Cell angles.
    pub fn angles(&self) -> [f64; 3] {
        [self.0[3], self.0[4], self.0[5]]
    }

    /// Parameters as a plain array.
    pub fn parameters(&self) -> [f64; 6] {
        self.0
    }

    /// Compare against `other` taking `self` as the reference cell.
    pub fn equivalent_within(&self, other: &UnitCell, tolerance: &CellTolerance) -> bool {
        for j in 0..3 {
            if ((other.0[j] - self.0[j]) / self.0[j]).abs() > tolerance.length_fraction {
                return false;
            }
        }
        for j in 3..6 {
            if (other.0[j] - self.0[j]).abs() > tolerance.angle_degrees {
                return false;
            }
        }
        true
    }
}

impl std::fmt::Display for UnitCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [a, b, c, al, be, ga] = self.0;
        write!(
            f,
            "{:.2} {:.2} {:.2} {:.2} {:.2} {:.2}",
            a, b, c, al, be, ga
        )
    }
}

impl FromStr for UnitCell {
    type Err = String;

    /// Parse six numbers separated by commas and/or whitespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values = s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
            .map(|t| {
                t.parse::<f64>()
                    .map_err(|e| format!("invalid cell parameter {:?}: {}", t, e))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let params: [f64; 6] = values
            .try_into()
            .map_err(|v: Vec<f64>| format!("expected 6 cell parameters, got {}", v.len()))?;
        Ok(Self(params))
    }
}

/// Tolerances used when deciding whether two cells describe the same lattice.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellTolerance {
    /// Maximum relative difference of a, b, c.
    pub length_fraction: f64,
    /// Maximum absolute difference of α, β, γ in degrees.
    pub angle_degrees: f64,
}

impl Default for CellTolerance {
    fn default() -> Self {
        Self {
            length_fraction: 0.05,
            angle_degrees: 5.0,
        }
    }
}

/// Check two cells agree to 5% in length and 5° in angle, relative to `reference`.
pub fn cells_equivalent(reference: &UnitCell, test: &UnitCell) -> bool {
    reference.equivalent_within(test, &CellTolerance::default())
}
