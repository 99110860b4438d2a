//! The fourteen Bravais lattices.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Bravais lattice label, ordered from lowest to highest symmetry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub enum BravaisLattice {
    /// Triclinic primitive (P1).
    Ap,
    Mp,
    Mc,
    Op,
    Oc,
    Of,
    Oi,
    Tp,
    Ti,
    Hp,
    Hr,
    Cp,
    Cf,
    Ci,
}

impl BravaisLattice {
    /// All lattices in symmetry order.
    pub const ALL: [BravaisLattice; 14] = [
        Self::Ap,
        Self::Mp,
        Self::Mc,
        Self::Op,
        Self::Oc,
        Self::Of,
        Self::Oi,
        Self::Tp,
        Self::Ti,
        Self::Hp,
        Self::Hr,
        Self::Cp,
        Self::Cf,
        Self::Ci,
    ];

    /// Two-letter label, e.g. `"tP"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ap => "aP",
            Self::Mp => "mP",
            Self::Mc => "mC",
            Self::Op => "oP",
            Self::Oc => "oC",
            Self::Of => "oF",
            Self::Oi => "oI",
            Self::Tp => "tP",
            Self::Ti => "tI",
            Self::Hp => "hP",
            Self::Hr => "hR",
            Self::Cp => "cP",
            Self::Cf => "cF",
            Self::Ci => "cI",
        }
    }

    /// Lowest-numbered space group carrying this lattice.
    pub fn minimum_space_group(&self) -> u16 {
        match self {
            Self::Ap => 1,
            Self::Mp => 3,
            Self::Mc => 5,
            Self::Op => 16,
            Self::Oc => 20,
            Self::Of => 22,
            Self::Oi => 23,
            Self::Tp => 75,
            Self::Ti => 79,
            Self::Hp => 143,
            Self::Hr => 146,
            Self::Cp => 195,
            Self::Cf => 196,
            Self::Ci => 197,
        }
    }

    /// Derive the lattice from a space group number and its centring letter.
    ///
    /// A-, B- and C-centred settings all map onto the C-centred label.
    pub fn from_space_group(number: u16, centring: char) -> Option<Self> {
        let centring = centring.to_ascii_uppercase();
        let lattice = match (number, centring) {
            (1..=2, 'P') => Self::Ap,
            (3..=15, 'P') => Self::Mp,
            (3..=15, 'A' | 'B' | 'C' | 'I') => Self::Mc,
            (16..=74, 'P') => Self::Op,
            (16..=74, 'A' | 'B' | 'C') => Self::Oc,
            (16..=74, 'F') => Self::Of,
            (16..=74, 'I') => Self::Oi,
            (75..=142, 'P') => Self::Tp,
            (75..=142, 'I') => Self::Ti,
            (143..=194, 'R') => Self::Hr,
            (143..=194, 'P') => Self::Hp,
            (195..=230, 'P') => Self::Cp,
            (195..=230, 'F') => Self::Cf,
            (195..=230, 'I') => Self::Ci,
            _ => return None,
        };
        Some(lattice)
    }
}

impl std::fmt::Display for BravaisLattice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BravaisLattice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|l| l.as_str() == s.trim())
            .ok_or_else(|| format!("unknown Bravais lattice: {}", s))
    }
}

impl TryFrom<String> for BravaisLattice {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BravaisLattice> for String {
    fn from(value: BravaisLattice) -> Self {
        value.as_str().to_string()
    }
}
