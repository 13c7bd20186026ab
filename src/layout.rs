use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum LayoutError {
    #[error("unrecognized well '{0}' (expected row A-E + column 1-5)")]
    UnrecognizedWell(String),
    #[error("unknown plate layout '{0}' (expected 'common' or 'switched')")]
    UnknownLayout(String),
}

/// One compartment of the 25-well plate, identified by row letter and column
/// digit. Parsing rejects anything outside A1-E5 up front, so downstream code
/// never sees a well the layouts can't map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Well {
    row: char,
    col: u8,
}

impl Well {
    pub fn new(row: char, col: u8) -> Result<Self, LayoutError> {
        let row = row.to_ascii_uppercase();
        if !('A'..='E').contains(&row) || !(1..=5).contains(&col) {
            return Err(LayoutError::UnrecognizedWell(format!("{row}{col}")));
        }
        Ok(Self { row, col })
    }

    /// Row-major position on the plate: A1 = 0 .. E5 = 24.
    pub fn plate_index(self) -> usize {
        (self.row as usize - 'A' as usize) * 5 + (self.col as usize - 1)
    }
}

impl FromStr for Well {
    type Err = LayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        match (chars.next(), chars.next(), chars.next()) {
            (Some(r), Some(c), None) if c.is_ascii_digit() => {
                Well::new(r, c as u8 - b'0')
            }
            _ => Err(LayoutError::UnrecognizedWell(s.to_string())),
        }
    }
}

impl fmt::Display for Well {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.row, self.col)
    }
}

/// Genotype of the animal in a well, inferred from the label prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Genotype {
    Wildtype,
    Mutant,
}

impl Genotype {
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Wildtype => "WT",
            Self::Mutant => "MUT",
        }
    }
}

/// Animal label such as WT01 or MUT13.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AnimalId {
    pub genotype: Genotype,
    pub number: u8,
}

impl fmt::Display for AnimalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:02}", self.genotype.prefix(), self.number)
    }
}

// Genotype sorts WT before MUT so exported tables group wildtypes first,
// matching the historical label order.
impl PartialOrd for Genotype {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Genotype {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        fn rank(g: &Genotype) -> u8 {
            match g {
                Genotype::Wildtype => 0,
                Genotype::Mutant => 1,
            }
        }
        rank(self).cmp(&rank(other))
    }
}

/// Fixed well-to-animal mapping of the plate.
///
/// Both layouts assign labels row-major (A1, A2, .. E5). Common puts the 12
/// wildtypes first (A1-C2); Switched puts the 13 mutants first (A1-C3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlateLayout {
    #[default]
    Common,
    Switched,
}

/// Number of wildtype wells on the plate (mutants fill the remaining 13).
const WT_COUNT: usize = 12;

impl PlateLayout {
    /// Resolve a well to its animal label under this layout.
    pub fn resolve(self, well: Well) -> AnimalId {
        let idx = well.plate_index();
        let (first, second) = match self {
            Self::Common => (Genotype::Wildtype, Genotype::Mutant),
            Self::Switched => (Genotype::Mutant, Genotype::Wildtype),
        };
        // The leading block is 12 wells for Common (WT) and 13 for Switched (MUT).
        let split = match self {
            Self::Common => WT_COUNT,
            Self::Switched => 25 - WT_COUNT,
        };
        if idx < split {
            AnimalId {
                genotype: first,
                number: idx as u8 + 1,
            }
        } else {
            AnimalId {
                genotype: second,
                number: (idx - split) as u8 + 1,
            }
        }
    }
}

impl FromStr for PlateLayout {
    type Err = LayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "common" | "c" => Ok(Self::Common),
            "switched" | "s" => Ok(Self::Switched),
            other => Err(LayoutError::UnknownLayout(other.to_string())),
        }
    }
}
