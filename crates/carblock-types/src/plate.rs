use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Longest plate we accept, matching the storage column width.
pub const MAX_PLATE_LEN: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlateNumberError {
    #[error("plate number is empty")]
    Empty,

    #[error("plate number is longer than {} characters", MAX_PLATE_LEN)]
    TooLong,

    #[error("plate number contains invalid character {0:?}")]
    InvalidChar(char),
}

/// A plate number in canonical form: whitespace removed, uppercased.
///
/// Every read and write against the plate directory goes through this type,
/// so `abc123`, `ABC 123` and ` a b c 1 2 3 ` all name the same plate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PlateNumber(String);

impl PlateNumber {
    pub fn parse(raw: &str) -> Result<Self, PlateNumberError> {
        let canonical: String = raw
            .chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(char::to_uppercase)
            .collect();

        if canonical.is_empty() {
            return Err(PlateNumberError::Empty);
        }
        if canonical.chars().count() > MAX_PLATE_LEN {
            return Err(PlateNumberError::TooLong);
        }
        if let Some(bad) = canonical.chars().find(|c| !c.is_alphanumeric() && *c != '-') {
            return Err(PlateNumberError::InvalidChar(bad));
        }

        Ok(Self(canonical))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlateNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PlateNumber {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for PlateNumber {
    type Err = PlateNumberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PlateNumber {
    type Error = PlateNumberError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PlateNumber> for String {
    fn from(plate: PlateNumber) -> Self {
        plate.0
    }
}
