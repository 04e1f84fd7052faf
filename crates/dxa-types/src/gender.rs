//! Subject gender as used for reference-value lookup.
//!
//! Clinic input arrives with localized labels (`女性`/`男性`) or English codes. Translation
//! happens once here; downstream code only ever matches on [`Gender`].

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Female,
    Male,
}

#[derive(Debug, thiserror::Error)]
#[error("unrecognised gender label: '{0}'")]
pub struct GenderError(pub String);

impl Gender {
    pub const ALL: [Gender; 2] = [Gender::Female, Gender::Male];

    /// Stable lowercase key used in reference tables and on disk.
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Female => "female",
            Gender::Male => "male",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gender {
    type Err = GenderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "female" | "f" | "女性" | "女" => Ok(Gender::Female),
            "male" | "m" | "男性" | "男" => Ok(Gender::Male),
            _ => Err(GenderError(trimmed.to_owned())),
        }
    }
}
