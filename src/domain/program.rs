use crate::error::RegistrationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Version of the program/category code tables. Bump when a code is added or retired.
pub const PROGRAM_CODES_VERSION: u32 = 1;

/// A competition sub-event with its own fee and capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Program {
    /// Individual Women
    #[serde(rename = "IW")]
    IndividualWomen,
    /// Individual Men
    #[serde(rename = "IM")]
    IndividualMen,
    /// Mixed Pair
    #[serde(rename = "MP")]
    MixedPair,
    /// Trio
    #[serde(rename = "TR")]
    Trio,
    /// Group
    #[serde(rename = "GR")]
    Group,
    /// Aerobic Dance
    #[serde(rename = "AD")]
    AerobicDance,
    /// Aerobic Step
    #[serde(rename = "AS")]
    AerobicStep,
}

impl Program {
    pub const ALL: [Program; 7] = [
        Program::IndividualWomen,
        Program::IndividualMen,
        Program::MixedPair,
        Program::Trio,
        Program::Group,
        Program::AerobicDance,
        Program::AerobicStep,
    ];

    /// The six slots the legacy average-fee fallback is computed over.
    pub const LEGACY_FEE_SLOTS: [Program; 6] = [
        Program::IndividualWomen,
        Program::IndividualMen,
        Program::MixedPair,
        Program::Trio,
        Program::Group,
        Program::AerobicDance,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Program::IndividualWomen => "IW",
            Program::IndividualMen => "IM",
            Program::MixedPair => "MP",
            Program::Trio => "TR",
            Program::Group => "GR",
            Program::AerobicDance => "AD",
            Program::AerobicStep => "AS",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Program::IndividualWomen => "Individual Women",
            Program::IndividualMen => "Individual Men",
            Program::MixedPair => "Mixed Pair",
            Program::Trio => "Trio",
            Program::Group => "Group",
            Program::AerobicDance => "Aerobic Dance",
            Program::AerobicStep => "Aerobic Step",
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Program {
    type Err = RegistrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim();
        Program::ALL
            .into_iter()
            .find(|p| p.code().eq_ignore_ascii_case(code))
            .ok_or_else(|| RegistrationError::ValidationError(format!("Unknown program code '{code}'")))
    }
}

/// Age category an entry competes in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "KID")]
    Kids,
    #[serde(rename = "AG1")]
    AgeGroup1,
    #[serde(rename = "AG2")]
    AgeGroup2,
    #[serde(rename = "JUN")]
    Junior,
    #[serde(rename = "SEN")]
    Senior,
    #[serde(rename = "MAS")]
    Masters,
}

impl Category {
    pub fn code(&self) -> &'static str {
        match self {
            Category::Kids => "KID",
            Category::AgeGroup1 => "AG1",
            Category::AgeGroup2 => "AG2",
            Category::Junior => "JUN",
            Category::Senior => "SEN",
            Category::Masters => "MAS",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_parse_is_strict() {
        assert_eq!("IW".parse::<Program>().unwrap(), Program::IndividualWomen);
        assert_eq!(" gr ".parse::<Program>().unwrap(), Program::Group);
        assert!(matches!(
            "IWW".parse::<Program>(),
            Err(RegistrationError::ValidationError(_))
        ));
    }

    #[test]
    fn test_program_serde_uses_codes() {
        let json = serde_json::to_string(&Program::MixedPair).unwrap();
        assert_eq!(json, "\"MP\"");
        assert!(serde_json::from_str::<Program>("\"XX\"").is_err());
        assert_eq!(
            serde_json::from_str::<Category>("\"JUN\"").unwrap(),
            Category::Junior
        );
    }
}
