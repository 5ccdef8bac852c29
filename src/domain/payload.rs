use crate::domain::program::{Category, Program};
use crate::domain::registration::RegistrationType;
use crate::error::{RegistrationError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Contact details of the person submitting a registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub club: Option<String>,
}

/// One competitor (or team) entered into one program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRequest {
    pub registration_id: String,
    pub program: Program,
    pub category: Category,
    pub participant_ref: String,
    pub registration_type: RegistrationType,
    #[serde(default = "default_slots")]
    pub slots: u32,
}

fn default_slots() -> u32 {
    1
}

/// Snapshot of a registration submission, frozen into the order at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationPayload {
    pub contact: ContactInfo,
    pub entries: Vec<EntryRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl RegistrationPayload {
    /// Checks the submission before anything is persisted.
    pub fn validate(&self) -> Result<()> {
        if self.entries.is_empty() {
            return Err(RegistrationError::ValidationError(
                "Registration has no entries".to_string(),
            ));
        }
        let email = self.contact.email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(RegistrationError::ValidationError(format!(
                "Invalid contact email '{email}'"
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for entry in &self.entries {
            if entry.registration_id.trim().is_empty() {
                return Err(RegistrationError::ValidationError(
                    "Entry is missing a registration id".to_string(),
                ));
            }
            if !seen.insert(entry.registration_id.as_str()) {
                return Err(RegistrationError::ValidationError(format!(
                    "Duplicate registration id '{}'",
                    entry.registration_id
                )));
            }
            if entry.participant_ref.trim().is_empty() {
                return Err(RegistrationError::ValidationError(format!(
                    "Entry {} has no participant",
                    entry.registration_id
                )));
            }
            if entry.slots == 0 {
                return Err(RegistrationError::ValidationError(format!(
                    "Entry {} must hold at least one slot",
                    entry.registration_id
                )));
            }
        }
        Ok(())
    }

    /// Entry counts per program, the selection the fee is computed from.
    pub fn selection(&self) -> BTreeMap<Program, u32> {
        let mut selection = BTreeMap::new();
        for entry in &self.entries {
            *selection.entry(entry.program).or_insert(0) += 1;
        }
        selection
    }
}
