use crate::domain::payload::EntryRequest;
use crate::domain::program::{Category, Program};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationType {
    Preliminary,
    Individual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    Pending,
    Confirmed,
    Cancelled,
    Waitlisted,
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RegistrationStatus::Pending => "pending",
            RegistrationStatus::Confirmed => "confirmed",
            RegistrationStatus::Cancelled => "cancelled",
            RegistrationStatus::Waitlisted => "waitlisted",
        };
        f.write_str(s)
    }
}

/// One entry of a submission and the capacity it holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub registration_id: String,
    pub competition_id: String,
    pub program: Program,
    pub category: Category,
    pub participant_ref: String,
    pub registration_type: RegistrationType,
    /// `None` when the competition takes no payment.
    pub order_id: Option<String>,
    /// Capacity units held in `program`.
    pub slots: u32,
    pub status: RegistrationStatus,
    /// Set once the slots went back to the pool; later releases are no-ops.
    pub released: bool,
}

impl Registration {
    pub fn from_entry(competition_id: &str, order_id: Option<&str>, entry: &EntryRequest) -> Self {
        Self {
            registration_id: entry.registration_id.clone(),
            competition_id: competition_id.to_string(),
            program: entry.program,
            category: entry.category,
            participant_ref: entry.participant_ref.clone(),
            registration_type: entry.registration_type,
            order_id: order_id.map(str::to_string),
            slots: entry.slots,
            status: RegistrationStatus::Pending,
            released: false,
        }
    }

    /// Whether this registration currently holds capacity.
    pub fn holds_capacity(&self) -> bool {
        !self.released
            && matches!(
                self.status,
                RegistrationStatus::Pending | RegistrationStatus::Confirmed
            )
    }
}
