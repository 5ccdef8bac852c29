use crate::domain::program::Program;
use crate::error::RegistrationError;
use serde::{Deserialize, Serialize};

/// Participant cap for one program of one competition.
///
/// `current_reserved` never exceeds `max_participants`; both mutators check
/// before they write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompetitionProgramCapacity {
    pub competition_id: String,
    pub program: Program,
    pub max_participants: u32,
    pub current_reserved: u32,
}

impl CompetitionProgramCapacity {
    pub fn new(competition_id: &str, program: Program, max_participants: u32) -> Self {
        Self {
            competition_id: competition_id.to_string(),
            program,
            max_participants,
            current_reserved: 0,
        }
    }

    pub fn available(&self) -> u32 {
        self.max_participants.saturating_sub(self.current_reserved)
    }

    /// Claims `count` slots if they fit under the cap.
    pub fn reserve(&mut self, count: u32) -> Result<(), RegistrationError> {
        match self.current_reserved.checked_add(count) {
            Some(total) if total <= self.max_participants => {
                self.current_reserved = total;
                Ok(())
            }
            _ => Err(RegistrationError::CapacityExceeded {
                competition_id: self.competition_id.clone(),
                program: self.program,
                requested: count,
                available: self.available(),
            }),
        }
    }

    /// Returns `count` slots to the pool.
    pub fn release(&mut self, count: u32) -> Result<(), RegistrationError> {
        if count <= self.current_reserved {
            self.current_reserved -= count;
            Ok(())
        } else {
            Err(RegistrationError::StorageError(format!(
                "Release of {count} slots exceeds {} reserved for {} in {}",
                self.current_reserved, self.program, self.competition_id
            )))
        }
    }

    /// Changes the cap; refuses to drop it below what is already held.
    pub fn resize(&mut self, max_participants: u32) -> Result<(), RegistrationError> {
        if max_participants < self.current_reserved {
            return Err(RegistrationError::ValidationError(format!(
                "Cannot set cap of {} for {} below {} reserved slots",
                max_participants, self.program, self.current_reserved
            )));
        }
        self.max_participants = max_participants;
        Ok(())
    }
}
