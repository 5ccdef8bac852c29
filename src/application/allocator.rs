use crate::config::EngineConfig;
use crate::domain::capacity::CompetitionProgramCapacity;
use crate::domain::ports::{CapacityStoreRef, RegistrationStoreRef, Stores};
use crate::domain::program::Program;
use crate::domain::registration::{Registration, RegistrationStatus};
use crate::error::{RegistrationError, Result};
use std::future::Future;

/// Proof that `count` slots of `program` were claimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationToken {
    pub competition_id: String,
    pub program: Program,
    pub count: u32,
}

/// Per-program capacity accounting.
///
/// The single-writer discipline for each `(competition, program)` key lives in
/// the capacity store; this type adds bounded retry on lock contention and the
/// `released` guard on registrations.
pub struct RegistrationAllocator {
    capacities: CapacityStoreRef,
    registrations: RegistrationStoreRef,
    config: EngineConfig,
}

impl RegistrationAllocator {
    pub fn new(stores: &Stores, config: &EngineConfig) -> Self {
        Self {
            capacities: stores.capacities.clone(),
            registrations: stores.registrations.clone(),
            config: config.clone(),
        }
    }

    async fn with_retry<F, Fut>(&self, mut op: F) -> Result<CompetitionProgramCapacity>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<CompetitionProgramCapacity>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Err(RegistrationError::LockContention(key))
                    if attempt < self.config.capacity_retry_attempts =>
                {
                    let backoff = self.config.capacity_backoff(attempt);
                    tracing::debug!(%key, attempt, ?backoff, "capacity lock contended, retrying");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Claims `count` slots, or fails with `CapacityExceeded`.
    ///
    /// Storage errors propagate unchanged: no slot is ever assumed granted.
    pub async fn reserve(
        &self,
        competition_id: &str,
        program: Program,
        count: u32,
    ) -> Result<ReservationToken> {
        if count == 0 {
            return Err(RegistrationError::ValidationError(
                "Reservation must claim at least one slot".to_string(),
            ));
        }
        let capacity = self
            .with_retry(|| self.capacities.try_reserve(competition_id, program, count))
            .await?;
        tracing::debug!(
            competition_id,
            %program,
            count,
            reserved = capacity.current_reserved,
            max = capacity.max_participants,
            "capacity reserved"
        );
        Ok(ReservationToken {
            competition_id: competition_id.to_string(),
            program,
            count,
        })
    }

    /// Gives back a token that never got attached to a registration.
    pub async fn cancel_reservation(&self, token: &ReservationToken) -> Result<()> {
        self.with_retry(|| {
            self.capacities
                .release(&token.competition_id, token.program, token.count)
        })
        .await?;
        Ok(())
    }

    /// Makes the reservation permanent. Confirming twice is fine.
    pub async fn confirm(&self, registration_id: &str) -> Result<Registration> {
        if let Some(registration) = self
            .registrations
            .transition(
                registration_id,
                &[RegistrationStatus::Pending],
                RegistrationStatus::Confirmed,
            )
            .await?
        {
            tracing::info!(registration_id, "registration confirmed");
            return Ok(registration);
        }

        let current = self
            .registrations
            .get(registration_id)
            .await?
            .ok_or_else(|| RegistrationError::NotFound(format!("registration {registration_id}")))?;
        if current.status == RegistrationStatus::Confirmed {
            Ok(current)
        } else {
            Err(RegistrationError::ValidationError(format!(
                "Registration {registration_id} is {} and cannot be confirmed",
                current.status
            )))
        }
    }

    /// Returns the registration's slots and cancels it. Returns `false` when
    /// there was nothing to release.
    pub async fn release(&self, registration_id: &str) -> Result<bool> {
        let Some(registration) = self.registrations.mark_released(registration_id).await? else {
            tracing::debug!(registration_id, "release skipped, nothing held");
            return Ok(false);
        };

        let released = self
            .with_retry(|| {
                self.capacities.release(
                    &registration.competition_id,
                    registration.program,
                    registration.slots,
                )
            })
            .await;
        match released {
            Ok(capacity) => {
                tracing::info!(
                    registration_id,
                    program = %registration.program,
                    slots = registration.slots,
                    reserved = capacity.current_reserved,
                    "registration released"
                );
                Ok(true)
            }
            Err(e) => {
                // The flag is already set; the slots stay held until repaired.
                tracing::error!(registration_id, error = %e, review = true, "capacity release failed");
                Err(e)
            }
        }
    }
}
