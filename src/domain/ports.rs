use super::capacity::CompetitionProgramCapacity;
use super::competition::Competition;
use super::order::{PaymentOrder, Transition};
use super::program::Program;
use super::registration::{Registration, RegistrationStatus};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts a new order. Fails if the id is already taken.
    async fn insert(&self, order: PaymentOrder) -> Result<()>;
    async fn get(&self, order_id: &str) -> Result<Option<PaymentOrder>>;
    /// Writes `order` only if the stored version still equals `expected_version`.
    /// Returns `false` when another writer got there first.
    async fn compare_and_swap(&self, order: PaymentOrder, expected_version: u64) -> Result<bool>;
    /// Orders still waiting for a resolution (`pending` or `processing`).
    async fn list_open(&self) -> Result<Vec<PaymentOrder>>;
    async fn get_all(&self) -> Result<Vec<PaymentOrder>>;
}

#[async_trait]
pub trait RegistrationStore: Send + Sync {
    async fn insert(&self, registration: Registration) -> Result<()>;
    async fn get(&self, registration_id: &str) -> Result<Option<Registration>>;
    async fn by_order(&self, order_id: &str) -> Result<Vec<Registration>>;
    /// Atomically moves a registration to `to` if its status is one of `from`
    /// and it has not been released. Returns the updated record, or `None` if
    /// the guard did not hold.
    async fn transition(
        &self,
        registration_id: &str,
        from: &[RegistrationStatus],
        to: RegistrationStatus,
    ) -> Result<Option<Registration>>;
    /// Atomically sets `released` and marks the registration cancelled. Returns
    /// the record only for the call that flipped the flag on a registration
    /// that held capacity.
    async fn mark_released(&self, registration_id: &str) -> Result<Option<Registration>>;
    async fn get_all(&self) -> Result<Vec<Registration>>;
}

#[async_trait]
pub trait CapacityStore: Send + Sync {
    /// Creates the cap or resizes an existing one, keeping its reservations.
    async fn define(&self, competition_id: &str, program: Program, max_participants: u32)
    -> Result<()>;
    async fn get(&self, competition_id: &str, program: Program)
    -> Result<Option<CompetitionProgramCapacity>>;
    /// Serialized per `(competition_id, program)`: claims `count` slots or fails
    /// with `CapacityExceeded`. May fail with `LockContention`.
    async fn try_reserve(
        &self,
        competition_id: &str,
        program: Program,
        count: u32,
    ) -> Result<CompetitionProgramCapacity>;
    /// Serialized per `(competition_id, program)`: returns `count` slots.
    async fn release(
        &self,
        competition_id: &str,
        program: Program,
        count: u32,
    ) -> Result<CompetitionProgramCapacity>;
}

#[async_trait]
pub trait CompetitionStore: Send + Sync {
    async fn upsert(&self, competition: Competition) -> Result<()>;
    async fn get(&self, competition_id: &str) -> Result<Option<Competition>>;
}

/// Told about every terminal transition. Failures are logged, never propagated.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn order_resolved(&self, order: &PaymentOrder, transition: &Transition) -> Result<()>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub type OrderStoreRef = Arc<dyn OrderStore>;
pub type RegistrationStoreRef = Arc<dyn RegistrationStore>;
pub type CapacityStoreRef = Arc<dyn CapacityStore>;
pub type CompetitionStoreRef = Arc<dyn CompetitionStore>;
pub type NotifierRef = Arc<dyn Notifier>;
pub type ClockRef = Arc<dyn Clock>;

/// The persistence collaborator, as one bundle of ports.
#[derive(Clone)]
pub struct Stores {
    pub orders: OrderStoreRef,
    pub registrations: RegistrationStoreRef,
    pub capacities: CapacityStoreRef,
    pub competitions: CompetitionStoreRef,
}
