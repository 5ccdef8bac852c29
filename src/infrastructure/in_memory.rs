use crate::domain::capacity::CompetitionProgramCapacity;
use crate::domain::competition::Competition;
use crate::domain::order::{OrderStatus, PaymentOrder};
use crate::domain::ports::{
    CapacityStore, CompetitionStore, OrderStore, RegistrationStore, Stores,
};
use crate::domain::program::Program;
use crate::domain::registration::{Registration, RegistrationStatus};
use crate::error::{RegistrationError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// Lock wait before a capacity mutation reports contention.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(250);

/// Builds a full set of in-memory ports.
pub fn in_memory_stores() -> Stores {
    in_memory_stores_with_timeout(DEFAULT_LOCK_TIMEOUT)
}

pub fn in_memory_stores_with_timeout(lock_timeout: Duration) -> Stores {
    Stores {
        orders: Arc::new(InMemoryOrderStore::new()),
        registrations: Arc::new(InMemoryRegistrationStore::new()),
        capacities: Arc::new(InMemoryCapacityStore::with_lock_timeout(lock_timeout)),
        competitions: Arc::new(InMemoryCompetitionStore::new()),
    }
}

/// A thread-safe in-memory store for payment orders.
///
/// Uses `Arc<RwLock<HashMap<String, PaymentOrder>>>`; the version check and the
/// write happen under one write guard.
#[derive(Default, Clone)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<HashMap<String, PaymentOrder>>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: PaymentOrder) -> Result<()> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.order_id) {
            return Err(RegistrationError::ValidationError(format!(
                "Order {} already exists",
                order.order_id
            )));
        }
        orders.insert(order.order_id.clone(), order);
        Ok(())
    }

    async fn get(&self, order_id: &str) -> Result<Option<PaymentOrder>> {
        let orders = self.orders.read().await;
        Ok(orders.get(order_id).cloned())
    }

    async fn compare_and_swap(&self, order: PaymentOrder, expected_version: u64) -> Result<bool> {
        let mut orders = self.orders.write().await;
        match orders.get_mut(&order.order_id) {
            Some(stored) if stored.version == expected_version => {
                *stored = order;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(RegistrationError::NotFound(format!("order {}", order.order_id))),
        }
    }

    async fn list_open(&self) -> Result<Vec<PaymentOrder>> {
        let orders = self.orders.read().await;
        Ok(orders
            .values()
            .filter(|o| matches!(o.status, OrderStatus::Pending | OrderStatus::Processing))
            .cloned()
            .collect())
    }

    async fn get_all(&self) -> Result<Vec<PaymentOrder>> {
        let orders = self.orders.read().await;
        Ok(orders.values().cloned().collect())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryRegistrationStore {
    registrations: Arc<RwLock<HashMap<String, Registration>>>,
}

impl InMemoryRegistrationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RegistrationStore for InMemoryRegistrationStore {
    async fn insert(&self, registration: Registration) -> Result<()> {
        let mut registrations = self.registrations.write().await;
        if registrations.contains_key(&registration.registration_id) {
            return Err(RegistrationError::ValidationError(format!(
                "Registration {} already exists",
                registration.registration_id
            )));
        }
        registrations.insert(registration.registration_id.clone(), registration);
        Ok(())
    }

    async fn get(&self, registration_id: &str) -> Result<Option<Registration>> {
        let registrations = self.registrations.read().await;
        Ok(registrations.get(registration_id).cloned())
    }

    async fn by_order(&self, order_id: &str) -> Result<Vec<Registration>> {
        let registrations = self.registrations.read().await;
        let mut found: Vec<Registration> = registrations
            .values()
            .filter(|r| r.order_id.as_deref() == Some(order_id))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.registration_id.cmp(&b.registration_id));
        Ok(found)
    }

    async fn transition(
        &self,
        registration_id: &str,
        from: &[RegistrationStatus],
        to: RegistrationStatus,
    ) -> Result<Option<Registration>> {
        let mut registrations = self.registrations.write().await;
        match registrations.get_mut(registration_id) {
            Some(r) if !r.released && from.contains(&r.status) => {
                r.status = to;
                Ok(Some(r.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_released(&self, registration_id: &str) -> Result<Option<Registration>> {
        let mut registrations = self.registrations.write().await;
        match registrations.get_mut(registration_id) {
            Some(r) if r.holds_capacity() => {
                r.released = true;
                r.status = RegistrationStatus::Cancelled;
                Ok(Some(r.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn get_all(&self) -> Result<Vec<Registration>> {
        let registrations = self.registrations.read().await;
        Ok(registrations.values().cloned().collect())
    }
}

type CapacityKey = (String, Program);

/// Capacity rows, each behind its own mutex.
///
/// Mutations of one `(competition, program)` key are serialized by that key's
/// mutex; different keys never wait on each other.
#[derive(Clone)]
pub struct InMemoryCapacityStore {
    rows: Arc<RwLock<HashMap<CapacityKey, Arc<Mutex<CompetitionProgramCapacity>>>>>,
    lock_timeout: Duration,
}

impl Default for InMemoryCapacityStore {
    fn default() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }
}

impl InMemoryCapacityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            rows: Arc::new(RwLock::new(HashMap::new())),
            lock_timeout,
        }
    }

    async fn row(
        &self,
        competition_id: &str,
        program: Program,
    ) -> Result<Arc<Mutex<CompetitionProgramCapacity>>> {
        let rows = self.rows.read().await;
        rows.get(&(competition_id.to_string(), program))
            .cloned()
            .ok_or_else(|| {
                RegistrationError::ValidationError(format!(
                    "Program {program} is not offered in competition {competition_id}"
                ))
            })
    }

    async fn mutate<F>(
        &self,
        competition_id: &str,
        program: Program,
        f: F,
    ) -> Result<CompetitionProgramCapacity>
    where
        F: FnOnce(&mut CompetitionProgramCapacity) -> Result<()> + Send,
    {
        let row = self.row(competition_id, program).await?;
        let mut capacity = tokio::time::timeout(self.lock_timeout, row.lock())
            .await
            .map_err(|_| RegistrationError::LockContention(format!("{competition_id}/{program}")))?;
        f(&mut capacity)?;
        Ok(capacity.clone())
    }
}

#[async_trait]
impl CapacityStore for InMemoryCapacityStore {
    async fn define(
        &self,
        competition_id: &str,
        program: Program,
        max_participants: u32,
    ) -> Result<()> {
        let existing = {
            let mut rows = self.rows.write().await;
            match rows.get(&(competition_id.to_string(), program)) {
                Some(row) => row.clone(),
                None => {
                    rows.insert(
                        (competition_id.to_string(), program),
                        Arc::new(Mutex::new(CompetitionProgramCapacity::new(
                            competition_id,
                            program,
                            max_participants,
                        ))),
                    );
                    return Ok(());
                }
            }
        };
        let mut capacity = existing.lock().await;
        capacity.resize(max_participants)
    }

    async fn get(
        &self,
        competition_id: &str,
        program: Program,
    ) -> Result<Option<CompetitionProgramCapacity>> {
        let row = {
            let rows = self.rows.read().await;
            rows.get(&(competition_id.to_string(), program)).cloned()
        };
        match row {
            Some(row) => Ok(Some(row.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn try_reserve(
        &self,
        competition_id: &str,
        program: Program,
        count: u32,
    ) -> Result<CompetitionProgramCapacity> {
        self.mutate(competition_id, program, |c| c.reserve(count)).await
    }

    async fn release(
        &self,
        competition_id: &str,
        program: Program,
        count: u32,
    ) -> Result<CompetitionProgramCapacity> {
        self.mutate(competition_id, program, |c| c.release(count)).await
    }
}

#[derive(Default, Clone)]
pub struct InMemoryCompetitionStore {
    competitions: Arc<RwLock<HashMap<String, Competition>>>,
}

impl InMemoryCompetitionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CompetitionStore for InMemoryCompetitionStore {
    async fn upsert(&self, competition: Competition) -> Result<()> {
        let mut competitions = self.competitions.write().await;
        competitions.insert(competition.competition_id.clone(), competition);
        Ok(())
    }

    async fn get(&self, competition_id: &str) -> Result<Option<Competition>> {
        let competitions = self.competitions.read().await;
        Ok(competitions.get(competition_id).cloned())
    }
}
