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
use rocksdb::{ColumnFamilyDescriptor, DB, Options};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

/// Column Family for payment orders, keyed by order id.
pub const CF_ORDERS: &str = "orders";
/// Column Family for registrations, keyed by registration id.
pub const CF_REGISTRATIONS: &str = "registrations";
/// Column Family for capacity rows, keyed by `competition_id/program`.
pub const CF_CAPACITIES: &str = "capacities";
/// Column Family for competitions, keyed by competition id.
pub const CF_COMPETITIONS: &str = "competitions";

/// A persistent store implementation using RocksDB.
///
/// All four record kinds live in one database, one Column Family each, encoded
/// as JSON. Read-modify-write operations (compare-and-swap, registration
/// guards, capacity counters) run under a single writer lock so the check and
/// the put are atomic with respect to each other.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    writer: Arc<Mutex<()>>,
    lock_timeout: Duration,
}

/// Opens the database at `path` and hands out every port backed by it.
pub fn rocksdb_stores<P: AsRef<Path>>(path: P, lock_timeout: Duration) -> Result<Stores> {
    let store = Arc::new(RocksDBStore::open(path)?.with_lock_timeout(lock_timeout));
    Ok(Stores {
        orders: store.clone(),
        registrations: store.clone(),
        capacities: store.clone(),
        competitions: store,
    })
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the required column families exist.
    ///
    /// # Arguments
    ///
    /// * `path` - The filesystem path where the database will be stored.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let families = [CF_ORDERS, CF_REGISTRATIONS, CF_CAPACITIES, CF_COMPETITIONS]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, families)?;

        Ok(Self {
            db: Arc::new(db),
            writer: Arc::new(Mutex::new(())),
            lock_timeout: crate::infrastructure::in_memory::DEFAULT_LOCK_TIMEOUT,
        })
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| RegistrationError::StorageError(format!("{name} column family not found")))
    }

    fn read<T: DeserializeOwned>(&self, family: &str, key: &str) -> Result<Option<T>> {
        let cf = self.cf(family)?;
        match self.db.get_cf(cf, key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write<T: Serialize>(&self, family: &str, key: &str, value: &T) -> Result<()> {
        let cf = self.cf(family)?;
        self.db.put_cf(cf, key.as_bytes(), serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn scan<T: DeserializeOwned>(&self, family: &str) -> Result<Vec<T>> {
        let cf = self.cf(family)?;
        let mut values = Vec::new();
        for item in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            let (_key, value) = item?;
            values.push(serde_json::from_slice(&value)?);
        }
        Ok(values)
    }

    async fn lock(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().await
    }

    async fn lock_capacity(&self, key: &str) -> Result<MutexGuard<'_, ()>> {
        tokio::time::timeout(self.lock_timeout, self.writer.lock())
            .await
            .map_err(|_| RegistrationError::LockContention(key.to_string()))
    }

    async fn mutate_capacity<F>(
        &self,
        competition_id: &str,
        program: Program,
        f: F,
    ) -> Result<CompetitionProgramCapacity>
    where
        F: FnOnce(&mut CompetitionProgramCapacity) -> Result<()> + Send,
    {
        let key = capacity_key(competition_id, program);
        let _guard = self.lock_capacity(&key).await?;
        let mut capacity: CompetitionProgramCapacity =
            self.read(CF_CAPACITIES, &key)?.ok_or_else(|| {
                RegistrationError::ValidationError(format!(
                    "Program {program} is not offered in competition {competition_id}"
                ))
            })?;
        f(&mut capacity)?;
        self.write(CF_CAPACITIES, &key, &capacity)?;
        Ok(capacity)
    }
}

fn capacity_key(competition_id: &str, program: Program) -> String {
    format!("{competition_id}/{}", program.code())
}

#[async_trait]
impl OrderStore for RocksDBStore {
    async fn insert(&self, order: PaymentOrder) -> Result<()> {
        let _guard = self.lock().await;
        if self.read::<PaymentOrder>(CF_ORDERS, &order.order_id)?.is_some() {
            return Err(RegistrationError::ValidationError(format!(
                "Order {} already exists",
                order.order_id
            )));
        }
        self.write(CF_ORDERS, &order.order_id, &order)
    }

    async fn get(&self, order_id: &str) -> Result<Option<PaymentOrder>> {
        self.read(CF_ORDERS, order_id)
    }

    async fn compare_and_swap(&self, order: PaymentOrder, expected_version: u64) -> Result<bool> {
        let _guard = self.lock().await;
        let stored: PaymentOrder = self
            .read(CF_ORDERS, &order.order_id)?
            .ok_or_else(|| RegistrationError::NotFound(format!("order {}", order.order_id)))?;
        if stored.version != expected_version {
            return Ok(false);
        }
        self.write(CF_ORDERS, &order.order_id, &order)?;
        Ok(true)
    }

    async fn list_open(&self) -> Result<Vec<PaymentOrder>> {
        Ok(self
            .scan::<PaymentOrder>(CF_ORDERS)?
            .into_iter()
            .filter(|o| matches!(o.status, OrderStatus::Pending | OrderStatus::Processing))
            .collect())
    }

    async fn get_all(&self) -> Result<Vec<PaymentOrder>> {
        self.scan(CF_ORDERS)
    }
}

#[async_trait]
impl RegistrationStore for RocksDBStore {
    async fn insert(&self, registration: Registration) -> Result<()> {
        let _guard = self.lock().await;
        let id = &registration.registration_id;
        if self.read::<Registration>(CF_REGISTRATIONS, id)?.is_some() {
            return Err(RegistrationError::ValidationError(format!(
                "Registration {id} already exists"
            )));
        }
        self.write(CF_REGISTRATIONS, id, &registration)
    }

    async fn get(&self, registration_id: &str) -> Result<Option<Registration>> {
        self.read(CF_REGISTRATIONS, registration_id)
    }

    async fn by_order(&self, order_id: &str) -> Result<Vec<Registration>> {
        // Keys iterate in byte order, which is registration id order.
        Ok(self
            .scan::<Registration>(CF_REGISTRATIONS)?
            .into_iter()
            .filter(|r| r.order_id.as_deref() == Some(order_id))
            .collect())
    }

    async fn transition(
        &self,
        registration_id: &str,
        from: &[RegistrationStatus],
        to: RegistrationStatus,
    ) -> Result<Option<Registration>> {
        let _guard = self.lock().await;
        match self.read::<Registration>(CF_REGISTRATIONS, registration_id)? {
            Some(mut r) if !r.released && from.contains(&r.status) => {
                r.status = to;
                self.write(CF_REGISTRATIONS, registration_id, &r)?;
                Ok(Some(r))
            }
            _ => Ok(None),
        }
    }

    async fn mark_released(&self, registration_id: &str) -> Result<Option<Registration>> {
        let _guard = self.lock().await;
        match self.read::<Registration>(CF_REGISTRATIONS, registration_id)? {
            Some(mut r) if r.holds_capacity() => {
                r.released = true;
                r.status = RegistrationStatus::Cancelled;
                self.write(CF_REGISTRATIONS, registration_id, &r)?;
                Ok(Some(r))
            }
            _ => Ok(None),
        }
    }

    async fn get_all(&self) -> Result<Vec<Registration>> {
        self.scan(CF_REGISTRATIONS)
    }
}

#[async_trait]
impl CapacityStore for RocksDBStore {
    async fn define(
        &self,
        competition_id: &str,
        program: Program,
        max_participants: u32,
    ) -> Result<()> {
        let key = capacity_key(competition_id, program);
        let _guard = self.lock().await;
        let capacity = match self.read::<CompetitionProgramCapacity>(CF_CAPACITIES, &key)? {
            Some(mut existing) => {
                existing.resize(max_participants)?;
                existing
            }
            None => CompetitionProgramCapacity::new(competition_id, program, max_participants),
        };
        self.write(CF_CAPACITIES, &key, &capacity)
    }

    async fn get(
        &self,
        competition_id: &str,
        program: Program,
    ) -> Result<Option<CompetitionProgramCapacity>> {
        self.read(CF_CAPACITIES, &capacity_key(competition_id, program))
    }

    async fn try_reserve(
        &self,
        competition_id: &str,
        program: Program,
        count: u32,
    ) -> Result<CompetitionProgramCapacity> {
        self.mutate_capacity(competition_id, program, |c| c.reserve(count))
            .await
    }

    async fn release(
        &self,
        competition_id: &str,
        program: Program,
        count: u32,
    ) -> Result<CompetitionProgramCapacity> {
        self.mutate_capacity(competition_id, program, |c| c.release(count))
            .await
    }
}

#[async_trait]
impl CompetitionStore for RocksDBStore {
    async fn upsert(&self, competition: Competition) -> Result<()> {
        self.write(CF_COMPETITIONS, &competition.competition_id, &competition)
    }

    async fn get(&self, competition_id: &str) -> Result<Option<Competition>> {
        self.read(CF_COMPETITIONS, competition_id)
    }
}
