use crate::application::allocator::{RegistrationAllocator, ReservationToken};
use crate::application::fees::FeeCalculator;
use crate::application::gateway::{GatewayAdapter, SignedPayload};
use crate::application::orders::{OrderLookup, OrderManager};
use crate::application::reconciler::{ReconcileOutcome, StatusReconciler};
use crate::config::EngineConfig;
use crate::domain::competition::Competition;
use crate::domain::order::{PaymentOrder, Transition, TransitionCause};
use crate::domain::payload::RegistrationPayload;
use crate::domain::ports::{ClockRef, NotifierRef, Stores};
use crate::domain::program::Program;
use crate::domain::registration::{Registration, RegistrationStatus};
use crate::error::{RegistrationError, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Result of a registration submission.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    /// Capacity is held; the customer must complete the checkout.
    AwaitingPayment {
        order: PaymentOrder,
        registrations: Vec<Registration>,
        checkout: SignedPayload,
    },
    /// Free or draft competition: confirmed without payment.
    Confirmed { registrations: Vec<Registration> },
    /// Sold out, but the competition keeps a waitlist.
    Waitlisted { registrations: Vec<Registration> },
}

/// What the callback endpoint answers the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackAck {
    Applied(ReconcileOutcome),
    /// Stale, duplicate or contradicting event; acknowledged and dropped.
    Ignored { reason: String },
}

/// How often a client should re-fetch an order while it is unresolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollingContract {
    pub interval_secs: u64,
    pub backoff_max_secs: u64,
    /// Set once the order is terminal.
    pub stop: bool,
}

/// Client-facing status of an order or a free registration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderStatusView {
    pub order: Option<PaymentOrder>,
    pub registrations: Vec<Registration>,
    pub is_expired: bool,
    pub can_retry: bool,
    pub polling: PollingContract,
}

/// Entry point wiring fee calculation, order creation, capacity and
/// reconciliation together. Holds no state of its own beyond the ports.
pub struct RegistrationEngine {
    stores: Stores,
    config: EngineConfig,
    clock: ClockRef,
    gateway: GatewayAdapter,
    orders: OrderManager,
    allocator: Arc<RegistrationAllocator>,
    reconciler: StatusReconciler,
}

impl RegistrationEngine {
    /// Creates a new `RegistrationEngine`.
    ///
    /// # Arguments
    ///
    /// * `stores` - The persistence ports.
    /// * `config` - Engine tunables; validated here.
    /// * `clock` - Source of `now` for expiry and payment timestamps.
    /// * `notifier` - Told about every terminal transition.
    pub fn new(
        stores: Stores,
        config: EngineConfig,
        clock: ClockRef,
        notifier: NotifierRef,
    ) -> Result<Self> {
        config.validate()?;
        let allocator = Arc::new(RegistrationAllocator::new(&stores, &config));
        let orders = OrderManager::new(&stores, clock.clone(), config.order_ttl());
        let reconciler = StatusReconciler::new(
            &stores,
            allocator.clone(),
            notifier,
            clock.clone(),
            config.reconcile_max_attempts,
        );
        Ok(Self {
            gateway: GatewayAdapter::new(config.gateway_secret.as_bytes()),
            stores,
            config,
            clock,
            orders,
            allocator,
            reconciler,
        })
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn gateway(&self) -> &GatewayAdapter {
        &self.gateway
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Stores a competition and defines (or resizes) its program caps.
    pub async fn open_competition(
        &self,
        competition: Competition,
        capacities: &BTreeMap<Program, u32>,
    ) -> Result<()> {
        for (program, max) in capacities {
            self.stores
                .capacities
                .define(&competition.competition_id, *program, *max)
                .await?;
        }
        tracing::info!(
            competition_id = %competition.competition_id,
            programs = capacities.len(),
            "competition opened"
        );
        self.stores.competitions.upsert(competition).await
    }

    /// Registers a submission: fee, order, capacity, checkout payload.
    pub async fn submit(
        &self,
        competition_id: &str,
        payload: RegistrationPayload,
    ) -> Result<SubmissionOutcome> {
        payload.validate()?;
        let competition = self
            .stores
            .competitions
            .get(competition_id)
            .await?
            .ok_or_else(|| RegistrationError::NotFound(format!("competition {competition_id}")))?;
        if !competition.is_registration_open(self.clock.now()) {
            return Err(RegistrationError::ValidationError(format!(
                "Registration for {} is closed",
                competition.name
            )));
        }
        for entry in &payload.entries {
            if self
                .stores
                .registrations
                .get(&entry.registration_id)
                .await?
                .is_some()
            {
                return Err(RegistrationError::ValidationError(format!(
                    "Registration {} already exists",
                    entry.registration_id
                )));
            }
        }

        let amount = FeeCalculator::total(&competition.fee_table, &payload.selection());
        let email = payload.contact.email.clone();
        let order = self
            .orders
            .create(&competition, payload.clone(), amount, &email)
            .await?;
        let order_id = order.as_ref().map(|o| o.order_id.as_str());

        let mut tokens: Vec<ReservationToken> = Vec::with_capacity(payload.entries.len());
        for entry in &payload.entries {
            match self
                .allocator
                .reserve(competition_id, entry.program, entry.slots)
                .await
            {
                Ok(token) => tokens.push(token),
                Err(e) => {
                    self.roll_back_tokens(&tokens).await;
                    if let Some(order) = &order {
                        self.reconciler
                            .cancel(&order.order_id, TransitionCause::CapacityRefused)
                            .await?;
                    }
                    return match e {
                        RegistrationError::CapacityExceeded { .. } if competition.waitlist_enabled => {
                            self.waitlist(&competition, &payload).await
                        }
                        other => Err(other),
                    };
                }
            }
        }

        let mut registrations: Vec<Registration> = Vec::with_capacity(payload.entries.len());
        for (index, entry) in payload.entries.iter().enumerate() {
            let registration = Registration::from_entry(competition_id, order_id, entry);
            if let Err(e) = self.stores.registrations.insert(registration.clone()).await {
                self.roll_back_tokens(&tokens[index..]).await;
                match &order {
                    Some(order) => {
                        self.reconciler
                            .cancel(&order.order_id, TransitionCause::CapacityRefused)
                            .await?;
                    }
                    None => {
                        for inserted in &registrations {
                            self.allocator.release(&inserted.registration_id).await?;
                        }
                    }
                }
                return Err(e);
            }
            registrations.push(registration);
        }

        match order {
            Some(order) => {
                let checkout = self.gateway.encode(&order)?;
                Ok(SubmissionOutcome::AwaitingPayment {
                    order,
                    registrations,
                    checkout,
                })
            }
            None => {
                let mut confirmed = Vec::with_capacity(registrations.len());
                for registration in &registrations {
                    confirmed.push(self.allocator.confirm(&registration.registration_id).await?);
                }
                Ok(SubmissionOutcome::Confirmed {
                    registrations: confirmed,
                })
            }
        }
    }

    async fn roll_back_tokens(&self, tokens: &[ReservationToken]) {
        for token in tokens {
            if let Err(e) = self.allocator.cancel_reservation(token).await {
                tracing::error!(
                    competition_id = %token.competition_id,
                    program = %token.program,
                    count = token.count,
                    error = %e,
                    review = true,
                    "failed to roll back reservation"
                );
            }
        }
    }

    async fn waitlist(
        &self,
        competition: &Competition,
        payload: &RegistrationPayload,
    ) -> Result<SubmissionOutcome> {
        let mut registrations = Vec::with_capacity(payload.entries.len());
        for entry in &payload.entries {
            let mut registration = Registration::from_entry(&competition.competition_id, None, entry);
            registration.status = RegistrationStatus::Waitlisted;
            self.stores.registrations.insert(registration.clone()).await?;
            registrations.push(registration);
        }
        tracing::info!(
            competition_id = %competition.competition_id,
            entries = registrations.len(),
            "submission waitlisted"
        );
        Ok(SubmissionOutcome::Waitlisted { registrations })
    }

    /// Verifies, decodes and applies a gateway callback.
    pub async fn handle_callback(&self, raw_payload: &str, signature: &str) -> Result<CallbackAck> {
        if let Err(e) = self.gateway.verify_callback(raw_payload, signature) {
            tracing::error!(error = %e, review = true, "gateway callback rejected");
            return Err(e);
        }
        let event = GatewayAdapter::decode(raw_payload)?;
        match self.reconciler.apply_event(&event).await {
            Ok(outcome) => Ok(CallbackAck::Applied(outcome)),
            Err(e) if e.is_ignorable_event() => Ok(CallbackAck::Ignored {
                reason: e.to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    /// Customer cancellation; refused once the gateway has acknowledged the order.
    pub async fn cancel(&self, order_id: &str) -> Result<Option<Transition>> {
        self.reconciler
            .cancel(order_id, TransitionCause::CustomerCancel)
            .await
    }

    /// Expires every unresolved order past its deadline, then re-settles
    /// registrations still pending under a resolved order. One failing order
    /// does not stop the sweep.
    pub async fn sweep_expired(&self) -> Result<Vec<Transition>> {
        let now = self.clock.now();
        let mut expired = Vec::new();
        for order in self.stores.orders.list_open().await? {
            if now <= order.expires_at {
                continue;
            }
            match self.reconciler.expire(&order.order_id).await {
                Ok(Some(transition)) => expired.push(transition),
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(order_id = %order.order_id, error = %e, "expiry failed");
                }
            }
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "expired orders swept");
        }
        self.repair_settlements().await?;
        Ok(expired)
    }

    async fn repair_settlements(&self) -> Result<()> {
        let order_ids: BTreeSet<String> = self
            .stores
            .registrations
            .get_all()
            .await?
            .into_iter()
            .filter(|r| r.status == RegistrationStatus::Pending)
            .filter_map(|r| r.order_id)
            .collect();
        for order_id in order_ids {
            if let Err(e) = self.reconciler.repair(&order_id).await {
                tracing::error!(%order_id, error = %e, review = true, "settlement repair failed");
            }
        }
        Ok(())
    }

    /// Read-only status for client polling.
    pub async fn status_view(&self, lookup: &OrderLookup) -> Result<OrderStatusView> {
        let snapshot = self.orders.get(lookup).await?;
        let now = self.clock.now();

        let competition_id = snapshot
            .order
            .as_ref()
            .map(|o| o.competition_id.clone())
            .or_else(|| snapshot.registrations.first().map(|r| r.competition_id.clone()));
        let window_open = match competition_id {
            Some(id) => self
                .stores
                .competitions
                .get(&id)
                .await?
                .is_some_and(|c| c.is_registration_open(now)),
            None => false,
        };

        let is_expired = snapshot.order.as_ref().is_some_and(|o| o.is_expired_at(now));
        // An unswept order past its deadline can still be paid, so only a
        // recorded failure or expiry opens a retry.
        let retryable_status = snapshot
            .order
            .as_ref()
            .is_some_and(|o| o.status.allows_retry());
        let terminal = snapshot
            .order
            .as_ref()
            .is_none_or(|o| o.status.is_terminal() || is_expired);

        Ok(OrderStatusView {
            is_expired,
            can_retry: retryable_status && window_open,
            polling: PollingContract {
                interval_secs: self.config.poll_interval_secs,
                backoff_max_secs: self.config.poll_backoff_max_secs,
                stop: terminal,
            },
            order: snapshot.order,
            registrations: snapshot.registrations,
        })
    }

    /// Final state of every registration with the order paying for it.
    pub async fn registration_report(&self) -> Result<Vec<(Registration, Option<PaymentOrder>)>> {
        let mut registrations = self.stores.registrations.get_all().await?;
        registrations.sort_by(|a, b| a.registration_id.cmp(&b.registration_id));
        let mut report = Vec::with_capacity(registrations.len());
        for registration in registrations {
            let order = match &registration.order_id {
                Some(order_id) => self.stores.orders.get(order_id).await?,
                None => None,
            };
            report.push((registration, order));
        }
        Ok(report)
    }
}
