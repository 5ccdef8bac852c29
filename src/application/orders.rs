use crate::domain::competition::Competition;
use crate::domain::money::Amount;
use crate::domain::order::{OrderStatus, PaymentOrder};
use crate::domain::payload::RegistrationPayload;
use crate::domain::ports::{ClockRef, OrderStoreRef, RegistrationStoreRef, Stores};
use crate::domain::registration::Registration;
use crate::error::{RegistrationError, Result};
use chrono::Duration;
use rust_decimal::Decimal;
use uuid::Uuid;

/// How a caller refers to an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderLookup {
    Order(String),
    Registration(String),
}

/// Read-only view of an order and the registrations it pays for.
///
/// `order` is `None` for registrations of free competitions.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderSnapshot {
    pub order: Option<PaymentOrder>,
    pub registrations: Vec<Registration>,
}

/// Creates orders and answers lookups. Never changes an existing order.
pub struct OrderManager {
    orders: OrderStoreRef,
    registrations: RegistrationStoreRef,
    clock: ClockRef,
    ttl: Duration,
}

impl OrderManager {
    pub fn new(stores: &Stores, clock: ClockRef, ttl: Duration) -> Self {
        Self {
            orders: stores.orders.clone(),
            registrations: stores.registrations.clone(),
            clock,
            ttl,
        }
    }

    /// Opens a pending order for a submission.
    ///
    /// Returns `Ok(None)` when the competition takes no payment; the caller
    /// confirms the registrations directly.
    pub async fn create(
        &self,
        competition: &Competition,
        registration_payload: RegistrationPayload,
        computed_amount: Decimal,
        customer_email: &str,
    ) -> Result<Option<PaymentOrder>> {
        registration_payload.validate()?;

        if !competition.requires_payment() {
            tracing::info!(
                competition_id = %competition.competition_id,
                mode = ?competition.payment_mode,
                "payment bypassed"
            );
            return Ok(None);
        }

        let amount = Amount::new(computed_amount).map_err(|_| {
            RegistrationError::ValidationError(format!(
                "Competition {} requires payment but the computed fee is {}",
                competition.competition_id, computed_amount
            ))
        })?;

        let created_at = self.clock.now();
        let expires_at = created_at.checked_add_signed(self.ttl).ok_or_else(|| {
            RegistrationError::ValidationError(format!("order TTL {} is out of range", self.ttl))
        })?;
        let order = PaymentOrder {
            order_id: Uuid::new_v4().to_string(),
            competition_id: competition.competition_id.clone(),
            customer_email: customer_email.trim().to_string(),
            amount,
            currency: competition.currency.clone(),
            description: format!(
                "{} entry fee, {} entries",
                competition.name,
                registration_payload.entries.len()
            ),
            registration_payload,
            created_at,
            expires_at,
            status: OrderStatus::Pending,
            gateway_status: None,
            gateway_payment_id: None,
            error_code: None,
            error_description: None,
            paid_at: None,
            last_event_timestamp: None,
            version: 0,
        };

        self.orders.insert(order.clone()).await?;
        tracing::info!(
            order_id = %order.order_id,
            competition_id = %order.competition_id,
            amount = %order.amount,
            currency = %order.currency,
            expires_at = %order.expires_at,
            "order created"
        );
        Ok(Some(order))
    }

    async fn by_order_id(&self, order_id: &str) -> Result<OrderSnapshot> {
        let order = self
            .orders
            .get(order_id)
            .await?
            .ok_or_else(|| RegistrationError::NotFound(format!("order {order_id}")))?;
        let registrations = self.registrations.by_order(order_id).await?;
        Ok(OrderSnapshot {
            order: Some(order),
            registrations,
        })
    }

    pub async fn get(&self, lookup: &OrderLookup) -> Result<OrderSnapshot> {
        match lookup {
            OrderLookup::Order(order_id) => self.by_order_id(order_id).await,
            OrderLookup::Registration(registration_id) => {
                let registration = self.registrations.get(registration_id).await?.ok_or_else(
                    || RegistrationError::NotFound(format!("registration {registration_id}")),
                )?;
                match registration.order_id.as_deref() {
                    Some(order_id) => self.by_order_id(order_id).await,
                    None => Ok(OrderSnapshot {
                        order: None,
                        registrations: vec![registration],
                    }),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::competition::{FeeTable, PaymentMode};
    use crate::domain::money::Currency;
    use crate::domain::payload::fixtures::{entry, payload};
    use crate::domain::program::Program;
    use crate::infrastructure::clock::ManualClock;
    use crate::infrastructure::in_memory::in_memory_stores;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn competition(mode: PaymentMode) -> Competition {
        Competition {
            competition_id: "c1".to_string(),
            name: "Spring Cup".to_string(),
            payment_mode: mode,
            currency: Currency::new("EUR").unwrap(),
            waitlist_enabled: false,
            registration_opens_at: None,
            registration_closes_at: None,
            fee_table: FeeTable::new(),
        }
    }

    fn manager() -> (OrderManager, Stores) {
        let stores = in_memory_stores();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 5, 1, 10, 0, 0).unwrap(),
        ));
        (
            OrderManager::new(&stores, clock, Duration::minutes(30)),
            stores,
        )
    }

    #[tokio::test]
    async fn test_create_sets_pending_and_expiry() {
        let (manager, _) = manager();
        let order = manager
            .create(
                &competition(PaymentMode::Paid),
                payload(vec![entry("r1", Program::IndividualWomen)]),
                dec!(250),
                " anna@example.org ",
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.expires_at - order.created_at, Duration::minutes(30));
        assert_eq!(order.customer_email, "anna@example.org");
        assert!(Uuid::parse_str(&order.order_id).is_ok());
        assert!(order.paid_at.is_none());

        let snapshot = manager
            .get(&OrderLookup::Order(order.order_id.clone()))
            .await
            .unwrap();
        assert_eq!(snapshot.order, Some(order));
    }

    #[tokio::test]
    async fn test_order_ids_are_unique() {
        let (manager, _) = manager();
        let mut ids = std::collections::HashSet::new();
        for i in 0..20 {
            let order = manager
                .create(
                    &competition(PaymentMode::Paid),
                    payload(vec![entry(&format!("r{i}"), Program::IndividualMen)]),
                    dec!(100),
                    "anna@example.org",
                )
                .await
                .unwrap()
                .unwrap();
            assert!(ids.insert(order.order_id));
        }
    }

    #[tokio::test]
    async fn test_out_of_range_ttl_is_an_error() {
        let stores = in_memory_stores();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 5, 1, 10, 0, 0).unwrap(),
        ));
        let manager = OrderManager::new(&stores, clock, Duration::minutes(99_999_999_999));
        let err = manager
            .create(
                &competition(PaymentMode::Paid),
                payload(vec![entry("r1", Program::IndividualWomen)]),
                dec!(250),
                "anna@example.org",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::ValidationError(_)));
        assert!(stores.orders.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_amount_refused_for_paid_competition() {
        let (manager, stores) = manager();
        let err = manager
            .create(
                &competition(PaymentMode::Paid),
                payload(vec![entry("r1", Program::IndividualWomen)]),
                dec!(0),
                "anna@example.org",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::ValidationError(_)));
        assert!(stores.orders.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_free_and_draft_bypass_payment() {
        let (manager, stores) = manager();
        for mode in [PaymentMode::Free, PaymentMode::Draft] {
            let created = manager
                .create(
                    &competition(mode),
                    payload(vec![entry("r1", Program::IndividualWomen)]),
                    dec!(0),
                    "anna@example.org",
                )
                .await
                .unwrap();
            assert!(created.is_none());
        }
        assert!(stores.orders.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_unknown() {
        let (manager, _) = manager();
        assert!(matches!(
            manager.get(&OrderLookup::Registration("nope".to_string())).await,
            Err(RegistrationError::NotFound(_))
        ));
    }
}
