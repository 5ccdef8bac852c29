//! Order state machine.
//!
//! Every status change goes through [`StatusReconciler::transition_with`]: read
//! the order, plan the next state as a pure function, then write it with a
//! version-checked swap. A lost swap means another writer (a callback or the
//! expiry sweep) moved the order first, so the plan is recomputed against the
//! fresh state. Side effects on registrations run only after a winning swap,
//! and are idempotent so they can be re-driven safely.

use crate::application::allocator::RegistrationAllocator;
use crate::application::gateway::GatewayAdapter;
use crate::domain::event::{GatewayEvent, GatewayOutcome};
use crate::domain::order::{OrderStatus, PaymentOrder, Transition, TransitionCause};
use crate::domain::ports::{ClockRef, NotifierRef, OrderStoreRef, RegistrationStoreRef, Stores};
use crate::error::{RegistrationError, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// The order changed status.
    Transitioned(Transition),
    /// Gateway fields were refreshed without a status change.
    Refreshed,
    /// Nothing new in the event.
    Unchanged,
}

pub struct StatusReconciler {
    orders: OrderStoreRef,
    registrations: RegistrationStoreRef,
    allocator: Arc<RegistrationAllocator>,
    notifier: NotifierRef,
    clock: ClockRef,
    max_attempts: u32,
}

impl StatusReconciler {
    pub fn new(
        stores: &Stores,
        allocator: Arc<RegistrationAllocator>,
        notifier: NotifierRef,
        clock: ClockRef,
        max_attempts: u32,
    ) -> Self {
        Self {
            orders: stores.orders.clone(),
            registrations: stores.registrations.clone(),
            allocator,
            notifier,
            clock,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Applies a verified gateway event.
    pub async fn apply_event(&self, event: &GatewayEvent) -> Result<ReconcileOutcome> {
        let cause = TransitionCause::GatewayEvent {
            gateway_status: event.gateway_status.clone(),
            gateway_payment_id: event.gateway_payment_id.clone(),
        };
        let result = self
            .transition_with(&event.gateway_order_id, cause, |order, now| {
                plan_event(order, event, now)
            })
            .await;

        match &result {
            Err(e @ RegistrationError::AmountMismatch { .. }) => {
                tracing::error!(order_id = %event.gateway_order_id, error = %e, review = true, "gateway amount mismatch");
            }
            Err(e @ RegistrationError::TerminalStateConflict { .. }) => {
                tracing::warn!(order_id = %event.gateway_order_id, error = %e, "terminal state conflict, original state kept");
            }
            Err(e @ RegistrationError::ReplayOrAnomaly { .. }) => {
                tracing::warn!(order_id = %event.gateway_order_id, error = %e, "gateway event ignored");
            }
            Ok(ReconcileOutcome::Unchanged) => {
                tracing::debug!(order_id = %event.gateway_order_id, status = %event.gateway_status, "duplicate gateway event");
                // Re-drive idempotent effects in case an earlier delivery stopped halfway.
                if let Some(order) = self.orders.get(&event.gateway_order_id).await? {
                    self.settle_registrations(&order).await?;
                }
            }
            _ => {}
        }
        result
    }

    /// Moves an unresolved order past its expiry to `expired`.
    pub async fn expire(&self, order_id: &str) -> Result<Option<Transition>> {
        let outcome = self
            .transition_with(order_id, TransitionCause::ExpirySweep, |order, now| {
                if order.status.is_terminal() || now <= order.expires_at {
                    return Ok(None);
                }
                Ok(Some(advance(order, OrderStatus::Expired)))
            })
            .await?;
        Ok(match outcome {
            ReconcileOutcome::Transitioned(t) => Some(t),
            _ => None,
        })
    }

    /// Cancels an order that the gateway has not acknowledged yet.
    pub async fn cancel(&self, order_id: &str, cause: TransitionCause) -> Result<Option<Transition>> {
        let outcome = self
            .transition_with(order_id, cause, |order, _| match order.status {
                OrderStatus::Pending => Ok(Some(advance(order, OrderStatus::Cancelled))),
                OrderStatus::Cancelled => Ok(None),
                from => Err(RegistrationError::InvalidTransition {
                    order_id: order.order_id.clone(),
                    from,
                    to: OrderStatus::Cancelled,
                }),
            })
            .await?;
        Ok(match outcome {
            ReconcileOutcome::Transitioned(t) => Some(t),
            _ => None,
        })
    }

    /// Re-runs registration settlement for a terminal order. Returns `false`
    /// when the order is still open and there is nothing to settle.
    pub async fn repair(&self, order_id: &str) -> Result<bool> {
        let order = self
            .orders
            .get(order_id)
            .await?
            .ok_or_else(|| RegistrationError::NotFound(format!("order {order_id}")))?;
        if !order.status.is_terminal() {
            return Ok(false);
        }
        tracing::warn!(order_id, status = %order.status, "re-settling registrations of resolved order");
        self.settle_registrations(&order).await?;
        Ok(true)
    }

    async fn transition_with<F>(
        &self,
        order_id: &str,
        cause: TransitionCause,
        plan: F,
    ) -> Result<ReconcileOutcome>
    where
        F: Fn(&PaymentOrder, DateTime<Utc>) -> Result<Option<PaymentOrder>> + Send + Sync,
    {
        for attempt in 0..self.max_attempts {
            let current = self
                .orders
                .get(order_id)
                .await?
                .ok_or_else(|| RegistrationError::NotFound(format!("order {order_id}")))?;
            let now = self.clock.now();

            let Some(next) = plan(&current, now)? else {
                return Ok(ReconcileOutcome::Unchanged);
            };

            if !self
                .orders
                .compare_and_swap(next.clone(), current.version)
                .await?
            {
                tracing::debug!(order_id, attempt, "order version moved, re-planning");
                continue;
            }

            if next.status == current.status {
                return Ok(ReconcileOutcome::Refreshed);
            }

            let transition = Transition {
                order_id: order_id.to_string(),
                from: current.status,
                to: next.status,
                at: now,
                cause: cause.clone(),
            };
            tracing::info!(
                order_id,
                from = %transition.from,
                to = %transition.to,
                version = next.version,
                "order transitioned"
            );
            self.after_transition(&next, &transition).await?;
            return Ok(ReconcileOutcome::Transitioned(transition));
        }

        Err(RegistrationError::VersionConflict(order_id.to_string()))
    }

    /// The notifier runs even when settlement fails: the status change is
    /// already stored and settlement is re-driven by the sweep.
    async fn after_transition(&self, order: &PaymentOrder, transition: &Transition) -> Result<()> {
        let settled = self.settle_registrations(order).await;

        if transition.to.is_terminal() {
            let notifier = self.notifier.clone();
            let order = order.clone();
            let transition = transition.clone();
            tokio::spawn(async move {
                if let Err(e) = notifier.order_resolved(&order, &transition).await {
                    tracing::warn!(order_id = %order.order_id, error = %e, "notification failed");
                }
            });
        }
        settled
    }

    /// Brings the order's registrations in line with its status.
    async fn settle_registrations(&self, order: &PaymentOrder) -> Result<()> {
        match order.status {
            OrderStatus::Success => {
                for registration in self.registrations.by_order(&order.order_id).await? {
                    self.allocator.confirm(&registration.registration_id).await?;
                }
            }
            OrderStatus::Failed | OrderStatus::Expired | OrderStatus::Cancelled => {
                for registration in self.registrations.by_order(&order.order_id).await? {
                    self.allocator.release(&registration.registration_id).await?;
                }
            }
            OrderStatus::Pending | OrderStatus::Processing => {}
        }
        Ok(())
    }
}

fn advance(order: &PaymentOrder, status: OrderStatus) -> PaymentOrder {
    let mut next = order.clone();
    next.status = status;
    next.version += 1;
    next
}

/// Decides what a gateway event does to an order. `Ok(None)` means no-op.
pub fn plan_event(
    order: &PaymentOrder,
    event: &GatewayEvent,
    now: DateTime<Utc>,
) -> Result<Option<PaymentOrder>> {
    if event.amount != order.amount.value() || event.currency != order.currency.as_str() {
        return Err(RegistrationError::AmountMismatch {
            order_id: order.order_id.clone(),
            expected: order.amount.value(),
            expected_currency: order.currency.to_string(),
            received: event.amount,
            received_currency: event.currency.clone(),
        });
    }

    if order.gateway_status.as_deref() == Some(event.gateway_status.as_str())
        && order.gateway_payment_id == event.gateway_payment_id
    {
        return Ok(None);
    }

    if let Some(last) = order.last_event_timestamp
        && event.timestamp < last
    {
        return Err(RegistrationError::ReplayOrAnomaly {
            order_id: order.order_id.clone(),
            reason: format!("event from {} is older than {}", event.timestamp, last),
        });
    }

    let outcome = GatewayAdapter::translate(&event.gateway_status).ok_or_else(|| {
        RegistrationError::ReplayOrAnomaly {
            order_id: order.order_id.clone(),
            reason: format!("unrecognized gateway status '{}'", event.gateway_status),
        }
    })?;
    let target = outcome.target_status();

    if order.status.is_terminal() {
        if target == order.status {
            return Ok(None);
        }
        if target == OrderStatus::Processing {
            return Err(RegistrationError::ReplayOrAnomaly {
                order_id: order.order_id.clone(),
                reason: format!("intermediate status after {}", order.status),
            });
        }
        return Err(RegistrationError::TerminalStateConflict {
            order_id: order.order_id.clone(),
            current: order.status,
            attempted: target,
        });
    }

    if !order.status.can_transition_to(target) {
        return Err(RegistrationError::InvalidTransition {
            order_id: order.order_id.clone(),
            from: order.status,
            to: target,
        });
    }

    let mut next = advance(order, target);
    next.gateway_status = Some(event.gateway_status.clone());
    next.gateway_payment_id = event.gateway_payment_id.clone();
    next.last_event_timestamp = Some(event.timestamp);
    match outcome {
        GatewayOutcome::Success => next.paid_at = Some(now),
        GatewayOutcome::Failed => {
            next.error_code = event.error_code.clone();
            next.error_description = event.error_description.clone();
        }
        GatewayOutcome::Reversed => {
            next.error_code = event
                .error_code
                .clone()
                .or_else(|| Some(event.gateway_status.clone()));
            next.error_description = event.error_description.clone();
        }
        GatewayOutcome::Processing => {}
    }
    Ok(Some(next))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::domain::money::{Amount, Currency};
    use crate::domain::payload::fixtures::{entry, payload};
    use crate::domain::ports::Notifier;
    use crate::domain::program::Program;
    use crate::domain::registration::{Registration, RegistrationStatus};
    use crate::infrastructure::clock::ManualClock;
    use crate::infrastructure::in_memory::in_memory_stores;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc;

    /// Forwards every notification to a channel.
    struct RecordingNotifier(mpsc::UnboundedSender<Transition>);

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn order_resolved(&self, _order: &PaymentOrder, transition: &Transition) -> Result<()> {
            let _ = self.0.send(transition.clone());
            Ok(())
        }
    }

    /// Records the call, then fails it.
    struct FailingNotifier(mpsc::UnboundedSender<Transition>);

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn order_resolved(&self, _order: &PaymentOrder, transition: &Transition) -> Result<()> {
            let _ = self.0.send(transition.clone());
            Err(RegistrationError::StorageError("mailer down".to_string()))
        }
    }

    /// Order `o1` holding one reserved `r1` slot.
    async fn reconciler(notifier: NotifierRef) -> (StatusReconciler, Stores) {
        let stores = in_memory_stores();
        let config = EngineConfig::with_secret("secret");
        stores
            .capacities
            .define("c1", Program::IndividualWomen, 5)
            .await
            .unwrap();
        let allocator = Arc::new(RegistrationAllocator::new(&stores, &config));
        allocator.reserve("c1", Program::IndividualWomen, 1).await.unwrap();
        stores.orders.insert(order()).await.unwrap();
        stores
            .registrations
            .insert(Registration::from_entry(
                "c1",
                Some("o1"),
                &entry("r1", Program::IndividualWomen),
            ))
            .await
            .unwrap();
        let clock = Arc::new(ManualClock::new(t0() + Duration::minutes(10)));
        let reconciler = StatusReconciler::new(
            &stores,
            allocator,
            notifier,
            clock,
            config.reconcile_max_attempts,
        );
        (reconciler, stores)
    }

    async fn next_notification(rx: &mut mpsc::UnboundedReceiver<Transition>) -> Transition {
        tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    async fn assert_no_notification(rx: &mut mpsc::UnboundedReceiver<Transition>) {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 10, 0, 0).unwrap()
    }

    fn order() -> PaymentOrder {
        PaymentOrder {
            order_id: "o1".to_string(),
            competition_id: "c1".to_string(),
            customer_email: "anna@example.org".to_string(),
            amount: Amount::new(dec!(500)).unwrap(),
            currency: Currency::new("EUR").unwrap(),
            description: "entry".to_string(),
            registration_payload: payload(vec![entry("r1", Program::IndividualWomen)]),
            created_at: t0(),
            expires_at: t0() + Duration::minutes(30),
            status: OrderStatus::Pending,
            gateway_status: None,
            gateway_payment_id: None,
            error_code: None,
            error_description: None,
            paid_at: None,
            last_event_timestamp: None,
            version: 0,
        }
    }

    fn event(status: &str, minutes: i64) -> GatewayEvent {
        GatewayEvent {
            gateway_order_id: "o1".to_string(),
            gateway_status: status.to_string(),
            gateway_payment_id: Some("pay-1".to_string()),
            error_code: None,
            error_description: None,
            amount: dec!(500),
            currency: "EUR".to_string(),
            timestamp: t0() + Duration::minutes(minutes),
        }
    }

    #[test]
    fn test_success_sets_paid_at() {
        let now = t0() + Duration::minutes(3);
        let next = plan_event(&order(), &event("success", 2), now).unwrap().unwrap();
        assert_eq!(next.status, OrderStatus::Success);
        assert_eq!(next.paid_at, Some(now));
        assert_eq!(next.version, 1);
        assert_eq!(next.last_event_timestamp, Some(t0() + Duration::minutes(2)));
    }

    #[test]
    fn test_failure_records_error() {
        let mut failure = event("declined", 2);
        failure.error_code = Some("limit".to_string());
        failure.error_description = Some("card limit exceeded".to_string());
        let next = plan_event(&order(), &failure, t0()).unwrap().unwrap();
        assert_eq!(next.status, OrderStatus::Failed);
        assert_eq!(next.error_code.as_deref(), Some("limit"));
        assert!(next.paid_at.is_none());
    }

    #[test]
    fn test_amount_and_currency_must_match() {
        let mut short = event("success", 2);
        short.amount = dec!(499);
        assert!(matches!(
            plan_event(&order(), &short, t0()),
            Err(RegistrationError::AmountMismatch { .. })
        ));

        let mut other_currency = event("success", 2);
        other_currency.currency = "USD".to_string();
        assert!(matches!(
            plan_event(&order(), &other_currency, t0()),
            Err(RegistrationError::AmountMismatch { .. })
        ));
    }

    #[test]
    fn test_duplicate_is_noop() {
        let applied = plan_event(&order(), &event("success", 2), t0()).unwrap().unwrap();
        assert!(plan_event(&applied, &event("success", 2), t0()).unwrap().is_none());
    }

    #[test]
    fn test_older_event_is_ignored() {
        let processing = plan_event(&order(), &event("processing", 5), t0()).unwrap().unwrap();
        let mut stale = event("failure", 4);
        stale.gateway_payment_id = Some("pay-2".to_string());
        assert!(matches!(
            plan_event(&processing, &stale, t0()),
            Err(RegistrationError::ReplayOrAnomaly { .. })
        ));
    }

    #[test]
    fn test_terminal_conflict_keeps_first_decision() {
        let success = plan_event(&order(), &event("success", 2), t0()).unwrap().unwrap();
        let err = plan_event(&success, &event("failure", 3), t0()).unwrap_err();
        assert!(matches!(
            err,
            RegistrationError::TerminalStateConflict {
                current: OrderStatus::Success,
                attempted: OrderStatus::Failed,
                ..
            }
        ));
        assert!(matches!(
            plan_event(&success, &event("processing", 4), t0()),
            Err(RegistrationError::ReplayOrAnomaly { .. })
        ));
    }

    #[test]
    fn test_reversal_before_resolution_fails_order() {
        let next = plan_event(&order(), &event("reversed", 2), t0()).unwrap().unwrap();
        assert_eq!(next.status, OrderStatus::Failed);
        assert_eq!(next.error_code.as_deref(), Some("reversed"));
    }

    #[test]
    fn test_unknown_status_is_anomaly() {
        assert!(matches!(
            plan_event(&order(), &event("teleported", 2), t0()),
            Err(RegistrationError::ReplayOrAnomaly { .. })
        ));
    }

    #[tokio::test]
    async fn test_notifier_called_once_per_terminal_transition() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (reconciler, _stores) = reconciler(Arc::new(RecordingNotifier(tx))).await;

        reconciler.apply_event(&event("processing", 1)).await.unwrap();
        assert_no_notification(&mut rx).await;

        reconciler.apply_event(&event("success", 2)).await.unwrap();
        let notified = next_notification(&mut rx).await;
        assert_eq!(notified.from, OrderStatus::Processing);
        assert_eq!(notified.to, OrderStatus::Success);

        let outcome = reconciler.apply_event(&event("success", 2)).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Unchanged);
        assert!(reconciler.cancel("o1", TransitionCause::CustomerCancel).await.is_err());
        assert_no_notification(&mut rx).await;
    }

    #[tokio::test]
    async fn test_failing_notifier_keeps_transition() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (reconciler, stores) = reconciler(Arc::new(FailingNotifier(tx))).await;

        let outcome = reconciler.apply_event(&event("declined", 2)).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Transitioned(_)));
        assert_eq!(next_notification(&mut rx).await.to, OrderStatus::Failed);

        let stored = stores.orders.get("o1").await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Failed);
        assert_eq!(stored.version, 1);
        let registration = stores.registrations.get("r1").await.unwrap().unwrap();
        assert_eq!(registration.status, RegistrationStatus::Cancelled);
        let capacity = stores
            .capacities
            .get("c1", Program::IndividualWomen)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(capacity.current_reserved, 0);
    }

    #[tokio::test]
    async fn test_notifier_runs_when_settlement_fails() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (reconciler, stores) = reconciler(Arc::new(RecordingNotifier(tx))).await;
        // A cancelled registration cannot be confirmed, so settling a success fails.
        stores.registrations.mark_released("r1").await.unwrap();

        assert!(reconciler.apply_event(&event("success", 2)).await.is_err());
        assert_eq!(next_notification(&mut rx).await.to, OrderStatus::Success);
        let stored = stores.orders.get("o1").await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Success);
    }
}
