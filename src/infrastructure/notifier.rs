use crate::domain::order::{PaymentOrder, Transition};
use crate::domain::ports::Notifier;
use crate::error::Result;
use async_trait::async_trait;

/// Writes terminal transitions to the log. Stands in for the mailer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn order_resolved(&self, order: &PaymentOrder, transition: &Transition) -> Result<()> {
        tracing::info!(
            order_id = %order.order_id,
            customer_email = %order.customer_email,
            from = %transition.from,
            to = %transition.to,
            "order resolved"
        );
        Ok(())
    }
}
