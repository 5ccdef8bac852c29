use crate::domain::money::{Amount, Currency};
use crate::domain::payload::RegistrationPayload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Processing,
    Success,
    Failed,
    Expired,
    Cancelled,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Success => "success",
            OrderStatus::Failed => "failed",
            OrderStatus::Expired => "expired",
            OrderStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Success | OrderStatus::Failed | OrderStatus::Expired | OrderStatus::Cancelled
        )
    }

    /// The fixed transition graph. Staying in `Processing` is allowed so a
    /// later acknowledgement can refresh the gateway fields.
    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        match self {
            OrderStatus::Pending => matches!(
                target,
                OrderStatus::Processing
                    | OrderStatus::Success
                    | OrderStatus::Failed
                    | OrderStatus::Expired
                    | OrderStatus::Cancelled
            ),
            OrderStatus::Processing => matches!(
                target,
                OrderStatus::Processing
                    | OrderStatus::Success
                    | OrderStatus::Failed
                    | OrderStatus::Expired
            ),
            OrderStatus::Success
            | OrderStatus::Failed
            | OrderStatus::Expired
            | OrderStatus::Cancelled => false,
        }
    }

    pub fn allows_retry(&self) -> bool {
        matches!(self, OrderStatus::Failed | OrderStatus::Expired)
    }
}

/// One payment attempt for one registration submission.
///
/// Everything except the status block is fixed at creation. The status block is
/// only rewritten by the reconciler, through a version-checked swap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentOrder {
    pub order_id: String,
    pub competition_id: String,
    pub customer_email: String,
    pub amount: Amount,
    pub currency: Currency,
    pub description: String,
    pub registration_payload: RegistrationPayload,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,

    pub status: OrderStatus,
    /// Raw status string last reported by the gateway.
    pub gateway_status: Option<String>,
    pub gateway_payment_id: Option<String>,
    pub error_code: Option<String>,
    pub error_description: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub last_event_timestamp: Option<DateTime<Utc>>,
    pub version: u64,
}

impl PaymentOrder {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == OrderStatus::Expired || (!self.status.is_terminal() && now > self.expires_at)
    }

    pub fn registration_ids(&self) -> impl Iterator<Item = &str> {
        self.registration_payload
            .entries
            .iter()
            .map(|e| e.registration_id.as_str())
    }
}

/// What moved an order between two states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionCause {
    GatewayEvent {
        gateway_status: String,
        gateway_payment_id: Option<String>,
    },
    ExpirySweep,
    CustomerCancel,
    CapacityRefused,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub order_id: String,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub at: DateTime<Utc>,
    pub cause: TransitionCause,
}
