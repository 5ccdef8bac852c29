use crate::domain::order::OrderStatus;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A decoded, signature-checked gateway callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayEvent {
    /// Same value as the internal `order_id`.
    pub gateway_order_id: String,
    pub gateway_status: String,
    #[serde(default)]
    pub gateway_payment_id: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub timestamp: DateTime<Utc>,
}

/// Internal meaning of a provider status string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayOutcome {
    Processing,
    Success,
    Failed,
    Reversed,
}

impl GatewayOutcome {
    pub fn target_status(&self) -> OrderStatus {
        match self {
            GatewayOutcome::Processing => OrderStatus::Processing,
            GatewayOutcome::Success => OrderStatus::Success,
            GatewayOutcome::Failed | GatewayOutcome::Reversed => OrderStatus::Failed,
        }
    }
}
