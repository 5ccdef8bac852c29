//! Wire codec for the payment gateway.
//!
//! Both directions use the same envelope: `data` is base64 of a JSON document
//! and `signature` is hex HMAC-SHA256 of the `data` string under the shared
//! secret.

use crate::domain::event::{GatewayEvent, GatewayOutcome};
use crate::domain::order::PaymentOrder;
use crate::error::{RegistrationError, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const CHECKOUT_API_VERSION: u32 = 3;

/// Signed envelope exchanged with the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPayload {
    pub data: String,
    pub signature: String,
}

/// Outbound checkout document, rendered into the redirect form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub version: u32,
    pub action: String,
    pub order_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    pub customer_email: String,
    /// Milliseconds since the epoch.
    pub expires_at: i64,
}

/// Inbound callback document as the provider sends it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackBody {
    pub order_id: String,
    pub status: String,
    #[serde(default)]
    pub payment_id: Option<String>,
    #[serde(default)]
    pub err_code: Option<String>,
    #[serde(default)]
    pub err_description: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    /// Milliseconds since the epoch.
    pub end_date: i64,
}

impl CallbackBody {
    /// Builds the callback the gateway would send back for a checkout request.
    pub fn echo(
        checkout: &CheckoutRequest,
        status: &str,
        payment_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id: checkout.order_id.clone(),
            status: status.to_string(),
            payment_id: payment_id.map(str::to_string),
            err_code: None,
            err_description: None,
            amount: checkout.amount,
            currency: checkout.currency.clone(),
            end_date: at.timestamp_millis(),
        }
    }
}

/// Translation of provider status strings. Anything not listed is an anomaly.
const STATUS_TABLE: &[(&str, GatewayOutcome)] = &[
    ("success", GatewayOutcome::Success),
    ("sandbox", GatewayOutcome::Success),
    ("paid", GatewayOutcome::Success),
    ("processing", GatewayOutcome::Processing),
    ("prepared", GatewayOutcome::Processing),
    ("wait_accept", GatewayOutcome::Processing),
    ("wait_secure", GatewayOutcome::Processing),
    ("3ds_verify", GatewayOutcome::Processing),
    ("failure", GatewayOutcome::Failed),
    ("error", GatewayOutcome::Failed),
    ("declined", GatewayOutcome::Failed),
    ("reversed", GatewayOutcome::Reversed),
    ("refunded", GatewayOutcome::Reversed),
];

pub struct GatewayAdapter {
    secret: Vec<u8>,
}

impl GatewayAdapter {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| RegistrationError::SignatureError(format!("invalid secret: {e}")))
    }

    /// Hex HMAC-SHA256 of `data`.
    pub fn sign(&self, data: &str) -> Result<String> {
        let mut mac = self.mac()?;
        mac.update(data.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn seal<T: Serialize>(&self, document: &T) -> Result<SignedPayload> {
        let data = STANDARD.encode(serde_json::to_vec(document)?);
        let signature = self.sign(&data)?;
        Ok(SignedPayload { data, signature })
    }

    /// Builds the signed checkout request. Same order, same bytes.
    pub fn encode(&self, order: &PaymentOrder) -> Result<SignedPayload> {
        self.seal(&CheckoutRequest {
            version: CHECKOUT_API_VERSION,
            action: "pay".to_string(),
            order_id: order.order_id.clone(),
            amount: order.amount.value(),
            currency: order.currency.to_string(),
            description: order.description.clone(),
            customer_email: order.customer_email.clone(),
            expires_at: order.expires_at.timestamp_millis(),
        })
    }

    /// Signs a callback document the way the provider does.
    pub fn encode_callback(&self, body: &CallbackBody) -> Result<SignedPayload> {
        self.seal(body)
    }

    /// Constant-time signature check. Any mismatch rejects the callback.
    pub fn verify_callback(&self, raw_payload: &str, signature: &str) -> Result<()> {
        let expected = hex::decode(signature.trim())
            .map_err(|_| RegistrationError::SignatureError("signature is not hex".to_string()))?;
        let mut mac = self.mac()?;
        mac.update(raw_payload.as_bytes());
        mac.verify_slice(&expected)
            .map_err(|_| RegistrationError::SignatureError("signature mismatch".to_string()))
    }

    fn open<T: for<'de> Deserialize<'de>>(raw_payload: &str) -> Result<T> {
        let bytes = STANDARD.decode(raw_payload.trim()).map_err(|e| {
            RegistrationError::ValidationError(format!("payload is not base64: {e}"))
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Reads back an outbound request.
    pub fn decode_checkout(raw_payload: &str) -> Result<CheckoutRequest> {
        Self::open(raw_payload)
    }

    /// Normalizes a callback body. Call only after [`Self::verify_callback`].
    pub fn decode(raw_payload: &str) -> Result<GatewayEvent> {
        let body: CallbackBody = Self::open(raw_payload)?;
        let timestamp = DateTime::from_timestamp_millis(body.end_date).ok_or_else(|| {
            RegistrationError::ValidationError(format!("invalid end_date {}", body.end_date))
        })?;
        Ok(GatewayEvent {
            gateway_order_id: body.order_id,
            gateway_status: body.status,
            gateway_payment_id: body.payment_id,
            error_code: body.err_code,
            error_description: body.err_description,
            amount: body.amount,
            currency: body.currency,
            timestamp,
        })
    }

    pub fn translate(gateway_status: &str) -> Option<GatewayOutcome> {
        let status = gateway_status.trim();
        STATUS_TABLE
            .iter()
            .find(|(code, _)| code.eq_ignore_ascii_case(status))
            .map(|(_, outcome)| *outcome)
    }
}
