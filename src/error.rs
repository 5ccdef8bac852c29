use crate::domain::order::OrderStatus;
use crate::domain::program::Program;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Callback signature rejected: {0}")]
    SignatureError(String),
    #[error(
        "Capacity exceeded for {program} in competition {competition_id}: requested {requested}, available {available}"
    )]
    CapacityExceeded {
        competition_id: String,
        program: Program,
        requested: u32,
        available: u32,
    },
    #[error(
        "Amount mismatch on order {order_id}: expected {expected} {expected_currency}, received {received} {received_currency}"
    )]
    AmountMismatch {
        order_id: String,
        expected: Decimal,
        expected_currency: String,
        received: Decimal,
        received_currency: String,
    },
    #[error("Ignored gateway event for order {order_id}: {reason}")]
    ReplayOrAnomaly { order_id: String, reason: String },
    #[error("Order {order_id} is already {current}; refusing move to {attempted}")]
    TerminalStateConflict {
        order_id: String,
        current: OrderStatus,
        attempted: OrderStatus,
    },
    #[error("Invalid transition for order {order_id}: {from} -> {to}")]
    InvalidTransition {
        order_id: String,
        from: OrderStatus,
        to: OrderStatus,
    },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Concurrent update conflict on order {0}")]
    VersionConflict(String),
    #[error("Capacity lock contention on {0}")]
    LockContention(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDBError(#[from] rocksdb::Error),
}

impl RegistrationError {
    /// Errors the callback path absorbs: the gateway gets an acknowledgement and
    /// the order keeps its state.
    pub fn is_ignorable_event(&self) -> bool {
        matches!(
            self,
            RegistrationError::ReplayOrAnomaly { .. }
                | RegistrationError::TerminalStateConflict { .. }
        )
    }

    /// Text safe to show an end user. Payment details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            RegistrationError::ValidationError(msg) => msg.clone(),
            RegistrationError::CapacityExceeded { program, .. } => {
                format!("{} is sold out", program.label())
            }
            RegistrationError::NotFound(_) => "Registration not found".to_string(),
            RegistrationError::InvalidTransition { .. } => {
                "This payment can no longer be cancelled".to_string()
            }
            _ => "Payment could not be processed, please contact the organisers".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RegistrationError>;
