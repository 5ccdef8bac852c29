use crate::domain::money::Currency;
use crate::domain::program::Program;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMode {
    /// Entries are charged through the gateway.
    Paid,
    /// Entries are confirmed without payment.
    Free,
    /// Not published yet; treated like `Free` so organisers can test the flow.
    Draft,
}

/// Largest per-entry fee accepted from a fee sheet.
pub const MAX_FEE: Decimal = dec!(1000000);

/// Per-entry fee of each program offered by a competition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeeTable(BTreeMap<Program, Decimal>);

impl FeeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fee(mut self, program: Program, fee: Decimal) -> Self {
        self.set(program, fee);
        self
    }

    /// Sets a fee. Negative values and values above [`MAX_FEE`] are stored as
    /// zero with a warning.
    pub fn set(&mut self, program: Program, fee: Decimal) {
        if fee < Decimal::ZERO {
            tracing::warn!(%program, %fee, "negative fee in fee table, using 0");
            self.0.insert(program, Decimal::ZERO);
        } else if fee > MAX_FEE {
            tracing::warn!(%program, %fee, max = %MAX_FEE, "fee above ceiling in fee table, using 0");
            self.0.insert(program, Decimal::ZERO);
        } else {
            self.0.insert(program, fee);
        }
    }

    /// Parses an untyped fee cell. Anything that is not a number counts as zero.
    pub fn set_raw(&mut self, program: Program, raw: &str) {
        let raw = raw.trim();
        match Decimal::from_str(raw) {
            Ok(fee) => self.set(program, fee),
            Err(_) => {
                tracing::warn!(%program, raw, "non-numeric fee in fee table, using 0");
                self.0.insert(program, Decimal::ZERO);
            }
        }
    }

    pub fn get(&self, program: Program) -> Option<Decimal> {
        self.0.get(&program).copied()
    }
}

/// Registration settings of one competition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Competition {
    pub competition_id: String,
    pub name: String,
    pub payment_mode: PaymentMode,
    pub currency: Currency,
    #[serde(default)]
    pub waitlist_enabled: bool,
    #[serde(default)]
    pub registration_opens_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub registration_closes_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fee_table: FeeTable,
}

impl Competition {
    pub fn requires_payment(&self) -> bool {
        self.payment_mode == PaymentMode::Paid
    }

    pub fn is_registration_open(&self, now: DateTime<Utc>) -> bool {
        let opened = self.registration_opens_at.is_none_or(|opens| now >= opens);
        let not_closed = self.registration_closes_at.is_none_or(|closes| now < closes);
        opened && not_closed
    }
}
