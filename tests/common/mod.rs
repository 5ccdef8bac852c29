#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use regpay::application::engine::{CallbackAck, RegistrationEngine, SubmissionOutcome};
use regpay::application::gateway::{CallbackBody, GatewayAdapter};
use regpay::config::EngineConfig;
use regpay::domain::competition::{Competition, FeeTable, PaymentMode};
use regpay::domain::money::Currency;
use regpay::domain::order::PaymentOrder;
use regpay::domain::payload::{ContactInfo, EntryRequest, RegistrationPayload};
use regpay::domain::program::{Category, Program};
use regpay::domain::registration::RegistrationType;
use regpay::error::Result;
use regpay::infrastructure::clock::ManualClock;
use regpay::infrastructure::in_memory::in_memory_stores;
use regpay::infrastructure::notifier::TracingNotifier;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const SECRET: &str = "shared-secret";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 1, 10, 0, 0).unwrap()
}

pub struct Harness {
    pub engine: Arc<RegistrationEngine>,
    pub clock: ManualClock,
}

/// One competition `c1` with the given fees and caps.
pub async fn harness(
    mode: PaymentMode,
    waitlist_enabled: bool,
    programs: &[(Program, Decimal, u32)],
) -> Harness {
    let clock = ManualClock::new(t0());
    let engine = RegistrationEngine::new(
        in_memory_stores(),
        EngineConfig::with_secret(SECRET),
        Arc::new(clock.clone()),
        Arc::new(TracingNotifier),
    )
    .unwrap();

    let mut fee_table = FeeTable::new();
    let mut capacities = BTreeMap::new();
    for (program, fee, max) in programs {
        fee_table.set(*program, *fee);
        capacities.insert(*program, *max);
    }
    engine
        .open_competition(
            Competition {
                competition_id: "c1".to_string(),
                name: "Spring Cup".to_string(),
                payment_mode: mode,
                currency: Currency::new("EUR").unwrap(),
                waitlist_enabled,
                registration_opens_at: None,
                registration_closes_at: None,
                fee_table,
            },
            &capacities,
        )
        .await
        .unwrap();

    Harness {
        engine: Arc::new(engine),
        clock,
    }
}

pub fn entry(registration_id: &str, program: Program) -> EntryRequest {
    EntryRequest {
        registration_id: registration_id.to_string(),
        program,
        category: Category::Senior,
        participant_ref: format!("athlete-{registration_id}"),
        registration_type: RegistrationType::Individual,
        slots: 1,
    }
}

pub fn payload(entries: Vec<EntryRequest>) -> RegistrationPayload {
    RegistrationPayload {
        contact: ContactInfo {
            name: "Anna Kovacs".to_string(),
            email: "anna@example.org".to_string(),
            phone: None,
            club: None,
        },
        entries,
        notes: None,
    }
}

impl Harness {
    pub async fn submit_paid(&self, entries: Vec<EntryRequest>) -> PaymentOrder {
        match self.engine.submit("c1", payload(entries)).await.unwrap() {
            SubmissionOutcome::AwaitingPayment { order, .. } => order,
            other => panic!("expected checkout, got {other:?}"),
        }
    }

    /// Sends a correctly signed callback for `order` at the current clock time.
    pub async fn callback(
        &self,
        order: &PaymentOrder,
        status: &str,
        payment_id: Option<&str>,
    ) -> Result<CallbackAck> {
        self.callback_with(order, status, payment_id, |_| {}).await
    }

    pub async fn callback_with(
        &self,
        order: &PaymentOrder,
        status: &str,
        payment_id: Option<&str>,
        edit: impl FnOnce(&mut CallbackBody),
    ) -> Result<CallbackAck> {
        let checkout = self.engine.gateway().encode(order)?;
        let checkout = GatewayAdapter::decode_checkout(&checkout.data)?;
        let mut body = CallbackBody::echo(&checkout, status, payment_id, self.now());
        edit(&mut body);
        let signed = self.engine.gateway().encode_callback(&body)?;
        self.engine
            .handle_callback(&signed.data, &signed.signature)
            .await
    }

    pub fn now(&self) -> DateTime<Utc> {
        use regpay::domain::ports::Clock;
        self.clock.now()
    }

    pub async fn reserved(&self, program: Program) -> u32 {
        self.engine
            .stores()
            .capacities
            .get("c1", program)
            .await
            .unwrap()
            .unwrap()
            .current_reserved
    }

    /// Slots held by registrations that still count against the cap.
    pub async fn held(&self, program: Program) -> u32 {
        self.engine
            .stores()
            .registrations
            .get_all()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.program == program && r.holds_capacity())
            .map(|r| r.slots)
            .sum()
    }
}
