use crate::application::engine::{CallbackAck, RegistrationEngine, SubmissionOutcome};
use crate::application::gateway::{CallbackBody, GatewayAdapter};
use crate::domain::competition::{Competition, PaymentMode};
use crate::domain::money::Currency;
use crate::domain::payload::RegistrationPayload;
use crate::error::{RegistrationError, Result};
use crate::infrastructure::clock::ManualClock;
use crate::interfaces::csv::program_reader::ProgramSchedule;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read};
use std::sync::Arc;

/// One step of a replay script. Every command carries the instant it happens at;
/// the replay clock is moved there before the command runs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum ReplayCommand {
    /// Opens a competition. Fees and caps come from the program table.
    Competition {
        at: DateTime<Utc>,
        competition_id: String,
        name: String,
        payment_mode: PaymentMode,
        currency: String,
        #[serde(default)]
        waitlist_enabled: bool,
        #[serde(default)]
        registration_opens_at: Option<DateTime<Utc>>,
        #[serde(default)]
        registration_closes_at: Option<DateTime<Utc>>,
    },
    Register {
        at: DateTime<Utc>,
        competition_id: String,
        payload: RegistrationPayload,
    },
    /// A gateway callback for the order holding `registration_id`. `amount` and
    /// `currency` default to the order's own; `forged` signs with a wrong key.
    Callback {
        at: DateTime<Utc>,
        registration_id: String,
        status: String,
        #[serde(default)]
        payment_id: Option<String>,
        #[serde(default)]
        amount: Option<Decimal>,
        #[serde(default)]
        currency: Option<String>,
        #[serde(default)]
        forged: bool,
    },
    Cancel {
        at: DateTime<Utc>,
        registration_id: String,
    },
    Sweep {
        at: DateTime<Utc>,
    },
}

impl ReplayCommand {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            ReplayCommand::Competition { at, .. }
            | ReplayCommand::Register { at, .. }
            | ReplayCommand::Callback { at, .. }
            | ReplayCommand::Cancel { at, .. }
            | ReplayCommand::Sweep { at } => *at,
        }
    }
}

/// Reads replay commands, one JSON object per line. Blank lines and lines
/// starting with `#` are skipped.
pub struct ReplayReader<R: Read> {
    reader: BufReader<R>,
}

impl<R: Read> ReplayReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            reader: BufReader::new(source),
        }
    }

    /// Lazily parses commands; each error names its line number.
    pub fn commands(self) -> impl Iterator<Item = Result<ReplayCommand>> {
        self.reader
            .lines()
            .enumerate()
            .filter_map(|(index, line)| match line {
                Err(e) => Some(Err(RegistrationError::from(e))),
                Ok(line) => {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        return None;
                    }
                    Some(serde_json::from_str(line).map_err(|e| {
                        RegistrationError::ValidationError(format!(
                            "line {}: {e}",
                            index + 1
                        ))
                    }))
                }
            })
    }
}

/// Drives an engine through replay commands, playing the gateway's part for
/// callbacks.
pub struct Replayer {
    engine: Arc<RegistrationEngine>,
    clock: ManualClock,
    schedules: BTreeMap<String, ProgramSchedule>,
}

impl Replayer {
    /// `clock` must be the clock the engine was built with.
    pub fn new(
        engine: Arc<RegistrationEngine>,
        clock: ManualClock,
        schedules: BTreeMap<String, ProgramSchedule>,
    ) -> Self {
        Self {
            engine,
            clock,
            schedules,
        }
    }

    pub fn engine(&self) -> &RegistrationEngine {
        &self.engine
    }

    /// Moves the clock to the command's instant and runs it.
    pub async fn apply(&self, command: ReplayCommand) -> Result<()> {
        self.clock.set(command.at());
        match command {
            ReplayCommand::Competition {
                competition_id,
                name,
                payment_mode,
                currency,
                waitlist_enabled,
                registration_opens_at,
                registration_closes_at,
                ..
            } => {
                let schedule = self.schedules.get(&competition_id).ok_or_else(|| {
                    RegistrationError::ValidationError(format!(
                        "No programs listed for competition {competition_id}"
                    ))
                })?;
                let competition = Competition {
                    competition_id,
                    name,
                    payment_mode,
                    currency: Currency::new(&currency)?,
                    waitlist_enabled,
                    registration_opens_at,
                    registration_closes_at,
                    fee_table: schedule.fees.clone(),
                };
                self.engine
                    .open_competition(competition, &schedule.capacities)
                    .await
            }
            ReplayCommand::Register {
                competition_id,
                payload,
                ..
            } => {
                match self.engine.submit(&competition_id, payload).await? {
                    SubmissionOutcome::AwaitingPayment { order, .. } => {
                        tracing::info!(order_id = %order.order_id, amount = %order.amount, "awaiting payment");
                    }
                    SubmissionOutcome::Confirmed { registrations } => {
                        tracing::info!(entries = registrations.len(), "confirmed without payment");
                    }
                    SubmissionOutcome::Waitlisted { registrations } => {
                        tracing::info!(entries = registrations.len(), "waitlisted");
                    }
                }
                Ok(())
            }
            ReplayCommand::Callback {
                at,
                registration_id,
                status,
                payment_id,
                amount,
                currency,
                forged,
            } => {
                let order_id = self.order_of(&registration_id).await?;
                let order = self
                    .engine
                    .stores()
                    .orders
                    .get(&order_id)
                    .await?
                    .ok_or_else(|| RegistrationError::NotFound(format!("order {order_id}")))?;

                let checkout =
                    GatewayAdapter::decode_checkout(&self.engine.gateway().encode(&order)?.data)?;
                let mut body = CallbackBody::echo(&checkout, &status, payment_id.as_deref(), at);
                if let Some(amount) = amount {
                    body.amount = amount;
                }
                if let Some(currency) = currency {
                    body.currency = currency;
                }
                let signed = if forged {
                    GatewayAdapter::new(b"not-the-shared-secret").encode_callback(&body)?
                } else {
                    self.engine.gateway().encode_callback(&body)?
                };

                if let CallbackAck::Ignored { reason } = self
                    .engine
                    .handle_callback(&signed.data, &signed.signature)
                    .await?
                {
                    tracing::info!(%order_id, reason = %reason, "callback ignored");
                }
                Ok(())
            }
            ReplayCommand::Cancel {
                registration_id, ..
            } => {
                let order_id = self.order_of(&registration_id).await?;
                self.engine.cancel(&order_id).await?;
                Ok(())
            }
            ReplayCommand::Sweep { .. } => {
                self.engine.sweep_expired().await?;
                Ok(())
            }
        }
    }

    async fn order_of(&self, registration_id: &str) -> Result<String> {
        let registration = self
            .engine
            .stores()
            .registrations
            .get(registration_id)
            .await?
            .ok_or_else(|| RegistrationError::NotFound(format!("registration {registration_id}")))?;
        registration.order_id.ok_or_else(|| {
            RegistrationError::ValidationError(format!(
                "Registration {registration_id} has no payment order"
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::program::Program;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reads_every_command_kind() {
        let data = r#"
# setup
{"cmd":"competition","at":"2026-05-01T10:00:00Z","competition_id":"c1","name":"Spring Cup","payment_mode":"paid","currency":"EUR"}
{"cmd":"register","at":"2026-05-01T10:01:00Z","competition_id":"c1","payload":{"contact":{"name":"Anna","email":"anna@example.org"},"entries":[{"registration_id":"r1","program":"IW","category":"SEN","participant_ref":"a1","registration_type":"individual"}]}}
{"cmd":"callback","at":"2026-05-01T10:02:00Z","registration_id":"r1","status":"success","payment_id":"p1","amount":"250"}
{"cmd":"cancel","at":"2026-05-01T10:03:00Z","registration_id":"r1"}
{"cmd":"sweep","at":"2026-05-01T11:00:00Z"}
"#;
        let commands: Vec<ReplayCommand> = ReplayReader::new(data.as_bytes())
            .commands()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(commands.len(), 5);
        let ReplayCommand::Register { payload, .. } = &commands[1] else {
            panic!("expected register");
        };
        assert_eq!(payload.entries[0].program, Program::IndividualWomen);
        assert_eq!(payload.entries[0].slots, 1);
        let ReplayCommand::Callback { amount, forged, .. } = &commands[2] else {
            panic!("expected callback");
        };
        assert_eq!(*amount, Some(dec!(250)));
        assert!(!forged);
        assert!(commands.windows(2).all(|w| w[0].at() <= w[1].at()));
    }

    #[test]
    fn test_bad_line_reports_line_number() {
        let data = "{\"cmd\":\"sweep\",\"at\":\"2026-05-01T11:00:00Z\"}\n{\"cmd\":\"refund\"}";
        let results: Vec<Result<ReplayCommand>> = ReplayReader::new(data.as_bytes()).commands().collect();
        assert!(results[0].is_ok());
        let Err(RegistrationError::ValidationError(msg)) = &results[1] else {
            panic!("expected validation error");
        };
        assert!(msg.starts_with("line 2"));
    }

    mod replayer {
        use super::super::*;
        use crate::config::EngineConfig;
        use crate::domain::order::OrderStatus;
        use crate::domain::program::Program;
        use crate::domain::registration::RegistrationStatus;
        use crate::infrastructure::in_memory::in_memory_stores;
        use crate::infrastructure::notifier::TracingNotifier;
        use crate::interfaces::csv::program_reader::ProgramReader;
        use chrono::TimeZone;

        const SETUP: &str = r#"{"cmd":"competition","at":"2026-05-01T10:00:00Z","competition_id":"c1","name":"Spring Cup","payment_mode":"paid","currency":"EUR"}
{"cmd":"register","at":"2026-05-01T10:01:00Z","competition_id":"c1","payload":{"contact":{"name":"Anna","email":"anna@example.org"},"entries":[{"registration_id":"r1","program":"IW","category":"SEN","participant_ref":"a1","registration_type":"individual"}]}}"#;

        fn replayer() -> Replayer {
            let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
            let engine = RegistrationEngine::new(
                in_memory_stores(),
                EngineConfig::with_secret("secret"),
                Arc::new(clock.clone()),
                Arc::new(TracingNotifier),
            )
            .unwrap();
            let schedules = ProgramReader::new(
                "competition_id,program,fee,max_participants\nc1,IW,250,1".as_bytes(),
            )
            .schedules()
            .unwrap();
            Replayer::new(Arc::new(engine), clock, schedules)
        }

        async fn run(replayer: &Replayer, script: &str) -> Vec<Result<()>> {
            let mut results = Vec::new();
            for command in ReplayReader::new(script.as_bytes()).commands() {
                results.push(replayer.apply(command.unwrap()).await);
            }
            results
        }

        #[tokio::test]
        async fn test_signed_callback_confirms() {
            let replayer = replayer();
            let script = format!(
                "{SETUP}\n{}",
                r#"{"cmd":"callback","at":"2026-05-01T10:05:00Z","registration_id":"r1","status":"success","payment_id":"p1"}"#
            );
            assert!(run(&replayer, &script).await.iter().all(|r| r.is_ok()));

            let report = replayer.engine().registration_report().await.unwrap();
            assert_eq!(report[0].0.status, RegistrationStatus::Confirmed);
            assert_eq!(report[0].1.as_ref().unwrap().status, OrderStatus::Success);
        }

        #[tokio::test]
        async fn test_forged_callback_rejected() {
            let replayer = replayer();
            let script = format!(
                "{SETUP}\n{}",
                r#"{"cmd":"callback","at":"2026-05-01T10:05:00Z","registration_id":"r1","status":"success","forged":true}"#
            );
            let results = run(&replayer, &script).await;
            assert!(matches!(results[2], Err(RegistrationError::SignatureError(_))));

            let capacity = replayer
                .engine()
                .stores()
                .capacities
                .get("c1", Program::IndividualWomen)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(capacity.current_reserved, 1);
        }
    }
}
