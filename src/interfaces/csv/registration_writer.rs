use crate::domain::order::PaymentOrder;
use crate::domain::registration::Registration;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Serialize)]
struct ReportRow<'a> {
    registration_id: &'a str,
    order_id: &'a str,
    program: &'a str,
    registration_status: String,
    order_status: String,
    amount: String,
}

/// Writes the final registration table as CSV.
pub struct RegistrationWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> RegistrationWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// Writes one row per registration. Free entries leave the order columns empty.
    pub fn write_report(&mut self, report: &[(Registration, Option<PaymentOrder>)]) -> Result<()> {
        for (registration, order) in report {
            self.writer.serialize(ReportRow {
                registration_id: &registration.registration_id,
                order_id: registration.order_id.as_deref().unwrap_or_default(),
                program: registration.program.code(),
                registration_status: registration.status.to_string(),
                order_status: order.as_ref().map(|o| o.status.to_string()).unwrap_or_default(),
                amount: order.as_ref().map(|o| o.amount.to_string()).unwrap_or_default(),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
