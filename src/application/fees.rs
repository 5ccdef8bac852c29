use crate::domain::competition::FeeTable;
use crate::domain::program::Program;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::BTreeMap;

/// Decimal places the legacy average is rounded to.
pub const LEGACY_AVERAGE_SCALE: u32 = 2;

/// Computes the fee of a registration submission.
///
/// Pure: the result depends only on the fee table and the selection. A program
/// without a fee contributes nothing and is reported as a data-quality warning.
/// A total that does not fit in a `Decimal` is also a data-quality problem: it
/// is reported and priced at zero, which a paid competition refuses to charge.
pub struct FeeCalculator;

impl FeeCalculator {
    /// `Σ fee[program] × count` over the selection.
    ///
    /// An empty selection falls back to [`FeeCalculator::legacy_average`].
    pub fn total(fees: &FeeTable, selection: &BTreeMap<Program, u32>) -> Decimal {
        if selection.is_empty() {
            return Self::legacy_average(fees);
        }

        let total = selection.iter().try_fold(Decimal::ZERO, |sum, (program, count)| {
            let line = match fees.get(*program) {
                Some(fee) => fee.checked_mul(Decimal::from(*count))?,
                None => {
                    tracing::warn!(%program, "program missing from fee table, charging 0");
                    Decimal::ZERO
                }
            };
            sum.checked_add(line)
        });
        total.unwrap_or_else(|| {
            tracing::warn!(programs = selection.len(), "fee total overflows, charging 0");
            Decimal::ZERO
        })
    }

    /// Mean of the six fixed program slots, missing slots counting as zero,
    /// rounded half away from zero.
    pub fn legacy_average(fees: &FeeTable) -> Decimal {
        let slots = Program::LEGACY_FEE_SLOTS;
        let sum = slots.iter().try_fold(Decimal::ZERO, |sum, program| {
            sum.checked_add(fees.get(*program).unwrap_or(Decimal::ZERO))
        });
        let Some(sum) = sum else {
            tracing::warn!("legacy fee slots overflow, charging 0");
            return Decimal::ZERO;
        };
        (sum / Decimal::from(slots.len()))
            .round_dp_with_strategy(LEGACY_AVERAGE_SCALE, RoundingStrategy::MidpointAwayFromZero)
    }
}
