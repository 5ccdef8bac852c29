use crate::domain::competition::FeeTable;
use crate::domain::program::Program;
use crate::error::{RegistrationError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Read;

/// One line of a program table.
///
/// `fee` stays a raw cell because organisers fill it by hand; it is parsed
/// leniently by [`FeeTable::set_raw`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProgramRow {
    pub competition_id: String,
    pub program: String,
    pub fee: String,
    pub max_participants: u32,
}

/// Fees and caps of one competition as read from the table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgramSchedule {
    pub fees: FeeTable,
    pub capacities: BTreeMap<Program, u32>,
}

/// Reads program rows from a CSV source.
///
/// Whitespace around cells is trimmed.
pub struct ProgramReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> ProgramReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes rows.
    pub fn rows(self) -> impl Iterator<Item = Result<ProgramRow>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(RegistrationError::from))
    }

    /// Groups every row by competition. Unknown program codes are an error;
    /// a repeated `(competition, program)` keeps the last row.
    pub fn schedules(self) -> Result<BTreeMap<String, ProgramSchedule>> {
        let mut schedules: BTreeMap<String, ProgramSchedule> = BTreeMap::new();
        for row in self.rows() {
            let row = row?;
            let program: Program = row.program.parse()?;
            let schedule = schedules.entry(row.competition_id).or_default();
            schedule.fees.set_raw(program, &row.fee);
            schedule.capacities.insert(program, row.max_participants);
        }
        Ok(schedules)
    }
}
