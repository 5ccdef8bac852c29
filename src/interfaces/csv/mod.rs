pub mod program_reader;
pub mod registration_writer;
