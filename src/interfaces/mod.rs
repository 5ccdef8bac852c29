//! Boundary adapters: CSV tables and the JSON-lines replay format.

pub mod csv;
pub mod replay;
