//! Domain types and the ports the engine talks to its collaborators through.

pub mod capacity;
pub mod competition;
pub mod event;
pub mod money;
pub mod order;
pub mod payload;
pub mod ports;
pub mod program;
pub mod registration;
