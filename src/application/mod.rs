//! Application layer: the registration flow on top of the domain ports.
//!
//! `RegistrationEngine` is the entry point. It prices a submission, opens the
//! order, claims capacity and later reconciles gateway callbacks and expiries
//! against the same records.

pub mod allocator;
pub mod engine;
pub mod fees;
pub mod gateway;
pub mod orders;
pub mod reconciler;
pub mod sweeper;
