//! Business logic and port definitions for Steward.
//!
//! This crate holds the workflow sequencer, the durable retry queue and the
//! tiered memory manager, plus the traits ("ports") the infrastructure layer
//! implements. It depends only on `steward-types` -- never on
//! `steward-infra` or any database/IO crate.

pub mod collaborator;
pub mod event;
pub mod handler;
pub mod memory;
pub mod pipeline;
pub mod retry;
pub mod sequencer;

#[cfg(test)]
pub(crate) mod testing;
