//! Shared domain types for Steward.
//!
//! This crate contains the data model shared by the workflow sequencer, the
//! durable retry queue and the tiered memory manager, together with the error
//! taxonomy and configuration types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod memory;
pub mod retry;
pub mod task;
