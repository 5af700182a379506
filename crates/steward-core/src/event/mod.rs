//! Event bus for workflow lifecycle notifications.
//!
//! Provides an `EventBus` that distributes `SequencerEvent` messages to all
//! subscribers via a `tokio::sync::broadcast` channel.

pub mod bus;

pub use bus::EventBus;
