//! Dependency-ordered workflow execution.
//!
//! A single background loop runs registered task handlers one at a time, in
//! enqueue order, never before a task's dependencies have completed.

pub mod engine;

pub use engine::WorkflowSequencer;
