//! Deterministic, pure logic behind the dispatch engine.
//!
//! Core modules perform no I/O and never touch the state source or scheduler.
//! They operate on in-memory descriptors and return deterministic outputs
//! suitable for tests.

pub mod change;
pub mod invariants;
pub mod queue;
pub mod resolver;
pub mod types;
pub mod validity;
