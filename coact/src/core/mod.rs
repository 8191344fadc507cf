//! Deterministic, pure logic shared by the coordinator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod signal;
pub mod state;
pub mod types;
