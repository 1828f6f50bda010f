//! Deterministic, pure logic shared by steno.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod config;
pub mod model;
pub mod schema;
pub mod transcript;
