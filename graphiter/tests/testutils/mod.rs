//! Test utilities for graphiter integration tests
//!
//! - TestFixture: a seeded random dataset in a memory store, with brute-force
//!   answers to compare iterator output against
//! - drive helpers: run budgeted operations to completion across turns

#![allow(dead_code)]

pub mod drive;
pub mod test_fixture;

/// Initialise logging once per test binary; `RUST_LOG` controls the level
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
