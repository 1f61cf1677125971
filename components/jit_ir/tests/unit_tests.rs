//! Integration test runner for unit tests
//! This file makes cargo test discover the unit test modules

#[path = "unit/test_unit.rs"]
mod test_unit;

#[path = "unit/test_verifier.rs"]
mod test_verifier;
