//! End-to-end tests of buildchain-lib through its public API.

mod common;
mod determinism_tests;
mod failure_tests;
mod scenario_tests;
