//! Library integration tests: full orchestrator runs against the in-memory
//! local control plane.

mod cancellation_tests;
mod common;
mod scenario_tests;
mod sweep_tests;
