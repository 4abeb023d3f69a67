//! BetterBot Runner Library
//!
//! Exposes the run orchestrator for the `oneclick_run`, `health_gate` and
//! `cleanup_logs` binaries and for tests.

pub mod runner;

// Re-export the common entry points at crate root
pub use runner::{Orchestrator, RunRequest, RunnerConfig};
