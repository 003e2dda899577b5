//! Scheduling engine: the bounded orchestrator loop and the per-item runner.

pub mod orchestrator;
pub mod runner;

pub use orchestrator::{Orchestrator, OrchestratorConfig, RunReport, ShutdownHandle};
pub use runner::WorkerRunner;
