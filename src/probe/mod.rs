//! Probing core: scheduling, shared state, workers and their supervisor

mod pool;
mod scheduler;
mod state;
mod supervisor;

pub use pool::{PoolExit, ProbePool};
pub use scheduler::DomainScheduler;
pub use state::{DomainRuntime, Probe, ProbeState};
pub use supervisor::{RunEnd, RunSummary, Supervisor, ValidatorFactory};
