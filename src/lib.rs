//! linkprobe - adaptive discovery of live short identifiers
//!
//! Probes short-link and media-hosting services with model-guided candidate
//! codes, learns which domains and which per-position symbols tend to hit,
//! and never probes the same identifier twice across restarts.

pub mod config;
pub mod error;
pub mod model;
pub mod notify;
pub mod probe;
pub mod store;
pub mod types;
pub mod validator;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{ProbeError, Result};
pub use types::{
    DomainConfig, DomainId, Discovery, HitPayload, MetricsSnapshot, PoolMetrics, ProbeFault,
    ProbeOutcome,
};

// Re-export main functionality
pub use probe::{ProbePool, ProbeState, Supervisor};
pub use validator::{Validator, ValidatorRegistry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the library
pub fn init() -> Result<()> {
    // Load .env file if it exists
    dotenv::dotenv().ok();
    Ok(())
}
