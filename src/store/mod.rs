//! Durable state: the dedup ledger and the stats snapshot store

mod ledger;
mod stats;

pub use ledger::DedupLedger;
pub use stats::{ModelRecord, StatsSnapshot, StatsStore, SNAPSHOT_VERSION};
