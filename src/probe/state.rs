//! Shared probing state with an explicit lifecycle
//!
//! Built from persisted snapshots at startup, shared by every worker through
//! an `Arc`, and flushed when the pool stops.

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use super::scheduler::DomainScheduler;
use crate::config::{AppConfig, StorageConfig, WeightConfig};
use crate::error::{ProbeError, Result};
use crate::internal_error;
use crate::model::{alphabet, Candidate, CodeGenerator, IdentifierModel};
use crate::store::{DedupLedger, StatsSnapshot, StatsStore};
use crate::types::{DomainConfig, DomainId, ProbeOutcome};

/// A configured domain with its resolved alphabet
#[derive(Debug, Clone)]
pub struct DomainRuntime {
    pub config: DomainConfig,
    pub alphabet: Vec<String>,
    pub lengths: Vec<usize>,
}

impl DomainRuntime {
    pub fn new(config: DomainConfig) -> Self {
        let alphabet = alphabet::resolve(&config);
        let lengths = config.lengths();
        Self {
            config,
            alphabet,
            lengths,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }
}

/// A generated candidate and its full identifier
#[derive(Debug, Clone)]
pub struct Probe {
    pub domain: DomainId,
    pub candidate: Candidate,
    pub url: String,
}

pub struct ProbeState {
    domains: Vec<DomainRuntime>,
    ledger: DedupLedger,
    model: RwLock<IdentifierModel>,
    scheduler: DomainScheduler,
    stats: StatsStore,
    checkpoint_lock: Mutex<()>,
    total_probes: AtomicU64,
    total_hits: AtomicU64,
}

impl ProbeState {
    /// Open state for a full application config
    pub fn open(config: &AppConfig) -> Result<Self> {
        Self::open_with(config.domains.clone(), config.weights, &config.storage)
    }

    /// Replay the ledger and load the stats snapshot. Nothing may claim
    /// identifiers before this returns.
    pub fn open_with(
        domains: Vec<DomainConfig>,
        weights: WeightConfig,
        storage: &StorageConfig,
    ) -> Result<Self> {
        if domains.is_empty() {
            return Err(ProbeError::config("No domains to probe"));
        }

        let ledger = DedupLedger::open(&storage.ledger_path())?;
        let stats = StatsStore::new(storage.stats_path());
        let snapshot = stats.load_or_init()?;

        let scheduler = DomainScheduler::new(&domains, weights);
        scheduler.restore(&snapshot.weights);

        let domains: Vec<DomainRuntime> = domains.into_iter().map(DomainRuntime::new).collect();
        let mut model = snapshot.to_model();
        retain_configured(&mut model, &domains);

        tracing::info!(
            domains = domains.len(),
            model_tables = model.len(),
            claimed = ledger.len(),
            lifetime_probes = snapshot.total_probes,
            lifetime_hits = snapshot.total_hits,
            "Probe state loaded"
        );

        Ok(Self {
            domains,
            ledger,
            model: RwLock::new(model),
            scheduler,
            stats,
            checkpoint_lock: Mutex::new(()),
            total_probes: AtomicU64::new(snapshot.total_probes),
            total_hits: AtomicU64::new(snapshot.total_hits),
        })
    }

    pub fn domains(&self) -> &[DomainRuntime] {
        &self.domains
    }

    pub fn domain(&self, id: DomainId) -> Option<&DomainRuntime> {
        self.domains.get(id.0)
    }

    pub fn ledger(&self) -> &DedupLedger {
        &self.ledger
    }

    pub fn scheduler(&self) -> &DomainScheduler {
        &self.scheduler
    }

    pub fn model(&self) -> RwLockReadGuard<'_, IdentifierModel> {
        self.model.read()
    }

    pub fn total_probes(&self) -> u64 {
        self.total_probes.load(Ordering::Relaxed)
    }

    pub fn total_hits(&self) -> u64 {
        self.total_hits.load(Ordering::Relaxed)
    }

    pub fn choose_domain<R: Rng + ?Sized>(&self, rng: &mut R) -> DomainId {
        self.scheduler.choose_domain(rng)
    }

    /// Generate a candidate for a domain: pick a length and an extension,
    /// then sample the code from the model
    pub fn generate<R: Rng + ?Sized>(&self, id: DomainId, rng: &mut R) -> Result<Probe> {
        let domain = self
            .domain(id)
            .ok_or_else(|| internal_error!("Unknown domain {}", id))?;

        let length = *domain
            .lengths
            .choose(rng)
            .ok_or_else(|| internal_error!("{} has no code length", domain.name()))?;

        let candidate = {
            let model = self.model.read();
            CodeGenerator::new(&model).generate(domain.name(), length, &domain.alphabet, rng)?
        };

        let extension = domain.config.extensions.choose(rng).map(String::as_str);
        let url = domain.config.full_url(&candidate.code, extension);

        Ok(Probe {
            domain: id,
            candidate,
            url,
        })
    }

    /// Claim an identifier in the dedup ledger
    pub fn claim(&self, url: &str) -> Result<bool> {
        self.ledger.try_claim(url)
    }

    /// Feed a probe outcome back into the model and scheduler
    pub fn record_outcome(&self, probe: &Probe, outcome: &ProbeOutcome) -> f64 {
        let hit = outcome.is_hit();
        self.total_probes.fetch_add(1, Ordering::Relaxed);

        if hit {
            self.total_hits.fetch_add(1, Ordering::Relaxed);
            if let Some(domain) = self.domain(probe.domain) {
                self.model.write().record(domain.name(), &probe.candidate.symbols);
            }
        }

        self.scheduler.record_outcome(probe.domain, hit)
    }

    /// Snapshot the model and weights, reload them from the snapshot, and
    /// write it to disk.
    ///
    /// The snapshot and the reload are one exchange under the model and
    /// weight write locks, so no outcome recorded concurrently is lost. Only
    /// the in-memory encode and decode run there; workers stall for that
    /// long and never for the fsync. The checkpoint lock keeps writes in
    /// snapshot order.
    pub fn checkpoint(&self) -> Result<()> {
        let _checkpoint = self.checkpoint_lock.lock();

        let mut encoded = None;
        {
            let mut model = self.model.write();
            self.scheduler.checkpoint_with(|weights| {
                let mut snapshot = StatsSnapshot::capture(&model, weights);
                snapshot.total_probes = self.total_probes.load(Ordering::Relaxed);
                snapshot.total_hits = self.total_hits.load(Ordering::Relaxed);

                let bytes = StatsStore::encode(&snapshot)?;
                let reloaded = StatsStore::decode(&bytes)?;

                *model = reloaded.to_model();
                retain_configured(&mut model, &self.domains);
                encoded = Some((bytes, model.len(), reloaded.total_probes));
                Ok(reloaded.weights)
            })?;
        }

        let (bytes, tables, probes) = encoded
            .ok_or_else(|| ProbeError::internal("Checkpoint produced no snapshot"))?;
        self.stats.write_encoded(&bytes)?;

        tracing::info!(tables, probes, "Stats checkpoint written");
        Ok(())
    }

    /// Final flush on shutdown
    pub fn flush(&self) -> Result<()> {
        self.ledger.sync()?;
        self.checkpoint()
    }
}

fn retain_configured(model: &mut IdentifierModel, domains: &[DomainRuntime]) {
    let names: HashSet<&str> = domains.iter().map(|d| d.name()).collect();
    model.retain_domains(&names);
}
