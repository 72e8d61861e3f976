//! Concurrent probe workers
//!
//! Each worker runs the full probe loop independently: pick a domain,
//! generate a candidate, claim it in the ledger, validate, feed the outcome
//! back, then pace. Workers share one [`ProbeState`] and stop together on
//! shutdown, budget exhaustion or the first fatal fault.

use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;

use super::state::{DomainRuntime, Probe, ProbeState};
use crate::config::PoolConfig;
use crate::error::{ProbeError, Result};
use crate::internal_error;
use crate::notify::Notifier;
use crate::types::{Discovery, HitPayload, PoolMetrics, ProbeFault, ProbeOutcome};
use crate::validator::ValidatorRegistry;

/// How long pending notifications may take once the workers have stopped
const NOTIFY_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Why a pool stopped
#[derive(Debug)]
pub enum PoolExit {
    /// Shutdown was requested
    Shutdown,
    /// The probe budget is spent
    Completed,
    /// A worker hit an unrecoverable fault
    Fatal(ProbeError),
}

struct Shared {
    state: Arc<ProbeState>,
    validators: ValidatorRegistry,
    notifier: Arc<dyn Notifier>,
    config: PoolConfig,
    metrics: Arc<PoolMetrics>,
    reserved: AtomicU64,
    completed: AtomicU64,
    checkpoint_failures: AtomicU32,
    fatal: Mutex<Option<ProbeError>>,
    halt: watch::Sender<bool>,
    notifications: Mutex<JoinSet<()>>,
}

/// A fixed set of workers over one shared state. A pool runs once.
pub struct ProbePool {
    shared: Arc<Shared>,
}

impl ProbePool {
    pub fn new(
        state: Arc<ProbeState>,
        validators: ValidatorRegistry,
        notifier: Arc<dyn Notifier>,
        config: PoolConfig,
        metrics: Arc<PoolMetrics>,
    ) -> Self {
        let (halt, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                state,
                validators,
                notifier,
                config,
                metrics,
                reserved: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                checkpoint_failures: AtomicU32::new(0),
                fatal: Mutex::new(None),
                halt,
                notifications: Mutex::new(JoinSet::new()),
            }),
        }
    }

    pub fn state(&self) -> &Arc<ProbeState> {
        &self.shared.state
    }

    pub fn metrics(&self) -> &Arc<PoolMetrics> {
        &self.shared.metrics
    }

    /// Run all workers until shutdown, budget exhaustion or a fatal fault,
    /// then drain notifications and flush state
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> PoolExit {
        let shared = &self.shared;

        if *shared.halt.borrow() {
            return PoolExit::Fatal(ProbeError::internal("Probe pool already ran"));
        }
        if let Err(e) = shared.validators.ensure_complete(shared.state.domains().len()) {
            return PoolExit::Fatal(e);
        }

        let workers = shared.config.workers.max(1);
        tracing::info!(
            workers,
            domains = shared.state.domains().len(),
            budget = ?shared.config.max_probes,
            "Probe pool starting"
        );

        let shutdown_requested = Arc::new(AtomicBool::new(false));
        let forwarder = {
            let shared = Arc::clone(shared);
            let requested = Arc::clone(&shutdown_requested);
            tokio::spawn(async move {
                wait_for(shutdown).await;
                tracing::info!("Shutdown requested, stopping workers");
                requested.store(true, Ordering::SeqCst);
                shared.halt.send_replace(true);
            })
        };

        let mut tasks = JoinSet::new();
        for worker in 0..workers {
            let shared = Arc::clone(shared);
            let halt = shared.halt.subscribe();
            tasks.spawn(worker_loop(worker, shared, halt));
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                shared.fail(internal_error!("Worker task failed: {}", e));
            }
        }

        forwarder.abort();
        shared.halt.send_replace(true);

        shared.drain_notifications().await;

        let state = Arc::clone(&shared.state);
        let flushed = tokio::task::spawn_blocking(move || state.flush())
            .await
            .map_err(|e| internal_error!("Flush task failed: {}", e))
            .and_then(|r| r);
        if let Err(e) = flushed {
            tracing::error!(error = %e, "Final flush failed");
            shared.fail(e);
        }

        let stats = shared.metrics.get_stats();
        tracing::info!(
            probes = stats.probes,
            hits = stats.hits,
            errors = stats.errors,
            collisions = stats.collisions,
            "Probe pool stopped"
        );

        match shared.fatal.lock().take() {
            Some(e) => PoolExit::Fatal(e),
            None if shutdown_requested.load(Ordering::SeqCst) => PoolExit::Shutdown,
            None => PoolExit::Completed,
        }
    }
}

impl Shared {
    /// Reserve one unit of the probe budget
    fn reserve(&self) -> bool {
        match self.config.max_probes {
            None => true,
            Some(max) => self
                .reserved
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
                .is_ok(),
        }
    }

    /// Return a reserved unit that did not turn into a probe
    fn release(&self) {
        if self.config.max_probes.is_some() {
            self.reserved.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Record the first fatal fault and stop every worker
    fn fail(&self, err: ProbeError) {
        {
            let mut slot = self.fatal.lock();
            if slot.is_none() {
                tracing::error!(error = %err, "Fatal fault, stopping probe pool");
                *slot = Some(err);
            } else {
                tracing::debug!(error = %err, "Additional fault after pool stop");
            }
        }
        self.halt.send_replace(true);
    }

    async fn probe(&self, domain: &DomainRuntime, probe: &Probe) -> ProbeOutcome {
        let Some(validator) = self.validators.get(probe.domain) else {
            return ProbeOutcome::Error(ProbeFault::fatal(format!(
                "No validator for {}",
                domain.name()
            )));
        };

        let timeout = self.config.probe_timeout();
        match tokio::time::timeout(
            timeout,
            validator.validate(&domain.config, &probe.url, &probe.candidate.code),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                self.metrics.increment_timeouts();
                tracing::debug!(url = %probe.url, timeout_ms = timeout.as_millis() as u64, "Probe timed out");
                ProbeOutcome::Miss
            }
        }
    }

    /// Hand a hit to the notifier without blocking the worker
    fn announce(&self, domain: &DomainRuntime, probe: &Probe, payload: HitPayload) {
        let caption = payload
            .resolved_url
            .as_ref()
            .map(|resolved| format!("{} -> {}", probe.url, resolved));

        let discovery = Discovery {
            domain: domain.name().to_string(),
            url: probe.url.clone(),
            code: probe.candidate.code.clone(),
            payload,
            caption,
            found_at: Utc::now(),
        };

        tracing::info!(domain = %discovery.domain, url = %discovery.url, "Hit");

        let notifier = Arc::clone(&self.notifier);
        let metrics = Arc::clone(&self.metrics);
        let mut pending = self.notifications.lock();
        // Reap finished deliveries so the set does not grow for the whole run
        while let Some(Some(_)) = pending.join_next().now_or_never() {}
        pending.spawn(async move {
            notifier.notify(&discovery).await;
            metrics.increment_notifications();
        });
    }

    async fn drain_notifications(&self) {
        let mut pending = std::mem::replace(&mut *self.notifications.lock(), JoinSet::new());
        if pending.is_empty() {
            return;
        }

        let drained = tokio::time::timeout(NOTIFY_DRAIN_TIMEOUT, async {
            while pending.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                remaining = pending.len(),
                "Notifications still pending at shutdown, abandoning them"
            );
            pending.abort_all();
        }
    }

    /// Count a finished probe and checkpoint on the configured cadence
    async fn after_probe(&self) {
        let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        let interval = self.config.snapshot_interval;
        if interval == 0 || done % interval != 0 {
            return;
        }

        match self.checkpoint().await {
            Ok(()) => {
                self.checkpoint_failures.store(0, Ordering::SeqCst);
                self.metrics.increment_checkpoints();
            }
            Err(e) => {
                let failures = self.checkpoint_failures.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::warn!(error = %e, failures, "Stats checkpoint failed");
                if failures >= self.config.max_persist_failures.max(1) {
                    self.fail(e);
                }
            }
        }
    }

    async fn checkpoint(&self) -> Result<()> {
        let state = Arc::clone(&self.state);
        tokio::task::spawn_blocking(move || state.checkpoint())
            .await
            .map_err(|e| internal_error!("Checkpoint task failed: {}", e))?
    }
}

async fn worker_loop(worker: usize, shared: Arc<Shared>, mut halt: watch::Receiver<bool>) {
    let mut rng = StdRng::from_entropy();
    let mut collisions = 0u32;
    let mut persist_failures = 0u32;
    let state = Arc::clone(&shared.state);

    tracing::debug!(worker, "Worker started");

    while !*halt.borrow() {
        if !shared.reserve() {
            tracing::debug!(worker, "Probe budget spent");
            break;
        }

        let id = state.choose_domain(&mut rng);
        let probe = match state.generate(id, &mut rng) {
            Ok(probe) => probe,
            Err(e) => {
                shared.release();
                shared.fail(e);
                break;
            }
        };
        let Some(domain) = state.domain(id) else {
            shared.release();
            shared.fail(internal_error!("Unknown domain {}", id));
            break;
        };

        match state.claim(&probe.url) {
            Ok(true) => {
                collisions = 0;
                persist_failures = 0;
            }
            Ok(false) => {
                shared.release();
                shared.metrics.increment_collisions();
                collisions += 1;
                if collisions >= shared.config.collision_limit.max(1) {
                    tracing::warn!(
                        worker,
                        domain = %domain.name(),
                        collisions,
                        "Candidate space looks exhausted"
                    );
                    collisions = 0;
                    pace(&mut halt, domain.config.interval()).await;
                } else {
                    tokio::task::yield_now().await;
                }
                continue;
            }
            Err(e) => {
                shared.release();
                persist_failures += 1;
                tracing::warn!(worker, error = %e, failures = persist_failures, "Ledger write failed");
                if persist_failures >= shared.config.max_persist_failures.max(1) {
                    shared.fail(e);
                    break;
                }
                pace(&mut halt, domain.config.interval()).await;
                continue;
            }
        }

        let outcome = shared.probe(domain, &probe).await;
        shared.metrics.record_outcome(&outcome);
        let weight = state.record_outcome(&probe, &outcome);

        tracing::debug!(
            worker,
            domain = %domain.name(),
            url = %probe.url,
            outcome = %outcome,
            weight,
            "Probed"
        );

        match outcome {
            ProbeOutcome::Hit(payload) => shared.announce(domain, &probe, payload),
            ProbeOutcome::Error(fault) => {
                tracing::warn!(
                    worker,
                    domain = %domain.name(),
                    url = %probe.url,
                    error = %fault.message,
                    "Probe error"
                );
                if fault.fatal {
                    shared.fail(ProbeError::fatal(format!(
                        "{} validator: {}",
                        domain.name(),
                        fault.message
                    )));
                    break;
                }
            }
            ProbeOutcome::Miss => {}
        }

        shared.after_probe().await;
        pace(&mut halt, domain.config.interval()).await;
    }

    tracing::debug!(worker, "Worker stopped");
}

/// Sleep for the domain interval, waking early on halt
async fn pace(halt: &mut watch::Receiver<bool>, interval: Duration) {
    if interval.is_zero() {
        tokio::task::yield_now().await;
        return;
    }

    tokio::select! {
        _ = tokio::time::sleep(interval) => {}
        _ = halt.changed() => {}
    }
}

/// Resolve once the flag turns true. A dropped sender never fires.
pub(crate) async fn wait_for(mut flag: watch::Receiver<bool>) {
    loop {
        if *flag.borrow_and_update() {
            return;
        }
        if flag.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
