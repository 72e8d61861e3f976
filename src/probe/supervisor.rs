//! Restart loop around the probe pool
//!
//! A fatal pool exit is answered by a fresh pool: state is reopened (the
//! ledger replayed from disk) and validators are rebuilt, after an
//! exponential backoff. Configuration faults are not retried.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use super::pool::{wait_for, PoolExit, ProbePool};
use super::state::ProbeState;
use crate::config::AppConfig;
use crate::error::{ProbeError, Result};
use crate::notify::Notifier;
use crate::types::{MetricsSnapshot, PoolMetrics};
use crate::validator::ValidatorRegistry;

/// Builds the validators for one pool run
pub type ValidatorFactory = Arc<dyn Fn(&AppConfig) -> Result<ValidatorRegistry> + Send + Sync>;

/// How a supervised run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    Shutdown,
    Completed,
}

#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    pub end: RunEnd,
    pub restarts: u32,
    pub metrics: MetricsSnapshot,
}

pub struct Supervisor {
    config: AppConfig,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<PoolMetrics>,
    validators: ValidatorFactory,
}

impl Supervisor {
    pub fn new(config: AppConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            config,
            notifier,
            metrics: Arc::new(PoolMetrics::new()),
            validators: Arc::new(|config: &AppConfig| {
                ValidatorRegistry::from_domains(&config.domains, config.pool.probe_timeout())
            }),
        }
    }

    /// Replace the validator factory
    pub fn with_validators(mut self, factory: ValidatorFactory) -> Self {
        self.validators = factory;
        self
    }

    /// Counters shared by every pool this supervisor starts
    pub fn metrics(&self) -> Arc<PoolMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Run pools until shutdown or budget exhaustion, restarting after
    /// restartable faults
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<RunSummary> {
        let policy = &self.config.supervisor;
        let max_backoff = Duration::from_millis(policy.max_backoff_ms);
        let initial_backoff = Duration::from_millis(policy.restart_backoff_ms).min(max_backoff);
        let mut backoff = initial_backoff;
        let mut restarts = 0u32;

        loop {
            let started = Instant::now();
            let err = match self.run_once(shutdown.clone()).await {
                Ok(PoolExit::Shutdown) => return Ok(self.summary(RunEnd::Shutdown, restarts)),
                Ok(PoolExit::Completed) => return Ok(self.summary(RunEnd::Completed, restarts)),
                Ok(PoolExit::Fatal(e)) | Err(e) => e,
            };

            if !err.is_restartable() {
                tracing::error!(error = %err, "Unrecoverable fault, not restarting");
                return Err(err);
            }
            if *shutdown.borrow() {
                tracing::warn!(error = %err, "Fault during shutdown, not restarting");
                return Ok(self.summary(RunEnd::Shutdown, restarts));
            }
            if policy.max_restarts.is_some_and(|max| restarts >= max) {
                tracing::error!(error = %err, restarts, "Restart limit reached");
                return Err(err);
            }

            // A pool that stayed up longer than the longest backoff earned a fresh start
            if started.elapsed() > max_backoff {
                backoff = initial_backoff;
            }

            restarts += 1;
            tracing::warn!(
                error = %err,
                restarts,
                backoff_ms = backoff.as_millis() as u64,
                "Probe pool failed, restarting"
            );

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = wait_for(shutdown.clone()) => {
                    return Ok(self.summary(RunEnd::Shutdown, restarts));
                }
            }
            backoff = (backoff * 2).min(max_backoff);
        }
    }

    async fn run_once(&self, shutdown: watch::Receiver<bool>) -> Result<PoolExit> {
        let mut pool_config = self.config.pool.clone();
        if let Some(max) = pool_config.max_probes {
            let remaining = max.saturating_sub(self.metrics.get_stats().probes);
            if remaining == 0 {
                return Ok(PoolExit::Completed);
            }
            pool_config.max_probes = Some(remaining);
        }

        let config = self.config.clone();
        let state = tokio::task::spawn_blocking(move || ProbeState::open(&config))
            .await
            .map_err(|e| ProbeError::internal(format!("State load task failed: {}", e)))??;
        let validators = (self.validators)(&self.config)?;

        let pool = ProbePool::new(
            Arc::new(state),
            validators,
            Arc::clone(&self.notifier),
            pool_config,
            Arc::clone(&self.metrics),
        );
        Ok(pool.run(shutdown).await)
    }

    fn summary(&self, end: RunEnd, restarts: u32) -> RunSummary {
        RunSummary {
            end,
            restarts,
            metrics: self.metrics.get_stats(),
        }
    }
}
