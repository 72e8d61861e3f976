//! Configuration loading and validation
//!
//! The config file is JSON. Secrets and a few operational knobs can be
//! overridden from the environment (a `.env` file is honoured).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config_error;
use crate::error::{ProbeError, Result};
use crate::model::alphabet;
use crate::types::{DomainConfig, ValidatorKind};

/// Default config file name
pub const DEFAULT_CONFIG_FILE: &str = "linkprobe.json";

/// Weight bounds and reward-shaping steps for the domain scheduler
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightConfig {
    pub min_weight: f64,
    pub max_weight: f64,
    pub increase_step: f64,
    pub decrease_step: f64,
    pub initial_weight: f64,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            min_weight: 1.0,
            max_weight: 10.0,
            increase_step: 0.5,
            decrease_step: 0.01,
            initial_weight: 3.0,
        }
    }
}

impl WeightConfig {
    pub fn clamp(&self, weight: f64) -> f64 {
        weight.clamp(self.min_weight, self.max_weight)
    }
}

/// Worker pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub workers: usize,
    /// Probes between stats checkpoints, counted across all workers
    pub snapshot_interval: u64,
    pub probe_timeout_ms: u64,
    /// Stop after this many probes (unbounded when absent)
    pub max_probes: Option<u64>,
    /// Consecutive ledger write failures before the pool gives up
    pub max_persist_failures: u32,
    /// Consecutive claim collisions before a worker paces anyway
    pub collision_limit: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            snapshot_interval: 500,
            probe_timeout_ms: 10_000,
            max_probes: None,
            max_persist_failures: 3,
            collision_limit: 64,
        }
    }
}

impl PoolConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Restart policy after a fatal pool exit
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub restart_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Give up after this many restarts (unbounded when absent)
    pub max_restarts: Option<u32>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            restart_backoff_ms: 5_000,
            max_backoff_ms: 300_000,
            max_restarts: None,
        }
    }
}

/// On-disk locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub ledger_file: String,
    pub stats_file: String,
    pub discoveries_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            ledger_file: "tested_urls.txt".to_string(),
            stats_file: "stats.json".to_string(),
            discoveries_file: "discoveries.jsonl".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join(&self.ledger_file)
    }

    pub fn stats_path(&self) -> PathBuf {
        self.data_dir.join(&self.stats_file)
    }

    pub fn discoveries_path(&self) -> PathBuf {
        self.data_dir.join(&self.discoveries_file)
    }
}

/// Discord delivery: either a bot token plus channel, or a webhook
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    pub token: Option<String>,
    pub channel_id: Option<u64>,
    pub webhook_url: Option<String>,
}

impl DiscordConfig {
    pub fn is_configured(&self) -> bool {
        self.webhook_url.is_some() || (self.token.is_some() && self.channel_id.is_some())
    }
}

/// Which sinks receive discoveries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub log: bool,
    pub file: bool,
    pub discord: Option<DiscordConfig>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            log: true,
            file: true,
            discord: None,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub domains: Vec<DomainConfig>,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub weights: WeightConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

impl AppConfig {
    /// Load, apply environment overrides, and validate
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProbeError::config(format!(
                "Cannot read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let mut config = Self::from_json(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;

        tracing::debug!(
            path = %path.display(),
            domains = config.domains.len(),
            workers = config.pool.workers,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Parse without environment overrides or validation
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| ProbeError::config(format!("Invalid config JSON: {}", e)))
    }

    /// Apply `LINKPROBE_*` environment variables on top of the file values
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(workers) = std::env::var("LINKPROBE_WORKERS") {
            self.pool.workers = workers.parse().map_err(|_| {
                ProbeError::config(format!("LINKPROBE_WORKERS is not a number: {}", workers))
            })?;
        }

        if let Ok(dir) = std::env::var("LINKPROBE_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }

        let token = std::env::var("LINKPROBE_DISCORD_TOKEN").ok();
        let channel = std::env::var("LINKPROBE_DISCORD_CHANNEL").ok();
        let webhook = std::env::var("LINKPROBE_DISCORD_WEBHOOK").ok();

        if token.is_some() || channel.is_some() || webhook.is_some() {
            let discord = self.notify.discord.get_or_insert_with(DiscordConfig::default);
            if let Some(token) = token {
                discord.token = Some(token);
            }
            if let Some(channel) = channel {
                discord.channel_id = Some(channel.parse().map_err(|_| {
                    ProbeError::config(format!(
                        "LINKPROBE_DISCORD_CHANNEL is not a channel id: {}",
                        channel
                    ))
                })?);
            }
            if let Some(webhook) = webhook {
                discord.webhook_url = Some(webhook);
            }
        }

        Ok(())
    }

    /// Reject configurations the probing core cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.domains.is_empty() {
            return Err(ProbeError::config("At least one domain must be configured"));
        }

        let mut names = HashSet::new();
        for domain in &self.domains {
            if !names.insert(domain.name.as_str()) {
                return Err(config_error!("Duplicate domain name: {}", domain.name));
            }
            validate_domain(domain)?;
        }

        let w = &self.weights;
        if !(w.min_weight >= 1.0) {
            return Err(ProbeError::config("weights.min_weight must be at least 1.0"));
        }
        if w.max_weight < w.min_weight {
            return Err(ProbeError::config(
                "weights.max_weight must not be below weights.min_weight",
            ));
        }
        if !(w.decrease_step > 0.0) || !(w.increase_step > w.decrease_step) {
            return Err(ProbeError::config(
                "weights.increase_step must be greater than weights.decrease_step, which must be positive",
            ));
        }

        if self.pool.workers == 0 {
            return Err(ProbeError::config("pool.workers must be at least 1"));
        }
        if self.pool.snapshot_interval == 0 {
            return Err(ProbeError::config("pool.snapshot_interval must be at least 1"));
        }
        if self.pool.probe_timeout_ms == 0 {
            return Err(ProbeError::config("pool.probe_timeout_ms must be positive"));
        }

        Ok(())
    }
}

fn validate_domain(domain: &DomainConfig) -> Result<()> {
    if domain.name.trim().is_empty() {
        return Err(ProbeError::config("Domain name cannot be empty"));
    }
    if !(domain.base_url.starts_with("http://") || domain.base_url.starts_with("https://")) {
        return Err(config_error!(
            "Domain {} base_url must start with http:// or https://",
            domain.name
        ));
    }

    let lengths = domain.lengths();
    if lengths.is_empty() || lengths.iter().any(|&len| len == 0) {
        return Err(config_error!("Domain {} needs at least one non-zero code length", domain.name));
    }

    if alphabet::resolve(domain).is_empty() {
        return Err(config_error!("Domain {} has an empty alphabet", domain.name));
    }

    if let Some(initial) = domain.initial_weight {
        if !initial.is_finite() || initial <= 0.0 {
            return Err(config_error!("Domain {} initial_weight must be positive", domain.name));
        }
    }

    // Compile patterns now so a typo fails at load, not on the first probe
    match &domain.validator {
        ValidatorKind::Redirect { not_found_patterns } => {
            for pattern in not_found_patterns {
                regex::Regex::new(pattern)?;
            }
        }
        ValidatorKind::Page {
            miss_markers,
            media_pattern,
        } => {
            for pattern in miss_markers.iter().chain(media_pattern.iter()) {
                regex::Regex::new(pattern)?;
            }
        }
        ValidatorKind::Image { .. } => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AppConfig {
        AppConfig::from_json(
            r#"{
                "domains": [
                    { "name": "fakecrime.bio", "base_url": "https://i.fakecrime.bio/", "length": 5, "alphabet": "emoji" },
                    { "name": "sho.rt", "base_url": "https://sho.rt/", "validator": { "kind": "redirect" } }
                ],
                "pool": { "workers": 4 }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_defaults_applied() {
        let config = sample();
        assert_eq!(config.pool.workers, 4);
        assert_eq!(config.pool.snapshot_interval, 500);
        assert_eq!(config.weights, WeightConfig::default());
        assert_eq!(config.storage.ledger_path(), PathBuf::from("data/tested_urls.txt"));
        assert!(config.notify.log);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_duplicate_domains() {
        let mut config = sample();
        let dup = config.domains[0].clone();
        config.domains.push(dup);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_weights() {
        let mut config = sample();
        config.weights.min_weight = 0.5;
        assert!(config.validate().is_err());

        let mut config = sample();
        config.weights.increase_step = 0.01;
        config.weights.decrease_step = 0.01;
        assert!(config.validate().is_err());

        let mut config = sample();
        config.weights.max_weight = 0.9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_pattern() {
        let mut config = sample();
        config.domains[1].validator = ValidatorKind::Redirect {
            not_found_patterns: vec!["(unclosed".to_string()],
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_length() {
        let mut config = sample();
        config.domains[0].length = crate::types::CodeLength::Set(vec![]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_weight_clamp() {
        let weights = WeightConfig::default();
        assert_eq!(weights.clamp(0.2), 1.0);
        assert_eq!(weights.clamp(42.0), 10.0);
        assert_eq!(weights.clamp(3.0), 3.0);
    }
}
