//! Adaptive domain scheduler
//!
//! A bandit-style selector: domains are drawn proportionally to their
//! weight, hits push a weight up by `increase_step`, misses pull it down by
//! the smaller `decrease_step`. Weights are clamped to
//! `[min_weight, max_weight]` so no domain is ever starved or dominant.

use parking_lot::RwLock;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use std::collections::BTreeMap;

use crate::config::WeightConfig;
use crate::error::Result;
use crate::types::{DomainConfig, DomainId};

pub struct DomainScheduler {
    names: Vec<String>,
    weights: RwLock<Vec<f64>>,
    bounds: WeightConfig,
}

impl DomainScheduler {
    /// Create a scheduler with each domain at its configured (clamped) initial weight
    pub fn new(domains: &[DomainConfig], bounds: WeightConfig) -> Self {
        let names = domains.iter().map(|d| d.name.clone()).collect();
        let weights = domains
            .iter()
            .map(|d| bounds.clamp(d.initial_weight.unwrap_or(bounds.initial_weight)))
            .collect();

        Self {
            names,
            weights: RwLock::new(weights),
            bounds,
        }
    }

    /// Pick the next domain to probe, proportionally to weight
    pub fn choose_domain<R: Rng + ?Sized>(&self, rng: &mut R) -> DomainId {
        let weights = self.weights.read();
        match WeightedIndex::new(weights.iter()) {
            Ok(dist) => DomainId(dist.sample(rng)),
            // Unreachable with min_weight >= 1, kept total for an empty table
            Err(_) => DomainId(rng.gen_range(0..weights.len().max(1))),
        }
    }

    /// Apply reward shaping for a completed probe and return the new weight
    pub fn record_outcome(&self, domain: DomainId, success: bool) -> f64 {
        let mut weights = self.weights.write();
        let Some(weight) = weights.get_mut(domain.0) else {
            return 0.0;
        };

        *weight = if success {
            (*weight + self.bounds.increase_step).min(self.bounds.max_weight)
        } else {
            (*weight - self.bounds.decrease_step).max(self.bounds.min_weight)
        };
        *weight
    }

    pub fn weight(&self, domain: DomainId) -> Option<f64> {
        self.weights.read().get(domain.0).copied()
    }

    pub fn name(&self, domain: DomainId) -> Option<&str> {
        self.names.get(domain.0).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn bounds(&self) -> &WeightConfig {
        &self.bounds
    }

    /// Current weights keyed by domain name
    pub fn weights_by_name(&self) -> BTreeMap<String, f64> {
        let weights = self.weights.read();
        self.names.iter().cloned().zip(weights.iter().copied()).collect()
    }

    /// Replace weights from a by-name map. Unknown names are ignored and
    /// domains missing from the map keep their current weight.
    pub fn restore(&self, saved: &BTreeMap<String, f64>) {
        let mut weights = self.weights.write();
        self.apply(&mut weights, saved);
    }

    /// Run `exchange` with the weights write-locked: it receives the current
    /// weights and returns the ones to install. No outcome can be recorded
    /// in between, so a save-then-reload cycle never loses an update.
    pub fn checkpoint_with<F>(&self, exchange: F) -> Result<()>
    where
        F: FnOnce(BTreeMap<String, f64>) -> Result<BTreeMap<String, f64>>,
    {
        let mut weights = self.weights.write();
        let current = self.names.iter().cloned().zip(weights.iter().copied()).collect();
        let reloaded = exchange(current)?;
        self.apply(&mut weights, &reloaded);
        Ok(())
    }

    fn apply(&self, weights: &mut [f64], saved: &BTreeMap<String, f64>) {
        for (slot, name) in weights.iter_mut().zip(&self.names) {
            if let Some(value) = saved.get(name) {
                if value.is_finite() {
                    *slot = self.bounds.clamp(*value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn domains(names: &[&str]) -> Vec<DomainConfig> {
        names
            .iter()
            .map(|n| DomainConfig::new(*n, format!("https://{}/", n)))
            .collect()
    }

    #[test]
    fn test_ten_misses_scenario() {
        let mut d2 = DomainConfig::new("d2", "https://d2/");
        d2.initial_weight = Some(3.0);
        let bounds = WeightConfig {
            min_weight: 1.0,
            decrease_step: 0.01,
            ..Default::default()
        };
        let scheduler = DomainScheduler::new(&[d2], bounds);

        for _ in 0..10 {
            scheduler.record_outcome(DomainId(0), false);
        }
        let weight = scheduler.weight(DomainId(0)).unwrap();
        assert!((weight - 2.9).abs() < 1e-9, "weight was {}", weight);
    }

    #[test]
    fn test_floor_and_ceiling() {
        let scheduler = DomainScheduler::new(&domains(&["a"]), WeightConfig::default());
        for _ in 0..1_000 {
            scheduler.record_outcome(DomainId(0), false);
        }
        assert_eq!(scheduler.weight(DomainId(0)), Some(1.0));

        for _ in 0..1_000 {
            scheduler.record_outcome(DomainId(0), true);
        }
        assert_eq!(scheduler.weight(DomainId(0)), Some(10.0));
    }

    #[test]
    fn test_weights_stay_bounded_under_random_outcomes() {
        let bounds = WeightConfig::default();
        let scheduler = DomainScheduler::new(&domains(&["a", "b", "c"]), bounds);
        let mut rng = StdRng::seed_from_u64(99);

        for _ in 0..20_000 {
            let domain = DomainId(rng.gen_range(0..3));
            let w = scheduler.record_outcome(domain, rng.gen_bool(0.05));
            assert!(w >= bounds.min_weight && w <= bounds.max_weight);
        }
    }

    #[test]
    fn test_initial_weight_clamped() {
        let mut d = DomainConfig::new("a", "https://a/");
        d.initial_weight = Some(500.0);
        let scheduler = DomainScheduler::new(&[d], WeightConfig::default());
        assert_eq!(scheduler.weight(DomainId(0)), Some(10.0));
    }

    #[test]
    fn test_choice_is_proportional() {
        let scheduler = DomainScheduler::new(&domains(&["heavy", "light"]), WeightConfig::default());
        scheduler.restore(&BTreeMap::from([
            ("heavy".to_string(), 9.0),
            ("light".to_string(), 1.0),
        ]));

        let mut rng = StdRng::seed_from_u64(3);
        let mut light = 0;
        for _ in 0..10_000 {
            if scheduler.choose_domain(&mut rng) == DomainId(1) {
                light += 1;
            }
        }
        // Expected 1000; never zero because the floor keeps every domain live
        assert!(light > 800 && light < 1_200, "light chosen {} times", light);
    }

    #[test]
    fn test_restore_ignores_unknown_and_clamps() {
        let scheduler = DomainScheduler::new(&domains(&["a", "b"]), WeightConfig::default());
        scheduler.restore(&BTreeMap::from([
            ("a".to_string(), 0.1),
            ("zzz".to_string(), 5.0),
        ]));
        assert_eq!(scheduler.weight(DomainId(0)), Some(1.0));
        assert_eq!(scheduler.weight(DomainId(1)), Some(3.0));
    }

    #[test]
    fn test_checkpoint_with_installs_reloaded_weights() {
        let scheduler = DomainScheduler::new(&domains(&["a"]), WeightConfig::default());
        scheduler
            .checkpoint_with(|current| {
                assert_eq!(current.get("a"), Some(&3.0));
                Ok(BTreeMap::from([("a".to_string(), 4.5)]))
            })
            .unwrap();
        assert_eq!(scheduler.weight(DomainId(0)), Some(4.5));
    }
}
